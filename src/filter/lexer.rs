//! Tokenizer for the SCIM filter grammar.
//!
//! Operators and logical keywords are matched case-insensitively by the
//! parser; the lexer preserves identifier case so later comparison can honor
//! `caseExact`. Every token records the 1-based column it started at, which
//! ends up in `invalidFilter` diagnostics.

use crate::error::{ScimError, ScimResult};
use serde_json::Number;

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// Identifier, operator, keyword, or URN-prefixed attribute path
    Word(String),
    /// Decoded string literal
    Str(String),
    /// Numeric literal
    Num(Number),
}

/// A token plus the 1-based column it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    /// The token
    pub token: Token,
    /// 1-based column of the token's first character
    pub column: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '$')
}

/// Tokenize a filter or path expression.
pub fn tokenize(input: &str) -> ScimResult<Vec<SpannedToken>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '(' => {
                tokens.push(SpannedToken {
                    token: Token::LParen,
                    column,
                });
                i += 1;
            }
            ')' => {
                tokens.push(SpannedToken {
                    token: Token::RParen,
                    column,
                });
                i += 1;
            }
            '[' => {
                tokens.push(SpannedToken {
                    token: Token::LBracket,
                    column,
                });
                i += 1;
            }
            ']' => {
                tokens.push(SpannedToken {
                    token: Token::RBracket,
                    column,
                });
                i += 1;
            }
            '"' => {
                let (literal, consumed) = lex_string(&chars, i, column)?;
                tokens.push(SpannedToken {
                    token: Token::Str(literal),
                    column,
                });
                i += consumed;
            }
            '-' | '0'..='9' => {
                let (number, consumed) = lex_number(&chars, i, column)?;
                tokens.push(SpannedToken {
                    token: Token::Num(number),
                    column,
                });
                i += consumed;
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(SpannedToken {
                    token: Token::Word(word),
                    column,
                });
            }
            other => {
                return Err(ScimError::invalid_filter(
                    format!("unexpected character '{other}'"),
                    column,
                ));
            }
        }
    }
    Ok(tokens)
}

/// Lex a JSON string literal starting at the opening quote. Returns the
/// decoded value and the number of characters consumed.
fn lex_string(chars: &[char], start: usize, column: usize) -> ScimResult<(String, usize)> {
    let mut i = start + 1;
    let mut escaped = false;
    while i < chars.len() {
        match chars[i] {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => {
                let raw: String = chars[start..=i].iter().collect();
                // Delegate escape handling to the JSON parser
                let decoded: String = serde_json::from_str(&raw).map_err(|e| {
                    ScimError::invalid_filter(format!("bad string literal: {e}"), column)
                })?;
                return Ok((decoded, i - start + 1));
            }
            _ => escaped = false,
        }
        i += 1;
    }
    Err(ScimError::invalid_filter(
        "unterminated string literal",
        column,
    ))
}

/// Lex a JSON number literal. Returns the number and characters consumed.
fn lex_number(chars: &[char], start: usize, column: usize) -> ScimResult<(Number, usize)> {
    let mut i = start;
    if chars[i] == '-' {
        i += 1;
    }
    let mut saw_fraction = false;
    let mut saw_exponent = false;
    while i < chars.len() {
        match chars[i] {
            '0'..='9' => i += 1,
            '.' if !saw_fraction && !saw_exponent => {
                saw_fraction = true;
                i += 1;
            }
            'e' | 'E' if !saw_exponent => {
                saw_exponent = true;
                i += 1;
                if i < chars.len() && matches!(chars[i], '+' | '-') {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    let raw: String = chars[start..i].iter().collect();
    let number: Number = serde_json::from_str(&raw)
        .map_err(|_| ScimError::invalid_filter(format!("bad number literal '{raw}'"), column))?;
    Ok((number, i - start))
}
