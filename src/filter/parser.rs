//! Recursive-descent parser for filters and PATCH paths.
//!
//! Precedence: `not` binds tightest, then `and`, then `or`. Operators and
//! logical keywords match case-insensitively; attribute names keep their
//! case. All diagnostics carry the 1-based column of the offending token.

use crate::error::{ScimError, ScimResult};
use crate::filter::ast::{AttrPath, CompareOp, Filter, PatchPath};
use crate::filter::lexer::{SpannedToken, Token, tokenize};
use serde_json::Value;

struct TokenStream {
    tokens: Vec<SpannedToken>,
    pos: usize,
    end_column: usize,
}

impl TokenStream {
    fn new(input: &str) -> ScimResult<Self> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            end_column: input.chars().count() + 1,
        })
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn current_column(&self) -> usize {
        self.peek().map(|t| t.column).unwrap_or(self.end_column)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> ScimResult<()> {
        match self.peek() {
            Some(t) if t.token == *expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(ScimError::invalid_filter(
                format!("expected {what}"),
                self.current_column(),
            )),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

fn word_is(token: &SpannedToken, keyword: &str) -> bool {
    matches!(&token.token, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
}

/// Parse a filter expression string into its AST.
pub fn parse_filter(input: &str) -> ScimResult<Filter> {
    let mut ts = TokenStream::new(input)?;
    if ts.at_end() {
        return Err(ScimError::invalid_filter("empty filter expression", 1));
    }
    let filter = parse_or(&mut ts)?;
    if !ts.at_end() {
        return Err(ScimError::invalid_filter(
            "unexpected trailing token",
            ts.current_column(),
        ));
    }
    Ok(filter)
}

/// Parse a PATCH `path` value into its AST.
pub fn parse_patch_path(input: &str) -> ScimResult<PatchPath> {
    let mut ts = TokenStream::new(input)?;
    let Some(token) = ts.advance() else {
        return Err(ScimError::invalid_filter("empty attribute path", 1));
    };
    let Token::Word(word) = &token.token else {
        return Err(ScimError::invalid_filter(
            "expected attribute path",
            token.column,
        ));
    };
    let path = parse_attr_path(word, token.column)?;

    if matches!(ts.peek().map(|t| &t.token), Some(Token::LBracket)) {
        ts.advance();
        let filter = parse_or(&mut ts)?;
        ts.expect(&Token::RBracket, "']'")?;
        let sub_attr = match ts.peek() {
            Some(SpannedToken {
                token: Token::Word(w),
                column,
            }) if w.starts_with('.') => {
                let column = *column;
                let sub = w[1..].to_string();
                if sub.is_empty() || sub.contains('.') || sub.contains(':') {
                    return Err(ScimError::invalid_filter(
                        "expected a single sub-attribute after ']'",
                        column,
                    ));
                }
                validate_name(&sub, column)?;
                ts.advance();
                Some(sub)
            }
            _ => None,
        };
        if !ts.at_end() {
            return Err(ScimError::invalid_filter(
                "unexpected trailing token in path",
                ts.current_column(),
            ));
        }
        Ok(PatchPath::Filtered {
            path,
            filter,
            sub_attr,
        })
    } else {
        if !ts.at_end() {
            return Err(ScimError::invalid_filter(
                "unexpected trailing token in path",
                ts.current_column(),
            ));
        }
        Ok(PatchPath::Attribute(path))
    }
}

fn parse_or(ts: &mut TokenStream) -> ScimResult<Filter> {
    let mut left = parse_and(ts)?;
    while ts.peek().is_some_and(|t| word_is(t, "or")) {
        ts.advance();
        let right = parse_and(ts)?;
        left = Filter::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(ts: &mut TokenStream) -> ScimResult<Filter> {
    let mut left = parse_not(ts)?;
    while ts.peek().is_some_and(|t| word_is(t, "and")) {
        ts.advance();
        let right = parse_not(ts)?;
        left = Filter::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_not(ts: &mut TokenStream) -> ScimResult<Filter> {
    if ts.peek().is_some_and(|t| word_is(t, "not")) {
        ts.advance();
        ts.expect(&Token::LParen, "'(' after 'not'")?;
        let inner = parse_or(ts)?;
        ts.expect(&Token::RParen, "')'")?;
        return Ok(Filter::Not(Box::new(inner)));
    }
    parse_primary(ts)
}

fn parse_primary(ts: &mut TokenStream) -> ScimResult<Filter> {
    match ts.peek() {
        Some(SpannedToken {
            token: Token::LParen,
            ..
        }) => {
            ts.advance();
            let inner = parse_or(ts)?;
            ts.expect(&Token::RParen, "')'")?;
            Ok(inner)
        }
        Some(SpannedToken {
            token: Token::Word(_),
            ..
        }) => parse_attr_expression(ts),
        _ => Err(ScimError::invalid_filter(
            "expected expression",
            ts.current_column(),
        )),
    }
}

fn parse_attr_expression(ts: &mut TokenStream) -> ScimResult<Filter> {
    let column = ts.current_column();
    let Some(token) = ts.advance() else {
        return Err(ScimError::invalid_filter("expected attribute path", column));
    };
    let Token::Word(word) = &token.token else {
        return Err(ScimError::invalid_filter(
            "expected attribute path",
            token.column,
        ));
    };
    if word.eq_ignore_ascii_case("and")
        || word.eq_ignore_ascii_case("or")
        || word.eq_ignore_ascii_case("not")
    {
        return Err(ScimError::invalid_filter(
            format!("unexpected keyword '{word}'"),
            token.column,
        ));
    }
    let path = parse_attr_path(word, token.column)?;

    match ts.peek() {
        Some(SpannedToken {
            token: Token::LBracket,
            ..
        }) => {
            ts.advance();
            let inner = parse_or(ts)?;
            ts.expect(&Token::RBracket, "']'")?;
            Ok(Filter::ValuePath {
                path,
                filter: Box::new(inner),
            })
        }
        Some(SpannedToken {
            token: Token::Word(op_word),
            column,
        }) => {
            let column = *column;
            if op_word.eq_ignore_ascii_case("pr") {
                ts.advance();
                return Ok(Filter::Present { path });
            }
            let Some(op) = CompareOp::parse(op_word) else {
                return Err(ScimError::invalid_filter(
                    format!("expected comparison operator, got '{op_word}'"),
                    column,
                ));
            };
            ts.advance();
            let value = parse_literal(ts)?;
            Ok(Filter::Compare { path, op, value })
        }
        _ => Err(ScimError::invalid_filter(
            "expected operator after attribute path",
            ts.current_column(),
        )),
    }
}

fn parse_literal(ts: &mut TokenStream) -> ScimResult<Value> {
    let column = ts.current_column();
    let Some(token) = ts.advance() else {
        return Err(ScimError::invalid_filter("expected literal value", column));
    };
    match token.token {
        Token::Str(s) => Ok(Value::String(s)),
        Token::Num(n) => Ok(Value::Number(n)),
        Token::Word(w) if w.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Token::Word(w) if w.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        Token::Word(w) if w.eq_ignore_ascii_case("null") => Ok(Value::Null),
        _ => Err(ScimError::invalid_filter(
            "expected literal value",
            token.column,
        )),
    }
}

/// Split a word token into a validated [`AttrPath`].
fn parse_attr_path(word: &str, column: usize) -> ScimResult<AttrPath> {
    let (urn, rest) = if word.len() > 4 && word[..4].eq_ignore_ascii_case("urn:") {
        match word.rsplit_once(':') {
            Some((urn, rest)) if !urn.is_empty() && !rest.is_empty() => {
                (Some(urn.to_string()), rest)
            }
            _ => {
                return Err(ScimError::invalid_filter(
                    format!("malformed URN-prefixed path '{word}'"),
                    column,
                ));
            }
        }
    } else {
        (None, word)
    };

    let mut segments = rest.split('.');
    let attr = segments.next().unwrap_or_default().to_string();
    validate_name(&attr, column)?;
    let sub_attr = match segments.next() {
        Some(sub) => {
            validate_name(sub, column)?;
            Some(sub.to_string())
        }
        None => None,
    };
    if segments.next().is_some() {
        return Err(ScimError::invalid_filter(
            format!("attribute path '{word}' has too many segments"),
            column,
        ));
    }
    Ok(AttrPath {
        urn,
        attr,
        sub_attr,
    })
}

fn validate_name(name: &str, column: usize) -> ScimResult<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '$');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !valid_head || !valid_tail {
        return Err(ScimError::invalid_filter(
            format!("invalid attribute name '{name}'"),
            column,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_precedence_not_over_and_over_or() {
        let filter = parse_filter(r#"a pr and b pr or c pr"#).unwrap();
        // (a and b) or c
        match filter {
            Filter::Or(left, right) => {
                assert!(matches!(*left, Filter::And(..)));
                assert!(matches!(*right, Filter::Present { .. }));
            }
            other => panic!("expected Or at the root, got {other:?}"),
        }
    }

    #[test]
    fn parses_grouping_over_precedence() {
        let filter = parse_filter(r#"a pr and (b pr or c pr)"#).unwrap();
        match filter {
            Filter::And(_, right) => assert!(matches!(*right, Filter::Or(..))),
            other => panic!("expected And at the root, got {other:?}"),
        }
    }

    #[test]
    fn parses_not_with_required_parens() {
        let filter = parse_filter(r#"not (userName eq "bob")"#).unwrap();
        assert!(matches!(filter, Filter::Not(_)));
        assert!(parse_filter(r#"not userName eq "bob""#).is_err());
    }

    #[test]
    fn parses_value_path() {
        let filter = parse_filter(r#"emails[type eq "work" and primary eq true]"#).unwrap();
        match filter {
            Filter::ValuePath { path, filter } => {
                assert_eq!(path.attr, "emails");
                assert!(matches!(*filter, Filter::And(..)));
            }
            other => panic!("expected ValuePath, got {other:?}"),
        }
    }

    #[test]
    fn operators_are_case_insensitive_values_are_typed() {
        let filter = parse_filter(r#"active EQ true"#).unwrap();
        assert_eq!(
            filter,
            Filter::Compare {
                path: AttrPath::new("active"),
                op: CompareOp::Eq,
                value: json!(true),
            }
        );
    }

    #[test]
    fn parses_urn_prefixed_attribute() {
        let filter = parse_filter(
            r#"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber eq "7""#,
        )
        .unwrap();
        match filter {
            Filter::Compare { path, .. } => {
                assert_eq!(
                    path.urn.as_deref(),
                    Some("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User")
                );
                assert_eq!(path.attr, "employeeNumber");
            }
            other => panic!("expected Compare, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_carry_columns() {
        let err = parse_filter(r#"userName eq"#).unwrap_err();
        assert!(matches!(err, ScimError::InvalidFilter { column: 12, .. }));

        let err = parse_filter(r#"userName zz "bob""#).unwrap_err();
        assert!(matches!(err, ScimError::InvalidFilter { column: 10, .. }));
    }

    #[test]
    fn parses_patch_paths() {
        assert_eq!(
            parse_patch_path("name.givenName").unwrap(),
            PatchPath::Attribute(AttrPath::with_sub("name", "givenName"))
        );
        match parse_patch_path(r#"emails[type eq "work"].value"#).unwrap() {
            PatchPath::Filtered {
                path,
                sub_attr,
                ..
            } => {
                assert_eq!(path.attr, "emails");
                assert_eq!(sub_attr.as_deref(), Some("value"));
            }
            other => panic!("expected Filtered, got {other:?}"),
        }
    }

    #[test]
    fn patch_path_rejects_trailing_garbage() {
        assert!(parse_patch_path(r#"emails[type eq "work"] extra"#).is_err());
        assert!(parse_patch_path("a.b.c").is_err());
    }

    #[test]
    fn whitespace_inside_brackets_is_insignificant() {
        let spaced = parse_filter(r#"emails[  type   eq   "work"  ]"#).unwrap();
        let tight = parse_filter(r#"emails[type eq "work"]"#).unwrap();
        assert_eq!(spaced, tight);
    }

    #[test]
    fn print_parse_round_trip_is_structurally_stable() {
        for input in [
            r#"userName sw "bo" and (emails.type eq "work" or active eq true)"#,
            r#"not (a pr) or b gt 12 and c le -4.5"#,
            r#"emails[type eq "work" and value co "@x"]"#,
            r#"meta.lastModified ge "2024-01-01T00:00:00Z""#,
        ] {
            let first = parse_filter(input).unwrap();
            let second = parse_filter(&first.to_string()).unwrap();
            assert_eq!(first, second, "printing {input:?} changed structure");
        }
    }
}
