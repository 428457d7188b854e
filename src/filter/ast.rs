//! AST nodes for filter expressions and PATCH attribute paths.
//!
//! The `Display` implementations render an expression back into filter
//! syntax; printing and re-parsing yields a structurally equal AST, which
//! the property tests rely on.

use serde_json::Value;
use std::fmt;

/// An attribute path: optional schema URN prefix, attribute name, optional
/// sub-attribute (`urn:...:User:name.givenName`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrPath {
    /// Schema URN qualifier, when the path was URN-prefixed
    pub urn: Option<String>,
    /// Top-level attribute name, case preserved
    pub attr: String,
    /// Sub-attribute name, case preserved
    pub sub_attr: Option<String>,
}

impl AttrPath {
    /// A bare attribute path.
    pub fn new(attr: impl Into<String>) -> Self {
        Self {
            urn: None,
            attr: attr.into(),
            sub_attr: None,
        }
    }

    /// An `attr.sub` path.
    pub fn with_sub(attr: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            urn: None,
            attr: attr.into(),
            sub_attr: Some(sub.into()),
        }
    }

    /// The dotted form without the URN qualifier.
    pub fn dotted(&self) -> String {
        match &self.sub_attr {
            Some(sub) => format!("{}.{}", self.attr, sub),
            None => self.attr.clone(),
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(urn) = &self.urn {
            write!(f, "{urn}:")?;
        }
        f.write_str(&self.attr)?;
        if let Some(sub) = &self.sub_attr {
            write!(f, ".{sub}")?;
        }
        Ok(())
    }
}

/// Comparison operators of the filter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// equal
    Eq,
    /// not equal
    Ne,
    /// contains
    Co,
    /// starts with
    Sw,
    /// ends with
    Ew,
    /// greater than
    Gt,
    /// greater than or equal
    Ge,
    /// less than
    Lt,
    /// less than or equal
    Le,
}

impl CompareOp {
    /// Parse an operator keyword, case-insensitively. `pr` is handled
    /// separately since it takes no operand.
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "co" => Some(Self::Co),
            "sw" => Some(Self::Sw),
            "ew" => Some(Self::Ew),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    /// The lower-case keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Co => "co",
            Self::Sw => "sw",
            Self::Ew => "ew",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `path op literal`
    Compare {
        /// The attribute being compared
        path: AttrPath,
        /// The comparison operator
        op: CompareOp,
        /// The literal operand
        value: Value,
    },
    /// `path pr`: the attribute has a value
    Present {
        /// The attribute being tested
        path: AttrPath,
    },
    /// `not (expr)`
    Not(Box<Filter>),
    /// `left and right`
    And(Box<Filter>, Box<Filter>),
    /// `left or right`
    Or(Box<Filter>, Box<Filter>),
    /// `path[expr]`: matches when any element satisfies the inner filter
    ValuePath {
        /// The multi-valued attribute being selected into
        path: AttrPath,
        /// Filter applied to each element
        filter: Box<Filter>,
    },
}

impl Filter {
    // Precedence levels for printing: or < and < unary
    fn precedence(&self) -> u8 {
        match self {
            Filter::Or(..) => 0,
            Filter::And(..) => 1,
            _ => 2,
        }
    }

    fn fmt_child(&self, child: &Filter, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < self.precedence() {
            write!(f, "({child})")
        } else {
            write!(f, "{child}")
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Compare { path, op, value } => {
                let literal =
                    serde_json::to_string(value).map_err(|_| fmt::Error)?;
                write!(f, "{path} {op} {literal}")
            }
            Filter::Present { path } => write!(f, "{path} pr"),
            Filter::Not(inner) => write!(f, "not ({inner})"),
            Filter::And(left, right) => {
                self.fmt_child(left, f)?;
                f.write_str(" and ")?;
                self.fmt_child(right, f)
            }
            Filter::Or(left, right) => {
                self.fmt_child(left, f)?;
                f.write_str(" or ")?;
                self.fmt_child(right, f)
            }
            Filter::ValuePath { path, filter } => write!(f, "{path}[{filter}]"),
        }
    }
}

/// A parsed PATCH `path` value.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchPath {
    /// `attr`, `attr.sub`, or a URN-prefixed form
    Attribute(AttrPath),
    /// `attr[filter]` or `attr[filter].sub`
    Filtered {
        /// The multi-valued attribute being selected into
        path: AttrPath,
        /// The value-selection filter
        filter: Filter,
        /// Sub-attribute applied to each selected element
        sub_attr: Option<String>,
    },
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchPath::Attribute(path) => write!(f, "{path}"),
            PatchPath::Filtered {
                path,
                filter,
                sub_attr,
            } => {
                write!(f, "{path}[{filter}]")?;
                if let Some(sub) = sub_attr {
                    write!(f, ".{sub}")?;
                }
                Ok(())
            }
        }
    }
}
