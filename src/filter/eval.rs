//! Filter evaluation against resource documents.
//!
//! Multi-valued targets use existential semantics: a comparison is true when
//! any element satisfies it. Undefined attributes evaluate to false for
//! every operator except `pr` (false) and `ne` (true). When constructed with
//! schema context, string comparison honors each attribute's `caseExact`;
//! without it, comparison is case-insensitive, matching the RFC 7643
//! default.

use crate::filter::ast::{AttrPath, CompareOp, Filter};
use crate::schema::registry::{ResourceType, SchemaRegistry};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Evaluates parsed filters against JSON resource documents.
#[derive(Clone, Copy, Default)]
pub struct FilterEvaluator<'a> {
    schema: Option<(&'a SchemaRegistry, &'a ResourceType)>,
}

impl<'a> FilterEvaluator<'a> {
    /// A schema-less evaluator; all string comparison is case-insensitive.
    pub fn new() -> Self {
        Self { schema: None }
    }

    /// An evaluator that resolves `caseExact` from the resource type's
    /// schemas.
    pub fn with_schema(registry: &'a SchemaRegistry, resource_type: &'a ResourceType) -> Self {
        Self {
            schema: Some((registry, resource_type)),
        }
    }

    /// Whether `resource` satisfies `filter`.
    pub fn matches(&self, filter: &Filter, resource: &Value) -> bool {
        self.eval(filter, resource, None)
    }

    fn eval(&self, filter: &Filter, resource: &Value, parent: Option<&str>) -> bool {
        match filter {
            Filter::Compare { path, op, value } => {
                let candidates = resolve_path(path, resource);
                let case_exact = self.case_exact(path, parent);
                if *op == CompareOp::Ne {
                    return !candidates
                        .iter()
                        .any(|c| compare(c, CompareOp::Eq, value, case_exact));
                }
                candidates
                    .iter()
                    .any(|c| compare(c, *op, value, case_exact))
            }
            Filter::Present { path } => resolve_path(path, resource)
                .iter()
                .any(|v| is_present(v)),
            Filter::Not(inner) => !self.eval(inner, resource, parent),
            Filter::And(left, right) => {
                self.eval(left, resource, parent) && self.eval(right, resource, parent)
            }
            Filter::Or(left, right) => {
                self.eval(left, resource, parent) || self.eval(right, resource, parent)
            }
            Filter::ValuePath { path, filter } => {
                let dotted = path.dotted();
                resolve_path(path, resource)
                    .iter()
                    .filter(|v| v.is_object())
                    .any(|element| self.eval(filter, element, Some(&dotted)))
            }
        }
    }

    fn case_exact(&self, path: &AttrPath, parent: Option<&str>) -> bool {
        let Some((registry, resource_type)) = self.schema else {
            return false;
        };
        let dotted = match parent {
            Some(parent) => format!("{parent}.{}", path.attr),
            None => path.dotted(),
        };
        match registry.resolve_attribute(resource_type, &dotted) {
            Ok(Some((schema, idx))) => schema.attr(idx).case_exact,
            _ => false,
        }
    }
}

/// Case-insensitive object key lookup; exact match wins.
pub(crate) fn get_ci<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Resolve an attribute path to its candidate values, flattening arrays.
fn resolve_path<'v>(path: &AttrPath, resource: &'v Value) -> Vec<&'v Value> {
    let Some(root) = resource.as_object() else {
        return Vec::new();
    };
    let container = match &path.urn {
        Some(urn) => match get_ci(root, urn) {
            Some(Value::Object(ext)) => ext,
            // The URN names the main schema rather than an extension key
            _ => root,
        },
        None => root,
    };
    let Some(value) = get_ci(container, &path.attr) else {
        return Vec::new();
    };
    let values: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    match &path.sub_attr {
        None => values.into_iter().filter(|v| !v.is_null()).collect(),
        Some(sub) => values
            .into_iter()
            .filter_map(|v| v.as_object().and_then(|obj| get_ci(obj, sub)))
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                single => vec![single],
            })
            .filter(|v| !v.is_null())
            .collect(),
    }
}

/// The first candidate value an attribute path resolves to, used by the
/// dispatcher's sort fallback.
pub(crate) fn first_value<'v>(path: &AttrPath, resource: &'v Value) -> Option<&'v Value> {
    resolve_path(path, resource).into_iter().next()
}

/// RFC presence: a value exists and is not null or empty.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn compare(candidate: &Value, op: CompareOp, literal: &Value, case_exact: bool) -> bool {
    match (candidate, literal) {
        (Value::String(a), Value::String(b)) => compare_strings(a, op, b, case_exact),
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return false;
            };
            match op {
                CompareOp::Eq => a == b,
                CompareOp::Gt => a > b,
                CompareOp::Ge => a >= b,
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                _ => false,
            }
        }
        (Value::Bool(a), Value::Bool(b)) => op == CompareOp::Eq && a == b,
        (Value::Null, Value::Null) => op == CompareOp::Eq,
        _ => false,
    }
}

fn compare_strings(candidate: &str, op: CompareOp, literal: &str, case_exact: bool) -> bool {
    let (a, b) = if case_exact {
        (candidate.to_string(), literal.to_string())
    } else {
        (candidate.to_lowercase(), literal.to_lowercase())
    };
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Co => a.contains(&b),
        CompareOp::Sw => a.starts_with(&b),
        CompareOp::Ew => a.ends_with(&b),
        // RFC 3339 dateTimes compare correctly as strings, which is the
        // primary ordering use case for string operands
        CompareOp::Gt => a.cmp(&b) == Ordering::Greater,
        CompareOp::Ge => a.cmp(&b) != Ordering::Less,
        CompareOp::Lt => a.cmp(&b) == Ordering::Less,
        CompareOp::Le => a.cmp(&b) != Ordering::Greater,
        CompareOp::Ne => a != b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parser::parse_filter;
    use serde_json::json;

    fn matches(filter: &str, resource: &Value) -> bool {
        FilterEvaluator::new().matches(&parse_filter(filter).unwrap(), resource)
    }

    fn bob() -> Value {
        json!({
            "userName": "bob",
            "active": true,
            "loginCount": 12,
            "emails": [
                {"value": "bob@work.example", "type": "work", "primary": true},
                {"value": "bob@home.example", "type": "home"}
            ],
            "meta": {"lastModified": "2024-06-01T10:00:00Z"}
        })
    }

    #[test]
    fn combined_filter_matches_the_right_users() {
        let filter = r#"userName sw "bo" and (emails.type eq "work" or active eq true)"#;
        assert!(matches(filter, &bob()));
        assert!(!matches(
            filter,
            &json!({"userName": "alice", "active": true})
        ));
    }

    #[test]
    fn equality_defaults_to_case_insensitive() {
        assert!(matches(r#"userName eq "BOB""#, &bob()));
    }

    #[test]
    fn undefined_attributes_are_false_except_ne() {
        let resource = json!({"userName": "bob"});
        assert!(!matches(r#"nickName eq "x""#, &resource));
        assert!(!matches(r#"nickName pr"#, &resource));
        assert!(!matches(r#"nickName co "x""#, &resource));
        assert!(matches(r#"nickName ne "x""#, &resource));
    }

    #[test]
    fn multi_valued_comparison_is_existential() {
        assert!(matches(r#"emails.type eq "home""#, &bob()));
        assert!(!matches(r#"emails.type eq "fax""#, &bob()));
    }

    #[test]
    fn value_path_scopes_conditions_to_one_element() {
        // bob's work email is primary, the home one is not
        assert!(matches(
            r#"emails[type eq "work" and primary eq true]"#,
            &bob()
        ));
        assert!(!matches(
            r#"emails[type eq "home" and primary eq true]"#,
            &bob()
        ));
    }

    #[test]
    fn ordering_works_on_numbers_and_datetimes() {
        assert!(matches("loginCount gt 10", &bob()));
        assert!(!matches("loginCount lt 10", &bob()));
        assert!(matches(
            r#"meta.lastModified ge "2024-01-01T00:00:00Z""#,
            &bob()
        ));
        assert!(!matches(
            r#"meta.lastModified gt "2025-01-01T00:00:00Z""#,
            &bob()
        ));
    }

    #[test]
    fn presence_ignores_empty_values() {
        let resource = json!({"emails": [], "title": ""});
        assert!(!matches("emails pr", &resource));
        assert!(!matches("title pr", &resource));
        assert!(matches("emails pr", &bob()));
    }

    #[test]
    fn not_inverts() {
        assert!(matches(r#"not (userName eq "alice")"#, &bob()));
        assert!(!matches(r#"not (userName eq "bob")"#, &bob()));
    }

    #[test]
    fn type_mismatch_never_matches() {
        assert!(!matches(r#"active eq "true""#, &bob()));
        assert!(!matches("userName gt 4", &bob()));
    }
}
