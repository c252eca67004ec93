//! Filter expressions for enumeration endpoints.
//!
//! The wire form is a flat list mixing the literals `"and"` / `"or"` with
//! `[key, op, value]` tuples. It is parsed into a disjunction of
//! conjunctions before evaluation, which makes the empty-filter and
//! trailing-`or` edge cases explicit: an empty clause matches everything.

use serde_json::Value;
use shared::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    NotContains,
}

impl FilterOp {
    fn parse(op: &str) -> Result<FilterOp, AgentError> {
        Ok(match op {
            "=" => FilterOp::Eq,
            "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            ":" => FilterOp::Contains,
            "!:" => FilterOp::NotContains,
            other => {
                return Err(AgentError::Argument(format!("unknown filter operator `{other}`")));
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Predicate {
    key: String,
    op: FilterOp,
    value: String,
}

/// A parsed filter: any clause matching admits the record.
#[derive(Debug, Clone)]
pub(crate) struct FilterExpr {
    clauses: Vec<Vec<Predicate>>,
}

impl FilterExpr {
    pub(crate) fn parse(raw: &Value) -> Result<FilterExpr, AgentError> {
        let items = raw
            .as_array()
            .ok_or_else(|| AgentError::Argument("filter must be an array".into()))?;

        let mut clauses = Vec::new();
        let mut current: Vec<Predicate> = Vec::new();
        for item in items {
            match item {
                Value::String(s) if s == "and" => {} // no-op separator
                Value::String(s) if s == "or" => {
                    clauses.push(std::mem::take(&mut current));
                }
                Value::Array(tuple) if tuple.len() == 3 => {
                    let key = tuple[0]
                        .as_str()
                        .ok_or_else(|| AgentError::Argument("filter key must be a string".into()))?
                        .to_string();
                    let op = tuple[1]
                        .as_str()
                        .ok_or_else(|| AgentError::Argument("filter op must be a string".into()))?;
                    current.push(Predicate {
                        key,
                        op: FilterOp::parse(op)?,
                        value: stringify(&tuple[2]),
                    });
                }
                other => {
                    return Err(AgentError::Argument(format!(
                        "filter element must be \"and\", \"or\" or a [key, op, value] tuple, got {other}"
                    )));
                }
            }
        }
        clauses.push(current);
        Ok(FilterExpr { clauses })
    }

    pub(crate) fn matches(&self, record: &Value) -> bool {
        self.clauses
            .iter()
            .any(|clause| clause.iter().all(|p| p.eval(record)))
    }
}

impl Predicate {
    fn eval(&self, record: &Value) -> bool {
        let field = stringify(record.get(&self.key).unwrap_or(&Value::Null));
        match self.op {
            FilterOp::Eq => loose_eq(&field, &self.value),
            FilterOp::Ne => !loose_eq(&field, &self.value),
            FilterOp::Lt => ordering(&field, &self.value).is_lt(),
            FilterOp::Le => ordering(&field, &self.value).is_le(),
            FilterOp::Gt => ordering(&field, &self.value).is_gt(),
            FilterOp::Ge => ordering(&field, &self.value).is_ge(),
            FilterOp::Contains => contains_ci(&field, &self.value),
            FilterOp::NotContains => !contains_ci(&field, &self.value),
        }
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn loose_eq(a: &str, b: &str) -> bool {
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x == y;
    }
    a == b
}

/// Numeric when both sides parse as numbers, lexicographic otherwise.
fn ordering(a: &str, b: &str) -> std::cmp::Ordering {
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
    }
    a.cmp(b)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Apply an optional wire-form filter to a record list. A malformed filter
/// narrows to nothing rather than erroring, matching the policy that
/// enumerations never fail hard.
pub(crate) fn apply(records: Vec<Value>, filter: Option<&Value>) -> Vec<Value> {
    let Some(raw) = filter else {
        return records;
    };
    match FilterExpr::parse(raw) {
        Ok(expr) => records.into_iter().filter(|r| expr.matches(r)).collect(),
        Err(e) => {
            log::warn!("dropping malformed filter: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(records: &[Value]) -> Vec<&str> {
        records.iter().filter_map(|r| r["name"].as_str()).collect()
    }

    fn sample() -> Vec<Value> {
        vec![
            json!({"name": "libfoo", "size": 100}),
            json!({"name": "libbar", "size": 200}),
            json!({"name": "libbaz", "size": 300}),
        ]
    }

    #[test]
    fn substring_containment_is_case_insensitive() {
        let out = apply(sample(), Some(&json!([["name", ":", "FOO"]])));
        assert_eq!(names(&out), vec!["libfoo"]);
    }

    #[test]
    fn tuples_narrow_conjunctively() {
        let out = apply(
            sample(),
            Some(&json!([["name", ":", "lib"], ["size", ">", 150]])),
        );
        assert_eq!(names(&out), vec!["libbar", "libbaz"]);
    }

    #[test]
    fn or_flushes_the_working_set() {
        let out = apply(
            sample(),
            Some(&json!([["name", "=", "libfoo"], "or", ["name", "=", "libbaz"]])),
        );
        assert_eq!(names(&out), vec!["libfoo", "libbaz"]);
    }

    #[test]
    fn trailing_or_admits_everything() {
        let out = apply(sample(), Some(&json!([["name", "=", "libfoo"], "or"])));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn empty_filter_admits_everything() {
        let out = apply(sample(), Some(&json!([])));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn numeric_comparison_beats_lexicographic_when_both_parse() {
        // Lexicographically "90" > "200"; numerically it is not.
        let out = apply(
            vec![json!({"name": "a", "size": 90}), json!({"name": "b", "size": 200})],
            Some(&json!([["size", ">", "100"]])),
        );
        assert_eq!(names(&out), vec!["b"]);
    }

    #[test]
    fn and_is_a_no_op_separator() {
        let out = apply(
            sample(),
            Some(&json!([["name", ":", "lib"], "and", ["name", "!:", "baz"]])),
        );
        assert_eq!(names(&out), vec!["libfoo", "libbar"]);
    }

    #[test]
    fn missing_keys_stringify_as_null() {
        let out = apply(sample(), Some(&json!([["missing", "=", "null"]])));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn malformed_filter_yields_empty() {
        let out = apply(sample(), Some(&json!([["name", "~", "x"]])));
        assert!(out.is_empty());
        let out = apply(sample(), Some(&json!("name")));
        assert!(out.is_empty());
    }
}
