//! Result values and the XPath 1.0 conversions between them.

use crate::collector::Hit;
use crate::computed::ResultKind;
use crate::error::SniffError;

/// A value read from the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    NodeSet(Vec<Hit>),
    String(String),
    Number(f64),
    Boolean(bool),
    StringList(Vec<String>),
}

impl ResultValue {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultValue::NodeSet(_) => ResultKind::NodeSet,
            ResultValue::String(_) => ResultKind::String,
            ResultValue::Number(_) => ResultKind::Number,
            ResultValue::Boolean(_) => ResultKind::Boolean,
            ResultValue::StringList(_) => ResultKind::StringList,
        }
    }

    /// Value of a result nothing ever contributed to.
    pub fn neutral(kind: ResultKind) -> Self {
        match kind {
            ResultKind::NodeSet => ResultValue::NodeSet(Vec::new()),
            ResultKind::String => ResultValue::String(String::new()),
            ResultKind::Number => ResultValue::Number(f64::NAN),
            ResultKind::Boolean => ResultValue::Boolean(false),
            ResultKind::StringList => ResultValue::StringList(Vec::new()),
        }
    }

    /// Converts following XPath `string()`, `number()` and `boolean()`.
    /// Node-sets convert through their first item, except to a string list
    /// which keeps every item. Scalars become one-item string lists.
    pub fn coerce(self, to: ResultKind) -> Result<ResultValue, SniffError> {
        let from = self.kind();
        if from == to {
            return Ok(self);
        }
        let value = match (self, to) {
            (ResultValue::NodeSet(hits), ResultKind::String) => {
                ResultValue::String(hits.into_iter().next().map(|hit| hit.value).unwrap_or_default())
            }
            (ResultValue::NodeSet(hits), ResultKind::Number) => {
                ResultValue::Number(hits.first().map_or(f64::NAN, |hit| string_to_number(&hit.value)))
            }
            (ResultValue::NodeSet(hits), ResultKind::Boolean) => ResultValue::Boolean(!hits.is_empty()),
            (ResultValue::NodeSet(hits), ResultKind::StringList) => {
                ResultValue::StringList(hits.into_iter().map(|hit| hit.value).collect())
            }
            (ResultValue::String(s), ResultKind::Number) => ResultValue::Number(string_to_number(&s)),
            (ResultValue::String(s), ResultKind::Boolean) => ResultValue::Boolean(!s.is_empty()),
            (ResultValue::String(s), ResultKind::StringList) => ResultValue::StringList(vec![s]),
            (ResultValue::Number(n), ResultKind::String) => ResultValue::String(number_to_string(n)),
            (ResultValue::Number(n), ResultKind::Boolean) => ResultValue::Boolean(n != 0.0 && !n.is_nan()),
            (ResultValue::Number(n), ResultKind::StringList) => ResultValue::StringList(vec![number_to_string(n)]),
            (ResultValue::Boolean(b), ResultKind::String) => ResultValue::String(b.to_string()),
            (ResultValue::Boolean(b), ResultKind::Number) => ResultValue::Number(if b { 1.0 } else { 0.0 }),
            (ResultValue::Boolean(b), ResultKind::StringList) => ResultValue::StringList(vec![b.to_string()]),
            _ => return Err(SniffError::coercion(from, to)),
        };
        Ok(value)
    }

    /// Converts with XPath `string()` rules.
    pub fn into_string(self) -> Result<String, SniffError> {
        match self.coerce(ResultKind::String)? {
            ResultValue::String(s) => Ok(s),
            other => Err(SniffError::coercion(other.kind(), ResultKind::String)),
        }
    }

    /// Converts with XPath `number()` rules.
    pub fn into_number(self) -> Result<f64, SniffError> {
        match self.coerce(ResultKind::Number)? {
            ResultValue::Number(n) => Ok(n),
            other => Err(SniffError::coercion(other.kind(), ResultKind::Number)),
        }
    }

    /// Converts with XPath `boolean()` rules.
    pub fn into_boolean(self) -> Result<bool, SniffError> {
        match self.coerce(ResultKind::Boolean)? {
            ResultValue::Boolean(b) => Ok(b),
            other => Err(SniffError::coercion(other.kind(), ResultKind::Boolean)),
        }
    }

    /// String values of a node-set; a scalar becomes a one-element list.
    pub fn into_strings(self) -> Result<Vec<String>, SniffError> {
        match self.coerce(ResultKind::StringList)? {
            ResultValue::StringList(values) => Ok(values),
            other => Err(SniffError::coercion(other.kind(), ResultKind::StringList)),
        }
    }

    /// Fails for scalars: no conversion produces nodes.
    pub fn into_node_set(self) -> Result<Vec<Hit>, SniffError> {
        match self {
            ResultValue::NodeSet(hits) => Ok(hits),
            other => Err(SniffError::coercion(other.kind(), ResultKind::NodeSet)),
        }
    }
}

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// XPath 1.0 `number(string)`: optional minus, digits with an optional
/// fraction, surrounded by whitespace. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(is_xml_whitespace);
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut parts = unsigned.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    let valid = match frac_part {
        Some(frac) => digits(int_part) && digits(frac) && !(int_part.is_empty() && frac.is_empty()),
        None => !int_part.is_empty() && digits(int_part),
    };
    if !valid {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// XPath 1.0 `string(number)`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xpath_numbers() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("-1.5"), -1.5);
        assert_eq!(string_to_number(".5"), 0.5);
        assert_eq!(string_to_number("5."), 5.0);
        assert!(string_to_number("").is_nan());
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("+1").is_nan());
        assert!(string_to_number(".").is_nan());
        assert!(string_to_number("-").is_nan());
    }

    #[test]
    fn renders_xpath_numbers() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.25), "0.25");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn node_set_converts_through_first_item() {
        let hits = vec![Hit::new(2, "/r[1]/a[1]", "42"), Hit::new(5, "/r[1]/a[2]", "7")];
        assert_eq!(ResultValue::NodeSet(hits.clone()).into_number(), Ok(42.0));
        assert_eq!(ResultValue::NodeSet(hits.clone()).into_boolean(), Ok(true));
        assert_eq!(ResultValue::NodeSet(hits).into_strings(), Ok(vec!["42".to_string(), "7".to_string()]));
    }

    #[test]
    fn empty_node_set_is_neutral() {
        let empty = || ResultValue::NodeSet(Vec::new());
        assert_eq!(empty().into_boolean(), Ok(false));
        assert_eq!(empty().into_string(), Ok(String::new()));
        assert!(empty().into_number().unwrap().is_nan());
    }

    #[test]
    fn scalars_do_not_become_node_sets() {
        assert_eq!(
            ResultValue::String("x".into()).into_node_set(),
            Err(SniffError::coercion(ResultKind::String, ResultKind::NodeSet))
        );
        assert_eq!(
            ResultValue::StringList(vec![]).coerce(ResultKind::Number),
            Err(SniffError::coercion(ResultKind::StringList, ResultKind::Number))
        );
    }
}
