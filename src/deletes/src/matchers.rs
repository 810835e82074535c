//! Label matchers parsed from PromQL metric selectors.
//!
//! Selectors are parsed with the promql-parser crate and converted into
//! [`LabelMatcher`]s that own their compiled, fully anchored regex.

use std::collections::BTreeMap;
use std::fmt;

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::{self, Expr};
use regex::Regex;

use crate::error::{DeletesError, Result};

/// Label holding the metric name
pub const METRIC_NAME: &str = "__name__";

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl fmt::Display for MatcherOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatcherOp,
    pub value: String,
    regex: Option<Regex>,
}

/// Conjunction of matchers derived from one selector
pub type MatcherGroup = Vec<LabelMatcher>;

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl LabelMatcher {
    pub fn new(op: MatcherOp, name: &str, value: &str) -> Result<Self> {
        let regex = match op {
            MatcherOp::RegexMatch | MatcherOp::RegexNotMatch => Some(
                Regex::new(&format!("^(?s:{value})$")).map_err(|e| DeletesError::Selector {
                    selector: format!("{name}{op}{value:?}"),
                    reason: e.to_string(),
                })?,
            ),
            MatcherOp::Equal | MatcherOp::NotEqual => None,
        };

        Ok(Self {
            name: name.to_string(),
            op,
            value: value.to_string(),
            regex,
        })
    }

    pub fn equal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::Equal,
            value: value.to_string(),
            regex: None,
        }
    }

    /// Test a label value. Absent labels are passed as the empty string.
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatcherOp::Equal, _) => self.value == value,
            (MatcherOp::NotEqual, _) => self.value != value,
            (MatcherOp::RegexMatch, Some(re)) => re.is_match(value),
            (MatcherOp::RegexNotMatch, Some(re)) => !re.is_match(value),
            // regex ops are always built with a compiled regex
            (MatcherOp::RegexMatch | MatcherOp::RegexNotMatch, None) => false,
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Label set identifying one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// True when every matcher of the group accepts `labels`.
pub fn matches_labels(matchers: &[LabelMatcher], labels: &Labels) -> bool {
    matchers
        .iter()
        .all(|m| m.matches(labels.get(&m.name).unwrap_or("")))
}

/// Parse a metric selector such as `up{job="api", instance=~"10\\..*"}` into
/// its matcher group.
pub fn parse_metric_selector(selector: &str) -> Result<MatcherGroup> {
    let expr = parser::parse(selector).map_err(|e| DeletesError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;

    let vs = match expr {
        Expr::VectorSelector(vs) => vs,
        _ => {
            return Err(DeletesError::Selector {
                selector: selector.to_string(),
                reason: "not a metric selector".to_string(),
            });
        }
    };

    if !vs.matchers.or_matchers.is_empty() {
        return Err(DeletesError::Selector {
            selector: selector.to_string(),
            reason: "`or` is not supported in metric selectors".to_string(),
        });
    }

    let mut group = vs
        .matchers
        .matchers
        .iter()
        .map(convert_matcher)
        .collect::<Result<MatcherGroup>>()?;

    if let Some(name) = vs.name.as_deref() {
        if !group.iter().any(|m| m.name == METRIC_NAME) {
            group.push(LabelMatcher::equal(METRIC_NAME, name));
        }
    }

    if group.is_empty() {
        return Err(DeletesError::Selector {
            selector: selector.to_string(),
            reason: "selector has no label matchers".to_string(),
        });
    }

    Ok(group)
}

fn convert_matcher(matcher: &Matcher) -> Result<LabelMatcher> {
    let op = match &matcher.op {
        MatchOp::Equal => MatcherOp::Equal,
        MatchOp::NotEqual => MatcherOp::NotEqual,
        MatchOp::Re(_) => MatcherOp::RegexMatch,
        MatchOp::NotRe(_) => MatcherOp::RegexNotMatch,
    };

    LabelMatcher::new(op, &matcher.name, &matcher.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_parse_metric_name_and_labels() {
        let group = parse_metric_selector(r#"http_requests_total{job="api"}"#).unwrap();

        assert!(group.contains(&LabelMatcher::equal("job", "api")));
        assert!(group.contains(&LabelMatcher::equal(METRIC_NAME, "http_requests_total")));
        assert_eq!(
            group.iter().filter(|m| m.name == METRIC_NAME).count(),
            1,
            "metric name must not be duplicated"
        );
    }

    #[test]
    fn test_parse_rejects_non_selectors() {
        assert!(parse_metric_selector("rate(up[5m])").is_err());
        assert!(parse_metric_selector("1 + 1").is_err());
        assert!(parse_metric_selector("up{job=").is_err());
    }

    #[test]
    fn test_parse_rejects_or_matchers() {
        let err = parse_metric_selector(r#"{job="x" or job="y"}"#).unwrap_err();
        assert!(matches!(err, DeletesError::Selector { .. }));
        assert!(parse_metric_selector(r#"up{job="x" or env="prod"}"#).is_err());
    }

    #[test]
    fn test_all_operators() {
        let group = parse_metric_selector(r#"{a="1", b!="2", c=~"x.*", d!~"y|z"}"#).unwrap();
        let ops: Vec<MatcherOp> = group.iter().map(|m| m.op).collect();
        assert_eq!(
            ops,
            vec![
                MatcherOp::Equal,
                MatcherOp::NotEqual,
                MatcherOp::RegexMatch,
                MatcherOp::RegexNotMatch
            ]
        );

        let series = labels(&[("a", "1"), ("b", "3"), ("c", "xylophone"), ("d", "w")]);
        assert!(matches_labels(&group, &series));

        let series = labels(&[("a", "1"), ("b", "3"), ("c", "xylophone"), ("d", "y")]);
        assert!(!matches_labels(&group, &series));
    }

    #[test]
    fn test_regex_is_anchored() {
        let group = parse_metric_selector(r#"{job=~"api"}"#).unwrap();
        assert!(matches_labels(&group, &labels(&[("job", "api")])));
        assert!(!matches_labels(&group, &labels(&[("job", "api-gateway")])));
        assert!(!matches_labels(&group, &labels(&[("job", "my-api")])));
    }

    #[test]
    fn test_missing_label_is_empty_string() {
        let group = parse_metric_selector(r#"{job="x", env=""}"#).unwrap();
        assert!(matches_labels(&group, &labels(&[("job", "x")])));
        assert!(!matches_labels(&group, &labels(&[("job", "x"), ("env", "prod")])));

        let group = parse_metric_selector(r#"{job="x", env!="prod"}"#).unwrap();
        assert!(matches_labels(&group, &labels(&[("job", "x")])));
    }

    #[test]
    fn test_matcher_display() {
        assert_eq!(format!("{}", MatcherOp::RegexNotMatch), "!~");
        let m = LabelMatcher::new(MatcherOp::RegexMatch, "job", "a.*").unwrap();
        assert_eq!(m.to_string(), r#"job=~"a.*""#);
    }
}
