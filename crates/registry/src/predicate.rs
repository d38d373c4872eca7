//! Compiled match predicates. The serde-facing rule form keeps its kind
//! as a string; compilation turns known kinds into a dispatch table with
//! pre-parsed paths and pre-built regexes, and keeps unknown kinds as
//! inert rules that contribute a reason but neither score nor fail.

use crate::SchemaError;
use models::{MatchPredicate, MatchRule};
use tree::{Path, Tree};

#[derive(Debug)]
pub struct Predicate {
    pub all: Vec<Rule>,
    pub none: Vec<Rule>,
}

#[derive(Debug)]
pub struct Rule {
    pub path: Path,
    pub kind: RuleKind,
    raw_kind: String,
}

#[derive(Debug)]
pub enum RuleKind {
    Exists,
    Equals(Tree),
    In(Vec<Tree>),
    Regex(regex::Regex),
    Unsupported,
}

/// The outcome of evaluating a predicate against a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub matched: bool,
    /// Number of satisfied `all` rules.
    pub score: u32,
    pub reasons: Vec<String>,
}

impl Predicate {
    pub fn compile(origin: &str, spec: &MatchPredicate) -> Result<Predicate, SchemaError> {
        Ok(Predicate {
            all: spec
                .all
                .iter()
                .map(|rule| Rule::compile(origin, rule))
                .collect::<Result<_, _>>()?,
            none: spec
                .none
                .iter()
                .map(|rule| Rule::compile(origin, rule))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Evaluate against the combined `{meta, data}` document tree.
    ///
    /// `all` rules are scored and short-circuit on first failure; any
    /// `none` hit vetoes the match. Unsupported rule kinds add a reason
    /// without affecting either.
    pub fn eval(&self, doc: &Tree) -> Verdict {
        let mut score = 0;
        let mut reasons = Vec::new();

        for rule in &self.all {
            if matches!(rule.kind, RuleKind::Unsupported) {
                reasons.push(format!("unsupported_type:{}", rule.raw_kind));
                continue;
            }
            if rule.holds(doc) {
                score += 1;
            } else {
                reasons.push(format!("failed_{}:{}", rule.raw_kind, rule.path));
                return Verdict {
                    matched: false,
                    score,
                    reasons,
                };
            }
        }

        for rule in &self.none {
            if matches!(rule.kind, RuleKind::Unsupported) {
                reasons.push(format!("unsupported_type:{}", rule.raw_kind));
                continue;
            }
            if rule.holds(doc) {
                reasons.push(format!("none_failed_{}:{}", rule.raw_kind, rule.path));
                return Verdict {
                    matched: false,
                    score,
                    reasons,
                };
            }
        }

        Verdict {
            matched: true,
            score,
            reasons,
        }
    }
}

impl Rule {
    fn compile(origin: &str, rule: &MatchRule) -> Result<Rule, SchemaError> {
        let path = Path::compile(&rule.path).map_err(|source| SchemaError::Path {
            origin: origin.to_string(),
            path: rule.path.clone(),
            source,
        })?;

        let kind = match rule.kind.as_str() {
            "json_exists" => RuleKind::Exists,
            "json_equals" => {
                RuleKind::Equals(rule.value.clone().map(Tree::from).unwrap_or(Tree::Null))
            }
            "json_in" => RuleKind::In(
                rule.values
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(Tree::from)
                    .collect(),
            ),
            "json_regex" => {
                let pattern =
                    rule.pattern
                        .as_deref()
                        .ok_or_else(|| SchemaError::MissingRuleField {
                            origin: origin.to_string(),
                            kind: rule.kind.clone(),
                            field: "pattern".to_string(),
                        })?;
                let re = regex::Regex::new(pattern).map_err(|source| SchemaError::Regex {
                    origin: origin.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?;
                RuleKind::Regex(re)
            }
            _ => RuleKind::Unsupported,
        };

        Ok(Rule {
            path,
            kind,
            raw_kind: rule.kind.clone(),
        })
    }

    fn holds(&self, doc: &Tree) -> bool {
        let first = self.path.first(doc);
        match &self.kind {
            RuleKind::Exists => first.is_some(),
            RuleKind::Equals(literal) => first.map_or(false, |value| value == literal),
            RuleKind::In(set) => first.map_or(false, |value| set.contains(value)),
            RuleKind::Regex(re) => first
                .and_then(Tree::as_str)
                .map_or(false, |s| re.is_match(s)),
            RuleKind::Unsupported => false,
        }
    }
}
