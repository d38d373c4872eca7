//! Compiled value transforms. Transforms are total functions: they never
//! fail, and incompatible input types yield null.

use crate::SchemaError;
use models::TransformSpec;
use std::collections::BTreeMap;
use tree::Tree;

#[derive(Debug)]
pub enum Transform {
    Constant(Tree),
    Trim,
    CollapseSpaces,
    Upper,
    Lower,
    ToInt,
    Split {
        delimiter: String,
        index: usize,
    },
    Regex {
        re: regex::Regex,
        group: usize,
    },
    Map {
        mapping: BTreeMap<String, Tree>,
        default: Option<Tree>,
    },
    Clean,
}

impl Transform {
    pub fn compile(origin: &str, spec: &TransformSpec) -> Result<Transform, SchemaError> {
        Ok(match spec {
            TransformSpec::Constant { value } => Transform::Constant(Tree::from(value.clone())),
            TransformSpec::Trim => Transform::Trim,
            TransformSpec::CollapseSpaces => Transform::CollapseSpaces,
            TransformSpec::Upper => Transform::Upper,
            TransformSpec::Lower => Transform::Lower,
            TransformSpec::ToInt => Transform::ToInt,
            TransformSpec::Split { delimiter, index } => Transform::Split {
                delimiter: delimiter.clone(),
                index: *index,
            },
            TransformSpec::Regex { pattern, group } => {
                let re = regex::Regex::new(pattern).map_err(|source| SchemaError::Regex {
                    origin: origin.to_string(),
                    pattern: pattern.clone(),
                    source,
                })?;
                Transform::Regex { re, group: *group }
            }
            TransformSpec::Map { mapping, default } => Transform::Map {
                mapping: mapping
                    .iter()
                    .map(|(k, v)| (k.clone(), Tree::from(v.clone())))
                    .collect(),
                default: default.clone().map(Tree::from),
            },
            TransformSpec::Clean => Transform::Clean,
        })
    }

    pub fn apply(&self, value: &Tree) -> Tree {
        // `constant` is the one transform that disregards its input.
        if let Transform::Constant(constant) = self {
            return constant.clone();
        }
        if value.is_null() {
            return Tree::Null;
        }

        match self {
            Transform::Constant(_) => unreachable!("handled above"),
            Transform::Trim => map_string(value, |s| s.trim().to_string()),
            Transform::CollapseSpaces => map_string(value, collapse_spaces),
            Transform::Upper => map_string(value, |s| s.to_uppercase()),
            Transform::Lower => map_string(value, |s| s.to_lowercase()),
            Transform::ToInt => match value {
                Tree::Integer(i) => Tree::Integer(*i),
                Tree::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Tree::Integer)
                    .unwrap_or(Tree::Null),
                _ => Tree::Null,
            },
            Transform::Split { delimiter, index } => match value.as_str() {
                Some(s) => s
                    .split(delimiter.as_str())
                    .nth(*index)
                    .map(|part| Tree::String(part.trim().to_string()))
                    .unwrap_or(Tree::Null),
                None => Tree::Null,
            },
            Transform::Regex { re, group } => match value.as_str() {
                Some(s) => re
                    .captures(s)
                    .and_then(|caps| caps.get(*group))
                    .map(|m| Tree::String(m.as_str().to_string()))
                    .unwrap_or(Tree::Null),
                None => Tree::Null,
            },
            Transform::Map { mapping, default } => {
                let Some(key) = value.scalar_to_string() else {
                    return Tree::Null;
                };
                match (mapping.get(&key), default) {
                    (Some(mapped), _) => mapped.clone(),
                    (None, Some(default)) => default.clone(),
                    // No default: a miss passes the input through.
                    (None, None) => value.clone(),
                }
            }
            Transform::Clean => map_string(value, |s| collapse_spaces(s.trim())),
        }
    }
}

fn map_string(value: &Tree, f: impl Fn(&str) -> String) -> Tree {
    match value.as_str() {
        Some(s) => Tree::String(f(s)),
        None => Tree::Null,
    }
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn compile(spec: serde_json::Value) -> Transform {
        let spec: TransformSpec = serde_json::from_value(spec).unwrap();
        Transform::compile("test", &spec).unwrap()
    }

    #[test]
    fn test_string_transforms() {
        let clean = compile(json!({"kind": "clean"}));
        assert_eq!(
            clean.apply(&Tree::from("  Іванов   Іван \n")),
            Tree::from("Іванов Іван"),
        );

        let upper = compile(json!({"kind": "upper"}));
        assert_eq!(upper.apply(&Tree::from("abc12i")), Tree::from("ABC12I"));
        // Incompatible input yields null, never an error.
        assert_eq!(upper.apply(&Tree::Integer(5)), Tree::Null);
    }

    #[test]
    fn test_to_int() {
        let to_int = compile(json!({"kind": "to_int"}));
        assert_eq!(to_int.apply(&Tree::from(" 42 ")), Tree::Integer(42));
        assert_eq!(to_int.apply(&Tree::Integer(7)), Tree::Integer(7));
        assert_eq!(to_int.apply(&Tree::from("4x2")), Tree::Null);
        assert_eq!(to_int.apply(&Tree::Float(1.5)), Tree::Null);
    }

    #[test]
    fn test_split() {
        let split = compile(json!({"kind": "split", "delimiter": ",", "index": 1}));
        assert_eq!(split.apply(&Tree::from("a, b ,c")), Tree::from("b"));
        let split = compile(json!({"kind": "split", "delimiter": ",", "index": 9}));
        assert_eq!(split.apply(&Tree::from("a,b")), Tree::Null);
    }

    #[test]
    fn test_regex_capture() {
        let re = compile(json!({"kind": "regex", "pattern": "case (\\d+)/(\\d+)", "group": 2}));
        assert_eq!(re.apply(&Tree::from("case 761/2020")), Tree::from("2020"));
        assert_eq!(re.apply(&Tree::from("no match")), Tree::Null);
    }

    #[test]
    fn test_map_lookup() {
        let with_default = compile(json!({
            "kind": "map",
            "mapping": {"1": "active", "2": "closed"},
            "default": "unknown",
        }));
        assert_eq!(with_default.apply(&Tree::from("2")), Tree::from("closed"));
        assert_eq!(with_default.apply(&Tree::Integer(1)), Tree::from("active"));
        assert_eq!(with_default.apply(&Tree::from("9")), Tree::from("unknown"));

        // Without a default a miss passes the input through.
        let without = compile(json!({"kind": "map", "mapping": {"1": "active"}}));
        assert_eq!(without.apply(&Tree::from("9")), Tree::from("9"));
    }

    #[test]
    fn test_constant_ignores_input() {
        let constant = compile(json!({"kind": "constant", "value": "ownership"}));
        assert_eq!(constant.apply(&Tree::Null), Tree::from("ownership"));
        assert_eq!(constant.apply(&Tree::Integer(3)), Tree::from("ownership"));
    }
}
