use super::Tree;

/// Token is one parsed step of a mapping path expression.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Token {
    /// Member access of a Mapping: `.name`.
    Property(String),
    /// Index into a Sequence: `[3]`.
    Index(usize),
    /// Wildcard over a Sequence: `[*]`. Applied to a single non-null
    /// value it yields that value, so paths written against "a list of
    /// one" keep working after XML collapses singletons.
    Wildcard,
}

/// Error compiling a path expression string.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("unexpected character {found:?} at offset {offset} of path {path:?}")]
    UnexpectedCharacter {
        path: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated bracket at offset {offset} of path {path:?}")]
    UnterminatedBracket { path: String, offset: usize },
    #[error("empty property name at offset {offset} of path {path:?}")]
    EmptyProperty { path: String, offset: usize },
}

/// Path is a compiled expression in the small dialect used by declarative
/// mappings and predicates: `$`, `.name`, `[n]`, and `[*]`.
///
/// ```
/// use tree::{Path, Token};
///
/// let path = Path::compile("$.data.items[*].name").unwrap();
/// let expect = vec![
///     Token::Property("data".to_string()),
///     Token::Property("items".to_string()),
///     Token::Wildcard,
///     Token::Property("name".to_string()),
/// ];
/// assert_eq!(path.tokens(), &expect[..]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    raw: String,
    tokens: Vec<Token>,
}

fn is_property_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl Path {
    /// Compile a path string. Unknown token forms are an error here,
    /// never at evaluation time.
    pub fn compile(path: &str) -> Result<Path, PathError> {
        let raw = path.trim();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut tokens = Vec::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;

        // A single leading `$` anchors at the root and carries no token.
        if chars[i] == '$' {
            i += 1;
        }

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_property_char(chars[end]) {
                        end += 1;
                    }
                    if end == start {
                        return Err(PathError::EmptyProperty {
                            path: raw.to_string(),
                            offset: i,
                        });
                    }
                    tokens.push(Token::Property(chars[start..end].iter().collect()));
                    i = end;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| i + p)
                        .ok_or_else(|| PathError::UnterminatedBracket {
                            path: raw.to_string(),
                            offset: i,
                        })?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    if inner == "*" {
                        tokens.push(Token::Wildcard);
                    } else if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                        // Indices are small; overflow here means a bogus path.
                        let ind = inner.parse::<usize>().map_err(|_| {
                            PathError::UnexpectedCharacter {
                                path: raw.to_string(),
                                offset: i + 1,
                                found: inner.chars().next().unwrap_or(']'),
                            }
                        })?;
                        tokens.push(Token::Index(ind));
                    } else {
                        return Err(PathError::UnexpectedCharacter {
                            path: raw.to_string(),
                            offset: i + 1,
                            found: inner.chars().next().unwrap_or(']'),
                        });
                    }
                    i = close + 1;
                }
                // Tolerate a bare leading property name, as in `meta.registry_code`.
                c if is_property_char(c) && tokens.is_empty() => {
                    let start = i;
                    let mut end = start;
                    while end < chars.len() && is_property_char(chars[end]) {
                        end += 1;
                    }
                    tokens.push(Token::Property(chars[start..end].iter().collect()));
                    i = end;
                }
                c => {
                    return Err(PathError::UnexpectedCharacter {
                        path: raw.to_string(),
                        offset: i,
                        found: c,
                    });
                }
            }
        }

        Ok(Path {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluate the path, returning every matching non-null value in
    /// document order. Missing keys and type mismatches yield nothing;
    /// they are never an error.
    pub fn values<'t>(&self, root: &'t Tree) -> Vec<&'t Tree> {
        let mut cur: Vec<&'t Tree> = vec![root];

        for token in &self.tokens {
            let mut next = Vec::new();
            for item in cur {
                match (token, item) {
                    (Token::Property(name), Tree::Mapping(fields)) => {
                        if let Some(value) = fields.get(name) {
                            next.push(value);
                        }
                    }
                    (Token::Index(ind), Tree::Sequence(items)) => {
                        if let Some(value) = items.get(*ind) {
                            next.push(value);
                        }
                    }
                    (Token::Wildcard, Tree::Sequence(items)) => next.extend(items.iter()),
                    (Token::Wildcard, Tree::Null) => {}
                    (Token::Wildcard, single) => next.push(single),
                    _ => {}
                }
            }
            cur = next;
            if cur.is_empty() {
                break;
            }
        }

        cur.into_iter().filter(|t| !t.is_null()).collect()
    }

    /// The first matching value, if any.
    pub fn first<'t>(&self, root: &'t Tree) -> Option<&'t Tree> {
        self.values(root).into_iter().next()
    }

    /// Whether the path resolves to at least one non-null value.
    pub fn exists(&self, root: &Tree) -> bool {
        self.first(root).is_some()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl serde::Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> serde::Deserialize<'de> for Path {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Path::compile(&s).map_err(serde::de::Error::custom)
    }
}
