use super::Tree;
use std::collections::BTreeMap;
use std::fmt;

impl<'de> serde::Deserialize<'de> for Tree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(TreeVisitor)
    }
}

struct TreeVisitor;

impl<'de> serde::de::Visitor<'de> for TreeVisitor {
    type Value = Tree;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_unit<E>(self) -> Result<Tree, E> {
        Ok(Tree::Null)
    }

    fn visit_none<E>(self) -> Result<Tree, E> {
        Ok(Tree::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Tree, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(TreeVisitor)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Tree, E> {
        Ok(Tree::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Tree, E> {
        Ok(Tree::Integer(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Tree, E> {
        // Out-of-range magnitudes degrade to floats rather than erroring.
        if v <= i64::MAX as u64 {
            Ok(Tree::Integer(v as i64))
        } else {
            Ok(Tree::Float(v as f64))
        }
    }

    fn visit_f64<E>(self, v: f64) -> Result<Tree, E> {
        Ok(Tree::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Tree, E> {
        Ok(Tree::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Tree, E> {
        Ok(Tree::String(v))
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Tree, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(item) = access.next_element()? {
            items.push(item);
        }
        Ok(Tree::Sequence(items))
    }

    fn visit_map<A>(self, mut access: A) -> Result<Tree, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut fields = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Tree>()? {
            // Duplicate keys: last one wins, matching serde_json.
            fields.insert(key, value);
        }
        Ok(Tree::Mapping(fields))
    }
}
