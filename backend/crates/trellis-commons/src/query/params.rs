//! Parameter type tags and the ordered parameter schema of a query.

use crate::errors::{ModelError, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag attached to every named query parameter.
///
/// Serializes as the wire tags `string`, `int`, `number`, `boolean`, `T[]`,
/// `session` and `env`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Int,
    Number,
    Boolean,
    Array(Box<ParamType>),
    /// Bound from the authenticated session server-side; never sent by the client.
    Session,
    /// Bound from the server environment; never sent by the client.
    Env,
}

impl ParamType {
    /// Parse a wire tag. Arrays nest: `string[]`, `int[][]`.
    pub fn from_tag(tag: &str) -> Result<Self> {
        if let Some(inner) = tag.strip_suffix("[]") {
            return Ok(ParamType::Array(Box::new(ParamType::from_tag(inner)?)));
        }
        match tag {
            "string" => Ok(ParamType::String),
            "int" => Ok(ParamType::Int),
            "number" => Ok(ParamType::Number),
            "boolean" => Ok(ParamType::Boolean),
            "session" => Ok(ParamType::Session),
            "env" => Ok(ParamType::Env),
            other => Err(ModelError::UnknownTypeTag(other.to_string())),
        }
    }

    pub fn tag(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "int".to_string(),
            ParamType::Number => "number".to_string(),
            ParamType::Boolean => "boolean".to_string(),
            ParamType::Array(inner) => format!("{}[]", inner.tag()),
            ParamType::Session => "session".to_string(),
            ParamType::Env => "env".to_string(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        ParamType::from_tag(&tag).map_err(de::Error::custom)
    }
}

/// Ordered mapping from parameter name to [`ParamType`].
///
/// Order is the order of first declaration and is part of the query's
/// canonical form, so it participates in the fingerprint. Names may not be
/// empty or digit-only; re-declaring a name with the same type is idempotent,
/// a different type is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    entries: Vec<(String, ParamType)>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter. First declaration wins the position; repeated
    /// declarations must agree on the type.
    pub fn insert(&mut self, name: &str, ty: ParamType) -> Result<()> {
        if name.is_empty() {
            return Err(ModelError::EmptyParamName);
        }
        if name.chars().all(|c| c.is_ascii_digit()) {
            return Err(ModelError::NumericParamName(name.to_string()));
        }
        if let Some((_, existing)) = self.entries.iter().find(|(n, _)| n == name) {
            if *existing != ty {
                return Err(ModelError::TypeConflict {
                    name: name.to_string(),
                    existing: existing.tag(),
                    requested: ty.tag(),
                });
            }
            return Ok(());
        }
        self.entries.push((name.to_string(), ty));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParamType> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamType)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Whether any parameter is session-bound. A query without one is public.
    pub fn has_session_param(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, t)| matches!(t, ParamType::Session))
    }

    /// Structural rendering: the ordered type tags without parameter names.
    /// This is the fingerprint input, so call sites that differ only in slot
    /// naming still produce the same query identity.
    pub fn structural(&self) -> String {
        let mut out = String::new();
        for (_, ty) in &self.entries {
            out.push_str(&ty.tag());
            out.push(';');
        }
        out
    }
}

impl Serialize for ParamSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, ty) in &self.entries {
            map.serialize_entry(name, ty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParamSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = ParamSchema;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an ordered map of parameter name to type tag")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut schema = ParamSchema::new();
                while let Some((name, ty)) = access.next_entry::<String, ParamType>()? {
                    schema.insert(&name, ty).map_err(de::Error::custom)?;
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in ["string", "int", "number", "boolean", "session", "env", "string[]", "int[][]"] {
            assert_eq!(ParamType::from_tag(tag).unwrap().tag(), tag);
        }
        assert!(ParamType::from_tag("blob").is_err());
    }

    #[test]
    fn test_name_invariants() {
        let mut schema = ParamSchema::new();
        assert_eq!(
            schema.insert("", ParamType::String),
            Err(ModelError::EmptyParamName)
        );
        assert!(matches!(
            schema.insert("123", ParamType::String),
            Err(ModelError::NumericParamName(_))
        ));
        schema.insert("x1", ParamType::String).unwrap();
    }

    #[test]
    fn test_redeclaration() {
        let mut schema = ParamSchema::new();
        schema.insert("x", ParamType::Int).unwrap();
        schema.insert("x", ParamType::Int).unwrap();
        assert_eq!(schema.len(), 1);
        assert!(matches!(
            schema.insert("x", ParamType::String),
            Err(ModelError::TypeConflict { .. })
        ));
    }

    #[test]
    fn test_order_preserved_through_serde() {
        let mut schema = ParamSchema::new();
        schema.insert("zeta", ParamType::String).unwrap();
        schema.insert("alpha", ParamType::Int).unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"zeta":"string","alpha":"int"}"#);
        let back: ParamSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_public_classification() {
        let mut schema = ParamSchema::new();
        schema.insert("id", ParamType::Int).unwrap();
        assert!(!schema.has_session_param());
        schema.insert("user", ParamType::Session).unwrap();
        assert!(schema.has_session_param());
    }
}
