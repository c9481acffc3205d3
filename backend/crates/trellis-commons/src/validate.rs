//! The validation engine: an ordered list of validator callbacks run over a
//! parameter map, accumulating per-field and non-field errors.

use crate::query::params::{ParamSchema, ParamType};
use futures_util::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Parameter values keyed by name, as they travel on the wire.
pub type ParamMap = serde_json::Map<String, JsonValue>;

/// Accumulated validation errors: the first error per field, plus an ordered
/// sequence of non-field errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: Vec<(String, String)>,
    non_field: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Only the first per field is retained; an empty field
    /// name routes to the non-field sequence.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        if field.is_empty() {
            self.non_field.push(message.into());
            return;
        }
        if self.fields.iter().any(|(name, _)| name == field) {
            return;
        }
        self.fields.push((field.to_string(), message.into()));
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, m)| (n.as_str(), m.as_str()))
    }

    pub fn non_field(&self) -> &[String] {
        &self.non_field
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.non_field.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, msg) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", name, msg)?;
            first = false;
        }
        for msg in &self.non_field {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", msg)?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for ValidationErrors {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            fields: FieldMap<'a>,
            #[serde(rename = "nonField")]
            non_field: &'a [String],
        }

        struct FieldMap<'a>(&'a [(String, String)]);

        impl Serialize for FieldMap<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (name, msg) in self.0 {
                    map.serialize_entry(name, msg)?;
                }
                map.end()
            }
        }

        Wire {
            fields: FieldMap(&self.fields),
            non_field: &self.non_field,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValidationErrors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct WireVisitor;

        impl<'de> Visitor<'de> for WireVisitor {
            type Value = ValidationErrors;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a validation-errors object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut errors = ValidationErrors::new();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        "fields" => {
                            let fields: Vec<(String, String)> =
                                access.next_value_seed(FieldMapSeed)?;
                            for (name, msg) in fields {
                                errors.add(&name, msg);
                            }
                        }
                        "nonField" => {
                            for msg in access.next_value::<Vec<String>>()? {
                                errors.add("", msg);
                            }
                        }
                        _ => {
                            let _: serde::de::IgnoredAny = access.next_value()?;
                        }
                    }
                }
                Ok(errors)
            }
        }

        struct FieldMapSeed;

        impl<'de> serde::de::DeserializeSeed<'de> for FieldMapSeed {
            type Value = Vec<(String, String)>;

            fn deserialize<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<Self::Value, D::Error> {
                struct V;
                impl<'de> Visitor<'de> for V {
                    type Value = Vec<(String, String)>;
                    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                        f.write_str("a map of field name to message")
                    }
                    fn visit_map<A: MapAccess<'de>>(
                        self,
                        mut access: A,
                    ) -> std::result::Result<Self::Value, A::Error> {
                        let mut out = Vec::new();
                        while let Some(entry) = access.next_entry::<String, String>()? {
                            out.push(entry);
                        }
                        Ok(out)
                    }
                }
                deserializer.deserialize_map(V)
            }
        }

        deserializer.deserialize_map(WireVisitor)
    }
}

/// Errors accumulator shared between synchronous and asynchronous validators.
pub type SharedErrors = Arc<Mutex<ValidationErrors>>;

/// A validator callback. The synchronous part runs inline; a validator that
/// needs to await returns a future, and all returned futures are awaited in
/// parallel after the synchronous pass.
pub trait Validator: Send + Sync {
    /// Stable symbol name, as recorded in the whitelist.
    fn symbol(&self) -> &str;

    fn run(&self, errors: &SharedErrors, params: &ParamMap) -> Option<BoxFuture<'static, ()>>;
}

/// Run the validation pipeline for one query execution.
///
/// Every client-suppliable schema parameter must be present in `params`
/// (callers signal "no value" with an explicit JSON null); session- and
/// env-bound parameters are filled server-side and are exempt. Validators run
/// in declaration order. Returns `None` when no errors were recorded.
pub async fn validate(
    schema: &ParamSchema,
    params: &ParamMap,
    validators: &[Arc<dyn Validator>],
) -> Option<ValidationErrors> {
    let errors: SharedErrors = Arc::new(Mutex::new(ValidationErrors::new()));

    for (name, ty) in schema.iter() {
        if matches!(ty, ParamType::Session | ParamType::Env) {
            continue;
        }
        if !params.contains_key(name) {
            errors.lock().add(name, "may not be undefined");
        }
    }

    let mut pending = Vec::new();
    for validator in validators {
        if let Some(future) = validator.run(&errors, params) {
            pending.push(future);
        }
    }
    join_all(pending).await;

    let collected = std::mem::take(&mut *errors.lock());
    if collected.is_empty() {
        None
    } else {
        Some(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FnValidator<F>(&'static str, F);

    impl<F> Validator for FnValidator<F>
    where
        F: Fn(&SharedErrors, &ParamMap) -> Option<BoxFuture<'static, ()>> + Send + Sync,
    {
        fn symbol(&self) -> &str {
            self.0
        }
        fn run(&self, errors: &SharedErrors, params: &ParamMap) -> Option<BoxFuture<'static, ()>> {
            (self.1)(errors, params)
        }
    }

    fn params(pairs: &[(&str, JsonValue)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_add_is_first_wins() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "too short");
        errors.add("name", "too long");
        assert_eq!(errors.field("name"), Some("too short"));

        errors.add("", "broken form");
        errors.add("", "broken form again");
        assert_eq!(errors.non_field().len(), 2);
    }

    #[test]
    fn test_wire_round_trip() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "invalid address");
        errors.add("age", "must be positive");
        errors.add("", "try later");

        let json = serde_json::to_string(&errors).unwrap();
        let back: ValidationErrors = serde_json::from_str(&json).unwrap();
        assert_eq!(back, errors);
    }

    #[tokio::test]
    async fn test_undefined_params_rejected() {
        let mut schema = ParamSchema::new();
        schema.insert("id", ParamType::Int).unwrap();
        schema.insert("user", ParamType::Session).unwrap();

        let errors = validate(&schema, &ParamMap::new(), &[]).await.unwrap();
        assert_eq!(errors.field("id"), Some("may not be undefined"));
        // Session params are server-bound; their absence is not an error.
        assert!(errors.field("user").is_none());

        let ok = validate(&schema, &params(&[("id", json!(null))]), &[]).await;
        assert!(ok.is_none());
    }

    #[tokio::test]
    async fn test_validators_run_in_order_and_async_join() {
        let mut schema = ParamSchema::new();
        schema.insert("n", ParamType::Int).unwrap();

        let sync: Arc<dyn Validator> = Arc::new(FnValidator(
            "first",
            |errors: &SharedErrors, _: &ParamMap| -> Option<BoxFuture<'static, ()>> {
                errors.lock().add("n", "from first");
                None
            },
        ));
        let async_v: Arc<dyn Validator> = Arc::new(FnValidator(
            "second",
            |errors: &SharedErrors, _: &ParamMap| -> Option<BoxFuture<'static, ()>> {
                let errors = errors.clone();
                Some(Box::pin(async move {
                    errors.lock().add("n", "from second");
                    errors.lock().add("", "async note");
                }))
            },
        ));

        let errors = validate(&schema, &params(&[("n", json!(1))]), &[sync, async_v])
            .await
            .unwrap();
        // Declaration order: the synchronous validator claimed the field first.
        assert_eq!(errors.field("n"), Some("from first"));
        assert_eq!(errors.non_field(), &["async note".to_string()]);
    }
}
