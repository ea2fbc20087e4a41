use serde_json::{json, Map, Value};

/// A document update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Map<String, Value>,
    /// Applied only when the upsert creates the document.
    pub set_on_insert: Map<String, Value>,
    pub inc: Map<String, Value>,
    pub unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    /// Set every top level field of `document`.
    pub fn set_all(mut self, document: Map<String, Value>) -> Self {
        self.set.extend(document);
        self
    }

    pub fn set_on_insert(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_on_insert.insert(field.to_string(), value.into());
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.inc.insert(field.to_string(), json!(by));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.unset.push(field.to_string());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut update = Map::new();
        if !self.set.is_empty() {
            update.insert("$set".to_string(), Value::Object(self.set.clone()));
        }
        if !self.set_on_insert.is_empty() {
            update.insert(
                "$setOnInsert".to_string(),
                Value::Object(self.set_on_insert.clone()),
            );
        }
        if !self.inc.is_empty() {
            update.insert("$inc".to_string(), Value::Object(self.inc.clone()));
        }
        if !self.unset.is_empty() {
            let unset = self
                .unset
                .iter()
                .map(|field| (field.clone(), json!("")))
                .collect();
            update.insert("$unset".to_string(), Value::Object(unset));
        }
        Value::Object(update)
    }
}

/// How [Store::upsert](crate::store::Store::upsert) behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Create the document when nothing matches.
    pub upsert: bool,
    /// Return the document as it is after the update, rather than before.
    pub return_after: bool,
}

impl UpsertOptions {
    pub fn upsert() -> Self {
        Self {
            upsert: true,
            return_after: true,
        }
    }

    pub fn update_only() -> Self {
        Self {
            upsert: false,
            return_after: true,
        }
    }
}
