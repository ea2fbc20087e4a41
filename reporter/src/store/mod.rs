//! The document store collaborator.
//!
//! Reports and ingestion only ever talk to a [Store]. Connection handling, replication and
//! provisioning belong to the backend behind it.

mod eval;
pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod timed;

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::pipeline::{Filter, FindQuery, Pipeline, Update, UpsertOptions};

pub use memory::MemoryStore;
pub use timed::TimedStore;

/// The collections the reporter reads and writes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumIter,
)]
pub enum Collection {
    /// Every ingested event, including the daily reports and health documents.
    #[strum(serialize = "events")]
    Events,
    #[strum(serialize = "metricsAttributes")]
    MetricsAttributes,
    #[strum(serialize = "metricsData")]
    MetricsData,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store call did not complete within {0:?}")]
    Timeout(Duration),
    #[error("Cannot evaluate {stage}: {reason}")]
    Evaluation { stage: &'static str, reason: String },
    #[error("Document does not have the expected shape")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "mongo")]
    #[error("Mongo request failed")]
    Mongo(#[from] mongodb::error::Error),
    #[cfg(feature = "mongo")]
    #[error("Cannot convert between JSON and BSON: {0}")]
    Bson(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }

    pub(crate) fn evaluation(stage: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Evaluation {
            stage,
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The `_id` of a stored document as a string. Extended JSON object ids are unwrapped.
pub fn document_id(document: &Value) -> Option<String> {
    match document.get(trends_model::fields::ID)? {
        Value::String(id) => Some(id.clone()),
        Value::Object(id) => id.get("$oid").and_then(Value::as_str).map(str::to_string),
        other => Some(other.to_string()),
    }
}

/// Aggregation, lookup and write access to the document store.
///
/// Results are fully collected, so a call returns only once the store has produced every
/// document.
pub trait Store: Send + Sync {
    /// Run an aggregation pipeline.
    fn execute<'a>(
        &'a self,
        collection: Collection,
        pipeline: &'a Pipeline,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>>;

    fn find<'a>(
        &'a self,
        collection: Collection,
        query: &'a FindQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>>;

    /// Update the first document matching `filter`, creating it if allowed by `options`.
    ///
    /// Returns the document before or after the update, per `options`, or `None` when nothing
    /// matched and nothing was created.
    fn upsert<'a>(
        &'a self,
        collection: Collection,
        filter: &'a Filter,
        update: &'a Update,
        options: UpsertOptions,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>>;

    /// Insert a new document, returning its id.
    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, StoreResult<String>>;

    fn find_one<'a>(
        &'a self,
        collection: Collection,
        query: &'a FindQuery,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        async move {
            let query = query.clone().limit(1);
            Ok(self.find(collection, &query).await?.into_iter().next())
        }
        .boxed()
    }
}
