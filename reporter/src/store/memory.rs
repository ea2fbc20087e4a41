use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use strum::IntoEnumIterator;
use trends_model::fields;

use super::eval;
use super::{Collection, Store, StoreResult};
use crate::pipeline::{Filter, FindQuery, Pipeline, Update, UpsertOptions};

/// A store holding every collection in memory.
///
/// Used by the CLI when no database is configured and by the tests. Updates hold the write lock
/// for the whole find-and-modify, so an upsert is atomic with respect to other writers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load documents from JSON-lines files.
    ///
    /// A directory is read as one `<collection>.jsonl` file per collection, any of which may be
    /// absent. A single file is loaded into the events collection.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let store = Self::new();
        if path.is_dir() {
            for collection in Collection::iter() {
                let file = path.join(format!("{collection}.jsonl"));
                if file.exists() {
                    let documents = trends_model::load_documents(&file)?;
                    log::info!("Seeding {} {collection} documents", documents.len());
                    store.seed(collection, documents);
                }
            }
        } else {
            let documents = trends_model::load_documents(path)
                .with_context(|| format!("Cannot seed the store from {}", path.display()))?;
            log::info!("Seeding {} events", documents.len());
            store.seed(Collection::Events, documents);
        }
        Ok(store)
    }

    /// Add documents as they are, assigning an id to those without one.
    pub fn seed(&self, collection: Collection, documents: impl IntoIterator<Item = Value>) {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection).or_default();
        for mut document in documents {
            assign_id(&mut document);
            stored.push(document);
        }
    }

    /// A copy of every document in `collection`, in insertion order.
    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.collections
            .read()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .get(&collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
        options: UpsertOptions,
    ) -> StoreResult<Option<Value>> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection).or_default();

        if let Some(document) = documents
            .iter_mut()
            .find(|document| eval::matches(filter, document))
        {
            let before = document.clone();
            let mut updated = before.clone();
            eval::apply_update(update, &mut updated, false)?;
            *document = updated;
            return Ok(Some(if options.return_after {
                document.clone()
            } else {
                before
            }));
        }

        if !options.upsert {
            return Ok(None);
        }

        let mut document = eval::seed_from_filter(filter);
        eval::apply_update(update, &mut document, true)?;
        assign_id(&mut document);
        documents.push(document.clone());
        Ok(options.return_after.then_some(document))
    }
}

fn assign_id(document: &mut Value) -> String {
    if let Some(id) = document.get(fields::ID) {
        return match id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
    }
    let id = nanoid::nanoid!();
    if let Value::Object(map) = document {
        map.insert(fields::ID.to_string(), Value::String(id.clone()));
    }
    id
}

impl Store for MemoryStore {
    fn execute<'a>(
        &'a self,
        collection: Collection,
        pipeline: &'a Pipeline,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move { eval::run(pipeline.stages(), self.documents(collection)) }.boxed()
    }

    fn find<'a>(
        &'a self,
        collection: Collection,
        query: &'a FindQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move {
            let mut found: Vec<Value> = self
                .collections
                .read()
                .get(&collection)
                .map(|documents| {
                    documents
                        .iter()
                        .filter(|document| eval::matches(&query.filter, document))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            eval::sort(&mut found, &query.sort);
            if let Some(limit) = query.limit {
                found.truncate(limit);
            }
            if let Some(projection) = &query.projection {
                found = found
                    .iter()
                    .map(|document| {
                        let mut projected = Value::Object(Default::default());
                        for field in projection {
                            if let Some(value) = eval::lookup(document, field) {
                                eval::set_path(&mut projected, field, value.clone());
                            }
                        }
                        projected
                    })
                    .collect();
            }
            Ok(found)
        }
        .boxed()
    }

    fn upsert<'a>(
        &'a self,
        collection: Collection,
        filter: &'a Filter,
        update: &'a Update,
        options: UpsertOptions,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        async move { self.update_one(collection, filter, update, options) }.boxed()
    }

    fn insert(&self, collection: Collection, mut document: Value) -> BoxFuture<'_, StoreResult<String>> {
        async move {
            let id = assign_id(&mut document);
            self.collections
                .write()
                .entry(collection)
                .or_default()
                .push(document);
            Ok(id)
        }
        .boxed()
    }
}
