//! [Store] over a MongoDB database.
//!
//! Stages, filters and updates are rendered with their `to_json` methods and converted to BSON.
//! Epoch millis under `expiresAt` and `mongoDate` are stored as BSON dates, which TTL indexes
//! need, and read back as millis.

use bson::{Bson, Document};
use futures::future::BoxFuture;
use futures::{FutureExt, TryStreamExt};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Database};
use serde_json::Value;
use trends_model::fields;

use super::{Collection, Store, StoreError, StoreResult};
use crate::pipeline::{Filter, FindQuery, Pipeline, SortSpec, Update, UpsertOptions};

#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        log::info!("Connected to {database}");
        Ok(Self {
            database: client.database(database),
        })
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<Document> {
        self.database.collection(collection.as_ref())
    }
}

const DATE_FIELDS: [&str; 2] = [fields::EXPIRES_AT, fields::MONGO_DATE];

/// Stages whose values are field specs rather than data.
const SPEC_STAGES: [&str; 2] = ["$project", "$sort"];

fn to_document(value: &Value) -> StoreResult<Document> {
    bson::to_document(value)
        .map(store_dates)
        .map_err(|e| StoreError::Bson(e.to_string()))
}

fn to_json(document: Document) -> Value {
    millis_dates(Bson::Document(document)).into_relaxed_extjson()
}

/// `key` names a date field, directly or as the last segment of a dotted path.
fn is_date_field(key: &str) -> bool {
    let name = key.rsplit('.').next().unwrap_or(key);
    DATE_FIELDS.contains(&name)
}

fn store_dates(document: Document) -> Document {
    document
        .into_iter()
        .map(|(key, value)| {
            let value = if SPEC_STAGES.contains(&key.as_str()) {
                value
            } else if is_date_field(&key) {
                as_date(value)
            } else {
                match value {
                    Bson::Document(nested) => Bson::Document(store_dates(nested)),
                    Bson::Array(items) => Bson::Array(
                        items
                            .into_iter()
                            .map(|item| match item {
                                Bson::Document(nested) => Bson::Document(store_dates(nested)),
                                other => other,
                            })
                            .collect(),
                    ),
                    other => other,
                }
            };
            (key, value)
        })
        .collect()
}

/// Millis become dates, including the operands of query operators such as `$gt`.
fn as_date(value: Bson) -> Bson {
    match value {
        Bson::Int64(millis) => Bson::DateTime(bson::DateTime::from_millis(millis)),
        Bson::Int32(millis) => Bson::DateTime(bson::DateTime::from_millis(millis.into())),
        Bson::Document(operators) => Bson::Document(
            operators
                .into_iter()
                .map(|(operator, operand)| (operator, as_date(operand)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(items.into_iter().map(as_date).collect()),
        other => other,
    }
}

fn millis_dates(value: Bson) -> Bson {
    match value {
        Bson::DateTime(at) => Bson::Int64(at.timestamp_millis()),
        Bson::Document(document) => Bson::Document(
            document
                .into_iter()
                .map(|(key, value)| (key, millis_dates(value)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(items.into_iter().map(millis_dates).collect()),
        other => other,
    }
}

fn sort_document(sort: &SortSpec) -> Document {
    sort.iter()
        .map(|(field, direction)| (field.clone(), Bson::Int32(*direction)))
        .collect()
}

impl Store for MongoStore {
    fn execute<'a>(
        &'a self,
        collection: Collection,
        pipeline: &'a Pipeline,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move {
            let stages = pipeline
                .stages()
                .iter()
                .map(|stage| to_document(&stage.to_json()))
                .collect::<StoreResult<Vec<_>>>()?;
            let cursor = self.collection(collection).aggregate(stages, None).await?;
            let documents: Vec<Document> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(to_json).collect())
        }
        .boxed()
    }

    fn find<'a>(
        &'a self,
        collection: Collection,
        query: &'a FindQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move {
            let mut options = FindOptions::default();
            if !query.sort.is_empty() {
                options.sort = Some(sort_document(&query.sort));
            }
            options.limit = query.limit.and_then(|limit| i64::try_from(limit).ok());
            options.projection = query.projection.as_ref().map(|fields| {
                let mut projection: Document =
                    fields.iter().map(|f| (f.clone(), Bson::Int32(1))).collect();
                projection.insert("_id", 0);
                projection
            });

            let cursor = self
                .collection(collection)
                .find(to_document(&query.filter.to_json())?, options)
                .await?;
            let documents: Vec<Document> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(to_json).collect())
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
        async move {
            let find_options = FindOneAndUpdateOptions::builder()
                .upsert(options.upsert)
                .return_document(if options.return_after {
                    ReturnDocument::After
                } else {
                    ReturnDocument::Before
                })
                .build();
            let updated = self
                .collection(collection)
                .find_one_and_update(
                    to_document(&filter.to_json())?,
                    to_document(&update.to_json())?,
                    find_options,
                )
                .await?;
            Ok(updated.map(to_json))
        }
        .boxed()
    }

    fn insert(&self, collection: Collection, document: Value) -> BoxFuture<'_, StoreResult<String>> {
        async move {
            let inserted = self
                .collection(collection)
                .insert_one(to_document(&document)?, None)
                .await?;
            Ok(match inserted.inserted_id {
                Bson::ObjectId(id) => id.to_hex(),
                Bson::String(id) => id,
                other => other.to_string(),
            })
        }
        .boxed()
    }
}
