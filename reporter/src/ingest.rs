//! Event ingestion.
//!
//! Every event gets its timestamps and retention, then is routed once by category: metrics are
//! split between the events and metrics collections, one-per-day categories are upserted with a
//! repeat counter, health events additionally feed the health state machine and everything else
//! is inserted.
//!
//! Results are strings: the stored document's id on success, or one of the sentinels below.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use trends_core::prelude::{CooldownGate, WorkerPool};
use trends_model::category::{self, CategoryRoute};
use trends_model::event::EventDocument;
use trends_model::fields;
use trends_model::query::non_blank;

use crate::clock::Clock;
use crate::discovery::DiscoveryCache;
use crate::health::HealthTracker;
use crate::normalize::daily_key;
use crate::pipeline::{Update, UpsertOptions};
use crate::store::{document_id, Collection, Store, StoreError};

pub const EMPTY_EVENT: &str = "EventJson Empty";
pub const STORE_UNAVAILABLE: &str = "Mongo Not Available";
pub const FAILURE: &str = "Failure";
pub const INSUFFICIENT_DATA: &str = "Insufficient data";
pub const INVALID_DATA: &str = "Invalid data";

const EXCEPTION_SUMMARY: &str = "Exception while inserting payload into mongo";
const EXCEPTION_PROJECT: &str = "CsapData";
const EXCEPTION_HOST: &str = "MongoDBHost";
const EXCEPTION_APP_ID: &str = "csapeng.gen";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Event json is not a valid event")]
    Parse(#[source] serde_json::Error),
    #[error("Event has no category")]
    MissingCategory,
    #[error("Cannot encode the event")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, IngestError::Store(e) if e.is_timeout())
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Host recorded on events created by this process.
    pub host_name: String,
    /// Lifecycle recorded on diagnostic events.
    pub lifecycle: String,
    /// How long writes are suppressed after the store timed out.
    pub cooldown: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            host_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            lifecycle: "prod".to_string(),
            cooldown: Duration::from_secs(25),
        }
    }
}

/// The result of ingesting one event.
#[derive(Debug)]
pub struct Ingested {
    /// The stored id or a sentinel.
    pub key: String,
    /// Completes once health and discovery processing of a health event are done.
    pub follow_up: Option<oneshot::Receiver<()>>,
}

impl Ingested {
    fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            follow_up: None,
        }
    }
}

/// A plain event built from separate fields rather than a JSON event.
#[derive(Debug, Clone, Default)]
pub struct SimpleEvent {
    pub app_id: String,
    pub project: String,
    pub lifecycle: String,
    pub summary: String,
    pub category: String,
    /// JSON if it starts with `{` or `[`, otherwise stored as text.
    pub payload: String,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    health: Arc<HealthTracker>,
    discovery: Arc<DiscoveryCache>,
    pool: Arc<WorkerPool>,
    cooldown: CooldownGate,
    settings: IngestSettings,
    clock: Clock,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        health: Arc<HealthTracker>,
        discovery: Arc<DiscoveryCache>,
        pool: Arc<WorkerPool>,
        settings: IngestSettings,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            health,
            discovery,
            pool,
            cooldown: CooldownGate::new(settings.cooldown),
            settings,
            clock,
        }
    }

    /// Store one JSON event sent on behalf of `app_id`.
    pub async fn ingest(&self, event_json: &str, app_id: &str) -> Ingested {
        if event_json.trim().is_empty() {
            log::error!("Empty event json sent for {app_id}");
            self.record_exception("Empty Event json", event_json, app_id).await;
            return Ingested::key(EMPTY_EVENT);
        }
        if self.cooldown.is_cooling_down() {
            log::debug!("Store timed out recently, not writing the event");
            return Ingested::key(STORE_UNAVAILABLE);
        }

        match self.write(event_json, app_id).await {
            Ok(ingested) => {
                self.cooldown.clear();
                ingested
            }
            Err(e) if e.is_timeout() => {
                log::error!("Store not available while inserting event: {e:?}");
                self.cooldown.arm();
                Ingested::key(STORE_UNAVAILABLE)
            }
            Err(e) => {
                log::error!("Exception while inserting event record {event_json}: {e:?}");
                self.record_exception(&e.to_string(), event_json, app_id).await;
                Ingested::key(FAILURE)
            }
        }
    }

    async fn write(&self, event_json: &str, app_id: &str) -> Result<Ingested, IngestError> {
        let mut event: EventDocument =
            serde_json::from_str(event_json).map_err(IngestError::Parse)?;
        if let Some(app_id) = non_blank(Some(app_id)) {
            event.app_id = app_id.to_string();
        }
        if event.category.trim().is_empty() {
            return Err(IngestError::MissingCategory);
        }

        let now = self.clock.now();
        event.stamp(now);
        event.apply_retention(now);
        log::debug!("Inserting type: {}", event.category);

        let key = match CategoryRoute::for_category(&event.category) {
            route @ (CategoryRoute::MetricsAttributes
            | CategoryRoute::MetricsData
            | CategoryRoute::MetricsUnknown) => self.write_metrics(route, event).await?,
            CategoryRoute::Health => {
                let key = self.upsert_daily(&event).await?;
                return Ok(Ingested {
                    key,
                    follow_up: self.follow_up_health(event).await,
                });
            }
            CategoryRoute::Upsert => self.upsert_daily(&event).await?,
            CategoryRoute::Insert => {
                self.store
                    .insert(Collection::Events, event.to_value()?)
                    .await?
            }
        };

        Ok(Ingested::key(key))
    }

    /// Store the samples or catalog in its metrics collection and the event, without them, in
    /// the events collection with a `dataKey` pointing at them.
    async fn write_metrics(
        &self,
        route: CategoryRoute,
        mut event: EventDocument,
    ) -> Result<String, IngestError> {
        let collection = match route {
            CategoryRoute::MetricsAttributes => Collection::MetricsAttributes,
            CategoryRoute::MetricsData => Collection::MetricsData,
            _ => {
                log::debug!("Category not ending with data or attributes: {}", event.category);
                return Ok(String::new());
            }
        };

        let mut data = match std::mem::take(&mut event.data) {
            Value::Object(data) => data,
            _ => Map::new(),
        };
        let created_on = serde_json::to_value(&event.created_on)?;
        data.insert(fields::CREATED_ON.to_string(), created_on);

        let data_key = self.store.insert(collection, Value::Object(data)).await?;
        log::debug!("Metrics key {data_key}");
        event.data_key = Some(data_key);

        match collection {
            Collection::MetricsAttributes => Ok(self
                .store
                .insert(Collection::Events, event.to_value()?)
                .await?),
            _ => self.upsert_daily(&event).await,
        }
    }

    /// Write the event as the one document of its category, host and day, counting repeats.
    async fn upsert_daily(&self, event: &EventDocument) -> Result<String, IngestError> {
        let filter = daily_key(
            &event.category,
            &event.host,
            event.date().unwrap_or_default(),
        );

        let mut document = match event.to_value()? {
            Value::Object(document) => document,
            _ => Map::new(),
        };
        document.shift_remove(fields::COUNTER);
        document.shift_remove(fields::ID);
        let update = Update::new().set_all(document).inc(fields::COUNTER, 1);

        let stored = self
            .store
            .upsert(Collection::Events, &filter, &update, UpsertOptions::upsert())
            .await?;
        log::debug!("Upsert for {}, filter: {}", event.category, filter.to_json());

        Ok(stored
            .as_ref()
            .and_then(document_id)
            .unwrap_or_default())
    }

    /// Hand the health event to the health state machine and discovery cache on the pool.
    async fn follow_up_health(&self, event: EventDocument) -> Option<oneshot::Receiver<()>> {
        let health = self.health.clone();
        let discovery = self.discovery.clone();
        let today = self.clock.today();

        let job = async move {
            if let Err(e) = health.record(&event).await {
                log::warn!(
                    "{} life {} Failed inserting health event: {e:?}",
                    event.project,
                    event.lifecycle
                );
            }
            let payload = event.payload();
            let vm = payload.as_health().and_then(|health| health.vm.as_ref());
            discovery.record(today, &event.app_id, &event.lifecycle, &event.host, vm);
        };

        match self.pool.submit(job).await {
            Ok(done) => Some(done),
            Err(e) => {
                log::error!("Exception while writing health report event: {e}");
                None
            }
        }
    }

    /// Store an event assembled from its fields. Every field is required.
    pub async fn insert_event(&self, event: SimpleEvent) -> String {
        let required = [
            &event.payload,
            &event.app_id,
            &event.project,
            &event.lifecycle,
            &event.summary,
            &event.category,
        ];
        if required.iter().any(|field| field.trim().is_empty()) {
            log::error!(
                "Invalid data eventData {} appId {} project {} life {}",
                event.payload,
                event.app_id,
                event.project,
                event.lifecycle
            );
            return INSUFFICIENT_DATA.to_string();
        }

        match self.insert_simple(event).await {
            Ok(key) => key,
            Err(e) => {
                log::error!("Exception while inserting data: {e:?}");
                INVALID_DATA.to_string()
            }
        }
    }

    async fn insert_simple(&self, event: SimpleEvent) -> Result<String, IngestError> {
        let data = if event.payload.starts_with('{') || event.payload.starts_with('[') {
            serde_json::from_str(&event.payload).map_err(IngestError::Parse)?
        } else {
            json!({ fields::CSAP_TEXT: event.payload })
        };

        let mut document = self.new_event(&event.category, &event.summary, data);
        document.app_id = event.app_id;
        document.project = event.project;
        document.lifecycle = event.lifecycle;
        document.apply_retention(self.clock.now());

        let document = document.to_value()?;
        Ok(self.store.insert(Collection::Events, document).await?)
    }

    /// Record why an event could not be stored. Failures here are only logged.
    async fn record_exception(&self, message: &str, event_json: &str, app_id: &str) {
        let or_null = |value: &str| {
            if value.trim().is_empty() {
                "null".to_string()
            } else {
                value.to_string()
            }
        };
        let data = json!({
            "exceptionMessage": message,
            "appIdUsedForAuth": or_null(app_id),
            "eventJson": or_null(event_json),
        });

        let mut document = self.new_event(category::EXCEPTION_PAYLOAD, EXCEPTION_SUMMARY, data);
        document.app_id = EXCEPTION_APP_ID.to_string();
        document.project = EXCEPTION_PROJECT.to_string();
        document.host = EXCEPTION_HOST.to_string();
        document.lifecycle = self.settings.lifecycle.clone();
        document.apply_retention(self.clock.now());

        let inserted = match document.to_value() {
            Ok(document) => self
                .store
                .insert(Collection::Events, document)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = inserted {
            log::error!("Exception while inserting exception event: {e:?}");
        }
    }

    fn new_event(&self, category: &str, summary: &str, data: Value) -> EventDocument {
        let mut event = EventDocument {
            app_id: String::new(),
            project: String::new(),
            lifecycle: String::new(),
            category: category.to_string(),
            host: self.settings.host_name.clone(),
            summary: Some(summary.to_string()),
            created_on: None,
            data,
            counter: None,
            expires_at: None,
            data_key: None,
            extra: Map::new(),
        };
        event.stamp(self.clock.now());
        event
    }
}
