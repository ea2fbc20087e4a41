//! The daily health document of every host.
//!
//! Each `/csap/health` event is folded into one `/csap/reports/health` document per host and day.
//! The document keeps a capped history of status changes and a count of unhealthy events.
//!
//! Writes are conditional on the `revision` read, so two events for the same host and day cannot
//! overwrite each other's changes: the loser of a race reads again and retries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use trends_model::category::HEALTH_REPORT;
use trends_model::event::{EventDocument, HealthPayload};
use trends_model::fields;
use trends_model::health::{rendered_len, HealthData, HealthStatusEntry};

use crate::clock::Clock;
use crate::normalize::daily_key;
use crate::pipeline::{Filter, FindQuery, Update, UpsertOptions};
use crate::store::{Collection, Store, StoreError};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    /// Status changes recorded per host and day. Later changes only bump the unhealthy count.
    pub max_changes_per_day: usize,
    /// Lifecycles whose health events are not tracked.
    pub disabled_lifecycles: Vec<String>,
    /// Deadline for reading the current document.
    pub lookup_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_changes_per_day: 21,
            disabled_lifecycles: Vec::new(),
            lookup_timeout: Duration::from_secs(1),
        }
    }
}

impl HealthSettings {
    pub fn is_enabled_for(&self, lifecycle: &str) -> bool {
        !self
            .disabled_lifecycles
            .iter()
            .any(|disabled| disabled.eq_ignore_ascii_case(lifecycle))
    }
}

/// What a health event did to the host's daily document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// First event of the day.
    Created,
    /// The status changed and was appended to the history.
    Appended,
    /// The event reported errors but the history was left alone.
    Counted,
    Unchanged,
    Disabled,
}

/// The change an event makes to an existing document, decided from the document alone.
fn next_state(
    current: &HealthData,
    status: &[String],
    has_errors: bool,
    max_changes: usize,
) -> Option<(HealthTransition, HealthData)> {
    let changed = current
        .last_entry()
        .map_or(true, |last| last.rendered_len() != rendered_len(status));
    let full = current.health_status.len() >= max_changes;

    let mut next = current.clone();
    if has_errors {
        next.unhealthy_event_count += 1;
    }

    if changed && !full {
        Some((HealthTransition::Appended, next))
    } else if has_errors {
        Some((HealthTransition::Counted, next))
    } else {
        None
    }
}

pub struct HealthTracker {
    store: Arc<dyn Store>,
    settings: HealthSettings,
    clock: Clock,
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("settings", &self.settings)
            .finish()
    }
}

impl HealthTracker {
    pub fn new(store: Arc<dyn Store>, settings: HealthSettings, clock: Clock) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Fold a stamped health event into its host's daily document.
    pub async fn record(&self, event: &EventDocument) -> anyhow::Result<HealthTransition> {
        if !self.settings.is_enabled_for(&event.lifecycle) {
            log::debug!(
                "Health report not enabled for {} and life {}",
                event.project,
                event.lifecycle
            );
            return Ok(HealthTransition::Disabled);
        }

        let payload = event.payload();
        let Some(health) = payload.as_health() else {
            bail!("{} is not a health event", event.category);
        };
        let date = event
            .date()
            .map(str::to_string)
            .unwrap_or_else(|| self.clock.date_string(0));
        let key = daily_key(HEALTH_REPORT, &event.host, &date);

        for attempt in 1..=MAX_ATTEMPTS {
            let transition = match self.current(&key).await? {
                None => self.create(&key, event, health).await?,
                Some(document) => self.update(&key, &document, &event.host, health).await?,
            };
            if let Some(transition) = transition {
                log::debug!("{} health on {date}: {transition:?}", event.host);
                return Ok(transition);
            }
            log::debug!("{} health on {date} changed concurrently, attempt {attempt}", event.host);
        }

        bail!(
            "Health document of {} on {date} kept changing, giving up after {MAX_ATTEMPTS} attempts",
            event.host
        )
    }

    async fn current(&self, key: &Filter) -> anyhow::Result<Option<Value>> {
        let query = FindQuery::new(key.clone());
        let lookup = self.store.find_one(Collection::Events, &query);
        let found = tokio::time::timeout(self.settings.lookup_timeout, lookup)
            .await
            .map_err(|_| StoreError::Timeout(self.settings.lookup_timeout))??;
        Ok(found)
    }

    /// `None` when another event created the document first.
    async fn create(
        &self,
        key: &Filter,
        event: &EventDocument,
        health: &HealthPayload,
    ) -> anyhow::Result<Option<HealthTransition>> {
        let document = self.initial_document(event, health)?;

        let mut update = Update::new().set_on_insert(fields::REVISION, 0);
        for (field, value) in document {
            update = update.set_on_insert(&field, value);
        }
        let options = UpsertOptions {
            upsert: true,
            return_after: false,
        };

        let before = self
            .store
            .upsert(Collection::Events, key, &update, options)
            .await
            .context("Creating health document")?;
        Ok(before.is_none().then_some(HealthTransition::Created))
    }

    /// `None` when the document was written by someone else since it was read.
    async fn update(
        &self,
        key: &Filter,
        document: &Value,
        host: &str,
        health: &HealthPayload,
    ) -> anyhow::Result<Option<HealthTransition>> {
        let current = HealthData::from_document(document);
        let status = health.status_for(host);
        let Some((transition, mut next)) = next_state(
            &current,
            &status,
            health.has_errors(),
            self.settings.max_changes_per_day,
        ) else {
            return Ok(Some(HealthTransition::Unchanged));
        };

        if transition == HealthTransition::Appended {
            next.health_status
                .push(HealthStatusEntry::new(self.clock.now(), status));
        }

        let revision = document.get(fields::REVISION).cloned().unwrap_or(Value::Null);
        let guarded = key.clone().and(Filter::eq(fields::REVISION, revision));
        let update = Update::new()
            .set(
                &fields::path(fields::DATA, fields::UNHEALTHY_EVENT_COUNT),
                next.unhealthy_event_count,
            )
            .set(
                &fields::path(fields::DATA, fields::HEALTH_STATUS),
                serde_json::to_value(&next.health_status)?,
            )
            .set(
                fields::CREATED_ON_LAST_UPDATED,
                self.clock.now().timestamp_millis(),
            )
            .inc(fields::REVISION, 1)
            .unset(fields::COUNTER);

        let written = self
            .store
            .upsert(Collection::Events, &guarded, &update, UpsertOptions::update_only())
            .await
            .context("Updating health document")?;
        Ok(written.map(|_| transition))
    }

    /// The health document for the first event of a day: the event itself, re-categorized,
    /// with the health flag and errors replaced by the count and the first history entry.
    fn initial_document(
        &self,
        event: &EventDocument,
        health: &HealthPayload,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut document = event.clone();
        document.category = HEALTH_REPORT.to_string();
        document.counter = None;

        let mut data = match std::mem::take(&mut document.data) {
            Value::Object(data) => data,
            _ => Map::new(),
        };
        data.shift_remove(fields::HEALTHY);
        data.shift_remove(fields::ERRORS);
        let unhealthy = i64::from(!health.healthy);
        data.insert(fields::UNHEALTHY_EVENT_COUNT.to_string(), unhealthy.into());
        data.insert(
            fields::HEALTH_STATUS.to_string(),
            serde_json::to_value(vec![HealthStatusEntry::new(
                self.clock.now(),
                health.status_for(&event.host),
            )])?,
        );
        document.data = Value::Object(data);

        match document.to_value()? {
            Value::Object(document) => Ok(document),
            _ => bail!("Health document did not serialize to an object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock() -> Clock {
        Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
    }

    fn event(data: Value) -> anyhow::Result<EventDocument> {
        let mut event: EventDocument = serde_json::from_value(json!({
            "appId": "app",
            "project": "billing",
            "lifecycle": "dev",
            "category": "/csap/health",
            "host": "h1",
            "counter": 1,
            "data": data
        }))?;
        event.stamp(clock().now());
        Ok(event)
    }

    fn healthy() -> anyhow::Result<EventDocument> {
        event(json!({"Healthy": true, "vm": {"loadbalancerUrl": "http://lb"}}))
    }

    fn failing(errors: &[&str]) -> anyhow::Result<EventDocument> {
        event(json!({"Healthy": false, "errors": {"h1": errors}}))
    }

    fn tracker(store: Arc<MemoryStore>, max_changes_per_day: usize) -> HealthTracker {
        let settings = HealthSettings {
            max_changes_per_day,
            ..HealthSettings::default()
        };
        HealthTracker::new(store, settings, clock())
    }

    fn health_data(store: &MemoryStore) -> HealthData {
        let documents = store.documents(Collection::Events);
        assert_eq!(1, documents.len());
        HealthData::from_document(&documents[0])
    }

    #[tokio::test]
    async fn first_event_creates_the_document() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), 21);

        assert_eq!(HealthTransition::Created, tracker.record(&healthy()?).await?);

        let documents = store.documents(Collection::Events);
        let document = &documents[0];
        assert_eq!(json!("/csap/reports/health"), document["category"]);
        assert_eq!(json!("2024-03-05"), document["createdOn"]["date"]);
        assert_eq!(None, document.get("counter"));
        assert_eq!(None, document["data"].get("Healthy"));
        assert_eq!(json!("http://lb"), document["data"]["vm"]["loadbalancerUrl"]);
        assert_eq!(
            json!([{"time": "10:00:00", "status": ["Success"]}]),
            document["data"]["healthStatus"]
        );
        assert_eq!(json!(0), document["data"]["UnHealthyEventCount"]);
        Ok(())
    }

    #[tokio::test]
    async fn changes_append_and_errors_count() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), 21);

        tracker.record(&healthy()?).await?;
        assert_eq!(HealthTransition::Unchanged, tracker.record(&healthy()?).await?);
        assert_eq!(
            HealthTransition::Appended,
            tracker.record(&failing(&["disk full"])?).await?
        );
        // Same rendered length as the previous status.
        assert_eq!(
            HealthTransition::Counted,
            tracker.record(&failing(&["cpu spike"])?).await?
        );

        let data = health_data(&store);
        assert_eq!(2, data.health_status.len());
        assert_eq!(vec!["disk full".to_string()], data.health_status[1].status);
        assert_eq!(2, data.unhealthy_event_count);
        Ok(())
    }

    #[tokio::test]
    async fn lists_compare_by_their_unquoted_rendering() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), 21);

        tracker.record(&failing(&["a", "b"])?).await?;
        // `[a, b]` and `[abcde]` differ in length once rendered.
        assert_eq!(
            HealthTransition::Appended,
            tracker.record(&failing(&["abcde"])?).await?
        );
        assert_eq!(
            HealthTransition::Counted,
            tracker.record(&failing(&["ab", "c"])?).await?
        );

        let data = health_data(&store);
        assert_eq!(2, data.health_status.len());
        assert_eq!(3, data.unhealthy_event_count);
        Ok(())
    }

    #[tokio::test]
    async fn history_is_capped() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), 3);

        tracker.record(&healthy()?).await?;
        for change in 0..4 {
            let error = "x".repeat(change + 1);
            tracker.record(&failing(&[error.as_str()])?).await?;
        }

        let data = health_data(&store);
        assert_eq!(3, data.health_status.len());
        assert_eq!(4, data.unhealthy_event_count);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_events_keep_every_change() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(tracker(store.clone(), 21));
        tracker.record(&healthy()?).await?;

        let events = vec![failing(&["a"])?, failing(&["bb"])?];
        let handles = events
            .into_iter()
            .map(|event| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.record(&event).await })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await??;
        }

        let data = health_data(&store);
        assert_eq!(2, data.unhealthy_event_count);
        assert!(data.health_status.len() >= 2);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_lifecycles_are_skipped() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let settings = HealthSettings {
            disabled_lifecycles: vec!["DEV".to_string()],
            ..HealthSettings::default()
        };
        let tracker = HealthTracker::new(store.clone(), settings, clock());

        assert_eq!(HealthTransition::Disabled, tracker.record(&healthy()?).await?);
        assert!(store.is_empty(Collection::Events));
        Ok(())
    }
}
