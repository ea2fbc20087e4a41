//! Report builders.
//!
//! Every report is built by a fallible method returning [anyhow::Result] and exposed through a
//! `try_` wrapper that logs the failure and degrades to an empty report, so that one broken
//! query never takes a dashboard down.

pub mod health;
pub mod metrics;
pub mod summary;
pub mod trend;

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Map, Value};
use trends_model::fields;
use trends_model::query::{non_blank, TrendingQuery};

use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::normalize;
use crate::pipeline::summary::earliest_document;
use crate::pipeline::{Filter, Pipeline};
use crate::store::{Collection, Store};

pub use metrics::MetricsReport;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Points per day in the hourly breakdown of a trend report.
    pub trend_samples_per_day: i64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            trend_samples_per_day: 48,
        }
    }
}

/// Builds every report from one store.
pub struct Reporter {
    store: Arc<dyn Store>,
    cache: ResponseCache,
    clock: Clock,
    settings: ReportSettings,
}

impl Reporter {
    pub fn new(
        store: Arc<dyn Store>,
        cache: ResponseCache,
        clock: Clock,
        settings: ReportSettings,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            settings,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Whole days between now and the oldest document of `collection` matching `filter`.
    ///
    /// 0 when nothing matches.
    pub async fn num_days_available(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> anyhow::Result<i64> {
        let earliest = self
            .store
            .find_one(collection, &earliest_document(filter))
            .await
            .context("Finding the earliest document")?;

        let Some(earliest) = earliest
            .as_ref()
            .and_then(|document| document.get(fields::CREATED_ON)?.get(fields::MONGO_DATE)?.as_i64())
        else {
            return Ok(0);
        };
        log::debug!("Earliest document from {earliest}");

        Ok((self.clock.now().timestamp_millis() - earliest).max(0) / MS_PER_DAY)
    }

    /// Rows of `pipeline` run over the events.
    async fn rows(&self, pipeline: &Pipeline) -> anyhow::Result<Vec<Value>> {
        Ok(self.store.execute(Collection::Events, pipeline).await?)
    }

    /// Days of data behind a trending report, or `None` unless the query names an appId, project
    /// and lifecycle.
    async fn trend_days_available(&self, query: &TrendingQuery) -> anyhow::Result<Option<i64>> {
        if !query.is_fully_scoped() {
            return Ok(None);
        }

        let mut filter = normalize::scope_filter(
            query.app_id.as_deref(),
            query.project.as_deref(),
            query.lifecycle.as_deref(),
            Some(query.category.as_str()),
        );
        if let [service] = query.services.names() {
            if let Some(service) = non_blank(Some(service)) {
                filter = filter.and(Filter::elem_match(
                    fields::DATA_SUMMARY,
                    Filter::eq(fields::SERVICE_NAME, service),
                ));
            }
        }

        Ok(Some(self.num_days_available(Collection::Events, filter).await?))
    }
}

/// `{data, numDaysAvailable?}`
pub fn envelope(data: Vec<Value>, num_days_available: Option<i64>) -> Value {
    let mut report = Map::new();
    report.insert(fields::DATA.to_string(), Value::Array(data));
    if let Some(days) = num_days_available {
        report.insert(fields::NUM_DAYS_AVAILABLE.to_string(), Value::from(days));
    }
    Value::Object(report)
}

/// The report returned when building one failed.
pub fn empty_report() -> Value {
    json!({ "data": [] })
}

/// Log a failed report and fall back to [empty_report].
fn or_empty(name: &str, report: anyhow::Result<Value>) -> Value {
    report.unwrap_or_else(|e| {
        log::warn!("Failed to build {name} report: {e:?}");
        empty_report()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    pub(crate) fn clock() -> Clock {
        Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
    }

    pub(crate) fn reporter(store: MemoryStore) -> Reporter {
        Reporter::new(
            Arc::new(store),
            ResponseCache::new(16, Duration::from_secs(60)),
            clock(),
            ReportSettings::default(),
        )
    }

    #[test]
    fn envelope_shape() {
        assert_eq!(json!({"data": [1]}), envelope(vec![json!(1)], None));
        assert_eq!(
            json!({"data": [], "numDaysAvailable": 3}),
            envelope(Vec::new(), Some(3))
        );
    }

    #[tokio::test]
    async fn counts_whole_days_since_the_earliest_document() -> anyhow::Result<()> {
        let now = clock().now().timestamp_millis();
        let store = MemoryStore::new();
        store.seed(
            Collection::Events,
            vec![
                json!({"appId": "a", "createdOn": {"date": "2024-03-03", "mongoDate": now - 2 * MS_PER_DAY - 5}}),
                json!({"appId": "a", "createdOn": {"date": "2024-03-01", "mongoDate": now - 4 * MS_PER_DAY + 5}}),
                json!({"appId": "b", "createdOn": {"date": "2024-01-01", "mongoDate": 0}}),
            ],
        );
        let reporter = reporter(store);

        assert_eq!(
            3,
            reporter
                .num_days_available(Collection::Events, Filter::eq(fields::APP_ID, "a"))
                .await?
        );
        assert_eq!(
            0,
            reporter
                .num_days_available(Collection::Events, Filter::eq(fields::APP_ID, "c"))
                .await?
        );
        Ok(())
    }
}
