//! Graph data of one host's metrics collection over a window of days.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use trends_model::fields;
use trends_model::metrics::{CollectionId, MetricsAttributeDocument, MetricsAttributes, MetricsDataDocument};
use trends_model::query::MetricsReportKey;

use super::Reporter;
use crate::normalize::metrics_window;
use crate::pipeline::filter::inclusive;
use crate::pipeline::summary::{top_services, TOP_SERVICES};
use crate::pipeline::{Filter, FindQuery};
use crate::store::Collection;
use crate::timeseries::{
    bucket_sample, map_series, merge_documents, pad_latest, GraphData, PaddingRequest,
};

/// Services graphed when none are requested.
const MAX_DEFAULT_SERVICES: usize = 5;

const MISSING_ATTRIBUTES: &str = "Error getting data";

/// Graph attributes and the merged series they describe.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    pub attributes: Map<String, Value>,
    pub data: GraphData,
}

impl MetricsReport {
    /// `{attributes, data}`, or the error report when there were no attributes to graph.
    pub fn render(report: Option<&MetricsReport>) -> String {
        match report {
            Some(report) => json!({
                "attributes": report.attributes,
                "data": report.data,
            })
            .to_string(),
            None => json!({ "error": MISSING_ATTRIBUTES }).to_string(),
        }
    }
}

impl Reporter {
    /// The rendered report for `key`, from the response cache when it holds one.
    pub async fn metrics_report(&self, key: &MetricsReportKey) -> anyhow::Result<String> {
        self.cache
            .get_or_try_insert_with(key.fingerprint(), || async {
                let report = self.build_metrics_report(key).await?;
                Ok(MetricsReport::render(report.as_ref()))
            })
            .await
    }

    pub async fn try_metrics_report(&self, key: &MetricsReportKey) -> String {
        self.metrics_report(key).await.unwrap_or_else(|e| {
            log::warn!("Failed to build metrics report for {} {}: {e:?}", key.host, key.collection_id);
            MetricsReport::render(None)
        })
    }

    /// Build the report without consulting the cache. `None` when the host has never uploaded
    /// attributes for the collection.
    pub async fn build_metrics_report(
        &self,
        key: &MetricsReportKey,
    ) -> anyhow::Result<Option<MetricsReport>> {
        let id: CollectionId = key.collection_id.parse()?;
        log::debug!(
            "Building {id} report for {}, {} days from offset {}",
            key.host,
            key.num_days,
            key.day_offset
        );

        let Some(attributes) = self.find_attributes(key, &id).await? else {
            log::warn!(
                "Verify event publication on host {}: no attributes for {id}, offset {}, {} days",
                key.host,
                key.day_offset,
                key.num_days
            );
            return Ok(None);
        };

        let num_days_available = self
            .num_days_available(
                Collection::MetricsData,
                Filter::eq(fields::ATTRIBUTES_HOST_NAME, key.host.as_str()),
            )
            .await?;
        let attributes = self.filter_graph_attributes(&id, &key.services, attributes, &key.host).await?;
        let names = attributes.data_point_names();
        log::debug!("Data will be filtered to {names:?}");

        let documents = self.find_metrics_data(key, &id).await?;
        let mut merged = merge_documents(documents, &names, id.capacity_for_days(key.num_days));
        merged.mismatches.log(&key.host, &key.collection_id);

        if key.pad_latest {
            let request = PaddingRequest {
                host: &key.host,
                collection_id: &id,
                app_id: key.app_id.as_deref().unwrap_or_default(),
                lifecycle: key.lifecycle.as_deref(),
                date_offset: key.day_offset,
                latest_mongo_date: merged.latest_mongo_date,
                names: &names,
            };
            let outcome = pad_latest(self.store.as_ref(), &request, &mut merged.data).await?;
            log::debug!("Padding {id} for {}: {outcome:?}", key.host);
        }

        if key.uses_buckets() {
            map_series(&mut merged.data, |values| {
                bucket_sample(values, key.bucket_size, key.bucket_spacing)
            });
        }

        let mut attributes = match serde_json::to_value(&attributes)? {
            Value::Object(attributes) => attributes,
            _ => Map::new(),
        };
        attributes.insert(
            fields::NUM_DAYS_AVAILABLE.to_string(),
            Value::from(num_days_available),
        );

        Ok(Some(MetricsReport {
            attributes,
            data: merged.data,
        }))
    }

    /// The attributes describing the request's window.
    ///
    /// A day may hold no upload, so the window is tried at successive offsets until one lists
    /// every requested service. The last attributes found are used even if a service is missing.
    async fn find_attributes(
        &self,
        key: &MetricsReportKey,
        id: &CollectionId,
    ) -> anyhow::Result<Option<MetricsAttributes>> {
        let mut found = None;
        let by_prefix = id.matches_services_by_prefix();

        for attempt in 0..key.num_days {
            let offset = key.day_offset.saturating_add_unsigned(attempt);
            let Some(document) = self.attributes_for_day(key, offset).await? else {
                continue;
            };
            let document: MetricsAttributeDocument = serde_json::from_value(document)
                .with_context(|| format!("Invalid {id} attributes for {}", key.host))?;
            let mut attributes = document.attributes;
            attributes.extra.remove(fields::ID);
            attributes.extra.remove(fields::EXPIRES_AT);

            let complete = attributes.has_services(&key.services, by_prefix);
            found = Some(attributes);
            if complete {
                return Ok(found);
            }
        }

        if found.is_some() {
            log::warn!("{id} services requested not found on day requested: {:?}", key.services);
        }
        Ok(found)
    }

    /// The latest attributes uploaded in the window ending `offset` days ago, or the latest
    /// uploaded at all when the window holds none.
    async fn attributes_for_day(
        &self,
        key: &MetricsReportKey,
        offset: i32,
    ) -> anyhow::Result<Option<Value>> {
        let identity = Filter::eq(fields::HOST_NAME, key.host.as_str())
            .and(Filter::eq(fields::COLLECTION_ID, key.collection_id.as_str()));

        // Attributes are only uploaded on restarts and changes, so look one day further back
        // than the data does.
        let window_offset = if offset > 0 && !key.show_days_from {
            offset + 1
        } else {
            offset
        };
        let (from, to) = metrics_window(self.clock.now(), key.num_days, window_offset, key.show_days_from);

        let in_window = FindQuery::new(identity.clone().and(updated_between(from, to)))
            .sort(fields::CREATED_ON_LAST_UPDATED, -1);
        if let Some(document) = self.store.find_one(Collection::MetricsAttributes, &in_window).await? {
            return Ok(Some(document));
        }

        log::warn!("{}: did not find attributes in date range, using latest", key.collection_id);
        let latest = FindQuery::new(identity).sort(fields::CREATED_ON_LAST_UPDATED, -1);
        Ok(self.store.find_one(Collection::MetricsAttributes, &latest).await?)
    }

    /// Narrow per-service graphs down to the requested services, or to the host's busiest ones.
    async fn filter_graph_attributes(
        &self,
        id: &CollectionId,
        requested: &[String],
        mut attributes: MetricsAttributes,
        host: &str,
    ) -> anyhow::Result<MetricsAttributes> {
        if !id.is_service_filtered() {
            return Ok(attributes);
        }

        let services = if requested.is_empty() {
            let mut busiest = self.top_services(host).await?;
            if busiest.is_empty() {
                busiest = attributes.services_available.clone();
            }
            busiest.truncate(MAX_DEFAULT_SERVICES);
            busiest
        } else {
            requested.to_vec()
        };

        if !services.is_empty() {
            attributes.retain_graphs_for(&services);
            attributes
                .extra
                .insert(fields::SERVICES_REQUESTED.to_string(), Value::from(services));
        }
        Ok(attributes)
    }

    /// Services running on `host` today, busiest first.
    pub async fn top_services(&self, host: &str) -> anyhow::Result<Vec<String>> {
        let rows = self
            .store
            .execute(Collection::Events, &top_services(host, &self.clock))
            .await
            .with_context(|| format!("Finding top services of {host}"))?;

        let services: Vec<String> = rows
            .first()
            .and_then(|row| row.get(TOP_SERVICES)?.as_array())
            .map(|services| {
                services
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if services.is_empty() {
            log::warn!("No top services reported today for {host}");
        }
        Ok(services)
    }

    /// The window's data documents, most recently updated first.
    async fn find_metrics_data(
        &self,
        key: &MetricsReportKey,
        id: &CollectionId,
    ) -> anyhow::Result<Vec<MetricsDataDocument>> {
        let (from, to) = metrics_window(self.clock.now(), key.num_days, key.day_offset, key.show_days_from);
        let query = FindQuery::new(
            Filter::eq(fields::ATTRIBUTES_HOST_NAME, key.host.as_str())
                .and(Filter::eq(fields::ATTRIBUTES_ID, key.collection_id.as_str()))
                .and(updated_between(from, to)),
        )
        .sort(fields::CREATED_ON_LAST_UPDATED, -1)
        .project(&[fields::DATA, fields::CREATED_ON]);

        let documents = self
            .store
            .find(Collection::MetricsData, &query)
            .await
            .with_context(|| format!("Loading {id} data for {}", key.host))?;

        documents
            .into_iter()
            .map(|document| {
                serde_json::from_value(document)
                    .with_context(|| format!("Invalid {id} data document for {}", key.host))
            })
            .collect()
    }
}

fn updated_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Filter {
    Filter::range(
        fields::CREATED_ON_LAST_UPDATED,
        Some(inclusive(from.timestamp_millis())),
        Some(inclusive(to.timestamp_millis())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::{clock, reporter};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn key(collection_id: &str) -> MetricsReportKey {
        MetricsReportKey {
            host: "h1".to_string(),
            collection_id: collection_id.to_string(),
            num_days: 2,
            ..Default::default()
        }
    }

    fn store() -> MemoryStore {
        let now = clock().now().timestamp_millis();
        let store = MemoryStore::new();
        store.seed(
            Collection::MetricsAttributes,
            vec![
                json!({
                    "hostName": "h1",
                    "id": "os-process_30",
                    "graphs": {
                        "cpu": {"topCpu_billing": "Billing", "topCpu_search": "Search", "topCpu_mail": "Mail"},
                        "threads": {"threads_billing": "Billing", "attributes_max": 10}
                    },
                    "servicesAvailable": ["billing", "search", "mail"],
                    "createdOn": {"date": "2024-03-05", "time": "08:00:00", "unixMs": now - 2 * HOUR_MS, "lastUpdatedOn": now - 2 * HOUR_MS}
                }),
                json!({
                    "hostName": "h1",
                    "id": "host_30",
                    "graphs": {"cpu": {"usrCpu": "User"}},
                    "createdOn": {"date": "2024-02-01", "time": "08:00:00", "unixMs": 0, "lastUpdatedOn": 0}
                }),
            ],
        );
        store.seed(
            Collection::MetricsData,
            vec![
                json!({
                    "attributes": {"hostName": "h1", "id": "os-process_30"},
                    "createdOn": {"date": "2024-03-05", "time": "09:00:00", "unixMs": now - HOUR_MS, "mongoDate": now - HOUR_MS, "lastUpdatedOn": now - HOUR_MS},
                    "data": {"timeStamp": [4, 3], "topCpu_billing": [40, 30], "threads_billing": [2]}
                }),
                json!({
                    "attributes": {"hostName": "h1", "id": "os-process_30"},
                    "createdOn": {"date": "2024-03-04", "time": "09:00:00", "unixMs": now - 25 * HOUR_MS, "mongoDate": now - 25 * HOUR_MS, "lastUpdatedOn": now - 25 * HOUR_MS},
                    "data": {"timeStamp": [2, 1], "topCpu_billing": [20, 10], "threads_billing": [5, 4]}
                }),
            ],
        );
        store
    }

    #[tokio::test]
    async fn merges_the_requested_services() -> anyhow::Result<()> {
        let reporter = reporter(store());
        let key = MetricsReportKey {
            services: vec!["billing".to_string()],
            ..key("os-process_30")
        };

        let report = reporter
            .build_metrics_report(&key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no report"))?;

        assert_eq!(json!(["billing"]), report.attributes["servicesRequested"]);
        assert_eq!(
            json!({"topCpu_billing": "Billing"}),
            report.attributes["graphs"]["cpu"]
        );
        assert_eq!(json!(1), report.attributes["numDaysAvailable"]);
        assert_eq!(json!([4, 3, 2, 1]), report.data["timeStamp"]);
        assert_eq!(json!([40, 30, 20, 10]), report.data["topCpu_billing"]);
        assert_eq!(json!([2, 0, 5, 4]), report.data["threads_billing"]);
        assert!(report.data.get("topCpu_search").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn busiest_services_by_default() -> anyhow::Result<()> {
        let store = store();
        store.seed(
            Collection::Events,
            vec![json!({
                "host": "h1",
                "category": "/csap/reports/os-process/daily",
                "createdOn": {"date": "2024-03-05"},
                "data": {"summary": [
                    {"serviceName": "mail", "topCpu": 1},
                    {"serviceName": "search", "topCpu": 9}
                ]}
            })],
        );
        let reporter = reporter(store);

        assert_eq!(
            vec!["search".to_string(), "mail".to_string()],
            reporter.top_services("h1").await?
        );
        let report = reporter
            .build_metrics_report(&key("os-process_30"))
            .await?
            .ok_or_else(|| anyhow::anyhow!("no report"))?;
        assert_eq!(json!(["search", "mail"]), report.attributes["servicesRequested"]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_attributes_render_an_error() -> anyhow::Result<()> {
        let reporter = reporter(store());

        let rendered = reporter.metrics_report(&key("java_30")).await?;
        assert_eq!(json!({"error": "Error getting data"}).to_string(), rendered);
        Ok(())
    }

    #[tokio::test]
    async fn falls_back_to_the_latest_attributes() -> anyhow::Result<()> {
        let reporter = reporter(store());

        let report = reporter
            .build_metrics_report(&key("host_30"))
            .await?
            .ok_or_else(|| anyhow::anyhow!("no report"))?;
        assert!(report.attributes.get("servicesRequested").is_none());
        assert_eq!(json!({"cpu": {"usrCpu": "User"}}), report.attributes["graphs"]);
        assert!(report.data.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn rendered_reports_are_cached() -> anyhow::Result<()> {
        let reporter = reporter(store());
        let key = key("os-process_30");

        let first = reporter.metrics_report(&key).await?;
        assert_eq!(1, reporter.cache().len());
        assert_eq!(Some(first), reporter.cache().get(&key.fingerprint()));
        Ok(())
    }
}
