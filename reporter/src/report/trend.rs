//! Category and host trend reports, with the optional hourly breakdown of today.

use anyhow::Context;
use futures::future::join_all;
use serde_json::Value;
use trends_model::fields;
use trends_model::query::{GroupingMode, MetricsReportKey, TrendingQuery};

use super::{envelope, or_empty, Reporter};
use crate::pipeline::{host, trending};
use crate::ranker::{allow_list, RankQuery};
use crate::timeseries::{reduce_using_samples, Reduction};

const HOST_COLLECTION: &str = "host_30";

/// Where the hourly samples of a trend's first metric are read from.
#[derive(Debug, Clone, PartialEq)]
struct HourlySource {
    collection_id: String,
    services: Vec<String>,
    /// Attribute holding the samples.
    attribute: String,
    /// Prefix of the per-service attributes summed when `attribute` is absent.
    service_prefix: String,
    /// Row field the samples are written to.
    field: String,
}

impl HourlySource {
    fn for_category(query: &TrendingQuery) -> Option<Self> {
        let metric = query.metrics.first()?;
        let service = query.services.names().first().cloned().unwrap_or_default();

        let (collection_id, attribute) = if query.category.contains("os-process") {
            ("os-process_30".to_string(), format!("{metric}_{service}"))
        } else if query.category.contains("java") {
            ("java_30".to_string(), format!("{metric}_{service}"))
        } else {
            (format!("application-{service}_30"), metric.clone())
        };

        Some(Self {
            collection_id,
            services: if service.is_empty() { Vec::new() } else { vec![service] },
            attribute,
            service_prefix: metric.clone(),
            field: metric.clone(),
        })
    }

    fn for_host(query: &TrendingQuery) -> Option<Self> {
        let metric = query.metrics.first()?;
        let attribute = host_attribute(metric);

        Some(Self {
            collection_id: HOST_COLLECTION.to_string(),
            services: Vec::new(),
            service_prefix: attribute.clone(),
            attribute,
            field: metric.clone(),
        })
    }
}

/// The `host_30` attribute sampled for a host daily report metric.
pub fn host_attribute(metric: &str) -> String {
    match metric {
        "totalCpuTestTime" => "cpuTest".to_string(),
        "threadsTotal" => "totalThreads".to_string(),
        "totalDiskTestTime" => "diskTest".to_string(),
        _ => match metric.strip_prefix("total") {
            Some(rest) if !rest.is_empty() => {
                let mut chars = rest.chars();
                chars
                    .next()
                    .map(|first| first.to_lowercase().chain(chars).collect())
                    .unwrap_or_default()
            }
            _ => metric.to_string(),
        },
    }
}

/// Today's samples of one host, reduced to the daily point count.
#[derive(Debug, Clone, PartialEq)]
struct HostSamples {
    time_stamps: Vec<Value>,
    values: Vec<Value>,
}

/// Add `values` index by index into `sums`, or take them as the first addend when `sums` is
/// empty. Only integer series are added. Returns whether anything was added.
fn add_series(sums: &mut Vec<Value>, values: &[Value], name: &str) -> bool {
    if sums.is_empty() {
        sums.extend_from_slice(values);
        return false;
    }
    if !values.first().is_some_and(|v| v.is_i64() || v.is_u64()) {
        log::warn!("{name} is not an integer, skipping merge: {:?}", values.first());
        return false;
    }

    *sums = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let sum = value.as_i64().unwrap_or_default()
                + sums.get(i).and_then(Value::as_i64).unwrap_or_default();
            Value::from(sum)
        })
        .collect();
    true
}

impl Reporter {
    pub async fn category_trend(&self, query: &TrendingQuery) -> anyhow::Result<Value> {
        let mut rows = self
            .rows(&trending::category_trend(query, &self.clock))
            .await
            .with_context(|| format!("Trending {}", query.category))?;

        if query.wants_hourly() {
            if let Some(source) = HourlySource::for_category(query) {
                let host_rows = if query.by_host() {
                    rows.clone()
                } else {
                    self.rows(&trending::category_trend(&per_host(query), &self.clock))
                        .await?
                };
                self.splice_hours(query, &mut rows, &host_rows, &source).await;
            }
        }

        Ok(envelope(rows, self.trend_days_available(query).await?))
    }

    pub async fn try_category_trend(&self, query: &TrendingQuery) -> Value {
        or_empty("category trend", self.category_trend(query).await)
    }

    /// Host daily metrics, restricted to the top and low hosts when a ranking is requested.
    pub async fn host_trend(&self, query: &TrendingQuery) -> anyhow::Result<Value> {
        let hosts = allow_list(
            self.store.as_ref(),
            &RankQuery::host_metrics(query),
            query.top,
            query.low,
            &self.clock,
        )
        .await
        .context("Ranking hosts")?;

        let mut rows = self
            .rows(&host::host_trend(query, &self.clock, &hosts))
            .await
            .context("Host trend")?;

        if query.wants_hourly() {
            if let Some(source) = HourlySource::for_host(query) {
                let host_rows = if query.by_host() {
                    rows.clone()
                } else {
                    self.rows(&host::host_trend(&per_host(query), &self.clock, &hosts))
                        .await?
                };
                self.splice_hours(query, &mut rows, &host_rows, &source).await;
            }
        }

        Ok(envelope(rows, self.trend_days_available(query).await?))
    }

    pub async fn try_host_trend(&self, query: &TrendingQuery) -> Value {
        or_empty("host trend", self.host_trend(query).await)
    }

    /// Put today's samples of every host in `host_rows` onto the report rows.
    ///
    /// Per host rows each get their own host's samples. Otherwise the samples of every host are
    /// added up onto the first row, under the longest `timeStamp` seen.
    async fn splice_hours(
        &self,
        query: &TrendingQuery,
        rows: &mut [Value],
        host_rows: &[Value],
        source: &HourlySource,
    ) {
        let hosts: Vec<&str> = host_rows
            .iter()
            .filter_map(|row| row.get(fields::HOST)?.as_str())
            .collect();
        if hosts.first().map_or(true, |host| host.is_empty()) {
            log::info!(
                "{}: host data not available for report, services: {:?}, metric: {}",
                query.category,
                query.services.names(),
                source.field
            );
            return;
        }

        let samples = join_all(hosts.iter().map(|host| async move {
            let samples = self
                .host_samples(host, query, source)
                .await
                .map_err(|e| log::warn!("Failed loading metrics for {host}: {e:?}"))
                .ok();
            (*host, samples)
        }))
        .await;

        if query.by_host() {
            for row in rows.iter_mut() {
                let Some(row) = row.as_object_mut() else {
                    continue;
                };
                let host = row
                    .get(fields::HOST)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match samples.iter().find(|(h, _)| *h == host) {
                    Some((_, Some(samples))) => {
                        row.insert(
                            fields::TIME_STAMP.to_string(),
                            Value::from(samples.time_stamps.clone()),
                        );
                        row.insert(source.field.clone(), Value::from(samples.values.clone()));
                    }
                    Some((_, None)) => {}
                    None => log::warn!("No metrics for host: {host}"),
                }
            }
            return;
        }

        let mut longest = Vec::new();
        let mut sums = Vec::new();
        for (_, samples) in &samples {
            let Some(samples) = samples else { continue };
            if samples.time_stamps.len() > longest.len() {
                longest = samples.time_stamps.clone();
            }
            add_series(&mut sums, &samples.values, &source.field);
        }
        if let Some(first) = rows.first_mut().and_then(Value::as_object_mut) {
            first.insert(fields::TIME_STAMP.to_string(), Value::from(longest));
            first.insert(source.field.clone(), Value::from(sums));
        }
    }

    async fn host_samples(
        &self,
        host: &str,
        query: &TrendingQuery,
        source: &HourlySource,
    ) -> anyhow::Result<HostSamples> {
        let key = MetricsReportKey {
            host: host.to_string(),
            collection_id: source.collection_id.clone(),
            day_offset: query.date_offset,
            num_days: query.day_count(),
            services: source.services.clone(),
            app_id: query.app_id.clone(),
            lifecycle: query.lifecycle.clone(),
            pad_latest: false,
            show_days_from: false,
            bucket_size: 1,
            bucket_spacing: 0,
        };
        let report = self
            .build_metrics_report(&key)
            .await?
            .with_context(|| format!("No {} attributes", source.collection_id))?;

        let samples = self.settings.trend_samples_per_day;
        let series = |name: &str| report.data.get(name).and_then(Value::as_array);

        let time_stamps = series(fields::TIME_STAMP)
            .map(|values| reduce_using_samples(values, samples, Reduction::PassThrough))
            .unwrap_or_default();

        let (values, reduction) = match series(source.attribute.as_str()) {
            Some(values) => (values.clone(), Reduction::Average),
            None => {
                let mut sums = Vec::new();
                let mut summed = false;
                let pods = report
                    .attributes
                    .get(fields::SERVICES_AVAILABLE)
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str);
                for pod in pods {
                    let name = format!("{}_{pod}", source.service_prefix);
                    log::debug!("Loading pod data: {name}");
                    let values = series(name.as_str()).map(Vec::as_slice).unwrap_or_default();
                    summed |= add_series(&mut sums, values, &name);
                }
                let reduction = if summed {
                    Reduction::Total
                } else {
                    Reduction::Average
                };
                (sums, reduction)
            }
        };

        Ok(HostSamples {
            time_stamps,
            values: reduce_using_samples(&values, samples, reduction),
        })
    }
}

fn per_host(query: &TrendingQuery) -> TrendingQuery {
    TrendingQuery {
        grouping: GroupingMode::PerHost,
        ..query.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::report::tests::clock;
    use crate::report::ReportSettings;
    use crate::store::{Collection, MemoryStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use trends_model::query::ServiceFilter;

    #[test]
    fn host_attribute_names() {
        assert_eq!("cpuTest", host_attribute("totalCpuTestTime"));
        assert_eq!("totalThreads", host_attribute("threadsTotal"));
        assert_eq!("diskTest", host_attribute("totalDiskTestTime"));
        assert_eq!("usrCpu", host_attribute("totalUsrCpu"));
        assert_eq!("total", host_attribute("total"));
        assert_eq!("alertsCount", host_attribute("alertsCount"));
    }

    #[test]
    fn category_sources() {
        let mut query = TrendingQuery::new("/csap/reports/os-process/daily");
        query.metrics = vec!["topCpu".to_string()];
        query.services = ServiceFilter::parse(Some("billing"));
        let source = HourlySource::for_category(&query);
        assert_eq!(
            Some(("os-process_30", "topCpu_billing")),
            source
                .as_ref()
                .map(|s| (s.collection_id.as_str(), s.attribute.as_str()))
        );

        query.category = "/csap/reports/application/daily".to_string();
        let source = HourlySource::for_category(&query);
        assert_eq!(
            Some(("application-billing_30", "topCpu")),
            source
                .as_ref()
                .map(|s| (s.collection_id.as_str(), s.attribute.as_str()))
        );

        query.metrics.clear();
        assert_eq!(None, HourlySource::for_category(&query));
    }

    #[test]
    fn adds_integer_series_only() {
        let mut sums = Vec::new();
        assert!(!add_series(&mut sums, &[json!(1), json!(2)], "a"));
        assert!(add_series(&mut sums, &[json!(3), json!(4), json!(5)], "a"));
        assert_eq!(vec![json!(4), json!(6), json!(5)], sums);
        assert!(!add_series(&mut sums, &[json!(1.5)], "a"));
        assert_eq!(vec![json!(4), json!(6), json!(5)], sums);
    }

    fn seed_host(store: &MemoryStore, host: &str, values: Value) {
        let now = clock().now().timestamp_millis();
        store.seed(
            Collection::MetricsAttributes,
            vec![json!({
                "hostName": host,
                "id": "os-process_30",
                "graphs": {"cpu": {"topCpu_billing": "Billing"}},
                "servicesAvailable": ["billing"],
                "createdOn": {"date": "2024-03-05", "time": "08:00:00", "unixMs": now, "lastUpdatedOn": now - 1000}
            })],
        );
        store.seed(
            Collection::MetricsData,
            vec![json!({
                "attributes": {"hostName": host, "id": "os-process_30"},
                "createdOn": {"date": "2024-03-05", "time": "09:00:00", "unixMs": now, "mongoDate": now - 1000, "lastUpdatedOn": now - 1000},
                "data": {"timeStamp": [4, 3, 2, 1], "topCpu_billing": values}
            })],
        );
    }

    fn hourly_reporter(store: MemoryStore) -> Reporter {
        Reporter::new(
            Arc::new(store),
            ResponseCache::new(4, Duration::from_secs(60)),
            clock(),
            ReportSettings {
                trend_samples_per_day: 2,
            },
        )
    }

    fn hourly_query(grouping: GroupingMode) -> TrendingQuery {
        TrendingQuery {
            metrics: vec!["topCpu".to_string()],
            services: ServiceFilter::parse(Some("billing")),
            num_days: -1,
            grouping,
            ..TrendingQuery::new("/csap/reports/os-process/daily")
        }
    }

    #[tokio::test]
    async fn splices_each_hosts_samples() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        seed_host(&store, "h1", json!([10, 20, 30, 40]));
        let reporter = hourly_reporter(store);
        let query = hourly_query(GroupingMode::PerHost);
        let source = HourlySource::for_category(&query).context("source")?;

        let mut rows = vec![
            json!({"host": "h1", "date": ["2024-03-05"], "topCpu": [7]}),
            json!({"host": "h9", "date": ["2024-03-05"], "topCpu": [1]}),
        ];
        let host_rows = rows.clone();
        reporter.splice_hours(&query, &mut rows, &host_rows, &source).await;

        assert_eq!(json!([3, 1]), rows[0]["timeStamp"]);
        assert_eq!(json!([15.0, 35.0]), rows[0]["topCpu"]);
        assert_eq!(json!({"host": "h9", "date": ["2024-03-05"], "topCpu": [1]}), rows[1]);
        Ok(())
    }

    #[tokio::test]
    async fn merged_hosts_land_on_the_first_row() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        seed_host(&store, "h1", json!([10, 20, 30, 40]));
        seed_host(&store, "h2", json!([1, 1, 1, 1]));
        let reporter = hourly_reporter(store);
        let query = hourly_query(GroupingMode::PerLifecycleAggregate);
        let source = HourlySource::for_category(&query).context("source")?;

        let mut rows = vec![json!({"appId": "a", "date": ["2024-03-05"], "topCpu": [7]})];
        let host_rows = vec![json!({"host": "h1"}), json!({"host": "h2"})];
        reporter.splice_hours(&query, &mut rows, &host_rows, &source).await;

        // Averages are not integers, so only the first host's samples are kept.
        assert_eq!(json!([3, 1]), rows[0]["timeStamp"]);
        assert_eq!(json!([15.0, 35.0]), rows[0]["topCpu"]);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_to_splice_without_hosts() -> anyhow::Result<()> {
        let reporter = hourly_reporter(MemoryStore::new());
        let query = hourly_query(GroupingMode::PerLifecycleAggregate);
        let source = HourlySource::for_category(&query).context("source")?;

        let mut rows = vec![json!({"appId": "a"})];
        reporter
            .splice_hours(&query, &mut rows, &[json!({"appId": "a"})], &source)
            .await;
        assert_eq!(vec![json!({"appId": "a"})], rows);
        Ok(())
    }
}
