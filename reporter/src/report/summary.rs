use anyhow::Context;
use serde_json::Value;
use trends_model::category;
use trends_model::query::non_blank;

use super::{envelope, or_empty, Reporter};
use crate::pipeline::summary::{
    host_summary, latest_report, report_keys, service_summary, SummaryQuery,
    DEFAULT_ATTRIBUTES_SERVICE,
};
use crate::store::Collection;

impl Reporter {
    /// Per service totals over the window. `detail` breaks each service down per host.
    ///
    /// The attributes summed are those of the latest uploaded report, so attributes added or
    /// removed by an upgrade follow automatically.
    pub async fn summary_report(&self, query: &SummaryQuery, detail: bool) -> anyhow::Result<Value> {
        let service = match non_blank(query.service.as_deref()) {
            Some(service) => Some(service),
            None if !detail => Some(DEFAULT_ATTRIBUTES_SERVICE),
            None => None,
        };
        let keys = self.report_keys(query, service).await?;
        log::debug!("{} summary of {keys:?}", query.category);

        let pipeline = if query.category.eq_ignore_ascii_case(category::HOST_DAILY_REPORT) {
            host_summary(query, &self.clock, &keys)
        } else {
            service_summary(query, &self.clock, &keys, detail)
        };
        let rows = self
            .rows(&pipeline)
            .await
            .with_context(|| format!("Summarizing {}", query.category))?;

        Ok(envelope(rows, None))
    }

    pub async fn try_summary_report(&self, query: &SummaryQuery, detail: bool) -> Value {
        or_empty("summary", self.summary_report(query, detail).await)
    }

    async fn report_keys(
        &self,
        query: &SummaryQuery,
        service: Option<&str>,
    ) -> anyhow::Result<Vec<String>> {
        // Host reports hold one summary object, not a per-service list.
        let service = service.filter(|_| !query.category.eq_ignore_ascii_case(category::HOST_DAILY_REPORT));

        let latest = self
            .store
            .find_one(Collection::Events, &latest_report(query, service))
            .await
            .context("Finding the latest report")?;

        let keys = latest.and_then(|document| report_keys(&document, service));
        if keys.is_none() {
            log::warn!(
                "No {} report holding {} to take attributes from",
                query.category,
                service.unwrap_or("any service")
            );
        }
        Ok(keys.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::reporter;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn report(host: &str, date: &str, updated: i64, summary: Value) -> Value {
        json!({
            "appId": "app",
            "project": "billing",
            "lifecycle": "dev",
            "category": "/csap/reports/os-process/daily",
            "host": host,
            "createdOn": {"date": date, "lastUpdatedOn": updated},
            "data": {"summary": summary}
        })
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            Collection::Events,
            vec![
                report(
                    "h1",
                    "2024-03-05",
                    2,
                    json!([
                        {"serviceName": "csap-agent", "topCpu": 2, "threadsAvg": 10},
                        {"serviceName": "search", "topCpu": 5, "threadsAvg": 20}
                    ]),
                ),
                report(
                    "h2",
                    "2024-03-05",
                    1,
                    json!([
                        {"serviceName": "csap-agent", "topCpu": 4, "threadsAvg": 30},
                        {"serviceName": "search", "topCpu": 1, "threadsAvg": 40}
                    ]),
                ),
            ],
        );
        store
    }

    fn query() -> SummaryQuery {
        SummaryQuery {
            app_id: Some("app".to_string()),
            category: "/csap/reports/os-process/daily".to_string(),
            num_days: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sums_and_averages_per_service() -> anyhow::Result<()> {
        let reporter = reporter(store());
        let query = SummaryQuery {
            service: Some("search".to_string()),
            ..query()
        };

        let report = reporter.summary_report(&query, false).await?;

        assert_eq!(
            json!({"data": [{
                "appId": "app",
                "lifecycle": "dev",
                "project": "billing",
                "serviceName": "search",
                "topCpu": 6,
                "threadsAvg": 30.0
            }]}),
            report
        );
        Ok(())
    }

    #[tokio::test]
    async fn detail_rows_per_host() -> anyhow::Result<()> {
        let reporter = reporter(store());
        let query = SummaryQuery {
            service: Some("csap-agent".to_string()),
            ..query()
        };

        let report = reporter.summary_report(&query, true).await?;
        let rows = report["data"].as_array().cloned().unwrap_or_default();

        assert_eq!(2, rows.len());
        assert!(rows.iter().all(|row| row["serviceName"] == "csap-agent"));
        let mut hosts: Vec<_> = rows.iter().filter_map(|row| row["host"].as_str()).collect();
        hosts.sort_unstable();
        assert_eq!(vec!["h1", "h2"], hosts);
        Ok(())
    }

    #[tokio::test]
    async fn missing_attributes_sum_nothing() -> anyhow::Result<()> {
        let reporter = reporter(store());
        let query = SummaryQuery {
            service: Some("mail".to_string()),
            ..query()
        };

        let report = reporter.summary_report(&query, false).await?;
        assert_eq!(json!({"data": []}), report);
        Ok(())
    }
}
