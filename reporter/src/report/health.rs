use anyhow::Context;
use serde_json::Value;
use trends_model::query::TrendingQuery;

use super::{envelope, or_empty, Reporter};
use crate::pipeline::health::health_trend;
use crate::ranker::{allow_list, RankQuery};

impl Reporter {
    /// Unhealthy event counts per day, for the hosts with the most or fewest when asked.
    pub async fn health_report(&self, query: &TrendingQuery) -> anyhow::Result<Value> {
        let hosts = allow_list(
            self.store.as_ref(),
            &RankQuery::unhealthy_events(query),
            query.top,
            query.low,
            &self.clock,
        )
        .await
        .context("Ranking unhealthy hosts")?;
        log::debug!("Health report hosts: {hosts:?}");

        let rows = self
            .rows(&health_trend(query, &self.clock, &hosts))
            .await
            .context("Health report")?;

        Ok(envelope(rows, self.trend_days_available(query).await?))
    }

    pub async fn try_health_report(&self, query: &TrendingQuery) -> Value {
        or_empty("health", self.health_report(query).await)
    }
}

#[cfg(test)]
mod tests {
    use crate::report::tests::reporter;
    use crate::store::{Collection, MemoryStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use trends_model::category::HEALTH_REPORT;
    use trends_model::query::{GroupingMode, TrendingQuery};

    fn health(host: &str, date: &str, count: i64) -> serde_json::Value {
        json!({
            "appId": "app",
            "project": "billing",
            "lifecycle": "dev",
            "category": HEALTH_REPORT,
            "host": host,
            "createdOn": {"date": date},
            "data": {"UnHealthyEventCount": count}
        })
    }

    #[tokio::test]
    async fn most_unhealthy_host_per_day() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.seed(
            Collection::Events,
            vec![
                health("h1", "2024-03-04", 1),
                health("h2", "2024-03-04", 5),
                health("h1", "2024-03-05", 2),
                health("h2", "2024-03-05", 3),
                health("h3", "2024-03-05", 4),
            ],
        );
        let reporter = reporter(store);
        let query = TrendingQuery {
            num_days: 2,
            top: 1,
            grouping: GroupingMode::PerHost,
            ..TrendingQuery::new(HEALTH_REPORT)
        };

        let report = reporter.health_report(&query).await?;

        assert_eq!(
            json!({"data": [{
                "appId": "app",
                "lifecycle": "dev",
                "project": "billing",
                "date": ["2024-03-04", "2024-03-05"],
                "UnHealthyCount": [5, 3],
                "host": "h2"
            }]}),
            report
        );
        Ok(())
    }
}
