use anyhow::Context;
use serde_json::{Map, Value};
use trends_model::metrics::{CollectionId, MetricIntervals, MetricsDataDocument};
use trends_model::{category, fields};

use super::merge::{aligned_series, prepend, Mismatches};
use super::GraphData;
use crate::pipeline::{Filter, FindQuery};
use crate::store::{Collection, Store};

/// Finer samples are only fetched when they are newer than this past the merged data.
const FRESHNESS_MARGIN_MS: i64 = 10 * 60 * 1000;

/// What is needed to pad a merged series with the latest fine-grained samples.
#[derive(Debug, Clone)]
pub struct PaddingRequest<'a> {
    pub host: &'a str,
    pub collection_id: &'a CollectionId,
    pub app_id: &'a str,
    pub lifecycle: Option<&'a str>,
    pub date_offset: i32,
    /// `mongoDate` of the newest merged document.
    pub latest_mongo_date: Option<i64>,
    pub names: &'a [String],
}

/// Whether padding happened, and if not why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingOutcome {
    Padded,
    NotToday,
    NoLifecycle,
    AlreadyFinest,
    NothingNewer,
}

/// Prepend samples of the finest configured interval collected after the merged data.
///
/// Only applies to windows ending now, for collections coarser than the finest interval
/// configured in the latest model summary of the application lifecycle.
pub async fn pad_latest(
    store: &dyn Store,
    request: &PaddingRequest<'_>,
    merged: &mut GraphData,
) -> anyhow::Result<PaddingOutcome> {
    if request.date_offset != 0 {
        return Ok(PaddingOutcome::NotToday);
    }
    let Some(lifecycle) = request.lifecycle.filter(|l| !l.trim().is_empty()) else {
        log::warn!("Padding is being skipped because lifecycle was empty");
        return Ok(PaddingOutcome::NoLifecycle);
    };

    let intervals = configured_intervals(store, request.app_id, lifecycle).await?;
    let finest_id = match intervals.finest_for(request.collection_id) {
        Some(finest) if finest.interval() < request.collection_id.interval() => {
            CollectionId::new(request.collection_id.family(), finest.interval())
        }
        _ => return Ok(PaddingOutcome::AlreadyFinest),
    };

    // Without a merged mongoDate there is nothing to be newer than.
    let Some(latest_mongo_date) = request.latest_mongo_date else {
        return Ok(PaddingOutcome::NothingNewer);
    };
    let since = latest_mongo_date + FRESHNESS_MARGIN_MS;
    let query = FindQuery::new(
        Filter::eq(fields::ATTRIBUTES_HOST_NAME, request.host)
            .and(Filter::eq(fields::ATTRIBUTES_ID, finest_id.to_string()))
            .and(Filter::gt(fields::CREATED_ON_LAST_UPDATED, since)),
    )
    .sort(fields::CREATED_ON_LAST_UPDATED, -1);

    let documents = store
        .find(Collection::MetricsData, &query)
        .await
        .with_context(|| format!("Finding {finest_id} samples newer than {since}"))?;
    if documents.is_empty() {
        return Ok(PaddingOutcome::NothingNewer);
    }

    let mut latest = Map::new();
    for document in documents {
        let document: MetricsDataDocument = serde_json::from_value(document)?;
        for name in request.names {
            let Some(values) = document.series(name) else {
                continue;
            };
            if let Value::Array(series) = latest
                .entry(name.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                series.extend(values.iter().cloned());
            }
        }
    }

    let mut mismatches = Mismatches::default();
    let latest = aligned_series(&latest, request.names, &mut mismatches);
    mismatches.log(request.host, &finest_id.to_string());
    prepend(merged, latest);

    Ok(PaddingOutcome::Padded)
}

async fn configured_intervals(
    store: &dyn Store,
    app_id: &str,
    lifecycle: &str,
) -> anyhow::Result<MetricIntervals> {
    let query = FindQuery::new(
        Filter::eq(fields::APP_ID, app_id)
            .and(Filter::eq(fields::LIFECYCLE, lifecycle))
            .and(Filter::eq(fields::CATEGORY, category::MODEL_SUMMARY)),
    )
    .sort(fields::CREATED_ON_LAST_UPDATED, -1);

    let summary = store
        .find_one(Collection::Events, &query)
        .await
        .context("Finding the latest model summary")?;

    Ok(summary
        .and_then(|summary| summary.get(fields::DATA).cloned())
        .map(|data| MetricIntervals::from_model_summary(&data))
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            Collection::Events,
            vec![json!({
                "appId": "app",
                "lifecycle": "dev",
                "category": "/csap/reports/model/summary",
                "createdOn": {"date": "2024-03-05", "time": "10:00:00", "unixMs": 1, "lastUpdatedOn": 1},
                "data": {"packages": [{"metrics": {"host": [30, 300]}}]}
            })],
        );
        store.seed(
            Collection::MetricsData,
            vec![
                json!({
                    "attributes": {"hostName": "h1", "id": "host_30"},
                    "createdOn": {"date": "2024-03-05", "time": "10:00:00", "unixMs": 2_000_000, "lastUpdatedOn": 2_000_000},
                    "data": {"timeStamp": [9, 8], "usrCpu": [90]}
                }),
                json!({
                    "attributes": {"hostName": "h1", "id": "host_30"},
                    "createdOn": {"date": "2024-03-05", "time": "09:00:00", "unixMs": 10, "lastUpdatedOn": 10},
                    "data": {"timeStamp": [1], "usrCpu": [10]}
                }),
            ],
        );
        store
    }

    fn merged() -> GraphData {
        let mut merged = GraphData::new();
        merged.insert("timeStamp".to_string(), json!([7, 6]));
        merged.insert("usrCpu".to_string(), json!([70, 60]));
        merged
    }

    #[tokio::test]
    async fn prepends_finer_samples() -> anyhow::Result<()> {
        let store = store();
        let id: CollectionId = "host_300".parse()?;
        let names = vec!["timeStamp".to_string(), "usrCpu".to_string()];
        let request = PaddingRequest {
            host: "h1",
            collection_id: &id,
            app_id: "app",
            lifecycle: Some("dev"),
            date_offset: 0,
            latest_mongo_date: Some(1_000),
            names: &names,
        };

        let mut merged = merged();
        assert_eq!(
            PaddingOutcome::Padded,
            pad_latest(&store, &request, &mut merged).await?
        );
        assert_eq!(json!([9, 8, 7, 6]), merged["timeStamp"]);
        assert_eq!(json!([90, 0, 70, 60]), merged["usrCpu"]);
        Ok(())
    }

    #[tokio::test]
    async fn skips_when_not_applicable() -> anyhow::Result<()> {
        let store = store();
        let coarse: CollectionId = "host_300".parse()?;
        let fine: CollectionId = "host_30".parse()?;
        let names = vec!["timeStamp".to_string()];
        let request = PaddingRequest {
            host: "h1",
            collection_id: &coarse,
            app_id: "app",
            lifecycle: Some("dev"),
            date_offset: 0,
            latest_mongo_date: Some(1_000),
            names: &names,
        };

        let mut merged = merged();
        let cases = [
            (PaddingRequest { date_offset: 1, ..request.clone() }, PaddingOutcome::NotToday),
            (PaddingRequest { lifecycle: None, ..request.clone() }, PaddingOutcome::NoLifecycle),
            (
                PaddingRequest { collection_id: &fine, ..request.clone() },
                PaddingOutcome::AlreadyFinest,
            ),
            (
                PaddingRequest { latest_mongo_date: Some(5_000_000), ..request.clone() },
                PaddingOutcome::NothingNewer,
            ),
            (
                PaddingRequest { latest_mongo_date: None, ..request.clone() },
                PaddingOutcome::NothingNewer,
            ),
        ];
        for (request, expected) in cases {
            assert_eq!(expected, pad_latest(&store, &request, &mut merged).await?);
        }
        assert_eq!(json!([7, 6]), merged["timeStamp"]);
        Ok(())
    }

    #[tokio::test]
    async fn old_fine_samples_are_not_padded_without_a_merged_date() -> anyhow::Result<()> {
        let store = store();
        store.seed(
            Collection::MetricsData,
            vec![json!({
                "attributes": {"hostName": "h1", "id": "host_30"},
                "createdOn": {"date": "2023-11-01", "time": "10:00:00", "unixMs": 5, "lastUpdatedOn": 5},
                "data": {"timeStamp": [111], "usrCpu": [11]}
            })],
        );
        let id: CollectionId = "host_300".parse()?;
        let names = vec!["timeStamp".to_string(), "usrCpu".to_string()];
        let request = PaddingRequest {
            host: "h1",
            collection_id: &id,
            app_id: "app",
            lifecycle: Some("dev"),
            date_offset: 0,
            latest_mongo_date: None,
            names: &names,
        };

        let mut merged = merged();
        assert_eq!(
            PaddingOutcome::NothingNewer,
            pad_latest(&store, &request, &mut merged).await?
        );
        assert_eq!(json!([7, 6]), merged["timeStamp"]);
        Ok(())
    }
}
