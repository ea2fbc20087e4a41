use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use trends_model::category::{HEALTH_REPORT, HOST_DAILY_REPORT};
use trends_model::query::{Divisor, MetricsReportKey, ServiceFilter, TrendingQuery};
use trends_reporter::app::App;
use trends_reporter::cache::ResponseCache;
use trends_reporter::cli::ReporterCli;
use trends_reporter::clock::Clock;
use trends_reporter::config::ReporterConfig;
use trends_reporter::report::{ReportSettings, Reporter};
use trends_reporter::store::{Collection, MemoryStore};
use trends_reporter::timeseries::{merge_documents, reduce_using_samples, Reduction};
use walkdir::WalkDir;

const HOUR_MS: i64 = 60 * 60 * 1000;

fn clock() -> Clock {
    Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
}

fn test_data() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test_data")
}

/// The fixture store named `name`, one `<collection>.jsonl` per collection.
fn fixture_store(name: &str) -> anyhow::Result<MemoryStore> {
    MemoryStore::load(&test_data().join("stores").join(name))
}

fn reporter(store: MemoryStore) -> Reporter {
    Reporter::new(
        Arc::new(store),
        ResponseCache::new(16, Duration::from_secs(60)),
        clock(),
        ReportSettings::default(),
    )
}

async fn run(app: &App, args: &[&str]) -> anyhow::Result<Value> {
    let cli = ReporterCli::try_parse_from(
        std::iter::once("trends-reporter").chain(args.iter().copied()),
    )?;
    let mut out = Vec::new();
    app.execute(cli.command, &mut out).await?;
    Ok(serde_json::from_slice(&out)?)
}

fn events_fixture(name: &str) -> String {
    test_data()
        .join("events")
        .join(name)
        .display()
        .to_string()
}

fn documents_of(store: &MemoryStore, category: &str) -> Vec<Value> {
    store
        .documents(Collection::Events)
        .into_iter()
        .filter(|document| document["category"] == category)
        .collect()
}

#[test]
fn every_fixture_is_valid_json_lines() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let mut count = 0;
    for entry in WalkDir::new(test_data()) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "jsonl")
        {
            let documents = trends_model::load_documents(entry.path())
                .with_context(|| format!("Loading {}", entry.path().display()))?;
            assert!(!documents.is_empty(), "{} is empty", entry.path().display());
            count += 1;
        }
    }
    assert!(count >= 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_daily_report_counts_on_one_document() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let store = Arc::new(MemoryStore::new());
    let app = App::new(store.clone(), &ReporterConfig::default(), clock());

    let keys = run(
        &app,
        &["ingest", &events_fixture("daily_report.jsonl"), "--app-id", "csap"],
    )
    .await?;
    app.close().await;

    let keys = keys.as_array().cloned().unwrap_or_default();
    assert_eq!(2, keys.len());
    assert_eq!(keys[0], keys[1]);

    let reports = documents_of(&store, HOST_DAILY_REPORT);
    assert_eq!(1, reports.len());
    assert_eq!(json!(2), reports[0]["counter"]);
    assert_eq!(keys[0], reports[0]["_id"]);
    assert_eq!(json!(14), reports[0]["data"]["summary"]["totalUsrCpu"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn flapping_host_history_is_capped() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let store = Arc::new(MemoryStore::new());
    let config = ReporterConfig {
        worker_threads: 1,
        ..ReporterConfig::default()
    };
    let app = App::new(store.clone(), &config, clock());

    run(
        &app,
        &["ingest", &events_fixture("health_flapping.jsonl"), "--app-id", "csap"],
    )
    .await?;
    let discovered = run(&app, &["discovery"]).await?;
    app.close().await;

    let health = documents_of(&store, HEALTH_REPORT);
    assert_eq!(1, health.len());
    let history = health[0]["data"]["healthStatus"]
        .as_array()
        .context("healthStatus")?;
    assert_eq!(config.max_health_changes_per_day, history.len());
    // Every failing event counts, whether or not its change was kept.
    assert_eq!(json!(11), health[0]["data"]["UnHealthyEventCount"]);

    assert_eq!(json!({"csap": {"dev": "http://billing.lb"}}), discovered);
    Ok(())
}

#[tokio::test]
async fn top_unhealthy_host_over_two_days() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let app = App::new(
        Arc::new(fixture_store("health_ranking")?),
        &ReporterConfig::default(),
        clock(),
    );

    let top = run(
        &app,
        &[
            "top-hosts",
            "--metric-id",
            "health.UnHealthyEventCount",
            "--top",
            "1",
            "--num-days",
            "2",
        ],
    )
    .await?;
    let low = run(
        &app,
        &[
            "top-hosts",
            "--metric-id",
            "health.UnHealthyEventCount",
            "--low",
            "1",
            "--num-days",
            "2",
        ],
    )
    .await?;

    // billing-1 would rank first if 2024-03-01 were in the window.
    assert_eq!(json!(["billing-2"]), top);
    assert_eq!(json!(["billing-1"]), low);
    Ok(())
}

#[tokio::test]
async fn zero_samples_divide_by_one() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let reporter = reporter(fixture_store("sample_divisor")?);
    let query = TrendingQuery {
        app_id: Some("csap".to_string()),
        project: Some("billing".to_string()),
        lifecycle: Some("dev".to_string()),
        services: ServiceFilter::parse(Some("search")),
        metrics: vec!["topCpu".to_string()],
        divide_by: vec![Divisor::NumberOfSamples],
        num_days: 2,
        ..TrendingQuery::new("/csap/reports/os-process/daily")
    };

    let report = reporter.category_trend(&query).await?;

    let rows = report["data"].as_array().context("data")?;
    assert_eq!(1, rows.len());
    let mut values: Vec<f64> = rows[0]["topCpu"]
        .as_array()
        .context("topCpu")?
        .iter()
        .filter_map(Value::as_f64)
        .collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(vec![0.0, 4.0], values);
    assert_eq!(json!(1), report["numDaysAvailable"]);
    Ok(())
}

fn host_documents(now: i64) -> MemoryStore {
    let day = |points: i64, updated: i64, date: &str| {
        let time_stamps: Vec<i64> = (0..points).rev().map(|i| updated - i * 30_000).collect();
        let usr_cpu: Vec<i64> = (0..points).map(|i| i % 7).collect();
        json!({
            "attributes": {"hostName": "billing-1", "id": "host_30"},
            "createdOn": {"date": date, "time": "09:00:00", "unixMs": updated, "mongoDate": updated, "lastUpdatedOn": updated},
            "data": {"timeStamp": time_stamps, "usrCpu": usr_cpu, "sysCpu": [1, 2, 3]}
        })
    };

    let store = MemoryStore::new();
    store.seed(
        Collection::MetricsAttributes,
        vec![json!({
            "hostName": "billing-1",
            "id": "host_30",
            "graphs": {"cpu": {"usrCpu": "User", "sysCpu": "System"}},
            "createdOn": {"date": "2024-03-05", "time": "08:00:00", "unixMs": now - HOUR_MS, "lastUpdatedOn": now - HOUR_MS}
        })],
    );
    store.seed(
        Collection::MetricsData,
        vec![
            day(100, now - HOUR_MS, "2024-03-05"),
            day(50, now - 25 * HOUR_MS, "2024-03-04"),
        ],
    );
    store
}

#[tokio::test]
async fn two_days_merge_and_reduce_to_48_points() -> anyhow::Result<()> {
    env_logger::try_init().ok();

    let now = clock().now().timestamp_millis();
    let reporter = reporter(host_documents(now));
    let key = MetricsReportKey {
        host: "billing-1".to_string(),
        collection_id: "host_30".to_string(),
        num_days: 2,
        bucket_size: 1,
        ..Default::default()
    };

    let rendered = reporter.metrics_report(&key).await?;
    let report: Value = serde_json::from_str(&rendered)?;
    let data = report["data"].as_object().context("data")?;

    let time_stamps = data["timeStamp"].as_array().context("timeStamp")?;
    assert_eq!(150, time_stamps.len());
    for (name, series) in data {
        assert_eq!(
            time_stamps.len(),
            series.as_array().map_or(0, Vec::len),
            "{name} is not aligned"
        );
    }

    let usr_cpu = data["usrCpu"].as_array().context("usrCpu")?;
    assert_eq!(48, reduce_using_samples(usr_cpu, 48, Reduction::Average).len());
    assert_eq!(48, reduce_using_samples(time_stamps, 48, Reduction::PassThrough).len());
    Ok(())
}

#[test]
fn reducing_to_more_points_than_held_keeps_the_series() {
    let values: Vec<Value> = (1..=10).map(Value::from).collect();

    assert_eq!(values, reduce_using_samples(&values, 10, Reduction::PassThrough));
    assert_eq!(values, reduce_using_samples(&values, 25, Reduction::PassThrough));
    assert_eq!(values, reduce_using_samples(&values, 0, Reduction::PassThrough));
    assert_eq!(values, reduce_using_samples(&values, -3, Reduction::PassThrough));
    assert!(reduce_using_samples(&[], 0, Reduction::Average).is_empty());
}

#[test]
fn merged_arrays_match_the_time_stamps() -> anyhow::Result<()> {
    let documents = [
        json!({"attributes": {}, "data": {"timeStamp": [5, 4, 3], "usrCpu": [1, 2], "sysCpu": [1, 2, 3, 4]}}),
        json!({"attributes": {}, "data": {"timeStamp": [2, 1], "sysCpu": [7, 8]}}),
    ]
    .into_iter()
    .map(serde_json::from_value)
    .collect::<Result<Vec<_>, _>>()?;
    let names = ["timeStamp", "usrCpu", "sysCpu"].map(String::from);

    let merged = merge_documents(documents, &names, 8);

    assert_eq!(json!([5, 4, 3, 2, 1]), merged.data["timeStamp"]);
    assert_eq!(json!([1, 2, 0, 0, 0]), merged.data["usrCpu"]);
    assert_eq!(json!([1, 2, 3, 7, 8]), merged.data["sysCpu"]);
    assert_eq!(3, merged.mismatches.repaired);
    Ok(())
}
