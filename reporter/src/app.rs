//! Wiring of the store, the ingestion path and the reports behind the command line.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use trends_core::prelude::{ShutdownHandle, WorkerPool};
use trends_model::query::MetricsReportKey;

use crate::cli::Command;
use crate::clock::Clock;
use crate::config::{ReporterConfig, StoreConfig};
use crate::discovery::DiscoveryCache;
use crate::health::HealthTracker;
use crate::ingest::{Ingestor, SimpleEvent};
use crate::ranker::{allow_list, MetricSelector};
use crate::report::Reporter;
use crate::store::{MemoryStore, Store, TimedStore};

pub struct App {
    store: Arc<dyn Store>,
    pool: Arc<WorkerPool>,
    discovery: Arc<DiscoveryCache>,
    ingestor: Ingestor,
    reporter: Reporter,
    clock: Clock,
}

impl App {
    pub fn new(store: Arc<dyn Store>, config: &ReporterConfig, clock: Clock) -> Self {
        let pool = Arc::new(WorkerPool::new(
            config.worker_threads,
            config.queue_capacity,
            ShutdownHandle::new(),
        ));
        let discovery = Arc::new(DiscoveryCache::new());
        let health = Arc::new(HealthTracker::new(
            store.clone(),
            config.health_settings(),
            clock,
        ));
        let ingestor = Ingestor::new(
            store.clone(),
            health,
            discovery.clone(),
            pool.clone(),
            config.ingest_settings(),
            clock,
        );
        let reporter = Reporter::new(
            store.clone(),
            config.response_cache(),
            clock,
            config.report_settings(),
        );

        Self {
            store,
            pool,
            discovery,
            ingestor,
            reporter,
            clock,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Run one command, writing its JSON output to `out`.
    pub async fn execute(&self, command: Command, out: &mut impl Write) -> anyhow::Result<()> {
        let output = match command {
            Command::Ingest { path, app_id } => {
                let keys = self.ingest_lines(&path, &app_id).await?;
                Value::from(keys)
            }
            Command::Event {
                app_id,
                project,
                life,
                summary,
                category,
                data,
            } => {
                let key = self
                    .ingestor
                    .insert_event(SimpleEvent {
                        app_id,
                        project,
                        lifecycle: life,
                        summary,
                        category,
                        payload: data,
                    })
                    .await;
                Value::from(key)
            }
            Command::Trend(args) => {
                self.reporter
                    .try_category_trend(&args.host_query())
                    .await
            }
            Command::HostTrend(args) => self.reporter.try_host_trend(&args.host_query()).await,
            Command::Health(args) => self.reporter.try_health_report(&args.health_query()).await,
            Command::TopHosts(args) => {
                let query = MetricSelector::parse(&args.metric_ids)?.into_query(
                    args.scope.app_id,
                    args.scope.project,
                    args.scope.life,
                    args.num_days,
                    args.date_offset,
                );
                let hosts = allow_list(
                    self.store.as_ref(),
                    &query,
                    args.top,
                    args.low,
                    &self.clock,
                )
                .await
                .context("Ranking hosts")?;
                Value::from(hosts)
            }
            Command::Metrics(args) => {
                // Rendered and cached as text already.
                let report = self
                    .reporter
                    .try_metrics_report(&MetricsReportKey::from(args))
                    .await;
                writeln!(out, "{report}")?;
                return Ok(());
            }
            Command::Summary(args) => {
                let detail = args.detail;
                self.reporter
                    .try_summary_report(&args.into(), detail)
                    .await
            }
            Command::Discovery => self.discovery.report(),
        };

        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        Ok(())
    }

    /// Ingest every non blank line of `path`, `-` being stdin, and wait for the health follow ups.
    async fn ingest_lines(&self, path: &Path, app_id: &str) -> anyhow::Result<Vec<String>> {
        let lines: Vec<String> = if path == Path::new("-") {
            std::io::stdin()
                .lock()
                .lines()
                .collect::<Result<_, _>>()
                .context("Reading events from stdin")?
        } else {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Opening events file {}", path.display()))?;
            std::io::BufReader::new(file)
                .lines()
                .collect::<Result<_, _>>()
                .with_context(|| format!("Reading events file {}", path.display()))?
        };

        let mut keys = Vec::new();
        let mut follow_ups = Vec::new();
        for line in lines.iter().filter(|line| !line.trim().is_empty()) {
            let ingested = self.ingestor.ingest(line, app_id).await;
            log::debug!("Ingested {}", ingested.key);
            keys.push(ingested.key);
            follow_ups.extend(ingested.follow_up);
        }

        for follow_up in follow_ups {
            if follow_up.await.is_err() {
                log::warn!("Health processing of an event was dropped");
            }
        }

        log::info!("Ingested {} events for {app_id}", keys.len());
        Ok(keys)
    }

    /// Drain the worker pool.
    pub async fn close(self) {
        let App { pool, ingestor, .. } = self;
        drop(ingestor);

        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.close().await,
            Err(pool) => {
                log::warn!("Worker pool still shared, stopping workers");
                pool.shutdown();
            }
        }
    }
}

/// Open the configured store, bounded by the query timeout.
pub async fn open_store(config: &ReporterConfig) -> anyhow::Result<Arc<dyn Store>> {
    let timeout = config.query_timeout();
    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Memory { seed: None } => Arc::new(TimedStore::new(MemoryStore::new(), timeout)),
        StoreConfig::Memory { seed: Some(seed) } => {
            let store = MemoryStore::load(seed)
                .with_context(|| format!("Seeding store from {}", seed.display()))?;
            Arc::new(TimedStore::new(store, timeout))
        }
        #[cfg(feature = "mongo")]
        StoreConfig::Mongo { uri, database } => {
            let store = crate::store::mongo::MongoStore::connect(uri, database)
                .await
                .with_context(|| format!("Connecting to {database}"))?;
            Arc::new(TimedStore::new(store, timeout))
        }
        #[cfg(not(feature = "mongo"))]
        StoreConfig::Mongo { database, .. } => {
            anyhow::bail!("Cannot use mongo database {database}, built without the `mongo` feature")
        }
    };
    Ok(store)
}
