use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use trends_model::category::{HEALTH_REPORT, HOST_DAILY_REPORT};
use trends_model::query::{
    Divisor, GroupingMode, MetricsReportKey, ServiceFilter, TrendingQuery,
};

use crate::pipeline::summary::SummaryQuery;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct ReporterCli {
    /// Path to a TOML config file. Every setting has a default so the file is optional.
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Seed the in-memory store from a JSON lines file, or from a directory holding one
    /// `<collection>.jsonl` file per collection.
    ///
    /// Overrides any seed in the config file.
    #[clap(long, global = true)]
    pub seed: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store events, one JSON document per line, and print the key of each.
    Ingest {
        /// File of events, `-` for stdin
        path: PathBuf,

        /// The application the events are sent for
        #[clap(long)]
        app_id: String,
    },

    /// Store a single event assembled from its fields.
    Event {
        #[clap(long)]
        app_id: String,
        #[clap(long)]
        project: String,
        #[clap(long)]
        life: String,
        #[clap(long)]
        summary: String,
        #[clap(long)]
        category: String,
        /// JSON payload, or plain text
        #[clap(long)]
        data: String,
    },

    /// Daily trend of report metrics.
    Trend(TrendArgs),

    /// Daily trend of host report metrics.
    HostTrend(TrendArgs),

    /// Unhealthy event counts per day.
    Health(TrendArgs),

    /// Hosts ranked on dashboard metric ids.
    TopHosts(TopHostsArgs),

    /// Time series graph data of one host.
    Metrics(MetricsArgs),

    /// Per service totals of a report category.
    Summary(SummaryArgs),

    /// Hosts seen reporting health today, by application and lifecycle.
    Discovery,
}

/// Narrow reports to one application, project and lifecycle.
#[derive(Debug, Clone, Default, Args)]
pub struct ScopeArgs {
    #[clap(long)]
    pub app_id: Option<String>,

    #[clap(long)]
    pub project: Option<String>,

    /// Lifecycle, for example `dev` or `prod`
    #[clap(long)]
    pub life: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TrendArgs {
    #[clap(flatten)]
    pub scope: ScopeArgs,

    /// Report category. Defaults to the host daily report, or the health report for `health`.
    #[clap(long)]
    pub category: Option<String>,

    /// Comma separated service names. Several are merged into one row.
    #[clap(long)]
    pub service_name: Option<String>,

    /// A metric to trend. Use the flag multiple times to add up several metrics into a `total`.
    #[clap(long = "metric")]
    pub metrics: Vec<String>,

    /// Divide each metric by `numberOfSamples` or by a constant. Can be used multiple times.
    #[clap(long)]
    pub divide_by: Vec<String>,

    /// Days to report on. A negative value adds an hourly breakdown of today.
    #[clap(long, default_value = "1", allow_hyphen_values = true)]
    pub num_days: i32,

    /// Days back from today the window ends
    #[clap(long, default_value = "0", allow_hyphen_values = true)]
    pub date_offset: i32,

    /// Only report on the hosts with the highest totals
    #[clap(long, default_value = "0")]
    pub top: usize,

    /// Only report on the hosts with the lowest totals
    #[clap(long, default_value = "0")]
    pub low: usize,

    /// One row per host
    #[clap(long, default_value = "false")]
    pub per_vm: bool,

    /// Sum every host before aggregating
    #[clap(long, default_value = "false")]
    pub all_vm_total: bool,
}

impl TrendArgs {
    pub fn into_query(self, default_category: &str) -> TrendingQuery {
        TrendingQuery {
            app_id: self.scope.app_id,
            project: self.scope.project,
            lifecycle: self.scope.life,
            category: self
                .category
                .unwrap_or_else(|| default_category.to_string()),
            services: ServiceFilter::parse(self.service_name.as_deref()),
            metrics: self.metrics,
            divide_by: self.divide_by.iter().map(|raw| Divisor::parse(raw)).collect(),
            num_days: self.num_days,
            date_offset: self.date_offset,
            top: self.top,
            low: self.low,
            grouping: GroupingMode::from_flags(self.per_vm, self.all_vm_total),
        }
    }

    pub fn host_query(self) -> TrendingQuery {
        self.into_query(HOST_DAILY_REPORT)
    }

    pub fn health_query(self) -> TrendingQuery {
        self.into_query(HEALTH_REPORT)
    }
}

#[derive(Debug, Clone, Args)]
pub struct TopHostsArgs {
    #[clap(flatten)]
    pub scope: ScopeArgs,

    /// A dashboard metric id such as `vm.coresActive` or `process.topCpu_search`. Can be used
    /// multiple times; the first decides the report ranked on.
    #[clap(long = "metric-id", required = true)]
    pub metric_ids: Vec<String>,

    /// Number of hosts with the highest totals
    #[clap(long, default_value = "0")]
    pub top: usize,

    /// Number of hosts with the lowest totals
    #[clap(long, default_value = "0")]
    pub low: usize,

    #[clap(long, default_value = "1")]
    pub num_days: u32,

    #[clap(long, default_value = "0", allow_hyphen_values = true)]
    pub date_offset: i32,
}

#[derive(Debug, Clone, Args)]
pub struct MetricsArgs {
    #[clap(long)]
    pub host: String,

    /// Collection id, for example `host_30` or `os-process_300`
    #[clap(long)]
    pub id: String,

    #[clap(long, default_value = "1")]
    pub num_days: u32,

    #[clap(long, default_value = "0", allow_hyphen_values = true)]
    pub day_offset: i32,

    /// Comma separated service names
    #[clap(long)]
    pub service_name: Option<String>,

    #[clap(long)]
    pub app_id: Option<String>,

    #[clap(long)]
    pub life: Option<String>,

    /// Top up the series with the latest points of a finer collection
    #[clap(long, default_value = "false")]
    pub pad_latest: bool,

    /// Count the window from the day of the offset rather than from now
    #[clap(long, default_value = "false")]
    pub show_days_from: bool,

    /// Points averaged into each bucket. 1 keeps every point.
    #[clap(long, default_value = "1")]
    pub bucket_size: usize,

    /// Points skipped between buckets
    #[clap(long, default_value = "0")]
    pub bucket_spacing: usize,
}

impl From<MetricsArgs> for MetricsReportKey {
    fn from(args: MetricsArgs) -> Self {
        MetricsReportKey {
            host: args.host,
            collection_id: args.id,
            day_offset: args.day_offset,
            num_days: args.num_days,
            services: ServiceFilter::parse(args.service_name.as_deref())
                .names()
                .to_vec(),
            app_id: args.app_id,
            lifecycle: args.life,
            pad_latest: args.pad_latest,
            show_days_from: args.show_days_from,
            bucket_size: args.bucket_size,
            bucket_spacing: args.bucket_spacing,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SummaryArgs {
    #[clap(flatten)]
    pub scope: ScopeArgs,

    #[clap(long)]
    pub category: String,

    #[clap(long)]
    pub host: Option<String>,

    #[clap(long)]
    pub service_name: Option<String>,

    #[clap(long, default_value = "1")]
    pub num_days: u32,

    #[clap(long, default_value = "0", allow_hyphen_values = true)]
    pub date_offset: i32,

    /// One row per host rather than per service
    #[clap(long, default_value = "false")]
    pub detail: bool,
}

impl From<SummaryArgs> for SummaryQuery {
    fn from(args: SummaryArgs) -> Self {
        SummaryQuery {
            app_id: args.scope.app_id,
            project: args.scope.project,
            lifecycle: args.scope.life,
            category: args.category,
            host: args.host,
            service: args.service_name,
            num_days: args.num_days,
            date_offset: args.date_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_is_consistent() {
        ReporterCli::command().debug_assert();
    }

    #[test]
    fn trend_flags_build_the_query() -> anyhow::Result<()> {
        let cli = ReporterCli::try_parse_from([
            "trends-reporter",
            "trend",
            "--app-id",
            "csap",
            "--category",
            "/csap/reports/os-process/daily",
            "--service-name",
            "search, mail",
            "--metric",
            "topCpu",
            "--divide-by",
            "numberOfSamples",
            "--num-days",
            "-7",
            "--per-vm",
        ])?;

        let Command::Trend(args) = cli.command else {
            panic!("expected a trend command");
        };
        let query = args.host_query();

        assert_eq!("/csap/reports/os-process/daily", query.category);
        assert_eq!(&["search".to_string(), "mail".to_string()], query.services.names());
        assert_eq!(vec![Divisor::NumberOfSamples], query.divide_by);
        assert!(query.wants_hourly());
        assert_eq!(GroupingMode::PerHost, query.grouping);
        Ok(())
    }

    #[test]
    fn health_defaults_to_the_health_report() -> anyhow::Result<()> {
        let cli = ReporterCli::try_parse_from(["trends-reporter", "health", "--top", "2"])?;
        let Command::Health(args) = cli.command else {
            panic!("expected a health command");
        };
        let query = args.health_query();
        assert_eq!(HEALTH_REPORT, query.category);
        assert_eq!(2, query.top);
        Ok(())
    }

    #[test]
    fn metrics_key_splits_services() -> anyhow::Result<()> {
        let cli = ReporterCli::try_parse_from([
            "trends-reporter",
            "--seed",
            "data",
            "metrics",
            "--host",
            "h1",
            "--id",
            "os-process_30",
            "--service-name",
            "search,mail",
        ])?;
        assert_eq!(Some(PathBuf::from("data")), cli.seed);

        let Command::Metrics(args) = cli.command else {
            panic!("expected a metrics command");
        };
        let key = MetricsReportKey::from(args);
        assert_eq!(vec!["search".to_string(), "mail".to_string()], key.services);
        assert_eq!(1, key.bucket_size);
        Ok(())
    }
}
