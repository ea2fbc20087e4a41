use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;

use crate::fields;

/// Returns the value if it holds anything other than whitespace.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// How report rows are grouped across hosts.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
)]
pub enum GroupingMode {
    /// One row per host.
    #[strum(serialize = "perVm")]
    #[serde(rename = "perVm")]
    PerHost,
    /// Metrics summed across every host before any further aggregation.
    #[strum(serialize = "allVmTotal")]
    #[serde(rename = "allVmTotal")]
    MergedAcrossHosts,
    /// One row per application lifecycle.
    #[default]
    #[strum(serialize = "lifecycle")]
    #[serde(rename = "lifecycle")]
    PerLifecycleAggregate,
}

impl GroupingMode {
    /// The mode selected by the `perVm` and `allVmTotal` request flags.
    pub fn from_flags(per_vm: bool, all_vm_total: bool) -> Self {
        if all_vm_total {
            GroupingMode::MergedAcrossHosts
        } else if per_vm {
            GroupingMode::PerHost
        } else {
            GroupingMode::PerLifecycleAggregate
        }
    }
}

/// A post-aggregation normalization divisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Divisor {
    /// Divide by the summed `numberOfSamples` of the group.
    NumberOfSamples,
    Constant(f64),
    /// Neither a known field nor a number. Skipped when building stages.
    Malformed(String),
}

impl Divisor {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == fields::NUMBER_OF_SAMPLES {
            return Divisor::NumberOfSamples;
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Divisor::Constant(value),
            _ => Divisor::Malformed(raw.to_string()),
        }
    }

    pub fn as_request_value(&self) -> String {
        match self {
            Divisor::NumberOfSamples => fields::NUMBER_OF_SAMPLES.to_string(),
            Divisor::Constant(value) => value.to_string(),
            Divisor::Malformed(raw) => raw.clone(),
        }
    }
}

/// Requested service names, given as a single comma delimited parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceFilter(Vec<String>);

impl ServiceFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        let names = non_blank(raw)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self(names)
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Several services are merged into one row.
    pub fn is_multiple(&self) -> bool {
        self.0.len() > 1
    }
}

/// Direction of a host ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RankDirection {
    #[strum(serialize = "top")]
    Top,
    #[strum(serialize = "low")]
    Low,
}

impl RankDirection {
    /// Sort direction applied to a host's total.
    pub fn sort_order(self) -> i32 {
        match self {
            RankDirection::Top => -1,
            RankDirection::Low => 1,
        }
    }
}

/// Keep the `count` most extreme hosts of each group. A count of 0 keeps every host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRanking {
    pub direction: RankDirection,
    pub count: usize,
}

/// A normalized trending report request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendingQuery {
    pub app_id: Option<String>,
    pub project: Option<String>,
    pub lifecycle: Option<String>,
    pub category: String,
    pub services: ServiceFilter,
    /// Metric fields, in request order. More than one adds a `total`.
    pub metrics: Vec<String>,
    pub divide_by: Vec<Divisor>,
    /// Negative values ask for an hourly breakdown of today on top of the daily rows.
    pub num_days: i32,
    pub date_offset: i32,
    pub top: usize,
    pub low: usize,
    pub grouping: GroupingMode,
}

impl TrendingQuery {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            num_days: 1,
            ..Default::default()
        }
    }

    /// Number of days covered by the date window.
    pub fn day_count(&self) -> u32 {
        self.num_days.unsigned_abs()
    }

    pub fn wants_hourly(&self) -> bool {
        self.num_days < 0
    }

    pub fn by_host(&self) -> bool {
        self.grouping == GroupingMode::PerHost
    }

    pub fn all_vm_total(&self) -> bool {
        self.grouping == GroupingMode::MergedAcrossHosts
    }

    pub fn divides_by_samples(&self) -> bool {
        self.divide_by.contains(&Divisor::NumberOfSamples)
    }

    /// The ranking asked for, `top` taking precedence over `low`.
    pub fn ranking(&self) -> Option<HostRanking> {
        if self.top > 0 {
            Some(HostRanking {
                direction: RankDirection::Top,
                count: self.top,
            })
        } else if self.low > 0 {
            Some(HostRanking {
                direction: RankDirection::Low,
                count: self.low,
            })
        } else {
            None
        }
    }

    /// `appId`, `project` and `lifecycle` are all given.
    pub fn is_fully_scoped(&self) -> bool {
        [&self.app_id, &self.project, &self.lifecycle]
            .iter()
            .all(|v| non_blank(v.as_deref()).is_some())
    }
}

/// The full shape of a metrics graph request.
///
/// Two requests with the same key render the same response, so the key's
/// [fingerprint](MetricsReportKey::fingerprint) is what the response cache is keyed by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReportKey {
    pub host: String,
    pub collection_id: String,
    pub day_offset: i32,
    pub num_days: u32,
    pub services: Vec<String>,
    pub app_id: Option<String>,
    pub lifecycle: Option<String>,
    pub pad_latest: bool,
    pub show_days_from: bool,
    pub bucket_size: usize,
    pub bucket_spacing: usize,
}

impl MetricsReportKey {
    /// Compute a fingerprint for this request
    ///
    /// Services are hashed in sorted order, so the order they were requested in does not matter.
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.host.as_bytes());
        Digest::update(&mut hasher, [0]);
        Digest::update(&mut hasher, self.collection_id.as_bytes());
        Digest::update(&mut hasher, [0]);
        Digest::update(&mut hasher, self.day_offset.to_le_bytes());
        Digest::update(&mut hasher, self.num_days.to_le_bytes());
        self.services.iter().sorted().for_each(|service| {
            Digest::update(&mut hasher, service.as_bytes());
            Digest::update(&mut hasher, [0]);
        });
        for scope in [&self.app_id, &self.lifecycle] {
            if let Some(scope) = scope {
                Digest::update(&mut hasher, scope.as_bytes());
            }
            Digest::update(&mut hasher, [0]);
        }
        Digest::update(&mut hasher, [self.pad_latest as u8, self.show_days_from as u8]);
        Digest::update(&mut hasher, (self.bucket_size as u64).to_le_bytes());
        Digest::update(&mut hasher, (self.bucket_spacing as u64).to_le_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Bucket sampling is used instead of returning every sample.
    pub fn uses_buckets(&self) -> bool {
        self.bucket_size > 0 && self.bucket_spacing >= 1
    }
}
