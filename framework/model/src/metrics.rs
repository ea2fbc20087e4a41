use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::CreatedOn;
use crate::fields;

const JMX_FAMILY: &str = "jmx";
const FIXED_ATTRIBUTE_PREFIX: &str = "attributes_";

/// A metrics collection id such as `host_30`: a metric family and its sample interval in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId {
    family: String,
    interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid metrics collection id: {0}")]
pub struct InvalidCollectionId(String);

impl CollectionId {
    pub fn new(family: impl Into<String>, interval: u32) -> Self {
        Self {
            family: family.into(),
            interval,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// The family whose interval configuration applies to this collection.
    ///
    /// Every `jmx*` collection shares the intervals configured for `jmx`.
    pub fn interval_family(&self) -> &str {
        if self.family.starts_with(JMX_FAMILY) {
            JMX_FAMILY
        } else {
            &self.family
        }
    }

    /// Whether graphs of this collection are filtered down to a set of services.
    ///
    /// Host, resource and application collections carry no per-service graphs, nor does the
    /// plain `jmx` collection (as opposed to `jmx_<service>`).
    pub fn is_service_filtered(&self) -> bool {
        let family = self.family.as_str();
        !(family.starts_with("host")
            || family.starts_with("resource")
            || family.starts_with("application")
            || (family.starts_with(JMX_FAMILY) && !family.starts_with("jmx_")))
    }

    /// Whether a service requested for this collection may match an available service by prefix.
    pub fn matches_services_by_prefix(&self) -> bool {
        self.family.starts_with(JMX_FAMILY) || self.family.starts_with("application")
    }

    /// Number of samples a collection holds over `days` days, used to size output arrays.
    pub fn capacity_for_days(&self, days: u32) -> usize {
        let interval = self.interval.max(1) as usize;
        86_400 * days as usize / interval + 1
    }
}

impl FromStr for CollectionId {
    type Err = InvalidCollectionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, interval) = s
            .rsplit_once('_')
            .ok_or_else(|| InvalidCollectionId(s.to_string()))?;
        if family.is_empty() {
            return Err(InvalidCollectionId(s.to_string()));
        }
        let interval = interval
            .parse()
            .map_err(|_| InvalidCollectionId(s.to_string()))?;

        Ok(Self::new(family, interval))
    }
}

impl Display for CollectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.family, self.interval)
    }
}

/// The `attributes` object shared by metrics attribute and data documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsAttributes {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub id: String,
    /// Graph name to `{attribute name: label}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub graphs: BTreeMap<String, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services_available: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetricsAttributes {
    /// The names of every plotted attribute, plus `timeStamp`.
    ///
    /// Attributes prefixed `attributes_` are fixed values drawn as reference lines and hold no
    /// samples.
    pub fn data_point_names(&self) -> Vec<String> {
        let mut names = vec![fields::TIME_STAMP.to_string()];
        for name in self.graphs.values().flat_map(Map::keys) {
            if !name.starts_with(FIXED_ATTRIBUTE_PREFIX) && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Whether every requested service is listed as available.
    pub fn has_services(&self, requested: &[String], by_prefix: bool) -> bool {
        requested.iter().all(|service| {
            self.services_available.iter().any(|available| {
                if by_prefix {
                    available.starts_with(service.as_str())
                } else {
                    available == service
                }
            })
        })
    }

    /// Within every graph, drop the attributes that mention none of `services`.
    ///
    /// `timeStamp` and `totalCpu` are always kept.
    pub fn retain_graphs_for(&mut self, services: &[String]) {
        for attributes in self.graphs.values_mut() {
            attributes.retain(|name, _| {
                name.eq_ignore_ascii_case(fields::TIME_STAMP)
                    || name.eq_ignore_ascii_case("totalCpu")
                    || services
                        .iter()
                        .any(|service| !service.trim().is_empty() && name.contains(service.as_str()))
            });
        }
    }
}

/// Catalog document of a host's metrics collection. The attributes sit at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsAttributeDocument {
    #[serde(flatten)]
    pub attributes: MetricsAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<CreatedOn>,
}

/// One day of samples for a host's metrics collection.
///
/// Every array under `data` is index-aligned with `data.timeStamp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDataDocument {
    #[serde(default)]
    pub attributes: MetricsAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<CreatedOn>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl MetricsDataDocument {
    pub fn series(&self, name: &str) -> Option<&Vec<Value>> {
        self.data.get(name).and_then(Value::as_array)
    }

    pub fn time_stamps(&self) -> Option<&Vec<Value>> {
        self.series(fields::TIME_STAMP)
    }

    pub fn last_updated_on(&self) -> Option<i64> {
        self.created_on.as_ref().and_then(|c| c.last_updated_on)
    }

    pub fn mongo_date(&self) -> Option<i64> {
        self.created_on.as_ref().and_then(|c| c.mongo_date)
    }
}

/// Sample intervals configured for each metric family of an application lifecycle.
///
/// Read from the latest model summary report, whose `data.packages[].metrics` maps a family to
/// its intervals, finest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricIntervals(BTreeMap<String, Vec<u32>>);

impl MetricIntervals {
    pub fn from_model_summary(data: &Value) -> Self {
        let mut intervals = BTreeMap::new();
        let packages = data
            .get(fields::PACKAGES)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for package in packages {
            let Some(metrics) = package.get(fields::METRICS).and_then(Value::as_object) else {
                continue;
            };
            for (family, values) in metrics {
                let values = values
                    .as_array()
                    .map(|v| {
                        v.iter()
                            .filter_map(|i| i.as_u64().and_then(|i| u32::try_from(i).ok()))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if !values.is_empty() {
                    intervals.entry(family.clone()).or_insert(values);
                }
            }
        }

        Self(intervals)
    }

    /// The finest configured collection of the family `id` belongs to.
    pub fn finest_for(&self, id: &CollectionId) -> Option<CollectionId> {
        let family = id.interval_family();
        let interval = self.0.get(family)?.first()?;
        Some(CollectionId::new(family, *interval))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
