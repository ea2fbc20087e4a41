//! Where each application lifecycle can be reached, learned from health events.
//!
//! Updates are best effort: an update that finds the cache busy is dropped rather than queued,
//! and the whole cache is cleared on the first update of a new day.

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use trends_model::event::VmReport;

#[derive(Debug, Default)]
struct Discovered {
    day: Option<NaiveDate>,
    /// appId to lifecycle to load balancer url or host.
    apps: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct DiscoveryCache {
    discovered: Mutex<Discovered>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how `app_id` in `lifecycle` is reached: the load balancer of `vm` if it has one,
    /// otherwise `host`.
    ///
    /// Returns `false` if another update held the cache and this one was skipped.
    pub fn record(
        &self,
        today: NaiveDate,
        app_id: &str,
        lifecycle: &str,
        host: &str,
        vm: Option<&VmReport>,
    ) -> bool {
        let Some(mut discovered) = self.discovered.try_lock() else {
            log::info!("Skipping discovery: {host} due to lock in use, discovery on next try");
            return false;
        };

        if discovered.day != Some(today) {
            log::info!("Clearing discovered hosts");
            discovered.day = Some(today);
            discovered.apps.clear();
        }

        let address = vm.and_then(VmReport::loadbalancer).unwrap_or(host);
        let app = discovered
            .apps
            .entry(app_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(lifecycles) = app {
            lifecycles.insert(lifecycle.to_string(), Value::from(address));
        }
        log::debug!("{host} Adding: appId {app_id}, address {address}, lifecycle {lifecycle}");

        true
    }

    /// `{appId: {lifecycle: address}}`
    pub fn report(&self) -> Value {
        Value::Object(self.discovered.lock().apps.clone())
    }
}
