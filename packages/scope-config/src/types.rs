use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub service: Service,
	pub dispatch: Dispatch,
	pub directory: Directory,
	pub events: Events,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Service {
	/// Tracing filter directive, e.g. "info" or "scope_runtime=debug".
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { log_level: "info".to_string() }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Dispatch {
	/// Quiet period after the last text change before a search is sent.
	pub typing_delay_ms: u64,
	/// Period at which buffered result batches are applied to the model.
	pub flush_interval_ms: u64,
}
impl Dispatch {
	pub fn typing_delay(&self) -> Duration {
		Duration::from_millis(self.typing_delay_ms)
	}

	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}
}
impl Default for Dispatch {
	fn default() -> Self {
		Self { typing_delay_ms: 400, flush_interval_ms: 100 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Directory {
	/// Delay between startup and the first scope listing.
	pub discovery_delay_ms: u64,
	/// Grace period before an un-favorited scope is dropped.
	pub removal_grace_ms: u64,
	/// Ignore stored favorites and list every visible scope.
	pub show_all_scopes: bool,
	pub overview_scope_id: String,
	/// Send an empty query to every favorite once discovery completes.
	pub query_on_startup: bool,
}
impl Directory {
	pub fn discovery_delay(&self) -> Duration {
		Duration::from_millis(self.discovery_delay_ms)
	}

	pub fn removal_grace(&self) -> Duration {
		Duration::from_millis(self.removal_grace_ms)
	}
}
impl Default for Directory {
	fn default() -> Self {
		Self {
			discovery_delay_ms: 100,
			removal_grace_ms: 3_000,
			show_all_scopes: false,
			overview_scope_id: "scopes".to_string(),
			query_on_startup: true,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Events {
	pub capacity: usize,
}
impl Default for Events {
	fn default() -> Self {
		Self { capacity: 1_024 }
	}
}
