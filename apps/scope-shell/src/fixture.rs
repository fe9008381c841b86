//! JSON-scripted backend for offline replays.

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use color_eyre::eyre;
use serde::Deserialize;
use tokio::task::AbortHandle;

use scope_domain::{
	ActivationReply, ActivationRequest, ActivationResponse, FilterDefinition, FilterSnapshot,
	NavigationNode, ResultBatch, ScopeMetadata, ScopeResult,
};
use scope_runtime::{
	ActivationListener, BoxFuture, Completion, InvalidationListener, OperationControl, Query,
	ScopeBackend, SearchListener, TransportError,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
	pub scopes: Vec<ScopeMetadata>,
	/// Favorite scope ids in display order.
	pub favorites: Vec<String>,
	pub responses: BTreeMap<String, ScriptedResponse>,
	/// Makes the scope listing fail.
	pub listing_error: Option<TransportError>,
}

/// What one scope answers to every search.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScriptedResponse {
	pub delay_ms: u64,
	pub batches: Vec<ResultBatch>,
	pub navigation: Option<NavigationNode>,
	pub filters: Vec<FilterDefinition>,
	pub filter_state: FilterSnapshot,
	/// Fails the search after the batches were pushed.
	pub error: Option<TransportError>,
	pub activation: Option<ActivationReply>,
}

pub fn load(path: &Path) -> color_eyre::Result<Fixture> {
	let raw = fs::read_to_string(path)?;
	let fixture: Fixture = serde_json::from_str(&raw)?;

	if fixture.scopes.is_empty() {
		return Err(eyre::eyre!("Fixture must list at least one scope."));
	}

	Ok(fixture)
}

#[derive(Debug)]
pub struct FixtureBackend {
	fixture: Fixture,
}
impl FixtureBackend {
	pub fn new(fixture: Fixture) -> Self {
		Self { fixture }
	}

	fn response(&self, scope_id: &str) -> ScriptedResponse {
		self.fixture.responses.get(scope_id).cloned().unwrap_or_default()
	}
}
impl ScopeBackend for FixtureBackend {
	fn list_scopes(&self) -> BoxFuture<'_, Result<Vec<ScopeMetadata>, TransportError>> {
		Box::pin(async move {
			match &self.fixture.listing_error {
				Some(err) => Err(err.clone()),
				None => Ok(self.fixture.scopes.clone()),
			}
		})
	}

	fn submit(
		&self,
		query: &Query,
		listener: SearchListener,
	) -> Result<Box<dyn OperationControl>, TransportError> {
		let mut response = self.response(&query.scope_id);

		for batch in &mut response.batches {
			batch.results.retain(|result| mentions(result, &query.text));
		}

		tracing::debug!(query = %query.canned().to_uri(), seq = query.seq, "Replaying search.");

		let task = tokio::spawn(replay_search(response, listener));

		Ok(Box::new(TaskControl(task.abort_handle())))
	}

	fn submit_activation(
		&self,
		scope_id: &str,
		request: &ActivationRequest,
		listener: ActivationListener,
	) -> Result<Box<dyn OperationControl>, TransportError> {
		let reply = self
			.response(scope_id)
			.activation
			.unwrap_or(ActivationReply::Immediate(ActivationResponse::NotHandled));

		tracing::debug!(scope_id, uri = %request.result.uri, "Replaying activation.");

		let task = tokio::spawn(async move {
			listener.reply(reply);
		});

		Ok(Box::new(TaskControl(task.abort_handle())))
	}

	fn watch_invalidations(&self, _listener: InvalidationListener) {}
}

struct TaskControl(AbortHandle);
impl OperationControl for TaskControl {
	fn cancel(&self) {
		self.0.abort();
	}
}

async fn replay_search(response: ScriptedResponse, listener: SearchListener) {
	if response.delay_ms > 0 {
		tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
	}

	for batch in response.batches {
		if !listener.push(batch) {
			return;
		}
	}

	if let Some(navigation) = response.navigation {
		listener.navigation(navigation);
	}
	if !response.filters.is_empty() {
		listener.filters(response.filters, response.filter_state);
	}

	let completion = match response.error {
		Some(err) => Completion::Failed(err),
		None => Completion::Finished,
	};

	listener.finished(completion);
}

// Case-insensitive match against the uri and the payload text.
fn mentions(result: &ScopeResult, text: &str) -> bool {
	if text.is_empty() {
		return true;
	}

	let needle = text.to_lowercase();

	result.uri.to_lowercase().contains(&needle)
		|| result.payload.to_string().to_lowercase().contains(&needle)
}
