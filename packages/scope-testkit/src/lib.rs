//! Scripted backend and fixtures shared by the integration tests.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::{
	sync::{
		broadcast::{self, error::TryRecvError},
		mpsc::{self, UnboundedReceiver},
	},
	time::Instant,
};

use scope_config::Config;
use scope_domain::{
	ActivationRequest, CategoryDescriptor, ResultBatch, ScopeMetadata, ScopeResult,
};
use scope_runtime::{
	ActivationListener, BoxFuture, Delivery, DispatcherContext, EventBus, InvalidationListener,
	OperationControl, Query, ScopeBackend, ScopeDispatcher, ScopeEvent, SearchListener, ShellEvent,
	TransportError,
};

pub fn metadata(id: &str) -> ScopeMetadata {
	ScopeMetadata { display_name: format!("{id} scope"), ..ScopeMetadata::new(id) }
}

pub fn category(id: &str) -> CategoryDescriptor {
	CategoryDescriptor::new(id, id.to_uppercase())
}

pub fn result(uri: &str, category_id: &str) -> ScopeResult {
	ScopeResult::new(uri, category_id, json!({ "title": uri }))
}

pub fn batch(categories: &[&str], results: &[(&str, &str)]) -> ResultBatch {
	ResultBatch {
		categories: categories.iter().map(|id| category(id)).collect(),
		results: results.iter().map(|(uri, category_id)| result(uri, category_id)).collect(),
	}
}

/// Defaults with a short discovery delay and a deep event buffer.
pub fn test_config() -> Config {
	let mut config = Config::default();

	config.directory.discovery_delay_ms = 10;
	config.events.capacity = 4_096;

	config
}

pub fn drain_events(receiver: &mut broadcast::Receiver<ShellEvent>) -> Vec<ShellEvent> {
	let mut events = Vec::new();

	loop {
		match receiver.try_recv() {
			Ok(event) => events.push(event),
			Err(TryRecvError::Lagged(_)) => continue,
			Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
		}
	}
}

pub fn scope_events(events: &[ShellEvent], scope_id: &str) -> Vec<ScopeEvent> {
	events
		.iter()
		.filter_map(|event| match event {
			ShellEvent::Scope { scope_id: id, event } if id == scope_id => Some(event.clone()),
			_ => None,
		})
		.collect()
}

#[derive(Debug)]
pub struct Submission {
	pub query: Query,
	pub listener: SearchListener,
}

#[derive(Debug)]
pub struct ActivationSubmission {
	pub scope_id: String,
	pub request: ActivationRequest,
	pub listener: ActivationListener,
}

#[derive(Debug, Default)]
struct State {
	listing: Option<Result<Vec<ScopeMetadata>, TransportError>>,
	listing_calls: usize,
	submissions: Vec<Submission>,
	activations: Vec<ActivationSubmission>,
	cancelled: Vec<(String, u64)>,
	activation_cancels: usize,
	push_on_cancel: Option<ResultBatch>,
	cancel_pushes: Vec<bool>,
	fail_next_submit: Option<TransportError>,
	fail_next_activation: Option<TransportError>,
	invalidations: Option<InvalidationListener>,
}

/// In-memory backend that records every request and lets tests drive the
/// listeners by hand.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
	state: Arc<Mutex<State>>,
}
impl ScriptedBackend {
	pub fn new(scopes: Vec<ScopeMetadata>) -> Self {
		let backend = Self::default();

		backend.set_listing(Ok(scopes));

		backend
	}

	pub fn set_listing(&self, listing: Result<Vec<ScopeMetadata>, TransportError>) {
		self.state().listing = Some(listing);
	}

	pub fn listing_calls(&self) -> usize {
		self.state().listing_calls
	}

	pub fn queries(&self) -> Vec<Query> {
		self.state().submissions.iter().map(|submission| submission.query.clone()).collect()
	}

	pub fn queries_for(&self, scope_id: &str) -> Vec<Query> {
		self.queries().into_iter().filter(|query| query.scope_id == scope_id).collect()
	}

	/// Listener of the latest search sent to `scope_id`.
	pub fn listener(&self, scope_id: &str) -> Option<SearchListener> {
		self.state()
			.submissions
			.iter()
			.rev()
			.find(|submission| submission.query.scope_id == scope_id)
			.map(|submission| submission.listener.clone())
	}

	pub fn listener_for_seq(&self, scope_id: &str, seq: u64) -> Option<SearchListener> {
		self.state()
			.submissions
			.iter()
			.find(|submission| submission.query.scope_id == scope_id && submission.query.seq == seq)
			.map(|submission| submission.listener.clone())
	}

	pub fn cancelled(&self) -> Vec<(String, u64)> {
		self.state().cancelled.clone()
	}

	pub fn activation_cancels(&self) -> usize {
		self.state().activation_cancels
	}

	/// Makes every search cancel push `batch` through the cancelled listener.
	pub fn push_on_cancel(&self, batch: ResultBatch) {
		self.state().push_on_cancel = Some(batch);
	}

	/// Whether each push made from inside `cancel` was accepted by its listener.
	pub fn cancel_pushes(&self) -> Vec<bool> {
		self.state().cancel_pushes.clone()
	}

	pub fn fail_next_submit(&self, error: TransportError) {
		self.state().fail_next_submit = Some(error);
	}

	pub fn fail_next_activation(&self, error: TransportError) {
		self.state().fail_next_activation = Some(error);
	}

	pub fn activations(&self) -> Vec<(String, ActivationRequest)> {
		self.state()
			.activations
			.iter()
			.map(|submission| (submission.scope_id.clone(), submission.request.clone()))
			.collect()
	}

	pub fn activation_listener(&self) -> Option<ActivationListener> {
		self.state().activations.last().map(|submission| submission.listener.clone())
	}

	/// Sends an out-of-band invalidation, as the scope registry would.
	pub fn invalidate(&self, scope_id: &str) -> bool {
		self.state().invalidations.as_ref().is_some_and(|listener| listener.notify(scope_id))
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl ScopeBackend for ScriptedBackend {
	fn list_scopes(&self) -> BoxFuture<'_, Result<Vec<ScopeMetadata>, TransportError>> {
		Box::pin(async move {
			let mut state = self.state();

			state.listing_calls += 1;

			state.listing.clone().unwrap_or_else(|| Ok(Vec::new()))
		})
	}

	fn submit(
		&self,
		query: &Query,
		listener: SearchListener,
	) -> Result<Box<dyn OperationControl>, TransportError> {
		let mut state = self.state();

		if let Some(error) = state.fail_next_submit.take() {
			return Err(error);
		}

		state.submissions.push(Submission { query: query.clone(), listener: listener.clone() });

		Ok(Box::new(ScriptedControl {
			state: self.state.clone(),
			target: Target::Search { scope_id: query.scope_id.clone(), seq: query.seq, listener },
		}))
	}

	fn submit_activation(
		&self,
		scope_id: &str,
		request: &ActivationRequest,
		listener: ActivationListener,
	) -> Result<Box<dyn OperationControl>, TransportError> {
		let mut state = self.state();

		if let Some(error) = state.fail_next_activation.take() {
			return Err(error);
		}

		state.activations.push(ActivationSubmission {
			scope_id: scope_id.to_string(),
			request: request.clone(),
			listener,
		});

		Ok(Box::new(ScriptedControl { state: self.state.clone(), target: Target::Activation }))
	}

	fn watch_invalidations(&self, listener: InvalidationListener) {
		self.state().invalidations = Some(listener);
	}
}

enum Target {
	Search { scope_id: String, seq: u64, listener: SearchListener },
	Activation,
}

struct ScriptedControl {
	state: Arc<Mutex<State>>,
	target: Target,
}
impl OperationControl for ScriptedControl {
	fn cancel(&self) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		match &self.target {
			Target::Search { scope_id, seq, listener } => {
				state.cancelled.push((scope_id.clone(), *seq));

				if let Some(batch) = state.push_on_cancel.clone() {
					let accepted = listener.push(batch);

					state.cancel_pushes.push(accepted);
				}
			},
			Target::Activation => state.activation_cancels += 1,
		}
	}
}

/// A dispatcher wired to a scripted backend, with its delivery queue and events.
pub struct DispatcherHarness {
	pub backend: Arc<ScriptedBackend>,
	pub dispatcher: ScopeDispatcher,
	pub deliveries: UnboundedReceiver<Delivery>,
	pub events: broadcast::Receiver<ShellEvent>,
}
impl DispatcherHarness {
	pub fn new(metadata: ScopeMetadata) -> Self {
		let config = test_config();
		let backend = Arc::new(ScriptedBackend::new(vec![metadata.clone()]));
		let (sender, deliveries) = mpsc::unbounded_channel();
		let bus = EventBus::new(config.events.capacity);
		let events = bus.subscribe();
		let context = DispatcherContext {
			settings: config.dispatch.clone(),
			backend: backend.clone(),
			deliveries: sender,
		};
		let dispatcher = ScopeDispatcher::new(metadata.clone(), true, context, bus.scope(metadata.id));

		Self { backend, dispatcher, deliveries, events }
	}

	/// Applies every queued delivery, as the shell loop would.
	pub fn pump(&mut self, now: Instant) {
		while let Ok(delivery) = self.deliveries.try_recv() {
			self.dispatcher.deliver(delivery, now);
		}
	}

	pub fn events(&mut self) -> Vec<ScopeEvent> {
		drain_events(&mut self.events)
			.into_iter()
			.filter_map(|event| match event {
				ShellEvent::Scope { event, .. } => Some(event),
				ShellEvent::Directory(_) => None,
			})
			.collect()
	}

	pub fn listener(&self) -> SearchListener {
		self.backend
			.listener(self.dispatcher.id())
			.expect("A search must have been submitted.")
	}
}
