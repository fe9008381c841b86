//! Per-scope query controller.
//!
//! All methods run on the shell loop and take the current time explicitly;
//! timers are plain deadlines that [`ScopeDispatcher::poll_timers`] fires.

use std::{
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use tokio::{sync::mpsc::UnboundedSender, time::Instant};
use uuid::Uuid;

use scope_config::Dispatch;
use scope_domain::{
	ActivationReply, ActivationRequest, ActivationResponse, CannedQuery, FilterDefinition,
	FilterSnapshot, FilterValue, NavigationNode, ResultBatch, ScopeIdentity, ScopeMetadata,
	ScopeResult, ScopeStatus,
};

use crate::{
	Error, Result,
	aggregator::{CategorySnapshot, ResultAggregator},
	backend::ScopeBackend,
	events::{ActivationOutcome, ScopeEvent, ScopeEvents},
	filters::FilterState,
	navigation::NavigationTree,
	operation::{
		ActivationDelivery, ActivationListener, Completion, Delivery, Listener, OperationHandle,
		OperationId, Payload, SearchDelivery, SearchListener,
	},
	query::Query,
};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
	Idle,
	Debouncing,
	Dispatching,
	Streaming,
	Completed,
	Cancelled,
	Failed,
}

/// What a dispatcher needs from its surroundings.
#[derive(Clone)]
pub struct DispatcherContext {
	pub settings: Dispatch,
	pub backend: Arc<dyn ScopeBackend>,
	pub deliveries: UnboundedSender<Delivery>,
}

/// Serializable view of one scope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScopeSnapshot {
	pub identity: ScopeIdentity,
	pub status: ScopeStatus,
	pub state: DispatchState,
	pub active: bool,
	pub search_query: String,
	pub navigation_id: String,
	pub primary_navigation_tag: String,
	pub active_filters: usize,
	pub search_in_progress: bool,
	pub activation_in_progress: bool,
	pub results_dirty: bool,
	pub categories: Vec<CategorySnapshot>,
}

struct PendingActivation {
	result: ScopeResult,
	response: ActivationResponse,
}

pub struct ScopeDispatcher {
	instance: u64,
	identity: ScopeIdentity,
	metadata: ScopeMetadata,
	context: DispatcherContext,
	events: ScopeEvents,
	state: DispatchState,
	status: ScopeStatus,
	active: bool,
	text: String,
	session_id: Uuid,
	query_id: u32,
	seq: u64,
	activation_seq: u64,
	search: Option<OperationHandle>,
	activation: Option<OperationHandle>,
	activated: Option<ScopeResult>,
	aggregator: ResultAggregator,
	navigation: NavigationTree,
	filters: FilterState,
	pending_batch: ResultBatch,
	pending_navigation: Option<NavigationNode>,
	pending_filters: Option<(Vec<FilterDefinition>, FilterSnapshot)>,
	typing_deadline: Option<Instant>,
	flush_deadline: Option<Instant>,
	ttl_deadline: Option<Instant>,
	results_dirty: bool,
	initial_query_done: bool,
	search_in_progress: bool,
	activation_in_progress: bool,
	delayed_activation: Option<PendingActivation>,
	next_user_data: Option<Value>,
}
impl ScopeDispatcher {
	pub fn new(
		metadata: ScopeMetadata,
		favorite: bool,
		context: DispatcherContext,
		events: ScopeEvents,
	) -> Self {
		Self {
			instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
			identity: ScopeIdentity::from_metadata(&metadata, favorite),
			metadata,
			context,
			events,
			state: DispatchState::Idle,
			status: ScopeStatus::Okay,
			active: false,
			text: String::new(),
			session_id: Uuid::new_v4(),
			query_id: 0,
			seq: 0,
			activation_seq: 0,
			search: None,
			activation: None,
			activated: None,
			aggregator: ResultAggregator::new(),
			navigation: NavigationTree::new(),
			filters: FilterState::new(),
			pending_batch: ResultBatch::default(),
			pending_navigation: None,
			pending_filters: None,
			typing_deadline: None,
			flush_deadline: None,
			ttl_deadline: None,
			results_dirty: false,
			initial_query_done: false,
			search_in_progress: false,
			activation_in_progress: false,
			delayed_activation: None,
			next_user_data: None,
		}
	}

	pub fn id(&self) -> &str {
		&self.identity.id
	}

	/// Process-unique id of this dispatcher; deliveries are routed by it.
	pub fn instance(&self) -> u64 {
		self.instance
	}

	pub fn identity(&self) -> &ScopeIdentity {
		&self.identity
	}

	pub fn state(&self) -> DispatchState {
		self.state
	}

	pub fn status(&self) -> ScopeStatus {
		self.status
	}

	pub fn is_active(&self) -> bool {
		self.active
	}

	pub fn search_query(&self) -> &str {
		&self.text
	}

	pub fn session_id(&self) -> Uuid {
		self.session_id
	}

	/// Sequence number of the most recently dispatched search.
	pub fn current_seq(&self) -> u64 {
		self.seq
	}

	pub fn search_in_progress(&self) -> bool {
		self.search_in_progress
	}

	pub fn activation_in_progress(&self) -> bool {
		self.activation_in_progress
	}

	pub fn results_dirty(&self) -> bool {
		self.results_dirty
	}

	pub fn aggregator(&self) -> &ResultAggregator {
		&self.aggregator
	}

	pub fn navigation(&self) -> &NavigationTree {
		&self.navigation
	}

	pub fn navigation_mut(&mut self) -> &mut NavigationTree {
		&mut self.navigation
	}

	pub fn filters(&self) -> &FilterState {
		&self.filters
	}

	pub fn snapshot(&self) -> ScopeSnapshot {
		ScopeSnapshot {
			identity: self.identity.clone(),
			status: self.status,
			state: self.state,
			active: self.active,
			search_query: self.text.clone(),
			navigation_id: self.navigation.active().to_string(),
			primary_navigation_tag: self.navigation.primary_tag().to_string(),
			active_filters: self.filters.active_count(),
			search_in_progress: self.search_in_progress,
			activation_in_progress: self.activation_in_progress,
			results_dirty: self.results_dirty,
			categories: self.aggregator.snapshot(),
		}
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		[self.typing_deadline, self.flush_deadline, self.ttl_deadline].into_iter().flatten().min()
	}

	/// Updates the search text. On an active scope this (re)starts the typing
	/// timer; on an inactive one it drops the outstanding search and marks the
	/// results dirty.
	pub fn set_search_query(&mut self, text: impl Into<String>, now: Instant) {
		let text = text.into();

		if text == self.text {
			return;
		}

		self.replace_text(text);

		if self.active {
			self.typing_deadline = Some(now + self.context.settings.typing_delay());
			self.state = DispatchState::Debouncing;
		} else {
			self.cancel_search();
			self.set_results_dirty(true);
		}
	}

	pub fn set_active(&mut self, active: bool, now: Instant) {
		if active == self.active {
			return;
		}

		self.active = active;
		self.events.emit(ScopeEvent::ActiveChanged(active));

		if active && (self.results_dirty || !self.initial_query_done) {
			self.dispatch_logged(now);
		}
	}

	pub fn refresh(&mut self, now: Instant) -> Result<()> {
		self.dispatch_search(now)
	}

	/// Results may be stale: re-query now if active, otherwise on next activation.
	pub fn invalidate_results(&mut self, now: Instant) {
		if self.active {
			self.dispatch_logged(now);
		} else {
			self.cancel_search();
			self.set_results_dirty(true);
		}
	}

	pub fn set_navigation(&mut self, navigation_id: &str, now: Instant) -> Result<()> {
		self.navigation.set_active(navigation_id)?;
		self.emit_navigation();

		self.dispatch_search(now)
	}

	/// Returns to the root department.
	pub fn reset_primary_navigation_tag(&mut self, now: Instant) -> Result<()> {
		let root = self.navigation.root_id().unwrap_or_default().to_string();

		self.set_navigation(&root, now)
	}

	pub fn set_filter(&mut self, filter_id: &str, value: FilterValue, now: Instant) -> Result<()> {
		let active_count = self
			.filters
			.set_value(filter_id, value)
			.map_err(|err| Error::InvalidQuery { message: err.to_string() })?;

		self.events.emit(ScopeEvent::FiltersChanged { active_count });

		self.dispatch_search(now)
	}

	pub fn reset_filters(&mut self, now: Instant) -> Result<()> {
		let active_count = self.filters.reset();

		self.events.emit(ScopeEvent::FiltersChanged { active_count });

		self.dispatch_search(now)
	}

	/// Adopts a canned query wholesale and dispatches it without debounce.
	///
	/// A filter snapshot that does not fit the known filters is rejected before
	/// any state changes.
	pub fn perform_query(
		&mut self,
		query: CannedQuery,
		user_data: Option<Value>,
		now: Instant,
	) -> Result<()> {
		let CannedQuery { query_string, department_id, filter_state, .. } = query;

		if let Err(err) = self.filters.validate(&filter_state) {
			tracing::warn!(scope_id = %self.identity.id, error = %err, "Rejecting canned query.");

			return Err(Error::InvalidQuery { message: err.to_string() });
		}
		if query_string != self.text {
			self.replace_text(query_string);
		}

		self.navigation.assume_active(&department_id);
		self.emit_navigation();

		let active_count = self.filters.restore(filter_state);

		self.events.emit(ScopeEvent::FiltersChanged { active_count });

		self.next_user_data = user_data;

		self.dispatch_search(now)
	}

	/// Cancels any outstanding search and sends a new one built from the current
	/// text, navigation and filters.
	///
	/// Invalid navigation or filter references abort before anything is touched.
	pub fn dispatch_search(&mut self, now: Instant) -> Result<()> {
		let filter_state = self.filters.snapshot();

		if let Err(err) = self.filters.validate(&filter_state) {
			tracing::warn!(scope_id = %self.identity.id, error = %err, "Dropping invalid query.");

			return Err(Error::InvalidQuery { message: err.to_string() });
		}

		self.state = DispatchState::Dispatching;
		self.typing_deadline = None;
		self.ttl_deadline = None;

		if let Some(mut handle) = self.search.take() {
			handle.invalidate();
		}

		self.discard_pending();

		self.seq += 1;
		self.query_id += 1;

		let query = Query {
			scope_id: self.identity.id.clone(),
			seq: self.seq,
			session_id: self.session_id,
			query_id: self.query_id,
			text: self.text.clone(),
			navigation_id: self.navigation.active().to_string(),
			filter_state,
			user_data: self.next_user_data.take(),
		};

		self.aggregator.mark_new_search();
		self.initial_query_done = true;
		self.set_results_dirty(false);

		let listener = SearchListener::new(
			self.identity.id.clone(),
			self.instance,
			self.seq,
			self.context.deliveries.clone(),
		);

		match self.context.backend.submit(&query, listener.clone()) {
			Ok(control) => {
				self.search = Some(OperationHandle::new(Listener::Search(listener), control));
				self.state = DispatchState::Streaming;

				tracing::debug!(scope_id = %self.identity.id, seq = self.seq, "Search dispatched.");

				self.events.emit(ScopeEvent::QueryDispatched { seq: self.seq });
				self.set_search_in_progress(true);
			},
			Err(err) => {
				listener.detach();

				tracing::warn!(scope_id = %self.identity.id, error = %err, "Search submission failed.");

				self.state = DispatchState::Failed;
				self.set_status(err.status());
				self.set_search_in_progress(false);
			},
		}

		Ok(())
	}

	/// Applies one backend callback. Deliveries for anything but the live
	/// operation are dropped.
	///
	/// Returns a query meant for another scope when an activation asks for one.
	pub fn deliver(&mut self, delivery: Delivery, now: Instant) -> Option<CannedQuery> {
		match delivery.payload {
			Payload::Search(payload) => {
				if !is_live(self.search.as_ref(), delivery.operation) {
					tracing::trace!(
						scope_id = %self.identity.id,
						seq = delivery.operation.seq,
						"Dropping stale search delivery."
					);

					return None;
				}

				self.on_search(payload, now)
			},
			Payload::Activation(payload) => {
				if !is_live(self.activation.as_ref(), delivery.operation) {
					tracing::trace!(
						scope_id = %self.identity.id,
						seq = delivery.operation.seq,
						"Dropping stale activation delivery."
					);

					return None;
				}

				self.on_activation(payload, now)
			},
		}
	}

	/// Fires whichever timers are due at `now`.
	pub fn poll_timers(&mut self, now: Instant) {
		if self.flush_deadline.is_some_and(|deadline| deadline <= now) {
			self.flush_deadline = None;
			self.flush_updates();
		}
		if self.typing_deadline.is_some_and(|deadline| deadline <= now) {
			self.typing_deadline = None;
			self.dispatch_logged(now);
		}
		if self.ttl_deadline.is_some_and(|deadline| deadline <= now) {
			self.ttl_deadline = None;

			tracing::debug!(scope_id = %self.identity.id, "Results expired.");

			self.invalidate_results(now);
		}
	}

	/// Applies buffered batches to the aggregator. An empty buffer is a no-op.
	pub fn flush_updates(&mut self) {
		if self.pending_batch.is_empty() {
			return;
		}

		let ResultBatch { categories, results } = std::mem::take(&mut self.pending_batch);

		for category in categories {
			self.aggregator.register_category(category);
		}

		let mut run: Vec<ScopeResult> = Vec::new();

		for result in results {
			if run.last().is_some_and(|last| last.category_id != result.category_id) {
				let category_id = run[0].category_id.clone();

				self.aggregator.append_results(&category_id, std::mem::take(&mut run));
			}

			run.push(result);
		}
		if let Some(first) = run.first() {
			let category_id = first.category_id.clone();

			self.aggregator.append_results(&category_id, run);
		}

		self.events.emit_all(self.aggregator.drain_events());
	}

	pub fn activate(&mut self, result: ScopeResult) {
		self.submit_activation(ActivationRequest { result, action_id: None });
	}

	pub fn activate_action(&mut self, result: ScopeResult, action_id: impl Into<String>) {
		self.submit_activation(ActivationRequest { result, action_id: Some(action_id.into()) });
	}

	pub fn cancel_activation(&mut self) {
		if let Some(mut handle) = self.activation.take() {
			handle.invalidate();
		}

		self.delayed_activation = None;
		self.set_activation_in_progress(false);
	}

	/// Replaces a category renderer with a JSON descriptor.
	pub fn override_category_renderer(&mut self, category_id: &str, renderer: &str) -> Result<bool> {
		let renderer: Value = serde_json::from_str(renderer)
			.map_err(|err| scope_domain::Error::InvalidRenderer { source: err })?;
		let present = self.aggregator.override_renderer(category_id, renderer);

		self.events.emit_all(self.aggregator.drain_events());

		Ok(present)
	}

	/// Drops every category, e.g. when the scope is being torn down.
	pub fn clear_results(&mut self) {
		self.aggregator.clear_all();
		self.events.emit_all(self.aggregator.drain_events());
	}

	pub fn set_favorite(&mut self, favorite: bool) {
		if self.identity.favorite == favorite {
			return;
		}

		self.identity.favorite = favorite;
		self.events.emit(ScopeEvent::FavoriteChanged(favorite));
	}

	/// Takes fresh descriptive metadata. Returns whether the identity changed.
	pub fn refresh_metadata(&mut self, metadata: &ScopeMetadata) -> bool {
		self.metadata = metadata.clone();

		self.identity.refresh(metadata)
	}

	/// Cancels everything in flight and empties the model.
	pub fn close(&mut self) {
		self.cancel_search();
		self.cancel_activation();
		self.typing_deadline = None;
		self.ttl_deadline = None;
		self.clear_results();
	}

	fn on_search(&mut self, payload: SearchDelivery, now: Instant) -> Option<CannedQuery> {
		match payload {
			SearchDelivery::Results(batch) => {
				self.pending_batch.extend(batch);

				if self.flush_deadline.is_none() {
					self.flush_deadline = Some(now + self.context.settings.flush_interval());
				}

				None
			},
			SearchDelivery::Navigation(root) => {
				self.pending_navigation = Some(root);

				None
			},
			SearchDelivery::Filters { definitions, state } => {
				self.pending_filters = Some((definitions, state));

				None
			},
			SearchDelivery::Finished(completion) => self.finalize(completion, now),
		}
	}

	fn finalize(&mut self, completion: Completion, now: Instant) -> Option<CannedQuery> {
		self.flush_deadline = None;
		self.flush_updates();

		if let Some(mut handle) = self.search.take() {
			handle.release();
		}

		let finished = matches!(completion, Completion::Finished);

		match completion {
			Completion::Finished => {
				self.aggregator.purge_results();
				self.events.emit_all(self.aggregator.drain_events());
				self.apply_pending_navigation();
				self.apply_pending_filters();
				self.set_status(ScopeStatus::Okay);
				self.state = DispatchState::Completed;

				if let Some(ttl) = self.metadata.results_ttl_ms.filter(|ttl| *ttl > 0) {
					self.ttl_deadline = Some(now + Duration::from_millis(ttl));
				}
			},
			Completion::Cancelled => {
				self.discard_pending();
				self.state = DispatchState::Cancelled;
			},
			Completion::Failed(err) => {
				tracing::warn!(scope_id = %self.identity.id, error = %err, "Search failed.");

				self.discard_pending();
				self.state = DispatchState::Failed;
				self.set_status(err.status());
			},
		}

		self.set_search_in_progress(false);

		if finished && let Some(pending) = self.delayed_activation.take() {
			return self.handle_activation(pending.response, pending.result, now);
		}

		None
	}

	fn on_activation(&mut self, payload: ActivationDelivery, now: Instant) -> Option<CannedQuery> {
		if let Some(mut handle) = self.activation.take() {
			handle.release();
		}

		let result = self.activated.take();

		match (payload, result) {
			(ActivationDelivery::Reply(ActivationReply::Immediate(response)), Some(result)) =>
				self.handle_activation(response, result, now),
			(ActivationDelivery::Reply(ActivationReply::Delayed(response)), Some(result)) => {
				tracing::debug!(scope_id = %self.identity.id, "Holding activation until the next search completes.");

				self.delayed_activation = Some(PendingActivation { result, response });

				None
			},
			(ActivationDelivery::Failed(err), _) => {
				tracing::warn!(scope_id = %self.identity.id, error = %err, "Activation failed.");

				self.set_activation_in_progress(false);
				self.events.failed_activation();

				None
			},
			(ActivationDelivery::Reply(_), None) => {
				self.set_activation_in_progress(false);

				None
			},
		}
	}

	fn handle_activation(
		&mut self,
		response: ActivationResponse,
		result: ScopeResult,
		now: Instant,
	) -> Option<CannedQuery> {
		self.set_activation_in_progress(false);

		match response {
			ActivationResponse::NotHandled => {
				self.emit_outcome(ActivationOutcome::NotHandled { uri: result.uri });

				None
			},
			ActivationResponse::ShowDash => {
				self.emit_outcome(ActivationOutcome::ShowDash);

				None
			},
			ActivationResponse::HideDash => {
				self.emit_outcome(ActivationOutcome::HideDash);

				None
			},
			ActivationResponse::ShowPreview => {
				self.emit_outcome(ActivationOutcome::ShowPreview { result });

				None
			},
			ActivationResponse::PerformQuery { query, user_data } => {
				if query.scope_id == self.identity.id {
					if let Err(err) = self.perform_query(query, user_data, now) {
						tracing::warn!(scope_id = %self.identity.id, error = %err, "Activation query was rejected.");
					}

					return None;
				}

				self.emit_outcome(ActivationOutcome::GotoScope { query: query.clone() });

				Some(query)
			},
			ActivationResponse::UpdateResult { result: updated } => {
				let ScopeResult { uri, category_id, payload } = updated;

				if self.aggregator.update_result(&uri, &category_id, payload) {
					self.events.emit_all(self.aggregator.drain_events());
					self.emit_outcome(ActivationOutcome::ResultUpdated { uri });
				}

				None
			},
		}
	}

	fn submit_activation(&mut self, request: ActivationRequest) {
		if let Some(mut handle) = self.activation.take() {
			handle.invalidate();
		}

		self.delayed_activation = None;
		self.activation_seq += 1;

		let listener = ActivationListener::new(
			self.identity.id.clone(),
			self.instance,
			self.activation_seq,
			self.context.deliveries.clone(),
		);

		match self.context.backend.submit_activation(&self.identity.id, &request, listener.clone()) {
			Ok(control) => {
				self.activation = Some(OperationHandle::new(Listener::Activation(listener), control));
				self.activated = Some(request.result);
				self.set_activation_in_progress(true);
			},
			Err(err) => {
				listener.detach();

				tracing::warn!(scope_id = %self.identity.id, error = %err, "Activation submission failed.");

				self.activated = None;
				self.set_activation_in_progress(false);
				self.events.failed_activation();
			},
		}
	}

	fn apply_pending_navigation(&mut self) {
		let Some(root) = self.pending_navigation.take() else {
			return;
		};
		let report = self.navigation.merge(root);

		for node_id in report.loaded {
			self.events.emit(ScopeEvent::NavigationLoaded { node_id });
		}

		if report.replaced || report.primary_tag_changed {
			self.emit_navigation();
		}
	}

	fn apply_pending_filters(&mut self) {
		let Some((definitions, state)) = self.pending_filters.take() else {
			return;
		};
		let before = self.filters.active_count();
		let active_count = self.filters.replace_definitions(definitions, state);

		if active_count != before {
			self.events.emit(ScopeEvent::FiltersChanged { active_count });
		}
	}

	fn cancel_search(&mut self) {
		self.typing_deadline = None;

		let Some(mut handle) = self.search.take() else {
			return;
		};

		handle.invalidate();
		self.discard_pending();
		self.state = DispatchState::Cancelled;
		self.set_search_in_progress(false);
	}

	fn dispatch_logged(&mut self, now: Instant) {
		// Rejections are logged inside.
		let _ = self.dispatch_search(now);
	}

	fn replace_text(&mut self, text: String) {
		if self.text.is_empty() || text.is_empty() {
			self.session_id = Uuid::new_v4();
			self.query_id = 0;
		}

		self.text = text;
		self.events.emit(ScopeEvent::SearchQueryChanged(self.text.clone()));
	}

	fn discard_pending(&mut self) {
		self.pending_batch = ResultBatch::default();
		self.pending_navigation = None;
		self.pending_filters = None;
		self.flush_deadline = None;
	}

	fn emit_navigation(&self) {
		self.events.emit(ScopeEvent::NavigationChanged {
			navigation_id: self.navigation.active().to_string(),
			primary_tag: self.navigation.primary_tag().to_string(),
		});
	}

	fn emit_outcome(&self, outcome: ActivationOutcome) {
		self.events.emit(ScopeEvent::Activation(outcome));
	}

	fn set_status(&mut self, status: ScopeStatus) {
		if self.status != status {
			self.status = status;
			self.events.emit(ScopeEvent::StatusChanged(status));
		}
	}

	fn set_search_in_progress(&mut self, in_progress: bool) {
		if self.search_in_progress != in_progress {
			self.search_in_progress = in_progress;
			self.events.emit(ScopeEvent::SearchInProgressChanged(in_progress));
		}
	}

	fn set_activation_in_progress(&mut self, in_progress: bool) {
		if self.activation_in_progress != in_progress {
			self.activation_in_progress = in_progress;
			self.events.emit(ScopeEvent::ActivationInProgressChanged(in_progress));
		}
	}

	fn set_results_dirty(&mut self, dirty: bool) {
		if self.results_dirty != dirty {
			self.results_dirty = dirty;
			self.events.emit(ScopeEvent::ResultsDirtyChanged(dirty));
		}
	}
}
impl std::fmt::Debug for ScopeDispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScopeDispatcher")
			.field("id", &self.identity.id)
			.field("instance", &self.instance)
			.field("state", &self.state)
			.field("seq", &self.seq)
			.field("active", &self.active)
			.finish()
	}
}

fn is_live(handle: Option<&OperationHandle>, operation: OperationId) -> bool {
	handle.is_some_and(|handle| handle.is_valid() && handle.id() == operation)
}
