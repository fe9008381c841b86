use tokio::sync::broadcast;

use scope_domain::{CannedQuery, ScopeResult, ScopeStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryAttribute {
	Title,
	Icon,
	Renderer,
}

/// Outcome of an activation that the presentation layer has to act on.
#[derive(Clone, Debug, PartialEq)]
pub enum ActivationOutcome {
	/// The scope did not handle it; open the result uri directly.
	NotHandled { uri: String },
	ShowDash,
	HideDash,
	ShowPreview { result: ScopeResult },
	/// Switch to another scope, which has been asked to run `query`.
	GotoScope { query: CannedQuery },
	ResultUpdated { uri: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScopeEvent {
	CategoryInserted { index: usize, category_id: String },
	CategoryChanged { category_id: String, attributes: Vec<CategoryAttribute> },
	CategoryRemoved { index: usize, category_id: String },
	CategoriesCleared,
	ResultsReset { category_id: String },
	ResultsAppended { category_id: String, first: usize, count: usize },
	ResultUpdated { category_id: String, index: usize },
	CountChanged { category_id: String, count: usize },
	SearchInProgressChanged(bool),
	ActivationInProgressChanged(bool),
	StatusChanged(ScopeStatus),
	SearchQueryChanged(String),
	NavigationChanged { navigation_id: String, primary_tag: String },
	NavigationLoaded { node_id: String },
	FiltersChanged { active_count: usize },
	ResultsDirtyChanged(bool),
	ActiveChanged(bool),
	FavoriteChanged(bool),
	QueryDispatched { seq: u64 },
	Activation(ActivationOutcome),
	ActivationFailed { scope_id: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum DirectoryEvent {
	Loaded,
	MetadataRefreshed,
	FavoriteInserted { index: usize, scope_id: String },
	FavoriteMoved { from: usize, to: usize, scope_id: String },
	FavoriteRemoved { index: usize, scope_id: String },
	RemovalScheduled { scope_id: String },
	RemovalCancelled { scope_id: String },
	FavoritesChanged { favorites: Vec<String> },
	OverviewChanged { scope_id: String },
	TempScopeOpened { scope_id: String },
	TempScopeClosed { scope_id: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShellEvent {
	Scope { scope_id: String, event: ScopeEvent },
	Directory(DirectoryEvent),
}

/// Fan-out of typed shell events to any number of observers.
#[derive(Clone, Debug)]
pub struct EventBus {
	sender: broadcast::Sender<ShellEvent>,
}
impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));

		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
		self.sender.subscribe()
	}

	pub fn emit(&self, event: ShellEvent) {
		// No subscribers is not an error.
		let _ = self.sender.send(event);
	}

	pub fn directory(&self, event: DirectoryEvent) {
		self.emit(ShellEvent::Directory(event));
	}

	pub fn scope(&self, scope_id: impl Into<String>) -> ScopeEvents {
		ScopeEvents { scope_id: scope_id.into(), bus: self.clone() }
	}
}

/// Emitter bound to one scope id.
#[derive(Clone, Debug)]
pub struct ScopeEvents {
	scope_id: String,
	bus: EventBus,
}
impl ScopeEvents {
	pub fn emit(&self, event: ScopeEvent) {
		self.bus.emit(ShellEvent::Scope { scope_id: self.scope_id.clone(), event });
	}

	pub fn emit_all(&self, events: impl IntoIterator<Item = ScopeEvent>) {
		for event in events {
			self.emit(event);
		}
	}

	pub fn failed_activation(&self) {
		self.emit(ScopeEvent::ActivationFailed { scope_id: self.scope_id.clone() });
	}
}
