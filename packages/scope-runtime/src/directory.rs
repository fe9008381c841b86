//! Scope discovery and the favorites list.
//!
//! The directory is the only writer of the favorites collection. Requests to
//! toggle or reorder favorites rewrite the store and then run the same
//! reconciliation that a fresh scope listing runs.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex},
};

use tokio::{sync::mpsc::UnboundedSender, time::Instant};

use scope_domain::{CannedQuery, ScopeMetadata};

use crate::{
	Error, Result,
	backend::TransportError,
	dispatcher::{DispatcherContext, ScopeDispatcher},
	events::{DirectoryEvent, EventBus},
	operation::Delivery,
};

/// Invalidation sources whose notifications belong to another scope.
pub const INVALIDATION_FORWARDS: &[(&str, &str)] =
	&[("mediascanner-music", "musicaggregator"), ("mediascanner-video", "videoaggregator")];
/// Invalidation source that makes every favorite stale.
pub const INVALIDATE_ALL_SOURCE: &str = "smart-scopes";

/// Scope that should receive an invalidation reported for `scope_id`.
pub fn forward_invalidation(scope_id: &str) -> &str {
	INVALIDATION_FORWARDS
		.iter()
		.find(|(source, _)| *source == scope_id)
		.map(|(_, target)| *target)
		.unwrap_or(scope_id)
}

/// Persisted favorites ordering, one canned query uri per entry.
pub trait FavoritesStore
where
	Self: Send + Sync,
{
	fn load(&self) -> Vec<String>;

	fn store(&self, favorites: &[String]);
}

#[derive(Debug, Default)]
pub struct MemoryFavorites {
	entries: Mutex<Vec<String>>,
}
impl MemoryFavorites {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_scopes<I, S>(scope_ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let entries = scope_ids.into_iter().map(|id| CannedQuery::new(id).to_uri()).collect();

		Self { entries: Mutex::new(entries) }
	}

	pub fn scope_ids(&self) -> Vec<String> {
		self.load()
			.iter()
			.filter_map(|uri| CannedQuery::from_uri(uri).ok())
			.map(|query| query.scope_id)
			.collect()
	}
}
impl FavoritesStore for MemoryFavorites {
	fn load(&self) -> Vec<String> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	fn store(&self, favorites: &[String]) {
		*self.entries.lock().unwrap_or_else(|err| err.into_inner()) = favorites.to_vec();
	}
}

/// Pending removal of an un-favorited scope. Dropping the token cancels it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalToken {
	id: u64,
	scope_id: String,
	deadline: Instant,
}
impl RemovalToken {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn scope_id(&self) -> &str {
		&self.scope_id
	}

	pub fn deadline(&self) -> Instant {
		self.deadline
	}

	pub fn is_due(&self, now: Instant) -> bool {
		self.deadline <= now
	}
}

#[derive(Debug)]
pub struct DiscoveryResult {
	pub outcome: std::result::Result<Vec<ScopeMetadata>, TransportError>,
}

#[derive(Debug)]
struct FavoriteEntry {
	dispatcher: ScopeDispatcher,
	removal: Option<RemovalToken>,
}

/// Where a dispatcher lives inside the directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
	Favorite(usize),
	Overview,
	Temp(usize),
}

pub struct ScopeDirectory {
	settings: scope_config::Directory,
	context: DispatcherContext,
	store: Arc<dyn FavoritesStore>,
	discoveries: UnboundedSender<DiscoveryResult>,
	bus: EventBus,
	metadata: BTreeMap<String, ScopeMetadata>,
	favorites: Vec<FavoriteEntry>,
	favorite_ids: Vec<String>,
	overview: Option<ScopeDispatcher>,
	temp_scopes: Vec<ScopeDispatcher>,
	discovery_in_flight: bool,
	loaded: bool,
	next_token: u64,
}
impl ScopeDirectory {
	pub fn new(
		settings: scope_config::Directory,
		context: DispatcherContext,
		store: Arc<dyn FavoritesStore>,
		discoveries: UnboundedSender<DiscoveryResult>,
		bus: EventBus,
	) -> Self {
		Self {
			settings,
			context,
			store,
			discoveries,
			bus,
			metadata: BTreeMap::new(),
			favorites: Vec::new(),
			favorite_ids: Vec::new(),
			overview: None,
			temp_scopes: Vec::new(),
			discovery_in_flight: false,
			loaded: false,
			next_token: 0,
		}
	}

	pub fn is_loaded(&self) -> bool {
		self.loaded
	}

	pub fn discovery_in_flight(&self) -> bool {
		self.discovery_in_flight
	}

	/// Reconciled favorites ordering, without scopes awaiting removal.
	pub fn favorites(&self) -> &[String] {
		&self.favorite_ids
	}

	/// Scopes in the favorites model, including those awaiting removal.
	pub fn model_ids(&self) -> Vec<&str> {
		self.favorites.iter().map(|entry| entry.dispatcher.id()).collect()
	}

	pub fn pending_removals(&self) -> Vec<&RemovalToken> {
		self.favorites.iter().filter_map(|entry| entry.removal.as_ref()).collect()
	}

	pub fn metadata(&self, scope_id: &str) -> Option<&ScopeMetadata> {
		self.metadata.get(scope_id)
	}

	pub fn overview(&self) -> Option<&ScopeDispatcher> {
		self.overview.as_ref()
	}

	/// Looks a scope up by id. Favorites awaiting removal are only returned when
	/// no other instance of the scope is loaded.
	pub fn scope(&self, scope_id: &str) -> Option<&ScopeDispatcher> {
		match self.locate(scope_id)? {
			Slot::Favorite(index) => self.favorites.get(index).map(|entry| &entry.dispatcher),
			Slot::Overview => self.overview.as_ref(),
			Slot::Temp(index) => self.temp_scopes.get(index),
		}
	}

	pub fn temp_scope_ids(&self) -> Vec<&str> {
		self.temp_scopes.iter().map(ScopeDispatcher::id).collect()
	}

	pub fn scope_mut(&mut self, scope_id: &str) -> Result<&mut ScopeDispatcher> {
		self.find_mut(scope_id).ok_or_else(|| Error::UnknownScope { scope_id: scope_id.to_string() })
	}

	/// Lists scopes in the background. Only one listing runs at a time.
	pub fn start_discovery(&mut self) -> Result<()> {
		if self.discovery_in_flight {
			return Err(Error::DiscoveryInProgress);
		}

		self.discovery_in_flight = true;

		let backend = self.context.backend.clone();
		let discoveries = self.discoveries.clone();

		tokio::spawn(async move {
			let outcome = backend.list_scopes().await;

			if discoveries.send(DiscoveryResult { outcome }).is_err() {
				tracing::debug!("Shell stopped before scope discovery completed.");
			}
		});

		Ok(())
	}

	pub fn refresh_metadata(&mut self) -> Result<()> {
		self.start_discovery()
	}

	pub fn finish_discovery(&mut self, result: DiscoveryResult, now: Instant) {
		self.discovery_in_flight = false;

		match result.outcome {
			Ok(scopes) => {
				tracing::info!(count = scopes.len(), "Scope discovery completed.");

				self.metadata =
					scopes.into_iter().map(|metadata| (metadata.id.clone(), metadata)).collect();
			},
			Err(err) => {
				tracing::warn!(error = %err, cached = self.metadata.len(), "Scope discovery failed.");
			},
		}

		self.refresh_live_metadata();
		self.ensure_overview();
		self.reconcile_favorites(now);

		if self.loaded {
			self.bus.directory(DirectoryEvent::MetadataRefreshed);

			if let Some(overview) = self.overview.as_mut() {
				overview.invalidate_results(now);
			}

			return;
		}

		self.loaded = true;
		self.bus.directory(DirectoryEvent::Loaded);

		if self.settings.query_on_startup {
			for entry in &mut self.favorites {
				if entry.removal.is_some() || entry.dispatcher.is_active() {
					continue;
				}
				if let Err(err) = entry.dispatcher.refresh(now) {
					tracing::warn!(scope_id = entry.dispatcher.id(), error = %err, "Startup query failed.");
				}
			}
		}
	}

	/// Brings the favorites model in line with the store and the metadata cache.
	///
	/// Returns `false` without touching anything when the ordering is unchanged.
	pub fn reconcile_favorites(&mut self, now: Instant) -> bool {
		let target = self.target_favorites();

		if target == self.favorite_ids {
			return false;
		}

		self.apply_favorites(target, now);

		true
	}

	pub fn set_favorite(&mut self, scope_id: &str, favorite: bool, now: Instant) -> Result<()> {
		if !self.metadata.contains_key(scope_id) || scope_id == self.settings.overview_scope_id {
			return Err(Error::UnknownScope { scope_id: scope_id.to_string() });
		}

		let mut ids = self.favorite_ids.clone();
		let present = ids.iter().any(|id| id == scope_id);

		match (favorite, present) {
			(true, false) => ids.push(scope_id.to_string()),
			(false, true) => ids.retain(|id| id != scope_id),
			_ => return Ok(()),
		}

		self.write_store(&ids);
		self.reconcile_favorites(now);

		Ok(())
	}

	/// Moves a favorite so that it ends up at `index` (clamped to the end).
	pub fn move_favorite(&mut self, scope_id: &str, index: usize, now: Instant) -> Result<()> {
		let mut ids = self.favorite_ids.clone();
		let from = ids
			.iter()
			.position(|id| id == scope_id)
			.ok_or_else(|| Error::UnknownScope { scope_id: scope_id.to_string() })?;
		let id = ids.remove(from);
		let to = index.min(ids.len());

		ids.insert(to, id);

		if ids == self.favorite_ids {
			return Ok(());
		}

		self.write_store(&ids);
		self.reconcile_favorites(now);

		Ok(())
	}

	/// Routes a backend callback to the dispatcher instance that issued it;
	/// instances that are gone drop it.
	pub fn deliver(&mut self, delivery: Delivery, now: Instant) {
		let scope_id = delivery.scope_id.clone();
		let instance = delivery.operation.instance;
		let Some(dispatcher) =
			self.dispatchers_mut().find(|dispatcher| dispatcher.instance() == instance)
		else {
			tracing::trace!(%scope_id, instance, "Dropping delivery for a closed scope.");

			return;
		};

		if let Some(query) = dispatcher.deliver(delivery, now)
			&& let Err(err) = self.perform_query(query, now)
		{
			tracing::warn!(%scope_id, error = %err, "Activation handoff failed.");
		}
	}

	/// Runs a canned query, opening a temporary scope when the scope is not
	/// loaded or is a favorite awaiting removal.
	pub fn perform_query(&mut self, query: CannedQuery, now: Instant) -> Result<()> {
		let scope_id = query.scope_id.clone();
		let slot = match self.locate(&scope_id) {
			Some(slot) if !self.is_leaving(slot) => slot,
			_ => self.open_temp_scope(&scope_id)?,
		};
		let dispatcher = self
			.slot_mut(slot)
			.ok_or_else(|| Error::UnknownScope { scope_id: scope_id.clone() })?;

		dispatcher.perform_query(query, None, now)
	}

	/// Closes a temporary scope. Returns whether one was open.
	pub fn close_scope(&mut self, scope_id: &str) -> bool {
		let Some(mut dispatcher) = self.take_temp_scope(scope_id) else {
			return false;
		};

		dispatcher.close();

		true
	}

	pub fn invalidate_scope_results(&mut self, scope_id: &str, now: Instant) {
		if scope_id == INVALIDATE_ALL_SOURCE {
			tracing::debug!("Invalidating every favorite.");

			for entry in &mut self.favorites {
				entry.dispatcher.invalidate_results(now);
			}

			return;
		}

		let target = forward_invalidation(scope_id);

		match self.find_mut(target) {
			Some(dispatcher) => dispatcher.invalidate_results(now),
			None => tracing::trace!(scope_id = target, "Invalidation for a scope that is not loaded."),
		}
	}

	pub fn poll_timers(&mut self, now: Instant) {
		for dispatcher in self.dispatchers_mut() {
			dispatcher.poll_timers(now);
		}

		let mut index = 0;

		while index < self.favorites.len() {
			if !self.favorites[index].removal.as_ref().is_some_and(|token| token.is_due(now)) {
				index += 1;

				continue;
			}

			let mut entry = self.favorites.remove(index);
			let scope_id = entry.dispatcher.id().to_string();

			entry.dispatcher.close();

			tracing::info!(%scope_id, "Removed scope from favorites.");

			self.bus.directory(DirectoryEvent::FavoriteRemoved { index, scope_id });
		}
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		let dispatchers = self
			.favorites
			.iter()
			.map(|entry| &entry.dispatcher)
			.chain(self.overview.iter())
			.chain(self.temp_scopes.iter())
			.filter_map(ScopeDispatcher::next_deadline);
		let removals = self.pending_removals().into_iter().map(RemovalToken::deadline);

		dispatchers.chain(removals).min()
	}

	/// Cancels everything in flight; used when the shell stops.
	pub fn shutdown(&mut self) {
		for dispatcher in self.dispatchers_mut() {
			dispatcher.close();
		}
	}

	fn target_favorites(&self) -> Vec<String> {
		if self.settings.show_all_scopes {
			return self
				.metadata
				.values()
				.filter(|metadata| {
					!metadata.invisible && metadata.id != self.settings.overview_scope_id
				})
				.map(|metadata| metadata.id.clone())
				.collect();
		}

		let mut ids: Vec<String> = Vec::new();

		for uri in self.store.load() {
			let scope_id = match CannedQuery::from_uri(&uri) {
				Ok(query) => query.scope_id,
				Err(err) => {
					tracing::warn!(error = %err, "Ignoring malformed favorite entry.");

					continue;
				},
			};

			if !self.metadata.contains_key(&scope_id) {
				tracing::warn!(%scope_id, "Dropping favorite for an unavailable scope.");

				continue;
			}
			if scope_id == self.settings.overview_scope_id {
				tracing::warn!(%scope_id, "Dropping favorite entry for the overview scope.");

				continue;
			}
			if !ids.contains(&scope_id) {
				ids.push(scope_id);
			}
		}

		ids
	}

	fn apply_favorites(&mut self, target: Vec<String>, now: Instant) {
		let mut events = Vec::new();

		for entry in &mut self.favorites {
			let scope_id = entry.dispatcher.id().to_string();
			let wanted = target.contains(&scope_id);

			match (entry.removal.is_some(), wanted) {
				(false, false) => {
					self.next_token += 1;

					entry.dispatcher.set_favorite(false);
					entry.dispatcher.set_active(false, now);
					entry.removal = Some(RemovalToken {
						id: self.next_token,
						scope_id: scope_id.clone(),
						deadline: now + self.settings.removal_grace(),
					});

					events.push(DirectoryEvent::RemovalScheduled { scope_id });
				},
				(true, true) => {
					entry.removal = None;
					entry.dispatcher.set_favorite(true);

					events.push(DirectoryEvent::RemovalCancelled { scope_id });
				},
				_ => {},
			}
		}

		// Scopes awaiting removal keep their slot until the grace period ends.
		let mut order = target.clone();

		for (index, entry) in self.favorites.iter().enumerate() {
			if entry.removal.is_some() {
				order.insert(index.min(order.len()), entry.dispatcher.id().to_string());
			}
		}

		for (index, scope_id) in order.iter().enumerate() {
			if self.favorites.get(index).is_some_and(|entry| entry.dispatcher.id() == scope_id.as_str()) {
				continue;
			}

			if let Some(from) =
				self.favorites.iter().position(|entry| entry.dispatcher.id() == scope_id.as_str())
			{
				let entry = self.favorites.remove(from);

				self.favorites.insert(index, entry);
				events.push(DirectoryEvent::FavoriteMoved {
					from,
					to: index,
					scope_id: scope_id.clone(),
				});
			} else if let Some(mut dispatcher) = self.take_temp_scope(scope_id) {
				tracing::debug!(%scope_id, "Promoting temporary scope to a favorite.");

				dispatcher.set_favorite(true);
				self.favorites.insert(index, FavoriteEntry { dispatcher, removal: None });
				events.push(DirectoryEvent::FavoriteInserted { index, scope_id: scope_id.clone() });
			} else if let Some(metadata) = self.metadata.get(scope_id) {
				let dispatcher = ScopeDispatcher::new(
					metadata.clone(),
					true,
					self.context.clone(),
					self.bus.scope(scope_id.clone()),
				);

				self.favorites.insert(index, FavoriteEntry { dispatcher, removal: None });
				events.push(DirectoryEvent::FavoriteInserted { index, scope_id: scope_id.clone() });
			}
		}

		// A favorite that came back from its grace period supersedes a temporary copy.
		for scope_id in &target {
			if let Some(mut dispatcher) = self.take_temp_scope(scope_id) {
				dispatcher.close();
			}
		}

		for event in events {
			self.bus.directory(event);
		}

		self.favorite_ids = target;
		self.bus
			.directory(DirectoryEvent::FavoritesChanged { favorites: self.favorite_ids.clone() });

		if let Some(overview) = self.overview.as_mut() {
			overview.invalidate_results(now);
		}
	}

	fn ensure_overview(&mut self) {
		if self.overview.is_some() {
			return;
		}

		let scope_id = self.settings.overview_scope_id.clone();
		let Some(metadata) = self.metadata.get(&scope_id).cloned() else {
			tracing::debug!(%scope_id, "Overview scope is not installed.");

			return;
		};
		let dispatcher = match self.take_temp_scope(&scope_id) {
			Some(dispatcher) => dispatcher,
			None => ScopeDispatcher::new(
				metadata,
				false,
				self.context.clone(),
				self.bus.scope(scope_id.clone()),
			),
		};

		self.overview = Some(dispatcher);
		self.bus.directory(DirectoryEvent::OverviewChanged { scope_id });
	}

	fn refresh_live_metadata(&mut self) {
		let metadata = &self.metadata;
		let dispatchers = self
			.favorites
			.iter_mut()
			.map(|entry| &mut entry.dispatcher)
			.chain(self.overview.iter_mut())
			.chain(self.temp_scopes.iter_mut());

		for dispatcher in dispatchers {
			if let Some(fresh) = metadata.get(dispatcher.id()) {
				dispatcher.refresh_metadata(fresh);
			}
		}
	}

	fn dispatchers_mut(&mut self) -> impl Iterator<Item = &mut ScopeDispatcher> {
		self.favorites
			.iter_mut()
			.map(|entry| &mut entry.dispatcher)
			.chain(self.overview.iter_mut())
			.chain(self.temp_scopes.iter_mut())
	}

	fn find_mut(&mut self, scope_id: &str) -> Option<&mut ScopeDispatcher> {
		let slot = self.locate(scope_id)?;

		self.slot_mut(slot)
	}

	// Live favorites, then the overview, then temporary scopes, then favorites
	// awaiting removal.
	fn locate(&self, scope_id: &str) -> Option<Slot> {
		let favorite = |leaving: bool| {
			self.favorites
				.iter()
				.position(|entry| {
					entry.removal.is_some() == leaving && entry.dispatcher.id() == scope_id
				})
				.map(Slot::Favorite)
		};

		favorite(false)
			.or_else(|| {
				self.overview
					.as_ref()
					.filter(|overview| overview.id() == scope_id)
					.map(|_| Slot::Overview)
			})
			.or_else(|| {
				self.temp_scopes.iter().position(|scope| scope.id() == scope_id).map(Slot::Temp)
			})
			.or_else(|| favorite(true))
	}

	fn slot_mut(&mut self, slot: Slot) -> Option<&mut ScopeDispatcher> {
		match slot {
			Slot::Favorite(index) =>
				self.favorites.get_mut(index).map(|entry| &mut entry.dispatcher),
			Slot::Overview => self.overview.as_mut(),
			Slot::Temp(index) => self.temp_scopes.get_mut(index),
		}
	}

	fn is_leaving(&self, slot: Slot) -> bool {
		match slot {
			Slot::Favorite(index) =>
				self.favorites.get(index).is_some_and(|entry| entry.removal.is_some()),
			Slot::Overview | Slot::Temp(_) => false,
		}
	}

	fn open_temp_scope(&mut self, scope_id: &str) -> Result<Slot> {
		let metadata = self
			.metadata
			.get(scope_id)
			.ok_or_else(|| Error::UnknownScope { scope_id: scope_id.to_string() })?;
		let dispatcher = ScopeDispatcher::new(
			metadata.clone(),
			false,
			self.context.clone(),
			self.bus.scope(scope_id.to_string()),
		);

		self.temp_scopes.push(dispatcher);
		self.bus.directory(DirectoryEvent::TempScopeOpened { scope_id: scope_id.to_string() });

		Ok(Slot::Temp(self.temp_scopes.len() - 1))
	}

	/// Detaches a temporary scope from the directory without closing it.
	fn take_temp_scope(&mut self, scope_id: &str) -> Option<ScopeDispatcher> {
		let index = self.temp_scopes.iter().position(|scope| scope.id() == scope_id)?;
		let dispatcher = self.temp_scopes.remove(index);

		self.bus.directory(DirectoryEvent::TempScopeClosed { scope_id: scope_id.to_string() });

		Some(dispatcher)
	}

	fn write_store(&self, ids: &[String]) {
		let uris: Vec<String> = ids.iter().map(|id| CannedQuery::new(id.clone()).to_uri()).collect();

		self.store.store(&uris);
	}
}
