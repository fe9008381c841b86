//! Home event loop. One task owns the directory and every dispatcher; backend
//! callbacks, listings, invalidations and commands all arrive over channels.

use std::sync::Arc;

use tokio::{
	sync::{
		broadcast,
		mpsc::{self, UnboundedReceiver, UnboundedSender},
		oneshot,
	},
	task::JoinHandle,
	time::Instant,
};

use scope_config::Config;
use scope_domain::{CannedQuery, FilterValue, ScopeResult};

use crate::{
	Error, Result,
	backend::ScopeBackend,
	directory::{DiscoveryResult, FavoritesStore, ScopeDirectory},
	dispatcher::{DispatcherContext, ScopeDispatcher, ScopeSnapshot},
	events::{EventBus, ShellEvent},
	operation::{Delivery, InvalidationListener},
};

#[derive(Debug)]
pub enum ShellCommand {
	SetSearchQuery { scope_id: String, text: String },
	SetActive { scope_id: String, active: bool },
	Refresh { scope_id: String },
	InvalidateResults { scope_id: String },
	SetNavigation { scope_id: String, navigation_id: String },
	ResetPrimaryNavigationTag { scope_id: String },
	SetFilter { scope_id: String, filter_id: String, value: FilterValue },
	ResetFilters { scope_id: String },
	PerformQuery { query: CannedQuery },
	Activate { scope_id: String, result: ScopeResult },
	ActivateAction { scope_id: String, result: ScopeResult, action_id: String },
	CancelActivation { scope_id: String },
	OverrideCategoryRenderer { scope_id: String, category_id: String, renderer: String },
	CloseScope { scope_id: String },
	SetFavorite { scope_id: String, favorite: bool },
	MoveFavorite { scope_id: String, index: usize },
	FavoritesStoreChanged,
	RefreshMetadata,
	Snapshot { scope_id: String, reply: oneshot::Sender<Option<ScopeSnapshot>> },
	Favorites { reply: oneshot::Sender<Vec<String>> },
	Shutdown,
}

/// Cloneable front end to a running [`Shell`].
#[derive(Clone, Debug)]
pub struct ShellHandle {
	commands: UnboundedSender<ShellCommand>,
	bus: EventBus,
}
impl ShellHandle {
	pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
		self.bus.subscribe()
	}

	pub fn send(&self, command: ShellCommand) -> Result<()> {
		self.commands.send(command).map_err(|_| Error::ShellClosed)
	}

	pub fn set_search_query(&self, scope_id: &str, text: &str) -> Result<()> {
		self.send(ShellCommand::SetSearchQuery {
			scope_id: scope_id.to_string(),
			text: text.to_string(),
		})
	}

	pub fn set_active(&self, scope_id: &str, active: bool) -> Result<()> {
		self.send(ShellCommand::SetActive { scope_id: scope_id.to_string(), active })
	}

	pub fn refresh(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::Refresh { scope_id: scope_id.to_string() })
	}

	pub fn invalidate_results(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::InvalidateResults { scope_id: scope_id.to_string() })
	}

	pub fn set_navigation(&self, scope_id: &str, navigation_id: &str) -> Result<()> {
		self.send(ShellCommand::SetNavigation {
			scope_id: scope_id.to_string(),
			navigation_id: navigation_id.to_string(),
		})
	}

	pub fn reset_primary_navigation_tag(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::ResetPrimaryNavigationTag { scope_id: scope_id.to_string() })
	}

	pub fn set_filter(&self, scope_id: &str, filter_id: &str, value: FilterValue) -> Result<()> {
		self.send(ShellCommand::SetFilter {
			scope_id: scope_id.to_string(),
			filter_id: filter_id.to_string(),
			value,
		})
	}

	pub fn reset_filters(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::ResetFilters { scope_id: scope_id.to_string() })
	}

	pub fn perform_query(&self, query: CannedQuery) -> Result<()> {
		self.send(ShellCommand::PerformQuery { query })
	}

	pub fn activate(&self, scope_id: &str, result: ScopeResult) -> Result<()> {
		self.send(ShellCommand::Activate { scope_id: scope_id.to_string(), result })
	}

	pub fn activate_action(&self, scope_id: &str, result: ScopeResult, action_id: &str) -> Result<()> {
		self.send(ShellCommand::ActivateAction {
			scope_id: scope_id.to_string(),
			result,
			action_id: action_id.to_string(),
		})
	}

	pub fn cancel_activation(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::CancelActivation { scope_id: scope_id.to_string() })
	}

	pub fn override_category_renderer(
		&self,
		scope_id: &str,
		category_id: &str,
		renderer: &str,
	) -> Result<()> {
		self.send(ShellCommand::OverrideCategoryRenderer {
			scope_id: scope_id.to_string(),
			category_id: category_id.to_string(),
			renderer: renderer.to_string(),
		})
	}

	pub fn close_scope(&self, scope_id: &str) -> Result<()> {
		self.send(ShellCommand::CloseScope { scope_id: scope_id.to_string() })
	}

	pub fn set_favorite(&self, scope_id: &str, favorite: bool) -> Result<()> {
		self.send(ShellCommand::SetFavorite { scope_id: scope_id.to_string(), favorite })
	}

	pub fn move_favorite(&self, scope_id: &str, index: usize) -> Result<()> {
		self.send(ShellCommand::MoveFavorite { scope_id: scope_id.to_string(), index })
	}

	pub fn favorites_store_changed(&self) -> Result<()> {
		self.send(ShellCommand::FavoritesStoreChanged)
	}

	pub fn refresh_metadata(&self) -> Result<()> {
		self.send(ShellCommand::RefreshMetadata)
	}

	pub async fn snapshot(&self, scope_id: &str) -> Result<Option<ScopeSnapshot>> {
		let (reply, receiver) = oneshot::channel();

		self.send(ShellCommand::Snapshot { scope_id: scope_id.to_string(), reply })?;

		receiver.await.map_err(|_| Error::ShellClosed)
	}

	pub async fn favorites(&self) -> Result<Vec<String>> {
		let (reply, receiver) = oneshot::channel();

		self.send(ShellCommand::Favorites { reply })?;

		receiver.await.map_err(|_| Error::ShellClosed)
	}

	pub fn shutdown(&self) -> Result<()> {
		self.send(ShellCommand::Shutdown)
	}
}

pub struct Shell {
	directory: ScopeDirectory,
	commands: UnboundedReceiver<ShellCommand>,
	deliveries: UnboundedReceiver<Delivery>,
	discoveries: UnboundedReceiver<DiscoveryResult>,
	invalidations: UnboundedReceiver<String>,
	discovery_deadline: Option<Instant>,
}
impl Shell {
	pub fn new(
		config: &Config,
		backend: Arc<dyn ScopeBackend>,
		store: Arc<dyn FavoritesStore>,
	) -> (Self, ShellHandle) {
		let bus = EventBus::new(config.events.capacity);
		let (command_sender, commands) = mpsc::unbounded_channel();
		let (delivery_sender, deliveries) = mpsc::unbounded_channel();
		let (discovery_sender, discoveries) = mpsc::unbounded_channel();
		let (invalidation_sender, invalidations) = mpsc::unbounded_channel();

		backend.watch_invalidations(InvalidationListener::new(invalidation_sender));

		let context = DispatcherContext {
			settings: config.dispatch.clone(),
			backend,
			deliveries: delivery_sender,
		};
		let directory = ScopeDirectory::new(
			config.directory.clone(),
			context,
			store,
			discovery_sender,
			bus.clone(),
		);
		let shell = Self {
			directory,
			commands,
			deliveries,
			discoveries,
			invalidations,
			discovery_deadline: Some(Instant::now() + config.directory.discovery_delay()),
		};

		(shell, ShellHandle { commands: command_sender, bus })
	}

	/// Starts the loop on the current runtime.
	pub fn spawn(
		config: &Config,
		backend: Arc<dyn ScopeBackend>,
		store: Arc<dyn FavoritesStore>,
	) -> (ShellHandle, JoinHandle<()>) {
		let (shell, handle) = Self::new(config, backend, store);

		(handle, tokio::spawn(shell.run()))
	}

	pub async fn run(mut self) {
		tracing::debug!("Shell loop started.");

		loop {
			let deadline = self.next_deadline();

			tokio::select! {
				command = self.commands.recv() => {
					let Some(command) = command else {
						break;
					};

					if !self.handle_command(command, Instant::now()) {
						break;
					}
				},
				Some(delivery) = self.deliveries.recv() => {
					self.directory.deliver(delivery, Instant::now());
				},
				Some(result) = self.discoveries.recv() => {
					self.directory.finish_discovery(result, Instant::now());
				},
				Some(scope_id) = self.invalidations.recv() => {
					self.directory.invalidate_scope_results(&scope_id, Instant::now());
				},
				() = sleep_until(deadline) => {
					self.poll_timers(Instant::now());
				},
			}
		}

		self.directory.shutdown();

		tracing::debug!("Shell loop stopped.");
	}

	fn next_deadline(&self) -> Option<Instant> {
		[self.discovery_deadline, self.directory.next_deadline()].into_iter().flatten().min()
	}

	fn poll_timers(&mut self, now: Instant) {
		if self.discovery_deadline.is_some_and(|deadline| deadline <= now) {
			self.discovery_deadline = None;

			if let Err(err) = self.directory.start_discovery() {
				tracing::debug!(error = %err, "Initial discovery skipped.");
			}
		}

		self.directory.poll_timers(now);
	}

	fn handle_command(&mut self, command: ShellCommand, now: Instant) -> bool {
		let outcome = match command {
			ShellCommand::Shutdown => return false,
			ShellCommand::SetSearchQuery { scope_id, text } =>
				self.with_scope(&scope_id, |scope| {
					scope.set_search_query(text, now);

					Ok(())
				}),
			ShellCommand::SetActive { scope_id, active } => self.with_scope(&scope_id, |scope| {
				scope.set_active(active, now);

				Ok(())
			}),
			ShellCommand::Refresh { scope_id } =>
				self.with_scope(&scope_id, |scope| scope.refresh(now)),
			ShellCommand::InvalidateResults { scope_id } => self.with_scope(&scope_id, |scope| {
				scope.invalidate_results(now);

				Ok(())
			}),
			ShellCommand::SetNavigation { scope_id, navigation_id } =>
				self.with_scope(&scope_id, |scope| scope.set_navigation(&navigation_id, now)),
			ShellCommand::ResetPrimaryNavigationTag { scope_id } =>
				self.with_scope(&scope_id, |scope| scope.reset_primary_navigation_tag(now)),
			ShellCommand::SetFilter { scope_id, filter_id, value } =>
				self.with_scope(&scope_id, |scope| scope.set_filter(&filter_id, value, now)),
			ShellCommand::ResetFilters { scope_id } =>
				self.with_scope(&scope_id, |scope| scope.reset_filters(now)),
			ShellCommand::PerformQuery { query } => self.directory.perform_query(query, now),
			ShellCommand::Activate { scope_id, result } => self.with_scope(&scope_id, |scope| {
				scope.activate(result);

				Ok(())
			}),
			ShellCommand::ActivateAction { scope_id, result, action_id } =>
				self.with_scope(&scope_id, |scope| {
					scope.activate_action(result, action_id);

					Ok(())
				}),
			ShellCommand::CancelActivation { scope_id } => self.with_scope(&scope_id, |scope| {
				scope.cancel_activation();

				Ok(())
			}),
			ShellCommand::OverrideCategoryRenderer { scope_id, category_id, renderer } =>
				self.with_scope(&scope_id, |scope| {
					if !scope.override_category_renderer(&category_id, &renderer)? {
						tracing::debug!(%category_id, "Renderer override stored for a category not yet seen.");
					}

					Ok(())
				}),
			ShellCommand::CloseScope { scope_id } => {
				if !self.directory.close_scope(&scope_id) {
					tracing::debug!(%scope_id, "No temporary scope to close.");
				}

				Ok(())
			},
			ShellCommand::SetFavorite { scope_id, favorite } =>
				self.directory.set_favorite(&scope_id, favorite, now),
			ShellCommand::MoveFavorite { scope_id, index } =>
				self.directory.move_favorite(&scope_id, index, now),
			ShellCommand::FavoritesStoreChanged => {
				self.directory.reconcile_favorites(now);

				Ok(())
			},
			ShellCommand::RefreshMetadata => self.directory.refresh_metadata(),
			ShellCommand::Snapshot { scope_id, reply } => {
				let snapshot = self.directory.scope(&scope_id).map(ScopeDispatcher::snapshot);

				// The caller may have stopped waiting.
				let _ = reply.send(snapshot);

				Ok(())
			},
			ShellCommand::Favorites { reply } => {
				let _ = reply.send(self.directory.favorites().to_vec());

				Ok(())
			},
		};

		if let Err(err) = outcome {
			tracing::warn!(error = %err, "Shell command failed.");
		}

		true
	}

	fn with_scope(
		&mut self,
		scope_id: &str,
		action: impl FnOnce(&mut ScopeDispatcher) -> Result<()>,
	) -> Result<()> {
		action(self.directory.scope_mut(scope_id)?)
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}
