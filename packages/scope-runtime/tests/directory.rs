use std::{sync::Arc, time::Duration};

use tokio::{
	sync::{
		broadcast,
		mpsc::{self, UnboundedReceiver},
	},
	time::Instant,
};

use scope_config::Directory;
use scope_domain::{ActivationReply, ActivationResponse, CannedQuery, ScopeMetadata};
use scope_runtime::{
	Completion, Delivery, DirectoryEvent, DiscoveryResult, DispatcherContext, Error, EventBus,
	FavoritesStore, MemoryFavorites, ScopeDirectory, ShellEvent, TransportError,
	TransportErrorKind, forward_invalidation,
};
use scope_testkit::{ScriptedBackend, batch, drain_events, metadata, result, test_config};

const GRACE: Duration = Duration::from_millis(3_000);

struct DirectoryHarness {
	backend: Arc<ScriptedBackend>,
	store: Arc<MemoryFavorites>,
	directory: ScopeDirectory,
	deliveries: UnboundedReceiver<Delivery>,
	discoveries: UnboundedReceiver<DiscoveryResult>,
	events: broadcast::Receiver<ShellEvent>,
}
impl DirectoryHarness {
	fn new(scopes: &[&str], favorites: &[&str]) -> Self {
		Self::with_settings(
			scopes.iter().map(|id| metadata(id)).collect(),
			favorites,
			test_config().directory,
		)
	}

	fn with_settings(scopes: Vec<ScopeMetadata>, favorites: &[&str], settings: Directory) -> Self {
		let config = test_config();
		let backend = Arc::new(ScriptedBackend::new(scopes));
		let store = Arc::new(MemoryFavorites::with_scopes(favorites.iter().copied()));
		let (delivery_sender, deliveries) = mpsc::unbounded_channel();
		let (discovery_sender, discoveries) = mpsc::unbounded_channel();
		let bus = EventBus::new(config.events.capacity);
		let events = bus.subscribe();
		let context = DispatcherContext {
			settings: config.dispatch.clone(),
			backend: backend.clone(),
			deliveries: delivery_sender,
		};
		let directory =
			ScopeDirectory::new(settings, context, store.clone(), discovery_sender, bus);

		Self { backend, store, directory, deliveries, discoveries, events }
	}

	async fn discover(&mut self, now: Instant) {
		self.directory.start_discovery().expect("No discovery should be running.");

		let result = self.discoveries.recv().await.expect("Discovery must report back.");

		self.directory.finish_discovery(result, now);
	}

	fn directory_events(&mut self) -> Vec<DirectoryEvent> {
		drain_events(&mut self.events)
			.into_iter()
			.filter_map(|event| match event {
				ShellEvent::Directory(event) => Some(event),
				ShellEvent::Scope { .. } => None,
			})
			.collect()
	}
}

#[tokio::test]
async fn discovery_reconciles_store_against_installed_scopes() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "music"], &["news", "missing", "music", "news"]);

	harness.discover(t0).await;

	assert!(harness.directory.is_loaded());
	assert_eq!(harness.directory.favorites(), ["news".to_string(), "music".to_string()]);

	let events = harness.directory_events();

	assert!(events.contains(&DirectoryEvent::FavoriteInserted {
		index: 0,
		scope_id: "news".to_string()
	}));
	assert!(events.contains(&DirectoryEvent::FavoriteInserted {
		index: 1,
		scope_id: "music".to_string()
	}));
	assert_eq!(events.last(), Some(&DirectoryEvent::Loaded));
	assert_eq!(harness.backend.queries_for("news").len(), 1);
	assert_eq!(harness.backend.queries_for("music").len(), 1);
}

#[tokio::test]
async fn only_one_discovery_runs_at_a_time() {
	let mut harness = DirectoryHarness::new(&["news"], &["news"]);

	harness.directory.start_discovery().expect("First discovery must start.");

	let err = harness.directory.start_discovery().expect_err("Expected a busy directory.");

	assert!(matches!(err, Error::DiscoveryInProgress), "Unexpected error: {err}");

	let result = harness.discoveries.recv().await.expect("Discovery must report back.");

	harness.directory.finish_discovery(result, Instant::now());

	assert!(!harness.directory.discovery_in_flight());
	assert_eq!(harness.backend.listing_calls(), 1);
}

#[tokio::test]
async fn reconciling_an_unchanged_ordering_is_a_no_op() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "music"], &["news", "music"]);

	harness.discover(t0).await;
	harness.directory_events();

	assert!(!harness.directory.reconcile_favorites(t0));
	assert!(!harness.directory.reconcile_favorites(t0));
	assert!(harness.directory_events().is_empty());
}

#[tokio::test]
async fn unfavorited_scope_stays_until_grace_period_ends() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "music"], &["news", "music"]);

	harness.discover(t0).await;
	harness.directory.set_favorite("news", false, t0).expect("Known scope.");

	assert_eq!(harness.directory.favorites(), ["music".to_string()]);
	assert_eq!(harness.directory.model_ids(), vec!["news", "music"]);
	assert_eq!(harness.store.scope_ids(), vec!["music".to_string()]);

	let removals = harness.directory.pending_removals();

	assert_eq!(removals.len(), 1);
	assert_eq!(removals[0].scope_id(), "news");
	assert_eq!(removals[0].deadline(), t0 + GRACE);
	assert!(!harness.directory.scope("news").expect("Still in the model.").identity().favorite);

	harness.directory_events();
	harness.directory.poll_timers(t0 + GRACE - Duration::from_millis(1));

	assert_eq!(harness.directory.model_ids(), vec!["news", "music"]);

	harness.directory.poll_timers(t0 + GRACE);

	assert_eq!(harness.directory.model_ids(), vec!["music"]);
	assert_eq!(
		harness.directory_events(),
		vec![DirectoryEvent::FavoriteRemoved { index: 0, scope_id: "news".to_string() }]
	);
	assert!(harness.backend.cancelled().contains(&("news".to_string(), 1)));
}

#[tokio::test]
async fn refavoriting_within_grace_cancels_removal() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "music"], &["news", "music"]);

	harness.discover(t0).await;
	harness.directory.set_favorite("news", false, t0).expect("Known scope.");
	harness.directory.set_favorite("news", true, t0 + Duration::from_secs(1)).expect("Known scope.");

	assert!(harness.directory.pending_removals().is_empty());
	assert!(harness.directory_events().contains(&DirectoryEvent::RemovalCancelled {
		scope_id: "news".to_string()
	}));

	harness.directory.poll_timers(t0 + GRACE);

	assert_eq!(harness.directory.favorites(), ["music".to_string(), "news".to_string()]);
	assert_eq!(harness.directory.model_ids(), vec!["music", "news"]);
	assert!(harness.directory.scope("news").expect("Favorite is loaded.").identity().favorite);
}

#[tokio::test]
async fn moving_a_favorite_rewrites_the_store() {
	let t0 = Instant::now();
	let mut harness =
		DirectoryHarness::new(&["news", "music", "photos"], &["news", "music", "photos"]);

	harness.discover(t0).await;
	harness.directory_events();
	harness.directory.move_favorite("photos", 0, t0).expect("Known favorite.");

	assert_eq!(harness.store.scope_ids(), vec!["photos", "news", "music"]);
	assert_eq!(harness.directory.model_ids(), vec!["photos", "news", "music"]);
	assert!(harness.directory_events().contains(&DirectoryEvent::FavoriteMoved {
		from: 2,
		to: 0,
		scope_id: "photos".to_string()
	}));

	harness.directory.move_favorite("music", 99, t0).expect("Index is clamped.");

	assert!(harness.directory_events().is_empty());

	let err = harness.directory.move_favorite("weather", 0, t0).expect_err("Not a favorite.");

	assert!(matches!(err, Error::UnknownScope { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn favoriting_an_unavailable_scope_is_rejected() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news"], &["news"]);

	harness.discover(t0).await;

	let err = harness.directory.set_favorite("missing", true, t0).expect_err("Unknown scope.");

	assert!(matches!(err, Error::UnknownScope { .. }), "Unexpected error: {err}");
	assert_eq!(harness.store.scope_ids(), vec!["news".to_string()]);
}

#[tokio::test]
async fn external_store_changes_are_picked_up() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "music"], &["news"]);

	harness.discover(t0).await;
	harness.store.store(&[CannedQuery::new("music").to_uri(), CannedQuery::new("news").to_uri()]);

	assert!(harness.directory.reconcile_favorites(t0));
	assert_eq!(harness.directory.model_ids(), vec!["music", "news"]);
}

#[test]
fn media_scanner_invalidations_are_forwarded() {
	assert_eq!(forward_invalidation("mediascanner-music"), "musicaggregator");
	assert_eq!(forward_invalidation("mediascanner-video"), "videoaggregator");
	assert_eq!(forward_invalidation("news"), "news");
}

#[tokio::test]
async fn invalidations_mark_inactive_scopes_dirty() {
	let t0 = Instant::now();
	let mut harness =
		DirectoryHarness::new(&["musicaggregator", "news"], &["musicaggregator", "news"]);

	harness.discover(t0).await;
	harness.directory.invalidate_scope_results("mediascanner-music", t0);

	let dirty = |harness: &DirectoryHarness, id: &str| {
		harness.directory.scope(id).expect("Favorite is loaded.").results_dirty()
	};

	assert!(dirty(&harness, "musicaggregator"));
	assert!(!dirty(&harness, "news"));

	harness.directory.invalidate_scope_results("smart-scopes", t0);

	assert!(dirty(&harness, "news"));
}

#[tokio::test]
async fn perform_query_opens_and_closes_temp_scopes() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "weather"], &["news"]);

	harness.discover(t0).await;
	harness.directory_events();
	harness
		.directory
		.perform_query(CannedQuery::new("weather").with_query("rain"), t0)
		.expect("Installed scope.");

	assert_eq!(
		harness.directory_events(),
		vec![DirectoryEvent::TempScopeOpened { scope_id: "weather".to_string() }]
	);
	assert_eq!(harness.directory.scope("weather").map(|scope| scope.search_query()), Some("rain"));
	assert_eq!(harness.backend.queries_for("weather").len(), 1);
	assert_eq!(harness.directory.favorites(), ["news".to_string()]);

	assert!(harness.directory.close_scope("weather"));
	assert!(!harness.directory.close_scope("weather"));
	assert!(harness.directory.scope("weather").is_none());

	let err = harness
		.directory
		.perform_query(CannedQuery::new("radio"), t0)
		.expect_err("Expected an unknown scope.");

	assert!(matches!(err, Error::UnknownScope { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn activation_handoff_opens_the_target_scope() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "weather"], &["news"]);

	harness.discover(t0).await;
	harness
		.directory
		.scope_mut("news")
		.expect("Favorite is loaded.")
		.activate(result("news:1", "news"));

	let activation = harness.backend.activation_listener().expect("Activation must be submitted.");

	assert!(activation.reply(ActivationReply::Immediate(ActivationResponse::PerformQuery {
		query: CannedQuery::new("weather").with_query("rain"),
		user_data: None,
	})));

	let delivery = harness.deliveries.try_recv().expect("Reply must be queued.");

	harness.directory.deliver(delivery, t0);

	assert!(harness.directory_events().contains(&DirectoryEvent::TempScopeOpened {
		scope_id: "weather".to_string()
	}));
	assert_eq!(harness.backend.queries_for("weather")[0].text, "rain");
}

#[tokio::test]
async fn favoriting_an_open_temp_scope_promotes_it() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "weather"], &["news"]);

	harness.discover(t0).await;
	harness
		.directory
		.perform_query(CannedQuery::new("weather").with_query("rain"), t0)
		.expect("Installed scope.");

	let temp_listener = harness.backend.listener("weather").expect("Temp scope must query.");
	let instance = harness.directory.scope("weather").expect("Temp scope is open.").instance();

	harness.directory.set_favorite("weather", true, t0).expect("Known scope.");

	assert_eq!(harness.directory.model_ids(), vec!["news", "weather"]);
	assert!(harness.directory.temp_scope_ids().is_empty());

	let weather = harness.directory.scope("weather").expect("Favorite is loaded.");

	assert_eq!(weather.instance(), instance);
	assert!(weather.identity().favorite);
	assert_eq!(weather.search_query(), "rain");

	harness
		.directory
		.scope_mut("weather")
		.expect("Favorite is loaded.")
		.refresh(t0)
		.expect("Valid query.");

	assert!(!temp_listener.push(batch(&["stale"], &[("stale:1", "stale")])));
	assert!(!temp_listener.finished(Completion::Finished));

	let listener = harness.backend.listener("weather").expect("Refresh must query.");

	assert!(listener.push(batch(&["fresh"], &[("fresh:1", "fresh")])));
	assert!(listener.finished(Completion::Finished));

	while let Ok(delivery) = harness.deliveries.try_recv() {
		harness.directory.deliver(delivery, t0);
	}

	let weather = harness.directory.scope("weather").expect("Favorite is loaded.");

	assert_eq!(weather.aggregator().category_ids(), vec!["fresh"]);
	assert!(!weather.search_in_progress());
}

#[tokio::test]
async fn deliveries_reach_only_the_instance_that_issued_them() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "weather"], &["news", "weather"]);

	harness.discover(t0).await;

	let leaving_listener = harness.backend.listener("weather").expect("Startup must query.");

	harness.directory.set_favorite("weather", false, t0).expect("Known scope.");
	harness
		.directory
		.perform_query(CannedQuery::new("weather").with_query("rain"), t0)
		.expect("Installed scope.");

	assert_eq!(harness.directory.temp_scope_ids(), vec!["weather"]);
	assert_eq!(harness.directory.model_ids(), vec!["news", "weather"]);

	let temp_listener = harness.backend.listener("weather").expect("Temp scope must query.");

	assert_eq!(temp_listener.operation().seq, leaving_listener.operation().seq);
	assert!(leaving_listener.push(batch(&["leaving"], &[("leaving:1", "leaving")])));
	assert!(leaving_listener.finished(Completion::Finished));
	assert!(temp_listener.push(batch(&["temp"], &[("temp:1", "temp")])));
	assert!(temp_listener.finished(Completion::Finished));

	while let Ok(delivery) = harness.deliveries.try_recv() {
		harness.directory.deliver(delivery, t0);
	}

	let weather = harness.directory.scope("weather").expect("Temp scope is open.");

	assert_eq!(weather.search_query(), "rain");
	assert_eq!(weather.aggregator().category_ids(), vec!["temp"]);

	harness.directory.poll_timers(t0 + GRACE);

	assert_eq!(harness.directory.model_ids(), vec!["news"]);

	let weather = harness.directory.scope("weather").expect("Temp scope outlives the removal.");

	assert_eq!(weather.aggregator().category_ids(), vec!["temp"]);
}

#[tokio::test]
async fn overview_scope_is_never_a_favorite() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news", "scopes"], &["scopes", "news"]);

	harness.discover(t0).await;

	assert_eq!(harness.directory.favorites(), ["news".to_string()]);
	assert_eq!(harness.directory.model_ids(), vec!["news"]);
	assert_eq!(harness.directory.overview().map(|overview| overview.id()), Some("scopes"));

	let err = harness.directory.set_favorite("scopes", true, t0).expect_err("Overview is apart.");

	assert!(matches!(err, Error::UnknownScope { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn failed_listing_keeps_cached_metadata() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news"], &["news"]);

	harness.discover(t0).await;
	harness.directory_events();
	harness
		.backend
		.set_listing(Err(TransportError::new(TransportErrorKind::Unreachable, "registry down")));
	harness.directory.refresh_metadata().expect("No discovery should be running.");

	let result = harness.discoveries.recv().await.expect("Discovery must report back.");

	harness.directory.finish_discovery(result, t0);

	assert!(harness.directory.metadata("news").is_some());
	assert_eq!(harness.directory.favorites(), ["news".to_string()]);
	assert_eq!(harness.directory_events(), vec![DirectoryEvent::MetadataRefreshed]);
}

#[tokio::test]
async fn refreshed_metadata_reaches_live_scopes() {
	let t0 = Instant::now();
	let mut harness = DirectoryHarness::new(&["news"], &["news"]);

	harness.discover(t0).await;
	harness.backend.set_listing(Ok(vec![ScopeMetadata {
		display_name: "Headlines".to_string(),
		..metadata("news")
	}]));
	harness.directory.refresh_metadata().expect("No discovery should be running.");

	let result = harness.discoveries.recv().await.expect("Discovery must report back.");

	harness.directory.finish_discovery(result, t0);

	let identity = harness.directory.scope("news").expect("Favorite is loaded.").identity();

	assert_eq!(identity.display_name, "Headlines");
}

#[tokio::test]
async fn show_all_mode_lists_visible_scopes_and_keeps_overview_apart() {
	let t0 = Instant::now();
	let mut settings = test_config().directory;

	settings.show_all_scopes = true;

	let scopes = vec![
		metadata("news"),
		metadata("music"),
		metadata("scopes"),
		ScopeMetadata { invisible: true, ..metadata("hidden") },
	];
	let mut harness = DirectoryHarness::with_settings(scopes, &[], settings);

	harness.discover(t0).await;

	assert_eq!(harness.directory.favorites(), ["music".to_string(), "news".to_string()]);
	assert_eq!(harness.directory.overview().map(|overview| overview.id()), Some("scopes"));
	assert!(harness.directory_events().contains(&DirectoryEvent::OverviewChanged {
		scope_id: "scopes".to_string()
	}));
}
