pub mod fixture;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::eyre;
use serde_json::Value;
use tokio::sync::broadcast::{
	self,
	error::{RecvError, TryRecvError},
};
use tracing_subscriber::EnvFilter;

use scope_config::Config;
use scope_domain::CannedQuery;
use scope_runtime::{DirectoryEvent, MemoryFavorites, ScopeEvent, Shell, ShellEvent, ShellHandle};

use crate::fixture::{Fixture, FixtureBackend};

const REPLAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
	version = scope_cli::VERSION,
	rename_all = "kebab",
	styles = scope_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: Option<PathBuf>,
	#[arg(long, short = 'f', value_name = "FILE")]
	pub fixture: PathBuf,
	/// Scope to activate and query; without it the favorites ordering is printed.
	#[arg(long, short = 's', value_name = "ID")]
	pub scope: Option<String>,
	#[arg(long, short = 'q', value_name = "TEXT", default_value = "")]
	pub query: String,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = scope_config::load_or_default(args.config.as_deref())?;

	init_tracing(&config);

	let fixture = fixture::load(&args.fixture)?;
	let output = replay(&config, fixture, args.scope.as_deref(), &args.query).await?;
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

/// Runs a shell against `fixture` and returns either the favorites ordering or
/// the settled snapshot of `scope_id` after querying it with `query`.
pub async fn replay(
	config: &Config,
	fixture: Fixture,
	scope_id: Option<&str>,
	query: &str,
) -> color_eyre::Result<Value> {
	let store = Arc::new(MemoryFavorites::with_scopes(fixture.favorites.clone()));
	let backend = Arc::new(FixtureBackend::new(fixture));
	let (handle, task) = Shell::spawn(config, backend, store);
	let mut events = handle.subscribe();

	wait_for(&mut events, |event| matches!(event, ShellEvent::Directory(DirectoryEvent::Loaded)))
		.await?;

	let output = match scope_id {
		Some(scope_id) => query_scope(&handle, &mut events, scope_id, query).await,
		None => Ok(serde_json::to_value(handle.favorites().await?)?),
	};

	handle.shutdown()?;
	task.await?;

	output
}

async fn query_scope(
	handle: &ShellHandle,
	events: &mut broadcast::Receiver<ShellEvent>,
	scope_id: &str,
	query: &str,
) -> color_eyre::Result<Value> {
	handle.perform_query(CannedQuery::new(scope_id).with_query(query))?;
	handle.set_active(scope_id, true)?;

	let dispatched = handle
		.snapshot(scope_id)
		.await?
		.ok_or_else(|| eyre::eyre!("Scope {scope_id} is not installed."))?;

	// Everything emitted before the snapshot reply belongs to earlier searches.
	drain(events);

	if dispatched.search_in_progress {
		wait_for(events, |event| {
			matches!(
				event,
				ShellEvent::Scope { scope_id: id, event: ScopeEvent::SearchInProgressChanged(false) }
					if id == scope_id
			)
		})
		.await?;
	}

	let snapshot = handle
		.snapshot(scope_id)
		.await?
		.ok_or_else(|| eyre::eyre!("Scope {scope_id} was closed during the replay."))?;

	Ok(serde_json::to_value(snapshot)?)
}

async fn wait_for(
	events: &mut broadcast::Receiver<ShellEvent>,
	mut predicate: impl FnMut(&ShellEvent) -> bool,
) -> color_eyre::Result<()> {
	let wait = async {
		loop {
			match events.recv().await {
				Ok(event) if predicate(&event) => return Ok(()),
				Ok(_) => {},
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Replay fell behind the event stream.");
				},
				Err(RecvError::Closed) =>
					return Err(eyre::eyre!("Shell stopped before the replay finished.")),
			}
		}
	};

	tokio::time::timeout(REPLAY_TIMEOUT, wait)
		.await
		.map_err(|_| eyre::eyre!("Timed out waiting for the shell."))?
}

fn drain(events: &mut broadcast::Receiver<ShellEvent>) {
	loop {
		match events.try_recv() {
			Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
			Err(TryRecvError::Empty | TryRecvError::Closed) => return,
		}
	}
}

fn init_tracing(config: &Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
