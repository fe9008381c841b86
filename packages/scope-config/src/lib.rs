mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Directory, Dispatch, Events, Service};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Loads `path` when given, otherwise returns the built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
	match path {
		Some(path) => load(path),
		None => {
			let cfg = Config::default();

			validate(&cfg)?;

			Ok(cfg)
		},
	}
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.dispatch.typing_delay_ms == 0 {
		return Err(Error::Validation {
			message: "dispatch.typing_delay_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.dispatch.flush_interval_ms == 0 {
		return Err(Error::Validation {
			message: "dispatch.flush_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.directory.removal_grace_ms == 0 {
		return Err(Error::Validation {
			message: "directory.removal_grace_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.directory.overview_scope_id.is_empty() {
		return Err(Error::Validation {
			message: "directory.overview_scope_id must be non-empty.".to_string(),
		});
	}
	if cfg.events.capacity == 0 {
		return Err(Error::Validation {
			message: "events.capacity must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();
	cfg.directory.overview_scope_id = cfg.directory.overview_scope_id.trim().to_string();
}
