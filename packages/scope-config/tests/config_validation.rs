use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use toml::Value;

use scope_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root
		.as_table_mut()
		.expect("Sample config must be a table.")
		.get_mut(section)
		.and_then(Value::as_table_mut)
		.expect("Sample config must include the requested section.");

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("scope_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> scope_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = scope_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

#[test]
fn sample_config_loads_and_normalizes() {
	let cfg = load_payload(SAMPLE_CONFIG_TOML.to_string()).expect("Sample config must load.");

	assert_eq!(cfg.service.log_level, "scope_runtime=debug,info");
	assert_eq!(cfg.dispatch.typing_delay(), Duration::from_millis(250));
	assert_eq!(cfg.dispatch.flush_interval(), Duration::from_millis(50));
	assert_eq!(cfg.directory.removal_grace(), Duration::from_millis(1_500));
	assert_eq!(cfg.directory.overview_scope_id, "scopes");
	assert!(!cfg.directory.query_on_startup);
	assert_eq!(cfg.events.capacity, 64);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
	let cfg = load_payload("[dispatch]\ntyping_delay_ms = 10\n".to_string())
		.expect("Partial config must load.");

	assert_eq!(cfg.dispatch.typing_delay_ms, 10);
	assert_eq!(cfg.dispatch.flush_interval_ms, 100);
	assert_eq!(cfg.directory.removal_grace_ms, 3_000);
	assert_eq!(cfg.directory.overview_scope_id, "scopes");
	assert_eq!(cfg.service.log_level, "info");
	assert_eq!(cfg.events.capacity, 1_024);
}

#[test]
fn no_path_uses_defaults() {
	let cfg = scope_config::load_or_default(None).expect("Defaults must validate.");

	assert_eq!(cfg.dispatch.typing_delay(), Duration::from_millis(400));
	assert!(cfg.directory.query_on_startup);
	assert!(!cfg.directory.show_all_scopes);
}

#[test]
fn typing_delay_must_be_positive() {
	let err = load_payload(sample_toml_with("dispatch", "typing_delay_ms", Value::Integer(0)))
		.expect_err("Expected typing delay validation error.");

	assert!(
		err.to_string().contains("dispatch.typing_delay_ms must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn flush_interval_must_be_positive() {
	let err = load_payload(sample_toml_with("dispatch", "flush_interval_ms", Value::Integer(0)))
		.expect_err("Expected flush interval validation error.");

	assert!(
		err.to_string().contains("dispatch.flush_interval_ms must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn removal_grace_must_be_positive() {
	let mut cfg = Config::default();

	cfg.directory.removal_grace_ms = 0;

	let err = scope_config::validate(&cfg).expect_err("Expected grace validation error.");

	assert!(
		err.to_string().contains("directory.removal_grace_ms must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn overview_scope_id_must_not_be_blank() {
	let err = load_payload(sample_toml_with(
		"directory",
		"overview_scope_id",
		Value::String("   ".to_string()),
	))
	.expect_err("Expected overview id validation error.");

	assert!(
		err.to_string().contains("directory.overview_scope_id must be non-empty."),
		"Unexpected error: {err}"
	);
}

#[test]
fn event_capacity_must_be_positive() {
	let err = load_payload(sample_toml_with("events", "capacity", Value::Integer(0)))
		.expect_err("Expected capacity validation error.");

	assert!(matches!(err, Error::Validation { .. }), "Unexpected error: {err}");
}

#[test]
fn malformed_toml_is_a_parse_error() {
	let err = load_payload("[dispatch\n".to_string()).expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err}");
}

#[test]
fn missing_file_is_a_read_error() {
	let mut path = env::temp_dir();

	path.push("scope_config_test_missing_file.toml");

	let err = scope_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err}");
}
