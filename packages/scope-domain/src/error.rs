pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid canned query {uri:?}: {message}.")]
	InvalidCannedQuery { uri: String, message: String },
	#[error("Unknown filter {filter_id:?}.")]
	UnknownFilter { filter_id: String },
	#[error("Invalid value for filter {filter_id:?}: {message}.")]
	InvalidFilterValue { filter_id: String, message: String },
	#[error("Invalid category renderer: {source}.")]
	InvalidRenderer { source: serde_json::Error },
}
