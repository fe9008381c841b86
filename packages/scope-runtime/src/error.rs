pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid query: {message}.")]
	InvalidQuery { message: String },
	#[error("Unknown scope {scope_id:?}.")]
	UnknownScope { scope_id: String },
	#[error("Scope discovery is already in progress.")]
	DiscoveryInProgress,
	#[error("Shell event loop has stopped.")]
	ShellClosed,
	#[error(transparent)]
	Domain(#[from] scope_domain::Error),
}
