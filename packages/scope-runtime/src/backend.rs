use std::{future::Future, pin::Pin};

use serde::{Deserialize, Serialize};

use scope_domain::{ActivationRequest, ScopeMetadata, ScopeStatus};

use crate::{
	operation::{ActivationListener, InvalidationListener, SearchListener},
	query::Query,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
	Unreachable,
	NoInternet,
	NoLocationData,
	Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Scope backend failed: {message}.")]
pub struct TransportError {
	pub kind: TransportErrorKind,
	pub message: String,
}
impl TransportError {
	pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into() }
	}

	/// Status a scope degrades to after this failure.
	pub fn status(&self) -> ScopeStatus {
		match self.kind {
			TransportErrorKind::NoInternet => ScopeStatus::NoInternet,
			TransportErrorKind::NoLocationData => ScopeStatus::NoLocationData,
			TransportErrorKind::Unreachable | TransportErrorKind::Other => ScopeStatus::Unknown,
		}
	}
}

/// Cancel side of an in-flight backend request. Cancellation is advisory.
pub trait OperationControl
where
	Self: Send + Sync,
{
	fn cancel(&self);
}

/// Client for the out-of-process scopes.
///
/// Listeners may be invoked from any thread; they forward into the shell loop.
pub trait ScopeBackend
where
	Self: Send + Sync,
{
	fn list_scopes(&self) -> BoxFuture<'_, Result<Vec<ScopeMetadata>, TransportError>>;

	fn submit(
		&self,
		query: &Query,
		listener: SearchListener,
	) -> Result<Box<dyn OperationControl>, TransportError>;

	fn submit_activation(
		&self,
		scope_id: &str,
		request: &ActivationRequest,
		listener: ActivationListener,
	) -> Result<Box<dyn OperationControl>, TransportError>;

	/// Registers for out-of-band "results may be stale" notifications.
	fn watch_invalidations(&self, listener: InvalidationListener);
}
