pub mod aggregator;
pub mod backend;
pub mod directory;
pub mod dispatcher;
pub mod events;
pub mod filters;
pub mod navigation;
pub mod operation;
pub mod query;
pub mod shell;

mod error;

pub use aggregator::{CategorySnapshot, ResultAggregator};
pub use backend::{BoxFuture, OperationControl, ScopeBackend, TransportError, TransportErrorKind};
pub use directory::{
	DiscoveryResult, FavoritesStore, INVALIDATE_ALL_SOURCE, INVALIDATION_FORWARDS, MemoryFavorites,
	RemovalToken, ScopeDirectory, forward_invalidation,
};
pub use dispatcher::{DispatchState, DispatcherContext, ScopeDispatcher, ScopeSnapshot};
pub use error::{Error, Result};
pub use events::{
	ActivationOutcome, CategoryAttribute, DirectoryEvent, EventBus, ScopeEvent, ScopeEvents,
	ShellEvent,
};
pub use filters::FilterState;
pub use navigation::{NavigationEntry, NavigationTree, NavigationView};
pub use operation::{
	ActivationDelivery, ActivationListener, Completion, Delivery, InvalidationListener, Listener,
	OperationHandle, OperationId, OperationKind, Payload, SearchDelivery, SearchListener,
};
pub use query::Query;
pub use shell::{Shell, ShellCommand, ShellHandle};
