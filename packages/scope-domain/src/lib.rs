pub mod activation;
pub mod canned_query;
pub mod filter;
pub mod metadata;
pub mod navigation;
pub mod result;

mod error;

pub use activation::{ActivationReply, ActivationRequest, ActivationResponse};
pub use canned_query::CannedQuery;
pub use error::{Error, Result};
pub use filter::{FilterDefinition, FilterKind, FilterOption, FilterSnapshot, FilterValue};
pub use metadata::{ScopeIdentity, ScopeMetadata, ScopeStatus};
pub use navigation::NavigationNode;
pub use result::{CategoryDescriptor, ResultBatch, ScopeResult};
