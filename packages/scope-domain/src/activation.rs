use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CannedQuery, ScopeResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivationRequest {
	pub result: ScopeResult,
	/// Set when a preview action, rather than the result itself, was invoked.
	#[serde(default)]
	pub action_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationResponse {
	NotHandled,
	ShowDash,
	HideDash,
	ShowPreview,
	PerformQuery {
		query: CannedQuery,
		#[serde(default)]
		user_data: Option<Value>,
	},
	UpdateResult {
		result: ScopeResult,
	},
}

/// How the backend wants its activation response applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "response", rename_all = "snake_case")]
pub enum ActivationReply {
	Immediate(ActivationResponse),
	/// Apply once the next search completes against the refreshed results.
	Delayed(ActivationResponse),
}
