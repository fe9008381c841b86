use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use scope_domain::{CannedQuery, FilterSnapshot};

/// One outgoing search request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Query {
	pub scope_id: String,
	/// Strictly increasing per scope; deliveries carry it back.
	pub seq: u64,
	pub session_id: Uuid,
	/// Position within the current typing session.
	pub query_id: u32,
	pub text: String,
	pub navigation_id: String,
	pub filter_state: FilterSnapshot,
	pub user_data: Option<Value>,
}
impl Query {
	pub fn canned(&self) -> CannedQuery {
		CannedQuery::new(self.scope_id.clone())
			.with_query(self.text.clone())
			.with_department(self.navigation_id.clone())
			.with_filters(self.filter_state.clone())
	}
}
