use serde::{Deserialize, Serialize};

use crate::{Error, FilterSnapshot, Result};

const SCHEME: &str = "scope://";

/// Everything needed to reproduce a query against a scope.
///
/// Serialized form: `scope://<id>?q=<text>&dep=<navigation>&filters=<json>`, with
/// empty parts left out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CannedQuery {
	pub scope_id: String,
	#[serde(default)]
	pub query_string: String,
	#[serde(default)]
	pub department_id: String,
	#[serde(default)]
	pub filter_state: FilterSnapshot,
}
impl CannedQuery {
	pub fn new(scope_id: impl Into<String>) -> Self {
		Self { scope_id: scope_id.into(), ..Default::default() }
	}

	pub fn with_query(mut self, query: impl Into<String>) -> Self {
		self.query_string = query.into();

		self
	}

	pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
		self.department_id = department_id.into();

		self
	}

	pub fn with_filters(mut self, filter_state: FilterSnapshot) -> Self {
		self.filter_state = filter_state;

		self
	}

	pub fn to_uri(&self) -> String {
		let mut params = Vec::new();

		if !self.query_string.is_empty() {
			params.push(format!("q={}", urlencoding::encode(&self.query_string)));
		}
		if !self.department_id.is_empty() {
			params.push(format!("dep={}", urlencoding::encode(&self.department_id)));
		}
		if !self.filter_state.is_empty() {
			// Serializing a map of plain enums cannot fail.
			let json = serde_json::to_string(&self.filter_state).unwrap_or_default();

			params.push(format!("filters={}", urlencoding::encode(&json)));
		}

		let mut uri = format!("{SCHEME}{}", urlencoding::encode(&self.scope_id));

		if !params.is_empty() {
			uri.push('?');
			uri.push_str(&params.join("&"));
		}

		uri
	}

	pub fn from_uri(uri: &str) -> Result<Self> {
		let invalid =
			|message: String| Error::InvalidCannedQuery { uri: uri.to_string(), message };
		let rest = uri
			.strip_prefix(SCHEME)
			.ok_or_else(|| invalid(format!("expected the {SCHEME} scheme")))?;
		let (raw_id, raw_params) = rest.split_once('?').unwrap_or((rest, ""));
		let scope_id = decode(raw_id).map_err(&invalid)?;

		if scope_id.is_empty() {
			return Err(invalid("missing scope id".to_string()));
		}

		let mut query = Self::new(scope_id);

		for param in raw_params.split('&').filter(|param| !param.is_empty()) {
			let (key, value) = param.split_once('=').unwrap_or((param, ""));
			let value = decode(value).map_err(&invalid)?;

			match key {
				"q" => query.query_string = value,
				"dep" => query.department_id = value,
				"filters" =>
					query.filter_state = serde_json::from_str(&value)
						.map_err(|err| invalid(format!("malformed filter state ({err})")))?,
				_ => {},
			}
		}

		Ok(query)
	}
}

fn decode(raw: &str) -> std::result::Result<String, String> {
	urlencoding::decode(raw)
		.map(|value| value.into_owned())
		.map_err(|err| format!("bad percent-encoding ({err})"))
}
