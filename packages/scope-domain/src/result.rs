use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryDescriptor {
	pub id: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub icon: String,
	/// Opaque layout hint passed through to the presentation layer.
	#[serde(default)]
	pub renderer: Value,
}
impl CategoryDescriptor {
	pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
		Self { id: id.into(), title: title.into(), icon: String::new(), renderer: Value::Null }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeResult {
	/// Identity key used for in-place updates.
	pub uri: String,
	pub category_id: String,
	#[serde(default)]
	pub payload: Value,
}
impl ScopeResult {
	pub fn new(uri: impl Into<String>, category_id: impl Into<String>, payload: Value) -> Self {
		Self { uri: uri.into(), category_id: category_id.into(), payload }
	}
}

/// One push from a backend: category registrations first, then results in stream order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
	#[serde(default)]
	pub categories: Vec<CategoryDescriptor>,
	#[serde(default)]
	pub results: Vec<ScopeResult>,
}
impl ResultBatch {
	pub fn is_empty(&self) -> bool {
		self.categories.is_empty() && self.results.is_empty()
	}

	pub fn extend(&mut self, other: ResultBatch) {
		self.categories.extend(other.categories);
		self.results.extend(other.results);
	}
}
