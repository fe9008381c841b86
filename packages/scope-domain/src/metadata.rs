use serde::{Deserialize, Serialize};

/// Static description of a backend scope as reported by the scope listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMetadata {
	pub id: String,
	#[serde(default)]
	pub display_name: String,
	#[serde(default)]
	pub icon: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub search_hint: String,
	#[serde(default)]
	pub shortcut: String,
	/// Hidden scopes never appear in the favorites list.
	#[serde(default)]
	pub invisible: bool,
	/// How long completed results stay fresh before the scope re-queries.
	#[serde(default)]
	pub results_ttl_ms: Option<u64>,
}
impl ScopeMetadata {
	pub fn new(id: impl Into<String>) -> Self {
		let id = id.into();

		Self { display_name: id.clone(), id, ..Default::default() }
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScopeIdentity {
	pub id: String,
	pub display_name: String,
	pub icon: String,
	pub description: String,
	pub search_hint: String,
	pub shortcut: String,
	pub favorite: bool,
}
impl ScopeIdentity {
	pub fn from_metadata(metadata: &ScopeMetadata, favorite: bool) -> Self {
		Self {
			id: metadata.id.clone(),
			display_name: metadata.display_name.clone(),
			icon: metadata.icon.clone(),
			description: metadata.description.clone(),
			search_hint: metadata.search_hint.clone(),
			shortcut: metadata.shortcut.clone(),
			favorite,
		}
	}

	/// Copies descriptive fields from fresh metadata, keeping the favorite flag.
	///
	/// Returns whether anything changed.
	pub fn refresh(&mut self, metadata: &ScopeMetadata) -> bool {
		let next = Self::from_metadata(metadata, self.favorite);

		if *self == next {
			return false;
		}

		*self = next;

		true
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
	#[default]
	Okay,
	NoInternet,
	NoLocationData,
	Unknown,
}
