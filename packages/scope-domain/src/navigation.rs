use serde::{Deserialize, Serialize};

/// Department node as delivered by a backend.
///
/// `children == None` means the children have not been loaded yet, which is
/// different from a loaded node with no children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
	pub id: String,
	#[serde(default)]
	pub label: String,
	#[serde(default)]
	pub is_leaf: bool,
	#[serde(default)]
	pub children: Option<Vec<NavigationNode>>,
	#[serde(default)]
	pub result_count: Option<u32>,
}
impl NavigationNode {
	pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
		Self { id: id.into(), label: label.into(), is_leaf: false, children: None, result_count: None }
	}

	pub fn leaf(id: impl Into<String>, label: impl Into<String>) -> Self {
		Self { is_leaf: true, children: Some(Vec::new()), ..Self::new(id, label) }
	}

	pub fn with_children(mut self, children: Vec<NavigationNode>) -> Self {
		self.children = Some(children);

		self
	}
}
