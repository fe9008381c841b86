//! Department tree kept as an arena keyed by node id.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use scope_domain::NavigationNode;

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NavigationEntry {
	pub id: String,
	pub label: String,
	pub is_leaf: bool,
	/// Whether this node's children have been delivered.
	pub loaded: bool,
	pub result_count: Option<u32>,
}

/// Children of one node, in backend order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NavigationView {
	pub parent_id: String,
	pub parent_label: String,
	pub entries: Vec<NavigationEntry>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
	/// The backend sent a different root; the old tree was discarded.
	pub replaced: bool,
	/// Nodes whose children arrived for the first time.
	pub loaded: Vec<String>,
	pub primary_tag_changed: bool,
}

#[derive(Debug)]
struct NodeSlot {
	label: String,
	is_leaf: bool,
	parent: Option<String>,
	children: Option<Vec<String>>,
	result_count: Option<u32>,
}

#[derive(Debug, Default)]
pub struct NavigationTree {
	nodes: HashMap<String, NodeSlot>,
	root: Option<String>,
	active: String,
	primary_tag: String,
	views: HashMap<String, Arc<NavigationView>>,
}
impl NavigationTree {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn root_id(&self) -> Option<&str> {
		self.root.as_deref()
	}

	pub fn active(&self) -> &str {
		&self.active
	}

	pub fn primary_tag(&self) -> &str {
		&self.primary_tag
	}

	pub fn contains(&self, id: &str) -> bool {
		self.nodes.contains_key(id)
	}

	pub fn is_loaded(&self, id: &str) -> bool {
		self.nodes.get(id).is_some_and(|slot| slot.children.is_some())
	}

	/// Merges a tree delivered by a completed search.
	///
	/// A tree with the same root id is merged node by node; nodes that came
	/// with children replace their child list and drop children that vanished.
	pub fn merge(&mut self, root: NavigationNode) -> MergeReport {
		let mut report = MergeReport::default();

		if self.root.as_deref() != Some(root.id.as_str()) {
			self.nodes.clear();
			self.views.clear();
			self.root = Some(root.id.clone());

			report.replaced = true;
		}

		self.merge_node(root, None, &mut report);

		report.primary_tag_changed = self.recompute_primary_tag();

		report
	}

	/// Switches to a node known to the tree. An empty id selects the root.
	pub fn set_active(&mut self, id: &str) -> Result<bool> {
		if !id.is_empty() && self.root.is_some() && !self.nodes.contains_key(id) {
			return Err(Error::InvalidQuery { message: format!("unknown navigation id {id:?}") });
		}

		Ok(self.assume_active(id))
	}

	/// Switches without validation, for ids coming from canned queries.
	///
	/// Returns whether the primary tag changed.
	pub fn assume_active(&mut self, id: &str) -> bool {
		self.active = id.to_string();

		self.recompute_primary_tag()
	}

	/// Ids from the root down to the active node, as far as the tree knows them.
	pub fn path(&self) -> Vec<String> {
		let mut path = Vec::new();
		let mut current = Some(self.active.as_str());

		while let Some(id) = current {
			let Some(slot) = self.nodes.get(id) else {
				break;
			};

			path.push(id.to_string());
			current = slot.parent.as_deref();
		}

		path.reverse();

		path
	}

	/// Cached children of `parent_id`; rebuilt only after that node's children change.
	pub fn siblings(&mut self, parent_id: &str) -> Option<Arc<NavigationView>> {
		if let Some(view) = self.views.get(parent_id) {
			return Some(view.clone());
		}

		let slot = self.nodes.get(parent_id)?;
		let children = slot.children.as_ref()?;
		let entries = children
			.iter()
			.filter_map(|child_id| {
				self.nodes.get(child_id).map(|child| NavigationEntry {
					id: child_id.clone(),
					label: child.label.clone(),
					is_leaf: child.is_leaf,
					loaded: child.children.is_some(),
					result_count: child.result_count,
				})
			})
			.collect();
		let view = Arc::new(NavigationView {
			parent_id: parent_id.to_string(),
			parent_label: slot.label.clone(),
			entries,
		});

		self.views.insert(parent_id.to_string(), view.clone());

		Some(view)
	}

	/// Siblings of the active node, or the root's children when the root is active.
	pub fn active_level(&mut self) -> Option<Arc<NavigationView>> {
		let active = self.active.clone();
		let parent = match self.nodes.get(&active) {
			Some(slot) if slot.children.as_ref().is_some_and(|children| !children.is_empty()) =>
				active,
			Some(slot) => slot.parent.clone().unwrap_or(active),
			None => self.root.clone()?,
		};

		self.siblings(&parent)
	}

	fn merge_node(&mut self, node: NavigationNode, parent: Option<String>, report: &mut MergeReport) {
		let NavigationNode { id, label, is_leaf, children, result_count } = node;
		let previous = match self.nodes.get_mut(&id) {
			Some(slot) => {
				slot.label = label;
				slot.is_leaf = is_leaf;
				slot.result_count = result_count;
				slot.parent = parent;

				slot.children.clone()
			},
			None => {
				self.nodes.insert(
					id.clone(),
					NodeSlot { label, is_leaf, parent, children: None, result_count },
				);

				None
			},
		};
		let Some(children) = children else {
			return;
		};
		let child_ids: Vec<String> = children.iter().map(|child| child.id.clone()).collect();

		match previous {
			Some(previous) =>
				for stale in previous.iter().filter(|old| !child_ids.contains(old)) {
					self.prune(stale);
				},
			None if !is_leaf => report.loaded.push(id.clone()),
			None => {},
		}

		if let Some(slot) = self.nodes.get_mut(&id) {
			slot.children = Some(child_ids);
		}

		self.views.remove(&id);

		for child in children {
			self.merge_node(child, Some(id.clone()), report);
		}
	}

	fn prune(&mut self, id: &str) {
		let Some(slot) = self.nodes.remove(id) else {
			return;
		};

		self.views.remove(id);

		for child in slot.children.unwrap_or_default() {
			self.prune(&child);
		}
	}

	fn recompute_primary_tag(&mut self) -> bool {
		let tag = self.primary_tag_of(&self.active);

		if tag == self.primary_tag {
			return false;
		}

		self.primary_tag = tag;

		true
	}

	// Label of the nearest ancestor that hangs directly off the root.
	fn primary_tag_of(&self, id: &str) -> String {
		let mut current = id;

		loop {
			let Some(slot) = self.nodes.get(current) else {
				return String::new();
			};

			match slot.parent.as_deref() {
				None => return String::new(),
				Some(parent) if Some(parent) == self.root.as_deref() => return slot.label.clone(),
				Some(parent) => current = parent,
			}
		}
	}
}
