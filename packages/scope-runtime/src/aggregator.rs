//! Ordered category/result model fed by streamed search batches.
//!
//! Categories keep the rank they were first seen at for the lifetime of the
//! aggregator, so re-queries that stream the same ids in another order never
//! reorder them. Each search opens a generation; a category's rows are
//! replaced by the first batch that fills it in the new generation, and
//! [`ResultAggregator::purge_results`] sweeps whatever the generation left
//! untouched.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use scope_domain::{CategoryDescriptor, ScopeResult};

use crate::events::{CategoryAttribute, ScopeEvent};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategorySnapshot {
	#[serde(flatten)]
	pub descriptor: CategoryDescriptor,
	pub results: Vec<ScopeResult>,
}

#[derive(Debug)]
struct CategoryEntry {
	descriptor: CategoryDescriptor,
	rank: usize,
	results: Vec<ScopeResult>,
	registered_in: u64,
	filled_in: u64,
	reported_count: usize,
}
impl CategoryEntry {
	fn touched_in(&self, generation: u64) -> bool {
		self.registered_in == generation || self.filled_in == generation
	}
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
	entries: Vec<CategoryEntry>,
	ranks: HashMap<String, usize>,
	overrides: HashMap<String, Value>,
	generation: u64,
	pending: Vec<ScopeEvent>,
}
impl ResultAggregator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Opens a new generation. Existing rows stay visible until replaced or purged.
	pub fn mark_new_search(&mut self) {
		self.generation += 1;
	}

	pub fn register_category(&mut self, mut descriptor: CategoryDescriptor) {
		if let Some(renderer) = self.overrides.get(&descriptor.id) {
			descriptor.renderer = renderer.clone();
		}

		let generation = self.generation;

		if let Some(index) = self.position(&descriptor.id) {
			let entry = &mut self.entries[index];
			let mut attributes = Vec::new();

			if entry.descriptor.title != descriptor.title {
				attributes.push(CategoryAttribute::Title);
			}
			if entry.descriptor.icon != descriptor.icon {
				attributes.push(CategoryAttribute::Icon);
			}
			if entry.descriptor.renderer != descriptor.renderer {
				attributes.push(CategoryAttribute::Renderer);
			}

			entry.registered_in = generation;

			if !attributes.is_empty() {
				self.pending.push(ScopeEvent::CategoryChanged {
					category_id: descriptor.id.clone(),
					attributes,
				});

				entry.descriptor = descriptor;
			}

			return;
		}

		let next_rank = self.ranks.len();
		let rank = *self.ranks.entry(descriptor.id.clone()).or_insert(next_rank);
		let index = self.entries.partition_point(|entry| entry.rank < rank);

		self.pending
			.push(ScopeEvent::CategoryInserted { index, category_id: descriptor.id.clone() });
		self.entries.insert(
			index,
			CategoryEntry {
				descriptor,
				rank,
				results: Vec::new(),
				registered_in: generation,
				filled_in: 0,
				reported_count: 0,
			},
		);
	}

	/// Appends in stream order. Returns `false` when the category is unknown.
	pub fn append_results(&mut self, category_id: &str, results: Vec<ScopeResult>) -> bool {
		let generation = self.generation;
		let Some(index) = self.position(category_id) else {
			tracing::warn!(category_id, "Dropping results for an unregistered category.");

			return false;
		};
		let entry = &mut self.entries[index];

		if entry.filled_in != generation {
			if !entry.results.is_empty() {
				entry.results.clear();
				self.pending.push(ScopeEvent::ResultsReset { category_id: category_id.to_string() });
			}

			entry.filled_in = generation;
		}
		if results.is_empty() {
			return true;
		}

		let first = entry.results.len();
		let count = results.len();

		entry.results.extend(results);
		self.pending.push(ScopeEvent::ResultsAppended {
			category_id: category_id.to_string(),
			first,
			count,
		});

		true
	}

	/// Replaces the payload of the row keyed by `uri` without moving it.
	pub fn update_result(&mut self, uri: &str, category_id: &str, payload: Value) -> bool {
		let Some(entry) = self.entries.iter_mut().find(|entry| entry.descriptor.id == category_id)
		else {
			tracing::warn!(category_id, uri, "Result update targets an unknown category.");

			return false;
		};
		let Some(index) = entry.results.iter().position(|result| result.uri == uri) else {
			tracing::warn!(category_id, uri, "Result update targets an unknown result.");

			return false;
		};

		entry.results[index].payload = payload;
		self.pending
			.push(ScopeEvent::ResultUpdated { category_id: category_id.to_string(), index });

		true
	}

	/// Drops categories the current generation never touched and clears rows of
	/// categories it registered without filling.
	pub fn purge_results(&mut self) {
		let generation = self.generation;
		let mut index = 0;

		while index < self.entries.len() {
			if !self.entries[index].touched_in(generation) {
				let removed = self.entries.remove(index);

				self.pending.push(ScopeEvent::CategoryRemoved {
					index,
					category_id: removed.descriptor.id,
				});

				continue;
			}

			let entry = &mut self.entries[index];

			if entry.filled_in != generation {
				entry.filled_in = generation;

				if !entry.results.is_empty() {
					entry.results.clear();
					self.pending.push(ScopeEvent::ResultsReset {
						category_id: entry.descriptor.id.clone(),
					});
				}
			}

			index += 1;
		}
	}

	/// Unconditional reset to an empty model. Category ranks survive.
	pub fn clear_all(&mut self) {
		if self.entries.is_empty() {
			return;
		}

		self.entries.clear();
		self.pending.push(ScopeEvent::CategoriesCleared);
	}

	/// Pins a renderer for `category_id`, also for later registrations.
	///
	/// Returns whether the category is currently present.
	pub fn override_renderer(&mut self, category_id: &str, renderer: Value) -> bool {
		self.overrides.insert(category_id.to_string(), renderer.clone());

		let Some(entry) = self.entries.iter_mut().find(|entry| entry.descriptor.id == category_id)
		else {
			return false;
		};

		if entry.descriptor.renderer != renderer {
			entry.descriptor.renderer = renderer;
			self.pending.push(ScopeEvent::CategoryChanged {
				category_id: category_id.to_string(),
				attributes: vec![CategoryAttribute::Renderer],
			});
		}

		true
	}

	/// Takes the structural changes recorded so far, followed by one count
	/// change per category whose row count moved since the last drain.
	pub fn drain_events(&mut self) -> Vec<ScopeEvent> {
		let mut events = std::mem::take(&mut self.pending);

		for entry in &mut self.entries {
			if entry.results.len() != entry.reported_count {
				entry.reported_count = entry.results.len();
				events.push(ScopeEvent::CountChanged {
					category_id: entry.descriptor.id.clone(),
					count: entry.reported_count,
				});
			}
		}

		events
	}

	pub fn category_ids(&self) -> Vec<&str> {
		self.entries.iter().map(|entry| entry.descriptor.id.as_str()).collect()
	}

	pub fn category(&self, category_id: &str) -> Option<&CategoryDescriptor> {
		self.entries
			.iter()
			.find(|entry| entry.descriptor.id == category_id)
			.map(|entry| &entry.descriptor)
	}

	pub fn results(&self, category_id: &str) -> Option<&[ScopeResult]> {
		self.entries
			.iter()
			.find(|entry| entry.descriptor.id == category_id)
			.map(|entry| entry.results.as_slice())
	}

	pub fn find_result(&self, uri: &str) -> Option<&ScopeResult> {
		self.entries.iter().flat_map(|entry| entry.results.iter()).find(|result| result.uri == uri)
	}

	pub fn result_count(&self) -> usize {
		self.entries.iter().map(|entry| entry.results.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn snapshot(&self) -> Vec<CategorySnapshot> {
		self.entries
			.iter()
			.map(|entry| CategorySnapshot {
				descriptor: entry.descriptor.clone(),
				results: entry.results.clone(),
			})
			.collect()
	}

	fn position(&self, category_id: &str) -> Option<usize> {
		self.entries.iter().position(|entry| entry.descriptor.id == category_id)
	}
}
