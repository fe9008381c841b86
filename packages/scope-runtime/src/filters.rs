use scope_domain::{Error, FilterDefinition, FilterSnapshot, FilterValue, Result};

/// Current filter values of one scope.
///
/// `active_count` is recomputed on every mutation.
#[derive(Debug, Default)]
pub struct FilterState {
	definitions: Vec<FilterDefinition>,
	values: FilterSnapshot,
	active_count: usize,
}
impl FilterState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn definitions(&self) -> &[FilterDefinition] {
		&self.definitions
	}

	pub fn values(&self) -> &FilterSnapshot {
		&self.values
	}

	pub fn active_count(&self) -> usize {
		self.active_count
	}

	pub fn snapshot(&self) -> FilterSnapshot {
		self.values.clone()
	}

	pub fn set_value(&mut self, filter_id: &str, value: FilterValue) -> Result<usize> {
		let definition = self
			.definition(filter_id)
			.ok_or_else(|| Error::UnknownFilter { filter_id: filter_id.to_string() })?;

		definition.check(&value)?;
		self.values.insert(filter_id.to_string(), value);

		Ok(self.recount())
	}

	pub fn reset(&mut self) -> usize {
		self.values = self
			.definitions
			.iter()
			.map(|definition| (definition.id.clone(), definition.default_value()))
			.collect();

		self.recount()
	}

	/// Adopts a snapshot from a canned query as-is; it is checked at dispatch.
	pub fn restore(&mut self, snapshot: FilterSnapshot) -> usize {
		self.values = snapshot;

		self.recount()
	}

	/// Installs the filters reported by a completed search.
	///
	/// Values come from the backend state first, then the previous value, then the
	/// default, skipping any that no longer fit their definition.
	pub fn replace_definitions(
		&mut self,
		definitions: Vec<FilterDefinition>,
		state: FilterSnapshot,
	) -> usize {
		let mut values = FilterSnapshot::new();

		for definition in &definitions {
			let value = [state.get(&definition.id), self.values.get(&definition.id)]
				.into_iter()
				.flatten()
				.find(|value| definition.check(value).is_ok())
				.cloned()
				.unwrap_or_else(|| definition.default_value());

			values.insert(definition.id.clone(), value);
		}

		self.definitions = definitions;
		self.values = values;

		self.recount()
	}

	/// Rejects values that do not fit, and unknown ids once definitions are known.
	pub fn validate(&self, snapshot: &FilterSnapshot) -> Result<()> {
		for (filter_id, value) in snapshot {
			match self.definition(filter_id) {
				Some(definition) => definition.check(value)?,
				None if self.definitions.is_empty() => {},
				None => return Err(Error::UnknownFilter { filter_id: filter_id.clone() }),
			}
		}

		Ok(())
	}

	fn definition(&self, filter_id: &str) -> Option<&FilterDefinition> {
		self.definitions.iter().find(|definition| definition.id == filter_id)
	}

	fn recount(&mut self) -> usize {
		let count = self
			.definitions
			.iter()
			.filter(|definition| {
				self.values.get(&definition.id).is_some_and(|value| *value != definition.default_value())
			})
			.count();

		self.active_count = count;

		count
	}
}
