use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Filter values keyed by filter id, as carried by queries and canned queries.
pub type FilterSnapshot = BTreeMap<String, FilterValue>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
	pub id: String,
	#[serde(default)]
	pub title: String,
	pub kind: FilterKind,
}
impl FilterDefinition {
	pub fn default_value(&self) -> FilterValue {
		match &self.kind {
			FilterKind::OptionSelector { options, .. } => FilterValue::Options(
				options
					.iter()
					.filter(|option| option.default_selected)
					.map(|option| option.id.clone())
					.collect(),
			),
			FilterKind::ValueSlider { default, .. } => FilterValue::Number(*default),
			FilterKind::RangeInput { .. } => FilterValue::Range { start: None, end: None },
			FilterKind::Switch { default } => FilterValue::Switch(*default),
		}
	}

	/// Checks that `value` has the right shape for this filter and stays in bounds.
	pub fn check(&self, value: &FilterValue) -> Result<()> {
		let invalid = |message: &str| Error::InvalidFilterValue {
			filter_id: self.id.clone(),
			message: message.to_string(),
		};

		match (&self.kind, value) {
			(FilterKind::OptionSelector { multi_select, options }, FilterValue::Options(selected)) => {
				if !multi_select && selected.len() > 1 {
					return Err(invalid("single-select filter accepts one option"));
				}
				if let Some(unknown) =
					selected.iter().find(|id| !options.iter().any(|option| &option.id == *id))
				{
					return Err(invalid(&format!("unknown option {unknown:?}")));
				}

				Ok(())
			},
			(FilterKind::ValueSlider { min, max, .. }, FilterValue::Number(number)) => {
				if !number.is_finite() || number < min || number > max {
					return Err(invalid("value is outside the slider range"));
				}

				Ok(())
			},
			(FilterKind::RangeInput { .. }, FilterValue::Range { start, end }) => {
				if let (Some(start), Some(end)) = (start, end)
					&& start > end
				{
					return Err(invalid("range start is greater than range end"));
				}

				Ok(())
			},
			(FilterKind::Switch { .. }, FilterValue::Switch(_)) => Ok(()),
			_ => Err(invalid("value type does not match the filter kind")),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterKind {
	OptionSelector {
		#[serde(default)]
		multi_select: bool,
		options: Vec<FilterOption>,
	},
	ValueSlider {
		min: f64,
		max: f64,
		default: f64,
	},
	RangeInput {
		#[serde(default)]
		start_label: String,
		#[serde(default)]
		end_label: String,
	},
	Switch {
		#[serde(default)]
		default: bool,
	},
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
	pub id: String,
	#[serde(default)]
	pub label: String,
	#[serde(default)]
	pub default_selected: bool,
}
impl FilterOption {
	pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
		Self { id: id.into(), label: label.into(), default_selected: false }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
	Options(BTreeSet<String>),
	Number(f64),
	Range { start: Option<f64>, end: Option<f64> },
	Switch(bool),
}
impl FilterValue {
	pub fn option(id: impl Into<String>) -> Self {
		Self::Options(BTreeSet::from([id.into()]))
	}
}
