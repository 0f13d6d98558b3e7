use crate::data::Dataset;
use crate::types::{FilterCriteria, Respondent};

/// Read-only subsequence of the dataset that passed a filter.
#[derive(Debug, Clone, Default)]
pub struct FilteredView<'a> {
    records: Vec<&'a Respondent>,
}

impl<'a> FilteredView<'a> {
    pub fn records(&self) -> &[&'a Respondent] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Keeps respondents whose age lies in `[age_min, age_max]` and whose
/// gender is selected. An empty gender set yields an empty view.
///
/// The range is not validated here; callers run
/// [`FilterCriteria::validate`] first.
pub fn filter<'a>(dataset: &'a Dataset, criteria: &FilterCriteria) -> FilteredView<'a> {
    let records = dataset
        .respondents()
        .iter()
        .filter(|r| r.age >= criteria.age_min && r.age <= criteria.age_max)
        .filter(|r| criteria.genders.contains(&r.gender))
        .collect();
    FilteredView { records }
}
