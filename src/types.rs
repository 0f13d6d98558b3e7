use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // SHARE codes gender as 1 = male, 2 = female
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" | "1" => Ok(Gender::Male),
            "female" | "f" | "2" => Ok(Gender::Female),
            other => Err(format!("unrecognised gender value '{}'", other)),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
        }
    }
}

/// One survey participant. Indicators with a missing answer are absent
/// from `responses`.
#[derive(Debug, Clone, PartialEq)]
pub struct Respondent {
    pub age: i32,
    pub gender: Gender,
    pub country: String,
    pub responses: HashMap<String, String>,
}

impl Respondent {
    pub fn response(&self, indicator: &str) -> Option<&str> {
        self.responses.get(indicator).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub age_min: i32,
    pub age_max: i32,
    pub genders: BTreeSet<Gender>,
    pub indicator: String,
}

impl FilterCriteria {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.age_min > self.age_max {
            return Err(PipelineError::InvalidFilterRange {
                age_min: self.age_min,
                age_max: self.age_max,
            });
        }
        Ok(())
    }
}

/// A survey question whose answers are aggregated, together with the
/// answer counted as the numerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Indicator {
    pub name: String,
    pub label: String,
    pub column: String,
    pub positive: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSet {
    indicators: Vec<Indicator>,
}

impl IndicatorSet {
    pub fn new(indicators: Vec<Indicator>) -> Result<Self, PipelineError> {
        let mut seen = BTreeSet::new();
        for indicator in &indicators {
            if !seen.insert(indicator.name.as_str()) {
                return Err(PipelineError::DuplicateIndicator(indicator.name.clone()));
            }
        }
        Ok(Self { indicators })
    }

    pub fn get(&self, name: &str) -> Result<&Indicator, PipelineError> {
        self.indicators
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| PipelineError::UnknownIndicator(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Indicator> {
        self.indicators.iter()
    }

    /// (value, label) pairs for an indicator selector.
    pub fn options(&self) -> Vec<(String, String)> {
        self.indicators
            .iter()
            .map(|i| (i.name.clone(), i.label.clone()))
            .collect()
    }
}

/// Per-country crosstab row for the chosen indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub country: String,
    // Respondents with a non-missing answer
    pub respondents: usize,
    pub percentage: f64,
    pub distribution: BTreeMap<String, f64>,
}

/// An aggregate row that found its boundary id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRow {
    pub country: String,
    pub id: u32,
    pub percentage: f64,
    pub respondents: usize,
}
