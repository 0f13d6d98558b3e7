use crate::types::{FilterCriteria, Gender};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    // Country display name -> numeric boundary id (ISO 3166 numeric)
    pub registry: BTreeMap<String, u32>,
    pub indicators: Vec<IndicatorConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_csv: PathBuf,
    #[serde(default = "default_country_column")]
    pub country_column: String,
    #[serde(default = "default_gender_column")]
    pub gender_column: String,
    pub age: AgeSource,
    pub boundaries: Option<PathBuf>,
    #[serde(default = "default_join_column_shape")]
    pub join_column_shape: String,
}

/// Where a respondent's age comes from.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgeSource {
    Age { column: String },
    BirthYear { column: String, reference_year: i32 },
}

impl AgeSource {
    pub fn column(&self) -> &str {
        match self {
            AgeSource::Age { column } | AgeSource::BirthYear { column, .. } => column,
        }
    }

    /// Converts the raw column value into an age in years. `None` when the
    /// birth year is too far out of range to subtract.
    pub fn age_from(&self, raw: i32) -> Option<i32> {
        match self {
            AgeSource::Age { .. } => Some(raw),
            AgeSource::BirthYear { reference_year, .. } => reference_year.checked_sub(raw),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndicatorConfig {
    pub name: String,
    pub label: Option<String>,
    pub positive: String,
    // CSV column, defaults to the indicator name
    pub column: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    pub age_min: i32,
    pub age_max: i32,
    pub genders: Vec<Gender>,
    pub indicator: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            age_min: 0,
            age_max: 120,
            genders: vec![Gender::Male, Gender::Female],
            indicator: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub projection: String,
    pub topology_url: String,
    pub topology_feature: String,
    // Base URL the rendered handlers post selection changes to
    pub endpoint: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title: "Map visualisation".to_string(),
            width: 400,
            height: 300,
            projection: "mercator".to_string(),
            topology_url: "https://cdn.jsdelivr.net/npm/vega-datasets@v1.29.0/data/world-110m.json"
                .to_string(),
            topology_feature: "countries".to_string(),
            endpoint: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8050,
            static_dir: PathBuf::from("."),
        }
    }
}

fn default_country_column() -> String {
    "country".to_string()
}

fn default_gender_column() -> String {
    "gender".to_string()
}

fn default_join_column_shape() -> String {
    "id".to_string()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Filter criteria the UI starts from before any input has changed.
    pub fn default_criteria(&self) -> FilterCriteria {
        let indicator = self
            .defaults
            .indicator
            .clone()
            .or_else(|| self.indicators.first().map(|i| i.name.clone()))
            .unwrap_or_default();
        FilterCriteria {
            age_min: self.defaults.age_min,
            age_max: self.defaults.age_max,
            genders: self.defaults.genders.iter().copied().collect::<BTreeSet<_>>(),
            indicator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [input]
        data_csv = "res.csv"

        [input.age]
        kind = "birth_year"
        column = "yrbirth"
        reference_year = 2017

        [registry]
        Germany = 276
        Denmark = 208

        [[indicators]]
        name = "use"
        label = "computer use"
        positive = "Yes"
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.input.country_column, "country");
        assert_eq!(config.input.join_column_shape, "id");
        assert_eq!(config.registry.get("Germany"), Some(&276));
        assert_eq!(config.render.projection, "mercator");
        assert_eq!(config.server.port, 8050);
        assert_eq!(
            config.input.age,
            AgeSource::BirthYear {
                column: "yrbirth".to_string(),
                reference_year: 2017
            }
        );
    }

    #[test]
    fn birth_year_is_converted_to_age() {
        let source = AgeSource::BirthYear {
            column: "yrbirth".to_string(),
            reference_year: 2017,
        };
        assert_eq!(source.age_from(1950), Some(67));
        assert_eq!(source.age_from(-2_147_483_000), None);
        assert_eq!(source.column(), "yrbirth");
    }

    #[test]
    fn default_criteria_falls_back_to_first_indicator() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let criteria = config.default_criteria();
        assert_eq!(criteria.indicator, "use");
        assert_eq!(criteria.genders.len(), 2);
        assert!(criteria.age_min <= criteria.age_max);
    }

    #[test]
    fn shipped_config_parses() {
        let config = AppConfig::from_toml(include_str!("../config.toml")).unwrap();
        assert_eq!(config.registry.len(), 12);
        assert_eq!(config.indicators.len(), 3);
        assert_eq!(config.default_criteria().indicator, "use");
    }
}
