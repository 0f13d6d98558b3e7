use crate::aggregate::aggregate;
use crate::config::{AppConfig, RenderConfig};
use crate::data::{self, Boundary, CountryRegistry, Dataset};
use crate::error::PipelineError;
use crate::filter::filter;
use crate::geo_join::{join, GeoJoin};
use crate::render::{render, BoundarySource, RenderOptions, VisualizationDocument};
use crate::selection::SelectionState;
use crate::types::{AggregateRow, FilterCriteria, Indicator, IndicatorSet};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything that distinguishes one survey explorer from another: the
/// id scheme and registry, the indicator table and the presentation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub registry: CountryRegistry,
    pub indicators: IndicatorSet,
    pub boundaries: BoundarySource,
    pub render: RenderConfig,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let registry =
            CountryRegistry::new(config.registry.iter().map(|(name, id)| (name.clone(), *id)))?;

        let indicators = IndicatorSet::new(
            config
                .indicators
                .iter()
                .map(|ind| Indicator {
                    name: ind.name.clone(),
                    label: ind.label.clone().unwrap_or_else(|| ind.name.clone()),
                    column: ind.column.clone().unwrap_or_else(|| ind.name.clone()),
                    positive: ind.positive.clone(),
                })
                .collect(),
        )?;

        let boundaries = match config.input.boundaries {
            Some(_) => BoundarySource::Inline,
            None => BoundarySource::Remote {
                url: config.render.topology_url.clone(),
                feature: config.render.topology_feature.clone(),
            },
        };

        Ok(Self {
            registry,
            indicators,
            boundaries,
            render: config.render.clone(),
        })
    }
}

/// Result of one filter -> aggregate -> join -> render pass.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub aggregate: Vec<AggregateRow>,
    pub join: GeoJoin,
    pub document: VisualizationDocument,
}

pub struct Pipeline {
    config: PipelineConfig,
    dataset: Arc<Dataset>,
    boundaries: Vec<Boundary>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, dataset: Arc<Dataset>, boundaries: Vec<Boundary>) -> Self {
        Self {
            config,
            dataset,
            boundaries,
        }
    }

    /// Builds the pipeline from the application config, loading the survey
    /// CSV and any local boundary file.
    pub fn load(app_config: &AppConfig) -> Result<Self> {
        let config = PipelineConfig::from_app_config(app_config)?;
        info!("Registry maps {} countries", config.registry.len());
        let dataset = data::load_dataset(app_config, &config.indicators)?;
        let boundaries = match &app_config.input.boundaries {
            Some(path) => data::load_boundaries(path, &app_config.input.join_column_shape)?,
            None => Vec::new(),
        };
        Ok(Self::new(config, Arc::new(dataset), boundaries))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Runs the whole pipeline for one input event. Structural errors are
    /// returned before anything is aggregated; unmapped countries only show
    /// up as diagnostics on the join.
    pub fn run(
        &self,
        criteria: &FilterCriteria,
        selection: &SelectionState,
    ) -> Result<RunOutput, PipelineError> {
        criteria.validate()?;
        let indicator = self.config.indicators.get(&criteria.indicator)?;

        let view = filter(&self.dataset, criteria);
        debug!(matched = view.len(), total = self.dataset.len(), "filtered dataset");

        let rows = aggregate(&view, &self.config.indicators, &indicator.name)?;

        let boundaries = match self.config.boundaries {
            BoundarySource::Inline => Some(self.boundaries.as_slice()),
            BoundarySource::Remote { .. } => None,
        };
        let joined = join(&rows, &self.config.registry, boundaries);

        let options = RenderOptions {
            config: &self.config.render,
            boundaries: &self.config.boundaries,
            indicator_label: &indicator.label,
        };
        let document = render(&joined, selection, &options);

        info!(
            indicator = %indicator.name,
            age_min = criteria.age_min,
            age_max = criteria.age_max,
            countries = joined.rows.len(),
            dropped = joined.diagnostics.len(),
            "pipeline run complete"
        );

        Ok(RunOutput {
            aggregate: rows,
            join: joined,
            document,
        })
    }
}
