use anyhow::Context;
use clap::{Parser, Subcommand};
use share_map::config::AppConfig;
use share_map::{server, Gender, Pipeline, SelectionState};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the linked map and bar chart for one set of filters
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        age_min: Option<i32>,
        #[arg(long)]
        age_max: Option<i32>,
        /// Repeat for several genders; omitted means the configured default
        #[arg(long = "gender")]
        genders: Vec<Gender>,
        #[arg(short, long)]
        indicator: Option<String>,
        /// Country ids to render as selected
        #[arg(long = "select")]
        selected: Vec<u32>,
        /// Output file; a .json extension writes the bare chart spec
        #[arg(short, long, value_name = "FILE", default_value = "map.html")]
        out: PathBuf,
    },
    /// Serve the interactive explorer
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            config,
            age_min,
            age_max,
            genders,
            indicator,
            selected,
            out,
        } => {
            info!("Rendering with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;
            let pipeline = Pipeline::load(&app_config)?;

            let mut criteria = app_config.default_criteria();
            if let Some(age_min) = age_min {
                criteria.age_min = age_min;
            }
            if let Some(age_max) = age_max {
                criteria.age_max = age_max;
            }
            if !genders.is_empty() {
                criteria.genders = genders.into_iter().collect();
            }
            if let Some(indicator) = indicator {
                criteria.indicator = indicator;
            }

            let mut selection = SelectionState::new();
            for id in selected {
                selection.toggle(id);
            }

            let output = pipeline.run(&criteria, &selection)?;
            for diagnostic in &output.join.diagnostics {
                warn!("{}", diagnostic);
            }

            let is_json = out
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json"));
            let content = if is_json {
                serde_json::to_string_pretty(&output.document.spec)?
            } else {
                output.document.to_html(&app_config.render.endpoint, None)
            };
            fs::write(&out, content).with_context(|| format!("Failed to write output: {:?}", out))?;

            info!(
                "Wrote {:?} ({} countries{})",
                out,
                output.join.rows.len(),
                if output.document.no_data { ", no data" } else { "" }
            );
        }
        Commands::Serve { config } => {
            info!("Serving explorer with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;
            let pipeline = Pipeline::load(&app_config)?;

            server::start_server(app_config, pipeline).await?;
        }
    }

    Ok(())
}
