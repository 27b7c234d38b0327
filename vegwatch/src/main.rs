//! vegwatch CLI - vegetation health from Sentinel-2 NDVI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vegwatch::collect::global_variables::OUTPUT_PATH;
use vegwatch::commons::table::read_coordinates_file;
use vegwatch::render::dashboard::{summary_lines, write_dashboard};
use vegwatch::{
    load_config, load_credentials, Coordinate, DateRange, EarthEngineCollect, InputMode,
    VegetationHealthWorkflow, WorkflowOptions,
};

#[derive(Parser)]
#[command(name = "vegwatch")]
#[command(version, about = "Vegetation health (NDVI) dashboard from Sentinel-2 imagery", long_about = None)]
struct Cli {
    /// Configuration file; ./vegwatch.toml is used when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Streamlit secrets.toml or service-account JSON key
    #[arg(short, long, global = true)]
    secrets: Option<PathBuf>,

    /// Directory receiving dashboard.html and ndvi_results.csv
    #[arg(short, long, global = true, default_value = OUTPUT_PATH)]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mean NDVI around a single location
    Point {
        #[arg(long, default_value_t = 22.5726, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, default_value_t = 88.3639, allow_negative_numbers = true)]
        lon: f64,
        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-01")]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-31")]
        end: String,
    },
    /// Mean NDVI for every row of a CSV with latitude/longitude columns
    Table {
        input: PathBuf,
        #[arg(long, default_value = "2024-01-01")]
        start: String,
        #[arg(long, default_value = "2024-01-31")]
        end: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Inputs are validated before any credential is touched
    let (coordinates, date_range, mode) = match &cli.command {
        Commands::Point {
            lat,
            lon,
            start,
            end,
        } => (
            vec![Coordinate::new(*lat, *lon)],
            DateRange::parse(start, end)?,
            InputMode::SinglePoint,
        ),
        Commands::Table { input, start, end } => {
            let date_range = DateRange::parse(start, end)?;
            (read_coordinates_file(input)?, date_range, InputMode::Table)
        }
    };

    let credentials = load_credentials(cli.secrets.as_deref())?;
    let provider = EarthEngineCollect::connect(credentials, config.earth_engine.clone())?;

    let mut options = WorkflowOptions::from_config(&config)?;
    options.show_progress = mode == InputMode::Table;
    let thresholds = options.thresholds;
    let workflow = VegetationHealthWorkflow::new(provider, options);

    let report = workflow.run_coordinates(&coordinates, date_range, mode)?;

    for line in summary_lines(&report) {
        println!("{}", line);
    }
    if mode == InputMode::Table {
        for row in &report.rows {
            println!(
                "{:>10} {:>11}  {:>6}  {}",
                row.coordinate.latitude,
                row.coordinate.longitude,
                row.ndvi_display(),
                row.status
            );
        }
    }

    let files = write_dashboard(&report, &thresholds, &config.render, &cli.out_dir)?;
    println!("Dashboard: {}", files.html.display());
    println!("CSV: {}", files.csv.display());

    Ok(())
}
