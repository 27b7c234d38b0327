use anyhow::Result;
use std::path::Path;
use vegwatch::render::dashboard::{summary_lines, write_dashboard};
use vegwatch::{
    load_config, load_credentials, Coordinate, DateRange, EarthEngineCollect,
    VegetationHealthWorkflow, WorkflowOptions,
};

/// Example: mean NDVI around one location (Kolkata, January 2024)
/// Needs VEGWATCH_ACCESS_TOKEN or .streamlit/secrets.toml
fn main() -> Result<()> {
    println!("=== Example: NDVI health at a single location ===\n");

    let config = load_config(None)?;
    let credentials = load_credentials(None)?;
    let provider = EarthEngineCollect::connect(credentials, config.earth_engine.clone())?;

    let options = WorkflowOptions::from_config(&config)?;
    let thresholds = options.thresholds;
    let workflow = VegetationHealthWorkflow::new(provider, options);

    let point = Coordinate::new(22.5726, 88.3639);
    let range = DateRange::parse("2024-01-01", "2024-01-31")?;
    println!("Location: {}, {}", point.latitude, point.longitude);
    println!("Period: {} to {}\n", range.start_str(), range.end_str());

    let report = workflow.run_point(point, range)?;
    for line in summary_lines(&report) {
        println!("{}", line);
    }

    let files = write_dashboard(&report, &thresholds, &config.render, Path::new("./output"))?;
    println!("\nDashboard: {:?}", files.html);
    Ok(())
}
