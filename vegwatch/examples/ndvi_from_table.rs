use anyhow::Result;
use std::path::Path;
use std::io::Cursor;
use vegwatch::render::dashboard::write_dashboard;
use vegwatch::{
    load_config, load_credentials, DateRange, EarthEngineCollect, VegetationHealthWorkflow,
    WorkflowOptions,
};

/// Example: bulk NDVI health for a small table of fields around La Rochelle
/// Needs VEGWATCH_ACCESS_TOKEN or .streamlit/secrets.toml
fn main() -> Result<()> {
    println!("=== Example: NDVI health from a coordinate table ===\n");

    let table = "site,latitude,longitude\n\
                 marsh,46.1870,-1.1420\n\
                 park,46.1625,-1.1520\n\
                 harbour,46.1540,-1.1530\n";

    let config = load_config(None)?;
    let credentials = load_credentials(None)?;
    let provider = EarthEngineCollect::connect(credentials, config.earth_engine.clone())?;

    let mut options = WorkflowOptions::from_config(&config)?;
    options.max_concurrency = 3;
    options.show_progress = true;
    let thresholds = options.thresholds;
    let workflow = VegetationHealthWorkflow::new(provider, options);

    let range = DateRange::parse("2024-06-01", "2024-08-31")?;
    let report = workflow.run_table(Cursor::new(table), range)?;

    for row in &report.rows {
        println!(
            "  {:.4}, {:.4}  NDVI {}  {}",
            row.coordinate.latitude,
            row.coordinate.longitude,
            row.ndvi_display(),
            row.status
        );
    }

    let files = write_dashboard(&report, &thresholds, &config.render, Path::new("./output"))?;
    println!("\nDashboard: {:?}", files.html);
    println!("CSV: {:?}", files.csv);
    Ok(())
}
