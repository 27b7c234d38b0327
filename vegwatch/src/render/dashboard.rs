use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, Value as GeoValue};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{DASHBOARD_HTML, RESULTS_CSV};
use crate::commons::table::{results_to_csv_string, write_results_file};
use crate::config::RenderConfig;
use crate::geo_core::BoundingBox;
use crate::geometric::vegetation_health::{HealthLabel, ResultRow, Thresholds};
use crate::workflow::{HealthReport, InputMode};

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; margin: 0 auto; max-width: 1100px; padding: 1rem 1.5rem; color: #222; }
h1 { font-size: 1.6rem; }
.period { color: #555; }
.summary { background: #eef7ee; border-left: 4px solid #3a3; padding: .6rem 1rem; margin: 1rem 0; }
.summary.no-data { background: #fff6e5; border-left-color: #e90; }
#map { width: 100%; border: 1px solid #ccc; border-radius: 4px; }
.legend { background: #fff; padding: .5rem .75rem; border-radius: 4px; box-shadow: 0 0 6px rgba(0,0,0,.3); line-height: 1.5rem; }
.legend i { display: inline-block; width: 12px; height: 12px; border-radius: 50%; margin-right: 6px; vertical-align: middle; }
table { border-collapse: collapse; margin: 1rem 0; width: 100%; }
th, td { border: 1px solid #ddd; padding: .35rem .6rem; text-align: right; }
th { background: #f4f4f4; }
td.status { text-align: left; font-weight: 600; }
a.download { display: inline-block; padding: .45rem .9rem; background: #2a7; color: #fff; border-radius: 4px; text-decoration: none; }
"#;

const MAP_SCRIPT: &str = r#"
(function () {
  const d = DASHBOARD;
  const map = L.map('map');
  L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
    maxZoom: 19,
    attribution: '&copy; OpenStreetMap contributors'
  }).addTo(map);

  const overlays = {};
  if (d.layer) {
    overlays[d.layer.name] = L.tileLayer(d.layer.url_template, {
      attribution: d.layer.attribution,
      opacity: 0.8
    }).addTo(map);
  }

  const markers = L.geoJSON(d.markers, {
    pointToLayer: function (f, latlng) {
      return L.circleMarker(latlng, {
        radius: 8, weight: 2, color: f.properties.color,
        fillColor: f.properties.color, fillOpacity: 0.85
      });
    },
    onEachFeature: function (f, layer) {
      const p = f.properties;
      layer.bindPopup('Lat: ' + p.latitude + '<br>Lon: ' + p.longitude +
        '<br>NDVI: ' + p.ndvi + '<br>Status: ' + p.status);
    }
  }).addTo(map);
  overlays['Locations'] = markers;
  L.control.layers(null, overlays).addTo(map);

  if (d.bounds) {
    map.fitBounds(d.bounds, { padding: [40, 40], maxZoom: d.zoom });
  } else if (d.center) {
    map.setView(d.center, d.zoom);
  } else {
    map.setView([0, 0], 2);
  }

  const legend = L.control({ position: 'bottomright' });
  legend.onAdd = function () {
    const div = L.DomUtil.create('div', 'legend');
    div.innerHTML = '<strong>NDVI status</strong>' + d.legend.map(function (e) {
      return '<div><i style="background:' + e.color + '"></i>' + e.label + '</div>';
    }).join('');
    return div;
  };
  legend.addTo(map);
})();
"#;

/// Files produced for one run
#[derive(Debug, Clone)]
pub struct DashboardFiles {
    pub html: PathBuf,
    pub csv: PathBuf,
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Legend entries in display order, with the cut points spelled out
pub fn legend_entries(thresholds: &Thresholds) -> Vec<(HealthLabel, String)> {
    vec![
        (
            HealthLabel::Healthy,
            format!("Healthy (NDVI &gt; {})", thresholds.healthy),
        ),
        (
            HealthLabel::Moderate,
            format!(
                "Moderate ({} &lt; NDVI &le; {})",
                thresholds.moderate, thresholds.healthy
            ),
        ),
        (
            HealthLabel::Unhealthy,
            format!("Unhealthy (NDVI &le; {})", thresholds.moderate),
        ),
        (HealthLabel::NoData, "No data".to_string()),
    ]
}

/// One point feature per row, colored by label
pub fn markers_geojson(rows: &[ResultRow]) -> FeatureCollection {
    let features = rows
        .iter()
        .filter(|row| row.coordinate.is_finite())
        .map(|row| {
            let mut properties = Map::new();
            properties.insert("latitude".to_string(), json!(row.coordinate.latitude));
            properties.insert("longitude".to_string(), json!(row.coordinate.longitude));
            properties.insert("ndvi".to_string(), json!(row.ndvi_display()));
            properties.insert("status".to_string(), json!(row.status.as_str()));
            properties.insert("color".to_string(), json!(row.status.color()));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::Point(vec![
                    row.coordinate.longitude,
                    row.coordinate.latitude,
                ]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Messages shown above the map
pub fn summary_lines(report: &HealthReport) -> Vec<String> {
    match (report.mode, report.rows.as_slice()) {
        (InputMode::SinglePoint, [row]) => match row.ndvi {
            Some(value) => vec![
                format!("Mean NDVI at location: {:.3}", value),
                row.status.message().to_string(),
            ],
            None => vec![HealthLabel::NoData.message().to_string()],
        },
        _ => {
            let count = |label: HealthLabel| report.rows.iter().filter(|r| r.status == label).count();
            vec![format!(
                "Processed {} location(s): {} healthy, {} moderate, {} unhealthy, {} without data",
                report.rows.len(),
                count(HealthLabel::Healthy),
                count(HealthLabel::Moderate),
                count(HealthLabel::Unhealthy),
                count(HealthLabel::NoData),
            )]
        }
    }
}

/// Data consumed by the map script
fn map_data(report: &HealthReport, thresholds: &Thresholds, config: &RenderConfig) -> Value {
    let center = report
        .center
        .map(|c| json!([c.latitude, c.longitude]))
        .unwrap_or(Value::Null);
    let bounds = match report.mode {
        InputMode::Table => BoundingBox::enclosing(&report.coordinates())
            .map(|bbox| json!(bbox.to_leaflet_bounds()))
            .unwrap_or(Value::Null),
        InputMode::SinglePoint => Value::Null,
    };
    let legend: Vec<Value> = legend_entries(thresholds)
        .into_iter()
        .map(|(label, text)| json!({ "color": label.color(), "label": text }))
        .collect();

    json!({
        "center": center,
        "zoom": config.single_point_zoom,
        "bounds": bounds,
        "markers": markers_geojson(&report.rows),
        "layer": report.index_layer,
        "legend": legend,
    })
}

fn results_table(rows: &[ResultRow]) -> String {
    let mut html = String::from(
        "<table>\n<thead><tr><th>latitude</th><th>longitude</th><th>NDVI</th><th>Status</th></tr></thead>\n<tbody>\n",
    );
    for row in rows {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"status\" style=\"color:{}\">{}</td></tr>",
            row.coordinate.latitude,
            row.coordinate.longitude,
            escape_html(&row.ndvi_display()),
            row.status.color(),
            row.status.as_str(),
        ));
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

/// Self-contained HTML page: summary, map with markers, legend, optional index layer, table, CSV download
pub fn render_dashboard(
    report: &HealthReport,
    thresholds: &Thresholds,
    config: &RenderConfig,
) -> Result<String> {
    let csv = results_to_csv_string(&report.rows)?;
    // JSON is embedded in a <script> element
    let data = serde_json::to_string(&map_data(report, thresholds, config))
        .context("Failed to serialize map data")?
        .replace("</", "<\\/");
    let title = escape_html(&config.title);

    let mut html = String::new();
    writeln!(html, "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">")?;
    writeln!(html, "<title>{}</title>", title)?;
    writeln!(html, "<link rel=\"stylesheet\" href=\"{}\">", LEAFLET_CSS)?;
    writeln!(html, "<style>{}</style>\n</head>\n<body>", STYLE)?;
    writeln!(html, "<h1>{}</h1>", title)?;
    writeln!(
        html,
        "<p class=\"period\">Sentinel-2 imagery from {} to {}</p>",
        report.date_range.start_str(),
        report.date_range.end_str()
    )?;

    let no_data = report.rows.iter().all(|r| r.status == HealthLabel::NoData);
    writeln!(
        html,
        "<div class=\"summary{}\">",
        if no_data { " no-data" } else { "" }
    )?;
    for line in summary_lines(report) {
        writeln!(html, "<p>{}</p>", escape_html(&line))?;
    }
    html.push_str("</div>\n");

    writeln!(
        html,
        "<div id=\"map\" style=\"height:{}px\"></div>",
        config.map_height_px
    )?;
    html.push_str("<h2>Results</h2>\n");
    html.push_str(&results_table(&report.rows));
    writeln!(
        html,
        "<a class=\"download\" download=\"{}\" href=\"data:text/csv;charset=utf-8,{}\">Download CSV</a>",
        RESULTS_CSV,
        urlencoding::encode(&csv)
    )?;

    writeln!(html, "<script src=\"{}\"></script>", LEAFLET_JS)?;
    writeln!(html, "<script>\nconst DASHBOARD = {};\n</script>", data)?;
    writeln!(html, "<script>{}</script>\n</body>\n</html>", MAP_SCRIPT)?;
    Ok(html)
}

/// Write `dashboard.html` and `ndvi_results.csv` into `output_dir`
pub fn write_dashboard(
    report: &HealthReport,
    thresholds: &Thresholds,
    config: &RenderConfig,
    output_dir: &Path,
) -> Result<DashboardFiles> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", output_dir))?;

    let html_path = output_dir.join(DASHBOARD_HTML);
    let html = render_dashboard(report, thresholds, config)?;
    std::fs::write(&html_path, html)
        .with_context(|| format!("Failed to write file: {:?}", html_path))?;

    let csv_path = output_dir.join(RESULTS_CSV);
    write_results_file(&report.rows, &csv_path)?;

    tracing::info!(html = ?html_path, csv = ?csv_path, "dashboard written");
    Ok(DashboardFiles {
        html: html_path,
        csv: csv_path,
    })
}
