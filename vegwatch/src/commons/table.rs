use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::error::VegwatchError;
use crate::geo_core::Coordinate;
use crate::geometric::vegetation_health::{HealthLabel, ResultRow};

/// Required column names of an uploaded coordinate table (case-sensitive)
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";

/// Placeholder written for a missing index value
pub const NOT_AVAILABLE: &str = "N/A";

/// One line of the downloadable results file
#[derive(Debug, Serialize, Deserialize)]
struct ResultRecord {
    latitude: f64,
    longitude: f64,
    #[serde(rename = "NDVI")]
    ndvi: String,
    #[serde(rename = "Status")]
    status: HealthLabel,
}

impl From<&ResultRow> for ResultRecord {
    fn from(row: &ResultRow) -> Self {
        ResultRecord {
            latitude: row.coordinate.latitude,
            longitude: row.coordinate.longitude,
            ndvi: row.ndvi_display(),
            status: row.status,
        }
    }
}

impl TryFrom<ResultRecord> for ResultRow {
    type Error = anyhow::Error;

    fn try_from(record: ResultRecord) -> Result<Self> {
        let ndvi = match record.ndvi.trim() {
            NOT_AVAILABLE | "" => None,
            value => Some(
                value
                    .parse::<f64>()
                    .with_context(|| format!("Invalid NDVI value: {}", value))?,
            ),
        };
        Ok(ResultRow {
            coordinate: Coordinate::new(record.latitude, record.longitude),
            ndvi,
            status: record.status,
        })
    }
}

/// Uploaded files are UTF-8 most of the time; spreadsheet exports are often Windows-1252
fn decode_text(buffer: &[u8]) -> String {
    match std::str::from_utf8(buffer) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(buffer);
            decoded.into_owned()
        }
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header == name)
}

/// Read a coordinate table with `latitude` and `longitude` columns
/// Any missing column fails the whole table before a single row is read.
/// A cell that is not a number yields a NaN component; that row is reported as NO_DATA
pub fn read_coordinates<R: Read>(reader: R) -> Result<Vec<Coordinate>> {
    let mut buffer = Vec::new();
    BufReader::new(reader)
        .read_to_end(&mut buffer)
        .context("Failed to read coordinate table")?;
    let text = decode_text(&buffer);

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .context("Failed to read coordinate table header")?
        .clone();

    let lat_idx = column_index(&headers, LATITUDE_COLUMN);
    let lon_idx = column_index(&headers, LONGITUDE_COLUMN);
    let (lat_idx, lon_idx) = match (lat_idx, lon_idx) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            let missing = [(LATITUDE_COLUMN, lat_idx), (LONGITUDE_COLUMN, lon_idx)]
                .into_iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(VegwatchError::MissingColumns { missing }.into());
        }
    };

    let mut coordinates = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.context("Failed to read coordinate table row")?;
        let row = i + 1;
        let latitude = parse_cell(&record, lat_idx, LATITUDE_COLUMN, row);
        let longitude = parse_cell(&record, lon_idx, LONGITUDE_COLUMN, row);
        coordinates.push(Coordinate::new(latitude, longitude));
    }
    Ok(coordinates)
}

fn parse_cell(record: &StringRecord, idx: usize, column: &str, row: usize) -> f64 {
    let value = record.get(idx).unwrap_or("").trim();
    value.parse::<f64>().unwrap_or_else(|_| {
        tracing::warn!(row, column, value, "coordinate cell is not a number");
        f64::NAN
    })
}

pub fn read_coordinates_file(path: &Path) -> Result<Vec<Coordinate>> {
    let file = File::open(path).with_context(|| format!("Failed to open table: {:?}", path))?;
    read_coordinates(file)
}

/// Write `latitude, longitude, NDVI, Status` rows in order
pub fn write_results<W: Write>(rows: &[ResultRow], writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(writer);
    for row in rows {
        wtr.serialize(ResultRecord::from(row))
            .context("Failed to write result row")?;
    }
    wtr.flush().context("Failed to flush results")?;
    Ok(())
}

pub fn results_to_csv_string(rows: &[ResultRow]) -> Result<String> {
    let mut buffer = Vec::new();
    write_results(rows, &mut buffer)?;
    String::from_utf8(buffer).context("Results CSV is not valid UTF-8")
}

pub fn write_results_file(rows: &[ResultRow], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    write_results(rows, file)
}

/// Read back a results file written by `write_results`
pub fn read_results<R: Read>(reader: R) -> Result<Vec<ResultRow>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: ResultRecord = result.context("Failed to deserialize result row")?;
        rows.push(ResultRow::try_from(record)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ResultRow> {
        vec![
            ResultRow {
                coordinate: Coordinate::new(22.5726, 88.3639),
                ndvi: Some(0.612),
                status: HealthLabel::Healthy,
            },
            ResultRow {
                coordinate: Coordinate::new(-33.8688, 151.2093),
                ndvi: Some(-0.05),
                status: HealthLabel::Unhealthy,
            },
            ResultRow {
                coordinate: Coordinate::new(48.8566, 2.3522),
                ndvi: None,
                status: HealthLabel::NoData,
            },
        ]
    }

    #[test]
    fn test_read_coordinates() {
        let csv = "name,latitude,longitude\nfarm a,22.5726,88.3639\nfarm b, 23.0 ,88.0\n";
        let coords = read_coordinates(csv.as_bytes()).unwrap();
        assert_eq!(
            coords,
            vec![Coordinate::new(22.5726, 88.3639), Coordinate::new(23.0, 88.0)]
        );
    }

    #[test]
    fn test_missing_latitude_column() {
        let csv = "longitude\n88.3\n88.4\n";
        let err = read_coordinates(csv.as_bytes()).unwrap_err();
        match err.downcast_ref::<VegwatchError>() {
            Some(VegwatchError::MissingColumns { missing }) => {
                assert_eq!(missing, &vec!["latitude".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_column_names_are_case_sensitive() {
        let csv = "Latitude,Longitude\n1,2\n";
        let err = read_coordinates(csv.as_bytes()).unwrap_err();
        match err.downcast_ref::<VegwatchError>() {
            Some(VegwatchError::MissingColumns { missing }) => assert_eq!(missing.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_cells_keep_their_row() {
        let csv = "latitude,longitude\n1.0,2.0\nabc,3.0\n4.0,\n";
        let coords = read_coordinates(csv.as_bytes()).unwrap();
        assert_eq!(coords.len(), 3);
        assert_eq!(coords[0], Coordinate::new(1.0, 2.0));
        assert!(coords[1].latitude.is_nan());
        assert_eq!(coords[1].longitude, 3.0);
        assert_eq!(coords[2].latitude, 4.0);
        assert!(coords[2].longitude.is_nan());
        assert!(!coords[1].is_finite());
    }

    #[test]
    fn test_out_of_range_values_pass_through() {
        let csv = "latitude,longitude\n123.0,-500.0\n";
        let coords = read_coordinates(csv.as_bytes()).unwrap();
        assert_eq!(coords, vec![Coordinate::new(123.0, -500.0)]);
    }

    #[test]
    fn test_bom_and_windows_1252() {
        let csv = "\u{feff}latitude,longitude\n1.5,2.5\n";
        assert_eq!(read_coordinates(csv.as_bytes()).unwrap().len(), 1);

        let mut latin = b"site,latitude,longitude\nS".to_vec();
        latin.push(0xE9); // 'é' in Windows-1252
        latin.extend_from_slice(b"te,1.0,2.0\n");
        assert_eq!(
            read_coordinates(latin.as_slice()).unwrap(),
            vec![Coordinate::new(1.0, 2.0)]
        );
    }

    #[test]
    fn test_write_results_format() {
        let csv = results_to_csv_string(&rows()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "latitude,longitude,NDVI,Status");
        assert_eq!(lines[1], "22.5726,88.3639,0.612,HEALTHY");
        assert_eq!(lines[3], "48.8566,2.3522,N/A,NO_DATA");
    }

    #[test]
    fn test_round_trip_with_full_precision_ndvi() {
        let t = crate::geometric::vegetation_health::Thresholds::default();
        let rows = vec![
            ResultRow::classified(Coordinate::new(22.5726, 88.3639), Some(0.61234), &t),
            ResultRow::classified(Coordinate::new(1.0, 2.0), Some(-0.123456), &t),
            ResultRow::classified(Coordinate::new(3.0, 4.0), Some(0.5004), &t),
        ];
        let csv = results_to_csv_string(&rows).unwrap();
        let back = read_results(csv.as_bytes()).unwrap();
        assert_eq!(back, rows);
        assert_eq!(back[0].ndvi, Some(0.612));
        // 0.5004 is above the healthy cut point even though it is shown as 0.500
        assert_eq!(back[2].status, HealthLabel::Healthy);
    }

    #[test]
    fn test_results_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndvi_results.csv");
        write_results_file(&rows(), &path).unwrap();
        let back = read_results(File::open(&path).unwrap()).unwrap();
        assert_eq!(back, rows());
    }
}
