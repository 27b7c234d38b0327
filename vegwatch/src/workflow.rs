use anyhow::{Context, Result};
use std::io::Read;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::collect::provider::{sanitize_index, IndexProvider};
use crate::commons::table::read_coordinates;
use crate::config::VegwatchConfig;
use crate::error::VegwatchError;
use crate::geo_core::{Coordinate, DateRange};
use crate::geometric::index_query::{IndexQuery, LayerQuery, QueryParameters, TileLayer};
use crate::geometric::vegetation_health::{ResultRow, Thresholds};

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Batch progress; a no-op without the `indicatif` feature or when disabled
struct Progress {
    #[cfg(feature = "indicatif")]
    bar: Option<ProgressBar>,
}

#[cfg(feature = "indicatif")]
impl Progress {
    fn new(len: usize, enabled: bool) -> Self {
        let bar = enabled.then(|| {
            let pb = ProgressBar::new(len as u64);
            pb.set_style(progress_style());
            pb.set_message("points");
            pb
        });
        Progress { bar }
    }

    fn inc(&self) {
        if let Some(ref pb) = self.bar {
            pb.inc(1);
        }
    }

    fn finish(&self) {
        if let Some(ref pb) = self.bar {
            pb.finish_with_message("done");
        }
    }
}

#[cfg(not(feature = "indicatif"))]
impl Progress {
    fn new(_len: usize, _enabled: bool) -> Self {
        Progress {}
    }

    fn inc(&self) {}

    fn finish(&self) {}
}

/// Knobs of one workflow run
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub parameters: QueryParameters,
    pub thresholds: Thresholds,
    /// Queries in flight at once (needs the `rayon` feature to exceed 1)
    pub max_concurrency: usize,
    /// Also request the composite index as a map layer
    pub index_layer: bool,
    pub show_progress: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        WorkflowOptions {
            parameters: QueryParameters::default(),
            thresholds: Thresholds::default(),
            max_concurrency: 1,
            index_layer: false,
            show_progress: false,
        }
    }
}

impl WorkflowOptions {
    pub fn from_config(config: &VegwatchConfig) -> Result<Self> {
        Ok(WorkflowOptions {
            parameters: config.query,
            thresholds: config.classification.thresholds()?,
            max_concurrency: config.batch.max_concurrency.max(1),
            index_layer: config.render.index_layer,
            show_progress: false,
        })
    }
}

/// How the coordinates were supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    SinglePoint,
    Table,
}

/// Everything the presentation layer needs from one run
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub mode: InputMode,
    pub date_range: DateRange,
    /// Input order is preserved
    pub rows: Vec<ResultRow>,
    /// Mean of all input coordinates; None for an empty table
    pub center: Option<Coordinate>,
    pub index_layer: Option<TileLayer>,
}

impl HealthReport {
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.rows.iter().map(|row| row.coordinate).collect()
    }
}

/// Acquire inputs, query the index provider, classify
/// One call is one complete pass; nothing is carried between runs
pub struct VegetationHealthWorkflow<P: IndexProvider> {
    provider: P,
    options: WorkflowOptions,
}

impl<P: IndexProvider> VegetationHealthWorkflow<P> {
    pub fn new(provider: P, options: WorkflowOptions) -> Self {
        VegetationHealthWorkflow { provider, options }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Single coordinate entered by the user
    pub fn run_point(&self, coordinate: Coordinate, date_range: DateRange) -> Result<HealthReport> {
        self.run_coordinates(&[coordinate], date_range, InputMode::SinglePoint)
    }

    /// Uploaded table; missing columns fail before any query is sent,
    /// unreadable cells only turn their own row into NO_DATA
    pub fn run_table<R: Read>(&self, reader: R, date_range: DateRange) -> Result<HealthReport> {
        let coordinates = read_coordinates(reader)?;
        self.run_coordinates(&coordinates, date_range, InputMode::Table)
    }

    pub fn run_coordinates(
        &self,
        coordinates: &[Coordinate],
        date_range: DateRange,
        mode: InputMode,
    ) -> Result<HealthReport> {
        tracing::info!(
            points = coordinates.len(),
            start = %date_range.start,
            end = %date_range.end,
            strategy = ?self.options.parameters.strategy,
            "computing mean NDVI"
        );

        let values = self.fetch_all(coordinates, &date_range)?;
        let rows: Vec<ResultRow> = coordinates
            .iter()
            .zip(values)
            .map(|(coordinate, ndvi)| {
                ResultRow::classified(*coordinate, ndvi, &self.options.thresholds)
            })
            .collect();

        let readable: Vec<Coordinate> = coordinates.iter().copied().filter(Coordinate::is_finite).collect();
        let index_layer = if self.options.index_layer && !readable.is_empty() {
            self.fetch_layer(&readable, &date_range)?
        } else {
            None
        };

        Ok(HealthReport {
            mode,
            date_range,
            rows,
            center: Coordinate::center_of(coordinates),
            index_layer,
        })
    }

    /// Remote or empty answers become None; only fatal errors abort the run
    fn fetch_one(&self, coordinate: &Coordinate, date_range: &DateRange) -> Result<Option<f64>> {
        if !coordinate.is_finite() {
            tracing::warn!(
                latitude = coordinate.latitude,
                longitude = coordinate.longitude,
                "unreadable coordinate, reporting NO_DATA"
            );
            return Ok(None);
        }
        let query = IndexQuery::new(*coordinate, *date_range, self.options.parameters);
        match self.provider.mean_index(&query) {
            Ok(value) => {
                let value = sanitize_index(value);
                if value.is_none() {
                    tracing::debug!(
                        latitude = coordinate.latitude,
                        longitude = coordinate.longitude,
                        "no imagery for coordinate"
                    );
                }
                Ok(value)
            }
            Err(err) if VegwatchError::is_fatal(&err) => Err(err),
            Err(err) => {
                tracing::warn!(
                    latitude = coordinate.latitude,
                    longitude = coordinate.longitude,
                    error = %format!("{:#}", err),
                    "index query failed, reporting NO_DATA"
                );
                Ok(None)
            }
        }
    }

    fn fetch_sequential(
        &self,
        coordinates: &[Coordinate],
        date_range: &DateRange,
        progress: &Progress,
    ) -> Result<Vec<Option<f64>>> {
        let mut values = Vec::with_capacity(coordinates.len());
        for coordinate in coordinates {
            values.push(self.fetch_one(coordinate, date_range)?);
            progress.inc();
        }
        Ok(values)
    }

    fn fetch_all(&self, coordinates: &[Coordinate], date_range: &DateRange) -> Result<Vec<Option<f64>>> {
        let progress = Progress::new(
            coordinates.len(),
            self.options.show_progress && coordinates.len() > 1,
        );

        #[cfg(feature = "rayon")]
        let values = if self.options.max_concurrency > 1 && coordinates.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.max_concurrency)
                .build()
                .context("Failed to build query thread pool")?;
            pool.install(|| {
                coordinates
                    .par_iter()
                    .map(|coordinate| {
                        let value = self.fetch_one(coordinate, date_range);
                        progress.inc();
                        value
                    })
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            self.fetch_sequential(coordinates, date_range, &progress)?
        };

        #[cfg(not(feature = "rayon"))]
        let values = self.fetch_sequential(coordinates, date_range, &progress)?;

        progress.finish();
        Ok(values)
    }

    fn fetch_layer(&self, coordinates: &[Coordinate], date_range: &DateRange) -> Result<Option<TileLayer>> {
        let query = LayerQuery {
            coordinates: coordinates.to_vec(),
            date_range: *date_range,
            parameters: self.options.parameters,
        };
        match self.provider.index_layer(&query) {
            Ok(layer) => Ok(layer),
            Err(err) if VegwatchError::is_fatal(&err) => Err(err),
            Err(err) => {
                tracing::warn!(error = %format!("{:#}", err), "index layer unavailable");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::vegetation_health::HealthLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Reply {
        Value(f64),
        Empty,
        Fail,
        AuthFail,
    }

    struct MockProvider {
        replies: Vec<(Coordinate, Reply)>,
        layer: Option<Reply>,
        calls: AtomicUsize,
        last_query: Mutex<Option<IndexQuery>>,
    }

    impl MockProvider {
        fn new(replies: Vec<(Coordinate, Reply)>) -> Self {
            MockProvider {
                replies,
                layer: None,
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
            }
        }
    }

    impl IndexProvider for MockProvider {
        fn mean_index(&self, query: &IndexQuery) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(*query);
            let reply = self
                .replies
                .iter()
                .find(|(c, _)| *c == query.coordinate)
                .map(|(_, r)| *r)
                .unwrap_or(Reply::Empty);
            match reply {
                Reply::Value(v) => Ok(Some(v)),
                Reply::Empty => Ok(None),
                Reply::Fail => anyhow::bail!("deadline exceeded"),
                Reply::AuthFail => Err(VegwatchError::Authentication("expired".into()).into()),
            }
        }

        fn index_layer(&self, _query: &LayerQuery) -> Result<Option<TileLayer>> {
            match self.layer {
                Some(Reply::Fail) => anyhow::bail!("no bands"),
                Some(_) => Ok(Some(TileLayer {
                    name: "NDVI".into(),
                    url_template: "https://tiles/{z}/{x}/{y}".into(),
                    attribution: "test".into(),
                })),
                None => Ok(None),
            }
        }
    }

    fn january() -> DateRange {
        DateRange::parse("2024-01-01", "2024-01-31").unwrap()
    }

    fn labels(report: &HealthReport) -> Vec<HealthLabel> {
        report.rows.iter().map(|r| r.status).collect()
    }

    #[test]
    fn test_table_labels_follow_input_order() {
        let provider = MockProvider::new(vec![
            (Coordinate::new(1.0, 1.0), Reply::Value(0.6)),
            (Coordinate::new(2.0, 2.0), Reply::Value(0.3)),
            (Coordinate::new(3.0, 3.0), Reply::Empty),
        ]);
        let workflow = VegetationHealthWorkflow::new(provider, WorkflowOptions::default());
        let csv = "latitude,longitude\n1.0,1.0\n2.0,2.0\n3.0,3.0\n";
        let report = workflow.run_table(csv.as_bytes(), january()).unwrap();

        assert_eq!(report.mode, InputMode::Table);
        assert_eq!(
            labels(&report),
            vec![HealthLabel::Healthy, HealthLabel::Moderate, HealthLabel::NoData]
        );
        assert_eq!(report.rows[0].ndvi, Some(0.6));
        assert_eq!(report.rows[2].ndvi, None);
        assert_eq!(report.center, Some(Coordinate::new(2.0, 2.0)));
    }

    #[test]
    fn test_unreadable_cells_become_no_data() {
        let provider = MockProvider::new(vec![
            (Coordinate::new(1.0, 1.0), Reply::Value(0.6)),
            (Coordinate::new(4.0, 4.0), Reply::Value(0.6)),
        ]);
        let options = WorkflowOptions {
            index_layer: true,
            ..WorkflowOptions::default()
        };
        let workflow = VegetationHealthWorkflow::new(provider, options);
        let csv = "latitude,longitude\n1.0,1.0\n,2.0\nabc,3.0\n4.0,4.0\n";
        let report = workflow.run_table(csv.as_bytes(), january()).unwrap();

        assert_eq!(
            labels(&report),
            vec![
                HealthLabel::Healthy,
                HealthLabel::NoData,
                HealthLabel::NoData,
                HealthLabel::Healthy
            ]
        );
        assert_eq!(report.rows[2].coordinate.longitude, 3.0);
        assert_eq!(workflow.provider().calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.center, Some(Coordinate::new(2.5, 2.5)));
    }

    #[test]
    fn test_single_point_healthy() {
        let point = Coordinate::new(22.5726, 88.3639);
        let provider = MockProvider::new(vec![(point, Reply::Value(0.55))]);
        let options = WorkflowOptions {
            thresholds: Thresholds::new(0.5, 0.2).unwrap(),
            ..WorkflowOptions::default()
        };
        let workflow = VegetationHealthWorkflow::new(provider, options);
        let report = workflow.run_point(point, january()).unwrap();

        assert_eq!(report.mode, InputMode::SinglePoint);
        assert_eq!(labels(&report), vec![HealthLabel::Healthy]);
        assert_eq!(report.center, Some(point));
    }

    #[test]
    fn test_missing_column_processes_nothing() {
        let provider = MockProvider::new(vec![]);
        let workflow = VegetationHealthWorkflow::new(provider, WorkflowOptions::default());
        let err = workflow
            .run_table("longitude\n88.0\n89.0\n".as_bytes(), january())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<VegwatchError>(),
            Some(VegwatchError::MissingColumns { .. })
        ));
        assert_eq!(workflow.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remote_failure_degrades_to_no_data() {
        let provider = MockProvider::new(vec![
            (Coordinate::new(1.0, 1.0), Reply::Fail),
            (Coordinate::new(2.0, 2.0), Reply::Value(0.1)),
        ]);
        let workflow = VegetationHealthWorkflow::new(provider, WorkflowOptions::default());
        let coords = [Coordinate::new(1.0, 1.0), Coordinate::new(2.0, 2.0)];
        let report = workflow
            .run_coordinates(&coords, january(), InputMode::Table)
            .unwrap();

        assert_eq!(
            labels(&report),
            vec![HealthLabel::NoData, HealthLabel::Unhealthy]
        );
        assert_eq!(workflow.provider().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_authentication_failure_is_fatal() {
        let provider = MockProvider::new(vec![(Coordinate::new(1.0, 1.0), Reply::AuthFail)]);
        let workflow = VegetationHealthWorkflow::new(provider, WorkflowOptions::default());
        let err = workflow
            .run_point(Coordinate::new(1.0, 1.0), january())
            .unwrap_err();
        assert!(VegwatchError::is_fatal(&err));
    }

    #[test]
    fn test_out_of_domain_values_are_clamped() {
        let provider = MockProvider::new(vec![(Coordinate::new(1.0, 1.0), Reply::Value(1.7))]);
        let workflow = VegetationHealthWorkflow::new(provider, WorkflowOptions::default());
        let report = workflow.run_point(Coordinate::new(1.0, 1.0), january()).unwrap();
        assert_eq!(report.rows[0].ndvi, Some(1.0));
    }

    #[test]
    fn test_query_carries_parameters() {
        let provider = MockProvider::new(vec![]);
        let options = WorkflowOptions {
            parameters: QueryParameters {
                buffer_radius_m: 50.0,
                scale_m: 20.0,
                ..QueryParameters::default()
            },
            ..WorkflowOptions::default()
        };
        let workflow = VegetationHealthWorkflow::new(provider, options);
        workflow.run_point(Coordinate::new(5.0, 6.0), january()).unwrap();

        let recorded = *workflow.provider().last_query.lock().unwrap();
        let query = recorded.unwrap();
        assert_eq!(query.parameters.buffer_radius_m, 50.0);
        assert_eq!(query.parameters.scale_m, 20.0);
        assert_eq!(query.parameters.cloud_cover_max, 10.0);
        assert_eq!(query.date_range, january());
    }

    #[test]
    fn test_index_layer_requested_and_optional() {
        let mut provider = MockProvider::new(vec![]);
        provider.layer = Some(Reply::Value(0.0));
        let options = WorkflowOptions {
            index_layer: true,
            ..WorkflowOptions::default()
        };
        let workflow = VegetationHealthWorkflow::new(provider, options.clone());
        let report = workflow.run_point(Coordinate::new(1.0, 1.0), january()).unwrap();
        assert!(report.index_layer.is_some());

        let mut failing = MockProvider::new(vec![]);
        failing.layer = Some(Reply::Fail);
        let workflow = VegetationHealthWorkflow::new(failing, options);
        let report = workflow.run_point(Coordinate::new(1.0, 1.0), january()).unwrap();
        assert!(report.index_layer.is_none());
        assert_eq!(labels(&report), vec![HealthLabel::NoData]);
    }

    #[test]
    fn test_empty_table() {
        let workflow = VegetationHealthWorkflow::new(MockProvider::new(vec![]), WorkflowOptions::default());
        let report = workflow
            .run_table("latitude,longitude\n".as_bytes(), january())
            .unwrap();
        assert!(report.rows.is_empty());
        assert!(report.center.is_none());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_bounded_fan_out_keeps_order() {
        let coords: Vec<Coordinate> = (0..40).map(|i| Coordinate::new(i as f64, 0.0)).collect();
        let replies = coords
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let reply = if i % 3 == 0 {
                    Reply::Empty
                } else {
                    Reply::Value(i as f64 / 40.0)
                };
                (*c, reply)
            })
            .collect();
        let options = WorkflowOptions {
            max_concurrency: 4,
            ..WorkflowOptions::default()
        };
        let workflow = VegetationHealthWorkflow::new(MockProvider::new(replies), options);
        let report = workflow
            .run_coordinates(&coords, january(), InputMode::Table)
            .unwrap();

        assert_eq!(report.coordinates(), coords);
        for (i, row) in report.rows.iter().enumerate() {
            let expected = if i % 3 == 0 { None } else { Some(i as f64 / 40.0) };
            assert_eq!(row.ndvi, expected);
        }
        assert_eq!(workflow.provider().calls.load(Ordering::SeqCst), 40);
    }
}
