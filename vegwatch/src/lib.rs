pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod render;
pub mod workflow;

pub use collect::earth_engine::auth::{load_credentials, Credentials};
pub use collect::earth_engine::ee_collect::EarthEngineCollect;
pub use collect::provider::IndexProvider;
pub use config::{load_config, VegwatchConfig};
pub use error::VegwatchError;
pub use geo_core::{Coordinate, DateRange};
pub use geometric::index_query::{CompositeStrategy, IndexQuery, QueryParameters};
pub use geometric::vegetation_health::{HealthLabel, ResultRow, ThresholdPreset, Thresholds};
pub use workflow::{HealthReport, InputMode, VegetationHealthWorkflow, WorkflowOptions};
