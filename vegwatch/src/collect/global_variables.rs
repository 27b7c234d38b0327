pub const OUTPUT_PATH: &str = "./output";

/// Earth Engine REST endpoint (v1)
pub const EE_API_BASE: &str = "https://earthengine.googleapis.com/v1/";
/// OAuth2 token endpoint used for the service-account JWT bearer grant
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const EE_SCOPE: &str = "https://www.googleapis.com/auth/earthengine";
/// Project used when none is configured; accepts legacy (non-Cloud) service accounts
pub const EE_DEFAULT_PROJECT: &str = "earthengine-legacy";

/// Sentinel-2 surface reflectance catalog
pub const SENTINEL2_SR: &str = "COPERNICUS/S2_SR";
pub const SENTINEL2_NIR: &str = "B8";
pub const SENTINEL2_RED: &str = "B4";
pub const SENTINEL2_CLOUD_PROPERTY: &str = "CLOUDY_PIXEL_PERCENTAGE";

/// Name of the band holding the computed index
pub const NDVI_BAND: &str = "NDVI";
/// Diverging ramp for the index layer, low to high
pub const NDVI_PALETTE: [&str; 3] = ["0000ff", "ffffff", "008000"];

pub const RESULTS_CSV: &str = "ndvi_results.csv";
pub const DASHBOARD_HTML: &str = "dashboard.html";

