use chrono::NaiveDate;
use geo::{BoundingRect, Centroid, MultiPoint, Point};
use serde::{Deserialize, Serialize};

/// Date format used for every date exchanged with the user and the remote catalog
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A WGS84 position in decimal degrees
/// Values are not range-checked: whatever the user entered is forwarded to the remote service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate {
            latitude,
            longitude,
        }
    }

    /// Convert to a `geo::Point` (x = longitude, y = latitude)
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Remote geometry constructors expect `[lon, lat]`
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    /// False when a table cell could not be read as a number
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Mean position of a set of coordinates, used to center the map
    /// Unreadable coordinates are skipped; returns None when nothing is left
    pub fn center_of(coordinates: &[Coordinate]) -> Option<Coordinate> {
        let points: MultiPoint<f64> = coordinates
            .iter()
            .filter(|c| c.is_finite())
            .map(Coordinate::to_point)
            .collect();
        points
            .centroid()
            .map(|centroid| Coordinate::new(centroid.y(), centroid.x()))
    }
}

impl From<Point<f64>> for Coordinate {
    fn from(point: Point<f64>) -> Self {
        Coordinate::new(point.y(), point.x())
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box enclosing all readable coordinates
    pub fn enclosing(coordinates: &[Coordinate]) -> Option<Self> {
        let points: MultiPoint<f64> = coordinates
            .iter()
            .filter(|c| c.is_finite())
            .map(Coordinate::to_point)
            .collect();
        points.bounding_rect().map(|rect| {
            BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
        })
    }

    /// Leaflet bounds order: `[[south, west], [north, east]]`
    pub fn to_leaflet_bounds(&self) -> [[f64; 2]; 2] {
        [[self.min_y, self.min_x], [self.max_y, self.max_x]]
    }
}

/// Imagery search window: the start date is included, the end date is excluded
/// `end >= start` is expected but not enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            tracing::warn!(%start, %end, "date range ends before it starts; the catalog will likely return no imagery");
        }
        DateRange { start, end }
    }

    /// Parse two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let start = NaiveDate::parse_from_str(start.trim(), DATE_FORMAT)
            .with_context(|| format!("Invalid start date: {}", start))?;
        let end = NaiveDate::parse_from_str(end.trim(), DATE_FORMAT)
            .with_context(|| format!("Invalid end date: {}", end))?;
        Ok(DateRange::new(start, end))
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    pub fn is_reversed(&self) -> bool {
        self.end < self.start
    }
}
