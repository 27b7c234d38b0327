use anyhow::Result;

use crate::geometric::index_query::{IndexQuery, LayerQuery, TileLayer};

/// Source of vegetation index values
/// Implementations only fetch data; classification and rendering happen elsewhere
pub trait IndexProvider: Send + Sync {
    /// Mean NDVI around the query point, or None when no imagery matched
    fn mean_index(&self, query: &IndexQuery) -> Result<Option<f64>>;

    /// Map-tile layer of the composite index image, when the provider can serve one
    fn index_layer(&self, _query: &LayerQuery) -> Result<Option<TileLayer>> {
        Ok(None)
    }
}

impl<P: IndexProvider + ?Sized> IndexProvider for Box<P> {
    fn mean_index(&self, query: &IndexQuery) -> Result<Option<f64>> {
        (**self).mean_index(query)
    }

    fn index_layer(&self, query: &LayerQuery) -> Result<Option<TileLayer>> {
        (**self).index_layer(query)
    }
}

/// Keep a returned index inside [-1, 1]; NaN or infinite values count as missing
pub fn sanitize_index(value: Option<f64>) -> Option<f64> {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_index() {
        assert_eq!(sanitize_index(Some(0.42)), Some(0.42));
        assert_eq!(sanitize_index(Some(1.2)), Some(1.0));
        assert_eq!(sanitize_index(Some(-3.0)), Some(-1.0));
        assert_eq!(sanitize_index(Some(f64::NAN)), None);
        assert_eq!(sanitize_index(None), None);
    }
}
