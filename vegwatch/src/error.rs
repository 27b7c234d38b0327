/// Domain errors callers are expected to match on
/// Everything else travels as `anyhow::Error` with context attached
#[derive(Debug, thiserror::Error)]
pub enum VegwatchError {
    /// Uploaded table lacks one or more required columns; nothing was processed
    #[error("Missing required column(s): {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("Invalid classification thresholds: healthy={healthy}, moderate={moderate} (need finite values with healthy >= moderate)")]
    InvalidThresholds { healthy: f64, moderate: f64 },

    /// Fatal for the session, never retried
    #[error("Earth Engine authentication failed: {0}")]
    Authentication(String),

    #[error("No Earth Engine credentials: {0}")]
    MissingCredentials(String),
}

impl VegwatchError {
    /// True when the error must abort the whole run instead of degrading one coordinate to NO_DATA
    pub fn is_fatal(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<VegwatchError>(),
            Some(VegwatchError::Authentication(_)) | Some(VegwatchError::MissingCredentials(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message() {
        let err = VegwatchError::MissingColumns {
            missing: vec!["latitude".to_string(), "longitude".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required column(s): latitude, longitude"
        );
    }

    #[test]
    fn test_is_fatal() {
        let auth = anyhow::Error::new(VegwatchError::Authentication("bad key".into()));
        assert!(VegwatchError::is_fatal(&auth));
        let other = anyhow::anyhow!("connection reset");
        assert!(!VegwatchError::is_fatal(&other));
        let wrapped = anyhow::Error::new(VegwatchError::Authentication("x".into()))
            .context("while querying");
        assert!(VegwatchError::is_fatal(&wrapped));
    }
}
