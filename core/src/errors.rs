//! Error types for model construction and filter runs
//!
//! Everything in here is fatal to a run and is raised before the recursion starts. Numerical
//! edge cases inside the weight update are not errors; see [`crate::numerics`].

use std::fmt;

/// Errors that can occur while building the model or starting a filter run
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Invalid scalar configuration (particle count, threshold, non-finite values, ...)
    Configuration {
        /// Description of the configuration issue
        description: String,
    },

    /// Dimension mismatch between expected and actual
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "measurement columns", "baseline rows")
        context: String,
    },

    /// Cholesky decomposition failed
    NotPositiveDefinite {
        /// Which covariance failed
        context: String,
    },

    /// The measurement series has no rows
    EmptyMeasurements,

    /// Bearing lines are parallel and the triangulation system is singular
    SingularGeometry {
        /// Zero-based measurement row
        step: usize,
    },
}

impl FilterError {
    pub(crate) fn configuration(description: impl Into<String>) -> Self {
        FilterError::Configuration {
            description: description.into(),
        }
    }

    pub(crate) fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        FilterError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
            FilterError::DimensionMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Dimension mismatch for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            FilterError::NotPositiveDefinite { context } => {
                write!(f, "Covariance is not positive definite: {}", context)
            }
            FilterError::EmptyMeasurements => write!(f, "Measurement series is empty"),
            FilterError::SingularGeometry { step } => {
                write!(f, "Bearings are parallel at measurement row {}", step)
            }
        }
    }
}

impl std::error::Error for FilterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_display() {
        let err = FilterError::NotPositiveDefinite {
            context: "importance covariance".to_string(),
        };
        assert!(err.to_string().contains("importance covariance"));

        let err = FilterError::dimension(2, 3, "measurement columns");
        assert!(err.to_string().contains("2"));
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("measurement columns"));
    }

    #[test]
    fn test_singular_geometry_reports_row() {
        let err = FilterError::SingularGeometry { step: 17 };
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn test_boxed_error() {
        let boxed: Box<dyn std::error::Error> = Box::new(FilterError::EmptyMeasurements);
        assert_eq!(boxed.to_string(), "Measurement series is empty");
    }
}
