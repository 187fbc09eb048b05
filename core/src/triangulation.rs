//! Noiseless triangulation of bearing pairs into a baseline trajectory.
//!
//! Each sensor `l_j` sees the object along the ray `l_j + c_j (cos a_j, sin a_j)`. Intersecting the
//! two rays gives the 2×2 system
//!
//! ```text
//! [cos a1  -cos a2] [c1]   [l2x - l1x]
//! [sin a1  -sin a2] [c2] = [l2y - l1y]
//! ```
//!
//! solved per row with a QR decomposition. The position is `l1 + c1 (cos a1, sin a1)`. Measurement
//! noise is ignored, so the result is only a rough center for the importance proposal.
use nalgebra::{DMatrix, Matrix2, Vector2};

use crate::errors::FilterError;

/// Below this |det| the bearing lines are treated as parallel.
const PARALLEL_TOLERANCE: f64 = 1e-12;

/// Intersect the bearing lines of one measurement pair.
pub fn intersect(bearing_1: f64, bearing_2: f64, sensor_1: &[f64; 2], sensor_2: &[f64; 2]) -> Option<[f64; 2]> {
    let (s1, c1) = bearing_1.sin_cos();
    let (s2, c2) = bearing_2.sin_cos();
    let directions = Matrix2::new(c1, -c2, s1, -s2);
    if directions.determinant().abs() < PARALLEL_TOLERANCE {
        return None;
    }
    let offset = Vector2::new(sensor_2[0] - sensor_1[0], sensor_2[1] - sensor_1[1]);
    let coefficients = directions.qr().solve(&offset)?;
    let range = coefficients[0];
    let position = [sensor_1[0] + range * c1, sensor_1[1] + range * s1];
    position.iter().all(|v| v.is_finite()).then_some(position)
}

/// Triangulate every row of a `T × 2` bearing matrix into a `T × 2` baseline of (x, y).
pub fn triangulate(
    measurements: &DMatrix<f64>,
    sensor_1: &[f64; 2],
    sensor_2: &[f64; 2],
) -> Result<DMatrix<f64>, FilterError> {
    if measurements.nrows() == 0 {
        return Err(FilterError::EmptyMeasurements);
    }
    if measurements.ncols() != 2 {
        return Err(FilterError::dimension(2, measurements.ncols(), "measurement columns"));
    }
    let mut baseline = DMatrix::<f64>::zeros(measurements.nrows(), 2);
    for (step, row) in measurements.row_iter().enumerate() {
        let [x, y] = intersect(row[0], row[1], sensor_1, sensor_2)
            .ok_or(FilterError::SingularGeometry { step })?;
        baseline[(step, 0)] = x;
        baseline[(step, 1)] = y;
    }
    Ok(baseline)
}
