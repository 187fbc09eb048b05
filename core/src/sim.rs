//! Data input/output and synthetic scenarios.
//!
//! Measurement series are plain text: one row per time step, values separated by whitespace or
//! commas, `#` starting a comment. Output matrices are written as headerless CSV with full `f64`
//! precision so they can be read back with [`read_matrix`].
use std::error::Error;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::model::{ModelConfig, ProcessMeanMode, measurement_mean};

fn invalid_data(message: String) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, message))
}

/// Line content before any `#` comment, trimmed.
fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

fn parse_record(record: &StringRecord, line: u64) -> Result<Vec<f64>, Box<dyn Error>> {
    record
        .iter()
        .enumerate()
        .map(|(i, field)| {
            if field.is_empty() {
                return Err(invalid_data(format!("line {line}: field {} is empty", i + 1)));
            }
            field
                .parse::<f64>()
                .map_err(|e| invalid_data(format!("line {line}: field {}: {e}", i + 1)))
        })
        .collect()
}

/// Read a numeric matrix from a delimited text file.
///
/// The delimiter is a comma if the first data line contains one, otherwise runs of whitespace.
/// Blank lines and `#` comments are skipped. A first line made only of non-numeric fields is
/// treated as a header. Every row must have the same number of columns and no field may be empty.
///
/// # Arguments
/// * `path` - file to read
///
/// # Returns
/// The matrix, one row per data line.
pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<DMatrix<f64>, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let comma_separated = text
        .lines()
        .map(strip_comment)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.contains(','));
    // One output line per input line keeps record positions equal to file line numbers.
    let normalized = text
        .lines()
        .map(|line| {
            let content = strip_comment(line);
            if comma_separated {
                content.to_string()
            } else {
                content.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(if comma_separated { b',' } else { b' ' })
        .trim(Trim::All)
        .flexible(true)
        .from_reader(normalized.as_bytes());

    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut first_record = true;
    for result in reader.records() {
        let record = result?;
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line());
        if first_record {
            first_record = false;
            if record.iter().all(|f| !f.is_empty() && f.parse::<f64>().is_err()) {
                continue;
            }
        }
        let row = parse_record(&record, line)?;
        if let Some(first) = rows.first()
            && first.len() != row.len()
        {
            return Err(invalid_data(format!(
                "line {line}: expected {} columns, found {}",
                first.len(),
                row.len()
            )));
        }
        rows.push(row);
    }
    let ncols = rows.first().map_or(0, Vec::len);
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

/// Read a bearing series: exactly two columns (radians), one row per step.
pub fn read_measurements<P: AsRef<Path>>(path: P) -> Result<DMatrix<f64>, Box<dyn Error>> {
    let matrix = read_matrix(path)?;
    if matrix.nrows() > 0 && matrix.ncols() != 2 {
        return Err(invalid_data(format!(
            "measurement file must have 2 columns, found {}",
            matrix.ncols()
        )));
    }
    Ok(matrix)
}

/// Write a matrix as headerless CSV.
pub fn write_matrix_csv<P: AsRef<Path>>(matrix: &DMatrix<f64>, path: P) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for row in matrix.row_iter() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a vector as a single CSV column.
pub fn write_vector_csv<P: AsRef<Path>>(vector: &DVector<f64>, path: P) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    for v in vector.iter() {
        writer.write_record([v.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Root mean square position error of a posterior mean against the truth.
///
/// `posterior_mean` is `(T + 1) × n` with the prior row first; `truth` is `T × (≥2)`.
pub fn position_rms_error(posterior_mean: &DMatrix<f64>, truth: &DMatrix<f64>) -> f64 {
    let steps = truth.nrows().min(posterior_mean.nrows().saturating_sub(1));
    if steps == 0 {
        return 0.0;
    }
    let sum: f64 = (0..steps)
        .map(|t| {
            let dx = posterior_mean[(t + 1, 0)] - truth[(t, 0)];
            let dy = posterior_mean[(t + 1, 1)] - truth[(t, 1)];
            dx * dx + dy * dy
        })
        .sum();
    (sum / steps as f64).sqrt()
}

/// An object moving in a straight line at constant velocity, observed by two bearing sensors.
#[derive(Clone, Debug, PartialEq)]
pub struct StraightLineScenario {
    pub sensor_1: [f64; 2],
    pub sensor_2: [f64; 2],
    /// Position at step 0, before the first measurement
    pub start: [f64; 2],
    pub velocity: [f64; 2],
    pub dt: f64,
    pub steps: usize,
    pub measurement_std: f64,
    pub seed: u64,
}

impl Default for StraightLineScenario {
    fn default() -> Self {
        StraightLineScenario {
            sensor_1: [0.0, 0.0],
            sensor_2: [100.0, 0.0],
            start: [49.5, 50.0],
            velocity: [0.1, 0.0],
            dt: 1.0,
            steps: 10,
            measurement_std: 0.01,
            seed: 42,
        }
    }
}

impl StraightLineScenario {
    /// True states `(x, y, vx, vy)` at steps `1..=T`, one row per measurement.
    pub fn truth(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.steps, 4, |t, j| {
            let elapsed = self.dt * (t + 1) as f64;
            match j {
                0 => self.start[0] + self.velocity[0] * elapsed,
                1 => self.start[1] + self.velocity[1] * elapsed,
                2 => self.velocity[0],
                _ => self.velocity[1],
            }
        })
    }

    /// Noise-free bearings from both sensors to the true positions.
    pub fn exact_bearings(&self) -> DMatrix<f64> {
        let truth = self.truth();
        let mut bearings = DMatrix::<f64>::zeros(self.steps, 2);
        for t in 0..self.steps {
            let state = truth.row(t).transpose();
            let mean = measurement_mean(&self.sensor_1, &self.sensor_2, &state);
            bearings.set_row(t, &mean.transpose());
        }
        bearings
    }

    /// Exact bearings plus independent `N(0, σ²)` noise, reproducible from `seed`.
    pub fn noisy_bearings(&self) -> DMatrix<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let std = self.measurement_std;
        self.exact_bearings().map(|b| {
            let z: f64 = rng.sample(StandardNormal);
            b + std * z
        })
    }

    /// A model configuration suited to tracking this scenario.
    ///
    /// The prior is centered on the start position with unit-scale spread, the process diffusion
    /// is loose and the importance proposal is tight in position around the baseline.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            sensor_1: self.sensor_1,
            sensor_2: self.sensor_2,
            dt: self.dt,
            measurement_std: self.measurement_std,
            diffusion: [1000.0, 1000.0],
            prior_mean: self.start,
            prior_covariance: vec![4.0, 4.0, 4.0, 4.0],
            importance_covariance: vec![0.5, 0.5, 250.0, 250.0],
            process_mean: ProcessMeanMode::AnchoredBaseline,
        }
    }
}
