//! Optimal-Transport Balancing Solver
//!
//! Sinkhorn-Knopp balancing of an `N x K` softmax-probability matrix toward
//! uniform marginals (rows `1/N`, columns `1/K`): probabilities are sharpened
//! with an exponent `lambda`, then rows and columns are alternately
//! normalized until the maximum marginal residual drops below a tolerance or
//! the iteration cap is hit. The pseudo-label of each example is the argmax
//! of its balanced row, so cluster sizes come out approximately uniform.
//!
//! Two entry points exist: a tensor variant running on the compute device
//! and a host variant looping over `f64` (or `f32` in reduced-resource
//! mode). Which one a run uses is decided once at startup from the device
//! capability.

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};
use tracing::debug;

use crate::model::config::{Precision, TrainConfig};
use crate::utils::error::{Result, SelfLabelError};

/// Floor applied to sharpened probabilities and marginal sums
const EPS: f64 = 1e-30;

/// Solver parameters, assembled once from the run configuration
#[derive(Debug, Clone)]
pub struct SinkhornConfig {
    /// Sharpening exponent applied to the probabilities
    pub lambda: f64,
    /// Maximum number of row+column normalization iterations
    pub max_iterations: usize,
    /// Stop once the largest row-marginal deviation falls below this
    pub tolerance: f64,
    /// Numeric precision of the host variant
    pub precision: Precision,
}

impl Default for SinkhornConfig {
    fn default() -> Self {
        Self {
            lambda: 25.0,
            max_iterations: 100,
            tolerance: 1e-3,
            precision: Precision::Full,
        }
    }
}

impl SinkhornConfig {
    /// Extract the solver parameters from a run configuration
    pub fn from_train(config: &TrainConfig) -> Self {
        Self {
            lambda: config.lambda,
            max_iterations: config.sk_iterations,
            tolerance: config.sk_tolerance,
            precision: config.sk_precision,
        }
    }
}

/// Outcome of a balancing run
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceReport {
    /// Whether the tolerance was met within the iteration cap
    pub converged: bool,
    /// Iterations performed
    pub iterations: usize,
    /// Final maximum row-marginal deviation
    pub residual: f64,
}

/// A balancing solver turning one head's probability matrix into labels.
///
/// Implementations must either return a complete label vector or an error;
/// a partial assignment is never produced.
pub trait AssignmentSolver<B: Backend>: Send {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Balance an `[N, K]` probability matrix and return one cluster id per
    /// example.
    fn balance(&self, probabilities: Tensor<B, 2>, config: &SinkhornConfig) -> Result<Vec<i64>>;
}

/// Tensor-based solver running the iterations on the compute device
#[derive(Debug, Clone, Default)]
pub struct DeviceSinkhorn;

impl<B: Backend> AssignmentSolver<B> for DeviceSinkhorn {
    fn name(&self) -> &'static str {
        "sinkhorn-device"
    }

    fn balance(&self, probabilities: Tensor<B, 2>, config: &SinkhornConfig) -> Result<Vec<i64>> {
        let [n, k] = probabilities.dims();
        if n == 0 || k == 0 {
            return Err(SelfLabelError::Solver(
                "empty probability matrix".to_string(),
            ));
        }

        let mut q = probabilities.powf_scalar(config.lambda).clamp_min(EPS);
        let mut report = ConvergenceReport {
            converged: false,
            iterations: 0,
            residual: f64::INFINITY,
        };

        for iter in 0..config.max_iterations {
            let row_sums = q.clone().sum_dim(1).clamp_min(EPS);
            q = q.div(row_sums).mul_scalar(1.0 / n as f64);

            let col_sums = q.clone().sum_dim(0).clamp_min(EPS);
            q = q.div(col_sums).mul_scalar(1.0 / k as f64);

            let residual: f64 = q
                .clone()
                .sum_dim(1)
                .mul_scalar(n as f64)
                .sub_scalar(1.0)
                .abs()
                .max()
                .into_scalar()
                .elem();

            report.iterations = iter + 1;
            report.residual = residual;
            if residual < config.tolerance {
                report.converged = true;
                break;
            }
        }

        debug!(
            "{}: {} iterations, residual {:.2e}, converged: {}",
            <Self as AssignmentSolver<B>>::name(self),
            report.iterations,
            report.residual,
            report.converged
        );

        let labels: Tensor<B, 1, Int> = q.argmax(1).reshape([n]);
        labels
            .into_data()
            .to_vec::<i64>()
            .map_err(|e| SelfLabelError::Solver(format!("failed to read labels: {:?}", e)))
    }
}

/// Host solver looping over the matrix in the configured precision
#[derive(Debug, Clone, Default)]
pub struct HostSinkhorn;

impl<B: Backend> AssignmentSolver<B> for HostSinkhorn {
    fn name(&self) -> &'static str {
        "sinkhorn-host"
    }

    fn balance(&self, probabilities: Tensor<B, 2>, config: &SinkhornConfig) -> Result<Vec<i64>> {
        let [n, k] = probabilities.dims();
        if n == 0 || k == 0 {
            return Err(SelfLabelError::Solver(
                "empty probability matrix".to_string(),
            ));
        }

        let raw: Vec<f32> = probabilities
            .into_data()
            .to_vec()
            .map_err(|e| SelfLabelError::Solver(format!("failed to read probabilities: {:?}", e)))?;

        let (labels, report) = match config.precision {
            Precision::Full => balance_f64(&raw, n, k, config),
            Precision::Reduced => balance_f32(&raw, n, k, config),
        };

        debug!(
            "{}: {} iterations, residual {:.2e}, converged: {}",
            <Self as AssignmentSolver<B>>::name(self),
            report.iterations,
            report.residual,
            report.converged
        );

        Ok(labels)
    }
}

fn balance_f64(
    probs: &[f32],
    n: usize,
    k: usize,
    config: &SinkhornConfig,
) -> (Vec<i64>, ConvergenceReport) {
    let mut q: Vec<f64> = probs
        .iter()
        .map(|&p| (p as f64).powf(config.lambda).max(EPS))
        .collect();
    let mut report = ConvergenceReport {
        converged: false,
        iterations: 0,
        residual: f64::INFINITY,
    };

    for iter in 0..config.max_iterations {
        for row in q.chunks_mut(k) {
            let s: f64 = row.iter().sum();
            let inv = 1.0 / (s.max(EPS) * n as f64);
            for v in row.iter_mut() {
                *v *= inv;
            }
        }

        for j in 0..k {
            let mut s = 0.0f64;
            for i in 0..n {
                s += q[i * k + j];
            }
            let inv = 1.0 / (s.max(EPS) * k as f64);
            for i in 0..n {
                q[i * k + j] *= inv;
            }
        }

        let mut residual = 0.0f64;
        for row in q.chunks(k) {
            let s: f64 = row.iter().sum();
            residual = residual.max((s * n as f64 - 1.0).abs());
        }

        report.iterations = iter + 1;
        report.residual = residual;
        if residual < config.tolerance {
            report.converged = true;
            break;
        }
    }

    (argmax_rows(&q, k), report)
}

fn balance_f32(
    probs: &[f32],
    n: usize,
    k: usize,
    config: &SinkhornConfig,
) -> (Vec<i64>, ConvergenceReport) {
    let eps = EPS as f32;
    let mut q: Vec<f32> = probs
        .iter()
        .map(|&p| p.powf(config.lambda as f32).max(eps))
        .collect();
    let mut report = ConvergenceReport {
        converged: false,
        iterations: 0,
        residual: f64::INFINITY,
    };

    for iter in 0..config.max_iterations {
        for row in q.chunks_mut(k) {
            let s: f32 = row.iter().sum();
            let inv = 1.0 / (s.max(eps) * n as f32);
            for v in row.iter_mut() {
                *v *= inv;
            }
        }

        for j in 0..k {
            let mut s = 0.0f32;
            for i in 0..n {
                s += q[i * k + j];
            }
            let inv = 1.0 / (s.max(eps) * k as f32);
            for i in 0..n {
                q[i * k + j] *= inv;
            }
        }

        let mut residual = 0.0f32;
        for row in q.chunks(k) {
            let s: f32 = row.iter().sum();
            residual = residual.max((s * n as f32 - 1.0).abs());
        }

        report.iterations = iter + 1;
        report.residual = residual as f64;
        if (residual as f64) < config.tolerance {
            report.converged = true;
            break;
        }
    }

    (argmax_rows(&q, k), report)
}

fn argmax_rows<T: PartialOrd + Copy>(q: &[T], k: usize) -> Vec<i64> {
    q.chunks(k)
        .map(|row| {
            let mut best = 0usize;
            for (j, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = j;
                }
            }
            best as i64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn probs_tensor(data: Vec<f32>, n: usize, k: usize) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::new(data, [n, k]), &Default::default())
    }

    /// A peaked, perfectly balanced matrix: example i prefers cluster i % k.
    fn peaked_probs(n: usize, k: usize) -> Vec<f32> {
        let mut data = vec![0.1 / (k as f32 - 1.0); n * k];
        for i in 0..n {
            data[i * k + i % k] = 0.9;
        }
        data
    }

    fn assert_roughly_balanced(labels: &[i64], n: usize, k: usize) {
        let mut counts = vec![0usize; k];
        for &l in labels {
            assert!((0..k as i64).contains(&l));
            counts[l as usize] += 1;
        }
        let target = n / k;
        for (cluster, &count) in counts.iter().enumerate() {
            assert!(
                count >= target / 3 && count <= target * 3,
                "cluster {} holds {} of {} examples (target {})",
                cluster,
                count,
                n,
                target
            );
        }
    }

    #[test]
    fn test_device_solver_preserves_balanced_peaks() {
        let (n, k) = (30, 3);
        let labels = <DeviceSinkhorn as AssignmentSolver<TestBackend>>::balance(
            &DeviceSinkhorn,
            probs_tensor(peaked_probs(n, k), n, k),
            &SinkhornConfig::default(),
        )
        .unwrap();

        let expected: Vec<i64> = (0..n).map(|i| (i % k) as i64).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_host_solver_preserves_balanced_peaks() {
        let (n, k) = (30, 3);
        for precision in [Precision::Full, Precision::Reduced] {
            let config = SinkhornConfig {
                precision,
                ..Default::default()
            };
            let labels = <HostSinkhorn as AssignmentSolver<TestBackend>>::balance(
                &HostSinkhorn,
                probs_tensor(peaked_probs(n, k), n, k),
                &config,
            )
            .unwrap();

            let expected: Vec<i64> = (0..n).map(|i| (i % k) as i64).collect();
            assert_eq!(labels, expected);
        }
    }

    #[test]
    fn test_solvers_balance_random_matrices() {
        let (n, k) = (120, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut data = vec![0.0f32; n * k];
        for row in data.chunks_mut(k) {
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                *v = rng.gen_range(0.01f32..1.0);
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        }

        let config = SinkhornConfig::default();
        let device_labels = <DeviceSinkhorn as AssignmentSolver<TestBackend>>::balance(
            &DeviceSinkhorn,
            probs_tensor(data.clone(), n, k),
            &config,
        )
        .unwrap();
        let host_labels = <HostSinkhorn as AssignmentSolver<TestBackend>>::balance(
            &HostSinkhorn,
            probs_tensor(data, n, k),
            &config,
        )
        .unwrap();

        assert_eq!(device_labels.len(), n);
        assert_eq!(host_labels.len(), n);
        assert_roughly_balanced(&device_labels, n, k);
        assert_roughly_balanced(&host_labels, n, k);
    }

    #[test]
    fn test_argmax_rows_ties_pick_first() {
        let q = vec![0.5f64, 0.5, 0.2, 0.1, 0.9, 0.0];
        assert_eq!(argmax_rows(&q, 3), vec![0, 1]);
    }
}
