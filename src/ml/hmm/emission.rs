use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::error::{HmmError, Result};

/// Multivariate Gaussian emission with full covariance.
///
/// The Cholesky factor and log-determinant are computed once at
/// construction, so evaluating a density is a single triangular solve.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianEmission {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    /// Lower-triangular L with L Lᵀ = Σ
    chol: Array2<f64>,
    log_det: f64,
}

impl GaussianEmission {
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let d = mean.len();
        if d == 0 {
            return Err(HmmError::InvalidParameters(
                "emission mean has no features".to_string(),
            ));
        }
        if covariance.shape() != [d, d] {
            return Err(HmmError::InvalidParameters(format!(
                "covariance shape {:?} does not match mean dimension {}",
                covariance.shape(),
                d
            )));
        }
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(HmmError::InvalidParameters(
                "emission contains non-finite values".to_string(),
            ));
        }
        let chol = cholesky(&covariance).ok_or_else(|| {
            HmmError::InvalidParameters("covariance is not positive definite".to_string())
        })?;
        let log_det = 2.0 * chol.diag().iter().map(|v| v.ln()).sum::<f64>();

        Ok(Self {
            mean,
            covariance,
            chol,
            log_det,
        })
    }

    /// Spherical Gaussian with the same variance on every feature
    pub fn isotropic(mean: Array1<f64>, variance: f64) -> Result<Self> {
        let d = mean.len();
        Self::new(mean, Array2::eye(d) * variance)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Log density at `x`. Non-finite input has zero density.
    pub fn log_density(&self, x: ArrayView1<f64>) -> f64 {
        if x.iter().any(|v| !v.is_finite()) {
            return f64::NEG_INFINITY;
        }
        let d = self.dim();

        // Solve L z = (x - μ); then (x-μ)ᵀ Σ⁻¹ (x-μ) = |z|²
        let mut z = vec![0.0; d];
        for i in 0..d {
            let mut acc = x[i] - self.mean[i];
            for k in 0..i {
                acc -= self.chol[[i, k]] * z[k];
            }
            z[i] = acc / self.chol[[i, i]];
        }
        let mahal: f64 = z.iter().map(|v| v * v).sum();

        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + mahal)
    }

    /// Draw one observation: μ + L ε with ε ~ N(0, I)
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let d = self.dim();
        let eps: Vec<f64> = (0..d).map(|_| rng.sample(StandardNormal)).collect();
        let mut x = self.mean.clone();
        for i in 0..d {
            for k in 0..=i {
                x[i] += self.chol[[i, k]] * eps[k];
            }
        }
        x
    }
}

/// Cholesky decomposition; None if the matrix is not symmetric positive definite
pub(crate) fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            if (a[[i, j]] - a[[j, i]]).abs() > 1e-8 * (1.0 + a[[i, j]].abs()) {
                return None;
            }
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_standard_normal_density_at_mean() {
        let g = GaussianEmission::isotropic(array![0.0], 1.0).unwrap();
        let expected = -0.5 * (2.0 * PI).ln();
        assert!((g.log_density(array![0.0].view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_full_covariance_matches_closed_form() {
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let g = GaussianEmission::new(array![1.0, -1.0], cov).unwrap();
        let x = array![2.0, 0.0];

        // det = 1.75, inverse = [[1, -0.5], [-0.5, 2]] / 1.75
        let diff = [1.0, 1.0];
        let mahal = (diff[0] * diff[0] * 1.0 - 2.0 * 0.5 * diff[0] * diff[1]
            + 2.0 * diff[1] * diff[1])
            / 1.75;
        let expected = -0.5 * (2.0 * (2.0 * PI).ln() + 1.75f64.ln() + mahal);
        assert!((g.log_density(x.view()) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_rejects_singular_covariance() {
        let err = GaussianEmission::new(array![0.0, 0.0], array![[1.0, 1.0], [1.0, 1.0]]);
        assert!(matches!(err, Err(HmmError::InvalidParameters(_))));
    }

    #[test]
    fn test_non_finite_observation_has_zero_density() {
        let g = GaussianEmission::isotropic(array![0.0, 0.0], 1.0).unwrap();
        assert_eq!(g.log_density(array![f64::INFINITY, 0.0].view()), f64::NEG_INFINITY);
    }

    #[test]
    fn test_sample_mean_is_close() {
        let g = GaussianEmission::isotropic(array![5.0, -3.0], 0.25).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 4000;
        let mut sum = array![0.0, 0.0];
        for _ in 0..n {
            sum = sum + g.sample(&mut rng);
        }
        let mean = sum / n as f64;
        assert!((mean[0] - 5.0).abs() < 0.05);
        assert!((mean[1] + 3.0).abs() < 0.05);
    }
}
