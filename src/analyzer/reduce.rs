//! Principal component reduction
//!
//! Treats each frame of a [`FeatureMatrix`] as an observation, centres the
//! coefficients, and projects onto the top eigenvectors of their covariance.
//! The eigen-decomposition is a cyclic Jacobi sweep, which is exact enough
//! for the at-most-20-dimensional covariance matrices seen here.
//!
//! Component signs are fixed so the largest-magnitude loading of every
//! component is positive. Without that, two near-identical clips could land
//! on mirrored axes and score as anti-correlated.

use super::features::FeatureMatrix;
use tracing::debug;

const MAX_SWEEPS: usize = 64;

/// Components with variance at or below this fraction of the data's total
/// energy (squared mean plus trace) project to exactly zero. Constant input
/// leaves rounding residue of about 1e-24 relative after centring.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Frames projected onto principal components, `n_frames x n_components`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedVector {
    n_components: usize,
    rows: Vec<Vec<f64>>,
}

impl ReducedVector {
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn n_frames(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Row-major flattening (frame 0's components, then frame 1's, ...).
    pub fn flatten(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }
}

/// Project `matrix` onto its top `n_components` principal components.
///
/// The component count is clipped to `min(n_components, frames,
/// coefficients)`, so short clips degrade to fewer components instead of
/// failing. An empty matrix gives an empty vector.
pub fn reduce(matrix: &FeatureMatrix, n_components: usize) -> ReducedVector {
    let n = matrix.n_frames();
    let d = matrix.n_coefficients();
    let k = n_components.min(n).min(d);

    if k < n_components {
        debug!(
            "PCA clipped to {} component(s) ({} frames x {} coefficients)",
            k, n, d
        );
    }

    if n == 0 {
        return ReducedVector {
            n_components: k,
            rows: Vec::new(),
        };
    }

    let mut mean = vec![0.0; d];
    for frame in matrix.frames() {
        for (m, &v) in mean.iter_mut().zip(frame) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);

    let centered: Vec<Vec<f64>> = matrix
        .frames()
        .iter()
        .map(|frame| frame.iter().zip(&mean).map(|(v, m)| v - m).collect())
        .collect();

    let cov = covariance(&centered, d);
    let trace: f64 = (0..d).map(|i| cov[i][i]).sum();
    let energy = mean.iter().map(|m| m * m).sum::<f64>() + trace;
    let floor = VARIANCE_FLOOR * energy;

    let components = principal_axes(&cov, k);
    let flat = components.iter().filter(|(variance, _)| *variance <= floor).count();
    if flat > 0 {
        debug!("{} of {} component(s) carry no variance, projected to zero", flat, k);
    }

    let rows = centered
        .iter()
        .map(|x| {
            components
                .iter()
                .map(|(variance, axis)| {
                    if *variance <= floor {
                        0.0
                    } else {
                        axis.iter().zip(x).map(|(a, v)| a * v).sum()
                    }
                })
                .collect()
        })
        .collect();

    ReducedVector {
        n_components: k,
        rows,
    }
}

fn covariance(centered: &[Vec<f64>], d: usize) -> Vec<Vec<f64>> {
    let denom = (centered.len().max(2) - 1) as f64;
    let mut cov = vec![vec![0.0; d]; d];
    for x in centered {
        for i in 0..d {
            for j in i..d {
                cov[i][j] += x[i] * x[j];
            }
        }
    }
    for i in 0..d {
        for j in i..d {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Top `k` (eigenvalue, unit eigenvector) pairs of a symmetric matrix, by
/// descending eigenvalue, sign-normalised.
fn principal_axes(cov: &[Vec<f64>], k: usize) -> Vec<(f64, Vec<f64>)> {
    let (values, vectors) = symmetric_eigen(cov);
    let d = values.len();

    let mut order: Vec<usize> = (0..d).collect();
    // Stable sort keeps ties in index order
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    order
        .into_iter()
        .take(k)
        .map(|col| {
            let mut axis: Vec<f64> = (0..d).map(|row| vectors[row][col]).collect();
            let dominant = axis
                .iter()
                .cloned()
                .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if dominant < 0.0 {
                axis.iter_mut().for_each(|v| *v = -*v);
            }
            (values[col], axis)
        })
        .collect()
}

/// Cyclic Jacobi eigen-decomposition. Returns eigenvalues and a matrix whose
/// columns are the matching eigenvectors.
fn symmetric_eigen(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    let scale: f64 = a.iter().flatten().map(|x| x * x).sum();

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in p + 1..n {
                off += a[p][q] * a[p][q];
            }
        }
        if off <= 1e-24 * scale || off == 0.0 {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                if a[p][q] == 0.0 {
                    continue;
                }

                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[i][i]).collect();
    (values, v)
}
