//! Boundary statistics behind the diagnostic charts.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::f64::consts::PI;

use crate::error::{DiagnosticsError, Result};

fn check_alpha(alpha: f64) -> Result<()> {
    if alpha.is_finite() && alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(DiagnosticsError::InvalidArgument(format!(
            "significance level must lie in (0, 1), got {}",
            alpha
        )))
    }
}

/// Upper `alpha` critical value of the F distribution with (`numerator`, `denominator`)
/// degrees of freedom, i.e. `F⁻¹(1 - alpha)`.
pub fn f_critical_value(alpha: f64, numerator: f64, denominator: f64) -> Result<f64> {
    check_alpha(alpha)?;
    if !(numerator.is_finite() && denominator.is_finite() && numerator > 0.0 && denominator > 0.0) {
        return Err(DiagnosticsError::InvalidDegreesOfFreedom {
            numerator,
            denominator,
        });
    }
    let dist = FisherSnedecor::new(numerator, denominator)
        .map_err(|e| DiagnosticsError::Distribution(e.to_string()))?;
    Ok(dist.inverse_cdf(1.0 - alpha))
}

/// Semi-axes of the Hotelling T² confidence region for the selected score columns.
///
/// With `n` samples and `A = comps.len()`:
/// `t2[a] = sqrt(k · Σ_i t_ia² / n)` where
/// `k = (n-1)/n · A(n²-1) / (n(n-A)) · F⁻¹(1-alpha; A, n-A)`.
///
/// Component indices are assumed to be valid columns of `scores`.
pub fn hotelling_t2(scores: ArrayView2<'_, f64>, comps: &[usize], alpha: f64) -> Result<Array1<f64>> {
    let n = scores.nrows() as f64;
    let a = comps.len() as f64;
    let f_crit = f_critical_value(alpha, a, n - a)?;
    let k = (n - 1.0) / n * a * (n * n - 1.0) / (n * (n - a)) * f_crit;

    Ok(comps
        .iter()
        .map(|&c| {
            let column = scores.column(c);
            let mean_square = column.dot(&column) / n;
            (k * mean_square).sqrt()
        })
        .collect())
}

/// Flags samples whose normalized squared score sum `Σ_a t_ia² / t2[a]²` exceeds 1.
pub fn score_outlier_mask(scores: ArrayView2<'_, f64>, comps: &[usize], t2: &Array1<f64>) -> Array1<bool> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            let distance: f64 = comps
                .iter()
                .zip(t2.iter())
                .map(|(&c, &axis)| row[c] * row[c] / (axis * axis))
                .sum();
            distance > 1.0
        })
        .collect()
}

/// Smallest angle increment accepted by [`ellipse_points`] (about 6.3 million points).
pub const MIN_ELLIPSE_STEP: f64 = 1e-6;

/// Points of the ellipse `(t2x·cos θ, t2y·sin θ)` for θ from -π up to (excluding) π.
pub fn ellipse_points(t2x: f64, t2y: f64, step: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    if !(step.is_finite() && step >= MIN_ELLIPSE_STEP) {
        return Err(DiagnosticsError::InvalidArgument(format!(
            "ellipse angle step must be finite and at least {}, got {}",
            MIN_ELLIPSE_STEP, step
        )));
    }
    let n_points = (2.0 * PI / step).ceil() as usize;
    Ok((0..n_points)
        .map(|i| {
            let angle = -PI + i as f64 * step;
            (t2x * angle.cos(), t2y * angle.sin())
        })
        .unzip())
}

/// Critical DmodX value for a model with `ncomps` components fitted on an
/// `n_samples` × `n_variables` matrix.
///
/// Degrees of freedom follow Faber (2008), "Degrees of freedom for the residuals of a
/// principal component analysis - A clarification", Chemometrics and Intelligent
/// Laboratory Systems: `(m - A - 1, (n - A - 1)(m - A))`.
pub fn dmodx_critical_value(n_samples: usize, n_variables: usize, ncomps: usize, alpha: f64) -> Result<f64> {
    let n = n_samples as f64;
    let m = n_variables as f64;
    let a = ncomps as f64;
    f_critical_value(alpha, m - a - 1.0, (n - a - 1.0) * (m - a))
}

/// Lower Cholesky factor `L` of a symmetric positive definite `gram = L Lᵀ`.
///
/// Fails with `InvalidArgument` when a pivot is not positive relative to the largest
/// diagonal entry, i.e. the underlying columns are linearly dependent.
pub(crate) fn cholesky_lower(gram: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let k = gram.nrows();
    let scale = gram.diag().iter().fold(0.0_f64, |m, &d| m.max(d.abs()));
    let tol = scale * 1e-12;
    let mut l = Array2::<f64>::zeros((k, k));
    for j in 0..k {
        let pivot = gram[[j, j]] - (0..j).map(|p| l[[j, p]] * l[[j, p]]).sum::<f64>();
        if !(pivot > tol) {
            return Err(DiagnosticsError::InvalidArgument(format!(
                "score columns are linearly dependent (pivot {} at column {})",
                pivot, j
            )));
        }
        let diag = pivot.sqrt();
        l[[j, j]] = diag;
        for i in (j + 1)..k {
            let off = gram[[i, j]] - (0..j).map(|p| l[[i, p]] * l[[j, p]]).sum::<f64>();
            l[[i, j]] = off / diag;
        }
    }
    Ok(l)
}

/// Solves `L z = b` for lower-triangular `L`.
pub(crate) fn forward_substitute(l: ArrayView2<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut z = Array1::<f64>::zeros(b.len());
    for i in 0..b.len() {
        let partial: f64 = (0..i).map(|p| l[[i, p]] * z[p]).sum();
        z[i] = (b[i] - partial) / l[[i, i]];
    }
    z
}

/// Index `i ≥ 1` of the first Q² whose relative improvement over `q2[i-1]` falls below
/// `threshold` (a decrease always qualifies). `i` is also the number of components at
/// which Q² stabilizes. `None` when Q² keeps improving over the whole range.
pub fn q2_plateau(q2: &[f64], threshold: f64) -> Option<usize> {
    q2.windows(2)
        .position(|pair| (pair[1] - pair[0]) / pair[0] < threshold)
        .map(|i| i + 1)
}
