// Fitted PCA model interface consumed by the diagnostics

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::cross_validation::CrossValidator;
use crate::error::{DiagnosticsError, Result, ThreadSafeStdError};
use crate::statistics::{cholesky_lower, forward_substitute};

/// Cross-validation summary of a fitted model.
///
/// Only present after the model's cross-validation has been run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CvParameters {
    /// Cross-validated goodness of fit (Q²X).
    pub q2x: f64,
    /// Mean loadings across the cross-validation folds.
    /// Shape: (n_components, n_variables)
    pub mean_loadings: Option<Array2<f64>>,
    /// Standard deviation of the loadings across the folds.
    /// Shape: (n_components, n_variables)
    pub stdev_loadings: Option<Array2<f64>>,
}

/// A statistic looked up by name in a `CvParameters` summary.
#[derive(Clone, Debug, PartialEq)]
pub enum CvStatistic<'a> {
    Scalar(f64),
    Matrix(ArrayView2<'a, f64>),
}

impl CvParameters {
    pub fn new(q2x: f64) -> Self {
        Self {
            q2x,
            mean_loadings: None,
            stdev_loadings: None,
        }
    }

    /// Attaches per-fold loading statistics.
    pub fn with_loadings(mut self, mean: Array2<f64>, stdev: Array2<f64>) -> Self {
        self.mean_loadings = Some(mean);
        self.stdev_loadings = Some(stdev);
        self
    }

    /// Looks up a statistic by its conventional name
    /// (`"Q2"`, `"Mean_Loadings"`, `"Stdev_Loadings"`).
    pub fn statistic(&self, name: &str) -> Option<CvStatistic<'_>> {
        match name {
            "Q2" => Some(CvStatistic::Scalar(self.q2x)),
            "Mean_Loadings" => self.mean_loadings.as_ref().map(|m| CvStatistic::Matrix(m.view())),
            "Stdev_Loadings" => self.stdev_loadings.as_ref().map(|m| CvStatistic::Matrix(m.view())),
            _ => None,
        }
    }

    /// Mean and standard deviation of the loadings of one (zero-based) component,
    /// if both are available.
    pub fn loading_band(&self, component: usize) -> Option<(ArrayView1<'_, f64>, ArrayView1<'_, f64>)> {
        let mean = self.mean_loadings.as_ref()?;
        let stdev = self.stdev_loadings.as_ref()?;
        if component >= mean.nrows() || component >= stdev.nrows() {
            return None;
        }
        Some((mean.row(component), stdev.row(component)))
    }
}

/// Read-only view of a fitted PCA model.
///
/// Scores are (n_samples, n_components); loadings are (n_components, n_variables).
pub trait PcaOutputs {
    fn scores(&self) -> ArrayView2<'_, f64>;

    fn loadings(&self) -> ArrayView2<'_, f64>;

    /// Number of retained components.
    fn ncomps(&self) -> usize;

    /// Fraction of variance explained by each retained component.
    fn var_exp_ratio(&self) -> ArrayView1<'_, f64>;

    /// In-sample goodness of fit (R²X) of the whole model.
    fn r2x(&self) -> f64;

    /// Cross-validation summary, `None` until cross-validation has run.
    fn cv_parameters(&self) -> Option<&CvParameters>;

    /// Per-sample leverage, the diagonal of `T (TᵀT)⁻¹ Tᵀ`.
    ///
    /// Solved through the Cholesky factor `L` of `TᵀT` as `h_i = ‖L⁻¹ t_i‖²`, so the
    /// scores need not be orthogonal. Components with zero score variance contribute nothing.
    ///
    /// # Errors
    /// `InvalidArgument` if the remaining score columns are linearly dependent.
    fn leverages(&self) -> Result<Array1<f64>> {
        let scores = self.scores();
        let kept: Vec<usize> = scores
            .columns()
            .into_iter()
            .enumerate()
            .filter_map(|(a, col)| (col.dot(&col) > f64::EPSILON).then_some(a))
            .collect();
        if kept.is_empty() {
            return Ok(Array1::zeros(scores.nrows()));
        }

        let t = scores.select(Axis(1), &kept);
        let chol = cholesky_lower(t.t().dot(&t).view())?;
        Ok(t.rows()
            .into_iter()
            .map(|row| forward_substitute(chol.view(), row).iter().map(|z| z * z).sum())
            .collect())
    }
}

/// A PCA model that can be refitted with a different number of components.
///
/// Sweeps clone the model once per trial, so clones must not share mutable state.
pub trait RefittablePca: PcaOutputs + Clone + Send + Sync {
    fn set_ncomps(&mut self, ncomps: usize);

    /// Fits the model to `x` (n_samples, n_variables).
    fn fit(&mut self, x: ArrayView2<'_, f64>) -> std::result::Result<(), ThreadSafeStdError>;

    /// Cross-validates the fitted model, populating `cv_parameters`.
    /// With `output_dist` the model may also keep per-fold distributions.
    fn cross_validation<C: CrossValidator>(
        &mut self,
        x: ArrayView2<'_, f64>,
        cv: &C,
        output_dist: bool,
    ) -> std::result::Result<(), ThreadSafeStdError>;

    /// Distance to the model for each row of `x`.
    fn dmodx(&self, x: ArrayView2<'_, f64>) -> std::result::Result<Array1<f64>, ThreadSafeStdError>;
}

/// Snapshot of the outputs of an already fitted PCA model.
///
/// Useful when the model itself is not available (results loaded from elsewhere)
/// and only score, loading and leverage charts are needed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedPca {
    /// Shape: (n_samples, n_components)
    scores: Array2<f64>,
    /// Shape: (n_components, n_variables)
    loadings: Array2<f64>,
    /// Shape: (n_components)
    var_exp_ratio: Array1<f64>,
    r2x: f64,
    cv_parameters: Option<CvParameters>,
}

impl FittedPca {
    /// Creates a snapshot from precomputed model outputs.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if the component dimension of the scores, loadings
    /// and variance ratios disagree, or if the CV loading statistics do not match
    /// the loadings' shape. Returns `NonFiniteStatistic` if any input contains
    /// NaN or infinity.
    pub fn new(
        scores: Array2<f64>,
        loadings: Array2<f64>,
        var_exp_ratio: Array1<f64>,
        r2x: f64,
    ) -> Result<Self> {
        let n_components = scores.ncols();
        if loadings.nrows() != n_components {
            return Err(DiagnosticsError::ShapeMismatch {
                what: "loading rows",
                expected: n_components,
                found: loadings.nrows(),
            });
        }
        if var_exp_ratio.len() != n_components {
            return Err(DiagnosticsError::ShapeMismatch {
                what: "explained variance ratios",
                expected: n_components,
                found: var_exp_ratio.len(),
            });
        }
        if scores.iter().any(|v| !v.is_finite()) {
            return Err(DiagnosticsError::NonFiniteStatistic("scores".into()));
        }
        if loadings.iter().any(|v| !v.is_finite()) {
            return Err(DiagnosticsError::NonFiniteStatistic("loadings".into()));
        }
        if var_exp_ratio.iter().any(|v| !v.is_finite()) || !r2x.is_finite() {
            return Err(DiagnosticsError::NonFiniteStatistic(
                "explained variance".into(),
            ));
        }

        Ok(Self {
            scores,
            loadings,
            var_exp_ratio,
            r2x,
            cv_parameters: None,
        })
    }

    /// Attaches a cross-validation summary.
    pub fn with_cv_parameters(mut self, cv: CvParameters) -> Result<Self> {
        for (what, stat) in [
            ("mean CV loadings", cv.mean_loadings.as_ref()),
            ("stdev CV loadings", cv.stdev_loadings.as_ref()),
        ] {
            if let Some(m) = stat {
                if m.dim() != self.loadings.dim() {
                    return Err(DiagnosticsError::ShapeMismatch {
                        what,
                        expected: self.loadings.len(),
                        found: m.len(),
                    });
                }
            }
        }
        self.cv_parameters = Some(cv);
        Ok(self)
    }

    pub fn n_samples(&self) -> usize {
        self.scores.nrows()
    }

    pub fn n_variables(&self) -> usize {
        self.loadings.ncols()
    }
}

impl PcaOutputs for FittedPca {
    fn scores(&self) -> ArrayView2<'_, f64> {
        self.scores.view()
    }

    fn loadings(&self) -> ArrayView2<'_, f64> {
        self.loadings.view()
    }

    fn ncomps(&self) -> usize {
        self.scores.ncols()
    }

    fn var_exp_ratio(&self) -> ArrayView1<'_, f64> {
        self.var_exp_ratio.view()
    }

    fn r2x(&self) -> f64 {
        self.r2x
    }

    fn cv_parameters(&self) -> Option<&CvParameters> {
        self.cv_parameters.as_ref()
    }
}
