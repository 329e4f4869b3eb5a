// Diagnostic charts for fitted PCA models

use log::{debug, error, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::chart::{
    Annotation, BarSeries, ChartCanvas, Color, Colormap, DistributionSeries, ErrorBars, LineSeries,
    LineStyle, Marker, Orientation, PlotElement, PointColors, ReferenceLine, ScatterSeries,
    ShadedBand,
};
use crate::cross_validation::CrossValidator;
use crate::error::{DiagnosticsError, Result};
use crate::model::{PcaOutputs, RefittablePca};
use crate::statistics::{
    dmodx_critical_value, ellipse_points, hotelling_t2, q2_plateau, score_outlier_mask,
};

/// Tunable parameters of the diagnostic charts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Significance level of the Hotelling T² region drawn on score plots.
    pub alpha: f64,
    /// Relative Q² improvement below which the scree sweep considers Q² stable.
    pub plateau_threshold: f64,
    /// Angle increment (radians) used to trace the T² ellipse.
    pub ellipse_step: f64,
    /// Fraction added to each end of the score plot's axis limits.
    pub axis_padding: f64,
    /// Outlier marker area as a multiple of the default marker area.
    pub outlier_marker_scale: f64,
    /// Run independent refit trials on the rayon thread pool.
    pub parallel_trials: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            alpha: 0.05,
            plateau_threshold: 0.05,
            ellipse_step: 0.01,
            axis_padding: 0.2,
            outlier_marker_scale: 1.5,
            parallel_trials: true,
        }
    }
}

/// Point colouring of a score plot.
#[derive(Clone, Debug, PartialEq)]
pub enum ScoreColoring {
    Uniform,
    /// One value per sample, drawn with the jet colormap and a colorbar.
    Continuous(Array1<f64>),
    /// One class label per sample, one legend entry per distinct label.
    Discrete(Vec<String>),
}

/// Model parameters that can be drawn by `plot_model_parameters`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelParameter {
    /// The loading vector `p`.
    Loadings,
}

impl ModelParameter {
    pub fn symbol(&self) -> &'static str {
        match self {
            ModelParameter::Loadings => "p",
        }
    }
}

/// Hotelling T² region of a score plot.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreBoundary {
    /// Zero-based components the boundary was computed for.
    pub comps: Vec<usize>,
    /// Semi-axis per selected component (the ±T² limit for a single component).
    pub t2: Array1<f64>,
    pub outliers: Array1<bool>,
    /// Ellipse outline, only for two components.
    pub ellipse: Option<(Vec<f64>, Vec<f64>)>,
}

impl ScoreBoundary {
    pub fn outlier_indices(&self) -> Vec<usize> {
        mask_indices(self.outliers.view())
    }
}

/// Result of a scree sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct ScreeSummary {
    /// R²X for 1..=total_comps components.
    pub r2x: Array1<f64>,
    /// Q²X for 1..=total_comps components.
    pub q2x: Array1<f64>,
    /// Number of components at which Q² stabilizes, if it does within the sweep.
    pub plateau: Option<usize>,
}

/// DmodX values with their critical limit.
#[derive(Clone, Debug, PartialEq)]
pub struct DmodxSummary {
    pub dmodx: Array1<f64>,
    pub critical_value: f64,
    pub outliers: Array1<bool>,
}

impl DmodxSummary {
    pub fn outlier_indices(&self) -> Vec<usize> {
        mask_indices(self.outliers.view())
    }
}

fn mask_indices(mask: ArrayView1<'_, bool>) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &flag)| flag.then_some(i))
        .collect()
}

fn sample_axis(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

fn pick(values: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| values[i]).collect()
}

fn min_max(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

fn format_percent(alpha: f64) -> String {
    let pct = (1.0 - alpha) * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{:.0}", pct)
    } else {
        format!("{:.1}", pct)
    }
}

/// Draws diagnostic charts for a fitted PCA model.
///
/// Holds a borrow of the model; every chart goes to the canvas passed to the call.
pub struct PcaDiagnostics<'m, M> {
    model: &'m M,
    config: DiagnosticsConfig,
}

impl<'m, M: PcaOutputs> PcaDiagnostics<'m, M> {
    pub fn new(model: &'m M) -> Self {
        Self::with_config(model, DiagnosticsConfig::default())
    }

    pub fn with_config(model: &'m M, config: DiagnosticsConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        self.model
    }

    fn invalid_selection(&self, requested: &[usize]) -> DiagnosticsError {
        let err = DiagnosticsError::InvalidComponentSelection {
            requested: requested.to_vec(),
            available: self.model.ncomps(),
        };
        error!("{}", err);
        err
    }

    /// Every component-indexed output must cover `ncomps()` components.
    fn check_component_arrays(&self) -> Result<()> {
        let ncomps = self.model.ncomps();
        for (what, found) in [
            ("score columns", self.model.scores().ncols()),
            ("loading rows", self.model.loadings().nrows()),
            ("explained variance ratios", self.model.var_exp_ratio().len()),
        ] {
            if found < ncomps {
                return Err(DiagnosticsError::ShapeMismatch {
                    what,
                    expected: ncomps,
                    found,
                });
            }
        }
        Ok(())
    }

    fn check_score_components(&self, comps: &[usize]) -> Result<()> {
        let ncomps = self.model.ncomps();
        if comps.is_empty() || comps.len() > 2 || comps.iter().any(|&c| c >= ncomps) {
            return Err(self.invalid_selection(comps));
        }
        self.check_component_arrays()
    }

    /// Converts a 1-based component number into a row of the loadings.
    fn loading_row(&self, component: usize) -> Result<usize> {
        if component == 0 || component > self.model.ncomps() {
            return Err(self.invalid_selection(&[component]));
        }
        self.check_component_arrays()?;
        Ok(component - 1)
    }

    fn check_sigma(sigma: f64) -> Result<()> {
        if sigma.is_finite() && sigma >= 0.0 {
            Ok(())
        } else {
            Err(DiagnosticsError::InvalidArgument(format!(
                "sigma must be a non-negative number, got {}",
                sigma
            )))
        }
    }

    fn variance_label(&self, comp: usize) -> String {
        format!(
            "PC[{}] - Variance Explained : {:.2} %",
            comp + 1,
            self.model.var_exp_ratio()[comp] * 100.0
        )
    }

    /// Computes the Hotelling T² boundary and outlier mask for one or two
    /// zero-based score components, without drawing anything.
    pub fn score_boundary(&self, comps: &[usize], alpha: f64) -> Result<ScoreBoundary> {
        self.check_score_components(comps)?;
        let scores = self.model.scores();
        let t2 = hotelling_t2(scores, comps, alpha)?;
        let outliers = score_outlier_mask(scores, comps, &t2);
        let ellipse = if comps.len() == 2 {
            Some(ellipse_points(t2[0], t2[1], self.config.ellipse_step)?)
        } else {
            None
        };
        debug!(
            "Hotelling T2 boundary for components {:?} at alpha={}: {:?} ({} outliers)",
            comps,
            alpha,
            t2,
            outliers.iter().filter(|&&o| o).count()
        );
        Ok(ScoreBoundary {
            comps: comps.to_vec(),
            t2,
            outliers,
            ellipse,
        })
    }

    /// Score plot with the Hotelling T² limit at `config.alpha`.
    ///
    /// One component plots scores against the sample index with ±T² lines;
    /// two components plot a scatter with the T² ellipse. Outliers get a cross marker.
    pub fn plot_scores(
        &self,
        canvas: &mut dyn ChartCanvas,
        comps: &[usize],
        coloring: &ScoreColoring,
    ) -> Result<ScoreBoundary> {
        let boundary = self.score_boundary(comps, self.config.alpha)?;
        let scores = self.model.scores();
        let n_samples = scores.nrows();

        match coloring {
            ScoreColoring::Continuous(values) if values.len() != n_samples => {
                return Err(DiagnosticsError::ShapeMismatch {
                    what: "score colour values",
                    expected: n_samples,
                    found: values.len(),
                });
            }
            ScoreColoring::Discrete(labels) if labels.len() != n_samples => {
                return Err(DiagnosticsError::ShapeMismatch {
                    what: "score class labels",
                    expected: n_samples,
                    found: labels.len(),
                });
            }
            _ => {}
        }

        let (x_coord, y_coord) = if comps.len() == 1 {
            (sample_axis(n_samples), scores.column(comps[0]).to_vec())
        } else {
            (scores.column(comps[0]).to_vec(), scores.column(comps[1]).to_vec())
        };
        let outlier_idx = boundary.outlier_indices();
        let outlier_series = |colors: PointColors| ScatterSeries {
            marker: Marker::Cross,
            size_scale: self.config.outlier_marker_scale,
            colors,
            ..ScatterSeries::new(pick(&x_coord, &outlier_idx), pick(&y_coord, &outlier_idx))
        };

        canvas.begin_figure();
        let mut legend = Vec::new();

        match coloring {
            ScoreColoring::Uniform => {
                canvas.draw(PlotElement::Scatter(ScatterSeries::new(x_coord.clone(), y_coord.clone())));
                canvas.draw(PlotElement::Scatter(outlier_series(PointColors::Uniform(None))));
            }
            ScoreColoring::Continuous(values) => {
                let values = values.to_vec();
                let (vmin, vmax) = min_max(values.iter().copied());
                let mapped = |v: Vec<f64>| PointColors::Mapped {
                    values: v,
                    colormap: Colormap::Jet,
                    vmin,
                    vmax,
                };
                canvas.draw(PlotElement::Scatter(ScatterSeries {
                    colors: mapped(values.clone()),
                    ..ScatterSeries::new(x_coord.clone(), y_coord.clone())
                }));
                canvas.draw(PlotElement::Scatter(outlier_series(mapped(pick(&values, &outlier_idx)))));
                canvas.draw(PlotElement::Colorbar {
                    colormap: Colormap::Jet,
                    vmin,
                    vmax,
                });
            }
            ScoreColoring::Discrete(labels) => {
                let classes: Vec<&String> = labels.iter().collect::<BTreeSet<_>>().into_iter().collect();
                let class_color = |label: &String| {
                    let pos = classes.iter().position(|c| *c == label).unwrap_or(0);
                    Colormap::Set1.class_color(pos)
                };
                for (class_idx, class) in classes.iter().enumerate() {
                    let members: Vec<usize> = labels
                        .iter()
                        .enumerate()
                        .filter_map(|(i, l)| (l == *class).then_some(i))
                        .collect();
                    canvas.draw(PlotElement::Scatter(ScatterSeries {
                        colors: PointColors::Uniform(Some(Colormap::Set1.class_color(class_idx))),
                        label: Some((*class).clone()),
                        ..ScatterSeries::new(pick(&x_coord, &members), pick(&y_coord, &members))
                    }));
                    legend.push((*class).clone());
                }
                let outlier_colors = outlier_idx.iter().map(|&i| class_color(&labels[i])).collect();
                canvas.draw(PlotElement::Scatter(outlier_series(PointColors::PerPoint(outlier_colors))));
            }
        }

        if let Some((ex, ey)) = boundary.ellipse.as_ref() {
            canvas.draw(PlotElement::Reference(ReferenceLine {
                orientation: Orientation::Horizontal,
                value: 0.0,
                span: None,
                color: Color::BLACK,
                style: LineStyle::Solid,
            }));
            canvas.draw(PlotElement::Reference(ReferenceLine {
                orientation: Orientation::Vertical,
                value: 0.0,
                span: None,
                color: Color::BLACK,
                style: LineStyle::Solid,
            }));
            canvas.draw(PlotElement::Line(LineSeries {
                x: ex.clone(),
                y: ey.clone(),
                color: Some(Color::BLACK),
                style: LineStyle::Solid,
            }));

            let pad = self.config.axis_padding;
            let (xmin, xmax) = min_max(x_coord.iter().chain(ex.iter()).copied());
            let (ymin, ymax) = min_max(y_coord.iter().chain(ey.iter()).copied());
            canvas.annotate(Annotation::XLimits(xmin + pad * xmin, xmax + pad * xmax));
            canvas.annotate(Annotation::YLimits(ymin + pad * ymin, ymax + pad * ymax));
        } else {
            let limit = boundary.t2[0];
            for value in [limit, -limit] {
                canvas.draw(PlotElement::Reference(ReferenceLine {
                    orientation: Orientation::Horizontal,
                    value,
                    span: None,
                    color: Color::BLACK,
                    style: LineStyle::Dashed,
                }));
            }
            legend.push(format!(
                "Hotelling T² {}% limit",
                format_percent(self.config.alpha)
            ));
        }

        if !legend.is_empty() {
            canvas.annotate(Annotation::Legend(legend));
        }
        canvas.annotate(Annotation::Title("PCA score plot".into()));
        canvas.annotate(Annotation::XLabel(self.variance_label(comps[0])));
        if comps.len() == 2 {
            canvas.annotate(Annotation::YLabel(self.variance_label(comps[1])));
        }
        canvas.show();

        if !outlier_idx.is_empty() {
            warn!(
                "{} sample(s) outside the Hotelling T2 limit: {:?}",
                outlier_idx.len(),
                outlier_idx
            );
        }
        Ok(boundary)
    }

    /// Loading plot for a 1-based `component`.
    ///
    /// When the model carries cross-validation loading statistics, a
    /// `mean ± sigma·stdev` band (line mode) or error bars (bar mode) are added.
    pub fn plot_loadings(
        &self,
        canvas: &mut dyn ChartCanvas,
        component: usize,
        bar: bool,
        sigma: f64,
    ) -> Result<()> {
        let row = self.loading_row(component)?;
        Self::check_sigma(sigma)?;
        let loadings = self.model.loadings().row(row).to_vec();
        let x = sample_axis(loadings.len());
        let band = self
            .model
            .cv_parameters()
            .and_then(|cv| cv.loading_band(row));

        canvas.begin_figure();
        if bar {
            canvas.draw(PlotElement::Bars(BarSeries {
                x: x.clone(),
                heights: loadings,
                width: 0.2,
                color: None,
            }));
            if let Some((mean, stdev)) = band {
                canvas.draw(PlotElement::ErrorBars(ErrorBars {
                    x,
                    y: mean.to_vec(),
                    yerr: stdev.iter().map(|s| sigma * s).collect(),
                }));
            }
        } else {
            canvas.draw(PlotElement::Line(LineSeries {
                x: x.clone(),
                y: loadings,
                color: None,
                style: LineStyle::Solid,
            }));
            if let Some((mean, stdev)) = band {
                canvas.draw(PlotElement::Band(ShadedBand {
                    x,
                    lower: mean.iter().zip(stdev.iter()).map(|(m, s)| m - sigma * s).collect(),
                    upper: mean.iter().zip(stdev.iter()).map(|(m, s)| m + sigma * s).collect(),
                    color: Color::RED,
                    alpha: 0.2,
                }));
            }
        }
        if band.is_none() {
            debug!("No cross-validation loadings for PC{}; plotting without uncertainty", component);
        }
        canvas.annotate(Annotation::XLabel("Variable No".into()));
        canvas.annotate(Annotation::YLabel(format!("Loading for PC{}", component)));
        canvas.show();
        Ok(())
    }

    /// Plots a model parameter for a 1-based `component`.
    ///
    /// With `cross_val` the cross-validated mean is drawn with a `sigma·stdev` error;
    /// otherwise the fitted values are drawn. `xaxis` replaces the variable index.
    #[allow(clippy::too_many_arguments)]
    pub fn plot_model_parameters(
        &self,
        canvas: &mut dyn ChartCanvas,
        parameter: ModelParameter,
        component: usize,
        cross_val: bool,
        sigma: f64,
        bar: bool,
        xaxis: Option<&[f64]>,
    ) -> Result<()> {
        let row = self.loading_row(component)?;
        Self::check_sigma(sigma)?;

        let (values, error): (Vec<f64>, Option<Vec<f64>>) = match (parameter, cross_val) {
            (ModelParameter::Loadings, true) => {
                let (mean, stdev) = self
                    .model
                    .cv_parameters()
                    .and_then(|cv| cv.loading_band(row))
                    .ok_or(DiagnosticsError::MissingCrossValidation)?;
                (mean.to_vec(), Some(stdev.iter().map(|s| sigma * s).collect()))
            }
            (ModelParameter::Loadings, false) => (self.model.loadings().row(row).to_vec(), None),
        };

        let x = match xaxis {
            Some(axis) if axis.len() != values.len() => {
                return Err(DiagnosticsError::ShapeMismatch {
                    what: "x axis values",
                    expected: values.len(),
                    found: axis.len(),
                });
            }
            Some(axis) => axis.to_vec(),
            None => sample_axis(values.len()),
        };

        canvas.begin_figure();
        if bar {
            canvas.draw(PlotElement::Bars(BarSeries {
                x: x.clone(),
                heights: values.clone(),
                width: 0.2,
                color: None,
            }));
            if let Some(err) = error {
                canvas.draw(PlotElement::ErrorBars(ErrorBars { x, y: values, yerr: err }));
            }
        } else {
            canvas.draw(PlotElement::Line(LineSeries {
                x: x.clone(),
                y: values.clone(),
                color: None,
                style: LineStyle::Solid,
            }));
            if let Some(err) = error {
                canvas.draw(PlotElement::Band(ShadedBand {
                    x,
                    lower: values.iter().zip(err.iter()).map(|(v, e)| v - e).collect(),
                    upper: values.iter().zip(err.iter()).map(|(v, e)| v + e).collect(),
                    color: Color::RED,
                    alpha: 0.2,
                }));
            }
        }
        canvas.annotate(Annotation::XLabel("Variable No".into()));
        canvas.annotate(Annotation::YLabel(format!(
            "{} for PCA component {}",
            parameter.symbol(),
            component
        )));
        canvas.show();
        Ok(())
    }

    /// Bar chart of per-sample leverage with a reference line at `1/n`.
    pub fn plot_leverages(&self, canvas: &mut dyn ChartCanvas) -> Result<Array1<f64>> {
        let leverage = self.model.leverages()?;
        let n = leverage.len();
        if n == 0 {
            return Err(DiagnosticsError::InvalidArgument(
                "model has no samples to plot leverages for".into(),
            ));
        }

        canvas.begin_figure();
        canvas.annotate(Annotation::XLabel("Sample Index".into()));
        canvas.annotate(Annotation::YLabel("Leverage".into()));
        canvas.draw(PlotElement::Bars(BarSeries {
            x: sample_axis(n),
            heights: leverage.to_vec(),
            width: 0.8,
            color: None,
        }));
        canvas.draw(PlotElement::Reference(ReferenceLine {
            orientation: Orientation::Horizontal,
            value: 1.0 / n as f64,
            span: Some((0.0, n as f64)),
            color: Color::RED,
            style: LineStyle::Dashed,
        }));
        canvas.show();
        Ok(leverage)
    }
}

impl<'m, M: RefittablePca> PcaDiagnostics<'m, M> {
    /// Runs `trial` over every input, on rayon when `parallel_trials` is set.
    /// The first failing trial aborts the sweep.
    fn sweep<T, R, F>(&self, inputs: Vec<T>, trial: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Send + Sync,
    {
        if self.config.parallel_trials {
            inputs.into_par_iter().map(trial).collect()
        } else {
            inputs.into_iter().map(trial).collect()
        }
    }

    /// Refits a snapshot of the model with `ncomps` components and cross-validates it.
    fn refit_and_validate<C: CrossValidator>(
        &self,
        x: ArrayView2<'_, f64>,
        ncomps: usize,
        cv: &C,
    ) -> Result<M> {
        let mut model = self.model.clone();
        model.set_ncomps(ncomps);
        model.fit(x).map_err(DiagnosticsError::Model)?;
        model
            .cross_validation(x, cv, false)
            .map_err(DiagnosticsError::Model)?;
        Ok(model)
    }

    fn cv_q2(model: &M) -> Result<f64> {
        model
            .cv_parameters()
            .map(|cv| cv.q2x)
            .ok_or(DiagnosticsError::MissingCrossValidation)
    }

    fn check_total_comps(total_comps: usize) -> Result<()> {
        if total_comps == 0 {
            return Err(DiagnosticsError::InvalidArgument(
                "total_comps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// R²X and Q²X for 1..=`total_comps` components, drawn as paired bars, with the
    /// Q² plateau marked by a dashed vertical line.
    pub fn scree_plot<C: CrossValidator>(
        &self,
        canvas: &mut dyn ChartCanvas,
        x: ArrayView2<'_, f64>,
        total_comps: usize,
        cv: &C,
    ) -> Result<ScreeSummary> {
        Self::check_total_comps(total_comps)?;
        info!(
            "Scree sweep over 1..={} components ({} samples, {} variables, {}-fold CV)",
            total_comps,
            x.nrows(),
            x.ncols(),
            cv.n_splits()
        );

        let fits = self.sweep((1..=total_comps).collect::<Vec<usize>>(), |ncomps| {
            let model = self.refit_and_validate(x, ncomps, cv)?;
            let r2 = model.r2x();
            let q2 = Self::cv_q2(&model)?;
            debug!("ncomps={}: R2X={:.4}, Q2X={:.4}", ncomps, r2, q2);
            Ok((r2, q2))
        })?;
        let (r2, q2): (Vec<f64>, Vec<f64>) = fits.into_iter().unzip();
        let plateau = q2_plateau(&q2, self.config.plateau_threshold);
        let r2x = Array1::from(r2);
        let q2x = Array1::from(q2);

        canvas.begin_figure();
        let positions: Vec<f64> = (1..=total_comps).map(|c| c as f64).collect();
        canvas.draw(PlotElement::Bars(BarSeries {
            x: positions.iter().map(|p| p - 0.1).collect(),
            heights: r2x.to_vec(),
            width: 0.2,
            color: None,
        }));
        canvas.draw(PlotElement::Bars(BarSeries {
            x: positions.iter().map(|p| p + 0.1).collect(),
            heights: q2x.to_vec(),
            width: 0.2,
            color: None,
        }));
        canvas.annotate(Annotation::Legend(vec!["R2".into(), "Q2".into()]));
        canvas.annotate(Annotation::XLabel("Number of components".into()));
        canvas.annotate(Annotation::YLabel("R2/Q2X".into()));

        match plateau {
            Some(stable_at) => {
                canvas.draw(PlotElement::Reference(ReferenceLine {
                    orientation: Orientation::Vertical,
                    value: stable_at as f64,
                    span: Some((0.0, 1.0)),
                    color: Color::RED,
                    style: LineStyle::Dashed,
                }));
                info!(
                    "Q2X measure stabilizes (increase of less than {}% of previous value or decrease) at component {}",
                    self.config.plateau_threshold * 100.0,
                    stable_at
                );
            }
            None => warn!("Consider exploring a higher level of components"),
        }
        canvas.show();

        Ok(ScreeSummary { r2x, q2x, plateau })
    }

    /// Repeats refit and cross-validation `repeats` times per component count and
    /// draws the Q² distribution of each count as a violin with the individual points.
    ///
    /// Returns a (total_comps, repeats) matrix of Q² values.
    pub fn repeated_cv<C: CrossValidator>(
        &self,
        canvas: &mut dyn ChartCanvas,
        x: ArrayView2<'_, f64>,
        total_comps: usize,
        repeats: usize,
        cv: &C,
    ) -> Result<Array2<f64>> {
        Self::check_total_comps(total_comps)?;
        if repeats == 0 {
            return Err(DiagnosticsError::InvalidArgument(
                "repeats must be at least 1".into(),
            ));
        }
        info!(
            "Repeated cross-validation: {} component counts x {} repeats",
            total_comps, repeats
        );

        let trials: Vec<(usize, usize)> = (1..=total_comps)
            .flat_map(|ncomps| (0..repeats).map(move |rep| (ncomps, rep)))
            .collect();
        let q2 = self.sweep(trials, |(ncomps, rep)| {
            let stream = ((ncomps - 1) * repeats + rep) as u64;
            let model = self.refit_and_validate(x, ncomps, &cv.reshuffled(stream))?;
            let q2 = Self::cv_q2(&model)?;
            if !q2.is_finite() {
                return Err(DiagnosticsError::NonFiniteStatistic(format!(
                    "Q2X for {} components, repeat {}",
                    ncomps, rep
                )));
            }
            Ok(q2)
        })?;
        let q2x = Array2::from_shape_vec((total_comps, repeats), q2)
            .map_err(|e| DiagnosticsError::InvalidArgument(e.to_string()))?;

        let per_component: Vec<Vec<f64>> = q2x.rows().into_iter().map(|r| r.to_vec()).collect();
        canvas.begin_figure();
        canvas.draw(PlotElement::Violin(DistributionSeries {
            samples: per_component.clone(),
            palette: Some(Colormap::Set1),
            color: None,
        }));
        canvas.draw(PlotElement::Swarm(DistributionSeries {
            samples: per_component,
            palette: None,
            color: Some(Color::BLACK),
        }));
        canvas.annotate(Annotation::XTickLabels(
            (1..=total_comps).map(|c| c.to_string()).collect(),
        ));
        canvas.annotate(Annotation::XLabel("Number of components".into()));
        canvas.annotate(Annotation::YLabel("Q2X".into()));
        canvas.show();

        Ok(q2x)
    }

    /// DmodX per sample against the F-distribution critical value at `alpha`.
    ///
    /// Errors raised by the model's `dmodx` are returned unchanged.
    pub fn plot_dmodx(
        &self,
        canvas: &mut dyn ChartCanvas,
        x: ArrayView2<'_, f64>,
        alpha: f64,
    ) -> Result<DmodxSummary> {
        let (n_samples, n_variables) = x.dim();
        let dmodx = self.model.dmodx(x).map_err(DiagnosticsError::Model)?;
        if dmodx.len() != n_samples {
            return Err(DiagnosticsError::ShapeMismatch {
                what: "DmodX values",
                expected: n_samples,
                found: dmodx.len(),
            });
        }
        let critical_value = dmodx_critical_value(n_samples, n_variables, self.model.ncomps(), alpha)?;
        let outliers = dmodx.mapv(|d| d > critical_value);
        let summary = DmodxSummary {
            dmodx,
            critical_value,
            outliers,
        };
        let outlier_idx = summary.outlier_indices();
        debug!("DmodX critical value at alpha={}: {}", alpha, critical_value);

        let x_axis = sample_axis(n_samples);
        let values = summary.dmodx.to_vec();
        canvas.begin_figure();
        canvas.draw(PlotElement::Scatter(ScatterSeries::new(x_axis.clone(), values.clone())));
        canvas.draw(PlotElement::Scatter(ScatterSeries {
            marker: Marker::Cross,
            colors: PointColors::Uniform(Some(Color::RED)),
            ..ScatterSeries::new(pick(&x_axis, &outlier_idx), pick(&values, &outlier_idx))
        }));
        canvas.annotate(Annotation::XLabel("Sample Index".into()));
        canvas.annotate(Annotation::YLabel("DmodX".into()));
        canvas.draw(PlotElement::Reference(ReferenceLine {
            orientation: Orientation::Horizontal,
            value: critical_value,
            span: Some((0.0, n_samples as f64)),
            color: Color::RED,
            style: LineStyle::Dashed,
        }));
        canvas.show();

        if !outlier_idx.is_empty() {
            warn!(
                "{} sample(s) exceed the DmodX critical value {:.4}: {:?}",
                outlier_idx.len(),
                critical_value,
                outlier_idx
            );
        }
        Ok(summary)
    }
}
