use crate::chart::{Color, Colormap, LineStyle, Marker, Orientation, PlotElement, PointColors, RecordingCanvas};
use crate::diagnostics::{DiagnosticsConfig, ModelParameter, PcaDiagnostics, ScoreColoring};
use crate::error::DiagnosticsError;
use crate::model::{CvParameters, FittedPca, PcaOutputs};
use crate::statistics::{ellipse_points, hotelling_t2};

use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array1, Array2, ArrayView1, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Gaussian scores with one planted far-away sample (index 0).
fn synthetic_model(n_samples: usize, n_components: usize, n_variables: usize, seed: u64) -> FittedPca {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut scores =
        Array2::random_using((n_samples, n_components), Normal::new(0.0, 1.0).unwrap(), &mut rng);
    scores.row_mut(0).fill(8.0);
    let loadings = Array2::random_using((n_components, n_variables), Normal::new(0.0, 0.3).unwrap(), &mut rng);
    let var_exp: Array1<f64> = (0..n_components).map(|a| 0.5 / (a + 1) as f64).collect();
    FittedPca::new(scores, loadings, var_exp, 0.85).unwrap()
}

fn with_cv(model: FittedPca, stdev: f64) -> FittedPca {
    let mean = model.loadings().mapv(|v| v + 0.01);
    let sd = model.loadings().mapv(|_| stdev);
    model
        .with_cv_parameters(CvParameters::new(0.7).with_loadings(mean, sd))
        .unwrap()
}

#[cfg(test)]
mod score_plot_tests {
    use super::*;

    #[test]
    fn two_component_mask_matches_normalized_distance() {
        let model = synthetic_model(40, 3, 6, 1);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        let boundary = diag
            .plot_scores(&mut canvas, &[0, 2], &ScoreColoring::Uniform)
            .unwrap();

        let scores = model.scores();
        for (i, &flagged) in boundary.outliers.iter().enumerate() {
            let d = scores[[i, 0]].powi(2) / boundary.t2[0].powi(2)
                + scores[[i, 2]].powi(2) / boundary.t2[1].powi(2);
            assert_eq!(flagged, d > 1.0, "sample {}", i);
        }
        assert!(boundary.outliers[0], "planted sample must be flagged");

        let fig = canvas.last_figure().unwrap();
        assert_eq!(fig.title.as_deref(), Some("PCA score plot"));
        assert!(fig.x_label.as_deref().unwrap().starts_with("PC[1] - Variance Explained : 50.00 %"));
        assert!(fig.y_label.as_deref().unwrap().starts_with("PC[3]"));

        // Limits pad the extremes of points and ellipse by 20% of their own value.
        let (ex, ey) = ellipse_points(boundary.t2[0], boundary.t2[1], 0.01).unwrap();
        let extremes = |values: Vec<f64>| {
            values
                .into_iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
        };
        let (xmin, xmax) = extremes(scores.column(0).iter().copied().chain(ex).collect());
        let (ymin, ymax) = extremes(scores.column(2).iter().copied().chain(ey).collect());
        let (x_lo, x_hi) = fig.x_limits.unwrap();
        let (y_lo, y_hi) = fig.y_limits.unwrap();
        assert_abs_diff_eq!(x_lo, 1.2 * xmin, epsilon = 1e-12);
        assert_abs_diff_eq!(x_hi, 1.2 * xmax, epsilon = 1e-12);
        assert_abs_diff_eq!(y_lo, 1.2 * ymin, epsilon = 1e-12);
        assert_abs_diff_eq!(y_hi, 1.2 * ymax, epsilon = 1e-12);
        assert_abs_diff_eq!(x_hi, 9.6, epsilon = 1e-12);

        let ellipse = fig
            .elements
            .iter()
            .find_map(|e| match e {
                PlotElement::Line(l) => Some(l),
                _ => None,
            })
            .expect("ellipse outline");
        assert_eq!(ellipse.x.len(), 629);
        assert_eq!(fig.reference_lines().count(), 2);

        let scatters: Vec<_> = fig.scatters().collect();
        assert_eq!(scatters.len(), 2);
        assert_eq!(scatters[0].x.len(), 40);
        assert_eq!(scatters[1].x.len(), boundary.outlier_indices().len());
    }

    #[test]
    fn single_component_flags_scores_beyond_limit() {
        let model = synthetic_model(30, 2, 4, 2);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        let boundary = diag
            .plot_scores(&mut canvas, &[1], &ScoreColoring::Uniform)
            .unwrap();

        let limit = boundary.t2[0];
        let expected = hotelling_t2(model.scores(), &[1], 0.05).unwrap();
        assert_abs_diff_eq!(limit, expected[0], epsilon = 1e-12);
        for (i, &flagged) in boundary.outliers.iter().enumerate() {
            assert_eq!(flagged, model.scores()[[i, 1]].abs() > limit);
        }

        let fig = canvas.last_figure().unwrap();
        let lines: Vec<_> = fig.reference_lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.style == LineStyle::Dashed && l.orientation == Orientation::Horizontal));
        assert_abs_diff_eq!(lines[0].value, limit);
        assert_abs_diff_eq!(lines[1].value, -limit);
        assert_eq!(fig.legend, vec!["Hotelling T² 95% limit".to_string()]);
        assert_eq!(fig.scatters().next().unwrap().x[29], 29.0);
        assert!(fig.y_label.is_none());
    }

    #[test]
    fn invalid_component_selections_are_rejected_before_drawing() {
        let model = synthetic_model(20, 3, 4, 3);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();

        for comps in [vec![0, 1, 2], vec![], vec![0, 3], vec![5]] {
            let err = diag
                .plot_scores(&mut canvas, &comps, &ScoreColoring::Uniform)
                .unwrap_err();
            match err {
                DiagnosticsError::InvalidComponentSelection { requested, available } => {
                    assert_eq!(requested, comps);
                    assert_eq!(available, 3);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
        assert!(canvas.figures().is_empty());
    }

    #[test]
    fn continuous_colouring_adds_colorbar() {
        let model = synthetic_model(15, 2, 3, 4);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        let values: Array1<f64> = (0..15).map(|i| i as f64).collect();
        diag.plot_scores(&mut canvas, &[0, 1], &ScoreColoring::Continuous(values))
            .unwrap();

        let fig = canvas.last_figure().unwrap();
        assert!(fig.elements.iter().any(|e| matches!(
            e,
            PlotElement::Colorbar { vmin, vmax, .. } if *vmin == 0.0 && *vmax == 14.0
        )));
        match &fig.scatters().next().unwrap().colors {
            PointColors::Mapped { values, .. } => assert_eq!(values.len(), 15),
            other => panic!("expected mapped colours, got {:?}", other),
        }

        let short = ScoreColoring::Continuous(Array1::zeros(3));
        assert!(matches!(
            diag.plot_scores(&mut canvas, &[0, 1], &short),
            Err(DiagnosticsError::ShapeMismatch { expected: 15, found: 3, .. })
        ));
    }

    #[test]
    fn discrete_colouring_has_one_series_per_class() {
        let model = synthetic_model(6, 2, 3, 5);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        let labels: Vec<String> = ["b", "a", "b", "c", "a", "b"].iter().map(|s| s.to_string()).collect();
        diag.plot_scores(&mut canvas, &[0], &ScoreColoring::Discrete(labels))
            .unwrap();

        let fig = canvas.last_figure().unwrap();
        let class_series: Vec<_> = fig.scatters().filter(|s| s.label.is_some()).collect();
        assert_eq!(class_series.len(), 3);
        assert_eq!(class_series[0].x, vec![1.0, 4.0]);
        assert_eq!(class_series[1].x, vec![0.0, 2.0, 5.0]);
        assert_eq!(
            fig.legend,
            vec!["a", "b", "c", "Hotelling T² 95% limit"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn discrete_outliers_keep_their_class_colour() {
        let model = synthetic_model(12, 2, 3, 14);
        let labels: Vec<String> = (0..12).map(|i| ["z", "x", "y"][i % 3].to_string()).collect();
        let mut canvas = RecordingCanvas::new();
        let boundary = PcaDiagnostics::new(&model)
            .plot_scores(&mut canvas, &[0, 1], &ScoreColoring::Discrete(labels.clone()))
            .unwrap();
        let outliers = boundary.outlier_indices();
        assert!(outliers.contains(&0));

        let mut classes = labels.clone();
        classes.sort();
        classes.dedup();
        let expected: Vec<Color> = outliers
            .iter()
            .map(|&i| {
                let rank = classes.iter().position(|c| *c == labels[i]).unwrap();
                Colormap::Set1.class_color(rank)
            })
            .collect();
        // Sample 0 is class "z", the third class in sorted order.
        assert_eq!(expected[0], Colormap::Set1.class_color(2));

        let fig = canvas.last_figure().unwrap();
        let overlay = fig.scatters().last().unwrap();
        assert_eq!(overlay.marker, Marker::Cross);
        assert_abs_diff_eq!(overlay.size_scale, 1.5);
        assert!(overlay.label.is_none());
        assert_eq!(overlay.colors, PointColors::PerPoint(expected));
        let xs: Vec<f64> = outliers.iter().map(|&i| model.scores()[[i, 0]]).collect();
        assert_eq!(overlay.x, xs);
    }

    #[test]
    fn boundary_honours_alpha() {
        let model = synthetic_model(25, 2, 3, 6);
        let diag = PcaDiagnostics::with_config(
            &model,
            DiagnosticsConfig {
                alpha: 0.01,
                ..DiagnosticsConfig::default()
            },
        );
        let strict = diag.score_boundary(&[0, 1], 0.01).unwrap();
        let loose = diag.score_boundary(&[0, 1], 0.10).unwrap();
        assert!(strict.t2[0] > loose.t2[0]);
        assert!(strict.ellipse.is_some());

        let mut canvas = RecordingCanvas::new();
        diag.plot_scores(&mut canvas, &[0], &ScoreColoring::Uniform).unwrap();
        assert_eq!(canvas.last_figure().unwrap().legend, vec!["Hotelling T² 99% limit".to_string()]);
    }
}

/// Reports fewer explained-variance ratios than components.
struct TruncatedRatios(FittedPca);

impl PcaOutputs for TruncatedRatios {
    fn scores(&self) -> ArrayView2<'_, f64> {
        self.0.scores()
    }

    fn loadings(&self) -> ArrayView2<'_, f64> {
        self.0.loadings()
    }

    fn ncomps(&self) -> usize {
        self.0.ncomps()
    }

    fn var_exp_ratio(&self) -> ArrayView1<'_, f64> {
        self.0.var_exp_ratio().slice_move(s![..1])
    }

    fn r2x(&self) -> f64 {
        self.0.r2x()
    }

    fn cv_parameters(&self) -> Option<&CvParameters> {
        self.0.cv_parameters()
    }
}

#[cfg(test)]
mod model_contract_tests {
    use super::*;

    #[test]
    fn short_variance_ratios_are_reported_not_indexed() {
        let model = TruncatedRatios(synthetic_model(10, 2, 3, 15));
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        for comps in [&[0, 1][..], &[1][..]] {
            assert!(matches!(
                diag.plot_scores(&mut canvas, comps, &ScoreColoring::Uniform),
                Err(DiagnosticsError::ShapeMismatch {
                    what: "explained variance ratios",
                    expected: 2,
                    found: 1
                })
            ));
        }
        assert!(matches!(
            diag.plot_loadings(&mut canvas, 1, false, 2.0),
            Err(DiagnosticsError::ShapeMismatch { .. })
        ));
        assert!(canvas.figures().is_empty());
    }
}

#[cfg(test)]
mod loading_plot_tests {
    use super::*;

    #[test]
    fn loadings_without_cv_have_no_band() {
        let model = synthetic_model(10, 2, 5, 7);
        let mut canvas = RecordingCanvas::new();
        PcaDiagnostics::new(&model)
            .plot_loadings(&mut canvas, 2, false, 2.0)
            .unwrap();

        let fig = canvas.last_figure().unwrap();
        assert_eq!(fig.elements.len(), 1);
        assert_eq!(fig.bands().count(), 0);
        match &fig.elements[0] {
            PlotElement::Line(line) => assert_eq!(line.y, model.loadings().row(1).to_vec()),
            other => panic!("expected a line, got {:?}", other),
        }
        assert_eq!(fig.x_label.as_deref(), Some("Variable No"));
        assert_eq!(fig.y_label.as_deref(), Some("Loading for PC2"));
    }

    #[test]
    fn cv_band_spans_sigma_stdevs() {
        let model = with_cv(synthetic_model(10, 2, 5, 8), 0.05);
        let mut canvas = RecordingCanvas::new();
        PcaDiagnostics::new(&model)
            .plot_loadings(&mut canvas, 1, false, 3.0)
            .unwrap();

        let band = canvas.last_figure().unwrap().bands().next().expect("band").clone();
        let mean = model.cv_parameters().unwrap().mean_loadings.as_ref().unwrap().row(0).to_vec();
        for j in 0..5 {
            assert_abs_diff_eq!(band.lower[j], mean[j] - 0.15, epsilon = 1e-12);
            assert_abs_diff_eq!(band.upper[j], mean[j] + 0.15, epsilon = 1e-12);
        }
    }

    #[test]
    fn bar_mode_uses_error_bars() {
        let model = with_cv(synthetic_model(10, 2, 4, 9), 0.1);
        let mut canvas = RecordingCanvas::new();
        PcaDiagnostics::new(&model)
            .plot_loadings(&mut canvas, 2, true, 2.0)
            .unwrap();

        let fig = canvas.last_figure().unwrap();
        assert!(matches!(fig.elements[0], PlotElement::Bars(ref b) if b.width == 0.2 && b.heights.len() == 4));
        match &fig.elements[1] {
            PlotElement::ErrorBars(e) => e.yerr.iter().for_each(|v| assert_abs_diff_eq!(*v, 0.2, epsilon = 1e-12)),
            other => panic!("expected error bars, got {:?}", other),
        }
    }

    #[test]
    fn loading_component_is_one_based() {
        let model = synthetic_model(10, 2, 4, 10);
        let diag = PcaDiagnostics::new(&model);
        let mut canvas = RecordingCanvas::new();
        assert!(matches!(
            diag.plot_loadings(&mut canvas, 0, false, 2.0),
            Err(DiagnosticsError::InvalidComponentSelection { .. })
        ));
        assert!(diag.plot_loadings(&mut canvas, 3, false, 2.0).is_err());
        assert!(diag.plot_loadings(&mut canvas, 1, false, f64::NAN).is_err());
        assert!(canvas.figures().is_empty());
    }

    #[test]
    fn model_parameters_with_cross_validation() {
        let plain = synthetic_model(10, 2, 3, 11);
        let diag = PcaDiagnostics::new(&plain);
        let mut canvas = RecordingCanvas::new();
        assert!(matches!(
            diag.plot_model_parameters(&mut canvas, ModelParameter::Loadings, 1, true, 2.0, false, None),
            Err(DiagnosticsError::MissingCrossValidation)
        ));
        assert!(matches!(
            diag.plot_model_parameters(&mut canvas, ModelParameter::Loadings, 1, false, 2.0, false, Some(&[1.0, 2.0][..])),
            Err(DiagnosticsError::ShapeMismatch { expected: 3, found: 2, .. })
        ));

        let model = with_cv(plain, 0.1);
        let wavelengths = [400.0, 500.0, 600.0];
        PcaDiagnostics::new(&model)
            .plot_model_parameters(&mut canvas, ModelParameter::Loadings, 1, true, 1.0, false, Some(&wavelengths[..]))
            .unwrap();
        let fig = canvas.last_figure().unwrap();
        let band = fig.bands().next().unwrap();
        assert_eq!(band.x, wavelengths.to_vec());
        assert_eq!(fig.y_label.as_deref(), Some("p for PCA component 1"));
        assert!(fig
            .elements
            .iter()
            .any(|e| matches!(e, PlotElement::Line(l) if l.y == model.cv_parameters().unwrap().mean_loadings.as_ref().unwrap().row(0).to_vec())));
    }
}

#[cfg(test)]
mod leverage_tests {
    use super::*;

    #[test]
    fn leverages_sum_to_component_count() {
        let model = synthetic_model(50, 3, 4, 12);
        let mut canvas = RecordingCanvas::new();
        let lev = PcaDiagnostics::new(&model).plot_leverages(&mut canvas).unwrap();
        assert_eq!(lev.len(), 50);
        assert_abs_diff_eq!(lev.sum(), 3.0, epsilon = 1e-9);
        assert!(lev.iter().all(|&h| h >= 0.0));

        let fig = canvas.last_figure().unwrap();
        let line = fig.reference_lines().next().unwrap();
        assert_abs_diff_eq!(line.value, 1.0 / 50.0);
        assert_eq!(line.span, Some((0.0, 50.0)));
        assert_eq!(fig.y_label.as_deref(), Some("Leverage"));
    }

    #[test]
    fn zero_variance_components_do_not_contribute() {
        let scores = array![[1.0, 0.0], [-1.0, 0.0], [2.0, 0.0]];
        let model = FittedPca::new(scores, Array2::zeros((2, 2)), array![0.9, 0.0], 0.9).unwrap();
        let lev = model.leverages().unwrap();
        assert_abs_diff_eq!(lev[2], 4.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn correlated_scores_use_full_hat_matrix() {
        // TᵀT = [[2, 1], [1, 2]]; every diagonal entry of the hat matrix is 2/3.
        let scores = array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let model = FittedPca::new(scores, Array2::zeros((2, 2)), array![0.6, 0.3], 0.9).unwrap();
        let lev = model.leverages().unwrap();
        for h in lev.iter() {
            assert_abs_diff_eq!(*h, 2.0 / 3.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(lev.sum(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn collinear_scores_are_rejected() {
        let scores = array![[1.0, 2.0], [2.0, 4.0], [-1.0, -2.0]];
        let model = FittedPca::new(scores, Array2::zeros((2, 2)), array![0.6, 0.3], 0.9).unwrap();
        let mut canvas = RecordingCanvas::new();
        assert!(matches!(
            PcaDiagnostics::new(&model).plot_leverages(&mut canvas),
            Err(DiagnosticsError::InvalidArgument(_))
        ));
        assert!(canvas.figures().is_empty());
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    #[test]
    fn snapshot_rejects_inconsistent_outputs() {
        assert!(matches!(
            FittedPca::new(Array2::zeros((4, 2)), Array2::zeros((3, 5)), Array1::zeros(2), 0.5),
            Err(DiagnosticsError::ShapeMismatch { what: "loading rows", .. })
        ));
        assert!(matches!(
            FittedPca::new(Array2::zeros((4, 2)), Array2::zeros((2, 5)), Array1::zeros(1), 0.5),
            Err(DiagnosticsError::ShapeMismatch { .. })
        ));
        let mut scores = Array2::zeros((4, 2));
        scores[[1, 1]] = f64::NAN;
        assert!(matches!(
            FittedPca::new(scores, Array2::zeros((2, 5)), Array1::zeros(2), 0.5),
            Err(DiagnosticsError::NonFiniteStatistic(_))
        ));

        let model = FittedPca::new(Array2::zeros((4, 2)), Array2::zeros((2, 5)), Array1::zeros(2), 0.5).unwrap();
        let bad_cv = CvParameters::new(0.4).with_loadings(Array2::zeros((2, 4)), Array2::zeros((2, 4)));
        assert!(model.with_cv_parameters(bad_cv).is_err());
    }

    #[test]
    fn cv_statistics_by_name() {
        let cv = CvParameters::new(0.42).with_loadings(Array2::ones((2, 3)), Array2::zeros((2, 3)));
        assert!(matches!(cv.statistic("Q2"), Some(crate::model::CvStatistic::Scalar(q)) if q == 0.42));
        assert!(matches!(cv.statistic("Mean_Loadings"), Some(crate::model::CvStatistic::Matrix(m)) if m.dim() == (2, 3)));
        assert!(cv.statistic("Unknown").is_none());
        assert!(CvParameters::new(0.1).statistic("Stdev_Loadings").is_none());
        assert!(cv.loading_band(2).is_none());
    }

    #[test]
    fn figures_serialize_for_external_renderers() {
        let model = synthetic_model(8, 2, 3, 13);
        let mut canvas = RecordingCanvas::new();
        PcaDiagnostics::new(&model)
            .plot_scores(&mut canvas, &[0, 1], &ScoreColoring::Uniform)
            .unwrap();
        let json = canvas.last_figure().unwrap().to_json().unwrap();
        assert!(json.contains("PCA score plot"));
        assert!(json.contains("\"Reference\""));
    }
}
