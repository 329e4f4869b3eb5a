// Diagnostic charts for principal component analysis (PCA) models

#![doc = include_str!("../README.md")]

pub mod chart;
pub mod cross_validation;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod statistics;
#[cfg(feature = "plotting")]
pub mod svg;

pub use chart::{ChartCanvas, Figure, PlotElement, RecordingCanvas};
pub use cross_validation::{CrossValidator, Fold, KFold};
pub use diagnostics::{
    DiagnosticsConfig, DmodxSummary, ModelParameter, PcaDiagnostics, ScoreBoundary, ScoreColoring,
    ScreeSummary,
};
pub use error::{DiagnosticsError, ThreadSafeStdError};
pub use model::{CvParameters, CvStatistic, FittedPca, PcaOutputs, RefittablePca};
#[cfg(feature = "plotting")]
pub use svg::{render_svg, SvgCanvas};

#[cfg(test)]
mod diagnostics_tests;
