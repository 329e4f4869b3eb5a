//! Backend-neutral chart descriptions.
//!
//! Diagnostics never draw pixels. They emit [`PlotElement`]s and [`Annotation`]s into a
//! [`ChartCanvas`] handle passed in by the caller; a rendering backend implements the
//! trait, and [`RecordingCanvas`] keeps the resulting [`Figure`]s as plain data.

use serde::{Deserialize, Serialize};

/// An sRGB colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const RED: Color = Color::rgb(214, 39, 40);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Colormaps the backend applies to mapped point values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Colormap {
    /// Continuous blue-to-red map.
    Jet,
    /// Qualitative palette for class labels.
    Set1,
}

const SET1: [Color; 9] = [
    Color::rgb(228, 26, 28),   // Red
    Color::rgb(55, 126, 184),  // Blue
    Color::rgb(77, 175, 74),   // Green
    Color::rgb(152, 78, 163),  // Purple
    Color::rgb(255, 127, 0),   // Orange
    Color::rgb(255, 255, 51),  // Yellow
    Color::rgb(166, 86, 40),   // Brown
    Color::rgb(247, 129, 191), // Pink
    Color::rgb(153, 153, 153), // Gray
];

impl Colormap {
    /// Colour of the `index`-th class. Only meaningful for qualitative maps;
    /// continuous maps sample evenly across nine stops.
    pub fn class_color(&self, index: usize) -> Color {
        match self {
            Colormap::Set1 => SET1[index % SET1.len()],
            Colormap::Jet => {
                let t = (index % 9) as f64 / 8.0;
                Colormap::jet(t)
            }
        }
    }

    /// Colour of `value` normalised to `[vmin, vmax]`. A degenerate range maps to the
    /// middle of the map; qualitative maps treat the value as a class index.
    pub fn map_value(&self, value: f64, vmin: f64, vmax: f64) -> Color {
        match self {
            Colormap::Set1 => self.class_color(value.max(0.0) as usize),
            Colormap::Jet => {
                let t = if vmax > vmin {
                    ((value - vmin) / (vmax - vmin)).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                Colormap::jet(t)
            }
        }
    }

    /// Piecewise-linear jet map on `t` in [0, 1].
    fn jet(t: f64) -> Color {
        let channel = |offset: f64| {
            let v = 1.5 - (4.0 * t - offset).abs();
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        Color::rgb(channel(3.0), channel(2.0), channel(1.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStyle {
    Solid,
    Dashed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    Circle,
    Cross,
}

/// How the points of a scatter series are coloured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PointColors {
    /// Backend default colour when `None`.
    Uniform(Option<Color>),
    /// One value per point, mapped through `colormap` normalised to `[vmin, vmax]`.
    Mapped {
        values: Vec<f64>,
        colormap: Colormap,
        vmin: f64,
        vmax: f64,
    },
    /// One explicit colour per point.
    PerPoint(Vec<Color>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScatterSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub marker: Marker,
    /// Multiple of the backend's default marker area.
    pub size_scale: f64,
    pub colors: PointColors,
    pub label: Option<String>,
}

impl ScatterSeries {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            x,
            y,
            marker: Marker::Circle,
            size_scale: 1.0,
            colors: PointColors::Uniform(None),
            label: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub color: Option<Color>,
    pub style: LineStyle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    /// Bar centres.
    pub x: Vec<f64>,
    pub heights: Vec<f64>,
    pub width: f64,
    pub color: Option<Color>,
}

/// Region filled between `lower` and `upper` along `x`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadedBand {
    pub x: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub color: Color,
    pub alpha: f64,
}

/// Symmetric vertical error bars of half-length `yerr` around `y`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBars {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub yerr: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// A constant reference line. `span` limits its extent along the other axis;
/// `None` spans the whole axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub orientation: Orientation,
    pub value: f64,
    pub span: Option<(f64, f64)>,
    pub color: Color,
    pub style: LineStyle,
}

/// A distribution per group, drawn at positions `0..samples.len()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionSeries {
    pub samples: Vec<Vec<f64>>,
    pub palette: Option<Colormap>,
    pub color: Option<Color>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlotElement {
    Scatter(ScatterSeries),
    Line(LineSeries),
    Bars(BarSeries),
    Band(ShadedBand),
    ErrorBars(ErrorBars),
    Reference(ReferenceLine),
    /// Kernel-density violins, one per group.
    Violin(DistributionSeries),
    /// Non-overlapping point overlay, one column per group.
    Swarm(DistributionSeries),
    Colorbar {
        colormap: Colormap,
        vmin: f64,
        vmax: f64,
    },
}

/// Figure-level decorations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Annotation {
    Title(String),
    XLabel(String),
    YLabel(String),
    XLimits(f64, f64),
    YLimits(f64, f64),
    XTickLabels(Vec<String>),
    Legend(Vec<String>),
}

/// A chart backend.
///
/// Each diagnostic calls `begin_figure` once, then any number of `draw`/`annotate`
/// calls, and finishes with `show`.
pub trait ChartCanvas {
    fn begin_figure(&mut self);

    fn draw(&mut self, element: PlotElement);

    fn annotate(&mut self, annotation: Annotation);

    /// Finishes the current figure. Blocks until the backend has displayed or stored it.
    fn show(&mut self);
}

/// A finished chart description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub x_limits: Option<(f64, f64)>,
    pub y_limits: Option<(f64, f64)>,
    pub x_tick_labels: Option<Vec<String>>,
    pub legend: Vec<String>,
    pub elements: Vec<PlotElement>,
}

impl Figure {
    fn apply(&mut self, annotation: Annotation) {
        match annotation {
            Annotation::Title(t) => self.title = Some(t),
            Annotation::XLabel(l) => self.x_label = Some(l),
            Annotation::YLabel(l) => self.y_label = Some(l),
            Annotation::XLimits(lo, hi) => self.x_limits = Some((lo, hi)),
            Annotation::YLimits(lo, hi) => self.y_limits = Some((lo, hi)),
            Annotation::XTickLabels(ticks) => self.x_tick_labels = Some(ticks),
            Annotation::Legend(entries) => self.legend = entries,
        }
    }

    pub fn scatters(&self) -> impl Iterator<Item = &ScatterSeries> {
        self.elements.iter().filter_map(|e| match e {
            PlotElement::Scatter(s) => Some(s),
            _ => None,
        })
    }

    pub fn reference_lines(&self) -> impl Iterator<Item = &ReferenceLine> {
        self.elements.iter().filter_map(|e| match e {
            PlotElement::Reference(r) => Some(r),
            _ => None,
        })
    }

    pub fn bands(&self) -> impl Iterator<Item = &ShadedBand> {
        self.elements.iter().filter_map(|e| match e {
            PlotElement::Band(b) => Some(b),
            _ => None,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Canvas that keeps every finished figure in memory.
///
/// Drawing without an open figure implicitly opens one.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    current: Option<Figure>,
    figures: Vec<Figure>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }

    pub fn last_figure(&self) -> Option<&Figure> {
        self.figures.last()
    }

    pub fn into_figures(self) -> Vec<Figure> {
        self.figures
    }
}

impl ChartCanvas for RecordingCanvas {
    fn begin_figure(&mut self) {
        if let Some(unfinished) = self.current.take() {
            log::debug!("Discarding unfinished figure with {} elements", unfinished.elements.len());
        }
        self.current = Some(Figure::default());
    }

    fn draw(&mut self, element: PlotElement) {
        self.current.get_or_insert_with(Figure::default).elements.push(element);
    }

    fn annotate(&mut self, annotation: Annotation) {
        self.current.get_or_insert_with(Figure::default).apply(annotation);
    }

    fn show(&mut self) {
        if let Some(figure) = self.current.take() {
            self.figures.push(figure);
        }
    }
}
