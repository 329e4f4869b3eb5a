//! SVG rendering of diagnostic figures with plotters.
//!
//! Requires the `plotting` feature. Documents are rendered into memory with
//! `SVGBackend::with_string`; writing them anywhere is left to the caller.

use std::collections::VecDeque;
use std::ops::Range;

use log::{debug, error};
use plotters::prelude::*;

use crate::chart::{
    self, Annotation, ChartCanvas, Colormap, Figure, LineStyle, Marker, Orientation, PlotElement,
    PointColors, RecordingCanvas, ScatterSeries,
};
use crate::error::{DiagnosticsError, Result};

/// Colours given to series that do not carry one, in drawing order.
const DEFAULT_CYCLE: [RGBColor; 4] = [
    RGBColor(31, 119, 180),  // Blue
    RGBColor(255, 127, 14),  // Orange
    RGBColor(44, 160, 44),   // Green
    RGBColor(148, 103, 189), // Purple
];

const COLORBAR_WIDTH: u32 = 70;
const COLORBAR_STEPS: i32 = 64;

fn render_err<E: std::fmt::Display>(e: E) -> DiagnosticsError {
    DiagnosticsError::Rendering(e.to_string())
}

fn rgb(color: chart::Color) -> RGBColor {
    RGBColor(color.r, color.g, color.b)
}

/// Splits a polyline into dash segments.
fn dashes(points: &[(f64, f64)]) -> Vec<Vec<(f64, f64)>> {
    const PIECES: usize = 24;
    points
        .windows(2)
        .flat_map(|pair| {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            (0..PIECES).step_by(2).map(move |k| {
                let at = |f: f64| (x0 + (x1 - x0) * f, y0 + (y1 - y0) * f);
                vec![
                    at(k as f64 / PIECES as f64),
                    at((k + 1) as f64 / PIECES as f64),
                ]
            })
        })
        .collect()
}

fn point_colors(series: &ScatterSeries, fallback: RGBColor) -> Vec<RGBColor> {
    let n = series.x.len();
    match &series.colors {
        PointColors::Uniform(color) => vec![color.map(rgb).unwrap_or(fallback); n],
        PointColors::Mapped {
            values,
            colormap,
            vmin,
            vmax,
        } => values
            .iter()
            .map(|&v| rgb(colormap.map_value(v, *vmin, *vmax)))
            .collect(),
        PointColors::PerPoint(colors) => colors.iter().map(|&c| rgb(c)).collect(),
    }
}

fn padded(values: &[f64]) -> Range<f64> {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    if hi - lo <= f64::EPSILON * lo.abs().max(1.0) {
        return (lo - 0.5)..(hi + 0.5);
    }
    let margin = (hi - lo) * 0.05;
    (lo - margin)..(hi + margin)
}

/// Axis ranges covering every element, unless the figure fixes its limits.
fn axis_ranges(figure: &Figure) -> (Range<f64>, Range<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for element in &figure.elements {
        match element {
            PlotElement::Scatter(s) => {
                xs.extend(&s.x);
                ys.extend(&s.y);
            }
            PlotElement::Line(l) => {
                xs.extend(&l.x);
                ys.extend(&l.y);
            }
            PlotElement::Bars(b) => {
                xs.extend(b.x.iter().flat_map(|x| [x - b.width / 2.0, x + b.width / 2.0]));
                ys.extend(&b.heights);
                ys.push(0.0);
            }
            PlotElement::Band(b) => {
                xs.extend(&b.x);
                ys.extend(&b.lower);
                ys.extend(&b.upper);
            }
            PlotElement::ErrorBars(e) => {
                xs.extend(&e.x);
                ys.extend(e.y.iter().zip(&e.yerr).flat_map(|(y, err)| [y - err, y + err]));
            }
            PlotElement::Reference(r) => {
                let (along, across) = match r.orientation {
                    Orientation::Horizontal => (&mut ys, &mut xs),
                    Orientation::Vertical => (&mut xs, &mut ys),
                };
                along.push(r.value);
                if let Some((a, b)) = r.span {
                    across.extend([a, b]);
                }
            }
            PlotElement::Violin(d) | PlotElement::Swarm(d) => {
                xs.extend([-0.5, d.samples.len() as f64 - 0.5]);
                ys.extend(d.samples.iter().flatten());
            }
            PlotElement::Colorbar { .. } => {}
        }
    }
    let x_range = figure.x_limits.map_or_else(|| padded(&xs), |(lo, hi)| lo..hi);
    let y_range = figure.y_limits.map_or_else(|| padded(&ys), |(lo, hi)| lo..hi);
    (x_range, y_range)
}

/// Gaussian kernel density outline of one violin, as `(half_width, y)` pairs.
fn violin_profile(samples: &[f64], max_half_width: f64) -> Vec<(f64, f64)> {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let sd = (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let bandwidth = 1.06 * sd * n.powf(-0.2);
    if !(bandwidth > 0.0) {
        return vec![(max_half_width, mean), (max_half_width, mean)];
    }

    let (lo, hi) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let grid: Vec<f64> = (0..=40)
        .map(|k| lo - bandwidth + (hi - lo + 2.0 * bandwidth) * k as f64 / 40.0)
        .collect();
    let density: Vec<f64> = grid
        .iter()
        .map(|&y| {
            samples
                .iter()
                .map(|&s| (-0.5 * ((y - s) / bandwidth).powi(2)).exp())
                .sum::<f64>()
        })
        .collect();
    let peak = density.iter().cloned().fold(0.0, f64::max);
    grid.into_iter()
        .zip(density)
        .map(|(y, d)| (max_half_width * d / peak, y))
        .collect()
}

/// Renders one figure to an SVG document of `size` pixels.
pub fn render_svg(figure: &Figure, size: (u32, u32)) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;

        let colorbar = figure.elements.iter().find_map(|e| match e {
            PlotElement::Colorbar {
                colormap,
                vmin,
                vmax,
            } => Some((*colormap, *vmin, *vmax)),
            _ => None,
        });
        let (x_range, y_range) = axis_ranges(figure);
        let (x_span, y_span) = ((x_range.start, x_range.end), (y_range.start, y_range.end));

        let mut chart = ChartBuilder::on(&root)
            .caption(
                figure.title.as_deref().unwrap_or(""),
                ("sans-serif", 20).into_font(),
            )
            .margin(10)
            .margin_right(if colorbar.is_some() { COLORBAR_WIDTH } else { 10 })
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_range, y_range)
            .map_err(render_err)?;

        let tick_labels = figure.x_tick_labels.clone().unwrap_or_default();
        let tick_formatter = |x: &f64| {
            let idx = x.round();
            if (x - idx).abs() < 1e-6 && idx >= 0.0 {
                tick_labels.get(idx as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        };
        {
            let mut mesh = chart.configure_mesh();
            mesh.x_desc(figure.x_label.clone().unwrap_or_default())
                .y_desc(figure.y_label.clone().unwrap_or_default());
            if !tick_labels.is_empty() {
                mesh.x_labels(tick_labels.len() + 1)
                    .x_label_formatter(&tick_formatter);
            }
            mesh.draw().map_err(render_err)?;
        }

        // Legend entries without a labelled scatter go to bars and dashed lines, in order.
        let mut pending: VecDeque<String> = figure
            .legend
            .iter()
            .filter(|entry| {
                !figure.scatters().any(|s| s.label.as_deref() == Some(entry.as_str()))
            })
            .cloned()
            .collect();
        let mut labelled = false;
        let mut cycle = DEFAULT_CYCLE.iter().cycle();

        for element in &figure.elements {
            match element {
                PlotElement::Scatter(series) => {
                    let colors = point_colors(series, DEFAULT_CYCLE[0]);
                    let first = colors.first().copied().unwrap_or(DEFAULT_CYCLE[0]);
                    let radius = ((3.0 * series.size_scale.sqrt()).round() as i32).max(1);
                    let points = series
                        .x
                        .iter()
                        .copied()
                        .zip(series.y.iter().copied())
                        .zip(colors);
                    let anno = match series.marker {
                        Marker::Circle => chart.draw_series(
                            points.map(|(p, c)| Circle::new(p, radius, c.filled())),
                        ),
                        Marker::Cross => chart.draw_series(
                            points.map(|(p, c)| Cross::new(p, radius + 1, c.stroke_width(2))),
                        ),
                    }
                    .map_err(render_err)?;
                    if let Some(label) = &series.label {
                        anno.label(label.as_str())
                            .legend(move |(x, y)| Circle::new((x, y), 4, first.filled()));
                        labelled = true;
                    }
                }
                PlotElement::Line(line) => {
                    let color = line.color.map(rgb).unwrap_or(DEFAULT_CYCLE[0]);
                    let points: Vec<(f64, f64)> =
                        line.x.iter().copied().zip(line.y.iter().copied()).collect();
                    match line.style {
                        LineStyle::Solid => {
                            chart
                                .draw_series(LineSeries::new(points, color.stroke_width(2)))
                                .map_err(render_err)?;
                        }
                        LineStyle::Dashed => {
                            chart
                                .draw_series(
                                    dashes(&points)
                                        .into_iter()
                                        .map(|seg| PathElement::new(seg, color.stroke_width(2))),
                                )
                                .map_err(render_err)?;
                        }
                    }
                }
                PlotElement::Bars(bars) => {
                    let color = match bars.color {
                        Some(c) => rgb(c),
                        None => *cycle.next().unwrap_or(&DEFAULT_CYCLE[0]),
                    };
                    let half = bars.width / 2.0;
                    let anno = chart
                        .draw_series(bars.x.iter().zip(&bars.heights).map(|(&x, &h)| {
                            Rectangle::new([(x - half, 0.0), (x + half, h)], color.filled())
                        }))
                        .map_err(render_err)?;
                    if let Some(label) = pending.pop_front() {
                        anno.label(label).legend(move |(x, y)| {
                            Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled())
                        });
                        labelled = true;
                    }
                }
                PlotElement::Band(band) => {
                    let outline: Vec<(f64, f64)> = band
                        .x
                        .iter()
                        .copied()
                        .zip(band.upper.iter().copied())
                        .chain(
                            band.x
                                .iter()
                                .copied()
                                .zip(band.lower.iter().copied())
                                .rev(),
                        )
                        .collect();
                    let fill = rgb(band.color).mix(band.alpha).filled();
                    chart
                        .draw_series(std::iter::once(Polygon::new(outline, fill)))
                        .map_err(render_err)?;
                }
                PlotElement::ErrorBars(bars) => {
                    chart
                        .draw_series(bars.x.iter().zip(&bars.y).zip(&bars.yerr).map(
                            |((&x, &y), &err)| {
                                ErrorBar::new_vertical(x, y - err, y, y + err, BLACK.filled(), 6)
                            },
                        ))
                        .map_err(render_err)?;
                }
                PlotElement::Reference(reference) => {
                    let color = rgb(reference.color);
                    let (from, to) = match reference.orientation {
                        Orientation::Horizontal => {
                            let (a, b) = reference.span.unwrap_or(x_span);
                            ((a, reference.value), (b, reference.value))
                        }
                        Orientation::Vertical => {
                            let (a, b) = reference.span.unwrap_or(y_span);
                            ((reference.value, a), (reference.value, b))
                        }
                    };
                    let segments = match reference.style {
                        LineStyle::Solid => vec![vec![from, to]],
                        LineStyle::Dashed => dashes(&[from, to]),
                    };
                    let anno = chart
                        .draw_series(
                            segments
                                .into_iter()
                                .map(|seg| PathElement::new(seg, color.stroke_width(1))),
                        )
                        .map_err(render_err)?;
                    if reference.style == LineStyle::Dashed {
                        if let Some(label) = pending.pop_front() {
                            anno.label(label).legend(move |(x, y)| {
                                PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(1))
                            });
                            labelled = true;
                        }
                    }
                }
                PlotElement::Violin(dist) => {
                    for (group, samples) in dist.samples.iter().enumerate() {
                        if samples.is_empty() {
                            continue;
                        }
                        let color = match (dist.color, dist.palette) {
                            (Some(c), _) => rgb(c),
                            (None, Some(palette)) => rgb(palette.class_color(group)),
                            (None, None) => DEFAULT_CYCLE[0],
                        };
                        let centre = group as f64;
                        let profile = violin_profile(samples, 0.4);
                        let outline: Vec<(f64, f64)> = profile
                            .iter()
                            .map(|&(w, y)| (centre + w, y))
                            .chain(profile.iter().rev().map(|&(w, y)| (centre - w, y)))
                            .collect();
                        chart
                            .draw_series(std::iter::once(Polygon::new(
                                outline,
                                color.mix(0.6).filled(),
                            )))
                            .map_err(render_err)?;
                    }
                }
                PlotElement::Swarm(dist) => {
                    let color = dist.color.map(rgb).unwrap_or(BLACK);
                    for (group, samples) in dist.samples.iter().enumerate() {
                        let mut ordered = samples.clone();
                        ordered.sort_by(f64::total_cmp);
                        chart
                            .draw_series(ordered.into_iter().enumerate().map(|(rank, y)| {
                                let offset = ((rank % 5) as f64 - 2.0) * 0.04;
                                Circle::new((group as f64 + offset, y), 2, color.filled())
                            }))
                            .map_err(render_err)?;
                    }
                }
                PlotElement::Colorbar { .. } => {}
            }
        }

        if labelled {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(render_err)?;
        }

        if let Some((colormap, vmin, vmax)) = colorbar {
            draw_colorbar(&root, colormap, vmin, vmax)?;
        }
        root.present().map_err(render_err)?;
    }
    Ok(svg)
}

fn draw_colorbar(
    root: &DrawingArea<SVGBackend<'_>, plotters::coord::Shift>,
    colormap: Colormap,
    vmin: f64,
    vmax: f64,
) -> Result<()> {
    let (width, height) = root.dim_in_pixel();
    let left = width as i32 - COLORBAR_WIDTH as i32 + 10;
    let (top, bottom) = (40, height as i32 - 60);
    let step = ((bottom - top) / COLORBAR_STEPS).max(1);
    for k in 0..COLORBAR_STEPS {
        let value = vmax - (vmax - vmin) * k as f64 / (COLORBAR_STEPS - 1) as f64;
        let color = rgb(colormap.map_value(value, vmin, vmax));
        let y = top + k * step;
        root.draw(&Rectangle::new([(left, y), (left + 15, y + step)], color.filled()))
            .map_err(render_err)?;
    }
    for (text, y) in [(vmax, top), (vmin, top + COLORBAR_STEPS * step)] {
        root.draw(&Text::new(
            format!("{:.2}", text),
            (left + 18, y),
            ("sans-serif", 12).into_font(),
        ))
        .map_err(render_err)?;
    }
    Ok(())
}

/// Canvas that renders every finished figure to an SVG document.
///
/// The figures themselves are kept as well, so the same canvas can feed both a
/// viewer and a JSON export.
#[derive(Debug)]
pub struct SvgCanvas {
    recorder: RecordingCanvas,
    size: (u32, u32),
    documents: Vec<String>,
    failures: Vec<String>,
}

impl Default for SvgCanvas {
    fn default() -> Self {
        Self::new((800, 600))
    }
}

impl SvgCanvas {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            recorder: RecordingCanvas::new(),
            size,
            documents: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Rendered SVG documents, one per successfully rendered figure.
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn figures(&self) -> &[Figure] {
        self.recorder.figures()
    }

    /// Messages of figures that failed to render.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn into_documents(self) -> Vec<String> {
        self.documents
    }
}

impl ChartCanvas for SvgCanvas {
    fn begin_figure(&mut self) {
        self.recorder.begin_figure();
    }

    fn draw(&mut self, element: PlotElement) {
        self.recorder.draw(element);
    }

    fn annotate(&mut self, annotation: Annotation) {
        self.recorder.annotate(annotation);
    }

    fn show(&mut self) {
        let before = self.recorder.figures().len();
        self.recorder.show();
        if self.recorder.figures().len() == before {
            return;
        }
        let Some(figure) = self.recorder.last_figure() else {
            return;
        };
        match render_svg(figure, self.size) {
            Ok(document) => {
                debug!(
                    "Rendered figure {:?} to {} bytes of SVG",
                    figure.title,
                    document.len()
                );
                self.documents.push(document);
            }
            Err(e) => {
                error!("Failed to render figure {:?}: {}", figure.title, e);
                self.failures.push(e.to_string());
            }
        }
    }
}
