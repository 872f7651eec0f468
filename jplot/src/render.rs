//! Turn a snapshot of the dashboard into an image.
//!
//! Graphs are stacked top to bottom in equal-height panels. Each panel carries
//! its title, a legend with the latest value of every field, y-axis labels at
//! the top, middle and bottom of its range and a plot of every field's
//! history, oldest sample on the left. Panels too short to hold their text
//! show only the plot.
//!
//! The vertical range of a panel spans from zero, or the smallest sample if
//! any is negative, to the largest sample across all of the panel's fields.
//! `min` and `max` hints replace either end. Gaps are drawn as breaks.
//!
//! Rendering is a pure function of its inputs: the same graphs, snapshot and
//! size always produce the same PNG bytes. Text is set in a font compiled into
//! the binary, never one looked up on the host.

use std::{io::Cursor, sync::OnceLock};

use image::{DynamicImage, ImageFormat, RgbImage};
use plotters::{
    coord::Shift,
    prelude::*,
    style::{FontStyle, register_font},
};

use crate::{
    series::{Sample, Snapshot},
    spec::{Format, GraphSpec, Hints},
};

pub mod format;

const FONT: &str = "jplot-mono";

const BACKGROUND: RGBColor = RGBColor(24, 26, 31);
const FOREGROUND: RGBColor = RGBColor(220, 223, 228);
const MUTED: RGBColor = RGBColor(130, 137, 151);
const GRID: RGBColor = RGBColor(48, 52, 61);
const FRAME: RGBColor = RGBColor(88, 94, 107);
const PALETTE: [RGBColor; 8] = [
    RGBColor(97, 175, 239),
    RGBColor(229, 192, 123),
    RGBColor(152, 195, 121),
    RGBColor(224, 108, 117),
    RGBColor(198, 120, 221),
    RGBColor(86, 182, 194),
    RGBColor(209, 154, 102),
    RGBColor(171, 178, 191),
];
const FILL_OPACITY: f64 = 0.22;
const LINE_WIDTH: u32 = 2;
const DOT_RADIUS: u32 = 2;

/// Text height in pixels, and the larger one used on big panels.
const TEXT: u32 = 12;
const LARGE_TEXT: u32 = 20;
/// Panels at least this tall and wide get the larger text.
const LARGE_PANEL: Size = Size {
    width: 480,
    height: 240,
};
/// Smallest plot, in text lines, worth giving up the header for.
const MIN_PLOT_LINES: u32 = 3;
/// Smallest plot side in pixels that is drawn at all.
const MIN_PLOT: u32 = 4;

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`render`]
pub enum Error {
    /// The PNG encoder failed.
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    /// Drawing into the frame buffer failed.
    #[error("failed to draw: {0}")]
    Draw(String),
    /// The embedded font could not be loaded.
    #[error("failed to load embedded font")]
    Font,
    /// The frame buffer does not match the image size.
    #[error("frame buffer does not fit a {width}x{height} image")]
    Buffer {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// The snapshot holds no series for a graph.
    #[error("snapshot has no series for graph {graph}")]
    MissingGraph {
        /// Index of the graph.
        graph: usize,
    },
}

impl<E> From<DrawingAreaErrorKind<E>> for Error
where
    E: std::error::Error + Send + Sync,
{
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        Self::Draw(err.to_string())
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Smallest width or height an image is rendered at.
    pub const MIN: u32 = 64;
    /// Largest width or height an image is rendered at.
    pub const MAX: u32 = 4096;

    /// This size with both dimensions clamped to [`Size::MIN`] and
    /// [`Size::MAX`].
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.clamp(Self::MIN, Self::MAX),
            height: self.height.clamp(Self::MIN, Self::MAX),
        }
    }
}

fn load_font() -> Result<(), Error> {
    static LOADED: OnceLock<bool> = OnceLock::new();
    let loaded = *LOADED.get_or_init(|| {
        register_font(FONT, FontStyle::Normal, epaint_default_fonts::HACK_REGULAR).is_ok()
    });
    if loaded { Ok(()) } else { Err(Error::Font) }
}

/// Render `graphs` with the data in `snapshot` as a PNG of `size`, clamped to
/// the supported range.
///
/// # Errors
///
/// Function will return an error if `snapshot` was not taken from a store
/// built for `graphs`, or if drawing or PNG encoding fails.
pub fn render(graphs: &[GraphSpec], snapshot: &Snapshot, size: Size) -> Result<Vec<u8>, Error> {
    let size = size.clamped();
    load_font()?;

    let pixels = usize::try_from(u64::from(size.width) * u64::from(size.height) * 3)
        .map_err(|_| Error::Buffer {
            width: size.width,
            height: size.height,
        })?;
    let mut buffer = vec![0u8; pixels];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (size.width, size.height))
            .into_drawing_area();
        root.fill(&BACKGROUND)?;
        let panels = root.split_evenly((graphs.len().max(1), 1));
        for (idx, (graph, panel)) in graphs.iter().zip(&panels).enumerate() {
            let series = snapshot
                .graph(idx)
                .ok_or(Error::MissingGraph { graph: idx })?;
            draw_panel(panel, graph, series, snapshot.steps())?;
        }
        root.present()?;
    }

    let image = RgbImage::from_raw(size.width, size.height, buffer).ok_or(Error::Buffer {
        width: size.width,
        height: size.height,
    })?;
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    lo: f64,
    hi: f64,
}

impl Bounds {
    fn of(hints: &Hints, series: &[Vec<Sample>]) -> Self {
        let (min, max) = series
            .iter()
            .flatten()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
                (min.min(*v), max.max(*v))
            });
        let observed = min <= max;

        let lo = hints
            .min
            .unwrap_or(if observed { min.min(0.0) } else { 0.0 });
        let hi = hints.max.unwrap_or(if observed { max } else { 1.0 });
        let hi = if hi > lo { hi } else { lo + 1.0 };
        Self { lo, hi }
    }

    fn mid(self) -> f64 {
        self.lo + (self.hi - self.lo) / 2.0
    }

    /// Where filled areas end: zero when it is in range, else the nearer bound.
    fn baseline(self) -> f64 {
        0.0_f64.clamp(self.lo, self.hi)
    }

    /// `value` pinned to the nearest edge when it falls outside.
    fn pin(self, value: f64) -> f64 {
        value.clamp(self.lo, self.hi)
    }
}

fn palette(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Horizontal position of sample `idx`.
fn position(idx: usize) -> f64 {
    f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
}

fn text(size: u32, color: RGBColor) -> TextStyle<'static> {
    FontDesc::new(FontFamily::Name(FONT), f64::from(size), FontStyle::Normal).color(&color)
}

/// The format shared by every field of a graph, plain if they differ.
fn axis_format(graph: &GraphSpec) -> Format {
    let mut formats = graph.fields.iter().map(|field| field.format);
    match formats.next() {
        Some(first) if formats.all(|format| format == first) => first,
        _ => Format::Plain,
    }
}

/// Consecutive present samples of a series as plot points. A gap ends a run.
fn runs(samples: &[Sample], bounds: Bounds) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut run = Vec::new();
    for (idx, sample) in samples.iter().enumerate() {
        match sample {
            Some(value) => run.push((position(idx), bounds.pin(*value))),
            None if !run.is_empty() => runs.push(std::mem::take(&mut run)),
            None => {}
        }
    }
    if !run.is_empty() {
        runs.push(run);
    }
    runs
}

/// Text metrics for a panel of `width` by `height` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Metrics {
    text: u32,
    pad: u32,
    line: u32,
}

impl Metrics {
    fn of(width: u32, height: u32) -> Self {
        let text = if width >= LARGE_PANEL.width && height >= LARGE_PANEL.height {
            LARGE_TEXT
        } else {
            TEXT
        };
        Self {
            text,
            pad: text / 3,
            line: text + text / 2,
        }
    }

    /// Height of a header with a title and `legend_rows` rows of legend.
    fn header(self, legend_rows: u32) -> u32 {
        self.pad + self.line * (1 + legend_rows)
    }

    /// Whether a panel `height` pixels tall fits the header and a usable plot.
    fn fits_text(self, height: u32, legend_rows: u32) -> bool {
        self.header(legend_rows) + self.line * MIN_PLOT_LINES + self.pad <= height
    }
}

/// A legend entry: where it goes and what it says.
#[derive(Debug)]
struct Entry {
    x: i32,
    row: u32,
    field: usize,
    label: String,
}

fn legend(
    panel: &Area<'_>,
    graph: &GraphSpec,
    series: &[Vec<Sample>],
    metrics: Metrics,
) -> Result<Vec<Entry>, Error> {
    let (width, _) = panel.dim_in_pixel();
    let style = text(metrics.text, FOREGROUND);
    let pad = to_i32(metrics.pad);
    let swatch = to_i32(metrics.text * 2 / 3);
    let right = to_i32(width) - pad;

    let mut entries = Vec::with_capacity(graph.fields.len());
    let (mut x, mut row) = (pad, 0);
    for (field, (spec, samples)) in graph.fields.iter().zip(series).enumerate() {
        let latest = samples.last().copied().flatten();
        let label = format!(
            "{} {}",
            spec.name,
            format::legend(latest, spec.kind, spec.format)
        );
        let (label_width, _) = panel.estimate_text_size(&label, &style)?;
        let entry_width = swatch + pad + to_i32(label_width);
        if x > pad && x + entry_width > right {
            x = pad;
            row += 1;
        }
        entries.push(Entry {
            x,
            row,
            field,
            label,
        });
        x += entry_width + 2 * pad;
    }
    Ok(entries)
}

fn draw_panel(
    panel: &Area<'_>,
    graph: &GraphSpec,
    series: &[Vec<Sample>],
    steps: usize,
) -> Result<(), Error> {
    let (width, height) = panel.dim_in_pixel();
    let metrics = Metrics::of(width, height);
    let bounds = Bounds::of(&graph.hints, series);

    let entries = legend(panel, graph, series, metrics)?;
    let legend_rows = entries.last().map_or(0, |entry| entry.row + 1);
    if !metrics.fits_text(height, legend_rows) {
        return draw_plot(panel, graph, series, steps, bounds, None);
    }

    let title = match &graph.hints.unit {
        Some(unit) => format!("{} ({unit})", graph.title),
        None => graph.title.clone(),
    };
    let pad = to_i32(metrics.pad);
    let style = text(metrics.text, FOREGROUND);
    panel.draw_text(&title, &style, (pad, pad))?;

    let swatch = to_i32(metrics.text * 2 / 3);
    let inset = (to_i32(metrics.text) - swatch) / 2;
    for entry in &entries {
        let y = pad + to_i32(metrics.line * (1 + entry.row));
        panel.draw(&Rectangle::new(
            [(entry.x, y + inset), (entry.x + swatch, y + inset + swatch)],
            palette(entry.field).filled(),
        ))?;
        panel.draw_text(&entry.label, &style, (entry.x + swatch + pad, y))?;
    }

    let (_, body) = panel.split_vertically(metrics.header(legend_rows));
    draw_plot(&body, graph, series, steps, bounds, Some(metrics))
}

/// Plot every series of a graph into `area`. With `metrics` the y axis is
/// labelled, without it only the plot is drawn.
fn draw_plot(
    area: &Area<'_>,
    graph: &GraphSpec,
    series: &[Vec<Sample>],
    steps: usize,
    bounds: Bounds,
    metrics: Option<Metrics>,
) -> Result<(), Error> {
    let (width, height) = area.dim_in_pixel();
    let format = axis_format(graph);
    let labels = [bounds.hi, bounds.mid(), bounds.lo];

    let mut builder = ChartBuilder::on(area);
    let label_style = match metrics {
        Some(metrics) => {
            let style = text(metrics.text, MUTED);
            let mut label_width = 0;
            for label in labels {
                let (w, _) = area.estimate_text_size(&format::value(label, format), &style)?;
                label_width = label_width.max(w);
            }
            if width < label_width + 2 * metrics.pad + MIN_PLOT {
                return Ok(());
            }
            builder
                .margin_top(metrics.line / 2)
                .margin_bottom(metrics.line / 2)
                .margin_right(metrics.pad)
                .y_label_area_size(label_width + 2 * metrics.pad);
            style
        }
        None => {
            let pad = Metrics::of(width, height).pad;
            if width < 2 * pad + MIN_PLOT || height < 2 * pad + MIN_PLOT {
                return Ok(());
            }
            builder.margin(pad);
            text(TEXT, MUTED)
        }
    };

    let x_range = if steps > 1 {
        0.0..position(steps - 1)
    } else {
        -1.0..1.0
    };
    let y_range = (bounds.lo..bounds.hi).with_key_points(labels.to_vec());
    let mut chart = builder.build_cartesian_2d(x_range.clone(), y_range)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_x_axis()
        .x_labels(0)
        .y_labels(labels.len())
        .max_light_lines(0)
        .bold_line_style(GRID)
        .axis_style(FRAME)
        .label_style(label_style)
        .y_label_formatter(&|value| format::value(*value, format))
        .draw()?;

    let runs: Vec<_> = series
        .iter()
        .map(|samples| runs(samples, bounds))
        .collect();

    // Areas first so no fill covers a line.
    for (idx, field_runs) in runs.iter().enumerate() {
        let fill = palette(idx).mix(FILL_OPACITY);
        for run in field_runs.iter().filter(|run| run.len() > 1) {
            chart.draw_series(AreaSeries::new(
                run.iter().copied(),
                bounds.baseline(),
                fill,
            ))?;
        }
    }
    for (idx, field_runs) in runs.iter().enumerate() {
        let color = palette(idx);
        for run in field_runs {
            if let [point] = run.as_slice() {
                chart.draw_series(std::iter::once(Circle::new(
                    *point,
                    DOT_RADIUS,
                    color.filled(),
                )))?;
            } else {
                chart.draw_series(LineSeries::new(
                    run.iter().copied(),
                    color.stroke_width(LINE_WIDTH),
                ))?;
            }
        }
    }

    chart.draw_series(std::iter::once(Rectangle::new(
        [(x_range.start, bounds.lo), (x_range.end, bounds.hi)],
        FRAME.stroke_width(1),
    )))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Instant};

    use image::GenericImageView;

    use super::*;
    use crate::{
        series::{FieldId, Store},
        spec::compile,
    };

    fn fixture(specs: &[&str], steps: usize) -> (Vec<GraphSpec>, Store) {
        let graphs = compile(specs).expect("spec");
        let store = Store::new(&graphs, NonZeroUsize::new(steps).expect("non-zero"));
        (graphs, store)
    }

    fn decode(png: &[u8]) -> image::DynamicImage {
        image::load_from_memory(png).expect("valid png")
    }

    fn count(image: &image::DynamicImage, color: RGBColor) -> usize {
        image
            .to_rgb8()
            .pixels()
            .filter(|pixel| pixel.0 == [color.0, color.1, color.2])
            .count()
    }

    /// Pixels close to the text colour. Nothing but text is drawn this bright.
    fn bright(image: &image::DynamicImage) -> usize {
        image
            .to_rgb8()
            .pixels()
            .filter(|pixel| pixel.0.iter().all(|channel| *channel > 150))
            .count()
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let (graphs, store) = fixture(&["CPU usage=cpu.percent:percent", "Net rx=rx:rate:bytes"], 10);
        let now = Instant::now();
        for (i, v) in [10.0, 20.0, 15.0, 40.0].into_iter().enumerate() {
            let id = FieldId { graph: 0, field: 0 };
            store.append(id, Some(v), now).expect("append");
            let at = now + std::time::Duration::from_secs(u64::try_from(i).expect("small"));
            store
                .append(FieldId { graph: 1, field: 0 }, Some(v * 1000.0), at)
                .expect("append");
        }
        let snapshot = store.snapshot();
        let size = Size {
            width: 640,
            height: 480,
        };

        let first = render(&graphs, &snapshot, size).expect("render");
        let second = render(&graphs, &snapshot, size).expect("render");
        assert_eq!(first, second);
    }

    #[test]
    fn output_has_requested_dimensions() {
        let (graphs, store) = fixture(&["G a=a"], 5);
        let image = decode(
            &render(
                &graphs,
                &store.snapshot(),
                Size {
                    width: 300,
                    height: 200,
                },
            )
            .expect("render"),
        );
        assert_eq!(image.dimensions(), (300, 200));
    }

    #[test]
    fn size_is_clamped() {
        let (graphs, store) = fixture(&["G a=a"], 5);
        let tiny = decode(
            &render(
                &graphs,
                &store.snapshot(),
                Size {
                    width: 0,
                    height: 10,
                },
            )
            .expect("render"),
        );
        assert_eq!(tiny.dimensions(), (Size::MIN, Size::MIN));

        assert_eq!(
            Size {
                width: 10_000,
                height: 100,
            }
            .clamped(),
            Size {
                width: Size::MAX,
                height: 100,
            }
        );
    }

    #[test]
    fn all_gap_field_leaves_other_fields_intact() {
        let size = Size {
            width: 400,
            height: 200,
        };
        let now = Instant::now();
        let a = FieldId { graph: 0, field: 0 };
        let b = FieldId { graph: 0, field: 1 };

        let (graphs, gaps) = fixture(&["G a=a,b=b"], 4);
        let (_, data) = fixture(&["G a=a,b=b"], 4);
        for v in [1.0, 3.0, 2.0, 4.0] {
            gaps.append(a, Some(v), now).expect("append");
            gaps.append(b, None, now).expect("append");
            data.append(a, Some(v), now).expect("append");
            data.append(b, Some(v / 2.0), now).expect("append");
        }
        let with_gaps = decode(&render(&graphs, &gaps.snapshot(), size).expect("render"));
        let with_data = decode(&render(&graphs, &data.snapshot(), size).expect("render"));

        // Only the legend swatch of `b` carries its colour.
        let swatch = usize::try_from(TEXT * 2 / 3 + 1).expect("small");
        let b_gaps = count(&with_gaps, palette(1));
        assert!(b_gaps > 0 && b_gaps <= swatch * swatch, "{b_gaps}");
        assert!(count(&with_data, palette(1)) > b_gaps + 50);

        assert!(count(&with_gaps, palette(0)) > swatch * swatch, "field a should be plotted");
    }

    #[test]
    fn cramped_panels_drop_their_text() {
        let specs: Vec<String> = (0..30).map(|i| format!("MMMM{i} h=h,m=m")).collect();
        let specs: Vec<&str> = specs.iter().map(String::as_str).collect();
        let (graphs, store) = fixture(&specs, 5);
        let cramped = decode(
            &render(
                &graphs,
                &store.snapshot(),
                Size {
                    width: 400,
                    height: 300,
                },
            )
            .expect("render"),
        );
        assert_eq!(bright(&cramped), 0);

        let (graphs, store) = fixture(&["MMMM HHHH h=h,m=m"], 5);
        let roomy = decode(
            &render(
                &graphs,
                &store.snapshot(),
                Size {
                    width: 400,
                    height: 300,
                },
            )
            .expect("render"),
        );
        assert!(bright(&roomy) > 0);
    }

    #[test]
    fn header_needs_room_for_a_plot() {
        let metrics = Metrics::of(400, 100);
        assert_eq!(metrics.text, TEXT);
        assert_eq!(metrics.header(1), metrics.pad + 2 * metrics.line);
        assert!(metrics.fits_text(100, 1));
        assert!(!metrics.fits_text(10, 0));
        assert!(!metrics.fits_text(metrics.header(2) + metrics.line, 2));

        assert_eq!(Metrics::of(640, 480).text, LARGE_TEXT);
        assert_eq!(Metrics::of(640, 200).text, TEXT);
    }

    #[test]
    fn missing_graph_is_an_error() {
        let (graphs, _) = fixture(&["G a=a", "H b=b"], 3);
        let (_, other) = fixture(&["G a=a"], 3);
        assert!(matches!(
            render(
                &graphs,
                &other.snapshot(),
                Size {
                    width: 100,
                    height: 100
                }
            ),
            Err(Error::MissingGraph { graph: 1 })
        ));
    }

    #[test]
    fn bounds_follow_data_and_hints() {
        let hints = Hints::default();
        let bounds = Bounds::of(&hints, &[vec![Some(5.0), None, Some(20.0)]]);
        assert!((bounds.lo - 0.0).abs() < f64::EPSILON);
        assert!((bounds.hi - 20.0).abs() < f64::EPSILON);

        let bounds = Bounds::of(&hints, &[vec![Some(-5.0)], vec![Some(3.0)]]);
        assert!((bounds.lo + 5.0).abs() < f64::EPSILON);
        assert!((bounds.hi - 3.0).abs() < f64::EPSILON);

        let bounds = Bounds::of(&hints, &[vec![None, None]]);
        assert!((bounds.lo - 0.0).abs() < f64::EPSILON);
        assert!((bounds.hi - 1.0).abs() < f64::EPSILON);

        let bounds = Bounds::of(&hints, &[vec![Some(0.0), Some(0.0)]]);
        assert!((bounds.hi - 1.0).abs() < f64::EPSILON);

        let hinted = Hints {
            min: Some(10.0),
            max: Some(100.0),
            unit: None,
        };
        let bounds = Bounds::of(&hinted, &[vec![Some(5.0), Some(500.0)]]);
        assert!((bounds.lo - 10.0).abs() < f64::EPSILON);
        assert!((bounds.hi - 100.0).abs() < f64::EPSILON);
        assert!((bounds.baseline() - 10.0).abs() < f64::EPSILON);
        assert!((bounds.pin(500.0) - 100.0).abs() < f64::EPSILON);
        assert!((bounds.pin(5.0) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gaps_split_series_into_runs() {
        let bounds = Bounds { lo: 0.0, hi: 10.0 };
        let runs = runs(
            &[Some(1.0), Some(2.0), None, Some(4.0), None, None, Some(60.0)],
            bounds,
        );
        assert_eq!(
            runs,
            vec![
                vec![(0.0, 1.0), (1.0, 2.0)],
                vec![(3.0, 4.0)],
                vec![(6.0, 10.0)],
            ]
        );
        assert!(super::runs(&[None, None], bounds).is_empty());
    }
}
