//! SVG charts of derived series.
//!
//! Non-finite samples are dropped before drawing; a chart with nothing left to
//! draw is rendered as a "No data" placeholder instead of failing.

use anyhow::Result;
use log::debug;
use palette::{FromColor, Hsv, Srgb};
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

const CHART_SIZE: (u32, u32) = (800, 500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Line,
    Points,
}

/// One labelled curve of a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    pub marker: Marker,
}

impl Series {
    pub fn line(label: impl Into<String>, x: &[f64], y: &[f64]) -> Self {
        Series {
            label: label.into(),
            points: x.iter().copied().zip(y.iter().copied()).collect(),
            marker: Marker::Line,
        }
    }

    pub fn points(label: impl Into<String>, x: &[f64], y: &[f64]) -> Self {
        Series {
            marker: Marker::Points,
            ..Series::line(label, x, y)
        }
    }

    /// Maps every sample to `(ln|x|, ln|y|)`.
    pub fn log_log(mut self) -> Self {
        for p in self.points.iter_mut() {
            *p = (p.0.abs().ln(), p.1.abs().ln());
        }
        self
    }

    fn finite(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
    }
}

/// Evenly spaced hues, one per series.
pub fn series_colors(count: usize) -> Vec<RGBColor> {
    (0..count)
        .map(|i| {
            let hue = (i as f32) / (count.max(1) as f32);
            let hsv: Hsv = Hsv::new(hue * 360.0, 0.75, 0.8);
            let rgb = Srgb::from_color(hsv);
            RGBColor(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

/// Axis range covering `values` with a 5% margin, `None` if empty.
fn axis_range(values: impl Iterator<Item = f64>) -> Option<Range<f64>> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    if min > max {
        return None;
    }
    let pad = if max > min {
        0.05 * (max - min)
    } else {
        // flat series
        0.05 * min.abs().max(1.0)
    };
    Some(min - pad..max + pad)
}

/// Draws `series` into an SVG at `path`.
pub fn render(path: &Path, caption: &str, x_desc: &str, y_desc: &str, series: &[Series]) -> Result<()> {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = axis_range(series.iter().flat_map(|s| s.finite().map(|p| p.0)));
    let y_range = axis_range(series.iter().flat_map(|s| s.finite().map(|p| p.1)));
    let (x_range, y_range) = match (x_range, y_range) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            debug!("No finite samples for '{}', writing placeholder", caption);
            root.draw(&Text::new(
                "No data",
                (CHART_SIZE.0 as i32 / 2, CHART_SIZE.1 as i32 / 2),
                ("sans-serif", 20).into_font().color(&BLACK),
            ))?;
            root.present()?;
            return Ok(());
        }
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .draw()?;

    let colors = series_colors(series.len());
    for (s, &color) in series.iter().zip(&colors) {
        let anno = match s.marker {
            Marker::Line => chart.draw_series(LineSeries::new(s.finite(), color.stroke_width(2)))?,
            Marker::Points => {
                chart.draw_series(s.finite().map(|p| Circle::new(p, 3, color.filled())))?
            }
        };
        anno.label(s.label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    if series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}
