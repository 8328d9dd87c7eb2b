//! SHAP waterfall chart rendered to SVG with plotters.
//!
//! Rows are ordered by contribution magnitude, largest on top. The bottom row
//! starts at the background mean and the top row ends at the prediction.
//! Features beyond `max_display - 1` are folded into one "other features" row.

use std::ops::Range;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters_svg::SVGBackend;

use crate::domain::AttributionSet;
use crate::RiskCalcError;

/// Rows shown before folding the remainder.
pub const DEFAULT_MAX_DISPLAY: usize = 10;

const WIDTH: u32 = 640;
const LABEL_WIDTH: u32 = 200;
const ROW_HEIGHT: u32 = 26;
const TOP: u32 = 30;
const X_AXIS: u32 = 30;
const BOTTOM: u32 = 26;
const FONT: &str = "sans-serif";

const POSITIVE: RGBColor = RGBColor(0xff, 0x00, 0x51);
const NEGATIVE: RGBColor = RGBColor(0x00, 0x8b, 0xfb);
const INK: RGBColor = RGBColor(0x1f, 0x29, 0x33);
const MUTED: RGBColor = RGBColor(0x52, 0x60, 0x6d);
const AXIS: RGBColor = RGBColor(0x9a, 0xa5, 0xb1);

struct Row {
    label: String,
    contribution: f64,
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e6 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

fn rows(set: &AttributionSet, max_display: usize) -> Vec<Row> {
    let ranked = set.ranked();
    let max_display = max_display.max(1);
    let shown = if ranked.len() > max_display {
        max_display - 1
    } else {
        ranked.len()
    };

    let mut out: Vec<Row> = ranked[..shown]
        .iter()
        .map(|a| Row {
            label: format!("{} = {}", a.feature, format_value(a.value)),
            contribution: a.contribution,
        })
        .collect();

    let rest = &ranked[shown..];
    if !rest.is_empty() {
        out.push(Row {
            label: format!("{} other features", rest.len()),
            contribution: rest.iter().map(|a| a.contribution).sum(),
        });
    }
    out
}

/// Bar extents per row, accumulated bottom-up from the base value.
fn spans(set: &AttributionSet, rows: &[Row]) -> Vec<(f64, f64)> {
    let mut spans = vec![(0.0, 0.0); rows.len()];
    let mut position = set.base_value;
    for (i, row) in rows.iter().enumerate().rev() {
        spans[i] = (position, position + row.contribution);
        position += row.contribution;
    }
    spans
}

fn x_range(set: &AttributionSet, spans: &[(f64, f64)]) -> Range<f64> {
    let mut lo = set.base_value.min(set.prediction);
    let mut hi = set.base_value.max(set.prediction);
    for &(a, b) in spans {
        lo = lo.min(a.min(b));
        hi = hi.max(a.max(b));
    }
    let pad = ((hi - lo) * 0.08).max(1e-4);
    (lo - pad)..(hi + pad)
}

fn bar_colour(contribution: f64) -> RGBColor {
    if contribution >= 0.0 {
        POSITIVE
    } else {
        NEGATIVE
    }
}

fn text(size: u32, colour: &RGBColor, h: HPos, v: VPos) -> TextStyle<'static> {
    (FONT, size).into_font().color(colour).pos(Pos::new(h, v))
}

fn draw(
    root: &DrawingArea<SVGBackend<'_>, Shift>,
    set: &AttributionSet,
    rows: &[Row],
    spans: &[(f64, f64)],
    x: Range<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    root.fill(&WHITE)?;

    let n = rows.len() as f64;
    let lo = x.start;
    let mut chart = ChartBuilder::on(root)
        .margin_top(TOP)
        .margin_right(40)
        .margin_bottom(BOTTOM)
        .x_label_area_size(X_AXIS)
        .y_label_area_size(LABEL_WIDTH)
        .build_cartesian_2d(x, 0f64..n)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(0)
        .x_labels(5)
        .x_label_formatter(&|v| format!("{:.1}%", v * 100.0))
        .axis_style(AXIS)
        .label_style((FONT, 11).into_font().color(&MUTED))
        .draw()?;

    // Row i occupies [n - i - 1, n - i], top row first.
    let centre = |i: usize| n - i as f64 - 0.5;

    chart.draw_series(rows.iter().zip(spans).enumerate().map(|(i, (row, &(start, end)))| {
        let y = centre(i);
        Rectangle::new(
            [(start.min(end), y + 0.35), (start.max(end), y - 0.35)],
            bar_colour(row.contribution).filled(),
        )
    }))?;

    chart.draw_series(rows.iter().zip(spans).enumerate().map(|(i, (row, &(start, end)))| {
        let colour = bar_colour(row.contribution);
        let (at, dx, anchor) = if row.contribution >= 0.0 {
            (start.max(end), 4, HPos::Left)
        } else {
            (start.min(end), -4, HPos::Right)
        };
        EmptyElement::at((at, centre(i)))
            + Text::new(
                format!("{:+.2}", row.contribution * 100.0),
                (dx, 0),
                text(11, &colour, anchor, VPos::Center),
            )
    }))?;

    chart.draw_series([
        PathElement::new(vec![(set.base_value, 0.0), (set.base_value, n)], AXIS.stroke_width(1)),
        PathElement::new(vec![(set.prediction, 0.0), (set.prediction, n)], MUTED.stroke_width(1)),
    ])?;

    // Feature labels and reference captions sit outside the plotting area.
    let label_style = text(12, &INK, HPos::Right, VPos::Center);
    for (i, row) in rows.iter().enumerate() {
        let (px, py) = chart.backend_coord(&(lo, centre(i)));
        root.draw(&Text::new(row.label.as_str(), (px - 8, py), label_style.clone()))?;
    }

    let (px, top) = chart.backend_coord(&(set.prediction, n));
    root.draw(&Text::new(
        format!("f(x) = {:.2}%", set.prediction * 100.0),
        (px, top - 6),
        text(12, &MUTED, HPos::Center, VPos::Bottom),
    ))?;

    let (bx, bottom) = chart.backend_coord(&(set.base_value, 0.0));
    root.draw(&Text::new(
        format!("E[f(X)] = {:.2}%", set.base_value * 100.0),
        (bx, bottom + X_AXIS as i32 + 4),
        text(12, &MUTED, HPos::Center, VPos::Top),
    ))?;

    root.present()?;
    Ok(())
}

/// Render the waterfall for one attribution set. Values are shown as
/// percentage points of risk.
pub fn waterfall_svg(set: &AttributionSet, max_display: usize) -> Result<String, RiskCalcError> {
    let rows = rows(set, max_display);
    let spans = spans(set, &rows);
    let x = x_range(set, &spans);
    let height = TOP + ROW_HEIGHT * rows.len() as u32 + X_AXIS + BOTTOM;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, height)).into_drawing_area();
        draw(&root, set, &rows, &spans, x)
            .map_err(|e| RiskCalcError::Render(format!("waterfall for {}: {e}", set.outcome)))?;
    }
    Ok(svg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attribution, Outcome};

    fn set(n: usize) -> AttributionSet {
        let attributions: Vec<Attribution> = (0..n)
            .map(|i| Attribution {
                feature: format!("f{i}"),
                value: i as f64,
                contribution: if i % 2 == 0 { 0.01 } else { -0.005 } * (i + 1) as f64,
            })
            .collect();
        let total: f64 = attributions.iter().map(|a| a.contribution).sum();
        AttributionSet {
            outcome: Outcome::AllCause,
            base_value: 0.3,
            prediction: 0.3 + total,
            attributions,
        }
    }

    fn bars(svg: &str) -> usize {
        let svg = svg.to_ascii_lowercase();
        svg.split("<rect")
            .skip(1)
            .filter(|tag| {
                let tag = tag.split('>').next().unwrap_or_default();
                tag.contains("#ff0051") || tag.contains("#008bfb")
            })
            .count()
    }

    #[test]
    fn test_folds_extra_features() {
        let r = rows(&set(13), 10);
        assert_eq!(r.len(), 10);
        assert_eq!(r[9].label, "4 other features");
    }

    #[test]
    fn test_no_folding_when_few_features() {
        let r = rows(&set(7), 10);
        assert_eq!(r.len(), 7);
        assert!(r.iter().all(|row| !row.label.contains("other")));
    }

    #[test]
    fn test_spans_end_at_prediction() {
        let s = set(6);
        let r = rows(&s, 10);
        let sp = spans(&s, &r);
        assert!((sp[r.len() - 1].0 - s.base_value).abs() < 1e-12);
        assert!((sp[0].1 - s.prediction).abs() < 1e-12);
    }

    #[test]
    fn test_svg_contains_one_bar_per_row() {
        let svg = waterfall_svg(&set(5), 10).expect("render");
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(bars(&svg), 5);
        assert!(svg.contains("E[f(X)] = 30.00%"));
        assert!(svg.contains("f0 = 0"));
    }

    #[test]
    fn test_folded_chart_has_max_display_bars() {
        let svg = waterfall_svg(&set(13), 10).expect("render");
        assert_eq!(bars(&svg), 10);
        assert!(svg.contains("4 other features"));
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(format_value(65.0), "65");
        assert_eq!(format_value(1.234), "1.23");
    }
}
