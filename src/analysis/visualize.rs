//! Heatmap rendering for a [`ScoreTable`]: a fixed-resolution PNG raster and
//! a vector PDF with row/column labels and per-cell values. Both renderers
//! are pure functions over the table; the pipeline treats any failure here
//! as degraded success.

use std::{fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use image::{Rgb, RgbImage};
use printpdf::{BuiltinFont, Color, Mm, PdfDocument, Rect};

use super::{ScoreTable, heatmap_pdf_name, heatmap_png_name};

const PNG_WIDTH: u32 = 1400;
const PNG_HEIGHT: u32 = 1000;
const PNG_MARGIN: u32 = 20;

// A4 landscape, all coordinates in millimetres.
const PAGE_W: f32 = 297.0;
const PAGE_H: f32 = 210.0;
const GRID_LEFT: f32 = 70.0;
const GRID_RIGHT: f32 = 287.0;
const GRID_BOTTOM: f32 = 40.0;
const GRID_TOP: f32 = 190.0;
const CELL_TEXT_INSET: f32 = 1.5;

/// Renders both artifacts next to the score table and returns their file
/// names (`<base>_heatmap.png`, `<base>_heatmap.pdf`).
pub fn render_heatmap(
    table: &ScoreTable,
    output_dir: &Path,
    base_name: &str,
) -> Result<(String, String)> {
    if table.rows.is_empty() || table.courses.is_empty() {
        bail!("cannot render a heatmap for an empty score table");
    }

    let png_name = heatmap_png_name(base_name);
    let pdf_name = heatmap_pdf_name(base_name);

    render_png(table, &output_dir.join(&png_name))?;
    render_pdf(table, &output_dir.join(&pdf_name))?;

    Ok((png_name, pdf_name))
}

fn score_bounds(table: &ScoreTable) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for row in &table.rows {
        for &score in &row.scores {
            min = min.min(score);
            max = max.max(score);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        (0.0, 1.0)
    } else {
        (min, max)
    }
}

fn normalize(score: f32, min: f32, max: f32) -> f32 {
    if max > min {
        (score - min) / (max - min)
    } else {
        0.5
    }
}

// Yellow-orange-red ramp, low to high.
fn cell_color(t: f32) -> [u8; 3] {
    const LOW: [f32; 3] = [255.0, 255.0, 204.0];
    const MID: [f32; 3] = [253.0, 141.0, 60.0];
    const HIGH: [f32; 3] = [189.0, 0.0, 38.0];

    let t = t.clamp(0.0, 1.0);
    let (from, to, local) = if t < 0.5 {
        (LOW, MID, t * 2.0)
    } else {
        (MID, HIGH, (t - 0.5) * 2.0)
    };

    let mut channels = [0u8; 3];
    for (slot, (a, b)) in channels.iter_mut().zip(from.iter().zip(to.iter())) {
        *slot = (a + (b - a) * local).round() as u8;
    }
    channels
}

fn render_png(table: &ScoreTable, path: &Path) -> Result<()> {
    let rows = table.rows.len() as u32;
    let cols = table.courses.len() as u32;
    let (min, max) = score_bounds(table);

    let grid_w = PNG_WIDTH - 2 * PNG_MARGIN;
    let grid_h = PNG_HEIGHT - 2 * PNG_MARGIN;
    let cell_w = grid_w / cols;
    let cell_h = grid_h / rows;
    if cell_w == 0 || cell_h == 0 {
        bail!("score table is too large for the fixed raster resolution");
    }

    let mut img = RgbImage::from_pixel(PNG_WIDTH, PNG_HEIGHT, Rgb([255, 255, 255]));

    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col_idx, &score) in row.scores.iter().enumerate() {
            let color = cell_color(normalize(score, min, max));
            let x0 = PNG_MARGIN + col_idx as u32 * cell_w;
            let y0 = PNG_MARGIN + row_idx as u32 * cell_h;
            // Leave a one-pixel gridline between cells.
            for x in x0 + 1..x0 + cell_w {
                for y in y0 + 1..y0 + cell_h {
                    img.put_pixel(x, y, Rgb(color));
                }
            }
        }
    }

    img.save(path)
        .with_context(|| format!("failed to write heatmap PNG to {}", path.display()))
}

fn render_pdf(table: &ScoreTable, path: &Path) -> Result<()> {
    let rows = table.rows.len();
    let cols = table.courses.len();
    let (min, max) = score_bounds(table);

    let (doc, page, layer) =
        PdfDocument::new("Expertise Scores by Course", Mm(PAGE_W), Mm(PAGE_H), "heatmap");
    let layer = doc.get_page(page).get_layer(layer);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| anyhow!("failed to load built-in PDF font: {err}"))?;

    layer.set_fill_color(Color::Rgb(printpdf::Rgb::new(0.06, 0.09, 0.16, None)));
    layer.use_text("Expertise Scores by Course", 14.0, Mm(GRID_LEFT), Mm(198.0), &font);

    let cell_w = (GRID_RIGHT - GRID_LEFT) / cols as f32;
    let cell_h = (GRID_TOP - GRID_BOTTOM) / rows as f32;

    for (row_idx, row) in table.rows.iter().enumerate() {
        let y_top = GRID_TOP - row_idx as f32 * cell_h;
        let y_bottom = y_top - cell_h;

        for (col_idx, &score) in row.scores.iter().enumerate() {
            let x0 = GRID_LEFT + col_idx as f32 * cell_w;
            let [r, g, b] = cell_color(normalize(score, min, max));
            layer.set_fill_color(Color::Rgb(printpdf::Rgb::new(
                r as f32 / 255.0,
                g as f32 / 255.0,
                b as f32 / 255.0,
                None,
            )));
            layer.add_rect(Rect::new(
                Mm(x0),
                Mm(y_bottom),
                Mm(x0 + cell_w),
                Mm(y_top),
            ));
        }
    }

    // Annotations and labels go on top of the filled cells.
    layer.set_fill_color(Color::Rgb(printpdf::Rgb::new(0.06, 0.09, 0.16, None)));
    for (row_idx, row) in table.rows.iter().enumerate() {
        let y_top = GRID_TOP - row_idx as f32 * cell_h;
        let y_mid = y_top - cell_h / 2.0;

        layer.use_text(truncate_label(&row.display_name, 30), 7.0, Mm(8.0), Mm(y_mid), &font);

        for (col_idx, &score) in row.scores.iter().enumerate() {
            let x0 = GRID_LEFT + col_idx as f32 * cell_w + CELL_TEXT_INSET;
            layer.use_text(format!("{score:.2}"), 6.0, Mm(x0), Mm(y_mid - 1.0), &font);
        }
    }

    for (col_idx, course) in table.courses.iter().enumerate() {
        let x0 = GRID_LEFT + col_idx as f32 * cell_w + 1.0;
        // Staggered rows so adjacent labels do not collide.
        let y = 34.0 - (col_idx % 2) as f32 * 5.0;
        layer.use_text(truncate_label(course, 22), 6.0, Mm(x0), Mm(y), &font);
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    doc.save(&mut BufWriter::new(file))
        .map_err(|err| anyhow!("failed to write heatmap PDF to {}: {err}", path.display()))
}

fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let kept: String = label.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
