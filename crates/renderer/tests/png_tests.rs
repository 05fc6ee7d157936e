//! PNG output must decode with a standard decoder.

use image::GenericImageView;
use renderer::legend::{render_legend, LEGEND_HEIGHT, LEGEND_WIDTH};
use renderer::png::{encode_png, encode_rgba, transparent_png};
use renderer::{colorize, ColorBar, ColorMapping};

// ============================================================================
// Helper functions
// ============================================================================

/// Ramp with a masked corner, similar to a coastal tile.
fn ramp(width: usize, height: usize) -> Vec<f32> {
    (0..width * height)
        .map(|i| {
            let (x, y) = (i % width, i / width);
            if x < 4 && y < 4 {
                f32::NAN
            } else {
                (x + y) as f32
            }
        })
        .collect()
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_indexed_tile_decodes_to_same_pixels() {
    let (w, h) = (32, 16);
    let mapping = ColorMapping::new("viridis", 0.0, 46.0);
    let pixels = colorize(&ramp(w, h), w, h, &mapping).unwrap();
    let png = encode_png(&pixels, w, h).unwrap();

    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!(decoded.dimensions(), (w as u32, h as u32));
    assert_eq!(decoded.to_rgba8().into_raw(), pixels);
}

#[test]
fn test_truecolor_fallback_decodes() {
    let (w, h) = (64, 64);
    let pixels: Vec<u8> = (0..w * h)
        .flat_map(|i| [(i % 256) as u8, (i / 256) as u8, (i % 7) as u8, 255])
        .collect();
    let png = encode_png(&pixels, w, h).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.into_raw(), pixels);
}

#[test]
fn test_transparent_tile_is_fully_clear() {
    let png = transparent_png(256, 256).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (256, 256));
    assert!(decoded.pixels().all(|p| p.0[3] == 0));
}

#[test]
fn test_masked_pixels_stay_transparent() {
    let (w, h) = (8, 8);
    let mapping = ColorMapping::new("jet", 0.0, 14.0);
    let pixels = colorize(&ramp(w, h), w, h, &mapping).unwrap();
    let decoded = image::load_from_memory(&encode_rgba(&pixels, w, h).unwrap())
        .unwrap()
        .to_rgba8();
    assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
    assert_eq!(decoded.get_pixel(7, 7).0[3], 255);
}

#[test]
fn test_legend_runs_low_to_high() {
    let bar = ColorBar::by_name("jet").unwrap();
    let png = render_legend(&bar, LEGEND_WIDTH, LEGEND_HEIGHT).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (LEGEND_WIDTH as u32, LEGEND_HEIGHT as u32));
    assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 128, 255]);
    assert_eq!(decoded.get_pixel(LEGEND_WIDTH as u32 - 1, 0).0, [128, 0, 0, 255]);
}
