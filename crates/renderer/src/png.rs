//! PNG encoding for RGBA rasters.
//!
//! Tiles usually hold a handful of palette colors plus transparency, so the
//! encoder first tries an indexed image (color type 3 with a `tRNS` alpha
//! table) and falls back to truecolor with alpha (color type 6) when more than
//! 256 distinct colors occur.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::RenderError;

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

const COLOR_TYPE_INDEXED: u8 = 3;
const COLOR_TYPE_RGBA: u8 = 6;

/// Encode RGBA pixels, choosing indexed or RGBA output.
pub fn encode_png(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, RenderError> {
    check_len(pixels, width, height)?;
    match build_palette(pixels) {
        Some((palette, indices)) => encode_indexed(width, height, &palette, &indices),
        None => encode_rgba(pixels, width, height),
    }
}

/// A fully transparent tile.
pub fn transparent_png(width: usize, height: usize) -> Result<Vec<u8>, RenderError> {
    encode_indexed(width, height, &[[0, 0, 0, 0]], &vec![0u8; width * height])
}

/// Encode RGBA pixels as a color type 6 image.
pub fn encode_rgba(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, RenderError> {
    check_len(pixels, width, height)?;
    let mut png = Vec::with_capacity(pixels.len() / 2 + 64);
    png.extend_from_slice(&SIGNATURE);
    write_chunk(&mut png, b"IHDR", &header(width, height, COLOR_TYPE_RGBA));
    write_chunk(&mut png, b"IDAT", &deflate_rows(pixels, width * 4, height)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn encode_indexed(
    width: usize,
    height: usize,
    palette: &[[u8; 4]],
    indices: &[u8],
) -> Result<Vec<u8>, RenderError> {
    let mut png = Vec::with_capacity(indices.len() / 4 + palette.len() * 4 + 64);
    png.extend_from_slice(&SIGNATURE);
    write_chunk(&mut png, b"IHDR", &header(width, height, COLOR_TYPE_INDEXED));

    let plte: Vec<u8> = palette.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();
    write_chunk(&mut png, b"PLTE", &plte);

    if palette.iter().any(|c| c[3] < 255) {
        let trns: Vec<u8> = palette.iter().map(|c| c[3]).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }

    write_chunk(&mut png, b"IDAT", &deflate_rows(indices, width, height)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

/// Palette in order of first appearance plus one index per pixel, or `None`
/// when the image has too many colors.
fn build_palette(pixels: &[u8]) -> Option<(Vec<[u8; 4]>, Vec<u8>)> {
    let mut lookup: HashMap<[u8; 4], u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices = Vec::with_capacity(pixels.len() / 4);

    for px in pixels.chunks_exact(4) {
        let color = [px[0], px[1], px[2], px[3]];
        let index = match lookup.get(&color) {
            Some(&index) => index,
            None => {
                if palette.len() == MAX_PALETTE_SIZE {
                    return None;
                }
                let index = palette.len() as u8;
                palette.push(color);
                lookup.insert(color, index);
                index
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

fn header(width: usize, height: usize, color_type: u8) -> [u8; 13] {
    let mut ihdr = [0u8; 13];
    ihdr[0..4].copy_from_slice(&(width as u32).to_be_bytes());
    ihdr[4..8].copy_from_slice(&(height as u32).to_be_bytes());
    ihdr[8] = 8; // bit depth
    ihdr[9] = color_type;
    // compression, filter and interlace methods stay 0
    ihdr
}

/// Prefix every scanline with filter type 0 and zlib-compress the result.
fn deflate_rows(data: &[u8], row_bytes: usize, height: usize) -> Result<Vec<u8>, RenderError> {
    let mut raw = Vec::with_capacity(height * (row_bytes + 1));
    for row in data.chunks_exact(row_bytes.max(1)).take(height) {
        raw.push(0);
        raw.extend_from_slice(row);
    }
    if row_bytes == 0 {
        raw.resize(height, 0);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(&raw)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    encoder.finish().map_err(|e| RenderError::Encode(e.to_string()))
}

fn write_chunk(png: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(kind);
    png.extend_from_slice(data);

    let mut crc = crc32fast::Hasher::new();
    crc.update(kind);
    crc.update(data);
    png.extend_from_slice(&crc.finalize().to_be_bytes());
}

fn check_len(pixels: &[u8], width: usize, height: usize) -> Result<(), RenderError> {
    if pixels.len() != width * height * 4 {
        return Err(RenderError::ShapeMismatch {
            len: pixels.len() / 4,
            width,
            height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_in_first_appearance_order() {
        let pixels = [
            255, 0, 0, 255, // red
            0, 0, 0, 0, // transparent
            255, 0, 0, 255, // red again
        ];
        let (palette, indices) = build_palette(&pixels).unwrap();
        assert_eq!(palette, vec![[255, 0, 0, 255], [0, 0, 0, 0]]);
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_palette_overflow() {
        let pixels: Vec<u8> = (0..300u32)
            .flat_map(|i| [(i % 256) as u8, (i / 256) as u8, 0, 255])
            .collect();
        assert!(build_palette(&pixels).is_none());
    }

    #[test]
    fn test_indexed_output_has_trns_only_with_alpha() {
        let opaque = encode_png(&[10, 20, 30, 255], 1, 1).unwrap();
        assert!(!opaque.windows(4).any(|w| w == b"tRNS"));
        let clear = transparent_png(2, 2).unwrap();
        assert!(clear.windows(4).any(|w| w == b"tRNS"));
        assert_eq!(&clear[..8], &SIGNATURE);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            encode_png(&[0, 0, 0], 1, 1),
            Err(RenderError::ShapeMismatch { .. })
        ));
    }
}
