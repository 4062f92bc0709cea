use anyhow::{anyhow, Result};

/// Raw layouts a capture device may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelLayout {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelLayout {
    fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelLayout::Rgb24 => pixels.checked_mul(3),
            PixelLayout::Yuyv => pixels.checked_mul(2),
            PixelLayout::Nv12 => pixels.checked_add(pixels / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Convert a captured buffer to packed RGB24.
///
/// Drivers may pad buffers past the image; trailing bytes are ignored. A short
/// buffer is an error.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Result<Vec<u8>> {
    let expected = layout.expected_len(width, height)?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short: expected {}, got {}",
            layout,
            expected,
            pixels.len()
        ));
    }
    let pixels = &pixels[..expected];
    match layout {
        PixelLayout::Rgb24 => Ok(pixels.to_vec()),
        PixelLayout::Yuyv => Ok(yuyv_to_rgb(pixels)),
        PixelLayout::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
    }
}

// YUYV packs [Y0, U, Y1, V]: two pixels share one chroma pair.
fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    rgb
}

// BT.601 full range.
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelLayout::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let yuyv = [16u8, 128, 235, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, PixelLayout::Yuyv)?;
        assert_eq!(rgb, vec![16, 16, 16, 235, 235, 235]);
        Ok(())
    }

    #[test]
    fn padded_buffers_are_trimmed_and_short_ones_rejected() -> Result<()> {
        let mut pixels = vec![7u8; 9];
        pixels.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(normalize_to_rgb(&pixels, 1, 3, PixelLayout::Rgb24)?, vec![7u8; 9]);
        assert!(normalize_to_rgb(&[0u8; 5], 1, 3, PixelLayout::Rgb24).is_err());
        Ok(())
    }
}
