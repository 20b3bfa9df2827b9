//! Saving the carved image.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use tracing::info;

use crate::error::CarveError;

/// Encode one linear channel value in sRGB.
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Convert tightly packed linear RGBA8 pixels to sRGB. Alpha is left as is.
pub fn linear_to_srgb_in_place(rgba: &mut [u8]) {
    let table: [u8; 256] = std::array::from_fn(|v| {
        (linear_to_srgb(v as f32 / 255.0) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    });
    for pixel in rgba.chunks_exact_mut(4) {
        for channel in &mut pixel[..3] {
            *channel = table[*channel as usize];
        }
    }
}

/// Write `image` to `path`; the format follows the extension. JPEG output
/// drops alpha and uses `jpeg_quality`.
pub fn save(image: &RgbaImage, path: &Path, jpeg_quality: u8) -> Result<(), CarveError> {
    let encode_err = |source| CarveError::Encode {
        path: path.to_path_buf(),
        source,
    };
    let format = ImageFormat::from_path(path).map_err(encode_err)?;
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut writer = BufWriter::new(File::create(path)?);
            let encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality);
            rgb.write_with_encoder(encoder).map_err(encode_err)?;
        }
        other => image.save_with_format(path, other).map_err(encode_err)?,
    }
    info!(path = %path.display(), width = image.width(), height = image.height(), "image saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_curve_endpoints() {
        assert_eq!(linear_to_srgb(0.0), 0.0);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
        // Mid grey in linear light is much brighter once encoded.
        assert!((linear_to_srgb(0.214_041) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn conversion_skips_alpha() {
        let mut pixels = vec![0, 255, 55, 128, 255, 0, 0, 7];
        linear_to_srgb_in_place(&mut pixels);
        assert_eq!(pixels[0], 0);
        assert_eq!(pixels[1], 255);
        assert!(pixels[2] > 55);
        assert_eq!(pixels[3], 128);
        assert_eq!(pixels[7], 7);
    }

    #[test]
    fn saves_png_and_jpeg_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(5, 3, image::Rgba([10, 200, 30, 255]));

        let png = dir.path().join("out.png");
        save(&image, &png, 90).unwrap();
        let decoded = image::open(&png).unwrap().to_rgba8();
        assert_eq!(decoded, image);

        let jpeg = dir.path().join("out.jpg");
        save(&image, &jpeg, 80).unwrap();
        assert_eq!(image::open(&jpeg).unwrap().to_rgb8().dimensions(), (5, 3));
    }

    #[test]
    fn unknown_extension_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::new(2, 2);
        let err = save(&image, &dir.path().join("out.xyz"), 90).unwrap_err();
        assert!(matches!(err, CarveError::Encode { .. }));
    }
}
