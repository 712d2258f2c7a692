// Synthetic image encoders used to drive the pipeline with known pixel data.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageBuffer, ImageEncoder, ImageFormat, Rgb};
use std::io::Cursor;

/// Encodes an interleaved 8-bit RGB buffer as PNG bytes.
pub fn encode_png_rgb8(width: u32, height: u32, buffer: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let mut output = Vec::new();
    let encoder = PngEncoder::new(&mut output);

    encoder.write_image(buffer, width, height, ExtendedColorType::Rgb8)?;

    Ok(output)
}

/// Encodes an interleaved 16-bit RGB buffer as PNG bytes.
pub fn encode_png_rgb16(width: u32, height: u32, buffer: &[u16]) -> Result<Vec<u8>, image::ImageError> {
    let pixels: ImageBuffer<Rgb<u16>, Vec<u16>> = ImageBuffer::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;

    let mut output = Cursor::new(Vec::new());
    DynamicImage::ImageRgb16(pixels).write_to(&mut output, ImageFormat::Png)?;

    Ok(output.into_inner())
}

/// A PNG filled with a single 8-bit color.
pub fn solid_rgb8(width: u32, height: u32, color: [u8; 3]) -> Result<Vec<u8>, image::ImageError> {
    let buffer: Vec<u8> = color
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect();
    encode_png_rgb8(width, height, &buffer)
}

/// A JPEG filled with a single 8-bit color, carrying `tiff` as its EXIF APP1 segment.
pub fn solid_jpeg_with_exif(
    width: u32,
    height: u32,
    color: [u8; 3],
    tiff: &[u8],
) -> Result<Vec<u8>, image::ImageError> {
    let buffer: Vec<u8> = color
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 100).write_image(&buffer, width, height, ExtendedColorType::Rgb8)?;

    // Segment length counts itself, the "Exif\0\0" header and the TIFF body.
    let segment_len = u16::try_from(2 + 6 + tiff.len()).map_err(|_| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::Generic("EXIF block exceeds one APP1 segment".to_string()),
        ))
    })?;

    // APP1 goes right after SOI.
    let mut output = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    output.extend_from_slice(&jpeg[..2]);
    output.extend_from_slice(&[0xFF, 0xE1]);
    output.extend_from_slice(&segment_len.to_be_bytes());
    output.extend_from_slice(b"Exif\0\0");
    output.extend_from_slice(tiff);
    output.extend_from_slice(&jpeg[2..]);

    Ok(output)
}
