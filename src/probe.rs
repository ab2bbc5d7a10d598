//! Image dimension probing with EXIF orientation correction

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::ImageReader;

use crate::error::ScanError;

/// Resolves the displayed pixel dimensions of an image file
///
/// Implementations run on scan worker threads.
pub trait DimensionProbe: Send + Sync {
    /// Return `(width, height)` as the image displays
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), ScanError>;
}

/// Probe backed by the `image` crate's header decoders
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProbe;

impl DimensionProbe for ImageProbe {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), ScanError> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| ScanError::from(e).with_path(path))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ScanError::from(e).with_path(path))?;

        if width == 0 || height == 0 {
            return Err(ScanError::decode_error(
                path.to_path_buf(),
                format!("empty image: {}x{}", width, height),
            ));
        }

        Ok(apply_orientation(width, height, read_orientation(path)))
    }
}

/// EXIF orientation tag value (1..=8), 1 when absent or unreadable
pub fn read_orientation(path: &Path) -> u8 {
    let Ok(file) = File::open(path) else {
        return 1;
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return 1;
    };
    match exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
    {
        Some(v @ 1..=8) => v as u8,
        _ => 1,
    }
}

/// Swap width and height for orientations that rotate by 90 or 270 degrees
pub fn apply_orientation(width: u32, height: u32, orientation: u8) -> (u32, u32) {
    match orientation {
        5..=8 => (height, width),
        _ => (width, height),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Image files written on the fly for tests

    use std::path::Path;

    /// Write a real JPEG of the given size
    pub fn write_jpeg(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 200]))
            .save_with_format(path, image::ImageFormat::Jpeg)
            .unwrap();
    }

    /// Write a real PNG of the given size
    pub fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    /// Write a JPEG carrying an EXIF orientation tag
    pub fn write_jpeg_with_orientation(path: &Path, width: u32, height: u32, orientation: u16) {
        let mut encoded = Vec::new();
        image::RgbImage::from_pixel(width, height, image::Rgb([200, 50, 50]))
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Jpeg,
            )
            .unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);

        // Little-endian TIFF with one IFD0 entry: Orientation (0x0112), SHORT, count 1.
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&orientation.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let mut app1 = Vec::new();
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&tiff);
        let segment_len = (app1.len() + 2) as u16;

        let mut out = Vec::with_capacity(encoded.len() + app1.len() + 4);
        out.extend_from_slice(&encoded[..2]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&encoded[2..]);
        std::fs::write(path, out).unwrap();
    }
}
