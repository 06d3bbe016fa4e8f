//! Receipt image fixtures for pipeline tests

#![allow(dead_code)]

use receipt_batch::models::queue_item::ImageSource;

/// Smallest byte sequence `image::guess_format` recognises as JPEG.
pub const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// PNG signature followed by padding.
pub const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

/// File name used for the n-th fixture receipt (1-based).
pub fn receipt_name(n: usize) -> String {
    format!("receipt_{n:02}.jpg")
}

pub fn receipt_image(n: usize) -> ImageSource {
    ImageSource::new(receipt_name(n), JPEG_HEADER.to_vec())
}

/// `count` receipts named `receipt_01.jpg`, `receipt_02.jpg`, ...
pub fn receipt_batch(count: usize) -> Vec<ImageSource> {
    (1..=count).map(receipt_image).collect()
}
