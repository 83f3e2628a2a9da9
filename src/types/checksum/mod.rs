#![forbid(unsafe_code)]

use super::page::{self, header};
use super::{ArborError, PageId, Result};

/// CRC32 over a page number and its image.
///
/// The image must already have its CRC field zeroed.
pub fn page_crc32(page_no: PageId, image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.0.to_be_bytes());
    hasher.update(image);
    hasher.finalize()
}

/// Computes the CRC of `image` and stores it in the header.
pub fn seal_image(page_no: PageId, image: &mut [u8]) -> Result<()> {
    page::clear_crc32(image)?;
    let crc = page_crc32(page_no, image);
    image[header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Recomputes the CRC of `image` and compares it with the stored one.
pub fn verify_image(page_no: PageId, image: &[u8]) -> Result<()> {
    if image.len() < header::CRC32.end {
        return Err(ArborError::Corruption("page image shorter than header"));
    }
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&image[header::CRC32]);
    let mut scratch = image.to_vec();
    page::clear_crc32(&mut scratch)?;
    if u32::from_be_bytes(stored) != page_crc32(page_no, &scratch) {
        return Err(ArborError::Corruption("page checksum mismatch"));
    }
    Ok(())
}
