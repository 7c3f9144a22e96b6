use crate::error::{Error, Result};

pub const DEFAULT_FILL: u8 = 0xFF;

/// A binary placed at an absolute flash offset.
#[derive(Debug, Clone)]
pub struct Blob {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Compose `blobs` into one flat image of `max(offset + len)` bytes, gaps
/// filled with `fill`. Blobs are applied in order, so a later blob
/// overwrites whatever an earlier one put in an overlapping range.
pub fn merge_blobs(blobs: &[Blob], fill: u8) -> Result<Vec<u8>> {
    if blobs.is_empty() {
        return Err(Error::msg("No blobs to merge."));
    }
    let mut size: u64 = 0;
    for b in blobs {
        let end = b
            .offset
            .checked_add(b.data.len() as u64)
            .ok_or_else(|| Error::msg(format!("blob at 0x{:X} overflows", b.offset)))?;
        size = size.max(end);
    }
    if size == 0 {
        return Err(Error::msg("Merged size would be zero."));
    }
    let size = usize::try_from(size)
        .map_err(|_| Error::msg(format!("merged size {size} does not fit in memory")))?;
    tracing::debug!("creating merged image of {size} bytes (fill=0x{fill:02X})");

    let mut image = Vec::new();
    image
        .try_reserve_exact(size)
        .map_err(|e| Error::msg(format!("merged size {size} cannot be allocated: {e}")))?;
    image.resize(size, fill);
    for b in blobs {
        // Bounded by `size`, which was computed from these same offsets.
        let start = b.offset as usize;
        image[start..start + b.data.len()].copy_from_slice(&b.data);
        tracing::debug!("placed {} bytes at 0x{:X}", b.data.len(), b.offset);
    }
    Ok(image)
}

/// Parse a `--fill` value: `0x`-hex or decimal within `0..=255`.
pub fn parse_fill(raw: &str) -> Result<u8> {
    let v = crate::util::parse_int_auto(raw)?;
    u8::try_from(v).map_err(|_| Error::msg("fill must be 0-255"))
}
