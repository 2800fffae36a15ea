// ============================================================================
// SCANLINE FILTERS
// ============================================================================

use crate::error::{CodecError, CodecResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl FilterType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Sub),
            2 => Some(Self::Up),
            3 => Some(Self::Average),
            4 => Some(Self::Paeth),
            _ => None,
        }
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Undo one row's filter in place. `prev` is the reconstructed row above
/// (all zeros for the first row); `bpp` is the pixel byte-group size.
fn unfilter_row(filter: FilterType, row: &mut [u8], prev: &[u8], bpp: usize) {
    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        FilterType::Up => {
            for (byte, &up) in row.iter_mut().zip(prev) {
                *byte = byte.wrapping_add(up);
            }
        }
        FilterType::Average => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                row[i] = row[i].wrapping_add(((left + prev[i] as u16) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..row.len() {
                let (left, upper_left) = if i >= bpp { (row[i - bpp], prev[i - bpp]) } else { (0, 0) };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], upper_left));
            }
        }
    }
}

/// Reconstruct `height` rows of `stride` bytes from inflated IDAT data.
/// Each input row is one filter byte followed by `stride` bytes.
pub fn unfilter_scanlines(data: &[u8], stride: usize, height: usize, bpp: usize) -> CodecResult<Vec<u8>> {
    let needed = (stride + 1).checked_mul(height);
    if needed.is_none_or(|n| data.len() < n) {
        return Err(CodecError::ShortImageData {
            rows: data.len() / (stride + 1),
            expected: height,
        });
    }
    let mut out = vec![0u8; stride * height];
    let zero_row = vec![0u8; stride];
    for row in 0..height {
        let start = row * (stride + 1);
        let Some(line) = data.get(start..start + stride + 1) else {
            return Err(CodecError::ShortImageData { rows: row, expected: height });
        };
        let filter = FilterType::from_u8(line[0]).ok_or(CodecError::InvalidFilter { row, filter: line[0] })?;
        let (done, rest) = out.split_at_mut(row * stride);
        let current = &mut rest[..stride];
        current.copy_from_slice(&line[1..]);
        let prev = if row == 0 { &zero_row[..] } else { &done[(row - 1) * stride..] };
        unfilter_row(filter, current, prev, bpp);
    }
    Ok(out)
}

/// Prefix every row with filter type None.
pub fn filter_none(raw: &[u8], stride: usize) -> Vec<u8> {
    if stride == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(raw.len() + raw.len() / stride);
    for row in raw.chunks(stride) {
        out.push(FilterType::None as u8);
        out.extend_from_slice(row);
    }
    out
}
