// ============================================================================
// stAx CHUNK — sprite stack metadata, version 0
// ============================================================================

use crate::error::{CodecError, CodecResult};
use crate::io::chunk::ByteReader;
use crate::stax::{StaxAnimation, StaxFrame, StaxSheet, StaxSlice, StaxStack};

pub const STAX: [u8; 4] = *b"stAx";
pub const STAX_VERSION: u8 = 0;

fn read_name(reader: &mut ByteReader<'_>) -> CodecResult<String> {
    let len = reader.u8()? as usize;
    Ok(String::from_utf8_lossy(reader.bytes(len)?).into_owned())
}

/// Parse a `stAx` payload. Slice positions are filled in before returning.
pub fn parse(data: &[u8]) -> CodecResult<StaxSheet> {
    let mut r = ByteReader::new(data);
    let version = r.u8()?;
    if version != STAX_VERSION {
        return Err(CodecError::UnsupportedStaxVersion(version));
    }
    let mut sheet = StaxSheet::new(r.u16()? as u32, r.u16()? as u32);
    let stack_count = r.u16()?;
    for _ in 0..stack_count {
        let name = read_name(&mut r)?;
        let slice_count = r.u16()? as usize;
        let animation_count = r.u16()?;
        let mut animations = Vec::with_capacity(animation_count as usize);
        for _ in 0..animation_count {
            let name = read_name(&mut r)?;
            let frame_time = r.u32()?;
            let frame_count = r.u16()?;
            let mut frames = Vec::with_capacity(frame_count as usize);
            for _ in 0..frame_count {
                let slices = r
                    .bytes(slice_count)?
                    .iter()
                    .map(|&shading| StaxSlice { shading, x: 0, y: 0 })
                    .collect();
                frames.push(StaxFrame { slices });
            }
            animations.push(StaxAnimation { name, frame_time, frames });
        }
        sheet.stacks.push(StaxStack { name, slice_count, animations });
    }
    sheet.cache_slice_positions();
    Ok(sheet)
}

fn narrow_u16(what: &'static str, value: usize) -> CodecResult<u16> {
    u16::try_from(value).map_err(|_| CodecError::MetadataOverflow { what, value })
}

fn write_name(out: &mut Vec<u8>, what: &'static str, name: &str) -> CodecResult<()> {
    let len = u8::try_from(name.len()).map_err(|_| CodecError::MetadataOverflow {
        what,
        value: name.len(),
    })?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Serialise `sheet` as a version 0 payload. Fails rather than truncating
/// when a count or name does not fit its field.
pub fn write(sheet: &StaxSheet) -> CodecResult<Vec<u8>> {
    let mut out = vec![STAX_VERSION];
    out.extend(narrow_u16("frame width", sheet.frame_width as usize)?.to_be_bytes());
    out.extend(narrow_u16("frame height", sheet.frame_height as usize)?.to_be_bytes());
    out.extend(narrow_u16("stack count", sheet.stacks.len())?.to_be_bytes());
    for stack in &sheet.stacks {
        write_name(&mut out, "stack name length", &stack.name)?;
        out.extend(narrow_u16("slice count", stack.slice_count)?.to_be_bytes());
        out.extend(narrow_u16("animation count", stack.animations.len())?.to_be_bytes());
        for animation in &stack.animations {
            write_name(&mut out, "animation name length", &animation.name)?;
            out.extend(animation.frame_time.to_be_bytes());
            out.extend(narrow_u16("frame count", animation.frames.len())?.to_be_bytes());
            for frame in &animation.frames {
                // Every frame carries exactly slice_count bytes on the wire.
                for sl in 0..stack.slice_count {
                    out.push(frame.slices.get(sl).map_or(0, |s| s.shading));
                }
            }
        }
    }
    Ok(out)
}
