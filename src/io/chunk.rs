// ============================================================================
// CHUNK STREAM — signature, length/type/data/crc framing
// ============================================================================

use flate2::Crc;
use tracing::trace;

use crate::error::{CodecError, CodecResult};

/// PNG file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub const IHDR: [u8; 4] = *b"IHDR";
pub const PLTE: [u8; 4] = *b"PLTE";
pub const TRNS: [u8; 4] = *b"tRNS";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";
pub const TEXT: [u8; 4] = *b"tEXt";

/// One chunk as it sits in the file, minus length and CRC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChunk {
    pub kind: [u8; 4],
    pub data: Vec<u8>,
}

impl RawChunk {
    pub fn new(kind: [u8; 4], data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    /// Lowercase fourth type byte.
    pub fn is_ancillary(&self) -> bool {
        self.kind[3].is_ascii_lowercase()
    }

    pub fn crc(&self) -> u32 {
        crc32(&self.kind, &self.data)
    }
}

/// CRC-32 (IEEE) over type and data.
pub fn crc32(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    crc.sum()
}

// ----------------------------------------------------------------------------
// Big-endian cursor
// ----------------------------------------------------------------------------

/// Bounds-checked big-endian reader. Running past the end is a
/// `Truncated` error, never a panic.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Added to reported offsets so errors point into the whole file.
    base: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_base(bytes, 0)
    }

    pub fn with_base(bytes: &'a [u8], base: usize) -> Self {
        Self { bytes, pos: 0, base }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, count: usize) -> CodecResult<&'a [u8]> {
        if count > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.base + self.pos,
                needed: count,
                available: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }
}

// ----------------------------------------------------------------------------
// Reading
// ----------------------------------------------------------------------------

/// Iterates the chunks after the signature. Stops after `IEND` or at the
/// end of input.
pub struct ChunkReader<'a> {
    reader: ByteReader<'a>,
    verify_crc: bool,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(bytes: &'a [u8], verify_crc: bool) -> CodecResult<Self> {
        if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
            return Err(CodecError::BadSignature);
        }
        Ok(Self {
            reader: ByteReader::with_base(&bytes[SIGNATURE.len()..], SIGNATURE.len()),
            verify_crc,
            done: false,
        })
    }

    fn read_chunk(&mut self) -> CodecResult<RawChunk> {
        let length = self.reader.u32()? as usize;
        let kind: [u8; 4] = self.reader.array()?;
        let data = self.reader.bytes(length)?.to_vec();
        let stored = self.reader.u32()?;
        let chunk = RawChunk::new(kind, data);
        if self.verify_crc {
            let computed = chunk.crc();
            if computed != stored {
                return Err(CodecError::CrcMismatch {
                    chunk: chunk.kind_str(),
                    stored,
                    computed,
                });
            }
        }
        trace!(kind = %chunk.kind_str(), length, "read chunk");
        Ok(chunk)
    }
}

impl Iterator for ChunkReader<'_> {
    type Item = CodecResult<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.reader.is_empty() {
            return None;
        }
        let result = self.read_chunk();
        match &result {
            Ok(chunk) if chunk.kind == IEND => self.done = true,
            Err(_) => self.done = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

// ----------------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------------

/// Append one framed chunk to `out`.
pub fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) -> CodecResult<()> {
    let length = u32::try_from(data.len()).map_err(|_| CodecError::MetadataOverflow {
        what: "chunk length",
        value: data.len(),
    })?;
    out.reserve(12 + data.len());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(kind, data).to_be_bytes());
    trace!(kind = %String::from_utf8_lossy(kind), length, "wrote chunk");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(chunks: &[([u8; 4], &[u8])]) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        for (kind, data) in chunks {
            write_chunk(&mut out, kind, data).unwrap();
        }
        out
    }

    #[test]
    fn crc_of_iend_matches_reference() {
        assert_eq!(crc32(&IEND, &[]), 0xAE42_6082);
    }

    #[test]
    fn reads_back_written_chunks() {
        let bytes = file(&[(*b"abCd", b"xyz"), (IEND, b"")]);
        let chunks: Vec<RawChunk> = ChunkReader::new(&bytes, true)
            .unwrap()
            .collect::<CodecResult<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data, b"xyz");
        assert!(chunks[0].is_ancillary());
        assert!(RawChunk::new(*b"ABCd", Vec::new()).is_ancillary());
        assert!(!RawChunk::new(*b"abcD", Vec::new()).is_ancillary());
        assert!(!chunks[1].is_ancillary());
    }

    #[test]
    fn stops_at_iend() {
        let bytes = file(&[(IEND, b""), (*b"teSt", b"trailing")]);
        assert_eq!(ChunkReader::new(&bytes, true).unwrap().count(), 1);
    }

    #[test]
    fn rejects_bad_signature() {
        assert!(matches!(
            ChunkReader::new(b"GIF89a..", true),
            Err(CodecError::BadSignature)
        ));
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut bytes = file(&[(*b"teSt", b"0123456789")]);
        bytes.truncate(bytes.len() - 8);
        let first = ChunkReader::new(&bytes, true).unwrap().next().unwrap();
        assert!(matches!(first, Err(CodecError::Truncated { offset: 16, needed: 10, .. })));
    }

    #[test]
    fn crc_mismatch_detected_only_when_verifying() {
        let mut bytes = file(&[(*b"teSt", b"abc")]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let checked = ChunkReader::new(&bytes, true).unwrap().next().unwrap();
        assert!(matches!(checked, Err(CodecError::CrcMismatch { .. })));
        let unchecked = ChunkReader::new(&bytes, false).unwrap().next().unwrap();
        assert!(unchecked.is_ok());
    }

    #[test]
    fn byte_reader_big_endian() {
        let mut r = ByteReader::new(&[0x01, 0x02, 0x00, 0x00, 0x01, 0x00, 0x7F]);
        assert_eq!(r.u16().unwrap(), 0x0102);
        assert_eq!(r.u32().unwrap(), 0x100);
        assert_eq!(r.u8().unwrap(), 0x7F);
        assert!(r.u8().is_err());
    }
}
