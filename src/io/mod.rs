//! Container codec: PNG with a palette, a `stAx` metadata chunk and
//! verbatim ancillary chunks.

pub mod chunk;
pub mod filter;
pub mod stax_chunk;

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use color_quant::NeuQuant;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::Rgba;
use tracing::{debug, info, warn};

use crate::canvas::{MAX_PALETTE_LEN, PixelCanvas, pack_rgba};
use crate::config::EditorSettings;
use crate::error::{CodecError, CodecResult};
use crate::project::{DocumentState, SpriteDocument};
use crate::stax::StaxSheet;
use chunk::{ByteReader, ChunkReader, IDAT, IEND, IHDR, PLTE, RawChunk, SIGNATURE, TEXT, TRNS, write_chunk};
use stax_chunk::STAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecOptions {
    /// Reject chunks whose stored CRC does not match.
    pub verify_crc: bool,
    /// zlib level, 0-9.
    pub compression_level: u32,
    /// IDAT payload is split into chunks of at most this many bytes.
    pub idat_chunk_size: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            verify_crc: true,
            compression_level: 6,
            idat_chunk_size: 1 << 16,
        }
    }
}

impl CodecOptions {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            verify_crc: settings.verify_crc,
            compression_level: settings.compression_level.min(9),
            idat_chunk_size: settings.idat_chunk_size.max(1),
        }
    }
}

// ============================================================================
// HEADER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColorType {
    Rgb,
    Indexed,
    Rgba,
}

impl ColorType {
    fn from_u8(value: u8) -> CodecResult<Self> {
        match value {
            2 => Ok(Self::Rgb),
            3 => Ok(Self::Indexed),
            6 => Ok(Self::Rgba),
            other => Err(CodecError::UnsupportedColorType(other)),
        }
    }

    /// Bytes per pixel at bit depth 8.
    fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Indexed => 1,
            Self::Rgba => 4,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Header {
    width: u32,
    height: u32,
    color_type: ColorType,
}

impl Header {
    fn parse(data: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(data);
        let width = r.u32()?;
        let height = r.u32()?;
        let bit_depth = r.u8()?;
        let color_type = ColorType::from_u8(r.u8()?)?;
        if bit_depth != 8 {
            return Err(CodecError::UnsupportedBitDepth(bit_depth));
        }
        let compression = r.u8()?;
        if compression != 0 {
            return Err(CodecError::UnsupportedMethod { what: "compression", value: compression });
        }
        let filter = r.u8()?;
        if filter != 0 {
            return Err(CodecError::UnsupportedMethod { what: "filter", value: filter });
        }
        let interlace = r.u8()?;
        if interlace != 0 {
            return Err(CodecError::UnsupportedInterlace(interlace));
        }
        Ok(Self { width, height, color_type })
    }

    fn indexed(width: u32, height: u32) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[..4].copy_from_slice(&width.to_be_bytes());
        out[4..8].copy_from_slice(&height.to_be_bytes());
        out[8] = 8;
        out[9] = 3;
        out
    }
}

// ============================================================================
// DECODE
// ============================================================================

/// tEXt payload: Latin-1 keyword, NUL, Latin-1 text.
fn parse_text(data: &[u8]) -> Option<(String, String)> {
    let nul = data.iter().position(|&b| b == 0)?;
    if nul == 0 || nul > 79 {
        return None;
    }
    let latin1 = |bytes: &[u8]| bytes.iter().map(|&b| b as char).collect::<String>();
    Some((latin1(&data[..nul]), latin1(&data[nul + 1..])))
}

fn encode_text(key: &str, value: &str) -> Vec<u8> {
    let latin1 = |s: &str| s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect::<Vec<u8>>();
    let mut out = latin1(key);
    out.push(0);
    out.extend(latin1(value));
    out
}

fn inflate(idat: &[u8]) -> CodecResult<Vec<u8>> {
    let mut raw = Vec::new();
    ZlibDecoder::new(idat).read_to_end(&mut raw).map_err(CodecError::Inflate)?;
    Ok(raw)
}

/// Palette from PLTE with tRNS alpha. Entries past the end of tRNS are
/// opaque.
fn indexed_palette(plte: &[u8], trns: Option<&[u8]>) -> CodecResult<Vec<Rgba<u8>>> {
    let count = plte.len() / 3;
    if count > MAX_PALETTE_LEN {
        return Err(CodecError::PaletteTooLarge(count));
    }
    let alpha = trns.unwrap_or(&[]);
    Ok(plte
        .chunks_exact(3)
        .enumerate()
        .map(|(i, rgb)| Rgba([rgb[0], rgb[1], rgb[2], alpha.get(i).copied().unwrap_or(255)]))
        .collect())
}

/// Reduce to at most 256 colors with NeuQuant, then map each pixel to its
/// nearest entry.
fn quantize(width: u32, height: u32, colors: &[Rgba<u8>]) -> PixelCanvas {
    let bytes: Vec<u8> = colors.iter().flat_map(|c| c.0).collect();
    let nq = NeuQuant::new(10, MAX_PALETTE_LEN, &bytes);
    let palette: Vec<Rgba<u8>> = (0..MAX_PALETTE_LEN).filter_map(|i| nq.lookup(i)).map(Rgba).collect();
    let mut canvas = PixelCanvas::from_parts(width, height, palette, Vec::new());
    let mut nearest: HashMap<u32, u8> = HashMap::new();
    let pixels = colors
        .iter()
        .map(|&c| {
            *nearest
                .entry(pack_rgba(c))
                .or_insert_with(|| canvas.closest_palette_color(c).unwrap_or(0))
        })
        .collect();
    canvas.pixels = pixels;
    canvas
}

/// Build an indexed canvas from true-color pixels, one palette entry per
/// distinct color in first-seen order.
fn index_true_color(width: u32, height: u32, colors: &[Rgba<u8>]) -> PixelCanvas {
    let mut canvas = PixelCanvas::new(width, height);
    let mut seen: HashMap<u32, u8> = HashMap::new();
    let mut pixels = Vec::with_capacity(colors.len());
    for &color in colors {
        let key = pack_rgba(color);
        let index = match seen.get(&key) {
            Some(&index) => index,
            None => match canvas.add_new_color(color) {
                Ok(index) => {
                    seen.insert(key, index);
                    index
                }
                Err(_) => {
                    warn!(width, height, "more than 256 colors, quantizing");
                    return quantize(width, height, colors);
                }
            },
        };
        pixels.push(index);
    }
    canvas.pixels = pixels;
    canvas
}

fn build_canvas(header: Header, raw: &[u8], plte: &[u8], trns: Option<&[u8]>) -> CodecResult<PixelCanvas> {
    let Header { width, height, color_type } = header;
    match color_type {
        ColorType::Indexed => {
            let palette = indexed_palette(plte, trns)?;
            if let Some(pos) = raw.iter().position(|&i| i as usize >= palette.len()) {
                return Err(CodecError::InvalidPixelIndex {
                    x: (pos % width as usize) as u32,
                    y: (pos / width as usize) as u32,
                    index: raw[pos],
                    palette_len: palette.len(),
                });
            }
            Ok(PixelCanvas::from_parts(width, height, palette, raw.to_vec()))
        }
        ColorType::Rgb => {
            // 8-bit RGB tRNS: three u16 samples naming one transparent color.
            let key = trns.filter(|t| t.len() >= 6).map(|t| [t[1], t[3], t[5]]);
            let colors: Vec<Rgba<u8>> = raw
                .chunks_exact(3)
                .map(|p| {
                    let alpha = if key == Some([p[0], p[1], p[2]]) { 0 } else { 255 };
                    Rgba([p[0], p[1], p[2], alpha])
                })
                .collect();
            Ok(index_true_color(width, height, &colors))
        }
        ColorType::Rgba => {
            let colors: Vec<Rgba<u8>> = raw.chunks_exact(4).map(|p| Rgba([p[0], p[1], p[2], p[3]])).collect();
            Ok(index_true_color(width, height, &colors))
        }
    }
}

/// Decode container bytes into a document state.
pub fn decode(bytes: &[u8], options: &CodecOptions) -> CodecResult<DocumentState> {
    let mut header = None;
    let mut plte: Vec<u8> = Vec::new();
    let mut trns: Option<Vec<u8>> = None;
    let mut idat: Vec<u8> = Vec::new();
    let mut saw_idat = false;
    let mut saw_end = false;
    let mut sheet: Option<StaxSheet> = None;
    let mut text = BTreeMap::new();
    let mut ancillary: Vec<RawChunk> = Vec::new();

    for chunk in ChunkReader::new(bytes, options.verify_crc)? {
        let chunk = chunk?;
        match chunk.kind {
            IHDR => header = Some(Header::parse(&chunk.data)?),
            PLTE => plte = chunk.data,
            TRNS => trns = Some(chunk.data),
            IDAT => {
                saw_idat = true;
                idat.extend_from_slice(&chunk.data);
            }
            STAX => sheet = Some(stax_chunk::parse(&chunk.data)?),
            IEND => saw_end = true,
            TEXT => match parse_text(&chunk.data) {
                Some((key, value)) => {
                    text.insert(key, value);
                }
                None => ancillary.push(chunk),
            },
            _ if chunk.is_ancillary() => ancillary.push(chunk),
            _ => warn!(kind = %chunk.kind_str(), "skipping unknown critical chunk"),
        }
    }

    let header = header.ok_or(CodecError::MissingChunk("IHDR"))?;
    if !saw_idat {
        return Err(CodecError::MissingChunk("IDAT"));
    }
    if !saw_end {
        return Err(CodecError::MissingChunk("IEND"));
    }

    let raw = inflate(&idat)?;
    let channels = header.color_type.channels();
    let stride = header.width as usize * channels;
    let pixels = filter::unfilter_scanlines(&raw, stride, header.height as usize, channels)?;
    let canvas = build_canvas(header, &pixels, &plte, trns.as_deref())?;

    let sheet = sheet.unwrap_or_else(|| StaxSheet::new(header.width, header.height));
    let mut state = DocumentState::new(canvas, sheet);
    state.text = text;
    state.ancillary = ancillary;
    if let Some((w, h)) = state.fit_canvas_to_sheet() {
        warn!(
            from = %format!("{w}x{h}"),
            to = %format!("{}x{}", state.width(), state.height()),
            "canvas grown to fit stack metadata"
        );
    }
    debug!(
        width = state.width(),
        height = state.height(),
        colors = state.canvas.palette.len(),
        stacks = state.sheet.stacks.len(),
        "decoded container"
    );
    Ok(state)
}

// ============================================================================
// ENCODE
// ============================================================================

fn validate(canvas: &PixelCanvas) -> CodecResult<()> {
    let len = canvas.palette.len();
    if len > MAX_PALETTE_LEN {
        return Err(CodecError::PaletteTooLarge(len));
    }
    if let Some(pos) = canvas.pixels.iter().position(|&i| i as usize >= len) {
        let width = canvas.width.max(1) as usize;
        return Err(CodecError::InvalidPixelIndex {
            x: (pos % width) as u32,
            y: (pos / width) as u32,
            index: canvas.pixels[pos],
            palette_len: len,
        });
    }
    Ok(())
}

/// Encode a document state. Always indexed, bit depth 8, filter None.
pub fn encode(state: &DocumentState, options: &CodecOptions) -> CodecResult<Vec<u8>> {
    let canvas = &state.canvas;
    validate(canvas)?;
    let stax = stax_chunk::write(&state.sheet)?;

    let mut out = SIGNATURE.to_vec();
    write_chunk(&mut out, &IHDR, &Header::indexed(canvas.width, canvas.height))?;

    if !canvas.palette.is_empty() {
        let plte: Vec<u8> = canvas.palette.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();
        write_chunk(&mut out, &PLTE, &plte)?;
        if let Some(last) = canvas.palette.iter().rposition(|c| c[3] != 255) {
            let alpha: Vec<u8> = canvas.palette[..=last].iter().map(|c| c[3]).collect();
            write_chunk(&mut out, &TRNS, &alpha)?;
        }
    }

    write_chunk(&mut out, &STAX, &stax)?;
    for (key, value) in &state.text {
        write_chunk(&mut out, &TEXT, &encode_text(key, value))?;
    }
    for chunk in &state.ancillary {
        write_chunk(&mut out, &chunk.kind, &chunk.data)?;
    }

    let filtered = filter::filter_none(&canvas.pixels, canvas.width as usize);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(options.compression_level.min(9)));
    encoder.write_all(&filtered)?;
    let compressed = encoder.finish()?;
    for part in compressed.chunks(options.idat_chunk_size.max(1)) {
        write_chunk(&mut out, &IDAT, part)?;
    }

    write_chunk(&mut out, &IEND, &[])?;
    debug!(bytes = out.len(), idat = compressed.len(), "encoded container");
    Ok(out)
}

// ============================================================================
// FILES
// ============================================================================

pub fn load_document(path: &Path, options: &CodecOptions) -> CodecResult<SpriteDocument> {
    let bytes = std::fs::read(path)?;
    let state = decode(&bytes, options)?;
    info!(path = %path.display(), "opened document");
    Ok(SpriteDocument::from_state(Some(path.to_path_buf()), state))
}

/// Encode and write `doc`, then adopt `path` as its file and mark it clean.
pub fn save_document(doc: &mut SpriteDocument, path: &Path, options: &CodecOptions) -> CodecResult<()> {
    let bytes = doc.encode(options)?;
    std::fs::write(path, &bytes)?;
    doc.path = Some(path.to_path_buf());
    doc.update_name_from_path();
    doc.mark_clean();
    info!(path = %path.display(), bytes = bytes.len(), "saved document");
    Ok(())
}

/// Write already encoded bytes on a worker thread. Encode on the calling
/// thread first so the document is never shared.
pub fn save_in_background(bytes: Vec<u8>, path: PathBuf) -> JoinHandle<CodecResult<()>> {
    std::thread::spawn(move || match std::fs::write(&path, &bytes) {
        Ok(()) => {
            info!(path = %path.display(), bytes = bytes.len(), "background save OK");
            Ok(())
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "background save FAILED");
            Err(e.into())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stax::StaxStack;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const HALF: Rgba<u8> = Rgba([0, 0, 255, 128]);

    fn state() -> DocumentState {
        let mut sheet = StaxSheet::new(4, 2);
        sheet.stacks.push(StaxStack::new("body", 2));
        let mut state = DocumentState::from_sheet(sheet);
        state.canvas.palette.extend([RED, HALF]);
        state.canvas.set_pixels(0, 0, 8, 2, &[0, 1, 2, 0, 1, 1, 2, 2, 2, 2, 1, 1, 0, 0, 0, 1]);
        state
    }

    /// Hand-built file with the given IHDR fields and raw rows.
    fn png(color_type: u8, width: u32, height: u32, extra: &[([u8; 4], Vec<u8>)], rows: &[u8]) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        let mut ihdr = Header::indexed(width, height);
        ihdr[9] = color_type;
        write_chunk(&mut out, &IHDR, &ihdr).unwrap();
        for (kind, data) in extra {
            write_chunk(&mut out, kind, data).unwrap();
        }
        let channels = ColorType::from_u8(color_type).unwrap().channels();
        let filtered = filter::filter_none(rows, width as usize * channels);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&filtered).unwrap();
        write_chunk(&mut out, &IDAT, &encoder.finish().unwrap()).unwrap();
        write_chunk(&mut out, &IEND, &[]).unwrap();
        out
    }

    #[test]
    fn round_trip_preserves_state() {
        let mut original = state();
        original.text.insert("Software".into(), "staxie".into());
        original.ancillary.push(RawChunk::new(*b"zzZz", vec![1, 2, 3]));
        let options = CodecOptions {
            idat_chunk_size: 8,
            ..Default::default()
        };
        let bytes = encode(&original, &options).unwrap();
        let decoded = decode(&bytes, &options).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn trns_is_trimmed_after_last_translucent_entry() {
        let mut s = state();
        s.canvas.palette = vec![HALF, RED, RED];
        let bytes = encode(&s, &CodecOptions::default()).unwrap();
        let trns: Vec<RawChunk> = ChunkReader::new(&bytes, true)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|c| c.kind == TRNS)
            .collect();
        assert_eq!(trns, vec![RawChunk::new(TRNS, vec![128])]);
    }

    #[test]
    fn chunk_order() {
        let mut s = state();
        s.ancillary.push(RawChunk::new(*b"abCd", vec![]));
        let bytes = encode(&s, &CodecOptions::default()).unwrap();
        let kinds: Vec<[u8; 4]> = ChunkReader::new(&bytes, true)
            .unwrap()
            .map(|c| c.unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![IHDR, PLTE, TRNS, STAX, *b"abCd", IDAT, IEND]);
    }

    #[test]
    fn missing_trns_entries_are_opaque() {
        let bytes = png(3, 2, 1, &[(PLTE, vec![1, 2, 3, 4, 5, 6]), (TRNS, vec![9])], &[0, 1]);
        let state = decode(&bytes, &CodecOptions::default()).unwrap();
        assert_eq!(state.canvas.palette, vec![Rgba([1, 2, 3, 9]), Rgba([4, 5, 6, 255])]);
        assert_eq!(state.sheet, StaxSheet::new(2, 1));
    }

    #[test]
    fn rgba_is_indexed_with_dedup() {
        let rows = [255, 0, 0, 255, 0, 0, 0, 0, 255, 0, 0, 255];
        let state = decode(&png(6, 3, 1, &[], &rows), &CodecOptions::default()).unwrap();
        assert_eq!(state.canvas.palette, vec![RED, CLEAR]);
        assert_eq!(state.canvas.pixels, vec![0, 1, 0]);
    }

    #[test]
    fn rgb_transparency_key() {
        let rows = [1, 2, 3, 9, 9, 9];
        let trns = vec![0, 9, 0, 9, 0, 9];
        let state = decode(&png(2, 2, 1, &[(TRNS, trns)], &rows), &CodecOptions::default()).unwrap();
        assert_eq!(state.canvas.palette, vec![Rgba([1, 2, 3, 255]), Rgba([9, 9, 9, 0])]);
    }

    #[test]
    fn many_colors_are_quantized() {
        let width = 32u32;
        let rows: Vec<u8> = (0..width * 16)
            .flat_map(|i| [(i % 256) as u8, (i / 2 % 256) as u8, (i * 7 % 256) as u8, 255])
            .collect();
        let state = decode(&png(6, width, 16, &[], &rows), &CodecOptions::default()).unwrap();
        assert!(state.canvas.palette.len() <= MAX_PALETTE_LEN);
        assert!(state.canvas.pixels.iter().all(|&i| (i as usize) < state.canvas.palette.len()));
    }

    #[test]
    fn unsupported_color_type_fails() {
        let bytes = png(3, 1, 1, &[(PLTE, vec![0, 0, 0])], &[0]);
        let mut patched = bytes.clone();
        // IHDR data starts after signature, length and type.
        patched[8 + 8 + 9] = 0;
        assert!(matches!(
            decode(&patched, &CodecOptions { verify_crc: false, ..Default::default() }),
            Err(CodecError::UnsupportedColorType(0))
        ));
    }

    #[test]
    fn wrong_stax_version_fails() {
        let bytes = png(3, 1, 1, &[(PLTE, vec![0, 0, 0]), (STAX, vec![1, 0, 1, 0, 1, 0, 0])], &[0]);
        assert!(matches!(
            decode(&bytes, &CodecOptions::default()),
            Err(CodecError::UnsupportedStaxVersion(1))
        ));
    }

    #[test]
    fn unknown_critical_chunk_is_skipped() {
        let bytes = png(3, 1, 1, &[(PLTE, vec![0, 0, 0]), (*b"ABCD", vec![5])], &[0]);
        let state = decode(&bytes, &CodecOptions::default()).unwrap();
        assert!(state.ancillary.is_empty());
    }

    #[test]
    fn index_past_palette_fails() {
        let bytes = png(3, 2, 1, &[(PLTE, vec![0, 0, 0])], &[0, 3]);
        assert!(matches!(
            decode(&bytes, &CodecOptions::default()),
            Err(CodecError::InvalidPixelIndex { x: 1, y: 0, index: 3, .. })
        ));
    }

    #[test]
    fn canvas_grows_to_fit_metadata() {
        let mut sheet = StaxSheet::new(2, 2);
        sheet.stacks.push(StaxStack::new("a", 2));
        let stax = stax_chunk::write(&sheet).unwrap();
        let bytes = png(3, 1, 1, &[(PLTE, vec![0, 0, 0]), (STAX, stax)], &[0]);
        let state = decode(&bytes, &CodecOptions::default()).unwrap();
        assert_eq!((state.width(), state.height()), (4, 2));
        assert!(state.layout_is_consistent());
    }

    #[test]
    fn encode_rejects_dangling_index() {
        let mut s = state();
        s.canvas.set_pixel(3, 1, 9);
        assert!(matches!(
            encode(&s, &CodecOptions::default()),
            Err(CodecError::InvalidPixelIndex { x: 3, y: 1, index: 9, palette_len: 3 })
        ));
    }

    #[test]
    fn truncated_file_fails() {
        let bytes = encode(&state(), &CodecOptions::default()).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 20], &CodecOptions::default()),
            Err(CodecError::Truncated { .. })
        ));
    }
}
