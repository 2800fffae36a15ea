//! Error types shared by the canvas, the document command layer and the
//! container codec.

use thiserror::Error;

/// Faults raised by [`crate::canvas::PixelCanvas`] palette and region helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanvasError {
    #[error("palette is full ({max} entries)")]
    PaletteFull { max: usize },
    #[error("palette index {index} out of range (palette has {len} entries)")]
    PaletteIndexOutOfRange { index: usize, len: usize },
    #[error("region {width}x{height} at ({x}, {y}) lies outside the {canvas_width}x{canvas_height} canvas")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },
    #[error("rotating by 90 degrees needs a square region, got {width}x{height}")]
    NonSquareRotation { width: u32, height: u32 },
}

/// User-input faults raised by document commands.
///
/// A command returns one of these before it mutates anything, so a rejected
/// command leaves the document exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("stack not found: {0}")]
    StackNotFound(String),
    #[error("animation not found: {animation} (in stack {stack})")]
    AnimationNotFound { stack: String, animation: String },
    #[error("frame {index} out of range ({len} frames in {animation})")]
    FrameOutOfRange {
        animation: String,
        index: usize,
        len: usize,
    },
    #[error("slice {index} out of range ({len} slices in {stack})")]
    SliceOutOfRange { stack: String, index: usize, len: usize },
    #[error("stack index {index} out of range ({len} stacks)")]
    StackIndexOutOfRange { index: usize, len: usize },
    #[error("animation index {index} out of range ({len} animations in {stack})")]
    AnimationIndexOutOfRange {
        stack: String,
        index: usize,
        len: usize,
    },
    #[error("name already in use: {0}")]
    DuplicateName(String),
    #[error("name is {0} bytes long, the limit is 255")]
    NameTooLong(usize),
    #[error("name must not be empty")]
    EmptyName,
    #[error("invalid slice count {count} for stack {stack} ({current} slices)")]
    InvalidSliceCount {
        stack: String,
        count: usize,
        current: usize,
    },
    #[error("invalid frame size {width}x{height}")]
    InvalidFrameSize { width: u32, height: u32 },
    #[error("nothing is selected")]
    EmptySelection,
    #[error("clipboard is empty")]
    EmptyClipboard,
    #[error("command was undone before it was ever applied")]
    NotApplied,
    #[error(transparent)]
    Canvas(#[from] CanvasError),
}

/// Format faults raised while decoding or encoding a container.
///
/// Every variant is fatal to the call that raised it; there is no partial
/// document recovery.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing PNG signature")]
    BadSignature,
    #[error("incomplete or corrupt file: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("CRC mismatch in {chunk} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        chunk: String,
        stored: u32,
        computed: u32,
    },
    #[error("required {0} chunk is missing")]
    MissingChunk(&'static str),
    #[error("unsupported color type {0}")]
    UnsupportedColorType(u8),
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
    #[error("unsupported interlace method {0}")]
    UnsupportedInterlace(u8),
    #[error("unsupported {what} method {value}")]
    UnsupportedMethod { what: &'static str, value: u8 },
    #[error("stAx version is {0}, expected 0")]
    UnsupportedStaxVersion(u8),
    #[error("invalid filter algorithm {filter} on row {row}")]
    InvalidFilter { row: usize, filter: u8 },
    #[error("image data ended after {rows} of {expected} rows")]
    ShortImageData { rows: usize, expected: usize },
    #[error("failed to inflate image data: {0}")]
    Inflate(std::io::Error),
    #[error("{what} ({value}) does not fit in the container format")]
    MetadataOverflow { what: &'static str, value: usize },
    #[error("pixel index {index} at ({x}, {y}) is outside the {palette_len}-entry palette")]
    InvalidPixelIndex {
        x: u32,
        y: u32,
        index: u8,
        palette_len: usize,
    },
    #[error("palette has {0} entries, the container allows at most 256")]
    PaletteTooLarge(usize),
    #[error("image export failed: {0}")]
    Image(#[from] image::ImageError),
}

pub type DocumentResult<T> = Result<T, DocumentError>;
pub type CodecResult<T> = Result<T, CodecError>;
