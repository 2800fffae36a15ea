//! Core of a sprite stack editor: an indexed canvas, a command/undo engine,
//! the stack/animation/frame/slice document model and a PNG-based container
//! codec carrying the metadata in a `stAx` chunk.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod config;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod stax;

pub use canvas::{PixelCanvas, SelectionArea};
pub use components::history::{Command, CommandGroup, HistoryManager};
pub use error::{CanvasError, CodecError, DocumentError};
pub use io::CodecOptions;
pub use project::{DocumentState, SpriteDocument};
pub use stax::{Area, StaxSheet};
