// ============================================================================
// PALETTE COMMANDS
// ============================================================================

use image::Rgba;

use crate::canvas::MAX_PALETTE_LEN;
use crate::components::history::Command;
use crate::error::{CanvasError, DocumentError, DocumentResult};
use crate::project::DocumentState;

fn palette_len(state: &DocumentState) -> usize {
    state.canvas.palette.len()
}

/// Swap in a whole new palette. Pixels are not touched.
pub struct ReplacePalette {
    palette: Vec<Rgba<u8>>,
    previous: Option<Vec<Rgba<u8>>>,
}

impl ReplacePalette {
    pub fn new(palette: Vec<Rgba<u8>>) -> DocumentResult<Self> {
        if palette.len() > MAX_PALETTE_LEN {
            return Err(CanvasError::PaletteFull { max: MAX_PALETTE_LEN }.into());
        }
        Ok(Self { palette, previous: None })
    }
}

impl Command<DocumentState, DocumentError> for ReplacePalette {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.previous = Some(state.canvas.set_palette(self.palette.clone()));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let previous = self.previous.clone().ok_or(DocumentError::NotApplied)?;
        state.canvas.set_palette(previous);
        Ok(())
    }

    fn description(&self) -> String {
        "Replace palette".into()
    }

    fn memory_size(&self) -> usize {
        (self.palette.len() + self.previous.as_ref().map_or(0, Vec::len)) * 4
    }
}

/// Change one palette entry's color.
pub struct ReplaceSwatch {
    index: usize,
    color: Rgba<u8>,
    previous: Option<Rgba<u8>>,
}

impl ReplaceSwatch {
    pub fn new(index: usize, color: Rgba<u8>) -> Self {
        Self { index, color, previous: None }
    }
}

impl Command<DocumentState, DocumentError> for ReplaceSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.previous = Some(state.canvas.replace_color(self.index, self.color)?);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let previous = self.previous.ok_or(DocumentError::NotApplied)?;
        state.canvas.replace_color(self.index, previous)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Change swatch {}", self.index)
    }
}

/// Append a color to the end of the palette, even if it is already present.
pub struct AddSwatch {
    color: Rgba<u8>,
    added: Option<u8>,
}

impl AddSwatch {
    pub fn new(color: Rgba<u8>) -> Self {
        Self { color, added: None }
    }

    /// Index the color landed on, once applied.
    pub fn added_index(&self) -> Option<u8> {
        self.added
    }
}

impl Command<DocumentState, DocumentError> for AddSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.added = Some(state.canvas.add_new_color(self.color)?);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let added = self.added.ok_or(DocumentError::NotApplied)? as usize;
        if added + 1 != palette_len(state) {
            return Err(CanvasError::PaletteIndexOutOfRange {
                index: added,
                len: palette_len(state),
            }
            .into());
        }
        state.canvas.remove_color(added, false)?;
        Ok(())
    }

    fn description(&self) -> String {
        "Add swatch".into()
    }
}

/// Insert a color at `index`. With `shift_pixels`, pixels keep their colors.
pub struct InsertSwatch {
    index: usize,
    color: Rgba<u8>,
    shift_pixels: bool,
}

impl InsertSwatch {
    pub fn new(index: usize, color: Rgba<u8>, shift_pixels: bool) -> Self {
        Self { index, color, shift_pixels }
    }
}

impl Command<DocumentState, DocumentError> for InsertSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        state.canvas.insert_color(self.index, self.color, self.shift_pixels)?;
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        state.canvas.remove_color(self.index, self.shift_pixels)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Insert swatch {}", self.index)
    }
}

/// Remove a palette entry.
///
/// Pixels using it are first repainted with `replacement` when one is
/// given. With `shift_pixels`, indices above the removed entry move down so
/// the remaining pixels keep their colors. Undo puts the entry back and
/// restores every pixel that used it.
pub struct RemoveSwatch {
    index: usize,
    replacement: Option<u8>,
    shift_pixels: bool,
    removed: Option<(Rgba<u8>, Vec<(u32, u32)>)>,
}

impl RemoveSwatch {
    pub fn new(index: usize, replacement: Option<u8>, shift_pixels: bool) -> Self {
        Self {
            index,
            replacement,
            shift_pixels,
            removed: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for RemoveSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let len = palette_len(state);
        if self.index >= len {
            return Err(CanvasError::PaletteIndexOutOfRange { index: self.index, len }.into());
        }
        if let Some(r) = self.replacement {
            if r as usize >= len || r as usize == self.index {
                return Err(CanvasError::PaletteIndexOutOfRange { index: r as usize, len }.into());
            }
        }
        let users = state.canvas.positions_of(self.index as u8);
        if let Some(r) = self.replacement {
            for &(x, y) in &users {
                state.canvas.set_pixel_deferred(x, y, r);
            }
        }
        let color = state.canvas.remove_color(self.index, self.shift_pixels)?;
        self.removed = Some((color, users));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (color, users) = self.removed.as_ref().ok_or(DocumentError::NotApplied)?;
        state.canvas.insert_color(self.index, *color, self.shift_pixels)?;
        for &(x, y) in users {
            state.canvas.set_pixel_deferred(x, y, self.index as u8);
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove swatch {}", self.index)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.removed.as_ref().map_or(0, |(_, users)| users.len() * 8)
    }
}

/// Swap two entries. Its own inverse.
pub struct SwapSwatch {
    a: usize,
    b: usize,
    remap_pixels: bool,
}

impl SwapSwatch {
    pub fn new(a: usize, b: usize, remap_pixels: bool) -> Self {
        Self { a, b, remap_pixels }
    }
}

impl Command<DocumentState, DocumentError> for SwapSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        state.canvas.swap_colors(self.a, self.b, self.remap_pixels)?;
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.apply(state)
    }

    fn description(&self) -> String {
        format!("Swap swatches {} and {}", self.a, self.b)
    }
}

/// Move an entry to a new position. Undone by the reverse move.
pub struct MoveSwatch {
    from: usize,
    to: usize,
    remap_pixels: bool,
}

impl MoveSwatch {
    pub fn new(from: usize, to: usize, remap_pixels: bool) -> Self {
        Self { from, to, remap_pixels }
    }
}

impl Command<DocumentState, DocumentError> for MoveSwatch {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        state.canvas.move_color(self.from, self.to, self.remap_pixels)?;
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        state.canvas.move_color(self.to, self.from, self.remap_pixels)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Move swatch {} to {}", self.from, self.to)
    }
}
