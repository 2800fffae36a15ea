// ============================================================================
// CLIPBOARD — copy / paste of selected pixels between documents
// ============================================================================

use std::collections::BTreeMap;

use image::{Rgba, RgbaImage};

use crate::canvas::{PixelCanvas, SelectionArea, MAX_PALETTE_LEN};
use crate::components::history::CommandGroup;
use crate::error::{DocumentError, DocumentResult};
use crate::ops::palette::AddSwatch;
use crate::ops::pixel_ops::PixelCommand;
use crate::project::DocumentState;

/// Copied pixels: a deep copy of the source canvas cropped to the
/// selection's bounding box, plus the selection re-anchored to that box.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipboardContent {
    pub canvas: PixelCanvas,
    pub selection: SelectionArea,
    /// Top-left of the copied box in the source canvas.
    pub origin: (u32, u32),
}

impl ClipboardContent {
    /// Marked positions with their palette index, relative to the box.
    fn marked_pixels(&self) -> impl Iterator<Item = (u32, u32, u8)> + '_ {
        self.selection
            .marked_points()
            .into_iter()
            .map(|(x, y)| (x, y, self.canvas.get_pixel_unchecked(x, y)))
    }

    /// Distinct colors the marked pixels use, in palette order.
    fn used_colors(&self) -> BTreeMap<u8, Rgba<u8>> {
        self.marked_pixels()
            .filter_map(|(_, _, index)| self.canvas.palette_color(index).map(|c| (index, c)))
            .collect()
    }
}

/// Explicit clipboard owned by the caller. Never shares storage with a
/// document.
#[derive(Clone, Debug, Default)]
pub struct Clipboard {
    content: Option<ClipboardContent>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
    }

    pub fn clear(&mut self) {
        self.content = None;
    }

    pub fn content(&self) -> Option<&ClipboardContent> {
        self.content.as_ref()
    }

    /// Copy the selected pixels of `state`.
    pub fn copy(&mut self, state: &DocumentState) -> DocumentResult<()> {
        let points = state.selection.marked_points();
        let mut canvas = state.canvas.clone();
        let (ox, oy) = canvas.clip_to_mask(&points).ok_or(DocumentError::EmptySelection)?;
        let mut selection = SelectionArea::new(canvas.width, canvas.height);
        for (x, y) in points {
            selection.set_pixel(x - ox, y - oy, true);
        }
        selection.active = true;
        self.content = Some(ClipboardContent {
            canvas,
            selection,
            origin: (ox, oy),
        });
        Ok(())
    }

    /// Copy, then return the command that clears the copied pixels.
    pub fn cut(&mut self, state: &DocumentState) -> DocumentResult<PixelCommand> {
        self.copy(state)?;
        PixelCommand::delete_selection(state)
    }

    /// Colors the copied pixels use that `palette` lacks.
    pub fn missing_palette_colors(&self, palette: &[Rgba<u8>]) -> Vec<Rgba<u8>> {
        let Some(content) = &self.content else {
            return Vec::new();
        };
        let mut missing: Vec<Rgba<u8>> = Vec::new();
        for color in content.used_colors().into_values() {
            if !palette.contains(&color) && !missing.contains(&color) {
                missing.push(color);
            }
        }
        missing
    }

    /// Copied palette length minus `palette`'s length.
    pub fn palette_length_difference(&self, palette: &[Rgba<u8>]) -> isize {
        self.content
            .as_ref()
            .map_or(0, |c| c.canvas.palette.len() as isize - palette.len() as isize)
    }

    /// Build the paste at `(x, y)` as one undoable group.
    ///
    /// Colors are matched exactly against the target palette. Unmatched
    /// colors are appended when `add_missing` is set and there is room,
    /// otherwise mapped to the nearest target color. Pixels that land
    /// outside the target canvas are skipped.
    pub fn paste_command(
        &self,
        state: &DocumentState,
        x: i64,
        y: i64,
        add_missing: bool,
    ) -> DocumentResult<CommandGroup<DocumentState, DocumentError>> {
        let content = self.content.as_ref().ok_or(DocumentError::EmptyClipboard)?;
        let target = &state.canvas;
        let mut group = CommandGroup::new("Paste");

        let mut palette_len = target.palette.len();
        let mut appended: Vec<Rgba<u8>> = Vec::new();
        let mut mapping: BTreeMap<u8, u8> = BTreeMap::new();
        for (index, color) in content.used_colors() {
            let mapped = if let Some(found) = target.find_color(color) {
                found
            } else if let Some(pos) = appended.iter().position(|&c| c == color) {
                (target.palette.len() + pos) as u8
            } else if add_missing && palette_len < MAX_PALETTE_LEN {
                group.add(Box::new(AddSwatch::new(color)));
                appended.push(color);
                palette_len += 1;
                (palette_len - 1) as u8
            } else {
                target.closest_palette_color(color).unwrap_or(0)
            };
            mapping.insert(index, mapped);
        }

        let mut by_index: BTreeMap<u8, Vec<(u32, u32)>> = BTreeMap::new();
        for (px, py, index) in content.marked_pixels() {
            let (tx, ty) = (x + px as i64, y + py as i64);
            if !target.in_bounds(tx, ty) {
                continue;
            }
            let mapped = mapping.get(&index).copied().unwrap_or(index);
            by_index.entry(mapped).or_default().push((tx as u32, ty as u32));
        }
        for (index, points) in by_index {
            group.add(Box::new(PixelCommand::place_many(points, index)));
        }
        Ok(group)
    }

    /// The copied pixels as RGBA; unselected positions are transparent.
    pub fn selection_preview(&self) -> Option<RgbaImage> {
        let content = self.content.as_ref()?;
        let mut preview = RgbaImage::new(content.canvas.width, content.canvas.height);
        for (x, y, index) in content.marked_pixels() {
            if let Some(color) = content.canvas.palette_color(index) {
                preview.put_pixel(x, y, color);
            }
        }
        Some(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::Command;
    use crate::stax::StaxSheet;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn state(palette: &[Rgba<u8>]) -> DocumentState {
        let mut canvas = PixelCanvas::new(4, 4);
        canvas.palette = palette.to_vec();
        DocumentState::new(canvas, StaxSheet::new(4, 4))
    }

    fn source() -> DocumentState {
        let mut s = state(&[CLEAR, RED, BLUE]);
        s.canvas.set_pixel(1, 1, 1);
        s.canvas.set_pixel(2, 2, 2);
        s.selection.set_pixel(1, 1, true);
        s.selection.set_pixel(2, 2, true);
        s
    }

    #[test]
    fn copy_clips_and_reanchors() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&source()).unwrap();
        let content = clipboard.content().unwrap();
        assert_eq!(content.origin, (1, 1));
        assert_eq!((content.canvas.width, content.canvas.height), (2, 2));
        assert_eq!(content.selection.marked_points(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn copy_without_selection_fails() {
        let mut clipboard = Clipboard::new();
        assert_eq!(clipboard.copy(&state(&[CLEAR])), Err(DocumentError::EmptySelection));
        assert!(clipboard.is_empty());
    }

    #[test]
    fn copy_is_independent_of_source() {
        let mut src = source();
        let mut clipboard = Clipboard::new();
        clipboard.copy(&src).unwrap();
        src.canvas.set_pixel(1, 1, 0);
        assert_eq!(clipboard.content().unwrap().canvas.get_pixel(0, 0), Some(1));
    }

    #[test]
    fn palette_comparison() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&source()).unwrap();
        assert_eq!(clipboard.missing_palette_colors(&[CLEAR, RED]), vec![BLUE]);
        assert_eq!(clipboard.palette_length_difference(&[CLEAR]), 2);
    }

    #[test]
    fn paste_appends_missing_colors() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&source()).unwrap();
        let mut target = state(&[CLEAR, BLUE]);
        let before = target.clone();
        let mut paste = clipboard.paste_command(&target, 0, 0, true).unwrap();
        paste.apply(&mut target).unwrap();
        assert_eq!(target.canvas.palette, vec![CLEAR, BLUE, RED]);
        assert_eq!(target.canvas.get_pixel(0, 0), Some(2));
        assert_eq!(target.canvas.get_pixel(1, 1), Some(1));
        paste.unapply(&mut target).unwrap();
        assert_eq!(target, before);
    }

    #[test]
    fn paste_maps_to_nearest_when_not_adding() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&source()).unwrap();
        let mut target = state(&[CLEAR, Rgba([250, 0, 0, 255])]);
        let mut paste = clipboard.paste_command(&target, 3, 3, false).unwrap();
        paste.apply(&mut target).unwrap();
        assert_eq!(target.canvas.palette.len(), 2);
        assert_eq!(target.canvas.get_pixel(3, 3), Some(1));
    }

    #[test]
    fn paste_from_empty_clipboard() {
        let clipboard = Clipboard::new();
        assert!(matches!(
            clipboard.paste_command(&state(&[CLEAR]), 0, 0, true),
            Err(DocumentError::EmptyClipboard)
        ));
    }

    #[test]
    fn preview_shows_only_marked_pixels() {
        let mut clipboard = Clipboard::new();
        clipboard.copy(&source()).unwrap();
        let preview = clipboard.selection_preview().unwrap();
        assert_eq!(preview.get_pixel(0, 0), &RED);
        assert_eq!(preview.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }
}
