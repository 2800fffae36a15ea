use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::canvas::{PixelCanvas, SelectionArea};
use crate::components::history::{BoxedCommand, CommandGroup, HistoryManager};
use crate::error::{CodecResult, DocumentError, DocumentResult};
use crate::io::chunk::RawChunk;
use crate::io::{self, CodecOptions};
use crate::ops::pixel_ops::PixelCommand;
use crate::stax::{Area, StaxSheet};

/// A boxed command over the document state.
pub type DocCommand = BoxedCommand<DocumentState, DocumentError>;

// ============================================================================
// DOCUMENT STATE - the target every command mutates
// ============================================================================

/// Canvas, selection and metadata of one open file.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentState {
    pub canvas: PixelCanvas,
    /// Always the same size as `canvas`.
    pub selection: SelectionArea,
    pub sheet: StaxSheet,
    /// `tEXt` key/value pairs.
    pub text: BTreeMap<String, String>,
    /// Unrecognised ancillary chunks, written back verbatim.
    pub ancillary: Vec<RawChunk>,
}

/// Full-width rows cut out of the canvas, kept so they can be put back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowBand {
    pub y: u32,
    pub count: u32,
    pub pixels: Vec<u8>,
    pub mask: Vec<u8>,
}

impl RowBand {
    pub fn memory_size(&self) -> usize {
        self.pixels.len() + self.mask.len()
    }
}

impl DocumentState {
    pub fn new(canvas: PixelCanvas, sheet: StaxSheet) -> Self {
        let selection = SelectionArea::new(canvas.width, canvas.height);
        let mut state = Self {
            canvas,
            selection,
            sheet,
            text: BTreeMap::new(),
            ancillary: Vec::new(),
        };
        state.relayout();
        state
    }

    /// A blank canvas sized to hold `sheet`. Index 0 starts out as a
    /// transparent swatch so every pixel refers to a real entry.
    pub fn from_sheet(sheet: StaxSheet) -> Self {
        let (width, height) = sheet.required_size();
        let mut canvas = PixelCanvas::new(width, height);
        canvas.palette.push(Rgba([0, 0, 0, 0]));
        Self::new(canvas, sheet)
    }

    pub fn width(&self) -> u32 {
        self.canvas.width
    }

    pub fn height(&self) -> u32 {
        self.canvas.height
    }

    pub fn sheet_area(&self) -> Area {
        Area::new(0, 0, self.canvas.width, self.canvas.height)
    }

    /// Recompute cached slice positions. Every structural command ends here.
    pub fn relayout(&mut self) {
        self.sheet.cache_slice_positions();
    }

    /// Whether the metadata tree and the canvas agree.
    pub fn layout_is_consistent(&self) -> bool {
        self.selection.width() == self.canvas.width
            && self.selection.height() == self.canvas.height
            && self.sheet.verify_layout(self.canvas.width, self.canvas.height)
    }

    pub fn resize_canvas(&mut self, width: u32, height: u32) {
        self.canvas.resize(width, height);
        self.selection.resize(width, height);
    }

    /// Widen the canvas to at least `width`. Returns the previous width.
    pub fn ensure_width(&mut self, width: u32) -> u32 {
        let previous = self.canvas.width;
        if width > previous {
            debug!(from = previous, to = width, "widening canvas");
            self.resize_canvas(width, self.canvas.height);
        }
        previous
    }

    /// Grow the canvas to whatever the metadata needs. Returns the previous
    /// size when it had to change.
    pub fn fit_canvas_to_sheet(&mut self) -> Option<(u32, u32)> {
        let (need_w, need_h) = self.sheet.required_size();
        let (w, h) = (self.canvas.width, self.canvas.height);
        if need_w <= w && need_h <= h {
            return None;
        }
        self.resize_canvas(need_w.max(w), need_h.max(h));
        Some((w, h))
    }

    // ------------------------------------------------------------------
    // Row bands
    // ------------------------------------------------------------------

    /// Insert `count` empty rows at `y`.
    pub fn open_rows(&mut self, y: u32, count: u32) {
        let width = self.canvas.width as usize;
        let zeros = vec![0u8; width * count as usize];
        self.canvas.insert_rows(y, &zeros);
        self.selection.insert_rows(y, &zeros);
    }

    /// Cut `count` rows at `y`, returning them for a later [`Self::restore_rows`].
    pub fn close_rows(&mut self, y: u32, count: u32) -> DocumentResult<RowBand> {
        self.canvas.check_rect(0, y, self.canvas.width, count)?;
        Ok(RowBand {
            y,
            count,
            pixels: self.canvas.remove_rows(y, count),
            mask: self.selection.remove_rows(y, count),
        })
    }

    pub fn restore_rows(&mut self, band: &RowBand) {
        let width = self.canvas.width as usize;
        if band.pixels.len() == width * band.count as usize {
            self.canvas.insert_rows(band.y, &band.pixels);
        } else {
            warn!(y = band.y, rows = band.count, "canvas width changed, restored rows come back empty");
            self.canvas.insert_rows(band.y, &vec![0; width * band.count as usize]);
        }
        if band.mask.len() == width * band.count as usize {
            self.selection.insert_rows(band.y, &band.mask);
        } else {
            warn!(y = band.y, rows = band.count, "canvas width changed, restored rows lose their selection");
            self.selection.insert_rows(band.y, &vec![0; width * band.count as usize]);
        }
    }

    /// Insert a copy of rows `[src, src+count)` at `dst`.
    pub fn duplicate_rows(&mut self, src: u32, count: u32, dst: u32) -> DocumentResult<()> {
        let width = self.canvas.width;
        self.canvas.check_rect(0, src, width, count)?;
        let block = self.canvas.get_pixels(0, src, width, count);
        self.canvas.insert_rows(dst, &block);
        self.selection.insert_rows(dst, &vec![0; block.len()]);
        Ok(())
    }

    /// Move a row block; `to` is measured after the block is taken out.
    pub fn move_rows(&mut self, from: u32, count: u32, to: u32) -> DocumentResult<()> {
        self.canvas.check_rect(0, from, self.canvas.width, count)?;
        self.canvas.move_rows(from, count, to);
        self.selection.move_rows(from, count, to);
        Ok(())
    }

    /// Snapshot a rectangle, clipped to the canvas.
    pub fn capture_area(&self, area: Area) -> (Area, Vec<u8>) {
        let clipped = area
            .intersect(&self.sheet_area())
            .unwrap_or(Area::new(area.x, area.y, 0, 0));
        let pixels = self.canvas.get_pixels(clipped.x, clipped.y, clipped.width, clipped.height);
        (clipped, pixels)
    }

    pub fn restore_area(&mut self, area: Area, pixels: &[u8]) {
        if !area.is_empty() && self.canvas.contains_rect(area.x, area.y, area.width, area.height) {
            self.canvas.set_pixels(area.x, area.y, area.width, area.height, pixels);
        }
    }

    /// Render the sheet to RGBA.
    pub fn render_rgba(&self) -> RgbaImage {
        self.canvas.to_rgba_image()
    }
}

// ============================================================================
// VIEW - cursor, granularity and multi-selection
// ============================================================================

/// How much of the sheet pixel commands may touch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewGranularity {
    Slice,
    Frame,
    Animation,
    Stack,
    #[default]
    Sheet,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentView {
    pub stack: Option<usize>,
    pub animation: Option<usize>,
    pub frame: usize,
    pub slice: usize,
    pub granularity: ViewGranularity,
    /// Extra (frame, slice) pairs of the current animation that receive
    /// broadcast pixel commands.
    pub multi_select: Vec<(usize, usize)>,
}

impl DocumentView {
    /// Pull the cursor back inside the tree after a structural change.
    fn clamp_to(&mut self, sheet: &StaxSheet) {
        let Some(si) = self.stack.filter(|&si| si < sheet.stacks.len()) else {
            *self = Self {
                granularity: self.granularity,
                ..Self::default()
            };
            return;
        };
        self.stack = Some(si);
        let stack = &sheet.stacks[si];
        self.slice = self.slice.min(stack.slice_count.saturating_sub(1));
        match self.animation.filter(|&ai| ai < stack.animations.len()) {
            Some(ai) => {
                self.animation = Some(ai);
                let frames = stack.animations[ai].frames.len();
                self.frame = self.frame.min(frames.saturating_sub(1));
                self.multi_select
                    .retain(|&(f, s)| f < frames && s < stack.slice_count);
            }
            None => {
                self.animation = stack.animations.first().map(|_| 0);
                self.frame = 0;
                self.multi_select.clear();
            }
        }
    }
}

// ============================================================================
// SPRITE DOCUMENT
// ============================================================================

/// Single open document: state, history and view.
pub struct SpriteDocument {
    pub id: Uuid,
    pub state: DocumentState,
    pub history: HistoryManager<DocumentState, DocumentError>,
    pub view: DocumentView,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
}

impl SpriteDocument {
    pub fn new_untitled(untitled_counter: usize, frame_width: u32, frame_height: u32) -> Self {
        let state = DocumentState::from_sheet(StaxSheet::new(frame_width, frame_height));
        Self::with_state(format!("Untitled-{untitled_counter}"), None, state)
    }

    pub fn from_state(path: Option<PathBuf>, state: DocumentState) -> Self {
        let name = path
            .as_deref()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        Self::with_state(name, path, state)
    }

    fn with_state(name: String, path: Option<PathBuf>, state: DocumentState) -> Self {
        let mut view = DocumentView::default();
        view.clamp_to(&state.sheet);
        if !state.sheet.stacks.is_empty() {
            view.stack = Some(0);
            view.clamp_to(&state.sheet);
        }
        Self {
            id: Uuid::new_v4(),
            state,
            history: HistoryManager::default(),
            view,
            path,
            is_dirty: false,
            name,
        }
    }

    /// Decode container bytes into a new document.
    pub fn decode(bytes: &[u8], options: &CodecOptions) -> CodecResult<Self> {
        Ok(Self::from_state(None, io::decode(bytes, options)?))
    }

    pub fn encode(&self, options: &CodecOptions) -> CodecResult<Vec<u8>> {
        io::encode(&self.state, options)
    }

    // ------------------------------------------------------------------
    // Command submission
    // ------------------------------------------------------------------

    pub fn push(&mut self, command: DocCommand) -> DocumentResult<()> {
        self.history.push(&mut self.state, command)?;
        self.after_change();
        Ok(())
    }

    pub fn capture(&mut self) {
        self.history.capture();
    }

    pub fn release(&mut self, description: impl Into<String>) {
        self.history.release(description);
    }

    pub fn pop(&mut self) -> DocumentResult<Option<DocCommand>> {
        let popped = self.history.pop(&mut self.state)?;
        self.after_change();
        Ok(popped)
    }

    pub fn undo(&mut self) -> DocumentResult<Option<String>> {
        let undone = self.history.undo(&mut self.state)?;
        self.after_change();
        Ok(undone)
    }

    pub fn redo(&mut self) -> DocumentResult<Option<String>> {
        let redone = self.history.redo(&mut self.state)?;
        self.after_change();
        Ok(redone)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn after_change(&mut self) {
        self.view.clamp_to(&self.state.sheet);
        self.mark_dirty();
    }

    /// Push a pixel command through view clipping, the selection mask and
    /// multi-select broadcasting. Coordinates are absolute canvas
    /// coordinates for the current (frame, slice). While a selection is
    /// active only marked pixels are written. Each multi-selected pair
    /// receives a copy shifted by its offset from the current pair.
    pub fn push_pixel(&mut self, command: PixelCommand) -> DocumentResult<()> {
        let Some(mut base) = command.clipped(&self.view_area()) else {
            debug!("pixel command fell outside the view");
            return Ok(());
        };
        if self.state.selection.active {
            let Some(masked) = base.masked(&self.state.selection) else {
                debug!("pixel command touched no selected pixel");
                return Ok(());
            };
            base = masked;
        }
        let targets = self.broadcast_targets();
        if targets.is_empty() {
            return self.push(Box::new(base));
        }
        let origin = self.current_slice_area()?;
        let mut group = CommandGroup::new(format!("{} (broadcast)", base.describe()));
        for target in targets {
            let dx = target.x as i64 - origin.x as i64;
            let dy = target.y as i64 - origin.y as i64;
            if let Some(copy) = base.translated(dx, dy).and_then(|c| c.clipped(&target)) {
                group.add(Box::new(copy));
            }
        }
        if group.is_empty() {
            return Ok(());
        }
        self.push(Box::new(group))
    }

    /// Slice areas the current pixel command should be replayed on,
    /// including the current one.
    fn broadcast_targets(&self) -> Vec<Area> {
        let (Some(si), Some(ai)) = (self.view.stack, self.view.animation) else {
            return Vec::new();
        };
        if self.view.multi_select.is_empty() {
            return Vec::new();
        }
        let mut pairs = self.view.multi_select.clone();
        if !pairs.contains(&(self.view.frame, self.view.slice)) {
            pairs.push((self.view.frame, self.view.slice));
        }
        pairs
            .into_iter()
            .filter_map(|(f, s)| self.state.sheet.slice_area(si, ai, f, s).ok())
            .collect()
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    pub fn set_stack(&mut self, name: &str) -> DocumentResult<()> {
        let si = self.state.sheet.stack_index(name)?;
        self.view = DocumentView {
            stack: Some(si),
            granularity: self.view.granularity,
            ..DocumentView::default()
        };
        self.view.clamp_to(&self.state.sheet);
        Ok(())
    }

    pub fn set_animation(&mut self, name: &str) -> DocumentResult<()> {
        let si = self.view.stack.ok_or_else(|| DocumentError::StackNotFound(String::new()))?;
        let stack_name = self.state.sheet.stack(si)?.name.clone();
        let (_, ai) = self.state.sheet.animation_index(&stack_name, name)?;
        self.view.animation = Some(ai);
        self.view.frame = 0;
        self.view.multi_select.clear();
        Ok(())
    }

    pub fn set_frame(&mut self, frame: usize) -> DocumentResult<()> {
        let (si, ai) = self.current_animation()?;
        self.state.sheet.check_frame(si, ai, frame)?;
        self.view.frame = frame;
        Ok(())
    }

    pub fn set_slice(&mut self, slice: usize) -> DocumentResult<()> {
        let (si, _) = self.current_animation()?;
        self.state.sheet.check_slice(si, slice)?;
        self.view.slice = slice;
        Ok(())
    }

    pub fn set_granularity(&mut self, granularity: ViewGranularity) {
        self.view.granularity = granularity;
    }

    /// Select extra (frame, slice) pairs for broadcasting.
    pub fn set_multi_select(&mut self, pairs: Vec<(usize, usize)>) -> DocumentResult<()> {
        let (si, ai) = self.current_animation()?;
        for &(f, s) in &pairs {
            self.state.sheet.check_frame(si, ai, f)?;
            self.state.sheet.check_slice(si, s)?;
        }
        self.view.multi_select = pairs;
        Ok(())
    }

    fn current_animation(&self) -> DocumentResult<(usize, usize)> {
        let si = self.view.stack.ok_or_else(|| DocumentError::StackNotFound(String::new()))?;
        let stack = self.state.sheet.stack(si)?;
        let ai = self.view.animation.ok_or_else(|| DocumentError::AnimationNotFound {
            stack: stack.name.clone(),
            animation: String::new(),
        })?;
        Ok((si, ai))
    }

    fn current_slice_area(&self) -> DocumentResult<Area> {
        let (si, ai) = self.current_animation()?;
        self.state.sheet.slice_area(si, ai, self.view.frame, self.view.slice)
    }

    /// Area pixel commands are clipped to at the current granularity.
    /// Falls back to the whole sheet when the cursor does not resolve.
    pub fn view_area(&self) -> Area {
        let sheet = &self.state.sheet;
        let resolved = match (self.view.granularity, self.view.stack, self.view.animation) {
            (ViewGranularity::Sheet, _, _) => None,
            (ViewGranularity::Stack, Some(si), _) => sheet.stack_area(si).ok(),
            (ViewGranularity::Animation, Some(si), Some(ai)) => sheet.animation_area(si, ai).ok(),
            (ViewGranularity::Frame, Some(si), Some(ai)) => sheet.frame_area(si, ai, self.view.frame).ok(),
            (ViewGranularity::Slice, Some(si), Some(ai)) => {
                sheet.slice_area(si, ai, self.view.frame, self.view.slice).ok()
            }
            _ => None,
        };
        resolved.unwrap_or_else(|| self.state.sheet_area())
    }

    // ------------------------------------------------------------------
    // Area queries by name
    // ------------------------------------------------------------------

    pub fn stack_area(&self, stack: &str) -> DocumentResult<Area> {
        self.state.sheet.stack_area(self.state.sheet.stack_index(stack)?)
    }

    pub fn animation_area(&self, stack: &str, animation: &str) -> DocumentResult<Area> {
        let (si, ai) = self.state.sheet.animation_index(stack, animation)?;
        self.state.sheet.animation_area(si, ai)
    }

    pub fn frame_area(&self, stack: &str, animation: &str, frame: usize) -> DocumentResult<Area> {
        let (si, ai) = self.state.sheet.animation_index(stack, animation)?;
        self.state.sheet.frame_area(si, ai, frame)
    }

    pub fn slice_area(&self, stack: &str, animation: &str, frame: usize, slice: usize) -> DocumentResult<Area> {
        let (si, ai) = self.state.sheet.animation_index(stack, animation)?;
        self.state.sheet.slice_area(si, ai, frame, slice)
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    pub fn render_rgba(&self) -> RgbaImage {
        self.state.render_rgba()
    }

    /// Flatten the sheet to a plain RGBA PNG.
    pub fn export_rgba_png(&self, path: &Path) -> CodecResult<()> {
        self.render_rgba()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}
