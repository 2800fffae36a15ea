// ============================================================================
// STRUCTURAL OPERATIONS — stacks / animations / frames / slices
// ============================================================================
//
// Every command here edits the metadata tree and moves canvas rows or
// columns with it, then calls `relayout`. Vertical inserts open a band of
// empty rows at the insertion point, removals cut the band out (kept for
// undo), and reorders rotate one row block to its new position.

use crate::canvas::{PixelCanvas, SelectionArea};
use crate::components::history::Command;
use crate::error::{DocumentError, DocumentResult};
use crate::project::{DocumentState, RowBand};
use crate::stax::{validate_name, Area, StaxAnimation, StaxFrame, StaxSlice, StaxStack};

/// Where a block of `height` rows starting at index `from` lands when moved
/// to index `to`, measured after the block has been taken out.
/// `y_of(i)` is the top of item `i` before the move.
fn moved_block_y(y_of: impl Fn(usize) -> u32, from: usize, to: usize, height: u32) -> u32 {
    if to <= from {
        y_of(to)
    } else {
        y_of(to + 1) - height
    }
}

/// "`base` copy", then "`base` copy 2", ... until `taken` says no.
fn copy_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = format!("{base} copy");
    let mut n = 2;
    while taken(&candidate) {
        candidate = format!("{base} copy {n}");
        n += 1;
    }
    candidate
}

fn band_size(band: &Option<RowBand>) -> usize {
    band.as_ref().map_or(0, RowBand::memory_size)
}

// ============================================================================
// STACKS
// ============================================================================

/// Insert a new stack (one animation, one frame). Widens the canvas when
/// the stack is wider than anything before it.
pub struct AddStack {
    name: Option<String>,
    index: Option<usize>,
    slice_count: usize,
    applied: Option<(usize, u32)>,
}

impl AddStack {
    pub fn new(slice_count: usize) -> Self {
        Self {
            name: None,
            index: None,
            slice_count,
            applied: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

impl Command<DocumentState, DocumentError> for AddStack {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let sheet = &state.sheet;
        let name = self.name.clone().unwrap_or_else(|| sheet.next_stack_name());
        validate_name(&name)?;
        if sheet.find_stack(&name).is_some() {
            return Err(DocumentError::DuplicateName(name));
        }
        if self.slice_count == 0 {
            return Err(DocumentError::InvalidSliceCount {
                stack: name,
                count: 0,
                current: 0,
            });
        }
        let len = sheet.stacks.len();
        let si = self.index.unwrap_or(len);
        if si > len {
            return Err(DocumentError::StackIndexOutOfRange { index: si, len });
        }

        let stack = StaxStack::new(name.clone(), self.slice_count);
        let y = sheet.stack_y(si);
        let height = sheet.stack_height(&stack);
        let width = sheet.stack_width(&stack);

        let previous_width = state.ensure_width(width);
        state.open_rows(y, height);
        state.sheet.stacks.insert(si, stack);
        state.relayout();
        self.name = Some(name);
        self.applied = Some((si, previous_width));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, previous_width) = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.stack_area(si)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks.remove(si);
        if previous_width < state.width() {
            state.resize_canvas(previous_width, state.height());
        }
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        "Add stack".into()
    }
}

/// Remove a stack and its rows. The canvas keeps its width.
pub struct RemoveStack {
    name: String,
    removed: Option<(usize, StaxStack)>,
    band: Option<RowBand>,
}

impl RemoveStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            removed: None,
            band: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for RemoveStack {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let si = state.sheet.stack_index(&self.name)?;
        let area = state.sheet.stack_area(si)?;
        let band = state.close_rows(area.y, area.height)?;
        let stack = state.sheet.stacks.remove(si);
        state.relayout();
        self.removed = Some((si, stack));
        self.band = Some(band);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let ((si, stack), band) = match (&self.removed, &self.band) {
            (Some(removed), Some(band)) => (removed, band),
            _ => return Err(DocumentError::NotApplied),
        };
        state.sheet.stacks.insert(*si, stack.clone());
        state.restore_rows(band);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove stack {}", self.name)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + band_size(&self.band)
    }
}

pub struct RenameStack {
    name: String,
    new_name: String,
}

impl RenameStack {
    pub fn new(name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_name: new_name.into(),
        }
    }

    fn rename(state: &mut DocumentState, from: &str, to: &str) -> DocumentResult<()> {
        validate_name(to)?;
        let si = state.sheet.stack_index(from)?;
        if from != to && state.sheet.find_stack(to).is_some() {
            return Err(DocumentError::DuplicateName(to.to_string()));
        }
        state.sheet.stacks[si].name = to.to_string();
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for RenameStack {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        Self::rename(state, &self.name, &self.new_name)
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        Self::rename(state, &self.new_name, &self.name)
    }

    fn description(&self) -> String {
        format!("Rename stack {} to {}", self.name, self.new_name)
    }
}

/// Copy a stack, pixels included, directly below the original.
pub struct DuplicateStack {
    name: String,
    new_name: Option<String>,
    applied: Option<usize>,
}

impl DuplicateStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_name: None,
            applied: None,
        }
    }

    pub fn named(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }
}

impl Command<DocumentState, DocumentError> for DuplicateStack {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let sheet = &state.sheet;
        let si = sheet.stack_index(&self.name)?;
        let new_name = self
            .new_name
            .clone()
            .unwrap_or_else(|| copy_name(&self.name, |n| sheet.find_stack(n).is_some()));
        validate_name(&new_name)?;
        if sheet.find_stack(&new_name).is_some() {
            return Err(DocumentError::DuplicateName(new_name));
        }
        let area = sheet.stack_area(si)?;
        let mut copy = sheet.stacks[si].clone();
        copy.name = new_name.clone();

        state.duplicate_rows(area.y, area.height, area.bottom())?;
        state.sheet.stacks.insert(si + 1, copy);
        state.relayout();
        self.new_name = Some(new_name);
        self.applied = Some(si + 1);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let si = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.stack_area(si)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks.remove(si);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Duplicate stack {}", self.name)
    }
}

/// Reorder a stack to index `to`, carrying its rows along.
pub struct MoveStack {
    name: String,
    to: usize,
    from: Option<usize>,
}

impl MoveStack {
    pub fn new(name: impl Into<String>, to: usize) -> Self {
        Self {
            name: name.into(),
            to,
            from: None,
        }
    }

    fn relocate(state: &mut DocumentState, from: usize, to: usize) -> DocumentResult<()> {
        let len = state.sheet.stacks.len();
        if from >= len || to >= len {
            return Err(DocumentError::StackIndexOutOfRange { index: from.max(to), len });
        }
        if from == to {
            return Ok(());
        }
        let sheet = &state.sheet;
        let area = sheet.stack_area(from)?;
        let target_y = moved_block_y(|i| sheet.stack_y(i), from, to, area.height);
        state.move_rows(area.y, area.height, target_y)?;
        let stack = state.sheet.stacks.remove(from);
        state.sheet.stacks.insert(to, stack);
        state.relayout();
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for MoveStack {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let from = state.sheet.stack_index(&self.name)?;
        Self::relocate(state, from, self.to)?;
        self.from = Some(from);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let from = self.from.ok_or(DocumentError::NotApplied)?;
        Self::relocate(state, self.to, from)
    }

    fn description(&self) -> String {
        format!("Move stack {}", self.name)
    }
}

// ----------------------------------------------------------------------------
// Slice columns
// ----------------------------------------------------------------------------

/// Add `count` slice columns to the right of a stack.
pub struct GrowStackSlices {
    name: String,
    count: usize,
    /// (stack index, canvas width before, columns that were overwritten)
    applied: Option<(usize, u32, Area, Vec<u8>)>,
}

impl GrowStackSlices {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            applied: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for GrowStackSlices {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let si = state.sheet.stack_index(&self.name)?;
        let current = state.sheet.stacks[si].slice_count;
        if self.count == 0 || current + self.count > u16::MAX as usize {
            return Err(DocumentError::InvalidSliceCount {
                stack: self.name.clone(),
                count: current + self.count,
                current,
            });
        }
        let fw = state.sheet.frame_width;
        let rows = state.sheet.stack_area(si)?;
        let columns = Area::new(current as u32 * fw, rows.y, self.count as u32 * fw, rows.height);
        let (kept, pixels) = state.capture_area(columns);

        let previous_width = state.ensure_width(columns.right());
        state.canvas.clear_pixels(columns.x, columns.y, columns.width, columns.height);
        let stack = &mut state.sheet.stacks[si];
        stack.slice_count += self.count;
        for animation in &mut stack.animations {
            for frame in &mut animation.frames {
                frame.slices.resize(current + self.count, StaxSlice::default());
            }
        }
        state.relayout();
        self.applied = Some((si, previous_width, kept, pixels));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, previous_width, kept, pixels) = self.applied.as_ref().ok_or(DocumentError::NotApplied)?;
        let stack = state.sheet.stack_mut(*si)?;
        stack.slice_count -= self.count;
        let keep = stack.slice_count;
        for animation in &mut stack.animations {
            for frame in &mut animation.frames {
                frame.slices.truncate(keep);
            }
        }
        if *previous_width < state.width() {
            state.resize_canvas(*previous_width, state.height());
        }
        state.restore_area(*kept, pixels);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Add {} slice(s) to {}", self.count, self.name)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.applied.as_ref().map_or(0, |a| a.3.len())
    }
}

/// Drop the last `count` slice columns of a stack. At least one slice stays.
pub struct ShrinkStackSlices {
    name: String,
    count: usize,
    /// (stack index, removed slices per frame, cleared columns, their pixels)
    applied: Option<(usize, Vec<Vec<StaxSlice>>, Area, Vec<u8>)>,
}

impl ShrinkStackSlices {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            applied: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for ShrinkStackSlices {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let si = state.sheet.stack_index(&self.name)?;
        let current = state.sheet.stacks[si].slice_count;
        if self.count == 0 || self.count >= current {
            return Err(DocumentError::InvalidSliceCount {
                stack: self.name.clone(),
                count: current.saturating_sub(self.count),
                current,
            });
        }
        let keep = current - self.count;
        let fw = state.sheet.frame_width;
        let rows = state.sheet.stack_area(si)?;
        let columns = Area::new(keep as u32 * fw, rows.y, self.count as u32 * fw, rows.height);
        let (cleared, pixels) = state.capture_area(columns);
        if !cleared.is_empty() {
            state.canvas.clear_pixels(cleared.x, cleared.y, cleared.width, cleared.height);
        }

        let stack = &mut state.sheet.stacks[si];
        stack.slice_count = keep;
        let removed = stack
            .animations
            .iter_mut()
            .flat_map(|a| a.frames.iter_mut())
            .map(|frame| frame.slices.split_off(keep.min(frame.slices.len())))
            .collect();
        state.relayout();
        self.applied = Some((si, removed, cleared, pixels));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, removed, cleared, pixels) = self.applied.as_ref().ok_or(DocumentError::NotApplied)?;
        let stack = state.sheet.stack_mut(*si)?;
        stack.slice_count += self.count;
        let frames = stack.animations.iter_mut().flat_map(|a| a.frames.iter_mut());
        for (frame, tail) in frames.zip(removed) {
            frame.slices.extend(tail.iter().cloned());
        }
        state.restore_area(*cleared, pixels);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove {} slice(s) from {}", self.count, self.name)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.applied.as_ref().map_or(0, |a| a.3.len())
    }
}

// ============================================================================
// ANIMATIONS
// ============================================================================

pub struct AddAnimation {
    stack: String,
    name: Option<String>,
    index: Option<usize>,
    frame_count: usize,
    applied: Option<(usize, usize)>,
}

impl AddAnimation {
    /// A new animation with one frame, appended to `stack`.
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            name: None,
            index: None,
            frame_count: 1,
            applied: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_frames(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }
}

impl Command<DocumentState, DocumentError> for AddAnimation {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let sheet = &state.sheet;
        let si = sheet.stack_index(&self.stack)?;
        let stack = &sheet.stacks[si];
        let name = self.name.clone().unwrap_or_else(|| stack.next_animation_name());
        validate_name(&name)?;
        if stack.find_animation(&name).is_some() {
            return Err(DocumentError::DuplicateName(name));
        }
        let len = stack.animations.len();
        let ai = self.index.unwrap_or(len);
        if ai > len {
            return Err(DocumentError::AnimationIndexOutOfRange {
                stack: self.stack.clone(),
                index: ai,
                len,
            });
        }
        let animation = StaxAnimation::new(name.clone(), self.frame_count, stack.slice_count);
        let y = sheet.animation_y(si, ai);
        let height = self.frame_count as u32 * sheet.frame_height;

        state.open_rows(y, height);
        state.sheet.stacks[si].animations.insert(ai, animation);
        state.relayout();
        self.name = Some(name);
        self.applied = Some((si, ai));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.animation_area(si, ai)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks[si].animations.remove(ai);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Add animation to {}", self.stack)
    }
}

pub struct RemoveAnimation {
    stack: String,
    animation: String,
    removed: Option<(usize, usize, StaxAnimation)>,
    band: Option<RowBand>,
}

impl RemoveAnimation {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            removed: None,
            band: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for RemoveAnimation {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let area = state.sheet.animation_area(si, ai)?;
        let band = state.close_rows(area.y, area.height)?;
        let animation = state.sheet.stacks[si].animations.remove(ai);
        state.relayout();
        self.removed = Some((si, ai, animation));
        self.band = Some(band);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let ((si, ai, animation), band) = match (&self.removed, &self.band) {
            (Some(removed), Some(band)) => (removed, band),
            _ => return Err(DocumentError::NotApplied),
        };
        state.sheet.stack_mut(*si)?.animations.insert(*ai, animation.clone());
        state.restore_rows(band);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove animation {}", self.animation)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + band_size(&self.band)
    }
}

pub struct RenameAnimation {
    stack: String,
    animation: String,
    new_name: String,
}

impl RenameAnimation {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            new_name: new_name.into(),
        }
    }

    fn rename(state: &mut DocumentState, stack: &str, from: &str, to: &str) -> DocumentResult<()> {
        validate_name(to)?;
        let (si, ai) = state.sheet.animation_index(stack, from)?;
        if from != to && state.sheet.stacks[si].find_animation(to).is_some() {
            return Err(DocumentError::DuplicateName(to.to_string()));
        }
        state.sheet.stacks[si].animations[ai].name = to.to_string();
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for RenameAnimation {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        Self::rename(state, &self.stack, &self.animation, &self.new_name)
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        Self::rename(state, &self.stack, &self.new_name, &self.animation)
    }

    fn description(&self) -> String {
        format!("Rename animation {} to {}", self.animation, self.new_name)
    }
}

/// Copy an animation, pixels included, directly after the original.
pub struct DuplicateAnimation {
    stack: String,
    animation: String,
    new_name: Option<String>,
    applied: Option<(usize, usize)>,
}

impl DuplicateAnimation {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            new_name: None,
            applied: None,
        }
    }

    pub fn named(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }
}

impl Command<DocumentState, DocumentError> for DuplicateAnimation {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let stack = &state.sheet.stacks[si];
        let new_name = self
            .new_name
            .clone()
            .unwrap_or_else(|| copy_name(&self.animation, |n| stack.find_animation(n).is_some()));
        validate_name(&new_name)?;
        if stack.find_animation(&new_name).is_some() {
            return Err(DocumentError::DuplicateName(new_name));
        }
        let mut copy = stack.animations[ai].clone();
        copy.name = new_name.clone();
        let area = state.sheet.animation_area(si, ai)?;

        state.duplicate_rows(area.y, area.height, area.bottom())?;
        state.sheet.stacks[si].animations.insert(ai + 1, copy);
        state.relayout();
        self.new_name = Some(new_name);
        self.applied = Some((si, ai + 1));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.animation_area(si, ai)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks[si].animations.remove(ai);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Duplicate animation {}", self.animation)
    }
}

/// Reorder an animation within its stack.
pub struct MoveAnimation {
    stack: String,
    animation: String,
    to: usize,
    applied: Option<(usize, usize)>,
}

impl MoveAnimation {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, to: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            to,
            applied: None,
        }
    }

    fn relocate(state: &mut DocumentState, si: usize, from: usize, to: usize) -> DocumentResult<()> {
        let stack = state.sheet.stack(si)?;
        let len = stack.animations.len();
        if from >= len || to >= len {
            return Err(DocumentError::AnimationIndexOutOfRange {
                stack: stack.name.clone(),
                index: from.max(to),
                len,
            });
        }
        if from == to {
            return Ok(());
        }
        let sheet = &state.sheet;
        let area = sheet.animation_area(si, from)?;
        let target_y = moved_block_y(|i| sheet.animation_y(si, i), from, to, area.height);
        state.move_rows(area.y, area.height, target_y)?;
        let animations = &mut state.sheet.stacks[si].animations;
        let animation = animations.remove(from);
        animations.insert(to, animation);
        state.relayout();
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for MoveAnimation {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, from) = state.sheet.animation_index(&self.stack, &self.animation)?;
        Self::relocate(state, si, from, self.to)?;
        self.applied = Some((si, from));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, from) = self.applied.ok_or(DocumentError::NotApplied)?;
        Self::relocate(state, si, self.to, from)
    }

    fn description(&self) -> String {
        format!("Move animation {}", self.animation)
    }
}

pub struct ChangeFrameTime {
    stack: String,
    animation: String,
    frame_time: u32,
    previous: Option<u32>,
}

impl ChangeFrameTime {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, frame_time: u32) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            frame_time,
            previous: None,
        }
    }

    fn set(&self, state: &mut DocumentState, frame_time: u32) -> DocumentResult<u32> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let animation = state.sheet.animation_mut(si, ai)?;
        Ok(std::mem::replace(&mut animation.frame_time, frame_time))
    }
}

impl Command<DocumentState, DocumentError> for ChangeFrameTime {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.previous = Some(self.set(state, self.frame_time)?);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let previous = self.previous.ok_or(DocumentError::NotApplied)?;
        self.set(state, previous)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Set {} frame time to {} ms", self.animation, self.frame_time)
    }
}

// ============================================================================
// FRAMES
// ============================================================================

/// Insert an empty frame. `index == None` appends.
pub struct InsertFrame {
    stack: String,
    animation: String,
    index: Option<usize>,
    applied: Option<(usize, usize, usize)>,
}

impl InsertFrame {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            index,
            applied: None,
        }
    }

    pub fn append(stack: impl Into<String>, animation: impl Into<String>) -> Self {
        Self::new(stack, animation, None)
    }
}

impl Command<DocumentState, DocumentError> for InsertFrame {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let len = state.sheet.stacks[si].animations[ai].frames.len();
        let fi = self.index.unwrap_or(len);
        if fi > len {
            return Err(DocumentError::FrameOutOfRange {
                animation: self.animation.clone(),
                index: fi,
                len,
            });
        }
        let y = state.sheet.frame_y(si, ai, fi);
        state.open_rows(y, state.sheet.frame_height);
        let slice_count = state.sheet.stacks[si].slice_count;
        state.sheet.stacks[si].animations[ai]
            .frames
            .insert(fi, StaxFrame::with_slices(slice_count));
        state.relayout();
        self.applied = Some((si, ai, fi));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai, fi) = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.frame_area(si, ai, fi)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks[si].animations[ai].frames.remove(fi);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Add frame to {}", self.animation)
    }
}

pub struct RemoveFrame {
    stack: String,
    animation: String,
    index: usize,
    removed: Option<(usize, usize, StaxFrame)>,
    band: Option<RowBand>,
}

impl RemoveFrame {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, index: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            index,
            removed: None,
            band: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for RemoveFrame {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let area = state.sheet.frame_area(si, ai, self.index)?;
        let band = state.close_rows(area.y, area.height)?;
        let frame = state.sheet.stacks[si].animations[ai].frames.remove(self.index);
        state.relayout();
        self.removed = Some((si, ai, frame));
        self.band = Some(band);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let ((si, ai, frame), band) = match (&self.removed, &self.band) {
            (Some(removed), Some(band)) => (removed, band),
            _ => return Err(DocumentError::NotApplied),
        };
        state
            .sheet
            .animation_mut(*si, *ai)?
            .frames
            .insert(self.index, frame.clone());
        state.restore_rows(band);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Remove frame {} of {}", self.index, self.animation)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + band_size(&self.band)
    }
}

/// Copy a frame, pixels and shading included, directly after itself.
pub struct DuplicateFrame {
    stack: String,
    animation: String,
    index: usize,
    applied: Option<(usize, usize)>,
}

impl DuplicateFrame {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, index: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            index,
            applied: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for DuplicateFrame {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let area = state.sheet.frame_area(si, ai, self.index)?;
        let copy = state.sheet.stacks[si].animations[ai].frames[self.index].clone();
        state.duplicate_rows(area.y, area.height, area.bottom())?;
        state.sheet.stacks[si].animations[ai].frames.insert(self.index + 1, copy);
        state.relayout();
        self.applied = Some((si, ai));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = self.applied.ok_or(DocumentError::NotApplied)?;
        let area = state.sheet.frame_area(si, ai, self.index + 1)?;
        state.close_rows(area.y, area.height)?;
        state.sheet.stacks[si].animations[ai].frames.remove(self.index + 1);
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Duplicate frame {} of {}", self.index, self.animation)
    }
}

/// Reorder a frame within its animation.
pub struct MoveFrame {
    stack: String,
    animation: String,
    from: usize,
    to: usize,
    applied: Option<(usize, usize)>,
}

impl MoveFrame {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, from: usize, to: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            from,
            to,
            applied: None,
        }
    }

    fn relocate(state: &mut DocumentState, si: usize, ai: usize, from: usize, to: usize) -> DocumentResult<()> {
        let animation = state.sheet.animation(si, ai)?;
        let len = animation.frames.len();
        if from >= len || to >= len {
            return Err(DocumentError::FrameOutOfRange {
                animation: animation.name.clone(),
                index: from.max(to),
                len,
            });
        }
        if from == to {
            return Ok(());
        }
        let sheet = &state.sheet;
        let fh = sheet.frame_height;
        let from_y = sheet.frame_y(si, ai, from);
        let target_y = moved_block_y(|i| sheet.frame_y(si, ai, i), from, to, fh);
        state.move_rows(from_y, fh, target_y)?;
        let frames = &mut state.sheet.stacks[si].animations[ai].frames;
        let frame = frames.remove(from);
        frames.insert(to, frame);
        state.relayout();
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for MoveFrame {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        Self::relocate(state, si, ai, self.from, self.to)?;
        self.applied = Some((si, ai));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = self.applied.ok_or(DocumentError::NotApplied)?;
        Self::relocate(state, si, ai, self.to, self.from)
    }

    fn description(&self) -> String {
        format!("Move frame {} to {}", self.from, self.to)
    }
}

/// Zero every slice of one frame. Metadata is untouched.
pub struct ClearFrame {
    stack: String,
    animation: String,
    index: usize,
    previous: Option<(Area, Vec<u8>)>,
}

impl ClearFrame {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, index: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            index,
            previous: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for ClearFrame {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let area = state.sheet.frame_area(si, ai, self.index)?;
        state.canvas.check_rect(area.x, area.y, area.width, area.height)?;
        let pixels = state.canvas.get_pixels(area.x, area.y, area.width, area.height);
        state.canvas.clear_pixels(area.x, area.y, area.width, area.height);
        self.previous = Some((area, pixels));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (area, pixels) = self.previous.as_ref().ok_or(DocumentError::NotApplied)?;
        state.restore_area(*area, pixels);
        Ok(())
    }

    fn description(&self) -> String {
        format!("Clear frame {} of {}", self.index, self.animation)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.previous.as_ref().map_or(0, |p| p.1.len())
    }
}

/// Zero one slice.
pub struct ClearSlice {
    stack: String,
    animation: String,
    frame: usize,
    slice: usize,
    previous: Option<(Area, Vec<u8>)>,
}

impl ClearSlice {
    pub fn new(stack: impl Into<String>, animation: impl Into<String>, frame: usize, slice: usize) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            frame,
            slice,
            previous: None,
        }
    }
}

impl Command<DocumentState, DocumentError> for ClearSlice {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        let area = state.sheet.slice_area(si, ai, self.frame, self.slice)?;
        state.canvas.check_rect(area.x, area.y, area.width, area.height)?;
        let pixels = state.canvas.get_pixels(area.x, area.y, area.width, area.height);
        state.canvas.clear_pixels(area.x, area.y, area.width, area.height);
        self.previous = Some((area, pixels));
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (area, pixels) = self.previous.as_ref().ok_or(DocumentError::NotApplied)?;
        state.restore_area(*area, pixels);
        Ok(())
    }

    fn description(&self) -> String {
        format!("Clear slice {} of frame {}", self.slice, self.frame)
    }
}

pub struct SetSliceShading {
    stack: String,
    animation: String,
    frame: usize,
    slice: usize,
    shading: u8,
    previous: Option<u8>,
}

impl SetSliceShading {
    pub fn new(
        stack: impl Into<String>,
        animation: impl Into<String>,
        frame: usize,
        slice: usize,
        shading: u8,
    ) -> Self {
        Self {
            stack: stack.into(),
            animation: animation.into(),
            frame,
            slice,
            shading,
            previous: None,
        }
    }

    fn set(&self, state: &mut DocumentState, shading: u8) -> DocumentResult<u8> {
        let (si, ai) = state.sheet.animation_index(&self.stack, &self.animation)?;
        state.sheet.check_frame(si, ai, self.frame)?;
        state.sheet.check_slice(si, self.slice)?;
        let slice = &mut state.sheet.stacks[si].animations[ai].frames[self.frame].slices[self.slice];
        Ok(std::mem::replace(&mut slice.shading, shading))
    }
}

impl Command<DocumentState, DocumentError> for SetSliceShading {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.previous = Some(self.set(state, self.shading)?);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let previous = self.previous.ok_or(DocumentError::NotApplied)?;
        self.set(state, previous)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Set slice {} shading to {}", self.slice, self.shading)
    }
}

// ============================================================================
// FRAME SIZE
// ============================================================================

/// Change the frame size of the whole sheet. Each slice keeps its top-left
/// content, cropped or padded to the new size. Undo restores the full
/// previous canvas.
pub struct ResizeFrames {
    width: u32,
    height: u32,
    previous: Option<(PixelCanvas, SelectionArea, u32, u32)>,
}

impl ResizeFrames {
    pub fn new(width: u32, height: u32) -> DocumentResult<Self> {
        if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(DocumentError::InvalidFrameSize { width, height });
        }
        Ok(Self {
            width,
            height,
            previous: None,
        })
    }
}

impl Command<DocumentState, DocumentError> for ResizeFrames {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let old_layout = state.sheet.layout();
        let mut resized = state.sheet.clone();
        resized.frame_width = self.width;
        resized.frame_height = self.height;
        let new_layout = resized.layout();
        let (need_w, need_h) = resized.required_size();

        let mut canvas = PixelCanvas::new(need_w, need_h);
        canvas.palette = state.canvas.palette.clone();
        let copy_w = self.width.min(state.sheet.frame_width);
        let copy_h = self.height.min(state.sheet.frame_height);
        for (from, to) in old_layout.iter().zip(&new_layout) {
            if !state.canvas.contains_rect(from.x, from.y, copy_w, copy_h) {
                continue;
            }
            let block = state.canvas.get_pixels(from.x, from.y, copy_w, copy_h);
            canvas.set_pixels(to.x, to.y, copy_w, copy_h, &block);
        }

        let previous_canvas = std::mem::replace(&mut state.canvas, canvas);
        let previous_selection = std::mem::replace(&mut state.selection, SelectionArea::new(need_w, need_h));
        self.previous = Some((
            previous_canvas,
            previous_selection,
            state.sheet.frame_width,
            state.sheet.frame_height,
        ));
        state.sheet.frame_width = self.width;
        state.sheet.frame_height = self.height;
        state.relayout();
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (canvas, selection, fw, fh) = self.previous.take().ok_or(DocumentError::NotApplied)?;
        state.canvas = canvas;
        state.selection = selection;
        state.sheet.frame_width = fw;
        state.sheet.frame_height = fh;
        state.relayout();
        Ok(())
    }

    fn description(&self) -> String {
        format!("Resize frames to {}x{}", self.width, self.height)
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.previous.as_ref().map_or(0, |p| p.0.pixels.len() * 2)
    }
}
