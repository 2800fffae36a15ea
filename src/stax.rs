//! Sprite-stack metadata: stacks hold animations, animations hold frames,
//! frames hold one slice per stack slice column.
//!
//! Canvas placement is never stored authoritatively. Stacks run top to
//! bottom in tree order, a stack's animations follow each other, each frame
//! is one `frame_height` row, and slices sit left to right at `frame_width`.
//! [`StaxSheet::layout`] derives every slice rectangle from that rule and
//! [`StaxSheet::cache_slice_positions`] writes the result into the slices.

use serde::Serialize;

use crate::error::{DocumentError, DocumentResult};

pub const DEFAULT_SHADING: u8 = 1;
pub const DEFAULT_FRAME_TIME: u32 = 100;
/// Names are length-prefixed by one byte in the container.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// A rectangle in shared canvas coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Area {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Area {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64
            && y >= self.y as i64
            && x < self.x as i64 + self.width as i64
            && y < self.y as i64 + self.height as i64
    }

    pub fn overlaps(&self, other: &Area) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersect(&self, other: &Area) -> Option<Area> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Area::new(x, y, right - x, bottom - y))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StaxSlice {
    pub shading: u8,
    /// Cached by the layout pass.
    pub x: u32,
    pub y: u32,
}

impl Default for StaxSlice {
    fn default() -> Self {
        Self {
            shading: DEFAULT_SHADING,
            x: 0,
            y: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StaxFrame {
    pub slices: Vec<StaxSlice>,
}

impl StaxFrame {
    pub fn with_slices(count: usize) -> Self {
        Self {
            slices: vec![StaxSlice::default(); count],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StaxAnimation {
    pub name: String,
    /// Milliseconds per frame.
    pub frame_time: u32,
    pub frames: Vec<StaxFrame>,
}

impl StaxAnimation {
    pub fn new(name: impl Into<String>, frame_count: usize, slice_count: usize) -> Self {
        Self {
            name: name.into(),
            frame_time: DEFAULT_FRAME_TIME,
            frames: (0..frame_count).map(|_| StaxFrame::with_slices(slice_count)).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StaxStack {
    pub name: String,
    pub slice_count: usize,
    pub animations: Vec<StaxAnimation>,
}

impl StaxStack {
    /// A fresh stack: one animation named "animation" with one frame.
    pub fn new(name: impl Into<String>, slice_count: usize) -> Self {
        Self {
            name: name.into(),
            slice_count,
            animations: vec![StaxAnimation::new("animation", 1, slice_count)],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.animations.iter().map(|a| a.frames.len()).sum()
    }

    pub fn find_animation(&self, name: &str) -> Option<usize> {
        self.animations.iter().position(|a| a.name == name)
    }

    /// First free name of the form "animation", "animation 1", ...
    pub fn next_animation_name(&self) -> String {
        let mut candidate = "animation".to_string();
        let mut n = 1;
        while self.find_animation(&candidate).is_some() {
            candidate = format!("animation {n}");
            n += 1;
        }
        candidate
    }
}

/// Reject names that cannot be written to the container.
pub fn validate_name(name: &str) -> DocumentResult<()> {
    if name.is_empty() {
        return Err(DocumentError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DocumentError::NameTooLong(name.len()));
    }
    Ok(())
}

/// Frame size plus the stack tree. This is exactly what the `stAx` chunk
/// carries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StaxSheet {
    pub frame_width: u32,
    pub frame_height: u32,
    pub stacks: Vec<StaxStack>,
}

impl StaxSheet {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            stacks: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn find_stack(&self, name: &str) -> Option<usize> {
        self.stacks.iter().position(|s| s.name == name)
    }

    pub fn stack_index(&self, name: &str) -> DocumentResult<usize> {
        self.find_stack(name)
            .ok_or_else(|| DocumentError::StackNotFound(name.to_string()))
    }

    pub fn animation_index(&self, stack: &str, animation: &str) -> DocumentResult<(usize, usize)> {
        let si = self.stack_index(stack)?;
        let ai = self.stacks[si]
            .find_animation(animation)
            .ok_or_else(|| DocumentError::AnimationNotFound {
                stack: stack.to_string(),
                animation: animation.to_string(),
            })?;
        Ok((si, ai))
    }

    pub fn stack(&self, si: usize) -> DocumentResult<&StaxStack> {
        self.stacks.get(si).ok_or(DocumentError::StackIndexOutOfRange {
            index: si,
            len: self.stacks.len(),
        })
    }

    pub fn stack_mut(&mut self, si: usize) -> DocumentResult<&mut StaxStack> {
        let len = self.stacks.len();
        self.stacks
            .get_mut(si)
            .ok_or(DocumentError::StackIndexOutOfRange { index: si, len })
    }

    pub fn animation(&self, si: usize, ai: usize) -> DocumentResult<&StaxAnimation> {
        let stack = self.stack(si)?;
        stack.animations.get(ai).ok_or_else(|| DocumentError::AnimationIndexOutOfRange {
            stack: stack.name.clone(),
            index: ai,
            len: stack.animations.len(),
        })
    }

    pub fn animation_mut(&mut self, si: usize, ai: usize) -> DocumentResult<&mut StaxAnimation> {
        let stack = self.stack_mut(si)?;
        let len = stack.animations.len();
        let name = stack.name.clone();
        stack
            .animations
            .get_mut(ai)
            .ok_or(DocumentError::AnimationIndexOutOfRange { stack: name, index: ai, len })
    }

    pub fn check_frame(&self, si: usize, ai: usize, fi: usize) -> DocumentResult<()> {
        let animation = self.animation(si, ai)?;
        if fi >= animation.frames.len() {
            return Err(DocumentError::FrameOutOfRange {
                animation: animation.name.clone(),
                index: fi,
                len: animation.frames.len(),
            });
        }
        Ok(())
    }

    pub fn check_slice(&self, si: usize, sl: usize) -> DocumentResult<()> {
        let stack = self.stack(si)?;
        if sl >= stack.slice_count {
            return Err(DocumentError::SliceOutOfRange {
                stack: stack.name.clone(),
                index: sl,
                len: stack.slice_count,
            });
        }
        Ok(())
    }

    /// First free name of the form "stack N".
    pub fn next_stack_name(&self) -> String {
        (1..)
            .map(|n| format!("stack {n}"))
            .find(|name| self.find_stack(name).is_none())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    pub fn stack_width(&self, stack: &StaxStack) -> u32 {
        stack.slice_count as u32 * self.frame_width
    }

    pub fn stack_height(&self, stack: &StaxStack) -> u32 {
        stack.frame_count() as u32 * self.frame_height
    }

    /// Top of stack `si`. `si == stacks.len()` gives the bottom of the sheet.
    pub fn stack_y(&self, si: usize) -> u32 {
        self.stacks[..si.min(self.stacks.len())]
            .iter()
            .map(|s| self.stack_height(s))
            .sum()
    }

    /// Top of animation `ai` in stack `si`. `ai == animations.len()` gives
    /// the bottom of the stack.
    pub fn animation_y(&self, si: usize, ai: usize) -> u32 {
        let base = self.stack_y(si);
        match self.stacks.get(si) {
            Some(stack) => {
                let above: usize = stack.animations[..ai.min(stack.animations.len())]
                    .iter()
                    .map(|a| a.frames.len())
                    .sum();
                base + above as u32 * self.frame_height
            }
            None => base,
        }
    }

    pub fn frame_y(&self, si: usize, ai: usize, fi: usize) -> u32 {
        self.animation_y(si, ai) + fi as u32 * self.frame_height
    }

    /// Size the canvas needs to hold every stack.
    pub fn required_size(&self) -> (u32, u32) {
        let width = self.stacks.iter().map(|s| self.stack_width(s)).max().unwrap_or(0);
        (width, self.stack_y(self.stacks.len()))
    }

    pub fn stack_area(&self, si: usize) -> DocumentResult<Area> {
        let stack = self.stack(si)?;
        Ok(Area::new(0, self.stack_y(si), self.stack_width(stack), self.stack_height(stack)))
    }

    pub fn animation_area(&self, si: usize, ai: usize) -> DocumentResult<Area> {
        let animation = self.animation(si, ai)?;
        Ok(Area::new(
            0,
            self.animation_y(si, ai),
            self.stack_width(&self.stacks[si]),
            animation.frames.len() as u32 * self.frame_height,
        ))
    }

    /// One frame row: every slice of frame `fi`.
    pub fn frame_area(&self, si: usize, ai: usize, fi: usize) -> DocumentResult<Area> {
        self.check_frame(si, ai, fi)?;
        Ok(Area::new(
            0,
            self.frame_y(si, ai, fi),
            self.stack_width(&self.stacks[si]),
            self.frame_height,
        ))
    }

    pub fn slice_area(&self, si: usize, ai: usize, fi: usize, sl: usize) -> DocumentResult<Area> {
        self.check_frame(si, ai, fi)?;
        self.check_slice(si, sl)?;
        Ok(Area::new(
            sl as u32 * self.frame_width,
            self.frame_y(si, ai, fi),
            self.frame_width,
            self.frame_height,
        ))
    }

    /// Slice rectangles for the whole tree, in tree order.
    pub fn layout(&self) -> Vec<Area> {
        let mut areas = Vec::new();
        let mut y = 0;
        for stack in &self.stacks {
            for animation in &stack.animations {
                for _frame in &animation.frames {
                    for sl in 0..stack.slice_count {
                        areas.push(Area::new(sl as u32 * self.frame_width, y, self.frame_width, self.frame_height));
                    }
                    y += self.frame_height;
                }
            }
        }
        areas
    }

    /// Recompute every slice's cached `x`/`y` from tree structure.
    pub fn cache_slice_positions(&mut self) {
        let (fw, fh) = (self.frame_width, self.frame_height);
        let mut y = 0;
        for stack in &mut self.stacks {
            for animation in &mut stack.animations {
                for frame in &mut animation.frames {
                    for (sl, slice) in frame.slices.iter_mut().enumerate() {
                        slice.x = sl as u32 * fw;
                        slice.y = y;
                    }
                    y += fh;
                }
            }
        }
    }

    pub fn total_slices(&self) -> usize {
        self.stacks
            .iter()
            .map(|s| s.frame_count() * s.slice_count)
            .sum()
    }

    /// Check the layout invariant: every frame carries `slice_count`
    /// slices, cached positions match the layout, no two slice rectangles
    /// overlap, and all of them fit in a `width`×`height` canvas.
    pub fn verify_layout(&self, width: u32, height: u32) -> bool {
        let expected = self.layout();
        let mut cached = Vec::with_capacity(expected.len());
        for stack in &self.stacks {
            for animation in &stack.animations {
                for frame in &animation.frames {
                    if frame.slices.len() != stack.slice_count {
                        return false;
                    }
                    cached.extend(frame.slices.iter().map(|s| (s.x, s.y)));
                }
            }
        }
        if cached.len() != expected.len() {
            return false;
        }
        let canvas = Area::new(0, 0, width, height);
        for (i, area) in expected.iter().enumerate() {
            if cached[i] != (area.x, area.y) {
                return false;
            }
            if area.right() > canvas.right() || area.bottom() > canvas.bottom() {
                return false;
            }
            if expected[i + 1..].iter().any(|other| area.overlaps(other)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> StaxSheet {
        let mut sheet = StaxSheet::new(16, 8);
        let mut body = StaxStack::new("body", 2);
        body.animations[0].name = "idle".into();
        body.animations[0].frames.push(StaxFrame::with_slices(2));
        body.animations.push(StaxAnimation::new("walk", 3, 2));
        sheet.stacks.push(body);
        sheet.stacks.push(StaxStack::new("head", 3));
        sheet.cache_slice_positions();
        sheet
    }

    #[test]
    fn areas_follow_tree_order() {
        let sheet = sheet();
        assert_eq!(sheet.stack_area(0).unwrap(), Area::new(0, 0, 32, 40));
        assert_eq!(sheet.stack_area(1).unwrap(), Area::new(0, 40, 48, 8));
        assert_eq!(sheet.animation_area(0, 1).unwrap(), Area::new(0, 16, 32, 24));
        assert_eq!(sheet.frame_area(0, 1, 2).unwrap(), Area::new(0, 32, 32, 8));
        assert_eq!(sheet.slice_area(1, 0, 0, 2).unwrap(), Area::new(32, 40, 16, 8));
        assert_eq!(sheet.required_size(), (48, 48));
    }

    #[test]
    fn layout_matches_cached_positions() {
        let sheet = sheet();
        assert_eq!(sheet.layout().len(), sheet.total_slices());
        assert!(sheet.verify_layout(48, 48));
        assert!(!sheet.verify_layout(48, 47));
    }

    #[test]
    fn stale_cache_fails_verification() {
        let mut sheet = sheet();
        sheet.stacks[1].animations[0].frames[0].slices[0].y = 0;
        assert!(!sheet.verify_layout(48, 48));
        sheet.cache_slice_positions();
        assert!(sheet.verify_layout(48, 48));
    }

    #[test]
    fn empty_animation_still_has_a_position() {
        let mut sheet = sheet();
        sheet.stacks[0].animations[0].frames.clear();
        assert_eq!(sheet.animation_area(0, 1).unwrap().y, 0);
        assert_eq!(sheet.animation_area(0, 0).unwrap().height, 0);
    }

    #[test]
    fn lookups_report_missing_names() {
        let sheet = sheet();
        assert_eq!(sheet.animation_index("body", "walk").unwrap(), (0, 1));
        assert_eq!(
            sheet.stack_index("legs"),
            Err(DocumentError::StackNotFound("legs".into()))
        );
        assert!(matches!(
            sheet.frame_area(0, 0, 5),
            Err(DocumentError::FrameOutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn generated_names_skip_used_ones() {
        let mut sheet = sheet();
        sheet.stacks[1].name = "stack 1".into();
        assert_eq!(sheet.next_stack_name(), "stack 2");
        assert_eq!(sheet.stacks[1].next_animation_name(), "animation 1");
        assert_eq!(sheet.stacks[0].next_animation_name(), "animation");
    }

    #[test]
    fn overlapping_areas() {
        let a = Area::new(0, 0, 4, 4);
        assert!(a.overlaps(&Area::new(3, 3, 2, 2)));
        assert!(!a.overlaps(&Area::new(4, 0, 2, 2)));
        assert_eq!(a.intersect(&Area::new(2, 2, 8, 8)), Some(Area::new(2, 2, 2, 2)));
    }
}
