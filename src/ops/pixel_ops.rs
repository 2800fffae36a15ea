// ============================================================================
// PIXEL & SELECTION COMMANDS
// ============================================================================

use crate::canvas::SelectionArea;
use crate::components::history::Command;
use crate::error::{CanvasError, DocumentError, DocumentResult};
use crate::project::DocumentState;
use crate::stax::Area;

/// Clip an `x, y, width, height` rectangle (origin may be negative) to
/// `clip`. Returns the clipped area and how many columns and rows were cut
/// off the left and top.
fn clip_rect(x: i64, y: i64, width: u32, height: u32, clip: &Area) -> Option<(Area, u32, u32)> {
    let x0 = x.max(clip.x as i64);
    let y0 = y.max(clip.y as i64);
    let x1 = (x + width as i64).min(clip.x as i64 + clip.width as i64);
    let y1 = (y + height as i64).min(clip.y as i64 + clip.height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((
        Area::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32),
        (x0 - x) as u32,
        (y0 - y) as u32,
    ))
}

/// Rows `skip_y..skip_y+area.height`, columns `skip_x..skip_x+area.width`
/// of a `src_width`-wide buffer.
fn crop_buffer(data: &[u8], src_width: u32, skip_x: u32, skip_y: u32, area: &Area) -> Vec<u8> {
    let mut out = Vec::with_capacity(area.width as usize * area.height as usize);
    for row in skip_y..skip_y + area.height {
        let start = row as usize * src_width as usize + skip_x as usize;
        out.extend_from_slice(&data[start..start + area.width as usize]);
    }
    out
}

/// Everything from the origin down and right; used to drop negative
/// coordinates after a translation.
const NON_NEGATIVE: Area = Area {
    x: 0,
    y: 0,
    width: u32::MAX,
    height: u32::MAX,
};

fn out_of_bounds(state: &DocumentState, x: u32, y: u32, width: u32, height: u32) -> DocumentError {
    CanvasError::RegionOutOfBounds {
        x,
        y,
        width,
        height,
        canvas_width: state.canvas.width,
        canvas_height: state.canvas.height,
    }
    .into()
}

// ----------------------------------------------------------------------------
// Pixel commands
// ----------------------------------------------------------------------------

/// Closed set of pixel writes. Cross-cutting transforms (translation for
/// broadcasting, clipping to the view) are matches over this enum.
///
/// The `previous` fields are filled on every `apply` so a redo after undo
/// sees exactly the state the first apply saw.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelCommand {
    Place {
        x: u32,
        y: u32,
        index: u8,
        previous: Option<u8>,
    },
    PlaceMany {
        points: Vec<(u32, u32)>,
        index: u8,
        previous: Option<Vec<u8>>,
    },
    Region {
        area: Area,
        data: Vec<u8>,
        previous: Option<Vec<u8>>,
    },
    Clear {
        area: Area,
        previous: Option<Vec<u8>>,
    },
    /// Individual points, each with its own index. What a region write
    /// becomes once a selection mask has punched holes in it.
    Scatter {
        points: Vec<(u32, u32, u8)>,
        previous: Option<Vec<u8>>,
    },
}

impl PixelCommand {
    pub fn place(x: u32, y: u32, index: u8) -> Self {
        Self::Place { x, y, index, previous: None }
    }

    pub fn place_many(points: Vec<(u32, u32)>, index: u8) -> Self {
        Self::PlaceMany { points, index, previous: None }
    }

    /// Write a row-major buffer into `area`. The buffer must be exactly
    /// `area.width * area.height` long.
    pub fn region(area: Area, data: Vec<u8>) -> DocumentResult<Self> {
        if data.len() != area.width as usize * area.height as usize {
            return Err(CanvasError::RegionOutOfBounds {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height,
                canvas_width: data.len() as u32,
                canvas_height: 1,
            }
            .into());
        }
        Ok(Self::Region { area, data, previous: None })
    }

    pub fn clear(area: Area) -> Self {
        Self::Clear { area, previous: None }
    }

    pub fn scatter(points: Vec<(u32, u32, u8)>) -> Self {
        Self::Scatter { points, previous: None }
    }

    /// Paint every marked selection pixel with `index`.
    pub fn fill_selection(state: &DocumentState, index: u8) -> DocumentResult<Self> {
        let points = state.selection.marked_points();
        if points.is_empty() {
            return Err(DocumentError::EmptySelection);
        }
        Ok(Self::place_many(points, index))
    }

    /// Reset every marked selection pixel to index 0.
    pub fn delete_selection(state: &DocumentState) -> DocumentResult<Self> {
        Self::fill_selection(state, 0)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Place { .. } => "Place pixel",
            Self::PlaceMany { .. } => "Place pixels",
            Self::Region { .. } => "Write region",
            Self::Clear { .. } => "Clear region",
            Self::Scatter { .. } => "Place pixels",
        }
        .to_string()
    }

    /// The part of this write that lands on pixels marked in `selection`,
    /// or `None` if it touches no marked pixel. A region or clear that
    /// keeps only some of its pixels becomes a point list.
    pub fn masked(&self, selection: &SelectionArea) -> Option<Self> {
        let marked = |x: u32, y: u32| selection.is_marked(x as i64, y as i64);
        match self {
            Self::Place { x, y, index, .. } => marked(*x, *y).then(|| Self::place(*x, *y, *index)),
            Self::PlaceMany { points, index, .. } => {
                let kept: Vec<(u32, u32)> = points.iter().copied().filter(|&(x, y)| marked(x, y)).collect();
                (!kept.is_empty()).then(|| Self::place_many(kept, *index))
            }
            Self::Region { area, data, .. } => {
                let points: Vec<(u32, u32, u8)> = area_points(area)
                    .zip(data.iter().copied())
                    .filter(|&((x, y), _)| marked(x, y))
                    .map(|((x, y), value)| (x, y, value))
                    .collect();
                if points.len() == data.len() {
                    Some(Self::Region {
                        area: *area,
                        data: data.clone(),
                        previous: None,
                    })
                } else {
                    (!points.is_empty()).then(|| Self::scatter(points))
                }
            }
            Self::Clear { area, .. } => {
                let points: Vec<(u32, u32)> = area_points(area).filter(|&(x, y)| marked(x, y)).collect();
                if points.len() == area.width as usize * area.height as usize {
                    Some(Self::clear(*area))
                } else {
                    (!points.is_empty()).then(|| Self::place_many(points, 0))
                }
            }
            Self::Scatter { points, .. } => {
                let kept: Vec<(u32, u32, u8)> = points.iter().copied().filter(|&(x, y, _)| marked(x, y)).collect();
                (!kept.is_empty()).then(|| Self::scatter(kept))
            }
        }
    }

    /// The same write shifted by `(dx, dy)`. Parts that land on negative
    /// coordinates are dropped; `None` if nothing is left.
    pub fn translated(&self, dx: i64, dy: i64) -> Option<Self> {
        self.reframe(dx, dy, &NON_NEGATIVE)
    }

    /// The part of this write inside `area`, or `None` if nothing is.
    pub fn clipped(&self, area: &Area) -> Option<Self> {
        self.reframe(0, 0, area)
    }

    fn reframe(&self, dx: i64, dy: i64, clip: &Area) -> Option<Self> {
        match self {
            Self::Place { x, y, index, .. } => {
                let (nx, ny) = (*x as i64 + dx, *y as i64 + dy);
                clip.contains(nx, ny)
                    .then(|| Self::place(nx as u32, ny as u32, *index))
            }
            Self::PlaceMany { points, index, .. } => {
                let moved: Vec<(u32, u32)> = points
                    .iter()
                    .map(|&(x, y)| (x as i64 + dx, y as i64 + dy))
                    .filter(|&(x, y)| clip.contains(x, y))
                    .map(|(x, y)| (x as u32, y as u32))
                    .collect();
                (!moved.is_empty()).then(|| Self::place_many(moved, *index))
            }
            Self::Region { area, data, .. } => {
                let (clipped, skip_x, skip_y) =
                    clip_rect(area.x as i64 + dx, area.y as i64 + dy, area.width, area.height, clip)?;
                let cropped = crop_buffer(data, area.width, skip_x, skip_y, &clipped);
                Some(Self::Region {
                    area: clipped,
                    data: cropped,
                    previous: None,
                })
            }
            Self::Clear { area, .. } => {
                let (clipped, _, _) =
                    clip_rect(area.x as i64 + dx, area.y as i64 + dy, area.width, area.height, clip)?;
                Some(Self::clear(clipped))
            }
            Self::Scatter { points, .. } => {
                let moved: Vec<(u32, u32, u8)> = points
                    .iter()
                    .map(|&(x, y, v)| (x as i64 + dx, y as i64 + dy, v))
                    .filter(|&(x, y, _)| clip.contains(x, y))
                    .map(|(x, y, v)| (x as u32, y as u32, v))
                    .collect();
                (!moved.is_empty()).then(|| Self::scatter(moved))
            }
        }
    }
}

/// Row-major positions covered by `area`.
fn area_points(area: &Area) -> impl Iterator<Item = (u32, u32)> + '_ {
    (area.y..area.bottom()).flat_map(move |y| (area.x..area.right()).map(move |x| (x, y)))
}

impl Command<DocumentState, DocumentError> for PixelCommand {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        match self {
            Self::Place { x, y, index, previous } => {
                let old = state
                    .canvas
                    .get_pixel(*x as i64, *y as i64)
                    .ok_or_else(|| out_of_bounds(state, *x, *y, 1, 1))?;
                state.canvas.set_pixel(*x, *y, *index);
                *previous = Some(old);
            }
            Self::PlaceMany { points, index, previous } => {
                if let Some(&(x, y)) = points
                    .iter()
                    .find(|&&(x, y)| !state.canvas.in_bounds(x as i64, y as i64))
                {
                    return Err(out_of_bounds(state, x, y, 1, 1));
                }
                let old = points
                    .iter()
                    .map(|&(x, y)| state.canvas.get_pixel_unchecked(x, y))
                    .collect();
                for &(x, y) in points.iter() {
                    state.canvas.set_pixel_deferred(x, y, *index);
                }
                *previous = Some(old);
            }
            Self::Region { area, data, previous } => {
                state.canvas.check_rect(area.x, area.y, area.width, area.height)?;
                *previous = Some(state.canvas.get_pixels(area.x, area.y, area.width, area.height));
                state.canvas.set_pixels(area.x, area.y, area.width, area.height, data);
            }
            Self::Clear { area, previous } => {
                state.canvas.check_rect(area.x, area.y, area.width, area.height)?;
                *previous = Some(state.canvas.get_pixels(area.x, area.y, area.width, area.height));
                state.canvas.clear_pixels(area.x, area.y, area.width, area.height);
            }
            Self::Scatter { points, previous } => {
                if let Some(&(x, y, _)) = points
                    .iter()
                    .find(|&&(x, y, _)| !state.canvas.in_bounds(x as i64, y as i64))
                {
                    return Err(out_of_bounds(state, x, y, 1, 1));
                }
                let old = points
                    .iter()
                    .map(|&(x, y, _)| state.canvas.get_pixel_unchecked(x, y))
                    .collect();
                for &(x, y, value) in points.iter() {
                    state.canvas.set_pixel_deferred(x, y, value);
                }
                *previous = Some(old);
            }
        }
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        match self {
            Self::Place { x, y, previous, .. } => {
                let old = previous.ok_or(DocumentError::NotApplied)?;
                if !state.canvas.in_bounds(*x as i64, *y as i64) {
                    return Err(out_of_bounds(state, *x, *y, 1, 1));
                }
                state.canvas.set_pixel(*x, *y, old);
            }
            Self::PlaceMany { points, previous, .. } => {
                let old = previous.as_ref().ok_or(DocumentError::NotApplied)?;
                if points.iter().any(|&(x, y)| !state.canvas.in_bounds(x as i64, y as i64)) {
                    return Err(DocumentError::NotApplied);
                }
                // Reverse order so repeated points end on their first value.
                for (&(x, y), &value) in points.iter().zip(old.iter()).rev() {
                    state.canvas.set_pixel_deferred(x, y, value);
                }
            }
            Self::Region { area, previous, .. } | Self::Clear { area, previous } => {
                let old = previous.as_ref().ok_or(DocumentError::NotApplied)?;
                state.canvas.check_rect(area.x, area.y, area.width, area.height)?;
                state.canvas.set_pixels(area.x, area.y, area.width, area.height, old);
            }
            Self::Scatter { points, previous } => {
                let old = previous.as_ref().ok_or(DocumentError::NotApplied)?;
                if points.iter().any(|&(x, y, _)| !state.canvas.in_bounds(x as i64, y as i64)) {
                    return Err(DocumentError::NotApplied);
                }
                for (&(x, y, _), &value) in points.iter().zip(old.iter()).rev() {
                    state.canvas.set_pixel_deferred(x, y, value);
                }
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        self.describe()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + match self {
                Self::Place { .. } => 0,
                Self::PlaceMany { points, previous, .. } => {
                    points.len() * std::mem::size_of::<(u32, u32)>()
                        + previous.as_ref().map_or(0, Vec::len)
                }
                Self::Region { data, previous, .. } => data.len() + previous.as_ref().map_or(0, Vec::len),
                Self::Clear { previous, .. } => previous.as_ref().map_or(0, Vec::len),
                Self::Scatter { points, previous } => {
                    points.len() * std::mem::size_of::<(u32, u32, u8)>() + previous.as_ref().map_or(0, Vec::len)
                }
            }
    }
}

// ----------------------------------------------------------------------------
// Selection commands
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionOp {
    /// Mark or unmark points, optionally clearing the mask first.
    Set {
        points: Vec<(u32, u32)>,
        marked: bool,
        clear_first: bool,
    },
    /// Shift the mask; marks pushed off the canvas are lost.
    Move { dx: i32, dy: i32 },
    Clear,
    /// Replace the mask with one rectangle.
    SelectArea(Area),
}

/// Any selection change. Keeps the whole previous mask, which makes every
/// variant exactly invertible.
pub struct SelectionCommand {
    op: SelectionOp,
    previous: Option<SelectionArea>,
}

impl SelectionCommand {
    pub fn new(op: SelectionOp) -> Self {
        Self { op, previous: None }
    }

    pub fn set(points: Vec<(u32, u32)>, marked: bool, clear_first: bool) -> Self {
        Self::new(SelectionOp::Set { points, marked, clear_first })
    }

    pub fn move_by(dx: i32, dy: i32) -> Self {
        Self::new(SelectionOp::Move { dx, dy })
    }

    pub fn clear() -> Self {
        Self::new(SelectionOp::Clear)
    }

    pub fn select_area(area: Area) -> Self {
        Self::new(SelectionOp::SelectArea(area))
    }
}

impl Command<DocumentState, DocumentError> for SelectionCommand {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.previous = Some(state.selection.clone());
        let selection = &mut state.selection;
        match &self.op {
            SelectionOp::Set { points, marked, clear_first } => {
                if *clear_first {
                    selection.clear();
                }
                for &(x, y) in points {
                    selection.set_pixel(x, y, *marked);
                }
                selection.active = !selection.is_empty();
            }
            SelectionOp::Move { dx, dy } => selection.move_by(*dx, *dy),
            SelectionOp::Clear => {
                selection.clear();
                selection.active = false;
            }
            SelectionOp::SelectArea(area) => {
                selection.clear();
                selection.select_rect(area.x, area.y, area.width, area.height);
                selection.active = !selection.is_empty();
            }
        }
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let previous = self.previous.as_ref().ok_or(DocumentError::NotApplied)?;
        state.selection = previous.clone();
        Ok(())
    }

    fn description(&self) -> String {
        match self.op {
            SelectionOp::Set { .. } => "Select pixels",
            SelectionOp::Move { .. } => "Move selection",
            SelectionOp::Clear => "Clear selection",
            SelectionOp::SelectArea(_) => "Select area",
        }
        .to_string()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.previous.as_ref().map_or(0, |s| s.width() as usize * s.height() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelCanvas;
    use crate::stax::StaxSheet;

    fn state(width: u32, height: u32) -> DocumentState {
        DocumentState::new(PixelCanvas::new(width, height), StaxSheet::new(width, height))
    }

    #[test]
    fn place_and_undo() {
        let mut s = state(4, 4);
        let mut cmd = PixelCommand::place(1, 2, 5);
        cmd.apply(&mut s).unwrap();
        assert_eq!(s.canvas.get_pixel(1, 2), Some(5));
        cmd.unapply(&mut s).unwrap();
        assert_eq!(s.canvas.get_pixel(1, 2), Some(0));
    }

    #[test]
    fn place_outside_is_rejected_without_change() {
        let mut s = state(4, 4);
        let before = s.clone();
        assert!(PixelCommand::place(4, 0, 1).apply(&mut s).is_err());
        assert!(PixelCommand::place_many(vec![(0, 0), (9, 9)], 1).apply(&mut s).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn unapply_before_apply_fails() {
        let mut s = state(2, 2);
        assert_eq!(
            PixelCommand::clear(Area::new(0, 0, 1, 1)).unapply(&mut s),
            Err(DocumentError::NotApplied)
        );
    }

    #[test]
    fn repeated_points_restore_first_value() {
        let mut s = state(2, 1);
        s.canvas.set_pixel(0, 0, 3);
        let mut cmd = PixelCommand::place_many(vec![(0, 0), (0, 0)], 7);
        cmd.apply(&mut s).unwrap();
        cmd.unapply(&mut s).unwrap();
        assert_eq!(s.canvas.get_pixel(0, 0), Some(3));
    }

    #[test]
    fn region_clip_crops_data() {
        let cmd = PixelCommand::region(Area::new(0, 0, 3, 2), vec![1, 2, 3, 4, 5, 6]).unwrap();
        let clipped = cmd.clipped(&Area::new(1, 1, 5, 5)).unwrap();
        assert_eq!(
            clipped,
            PixelCommand::Region {
                area: Area::new(1, 1, 2, 1),
                data: vec![5, 6],
                previous: None
            }
        );
        assert_eq!(cmd.clipped(&Area::new(3, 0, 2, 2)), None);
    }

    #[test]
    fn translation_drops_negative_points() {
        let cmd = PixelCommand::place_many(vec![(0, 0), (2, 2)], 1);
        assert_eq!(cmd.translated(-1, -1), Some(PixelCommand::place_many(vec![(1, 1)], 1)));
        let region = PixelCommand::region(Area::new(0, 0, 2, 1), vec![8, 9]).unwrap();
        assert_eq!(
            region.translated(-1, 4),
            Some(PixelCommand::Region {
                area: Area::new(0, 4, 1, 1),
                data: vec![9],
                previous: None
            })
        );
    }

    #[test]
    fn masking_keeps_only_marked_pixels() {
        let mut s = state(3, 3);
        s.selection.set_pixel(1, 1, true);
        s.selection.set_pixel(2, 1, true);
        let region = PixelCommand::region(Area::new(0, 0, 2, 2), vec![1, 2, 3, 4]).unwrap();
        assert_eq!(region.masked(&s.selection), Some(PixelCommand::scatter(vec![(1, 1, 4)])));
        assert_eq!(
            PixelCommand::clear(Area::new(1, 1, 2, 1)).masked(&s.selection),
            Some(PixelCommand::clear(Area::new(1, 1, 2, 1)))
        );
        assert_eq!(
            PixelCommand::clear(Area::new(0, 1, 3, 1)).masked(&s.selection),
            Some(PixelCommand::place_many(vec![(1, 1), (2, 1)], 0))
        );
        assert_eq!(PixelCommand::place(0, 0, 1).masked(&s.selection), None);
    }

    #[test]
    fn scatter_undo_restores_each_point() {
        let mut s = state(3, 1);
        s.canvas.set_pixels(0, 0, 3, 1, &[5, 6, 7]);
        let before = s.clone();
        let mut cmd = PixelCommand::scatter(vec![(0, 0, 1), (2, 0, 2)]);
        cmd.apply(&mut s).unwrap();
        assert_eq!(s.canvas.pixels, vec![1, 6, 2]);
        cmd.unapply(&mut s).unwrap();
        assert_eq!(s, before);
        assert_eq!(
            cmd.translated(-2, 0),
            Some(PixelCommand::scatter(vec![(0, 0, 2)]))
        );
    }

    #[test]
    fn fill_selection_needs_marks() {
        let mut s = state(3, 3);
        assert_eq!(PixelCommand::fill_selection(&s, 2), Err(DocumentError::EmptySelection));
        s.selection.select_rect(0, 0, 2, 1);
        let mut cmd = PixelCommand::fill_selection(&s, 2).unwrap();
        cmd.apply(&mut s).unwrap();
        assert_eq!(s.canvas.get_pixels(0, 0, 3, 1), vec![2, 2, 0]);
    }

    #[test]
    fn selection_commands_restore_mask() {
        let mut s = state(4, 4);
        let mut set = SelectionCommand::set(vec![(1, 1)], true, true);
        set.apply(&mut s).unwrap();
        assert!(s.selection.active);
        let mut moved = SelectionCommand::move_by(2, 0);
        moved.apply(&mut s).unwrap();
        assert!(s.selection.is_marked(3, 1));
        moved.unapply(&mut s).unwrap();
        assert!(s.selection.is_marked(1, 1));
        set.unapply(&mut s).unwrap();
        assert!(s.selection.is_empty());
        assert!(!s.selection.active);
    }
}
