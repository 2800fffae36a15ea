// ============================================================================
// TRANSFORMS — flip / rotate regions, move selected pixels
// ============================================================================

use crate::canvas::SelectionArea;
use crate::components::history::Command;
use crate::error::{CanvasError, DocumentError, DocumentResult};
use crate::project::DocumentState;
use crate::stax::Area;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipAxis {
    /// Mirror left/right.
    Horizontal,
    /// Mirror top/bottom.
    Vertical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
    Half,
}

impl Rotation {
    fn inverse(self) -> Self {
        match self {
            Self::Clockwise => Self::CounterClockwise,
            Self::CounterClockwise => Self::Clockwise,
            Self::Half => Self::Half,
        }
    }
}

/// Bounding box of the current selection.
fn selection_bounds(state: &DocumentState) -> DocumentResult<Area> {
    state
        .selection
        .bounds()
        .map(|(x, y, w, h)| Area::new(x, y, w, h))
        .ok_or(DocumentError::EmptySelection)
}

// ----------------------------------------------------------------------------

/// Mirror a region in place. Its own inverse.
pub struct Flip {
    area: Area,
    axis: FlipAxis,
}

impl Flip {
    pub fn new(area: Area, axis: FlipAxis) -> Self {
        Self { area, axis }
    }

    /// Flip the bounding box of the selection.
    pub fn selection(state: &DocumentState, axis: FlipAxis) -> DocumentResult<Self> {
        Ok(Self::new(selection_bounds(state)?, axis))
    }

    fn run(&self, state: &mut DocumentState) -> DocumentResult<()> {
        let Area { x, y, width, height } = self.area;
        state.canvas.check_rect(x, y, width, height)?;
        match self.axis {
            FlipAxis::Horizontal => state.canvas.flip_region_horizontal(x, y, width, height),
            FlipAxis::Vertical => state.canvas.flip_region_vertical(x, y, width, height),
        }
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for Flip {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.run(state)
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.run(state)
    }

    fn description(&self) -> String {
        match self.axis {
            FlipAxis::Horizontal => "Flip horizontal".into(),
            FlipAxis::Vertical => "Flip vertical".into(),
        }
    }
}

// ----------------------------------------------------------------------------

/// Rotate a region in place. Quarter turns need a square region.
pub struct Rotate {
    area: Area,
    rotation: Rotation,
}

impl Rotate {
    pub fn new(area: Area, rotation: Rotation) -> DocumentResult<Self> {
        if rotation != Rotation::Half && area.width != area.height {
            return Err(CanvasError::NonSquareRotation {
                width: area.width,
                height: area.height,
            }
            .into());
        }
        Ok(Self { area, rotation })
    }

    pub fn selection(state: &DocumentState, rotation: Rotation) -> DocumentResult<Self> {
        Self::new(selection_bounds(state)?, rotation)
    }

    fn run(&self, state: &mut DocumentState, rotation: Rotation) -> DocumentResult<()> {
        let Area { x, y, width, height } = self.area;
        state.canvas.check_rect(x, y, width, height)?;
        match rotation {
            Rotation::Clockwise => state.canvas.rotate_region_90cw(x, y, width),
            Rotation::CounterClockwise => state.canvas.rotate_region_90ccw(x, y, width),
            Rotation::Half => state.canvas.rotate_region_180(x, y, width, height),
        }
        Ok(())
    }
}

impl Command<DocumentState, DocumentError> for Rotate {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.run(state, self.rotation)
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        self.run(state, self.rotation.inverse())
    }

    fn description(&self) -> String {
        match self.rotation {
            Rotation::Clockwise => "Rotate 90° clockwise".into(),
            Rotation::CounterClockwise => "Rotate 90° counter-clockwise".into(),
            Rotation::Half => "Rotate 180°".into(),
        }
    }
}

// ----------------------------------------------------------------------------

/// Lift the selected pixels, leave index 0 behind, drop them `(dx, dy)`
/// away and move the selection along. Pixels pushed off the canvas are lost.
pub struct MoveSelectedPixels {
    dx: i32,
    dy: i32,
    previous: Option<(SelectionArea, Vec<(u32, u32, u8)>)>,
}

impl MoveSelectedPixels {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy, previous: None }
    }
}

impl Command<DocumentState, DocumentError> for MoveSelectedPixels {
    fn apply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let sources = state.selection.marked_points();
        if sources.is_empty() {
            return Err(DocumentError::EmptySelection);
        }
        let canvas = &mut state.canvas;
        let lifted: Vec<u8> = sources.iter().map(|&(x, y)| canvas.get_pixel_unchecked(x, y)).collect();
        let targets: Vec<(u32, u32, u8)> = sources
            .iter()
            .zip(&lifted)
            .filter_map(|(&(x, y), &value)| {
                let (nx, ny) = (x as i64 + self.dx as i64, y as i64 + self.dy as i64);
                canvas.in_bounds(nx, ny).then_some((nx as u32, ny as u32, value))
            })
            .collect();

        let mut touched: Vec<(u32, u32, u8)> = sources
            .iter()
            .zip(&lifted)
            .map(|(&(x, y), &v)| (x, y, v))
            .collect();
        touched.extend(targets.iter().map(|&(x, y, _)| (x, y, canvas.get_pixel_unchecked(x, y))));

        for &(x, y) in &sources {
            canvas.set_pixel_deferred(x, y, 0);
        }
        for &(x, y, value) in &targets {
            canvas.set_pixel_deferred(x, y, value);
        }
        self.previous = Some((state.selection.clone(), touched));
        state.selection.move_by(self.dx, self.dy);
        Ok(())
    }

    fn unapply(&mut self, state: &mut DocumentState) -> DocumentResult<()> {
        let (selection, touched) = self.previous.as_ref().ok_or(DocumentError::NotApplied)?;
        for &(x, y, value) in touched.iter().rev() {
            if state.canvas.in_bounds(x as i64, y as i64) {
                state.canvas.set_pixel_deferred(x, y, value);
            }
        }
        state.selection = selection.clone();
        Ok(())
    }

    fn description(&self) -> String {
        "Move selected pixels".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.previous.as_ref().map_or(0, |(sel, touched)| {
                sel.width() as usize * sel.height() as usize + touched.len() * 9
            })
    }
}
