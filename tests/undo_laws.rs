use image::Rgba;
use staxie::canvas::PixelCanvas;
use staxie::ops::canvas_ops::{
    AddAnimation, AddStack, ChangeFrameTime, DuplicateFrame, DuplicateStack, GrowStackSlices, InsertFrame,
    MoveAnimation, MoveFrame, MoveStack, RemoveAnimation, RemoveFrame, RemoveStack, RenameStack, ResizeFrames,
    ShrinkStackSlices,
};
use staxie::ops::palette::{AddSwatch, MoveSwatch, SwapSwatch};
use staxie::ops::pixel_ops::{PixelCommand, SelectionCommand};
use staxie::ops::transform::{Flip, FlipAxis, MoveSelectedPixels};
use staxie::project::DocCommand;
use staxie::stax::{StaxFrame, StaxStack};
use staxie::{Area, Command, DocumentError, DocumentState, SpriteDocument, StaxSheet};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

fn empty_doc() -> SpriteDocument {
    SpriteDocument::new_untitled(1, 4, 4)
}

/// Paint every slice with its own index so moves are visible.
fn paint_slices(doc: &mut SpriteDocument) {
    let areas = doc.state.sheet.layout();
    while doc.state.canvas.palette.len() < areas.len() + 1 {
        doc.state.canvas.palette.push(Rgba([doc.state.canvas.palette.len() as u8, 0, 0, 255]));
    }
    for (i, area) in areas.iter().enumerate() {
        doc.state
            .canvas
            .set_pixels(area.x, area.y, area.width, area.height, &vec![i as u8 + 1; (area.width * area.height) as usize]);
    }
}

fn mixed_commands() -> Vec<DocCommand> {
    vec![
        Box::new(AddStack::new(2).named("body")),
        Box::new(AddSwatch::new(RED)),
        Box::new(PixelCommand::place(1, 1, 1)),
        Box::new(AddAnimation::new("body").named("walk").with_frames(3)),
        Box::new(PixelCommand::region(Area::new(4, 4, 2, 2), vec![1, 1, 1, 1]).unwrap()),
        Box::new(MoveFrame::new("body", "walk", 0, 2)),
        Box::new(AddStack::new(1).named("head")),
        Box::new(MoveStack::new("head", 0)),
        Box::new(DuplicateStack::new("body")),
        Box::new(GrowStackSlices::new("head", 2)),
        Box::new(AddSwatch::new(GREEN)),
        Box::new(SwapSwatch::new(1, 2, true)),
        Box::new(SelectionCommand::select_area(Area::new(0, 0, 3, 3))),
        Box::new(MoveSelectedPixels::new(1, 0)),
        Box::new(Flip::new(Area::new(0, 4, 8, 4), FlipAxis::Horizontal)),
        Box::new(RemoveFrame::new("body", "walk", 1)),
        Box::new(DuplicateFrame::new("body", "walk", 0)),
        Box::new(MoveAnimation::new("body", "walk", 0)),
        Box::new(ShrinkStackSlices::new("head", 1)),
        Box::new(ChangeFrameTime::new("body", "walk", 40)),
        Box::new(RenameStack::new("body copy", "tail")),
        Box::new(MoveSwatch::new(2, 0, true)),
        Box::new(ResizeFrames::new(6, 3).unwrap()),
        Box::new(RemoveAnimation::new("body", "animation")),
        Box::new(RemoveStack::new("head")),
    ]
}

#[test]
fn undo_all_then_redo_all() {
    let mut doc = empty_doc();
    let mut states = vec![doc.state.clone()];
    for command in mixed_commands() {
        let description = command.description();
        doc.push(command).unwrap_or_else(|e| panic!("{description}: {e}"));
        assert!(doc.state.layout_is_consistent(), "{description} broke the layout");
        states.push(doc.state.clone());
    }

    let n = states.len() - 1;
    for i in (0..n).rev() {
        doc.undo().unwrap();
        assert_eq!(doc.state, states[i], "undo back to step {i}");
    }
    assert!(!doc.can_undo());
    for (i, expected) in states.iter().enumerate().skip(1) {
        doc.redo().unwrap();
        assert_eq!(&doc.state, expected, "redo to step {i}");
    }
    assert!(!doc.can_redo());
}

#[test]
fn capture_release_is_one_step() {
    let mut doc = empty_doc();
    doc.push(Box::new(AddStack::new(1).named("a"))).unwrap();
    let before = doc.state.clone();

    doc.capture();
    doc.push(Box::new(AddSwatch::new(RED))).unwrap();
    doc.push(Box::new(PixelCommand::place(0, 0, 1))).unwrap();
    doc.push(Box::new(InsertFrame::append("a", "animation"))).unwrap();
    doc.release("Stroke");
    let after = doc.state.clone();

    assert_eq!(doc.history.undo_description().as_deref(), Some("Stroke"));
    doc.undo().unwrap();
    assert_eq!(doc.state, before);
    doc.redo().unwrap();
    assert_eq!(doc.state, after);
}

#[test]
fn failed_command_is_not_recorded() {
    let mut doc = empty_doc();
    doc.push(Box::new(AddStack::new(1).named("a"))).unwrap();
    let before = doc.state.clone();
    let err = doc.push(Box::new(AddStack::new(1).named("a"))).unwrap_err();
    assert_eq!(err, DocumentError::DuplicateName("a".into()));
    assert_eq!(doc.state, before);
    assert_eq!(doc.history.undo_count(), 1);
}

#[test]
fn pushing_after_undo_discards_redo() {
    let mut doc = empty_doc();
    doc.push(Box::new(AddStack::new(1))).unwrap();
    doc.push(Box::new(AddStack::new(1))).unwrap();
    doc.undo().unwrap();
    assert!(doc.can_redo());
    doc.push(Box::new(AddStack::new(3))).unwrap();
    assert!(!doc.can_redo());
    assert_eq!(doc.state.sheet.stacks[1].name, "stack 2");
    assert_eq!(doc.state.sheet.stacks[1].slice_count, 3);
}

#[test]
fn palette_add_color_dedups() {
    let mut canvas = PixelCanvas::new(1, 1);
    let a = canvas.add_color(RED).unwrap();
    let b = canvas.add_color(RED).unwrap();
    assert_eq!(a, b);
    assert_eq!(canvas.palette.len(), 1);
}

#[test]
fn removing_a_stack_restores_rows_below_on_undo() {
    // Two stacks of 2 frames x 16px: 64 rows in total.
    let mut sheet = StaxSheet::new(8, 16);
    let mut top = StaxStack::new("top", 1);
    top.animations[0].frames.push(StaxFrame::with_slices(1));
    let mut bottom = top.clone();
    bottom.name = "bottom".into();
    sheet.stacks.push(top);
    sheet.stacks.push(bottom);
    let mut state = DocumentState::from_sheet(sheet);
    assert_eq!(state.height(), 64);
    for y in 0..64 {
        state.canvas.set_pixels(0, y, 8, 1, &[y as u8; 8]);
    }
    let mut doc = SpriteDocument::from_state(None, state);
    let before = doc.state.clone();

    doc.push(Box::new(RemoveStack::new("top"))).unwrap();
    assert_eq!(doc.state.height(), 32);
    assert_eq!(doc.state.canvas.get_pixel(0, 0), Some(32));
    assert!(doc.state.layout_is_consistent());

    doc.undo().unwrap();
    assert_eq!(doc.state, before);
    assert_eq!(doc.state.canvas.get_pixel(0, 63), Some(63));
}

#[test]
fn structural_moves_keep_slices_disjoint_and_carry_pixels() {
    let mut doc = empty_doc();
    doc.push(Box::new(AddStack::new(2).named("a"))).unwrap();
    doc.push(Box::new(AddStack::new(1).named("b"))).unwrap();
    doc.push(Box::new(AddAnimation::new("a").named("run").with_frames(2))).unwrap();
    paint_slices(&mut doc);

    let frame_pixels = |doc: &SpriteDocument, stack: &str, anim: &str, frame: usize| {
        let area = doc.frame_area(stack, anim, frame).unwrap();
        doc.state.canvas.get_pixels(area.x, area.y, area.width, area.height)
    };
    let run0 = frame_pixels(&doc, "a", "run", 0);
    let b0 = frame_pixels(&doc, "b", "animation", 0);

    doc.push(Box::new(MoveStack::new("b", 0))).unwrap();
    doc.push(Box::new(MoveFrame::new("a", "run", 0, 1))).unwrap();
    doc.push(Box::new(MoveAnimation::new("a", "run", 0))).unwrap();
    assert!(doc.state.layout_is_consistent());

    assert_eq!(frame_pixels(&doc, "b", "animation", 0), b0);
    assert_eq!(frame_pixels(&doc, "a", "run", 1), run0);
    let areas = doc.state.sheet.layout();
    for (i, a) in areas.iter().enumerate() {
        for b in &areas[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
}
