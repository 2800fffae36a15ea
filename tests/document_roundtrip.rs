use std::io::Cursor;

use image::Rgba;
use staxie::io::chunk::RawChunk;
use staxie::io::{self, CodecOptions};
use staxie::ops::canvas_ops::{AddStack, InsertFrame, RenameAnimation, SetSliceShading};
use staxie::ops::pixel_ops::PixelCommand;
use staxie::stax::StaxStack;
use staxie::{DocumentState, PixelCanvas, SpriteDocument, StaxSheet};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// 16x16 frames, palette [transparent, red], stack "body" with animation
/// "idle" of two frames and one slice.
fn body_idle() -> SpriteDocument {
    let mut doc = SpriteDocument::from_state(None, DocumentState::new(PixelCanvas::new(0, 0), StaxSheet::new(16, 16)));
    doc.state.canvas.palette = vec![CLEAR, RED];
    doc.push(Box::new(AddStack::new(1).named("body"))).unwrap();
    doc.push(Box::new(RenameAnimation::new("body", "animation", "idle"))).unwrap();
    doc.push(Box::new(InsertFrame::append("body", "idle"))).unwrap();
    doc
}

#[test]
fn place_undo_then_encode_decode() {
    let mut doc = body_idle();
    assert_eq!((doc.state.width(), doc.state.height()), (16, 32));

    doc.push_pixel(PixelCommand::place(0, 0, 1)).unwrap();
    assert_eq!(doc.state.canvas.get_pixel(0, 0), Some(1));
    doc.undo().unwrap();
    assert_eq!(doc.state.canvas.get_pixel(0, 0), Some(0));

    doc.push(Box::new(SetSliceShading::new("body", "idle", 0, 0, 5))).unwrap();
    let bytes = doc.encode(&CodecOptions::default()).unwrap();
    let decoded = SpriteDocument::decode(&bytes, &CodecOptions::default()).unwrap();

    let stack = &decoded.state.sheet.stacks[0];
    assert_eq!(stack.name, "body");
    assert_eq!(stack.slice_count, 1);
    assert_eq!(stack.animations[0].name, "idle");
    assert_eq!(stack.animations[0].frames.len(), 2);
    assert_eq!(stack.animations[0].frames[0].slices[0].shading, 5);
    assert_eq!(decoded.state.canvas.palette, vec![CLEAR, RED]);
    assert_eq!(decoded.state, doc.state);
}

#[test]
fn save_and_load_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("body.png");
    let options = CodecOptions::default();

    let mut doc = body_idle();
    doc.push_pixel(PixelCommand::place(3, 20, 1)).unwrap();
    doc.state.text.insert("Author".into(), "someone".into());
    doc.state.ancillary.push(RawChunk::new(*b"prVt", vec![0xDE, 0xAD]));
    assert!(doc.is_dirty);

    io::save_document(&mut doc, &path, &options).unwrap();
    assert!(!doc.is_dirty);
    assert_eq!(doc.name, "body.png");

    let loaded = io::load_document(&path, &options).unwrap();
    assert_eq!(loaded.state, doc.state);
    assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
    assert_eq!(loaded.view.stack, Some(0));
}

#[test]
fn background_save_writes_encoded_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bg.png");
    let doc = body_idle();
    let bytes = doc.encode(&CodecOptions::default()).unwrap();
    io::save_in_background(bytes.clone(), path.clone()).join().unwrap().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn output_is_a_valid_png_for_an_independent_decoder() {
    let mut doc = body_idle();
    doc.state.canvas.palette.push(Rgba([0, 128, 255, 200]));
    doc.push_pixel(PixelCommand::place(5, 5, 1)).unwrap();
    doc.push_pixel(PixelCommand::place(6, 30, 2)).unwrap();
    let options = CodecOptions {
        idat_chunk_size: 32,
        ..Default::default()
    };
    let bytes = doc.encode(&options).unwrap();

    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info().unwrap();
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).unwrap();
    buf.truncate(info.buffer_size());

    assert_eq!((info.width, info.height), (16, 32));
    assert_eq!(info.color_type, png::ColorType::Rgba);
    assert_eq!(buf, doc.render_rgba().into_raw());
}

#[test]
fn decodes_filtered_rgba_from_an_independent_encoder() {
    let (width, height) = (6u32, 4u32);
    let rgba: Vec<u8> = (0..width * height)
        .flat_map(|i| match i % 3 {
            0 => [255, 0, 0, 255],
            1 => [0, 0, 0, 0],
            _ => [10, 200, 30, 255],
        })
        .collect();

    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_filter(png::FilterType::Paeth);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&rgba).unwrap();
        writer.finish().unwrap();
    }

    let state = io::decode(&bytes, &CodecOptions::default()).unwrap();
    assert_eq!(state.canvas.palette.len(), 3);
    assert_eq!(state.render_rgba().into_raw(), rgba);
    assert!(state.sheet.stacks.is_empty());
    assert_eq!((state.sheet.frame_width, state.sheet.frame_height), (width, height));
}

#[test]
fn decodes_indexed_png_with_sub_filter() {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, 4, 2);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(vec![0, 0, 0, 255, 255, 255, 9, 8, 7]);
        encoder.set_trns(vec![0]);
        encoder.set_filter(png::FilterType::Sub);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 1, 2, 1, 2, 2, 0, 0]).unwrap();
        writer.finish().unwrap();
    }

    let state = io::decode(&bytes, &CodecOptions::default()).unwrap();
    assert_eq!(
        state.canvas.palette,
        vec![CLEAR, Rgba([255, 255, 255, 255]), Rgba([9, 8, 7, 255])]
    );
    assert_eq!(state.canvas.pixels, vec![0, 1, 2, 1, 2, 2, 0, 0]);
}

#[test]
fn metadata_only_documents_round_trip() {
    let mut sheet = StaxSheet::new(3, 2);
    sheet.stacks.push(StaxStack::new("a", 2));
    sheet.stacks.push(StaxStack::new("b", 1));
    sheet.stacks[1].animations.clear();
    let state = DocumentState::from_sheet(sheet);
    let bytes = io::encode(&state, &CodecOptions::default()).unwrap();
    assert_eq!(io::decode(&bytes, &CodecOptions::default()).unwrap(), state);
}
