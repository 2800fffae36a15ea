pub mod canvas_ops;
pub mod clipboard;
pub mod palette;
pub mod pixel_ops;
pub mod transform;
