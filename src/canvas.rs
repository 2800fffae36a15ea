use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::CanvasError;

/// Pixels are `u8` palette indices, so the palette can never grow past this.
pub const MAX_PALETTE_LEN: usize = 256;

/// Marked value stored in the selection mask's alpha byte.
const MASK_ON: u8 = 255;

/// Pack a color into the editor's RGBA32 form (`a<<24 | b<<16 | g<<8 | r`).
pub fn pack_rgba(color: Rgba<u8>) -> u32 {
    let [r, g, b, a] = color.0;
    (a as u32) << 24 | (b as u32) << 16 | (g as u32) << 8 | r as u32
}

/// Inverse of [`pack_rgba`].
pub fn unpack_rgba(value: u32) -> Rgba<u8> {
    Rgba([
        (value & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        ((value >> 16) & 0xFF) as u8,
        ((value >> 24) & 0xFF) as u8,
    ])
}

/// Manhattan distance over all four channels.
fn color_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
        .sum()
}

// ============================================================================
// PIXEL CANVAS – indexed pixel buffer + RGBA palette
// ============================================================================

/// One indexed image: a row-major buffer of palette indices plus the palette.
///
/// Bulk reads and writes (`get_pixels`, `set_pixels`, `clear_pixels`) do not
/// check their rectangle; the command layer computes rectangles from the
/// layout and is responsible for keeping them inside the canvas. Debug builds
/// assert it.
#[derive(Clone, Debug)]
pub struct PixelCanvas {
    pub width: u32,
    pub height: u32,
    pub palette: Vec<Rgba<u8>>,
    pub pixels: Vec<u8>,
    /// Preview-only recolor. Rendering uses it in place of `palette` when set.
    fake_palette: Option<Vec<Rgba<u8>>>,
    display: RgbaImage,
    display_stale: bool,
}

impl PartialEq for PixelCanvas {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.palette == other.palette
            && self.pixels == other.pixels
    }
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            palette: Vec::new(),
            pixels: vec![0; width as usize * height as usize],
            fake_palette: None,
            display: RgbaImage::new(width, height),
            display_stale: true,
        }
    }

    /// Build a canvas from decoded parts. `pixels` must hold `width * height`
    /// entries; a short buffer is zero-padded and a long one truncated.
    pub fn from_parts(width: u32, height: u32, palette: Vec<Rgba<u8>>, mut pixels: Vec<u8>) -> Self {
        pixels.resize(width as usize * height as usize, 0);
        Self {
            width,
            height,
            palette,
            pixels,
            fake_palette: None,
            display: RgbaImage::new(width, height),
            display_stale: true,
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// Whether the rectangle lies fully inside the canvas.
    pub fn contains_rect(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        x as u64 + width as u64 <= self.width as u64 && y as u64 + height as u64 <= self.height as u64
    }

    pub fn check_rect(&self, x: u32, y: u32, width: u32, height: u32) -> Result<(), CanvasError> {
        if self.contains_rect(x, y, width, height) {
            Ok(())
        } else {
            Err(CanvasError::RegionOutOfBounds {
                x,
                y,
                width,
                height,
                canvas_width: self.width,
                canvas_height: self.height,
            })
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
        self.display_stale = true;
    }

    // ------------------------------------------------------------------
    // Single pixels
    // ------------------------------------------------------------------

    /// Bounds-checked read. Returns `None` outside the canvas.
    pub fn get_pixel(&self, x: i64, y: i64) -> Option<u8> {
        if self.in_bounds(x, y) {
            Some(self.pixels[self.offset(x as u32, y as u32)])
        } else {
            None
        }
    }

    #[inline]
    pub fn get_pixel_unchecked(&self, x: u32, y: u32) -> u8 {
        self.pixels[self.offset(x, y)]
    }

    /// Write one pixel and its display color. Not bounds-checked.
    pub fn set_pixel(&mut self, x: u32, y: u32, index: u8) {
        debug_assert!(x < self.width && y < self.height, "set_pixel({x}, {y}) outside canvas");
        let offset = self.offset(x, y);
        self.pixels[offset] = index;
        if !self.display_stale {
            let color = self.render_color(index);
            self.display.put_pixel(x, y, color);
        }
    }

    /// Write one pixel without touching the display buffer. Call
    /// [`PixelCanvas::refresh_display`] once the batch is done.
    pub fn set_pixel_deferred(&mut self, x: u32, y: u32, index: u8) {
        debug_assert!(x < self.width && y < self.height, "set_pixel_deferred({x}, {y}) outside canvas");
        let offset = self.offset(x, y);
        self.pixels[offset] = index;
        self.display_stale = true;
    }

    // ------------------------------------------------------------------
    // Rectangles
    // ------------------------------------------------------------------

    /// Copy a `width * height` rectangle out as a flat row-major buffer.
    pub fn get_pixels(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        debug_assert!(self.contains_rect(x, y, width, height), "get_pixels outside canvas");
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for row in y..y + height {
            let start = self.offset(x, row);
            out.extend_from_slice(&self.pixels[start..start + width as usize]);
        }
        out
    }

    /// Write a flat row-major buffer into a rectangle.
    pub fn set_pixels(&mut self, x: u32, y: u32, width: u32, height: u32, data: &[u8]) {
        debug_assert!(self.contains_rect(x, y, width, height), "set_pixels outside canvas");
        debug_assert_eq!(data.len(), width as usize * height as usize);
        if width == 0 {
            return;
        }
        for (row, src) in (y..y + height).zip(data.chunks_exact(width as usize)) {
            let start = self.offset(x, row);
            self.pixels[start..start + width as usize].copy_from_slice(src);
        }
        self.display_stale = true;
    }

    /// Zero a rectangle.
    pub fn clear_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) {
        debug_assert!(self.contains_rect(x, y, width, height), "clear_pixels outside canvas");
        for row in y..y + height {
            let start = self.offset(x, row);
            self.pixels[start..start + width as usize].fill(0);
        }
        self.display_stale = true;
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// The palette rendering uses: the fake palette if one is set.
    pub fn active_palette(&self) -> &[Rgba<u8>] {
        self.fake_palette.as_deref().unwrap_or(&self.palette)
    }

    pub fn fake_palette(&self) -> Option<&[Rgba<u8>]> {
        self.fake_palette.as_deref()
    }

    /// Set or clear the preview palette. `palette` is left untouched.
    pub fn set_fake_palette(&mut self, fake: Option<Vec<Rgba<u8>>>) {
        self.fake_palette = fake;
        self.display_stale = true;
    }

    /// Indices past the end of the palette render transparent.
    fn render_color(&self, index: u8) -> Rgba<u8> {
        self.active_palette()
            .get(index as usize)
            .copied()
            .unwrap_or(Rgba([0, 0, 0, 0]))
    }

    /// Look up a palette entry (the real palette, not the preview one).
    pub fn palette_color(&self, index: u8) -> Option<Rgba<u8>> {
        self.palette.get(index as usize).copied()
    }

    pub fn palette_as_packed(&self) -> Vec<u32> {
        self.palette.iter().copied().map(pack_rgba).collect()
    }

    /// Rebuild the RGBA display buffer from the pixel buffer.
    pub fn refresh_display(&mut self) {
        if self.display.width() != self.width || self.display.height() != self.height {
            self.display = RgbaImage::new(self.width, self.height);
        }
        let palette = self.active_palette().to_vec();
        let raw: &mut [u8] = &mut self.display;
        raw.par_chunks_mut(4)
            .zip(self.pixels.par_iter())
            .for_each(|(dst, &index)| {
                let color = palette.get(index as usize).copied().unwrap_or(Rgba([0, 0, 0, 0]));
                dst.copy_from_slice(&color.0);
            });
        self.display_stale = false;
    }

    pub fn display_is_stale(&self) -> bool {
        self.display_stale
    }

    /// The display buffer, refreshed first if any deferred write left it stale.
    pub fn display(&mut self) -> &RgbaImage {
        if self.display_stale {
            self.refresh_display();
        }
        &self.display
    }

    /// Render the whole canvas to a fresh RGBA image.
    pub fn to_rgba_image(&self) -> RgbaImage {
        self.region_to_rgba(0, 0, self.width, self.height)
    }

    /// Render one rectangle to RGBA. Parts outside the canvas stay transparent.
    pub fn region_to_rgba(&self, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
        let mut out = RgbaImage::new(width, height);
        for (dx, dy, px) in out.enumerate_pixels_mut() {
            if let Some(index) = self.get_pixel(x as i64 + dx as i64, y as i64 + dy as i64) {
                *px = self.render_color(index);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Palette
    // ------------------------------------------------------------------

    /// Exact RGBA match, if any.
    pub fn find_color(&self, color: Rgba<u8>) -> Option<u8> {
        self.palette.iter().position(|&c| c == color).map(|i| i as u8)
    }

    /// Nearest palette entry by Manhattan distance. Ties keep the lowest index.
    pub fn closest_palette_color(&self, color: Rgba<u8>) -> Option<u8> {
        self.palette
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| color_distance(**c, color))
            .map(|(i, _)| i as u8)
    }

    /// Return the index of `color`, appending it if the palette lacks it.
    pub fn add_color(&mut self, color: Rgba<u8>) -> Result<u8, CanvasError> {
        if let Some(index) = self.find_color(color) {
            return Ok(index);
        }
        self.add_new_color(color)
    }

    /// Append `color` even when an identical entry exists.
    pub fn add_new_color(&mut self, color: Rgba<u8>) -> Result<u8, CanvasError> {
        if self.palette.len() >= MAX_PALETTE_LEN {
            return Err(CanvasError::PaletteFull { max: MAX_PALETTE_LEN });
        }
        self.palette.push(color);
        self.display_stale = true;
        Ok((self.palette.len() - 1) as u8)
    }

    /// Insert a palette entry. With `shift_pixels`, every pixel index at or
    /// above `index` moves up by one so each pixel keeps its color.
    pub fn insert_color(&mut self, index: usize, color: Rgba<u8>, shift_pixels: bool) -> Result<(), CanvasError> {
        if self.palette.len() >= MAX_PALETTE_LEN {
            return Err(CanvasError::PaletteFull { max: MAX_PALETTE_LEN });
        }
        if index > self.palette.len() {
            return Err(CanvasError::PaletteIndexOutOfRange { index, len: self.palette.len() });
        }
        self.palette.insert(index, color);
        if shift_pixels {
            let at = index as u8;
            self.pixels.par_iter_mut().for_each(|p| {
                if *p >= at {
                    *p = p.saturating_add(1);
                }
            });
        }
        self.display_stale = true;
        Ok(())
    }

    /// Remove a palette entry and return it. With `shift_pixels`, every pixel
    /// index above `index` moves down by one. Pixels that used `index` itself
    /// are left alone; callers that care replace them first.
    pub fn remove_color(&mut self, index: usize, shift_pixels: bool) -> Result<Rgba<u8>, CanvasError> {
        if index >= self.palette.len() {
            return Err(CanvasError::PaletteIndexOutOfRange { index, len: self.palette.len() });
        }
        let removed = self.palette.remove(index);
        if shift_pixels {
            let at = index as u8;
            self.pixels.par_iter_mut().for_each(|p| {
                if *p > at {
                    *p -= 1;
                }
            });
        }
        self.display_stale = true;
        Ok(removed)
    }

    /// Swap two palette entries. With `remap_pixels`, pixels follow their colors.
    pub fn swap_colors(&mut self, a: usize, b: usize, remap_pixels: bool) -> Result<(), CanvasError> {
        let len = self.palette.len();
        for index in [a, b] {
            if index >= len {
                return Err(CanvasError::PaletteIndexOutOfRange { index, len });
            }
        }
        self.palette.swap(a, b);
        if remap_pixels && a != b {
            let (a, b) = (a as u8, b as u8);
            self.pixels.par_iter_mut().for_each(|p| {
                if *p == a {
                    *p = b;
                } else if *p == b {
                    *p = a;
                }
            });
        }
        self.display_stale = true;
        Ok(())
    }

    /// Move one palette entry to a new position, shifting the ones between.
    /// With `remap_pixels`, pixels follow their colors.
    pub fn move_color(&mut self, from: usize, to: usize, remap_pixels: bool) -> Result<(), CanvasError> {
        let len = self.palette.len();
        for index in [from, to] {
            if index >= len {
                return Err(CanvasError::PaletteIndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let color = self.palette.remove(from);
        self.palette.insert(to, color);
        if remap_pixels {
            let (from, to) = (from as u8, to as u8);
            self.pixels.par_iter_mut().for_each(|p| {
                if *p == from {
                    *p = to;
                } else if from < to && *p > from && *p <= to {
                    *p -= 1;
                } else if from > to && *p >= to && *p < from {
                    *p += 1;
                }
            });
        }
        self.display_stale = true;
        Ok(())
    }

    /// Overwrite one entry, returning the previous color.
    pub fn replace_color(&mut self, index: usize, color: Rgba<u8>) -> Result<Rgba<u8>, CanvasError> {
        let len = self.palette.len();
        let slot = self
            .palette
            .get_mut(index)
            .ok_or(CanvasError::PaletteIndexOutOfRange { index, len })?;
        let old = std::mem::replace(slot, color);
        self.display_stale = true;
        Ok(old)
    }

    /// Swap in a whole new palette, returning the old one.
    pub fn set_palette(&mut self, palette: Vec<Rgba<u8>>) -> Vec<Rgba<u8>> {
        self.display_stale = true;
        std::mem::replace(&mut self.palette, palette)
    }

    /// Positions of every pixel using `index`.
    pub fn positions_of(&self, index: u8) -> Vec<(u32, u32)> {
        let width = self.width.max(1) as usize;
        self.pixels
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == index)
            .map(|(i, _)| ((i % width) as u32, (i / width) as u32))
            .collect()
    }

    // ------------------------------------------------------------------
    // Size
    // ------------------------------------------------------------------

    /// Reallocate to `width * height`, keeping the overlapping top-left
    /// region. New area is index 0.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        let mut pixels = vec![0u8; width as usize * height as usize];
        let copy_w = self.width.min(width) as usize;
        let copy_h = self.height.min(height) as usize;
        if copy_w > 0 {
            for row in 0..copy_h {
                let src = row * self.width as usize;
                let dst = row * width as usize;
                pixels[dst..dst + copy_w].copy_from_slice(&self.pixels[src..src + copy_w]);
            }
        }
        self.width = width;
        self.height = height;
        self.pixels = pixels;
        self.display = RgbaImage::new(width, height);
        self.display_stale = true;
    }

    pub fn grow(&mut self, dx: u32, dy: u32) {
        self.resize(self.width + dx, self.height + dy);
    }

    pub fn shrink(&mut self, dx: u32, dy: u32) {
        self.resize(self.width.saturating_sub(dx), self.height.saturating_sub(dy));
    }

    // ------------------------------------------------------------------
    // Full-width row bands
    // ------------------------------------------------------------------

    /// Insert `rows` (whole rows, `width` bytes each) at row `y`, pushing
    /// everything from `y` down.
    pub fn insert_rows(&mut self, y: u32, rows: &[u8]) {
        let width = self.width as usize;
        if width == 0 || rows.is_empty() {
            return;
        }
        debug_assert_eq!(rows.len() % width, 0);
        let at = y.min(self.height) as usize * width;
        self.pixels.splice(at..at, rows.iter().copied());
        self.height += (rows.len() / width) as u32;
        self.display = RgbaImage::new(self.width, self.height);
        self.display_stale = true;
    }

    /// Cut `count` rows starting at `y`, pulling the rows below up.
    pub fn remove_rows(&mut self, y: u32, count: u32) -> Vec<u8> {
        debug_assert!(y + count <= self.height, "remove_rows past canvas bottom");
        let width = self.width as usize;
        let start = y as usize * width;
        let removed: Vec<u8> = self.pixels.drain(start..start + count as usize * width).collect();
        self.height -= count;
        self.display = RgbaImage::new(self.width, self.height);
        self.display_stale = true;
        removed
    }

    /// Move the `count` rows at `from` so they start at `to`, where `to` is
    /// measured after the block has been taken out.
    pub fn move_rows(&mut self, from: u32, count: u32, to: u32) {
        if from == to || count == 0 {
            return;
        }
        let block = self.remove_rows(from, count);
        self.insert_rows(to, &block);
    }

    /// Crop the canvas to the bounding box of `mask` and return the box
    /// origin so callers can re-anchor coordinates. Points outside the
    /// canvas are ignored; if none are left the canvas is untouched and the
    /// result is `None`.
    pub fn clip_to_mask(&mut self, mask: &[(u32, u32)]) -> Option<(u32, u32)> {
        let inside: Vec<(u32, u32)> = mask
            .iter()
            .copied()
            .filter(|&(x, y)| self.in_bounds(x as i64, y as i64))
            .collect();
        let (x, y, width, height) = bounding_box(&inside)?;
        let pixels = self.get_pixels(x, y, width, height);
        self.width = width;
        self.height = height;
        self.pixels = pixels;
        self.display = RgbaImage::new(width, height);
        self.display_stale = true;
        Some((x, y))
    }

    // ------------------------------------------------------------------
    // Region transforms
    // ------------------------------------------------------------------

    pub fn flip_region_horizontal(&mut self, x: u32, y: u32, width: u32, height: u32) {
        debug_assert!(self.contains_rect(x, y, width, height));
        for row in y..y + height {
            let start = self.offset(x, row);
            self.pixels[start..start + width as usize].reverse();
        }
        self.display_stale = true;
    }

    pub fn flip_region_vertical(&mut self, x: u32, y: u32, width: u32, height: u32) {
        debug_assert!(self.contains_rect(x, y, width, height));
        let mut data = self.get_pixels(x, y, width, height);
        let w = width as usize;
        if w > 0 {
            let rows: Vec<Vec<u8>> = data.chunks_exact(w).rev().map(|r| r.to_vec()).collect();
            data = rows.concat();
        }
        self.set_pixels(x, y, width, height, &data);
    }

    pub fn rotate_region_180(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let mut data = self.get_pixels(x, y, width, height);
        data.reverse();
        self.set_pixels(x, y, width, height, &data);
    }

    /// Rotate a square region a quarter turn clockwise in place.
    pub fn rotate_region_90cw(&mut self, x: u32, y: u32, size: u32) {
        let src = self.get_pixels(x, y, size, size);
        let n = size as usize;
        let mut dst = vec![0u8; n * n];
        for row in 0..n {
            for col in 0..n {
                // (col, row) moves to (n-1-row, col)
                dst[col * n + (n - 1 - row)] = src[row * n + col];
            }
        }
        self.set_pixels(x, y, size, size, &dst);
    }

    /// Rotate a square region a quarter turn counter-clockwise in place.
    pub fn rotate_region_90ccw(&mut self, x: u32, y: u32, size: u32) {
        let src = self.get_pixels(x, y, size, size);
        let n = size as usize;
        let mut dst = vec![0u8; n * n];
        for row in 0..n {
            for col in 0..n {
                // (col, row) moves to (row, n-1-col)
                dst[(n - 1 - col) * n + row] = src[row * n + col];
            }
        }
        self.set_pixels(x, y, size, size, &dst);
    }
}

/// Minimum bounding box `(x, y, width, height)` of a point list.
pub fn bounding_box(points: &[(u32, u32)]) -> Option<(u32, u32, u32, u32)> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
    for &(x, y) in &points[1..] {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

// ============================================================================
// SELECTION SYSTEM
// ============================================================================

/// Pixel-aligned selection mask. Each canvas pixel has one alpha byte,
/// non-zero meaning "marked".
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionArea {
    mask: GrayImage,
    pub active: bool,
}

impl SelectionArea {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            active: false,
        }
    }

    pub fn from_mask(mask: GrayImage) -> Self {
        let active = mask.pixels().any(|p| p.0[0] != 0);
        Self { mask, active }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn mask_image(&self) -> &GrayImage {
        &self.mask
    }

    /// Resize, keeping the overlapping top-left part of the mask.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.mask.width() && height == self.mask.height() {
            return;
        }
        let mut mask = GrayImage::new(width, height);
        for y in 0..self.mask.height().min(height) {
            for x in 0..self.mask.width().min(width) {
                mask.put_pixel(x, y, *self.mask.get_pixel(x, y));
            }
        }
        self.mask = mask;
    }

    pub fn is_marked(&self, x: i64, y: i64) -> bool {
        x >= 0
            && y >= 0
            && x < self.mask.width() as i64
            && y < self.mask.height() as i64
            && self.mask.get_pixel(x as u32, y as u32).0[0] != 0
    }

    /// Mark or unmark one pixel. Out-of-range positions are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, marked: bool) {
        if x < self.mask.width() && y < self.mask.height() {
            self.mask.put_pixel(x, y, Luma([if marked { MASK_ON } else { 0 }]));
        }
    }

    pub fn clear(&mut self) {
        for p in self.mask.pixels_mut() {
            p.0[0] = 0;
        }
    }

    pub fn select_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let max_x = x.saturating_add(width).min(self.mask.width());
        let max_y = y.saturating_add(height).min(self.mask.height());
        for yy in y..max_y {
            for xx in x..max_x {
                self.mask.put_pixel(xx, yy, Luma([MASK_ON]));
            }
        }
    }

    /// Shift the whole mask. Marks pushed off the edge are lost.
    pub fn move_by(&mut self, dx: i32, dy: i32) {
        let (w, h) = (self.mask.width() as i64, self.mask.height() as i64);
        let mut moved = GrayImage::new(self.mask.width(), self.mask.height());
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            let nx = x as i64 + dx as i64;
            let ny = y as i64 + dy as i64;
            if nx >= 0 && ny >= 0 && nx < w && ny < h {
                moved.put_pixel(nx as u32, ny as u32, *p);
            }
        }
        self.mask = moved;
    }

    /// Every marked position, row-major.
    pub fn marked_points(&self) -> Vec<(u32, u32)> {
        self.mask
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != 0)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p.0[0] == 0)
    }

    /// Bounding box `(x, y, width, height)` of the marked pixels.
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        bounding_box(&self.marked_points())
    }

    /// Insert whole mask rows at `y`. Mirrors [`PixelCanvas::insert_rows`].
    pub fn insert_rows(&mut self, y: u32, rows: &[u8]) {
        let width = self.mask.width();
        if width == 0 || rows.is_empty() {
            return;
        }
        let at = y.min(self.mask.height()) as usize * width as usize;
        let mut raw = self.mask.as_raw().clone();
        raw.splice(at..at, rows.iter().copied());
        self.rebuild(width, raw);
    }

    /// Cut whole mask rows. Mirrors [`PixelCanvas::remove_rows`].
    pub fn remove_rows(&mut self, y: u32, count: u32) -> Vec<u8> {
        let width = self.mask.width();
        let mut raw = self.mask.as_raw().clone();
        let start = (y as usize * width as usize).min(raw.len());
        let end = (start + count as usize * width as usize).min(raw.len());
        let removed = raw.drain(start..end).collect();
        self.rebuild(width, raw);
        removed
    }

    pub fn move_rows(&mut self, from: u32, count: u32, to: u32) {
        if from == to || count == 0 {
            return;
        }
        let block = self.remove_rows(from, count);
        self.insert_rows(to, &block);
    }

    fn rebuild(&mut self, width: u32, raw: Vec<u8>) {
        let height = if width == 0 { 0 } else { (raw.len() / width as usize) as u32 };
        self.mask = GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height));
    }

    /// Raw mask bytes, for commands that restore a mask wholesale.
    pub fn snapshot(&self) -> Vec<u8> {
        self.mask.as_raw().clone()
    }

    /// Restore bytes captured by [`SelectionArea::snapshot`] on a mask of the
    /// same size. Mismatched sizes are ignored.
    pub fn restore(&mut self, raw: &[u8]) {
        if raw.len() == self.mask.as_raw().len() {
            let dst: &mut [u8] = &mut self.mask;
            dst.copy_from_slice(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn canvas_with(width: u32, height: u32, palette: &[Rgba<u8>]) -> PixelCanvas {
        let mut canvas = PixelCanvas::new(width, height);
        canvas.palette = palette.to_vec();
        canvas
    }

    #[test]
    fn packing_matches_editor_layout() {
        let c = Rgba([0x11, 0x22, 0x33, 0x44]);
        assert_eq!(pack_rgba(c), 0x4433_2211);
        assert_eq!(unpack_rgba(0x4433_2211), c);
    }

    #[test]
    fn get_pixel_out_of_bounds_is_none() {
        let canvas = PixelCanvas::new(4, 4);
        assert_eq!(canvas.get_pixel(-1, 0), None);
        assert_eq!(canvas.get_pixel(4, 0), None);
        assert_eq!(canvas.get_pixel(0, 4), None);
        assert_eq!(canvas.get_pixel(3, 3), Some(0));
    }

    #[test]
    fn add_color_dedups() {
        let mut canvas = canvas_with(1, 1, &[CLEAR]);
        let a = canvas.add_color(RED).unwrap();
        let b = canvas.add_color(RED).unwrap();
        assert_eq!(a, b);
        assert_eq!(canvas.palette.len(), 2);
    }

    #[test]
    fn palette_caps_at_256() {
        let mut canvas = PixelCanvas::new(1, 1);
        for i in 0..256u32 {
            canvas.add_new_color(unpack_rgba(i)).unwrap();
        }
        assert_eq!(
            canvas.add_color(Rgba([1, 2, 3, 4])),
            Err(CanvasError::PaletteFull { max: 256 })
        );
    }

    #[test]
    fn bulk_read_write_round_trip() {
        let mut canvas = PixelCanvas::new(5, 4);
        let block = vec![1, 2, 3, 4, 5, 6];
        canvas.set_pixels(1, 1, 3, 2, &block);
        assert_eq!(canvas.get_pixels(1, 1, 3, 2), block);
        assert_eq!(canvas.get_pixel(0, 1), Some(0));
        assert_eq!(canvas.get_pixel(3, 2), Some(6));
        canvas.clear_pixels(1, 1, 3, 2);
        assert!(canvas.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn insert_and_remove_with_shift_preserve_colors() {
        let mut canvas = canvas_with(3, 1, &[CLEAR, RED, GREEN]);
        canvas.set_pixels(0, 0, 3, 1, &[0, 1, 2]);
        canvas.insert_color(1, BLUE, true).unwrap();
        assert_eq!(canvas.pixels, vec![0, 2, 3]);
        assert_eq!(canvas.palette_color(2), Some(RED));
        let removed = canvas.remove_color(1, true).unwrap();
        assert_eq!(removed, BLUE);
        assert_eq!(canvas.pixels, vec![0, 1, 2]);
    }

    #[test]
    fn move_color_remaps_pixels() {
        let mut canvas = canvas_with(4, 1, &[CLEAR, RED, GREEN, BLUE]);
        canvas.set_pixels(0, 0, 4, 1, &[0, 1, 2, 3]);
        let before = canvas.to_rgba_image();
        canvas.move_color(1, 3, true).unwrap();
        assert_eq!(canvas.palette, vec![CLEAR, GREEN, BLUE, RED]);
        assert_eq!(canvas.to_rgba_image(), before);
        canvas.move_color(3, 1, true).unwrap();
        assert_eq!(canvas.pixels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn swap_without_remap_changes_appearance_only() {
        let mut canvas = canvas_with(2, 1, &[RED, GREEN]);
        canvas.set_pixels(0, 0, 2, 1, &[0, 1]);
        canvas.swap_colors(0, 1, false).unwrap();
        assert_eq!(canvas.pixels, vec![0, 1]);
        assert_eq!(canvas.palette, vec![GREEN, RED]);
    }

    #[test]
    fn closest_color_uses_manhattan_distance() {
        let canvas = canvas_with(1, 1, &[CLEAR, RED, GREEN]);
        assert_eq!(canvas.closest_palette_color(Rgba([250, 10, 0, 255])), Some(1));
        assert_eq!(canvas.closest_palette_color(Rgba([0, 0, 0, 10])), Some(0));
    }

    #[test]
    fn resize_keeps_top_left() {
        let mut canvas = PixelCanvas::new(3, 3);
        canvas.set_pixel(0, 0, 1);
        canvas.set_pixel(2, 2, 2);
        canvas.resize(2, 4);
        assert_eq!(canvas.pixels.len(), 8);
        assert_eq!(canvas.get_pixel(0, 0), Some(1));
        assert_eq!(canvas.get_pixel(1, 3), Some(0));
        canvas.grow(1, 0);
        assert_eq!(canvas.width, 3);
        canvas.shrink(5, 1);
        assert_eq!((canvas.width, canvas.height), (0, 3));
    }

    #[test]
    fn clip_to_mask_returns_origin() {
        let mut canvas = PixelCanvas::new(8, 8);
        canvas.set_pixel(3, 2, 7);
        canvas.set_pixel(5, 4, 9);
        let origin = canvas.clip_to_mask(&[(3, 2), (5, 4)]);
        assert_eq!(origin, Some((3, 2)));
        assert_eq!((canvas.width, canvas.height), (3, 3));
        assert_eq!(canvas.get_pixel(0, 0), Some(7));
        assert_eq!(canvas.get_pixel(2, 2), Some(9));
        assert_eq!(canvas.clip_to_mask(&[]), None);
    }

    #[test]
    fn clip_to_mask_ignores_points_off_canvas() {
        let mut canvas = PixelCanvas::new(4, 4);
        canvas.set_pixel(1, 1, 3);
        assert_eq!(canvas.clip_to_mask(&[(9, 9), (4, 0)]), None);
        assert_eq!((canvas.width, canvas.height), (4, 4));
        assert_eq!(canvas.clip_to_mask(&[(1, 1), (99, 99)]), Some((1, 1)));
        assert_eq!((canvas.width, canvas.height), (1, 1));
        assert_eq!(canvas.pixels, vec![3]);
    }

    #[test]
    fn quarter_turns_cancel() {
        let mut canvas = PixelCanvas::new(3, 3);
        let data: Vec<u8> = (1..=9).collect();
        canvas.set_pixels(0, 0, 3, 3, &data);
        canvas.rotate_region_90cw(0, 0, 3);
        assert_eq!(canvas.get_pixels(0, 0, 3, 1), vec![7, 4, 1]);
        canvas.rotate_region_90ccw(0, 0, 3);
        assert_eq!(canvas.pixels, data);
        canvas.rotate_region_180(0, 0, 3, 3);
        assert_eq!(canvas.get_pixel(0, 0), Some(9));
    }

    #[test]
    fn fake_palette_only_affects_rendering() {
        let mut canvas = canvas_with(1, 1, &[RED]);
        canvas.set_fake_palette(Some(vec![BLUE]));
        assert_eq!(canvas.to_rgba_image().get_pixel(0, 0), &BLUE);
        assert_eq!(canvas.palette, vec![RED]);
        canvas.set_fake_palette(None);
        assert_eq!(canvas.display().get_pixel(0, 0), &RED);
    }

    #[test]
    fn deferred_writes_mark_display_stale() {
        let mut canvas = canvas_with(2, 1, &[CLEAR, RED]);
        canvas.refresh_display();
        canvas.set_pixel(0, 0, 1);
        assert!(!canvas.display_is_stale());
        canvas.set_pixel_deferred(1, 0, 1);
        assert!(canvas.display_is_stale());
        assert_eq!(canvas.display().get_pixel(1, 0), &RED);
    }

    #[test]
    fn row_bands_insert_remove_move() {
        let mut canvas = PixelCanvas::new(2, 3);
        canvas.set_pixels(0, 0, 2, 3, &[1, 1, 2, 2, 3, 3]);
        canvas.insert_rows(1, &[9, 9]);
        assert_eq!(canvas.pixels, vec![1, 1, 9, 9, 2, 2, 3, 3]);
        assert_eq!(canvas.remove_rows(1, 1), vec![9, 9]);
        canvas.move_rows(0, 1, 2);
        assert_eq!(canvas.pixels, vec![2, 2, 3, 3, 1, 1]);
        canvas.move_rows(2, 1, 0);
        assert_eq!(canvas.pixels, vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(canvas.height, 3);
    }

    #[test]
    fn selection_move_and_bounds() {
        let mut sel = SelectionArea::new(4, 4);
        sel.set_pixel(1, 1, true);
        sel.set_pixel(2, 1, true);
        sel.move_by(1, 2);
        assert_eq!(sel.marked_points(), vec![(2, 3), (3, 3)]);
        assert_eq!(sel.bounds(), Some((2, 3, 2, 1)));
        sel.move_by(2, 0);
        assert!(sel.is_empty());
    }

    #[test]
    fn selection_resize_keeps_overlap() {
        let mut sel = SelectionArea::new(2, 2);
        sel.select_rect(0, 0, 2, 2);
        sel.resize(3, 1);
        assert_eq!(sel.marked_points(), vec![(0, 0), (1, 0)]);
    }
}
