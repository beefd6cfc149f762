pub mod image_helper {
    use crate::core_modules::bbox::BBox;
    use crate::error::{AugmentError, Result};
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;
    use std::path::Path;

    const INSPECTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
    const INSPECTION_THICKNESS: u32 = 2;

    /// Decodes any supported image file into 8-bit RGB.
    pub fn load_rgb(path: &Path) -> Result<RgbImage> {
        let image = image::open(path).map_err(|e| AugmentError::image(path, e))?;
        Ok(image.to_rgb8())
    }

    /// Encodes an image, choosing the format from the file extension.
    pub fn save(path: &Path, image: &RgbImage) -> Result<()> {
        image.save(path).map_err(|e| AugmentError::image(path, e))
    }

    /// Copy of `image` with `bbox` outlined, for eyeballing a transformed sample.
    pub fn draw_bbox(image: &RgbImage, bbox: &BBox) -> RgbImage {
        let mut canvas = image.clone();
        let (w, h) = canvas.dimensions();
        let clipped = bbox.clip_to(w, h);
        for inset in 0..INSPECTION_THICKNESS {
            let inset = inset as f64;
            let width = (clipped.width - 2.0 * inset).round() as i64;
            let height = (clipped.height - 2.0 * inset).round() as i64;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at((clipped.x + inset).round() as i32, (clipped.y + inset).round() as i32)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut canvas, rect, INSPECTION_COLOR);
        }
        canvas
    }
}
