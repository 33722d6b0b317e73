//! Cropping of transparent cutouts to their visible subject

use crate::compositor::Rect;
use image::RgbaImage;

/// Bounding box of all pixels with non-zero alpha, `None` for a fully transparent image
#[must_use]
pub fn alpha_bounding_box(image: &RgbaImage) -> Option<Rect> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] > 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| Rect {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

/// Crop a cutout to the bounding box of its visible pixels
///
/// A fully transparent image has no bounding box and is returned unchanged.
#[must_use]
pub fn crop_to_object(image: &RgbaImage) -> RgbaImage {
    match alpha_bounding_box(image) {
        Some(rect) => {
            image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
        },
        None => image.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_crop_to_subject() {
        let mut image = RgbaImage::new(20, 10);
        for y in 2..5 {
            for x in 3..9 {
                image.put_pixel(x, y, Rgba([10, 20, 30, 255]));
            }
        }
        // A single faint pixel still counts as visible
        image.put_pixel(12, 7, Rgba([0, 0, 0, 1]));

        let rect = alpha_bounding_box(&image).unwrap();
        assert_eq!(rect, Rect { x: 3, y: 2, width: 10, height: 6 });

        let cropped = crop_to_object(&image);
        assert_eq!(cropped.dimensions(), (10, 6));
        assert_eq!(cropped.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_transparent_image_unchanged() {
        let image = RgbaImage::new(8, 4);
        assert!(alpha_bounding_box(&image).is_none());
        assert_eq!(crop_to_object(&image).dimensions(), (8, 4));
    }
}
