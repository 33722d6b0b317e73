//! Cutout compositing
//!
//! Scales a transparent cutout relative to the background width and alpha-blends it
//! onto the background at a relative anchor. The placed rectangle is clipped to the
//! background, so offsets that fall outside the frame (a cutout taller than the
//! background, for instance) blend only the visible intersection.

use crate::{
    error::{BgChangerError, Result},
    position::PositionConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};

/// Aspect ratios (width / height) treated as near-square
pub const NEAR_SQUARE_ASPECT: std::ops::RangeInclusive<f64> = 0.7..=1.35;

/// Scale damping applied to near-square cutouts
pub const NEAR_SQUARE_DAMPING: f64 = 0.77;

/// Rectangle in background pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where a resized cutout lands on the background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Signed offset of the cutout's left edge
    pub x_offset: i64,
    /// Signed offset of the cutout's top edge
    pub y_offset: i64,
    /// Resized cutout width
    pub width: u32,
    /// Resized cutout height
    pub height: u32,
    /// Part of the cutout inside the background, `None` when nothing overlaps
    pub visible: Option<Rect>,
}

/// Alpha compositing of cutouts onto backgrounds
pub struct Compositor;

impl Compositor {
    /// Scale factor after the near-square heuristic
    ///
    /// Subjects whose aspect ratio falls inside [`NEAR_SQUARE_ASPECT`] look oversized
    /// when scaled to the same fraction of the background width, so their factor is
    /// multiplied by [`NEAR_SQUARE_DAMPING`].
    #[must_use]
    pub fn effective_scale_factor(cutout_width: u32, cutout_height: u32, scale: f64) -> f64 {
        if cutout_height == 0 {
            return scale;
        }
        let aspect = f64::from(cutout_width) / f64::from(cutout_height);
        if NEAR_SQUARE_ASPECT.contains(&aspect) {
            scale * NEAR_SQUARE_DAMPING
        } else {
            scale
        }
    }

    /// Target size of the cutout for a given background width
    ///
    /// Width is `floor(background_width * scale)`; height keeps the cutout's aspect ratio
    /// and is floored as well.
    #[must_use]
    pub fn resized_dimensions(
        cutout_dimensions: (u32, u32),
        background_width: u32,
        effective_scale: f64,
    ) -> (u32, u32) {
        let (cutout_width, cutout_height) = cutout_dimensions;
        if cutout_width == 0 {
            return (0, 0);
        }
        let width = (f64::from(background_width) * effective_scale).floor().max(0.0) as u32;
        let height = (f64::from(width) / f64::from(cutout_width) * f64::from(cutout_height))
            .floor()
            .max(0.0) as u32;
        (width, height)
    }

    /// Compute offsets and the visible rectangle for a resized cutout
    #[must_use]
    pub fn placement(
        background_dimensions: (u32, u32),
        resized_dimensions: (u32, u32),
        position: &PositionConfig,
    ) -> Placement {
        let (bg_width, bg_height) = background_dimensions;
        let (width, height) = resized_dimensions;

        let free_x = i64::from(bg_width) - i64::from(width);
        let free_y = i64::from(bg_height) - i64::from(height);
        let x_offset = (position.width_position * free_x as f64).floor() as i64;
        let y_offset = (position.height_position * free_y as f64).floor() as i64;

        let x0 = x_offset.max(0);
        let y0 = y_offset.max(0);
        let x1 = (x_offset + i64::from(width)).min(i64::from(bg_width));
        let y1 = (y_offset + i64::from(height)).min(i64::from(bg_height));

        let visible = (x0 < x1 && y0 < y1).then(|| Rect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        });

        Placement {
            x_offset,
            y_offset,
            width,
            height,
            visible,
        }
    }

    /// Scale `cutout` relative to `background` and blend it in at `position`
    ///
    /// The returned image always has the background's dimensions. Position values are
    /// expected to be validated by the caller.
    ///
    /// # Errors
    /// - `InvalidArgument` when either image has a zero dimension
    pub fn composite(
        cutout: &RgbaImage,
        background: &RgbImage,
        position: &PositionConfig,
    ) -> Result<RgbImage> {
        let (cutout_width, cutout_height) = cutout.dimensions();
        if cutout_width == 0 || cutout_height == 0 {
            return Err(BgChangerError::invalid_argument(format!(
                "cutout must not be empty, got {}x{}",
                cutout_width, cutout_height
            )));
        }
        if background.width() == 0 || background.height() == 0 {
            return Err(BgChangerError::invalid_argument(format!(
                "background must not be empty, got {}x{}",
                background.width(),
                background.height()
            )));
        }

        let scale =
            Self::effective_scale_factor(cutout_width, cutout_height, position.scale_factor);
        let (width, height) =
            Self::resized_dimensions((cutout_width, cutout_height), background.width(), scale);

        let mut output = background.clone();
        if width == 0 || height == 0 {
            tracing::debug!(scale, "cutout scaled to zero area, background left unchanged");
            return Ok(output);
        }

        let resized = image::imageops::resize(cutout, width, height, FilterType::Triangle);
        let placement = Self::placement(background.dimensions(), (width, height), position);
        tracing::debug!(
            scale,
            width,
            height,
            x_offset = placement.x_offset,
            y_offset = placement.y_offset,
            "placing cutout"
        );

        if let Some(rect) = placement.visible {
            Self::blend(&mut output, &resized, &placement, rect);
        }
        Ok(output)
    }

    /// Composite arbitrary decoded images (cutout converted to RGBA, background to RGB)
    pub fn composite_dynamic(
        cutout: &DynamicImage,
        background: &DynamicImage,
        position: &PositionConfig,
    ) -> Result<RgbImage> {
        Self::composite(&cutout.to_rgba8(), &background.to_rgb8(), position)
    }

    fn blend(output: &mut RgbImage, resized: &RgbaImage, placement: &Placement, rect: Rect) {
        for y in rect.y..rect.y + rect.height {
            let src_y = (i64::from(y) - placement.y_offset) as u32;
            for x in rect.x..rect.x + rect.width {
                let src_x = (i64::from(x) - placement.x_offset) as u32;
                let src = resized.get_pixel(src_x, src_y);
                let alpha = f64::from(src[3]) / 255.0;
                let dst = output.get_pixel_mut(x, y);
                for c in 0..3 {
                    let blended =
                        f64::from(dst[c]) * (1.0 - alpha) + f64::from(src[c]) * alpha;
                    dst[c] = blended.clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}
