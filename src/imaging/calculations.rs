//! Pure calculation functions for resize planning.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::Fit;

/// Target geometry for one resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    /// Dimensions after scaling.
    pub width: u32,
    pub height: u32,
    /// Center-crop applied after scaling (`cover` only).
    pub crop: Option<(u32, u32)>,
}

fn scaled(source: (u32, u32), scale: f64) -> (u32, u32) {
    let w = (source.0 as f64 * scale).round().max(1.0) as u32;
    let h = (source.1 as f64 * scale).round().max(1.0) as u32;
    (w, h)
}

/// Plan how to fit `source` into the `bounds` box under `fit`.
///
/// Returns `None` when the image can be re-encoded at its current size:
/// images are never enlarged, so anything already within the box is left as-is.
///
/// ```text
/// 4000x3000 inside 2200x2400  → 2200x1650
/// 4000x3000 outside 2200x2400 → 3200x2400
/// 4000x3000 cover 2200x2400   → 3200x2400, cropped to 2200x2400
/// ```
pub fn plan_resize(source: (u32, u32), bounds: (u32, u32), fit: Fit) -> Option<ResizePlan> {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w == 0 || src_h == 0 || max_w == 0 || max_h == 0 {
        return None;
    }

    let ratio_w = max_w as f64 / src_w as f64;
    let ratio_h = max_h as f64 / src_h as f64;

    match fit {
        Fit::Inside | Fit::Contain => {
            let scale = ratio_w.min(ratio_h);
            if scale >= 1.0 {
                return None;
            }
            let (width, height) = scaled(source, scale);
            Some(ResizePlan {
                width,
                height,
                crop: None,
            })
        }
        Fit::Outside => {
            let scale = ratio_w.max(ratio_h);
            if scale >= 1.0 {
                return None;
            }
            let (width, height) = scaled(source, scale);
            Some(ResizePlan {
                width,
                height,
                crop: None,
            })
        }
        Fit::Cover => {
            let scale = ratio_w.max(ratio_h).min(1.0);
            let (width, height) = if scale < 1.0 {
                scaled(source, scale)
            } else {
                source
            };
            let crop = (max_w.min(width), max_h.min(height));
            if scale >= 1.0 && crop == source {
                return None;
            }
            Some(ResizePlan {
                width,
                height,
                crop: (crop != (width, height)).then_some(crop),
            })
        }
        Fit::Fill => {
            let target = (src_w.min(max_w), src_h.min(max_h));
            if target == source {
                return None;
            }
            Some(ResizePlan {
                width: target.0,
                height: target.1,
                crop: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: (u32, u32) = (2200, 2400);

    #[test]
    fn inside_shrinks_landscape_to_width() {
        let plan = plan_resize((4000, 3000), BOX, Fit::Inside).unwrap();
        assert_eq!((plan.width, plan.height), (2200, 1650));
        assert_eq!(plan.crop, None);
    }

    #[test]
    fn inside_shrinks_portrait_to_height() {
        let plan = plan_resize((3000, 6000), BOX, Fit::Inside).unwrap();
        assert_eq!((plan.width, plan.height), (1200, 2400));
    }

    #[test]
    fn small_image_is_never_enlarged() {
        for fit in [Fit::Inside, Fit::Outside, Fit::Cover, Fit::Contain, Fit::Fill] {
            assert_eq!(plan_resize((800, 600), BOX, fit), None, "{fit}");
        }
    }

    #[test]
    fn contain_scales_like_inside() {
        assert_eq!(
            plan_resize((4000, 3000), BOX, Fit::Contain),
            plan_resize((4000, 3000), BOX, Fit::Inside)
        );
    }

    #[test]
    fn outside_keeps_both_edges_at_least_box() {
        let plan = plan_resize((4000, 3000), BOX, Fit::Outside).unwrap();
        assert_eq!((plan.width, plan.height), (3200, 2400));
    }

    #[test]
    fn cover_scales_then_crops() {
        let plan = plan_resize((4000, 3000), BOX, Fit::Cover).unwrap();
        assert_eq!((plan.width, plan.height), (3200, 2400));
        assert_eq!(plan.crop, Some((2200, 2400)));
    }

    #[test]
    fn cover_crops_without_scaling_when_one_edge_is_small() {
        // Height already under the box: no scaling, width cropped to the box.
        let plan = plan_resize((5000, 1000), BOX, Fit::Cover).unwrap();
        assert_eq!((plan.width, plan.height), (5000, 1000));
        assert_eq!(plan.crop, Some((2200, 1000)));
    }

    #[test]
    fn fill_clamps_each_edge_independently() {
        let plan = plan_resize((4000, 1000), BOX, Fit::Fill).unwrap();
        assert_eq!((plan.width, plan.height), (2200, 1000));
    }

    #[test]
    fn degenerate_dimensions_are_left_alone() {
        assert_eq!(plan_resize((0, 100), BOX, Fit::Inside), None);
        assert_eq!(plan_resize((100, 100), (0, 10), Fit::Inside), None);
    }

    #[test]
    fn extreme_aspect_never_rounds_to_zero() {
        let plan = plan_resize((100_000, 10), BOX, Fit::Inside).unwrap();
        assert_eq!(plan.width, 2200);
        assert_eq!(plan.height, 1);
    }
}
