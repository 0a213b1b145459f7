//! # 采样因子计算
//!
//! 以"宁大勿小"为原则：选取的因子保证解码结果在约束轴上不小于请求尺寸
//! （允许不超过半个采样步长的舍入误差），且绝不放大。

use super::source::{ImageBounds, SampleFactor, TargetSize};

/// 根据原始尺寸与目标尺寸计算采样因子。
///
/// - 原图宽高均不超过目标：因子为 1。
/// - 否则分别计算 `round(native / requested)`（四舍五入，远离零），取两者较小值；
///   结果小于 1 时按 1 处理。
///
/// 目标尺寸为 `NonZeroU32`，调用前必须先用 [`DecodeRequest::resolve_target`]
/// 把 0 解析为原始尺寸。
///
/// [`DecodeRequest::resolve_target`]: super::source::DecodeRequest::resolve_target
///
/// # 示例
/// ```rust
/// use remote_bitmap::image_handler::{compute_sample_factor, ImageBounds, TargetSize};
///
/// let target = TargetSize::new(800, 600).expect("non-zero");
/// let factor = compute_sample_factor(ImageBounds::new(4000, 3000), target);
/// assert_eq!(factor.get(), 5);
/// ```
pub fn compute_sample_factor(bounds: ImageBounds, target: TargetSize) -> SampleFactor {
    let req_width = target.width.get();
    let req_height = target.height.get();

    if bounds.native_height <= req_height && bounds.native_width <= req_width {
        return SampleFactor::ONE;
    }

    let height_ratio = rounded_ratio(bounds.native_height, req_height);
    let width_ratio = rounded_ratio(bounds.native_width, req_width);

    SampleFactor::new(height_ratio.min(width_ratio))
}

fn rounded_ratio(native: u32, requested: u32) -> u32 {
    // f64::round 即远离零舍入；u32 / u32 的商不会超出 u32 范围
    (native as f64 / requested as f64).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn target(width: u32, height: u32) -> TargetSize {
        TargetSize::new(width, height).expect("non-zero target")
    }

    #[test]
    fn large_photo_samples_by_five() {
        let factor = compute_sample_factor(ImageBounds::new(4000, 3000), target(800, 600));

        assert_eq!(factor.get(), 5);
        assert_eq!(factor.apply(4000), 800);
        assert_eq!(factor.apply(3000), 600);
    }

    #[test]
    fn small_image_is_never_upsampled() {
        let factor = compute_sample_factor(ImageBounds::new(300, 300), target(800, 600));

        assert_eq!(factor, SampleFactor::ONE);
    }

    #[test]
    fn half_ratio_rounds_away_from_zero() {
        // 2500 / 1000 = 2.5 -> 3，1500 / 500 = 3.0 -> 3
        let factor = compute_sample_factor(ImageBounds::new(1500, 2500), target(500, 1000));
        assert_eq!(factor.get(), 3);
    }

    #[test]
    fn smaller_ratio_wins() {
        // 宽比 10，高比 2：取 2，保证高度方向不小于请求
        let factor = compute_sample_factor(ImageBounds::new(2000, 400), target(200, 200));
        assert_eq!(factor.get(), 2);
    }

    #[test]
    fn ratio_rounding_to_zero_is_clamped() {
        let factor = compute_sample_factor(ImageBounds::new(1000, 10), target(100, 100));
        assert_eq!(factor, SampleFactor::ONE);
    }

    proptest! {
        #[test]
        fn fits_within_request_implies_no_sampling(
            native_w in 1_u32..5_000,
            native_h in 1_u32..5_000,
            extra_w in 0_u32..5_000,
            extra_h in 0_u32..5_000,
        ) {
            let factor = compute_sample_factor(
                ImageBounds::new(native_w, native_h),
                target(native_w + extra_w, native_h + extra_h),
            );
            prop_assert_eq!(factor, SampleFactor::ONE);
        }

        #[test]
        fn sampling_implies_an_axis_exceeds_request(
            native_w in 1_u32..20_000,
            native_h in 1_u32..20_000,
            req_w in 1_u32..4_000,
            req_h in 1_u32..4_000,
        ) {
            let factor = compute_sample_factor(ImageBounds::new(native_w, native_h), target(req_w, req_h));
            if factor.get() > 1 {
                prop_assert!(native_w > req_w || native_h > req_h);
            }
        }

        #[test]
        fn sampled_axes_stay_within_half_a_step_of_request(
            native_w in 1_u32..20_000,
            native_h in 1_u32..20_000,
            req_w in 1_u32..4_000,
            req_h in 1_u32..4_000,
        ) {
            let factor = compute_sample_factor(ImageBounds::new(native_w, native_h), target(req_w, req_h));
            let f = factor.get() as u64;

            for (native, requested) in [(native_w, req_w), (native_h, req_h)] {
                if rounded_ratio(native, requested) == 0 {
                    continue;
                }
                let out = factor.apply(native) as u64;
                // out >= requested - requested / (2f)
                prop_assert!(2 * f * out >= (2 * f - 1) * requested as u64);
            }
        }
    }
}
