//! Frame-to-color reduction with weighted spatial bias
//!
//! Downscales a frame to a small grid, crops letterbox bands, and computes
//! a saturation-weighted mean that favors vivid, darker tones so the output
//! reads as ambient mood rather than a washed-out average. Optionally
//! decomposes the grid into vertical regions and derives a
//! hysteresis-stabilized direction hint from the dominant one.

use super::RawFrame;
use crate::color::{hsv_to_rgb, rgb_to_hsv, ColorSample};
use crate::config::ScreenConfig;

/// Pixels brighter than this are treated as blown-out and excluded.
const MASK_V_MAX: f32 = 0.92;

/// Pixels less saturated than this are treated as near-gray and excluded.
const MASK_S_MIN: f32 = 0.08;

/// The rescue pass admits fully saturated pixels regardless of value, so a
/// pure-primary frame is not replaced by a stale color.
const RESCUE_S_MIN: f32 = 0.90;

/// Frames a new dominant region must persist before it moves the
/// direction hint.
const DOMINANT_STABLE_FRAMES: u32 = 3;

/// Neutral direction hint (no spatial bias).
const DIRECTION_NEUTRAL: u8 = 128;

/// One horizontal band of the region breakdown. `color` is None when the
/// band had zero valid weight.
#[derive(Debug, Clone)]
pub struct RegionColor {
    pub color: Option<ColorSample>,
    pub weight: f32,
}

/// Full output of a spatial-bias sample.
#[derive(Debug, Clone)]
pub struct ScreenSample {
    pub color: ColorSample,
    pub regions: Vec<RegionColor>,
    pub dominant: Option<usize>,
    pub direction_hint: u8,
}

struct Px {
    r: f32,
    g: f32,
    b: f32,
    s: f32,
    v: f32,
}

struct Reduced {
    pixels: Vec<Px>,
    columns: usize,
    mean_v: f32,
}

/// The sampler. Holds the smoothed color and the dominant-region
/// hysteresis state.
pub struct ScreenColorSampler {
    cfg: ScreenConfig,
    ema_alpha: f32,
    last_color: ColorSample,
    last_dominant: Option<usize>,
    dominant_streak: u32,
    stable_dominant: Option<usize>,
}

impl ScreenColorSampler {
    pub fn new(cfg: ScreenConfig) -> Self {
        // Per-call coefficient assumes the ~25 Hz sampling cadence.
        let frame_ms = 40.0;
        let ema_alpha = 1.0 - (-frame_ms / cfg.ema_ms.max(1e-3)).exp();
        Self {
            cfg,
            ema_alpha,
            last_color: ColorSample::default(),
            last_dominant: None,
            dominant_streak: 0,
            stable_dominant: None,
        }
    }

    pub fn last_color(&self) -> ColorSample {
        self.last_color
    }

    /// Reduce a frame to the smoothed mood color. A missing frame, or one
    /// with no valid pixels, returns the previous smoothed color unchanged.
    pub fn sample(&mut self, frame: Option<&RawFrame>) -> ColorSample {
        let Some(reduced) = frame.and_then(|f| self.reduce(f)) else {
            return self.last_color;
        };
        let Some((mean, _)) = weighted_mean(reduced.pixels.iter()) else {
            return self.last_color;
        };
        self.finish(mean, reduced.mean_v)
    }

    /// Like [`sample`](Self::sample), plus the per-region breakdown, the
    /// dominant-region blend, and the direction hint.
    pub fn sample_regions(&mut self, frame: Option<&RawFrame>, regions: usize) -> ScreenSample {
        let regions = regions.max(1);

        let Some(reduced) = frame.and_then(|f| self.reduce(f)) else {
            return self.hold_sample(regions);
        };

        let region_samples = region_means(&reduced, regions);

        let dominant = region_samples
            .iter()
            .enumerate()
            .filter(|(_, r)| r.weight > 0.0)
            .max_by(|a, b| a.1.weight.total_cmp(&b.1.weight))
            .map(|(i, _)| i);

        let direction_hint = self.update_direction(dominant, regions);

        let Some((mean, _)) = weighted_mean(reduced.pixels.iter()) else {
            return ScreenSample {
                color: self.last_color,
                regions: region_samples,
                dominant,
                direction_hint,
            };
        };

        // Bias toward the dominant region's own color before smoothing.
        let biased = match dominant.and_then(|i| region_samples[i].color) {
            Some(dom_color) => mean.blend(dom_color, self.cfg.spatial_bias_blend),
            None => mean,
        };

        ScreenSample {
            color: self.finish(biased, reduced.mean_v),
            regions: region_samples,
            dominant,
            direction_hint,
        }
    }

    /// Fallback sample when no frame is available: previous color, empty
    /// weights, direction per the last stable dominant.
    fn hold_sample(&self, regions: usize) -> ScreenSample {
        let direction_hint = self
            .stable_dominant
            .map(|i| direction_for_region(i, regions))
            .unwrap_or(DIRECTION_NEUTRAL);
        ScreenSample {
            color: self.last_color,
            regions: (0..regions)
                .map(|_| RegionColor { color: None, weight: 0.0 })
                .collect(),
            dominant: None,
            direction_hint,
        }
    }

    /// 3-frame hysteresis: the hint follows the current dominant until a
    /// stable one exists, then only a 3-frame streak may move it.
    fn update_direction(&mut self, dominant: Option<usize>, regions: usize) -> u8 {
        if let Some(idx) = dominant {
            if self.last_dominant == Some(idx) {
                self.dominant_streak += 1;
            } else {
                self.last_dominant = Some(idx);
                self.dominant_streak = 1;
            }
            if self.dominant_streak >= DOMINANT_STABLE_FRAMES {
                self.stable_dominant = Some(idx);
            }
            let use_idx = self.stable_dominant.unwrap_or(idx);
            direction_for_region(use_idx, regions)
        } else {
            self.stable_dominant
                .map(|i| direction_for_region(i, regions))
                .unwrap_or(DIRECTION_NEUTRAL)
        }
    }

    /// Dark boost, fixed desaturation, then the exponential smoother.
    fn finish(&mut self, color: ColorSample, scene_mean_v: f32) -> ColorSample {
        let mut color = color;

        if self.cfg.enable_dark_boost && scene_mean_v < self.cfg.dark_boost_v_thresh {
            color = scale_sv(color, 1.0 + self.cfg.dark_boost_strength);
        }

        color = desaturate(color, self.cfg.desat_amount);

        self.last_color = ColorSample::new(
            self.ema_alpha * color.r + (1.0 - self.ema_alpha) * self.last_color.r,
            self.ema_alpha * color.g + (1.0 - self.ema_alpha) * self.last_color.g,
            self.ema_alpha * color.b + (1.0 - self.ema_alpha) * self.last_color.b,
        );
        self.last_color
    }

    /// Downscale to the configured grid, crop the letterbox bands, and
    /// precompute per-pixel saturation/value. None if nothing survives the
    /// crop.
    fn reduce(&self, frame: &RawFrame) -> Option<Reduced> {
        let gw = self.cfg.downscale_width.max(1);
        let gh = self.cfg.downscale_height.max(1);

        let top = (gh as f32 * self.cfg.crop_top) as usize;
        let bottom = (gh as f32 * (1.0 - self.cfg.crop_bottom)) as usize;
        if bottom <= top {
            return None;
        }

        let mut pixels = Vec::with_capacity((bottom - top) * gw);
        let mut v_sum = 0.0f32;

        for gy in top..bottom {
            let y0 = gy * frame.height / gh;
            let y1 = ((gy + 1) * frame.height / gh).max(y0 + 1).min(frame.height);
            for gx in 0..gw {
                let x0 = gx * frame.width / gw;
                let x1 = ((gx + 1) * frame.width / gw).max(x0 + 1).min(frame.width);

                let mut sum = [0.0f32; 3];
                for y in y0..y1 {
                    for x in x0..x1 {
                        let rgb = frame.rgb_at(x, y);
                        sum[0] += rgb[0] as f32;
                        sum[1] += rgb[1] as f32;
                        sum[2] += rgb[2] as f32;
                    }
                }
                let n = ((x1 - x0) * (y1 - y0)) as f32;
                let (r, g, b) = (sum[0] / n, sum[1] / n, sum[2] / n);
                let (_, s, v) = rgb_to_hsv(r / 255.0, g / 255.0, b / 255.0);
                v_sum += v;
                pixels.push(Px { r, g, b, s, v });
            }
        }

        let mean_v = v_sum / pixels.len() as f32;
        Some(Reduced { pixels, columns: gw, mean_v })
    }
}

/// Weighted mean color of a pixel set: the primary mask keeps
/// `V <= 0.92 && S >= 0.08` with weight `S * (1-V)^1.5`; if nothing
/// survives, the rescue pass admits `S >= 0.90` pixels weighted by `S`
/// alone. Returns None (zero weight) only when both passes are empty.
fn weighted_mean<'a, I>(pixels: I) -> Option<(ColorSample, f32)>
where
    I: Iterator<Item = &'a Px> + Clone,
{
    let primary = accumulate(pixels.clone(), |p| {
        (p.v <= MASK_V_MAX && p.s >= MASK_S_MIN).then(|| p.s * (1.0 - p.v).powf(1.5))
    });
    if primary.is_some() {
        return primary;
    }
    accumulate(pixels, |p| (p.s >= RESCUE_S_MIN).then_some(p.s))
}

fn accumulate<'a, I, F>(pixels: I, weight_of: F) -> Option<(ColorSample, f32)>
where
    I: Iterator<Item = &'a Px>,
    F: Fn(&Px) -> Option<f32>,
{
    let mut sum = [0.0f32; 3];
    let mut total = 0.0f32;
    for p in pixels {
        if let Some(w) = weight_of(p) {
            sum[0] += w * p.r;
            sum[1] += w * p.g;
            sum[2] += w * p.b;
            total += w;
        }
    }
    (total > 0.0).then(|| {
        (
            ColorSample::new(sum[0] / total, sum[1] / total, sum[2] / total),
            total,
        )
    })
}

/// Per-region weighted means over vertical strips of the grid.
fn region_means(reduced: &Reduced, regions: usize) -> Vec<RegionColor> {
    (0..regions)
        .map(|region| {
            let members = reduced.pixels.iter().enumerate().filter_map(|(i, p)| {
                let col = i % reduced.columns;
                ((col * regions / reduced.columns).min(regions - 1) == region).then_some(p)
            });
            match weighted_mean(members) {
                Some((color, weight)) => RegionColor { color: Some(color), weight },
                None => RegionColor { color: None, weight: 0.0 },
            }
        })
        .collect()
}

/// Map a region index to the direction hint byte: left 32, center 128,
/// right 224, interpolated for other region counts.
fn direction_for_region(idx: usize, regions: usize) -> u8 {
    if regions < 2 {
        return DIRECTION_NEUTRAL;
    }
    let span = 224.0 - 32.0;
    let t = idx.min(regions - 1) as f32 / (regions - 1) as f32;
    (32.0 + span * t).round() as u8
}

/// Reduce saturation by a fixed fraction.
fn desaturate(color: ColorSample, amount: f32) -> ColorSample {
    if amount <= 0.0 {
        return color;
    }
    let (h, s, v) = rgb_to_hsv(color.r / 255.0, color.g / 255.0, color.b / 255.0);
    let (r, g, b) = hsv_to_rgb(h, s * (1.0 - amount), v);
    ColorSample::new(r * 255.0, g * 255.0, b * 255.0)
}

/// Scale saturation and value together (dark-scene boost).
fn scale_sv(color: ColorSample, factor: f32) -> ColorSample {
    let (h, s, v) = rgb_to_hsv(color.r / 255.0, color.g / 255.0, color.b / 255.0);
    let (r, g, b) = hsv_to_rgb(h, (s * factor).min(1.0), (v * factor).min(1.0));
    ColorSample::new(r * 255.0, g * 255.0, b * 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::RawFrame;
    use rand::{Rng, RngExt, SeedableRng};

    fn test_cfg() -> ScreenConfig {
        ScreenConfig {
            crop_top: 0.0,
            crop_bottom: 0.0,
            // alpha ~= 1, effectively no smoothing, so assertions are stable
            ema_ms: 1.0,
            desat_amount: 0.0,
            enable_dark_boost: false,
            ..ScreenConfig::default()
        }
    }

    fn solid_frame(rgb: [u8; 3], w: usize, h: usize) -> RawFrame {
        let pixels = std::iter::repeat(rgb).take(w * h).flatten().collect();
        RawFrame::new(w, h, pixels).unwrap()
    }

    fn split_frame(left: [u8; 3], center: [u8; 3], right: [u8; 3], w: usize, h: usize) -> RawFrame {
        let mut pixels = Vec::with_capacity(w * h * 3);
        for _ in 0..h {
            for x in 0..w {
                let rgb = if x < w / 3 {
                    left
                } else if x < 2 * w / 3 {
                    center
                } else {
                    right
                };
                pixels.extend_from_slice(&rgb);
            }
        }
        RawFrame::new(w, h, pixels).unwrap()
    }

    fn assert_rgb_close(c: ColorSample, expected: [f32; 3], tol: f32) {
        assert!(
            (c.r - expected[0]).abs() <= tol
                && (c.g - expected[1]).abs() <= tol
                && (c.b - expected[2]).abs() <= tol,
            "expected ~{expected:?}, got {c:?}"
        );
    }

    #[test]
    fn mid_saturated_color_passes_through() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        let out = sampler.sample(Some(&solid_frame([0, 128, 0], 64, 36)));
        assert_rgb_close(out, [0.0, 128.0, 0.0], 2.0);
    }

    #[test]
    fn bright_saturated_primaries_do_not_get_stuck() {
        // Pure bright colors are excluded by the V mask; the rescue pass
        // must still let them through.
        for rgb in [[255u8, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]] {
            let mut sampler = ScreenColorSampler::new(test_cfg());
            let out = sampler.sample(Some(&solid_frame(rgb, 64, 36)));
            assert_rgb_close(out, [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32], 2.0);
        }
    }

    #[test]
    fn low_saturation_white_reuses_last_color_unchanged() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        sampler.last_color = ColorSample::new(10.0, 20.0, 30.0);

        let out = sampler.sample(Some(&solid_frame([255, 255, 255], 64, 36)));
        assert_eq!(out, ColorSample::new(10.0, 20.0, 30.0));
    }

    #[test]
    fn missing_frame_reuses_last_color_unchanged() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        sampler.last_color = ColorSample::new(1.0, 2.0, 3.0);
        assert_eq!(sampler.sample(None), ColorSample::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn split_frame_reports_left_region_dominant() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        let frame = split_frame([0, 128, 0], [0, 0, 0], [255, 255, 255], 64, 36);

        for _ in 0..3 {
            let sample = sampler.sample_regions(Some(&frame), 3);
            assert_eq!(sample.dominant, Some(0));
            assert_eq!(sample.regions.len(), 3);
            assert!(sample.regions[0].weight > sample.regions[1].weight);
            assert!(sample.regions[0].weight > sample.regions[2].weight);
            assert_eq!(sample.direction_hint, 32);
        }

        // The dominant region's color is the saturated green
        let sample = sampler.sample_regions(Some(&frame), 3);
        let left = sample.regions[0].color.unwrap();
        assert_rgb_close(left, [0.0, 128.0, 0.0], 10.0);
    }

    #[test]
    fn zero_weight_regions_report_no_color() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        let frame = split_frame([0, 128, 0], [0, 0, 0], [0, 0, 0], 64, 36);
        let sample = sampler.sample_regions(Some(&frame), 3);

        assert!(sample.regions[0].color.is_some());
        assert!(sample.regions[1].color.is_none());
        assert_eq!(sample.regions[1].weight, 0.0);
        assert!(sample.regions[2].color.is_none());
    }

    #[test]
    fn direction_changes_only_after_three_stable_frames() {
        let mut sampler = ScreenColorSampler::new(test_cfg());
        let left_frame = split_frame([0, 128, 0], [0, 0, 0], [0, 0, 0], 64, 36);
        let right_frame = split_frame([0, 0, 0], [0, 0, 0], [128, 0, 0], 64, 36);

        for _ in 0..3 {
            sampler.sample_regions(Some(&left_frame), 3);
        }
        assert_eq!(sampler.stable_dominant, Some(0));

        // Two frames of a new dominant: hint sticks with the stable region
        let s1 = sampler.sample_regions(Some(&right_frame), 3);
        assert_eq!(s1.direction_hint, 32);
        let s2 = sampler.sample_regions(Some(&right_frame), 3);
        assert_eq!(s2.direction_hint, 32);

        // Third frame flips it
        let s3 = sampler.sample_regions(Some(&right_frame), 3);
        assert_eq!(s3.direction_hint, 224);
    }

    #[test]
    fn desaturation_pulls_toward_gray() {
        let mut cfg = test_cfg();
        cfg.desat_amount = 0.12;
        let mut sampler = ScreenColorSampler::new(cfg);

        let out = sampler.sample(Some(&solid_frame([0, 128, 0], 64, 36)));
        // Value is preserved, saturation drops: red/blue rise off zero
        assert!((out.g - 128.0).abs() < 2.0, "got {out:?}");
        assert!(out.r > 10.0 && out.b > 10.0, "got {out:?}");
    }

    #[test]
    fn dark_boost_raises_value_on_dark_scenes() {
        let dark = solid_frame([40, 12, 8], 64, 36);

        let mut plain = ScreenColorSampler::new(test_cfg());
        let base = plain.sample(Some(&dark));

        let mut cfg = test_cfg();
        cfg.enable_dark_boost = true;
        let mut boosted = ScreenColorSampler::new(cfg);
        let out = boosted.sample(Some(&dark));

        assert!(out.r > base.r, "boost should raise the dominant channel: {out:?} vs {base:?}");
    }

    #[test]
    fn random_frames_never_nan_and_in_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(123);
        let mut sampler = ScreenColorSampler::new(test_cfg());

        for _ in 0..200 {
            let pixels: Vec<u8> = (0..64 * 36 * 3).map(|_| rng.random_range(0..=255)).collect();
            let frame = RawFrame::new(64, 36, pixels).unwrap();
            let out = sampler.sample(Some(&frame));

            assert!(out.is_finite());
            assert!(out.r >= 0.0 && out.r <= 255.0);
            assert!(out.g >= 0.0 && out.g <= 255.0);
            assert!(out.b >= 0.0 && out.b <= 255.0);
        }
    }

    #[test]
    fn smoothing_tracks_toward_new_color() {
        let mut cfg = test_cfg();
        cfg.ema_ms = 600.0;
        let mut sampler = ScreenColorSampler::new(cfg);
        sampler.last_color = ColorSample::new(0.0, 0.0, 0.0);

        let out = sampler.sample(Some(&solid_frame([0, 128, 0], 64, 36)));
        // One step of a 600ms EMA at 25Hz moves only a fraction of the way
        assert!(out.g > 0.0 && out.g < 64.0, "got {out:?}");
    }
}
