//! Spectrum features and the energy normalization pipeline
//!
//! One `SpectrumAnalyzer` per open stream turns a mono block into bass/mid
//! band sums and a spectral centroid. `EnergyPipeline` then runs the fixed
//! normalization chain: noise floor subtraction, auto-gain, noise gate, and
//! a two-speed attack/release smoother. All pipeline state is scoped to one
//! engine instance and reset together on full device re-acquisition.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Bass band bounds in Hz (rectangular bin accumulation)
const BASS_LOW_HZ: f32 = 20.0;
const BASS_HIGH_HZ: f32 = 150.0;

/// Mid band bounds in Hz
const MID_HIGH_HZ: f32 = 2000.0;

/// Raw spectral sums for one captured block
#[derive(Debug, Clone, Copy, Default)]
pub struct BandFeatures {
    pub bass: f32,
    pub mid: f32,
    pub centroid_hz: f32,
}

/// Forward-DFT band extractor, planned once per (sample_rate, block_size).
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    block_size: usize,
    sample_rate: u32,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(block_size);
        Self {
            fft,
            block_size,
            sample_rate,
            buffer: vec![Complex::new(0.0, 0.0); block_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Compute bass/mid sums and the magnitude-weighted centroid for one
    /// mono block. Returns zeros if the block is shorter than the DFT size.
    pub fn analyze(&mut self, mono: &[f32]) -> BandFeatures {
        if mono.len() < self.block_size {
            return BandFeatures::default();
        }

        for (slot, &sample) in self.buffer.iter_mut().zip(mono.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let half = self.block_size / 2;
        let hz_per_bin = self.sample_rate as f32 / self.block_size as f32;

        let mut bass = 0.0f32;
        let mut mid = 0.0f32;
        let mut mag_sum = 0.0f32;
        let mut weighted_hz = 0.0f32;

        for (i, c) in self.buffer.iter().take(half).enumerate() {
            let mag = c.norm();
            let freq = i as f32 * hz_per_bin;

            if (BASS_LOW_HZ..BASS_HIGH_HZ).contains(&freq) {
                bass += mag;
            } else if (BASS_HIGH_HZ..MID_HIGH_HZ).contains(&freq) {
                mid += mag;
            }

            mag_sum += mag;
            weighted_hz += mag * freq;
        }

        let centroid_hz = if mag_sum > 0.0 { weighted_hz / mag_sum } else { 0.0 };

        BandFeatures { bass, mid, centroid_hz }
    }
}

/// Adaptive noise floor: snaps down to any quieter frame immediately, blends
/// up fast while the signal sits near the floor and very slowly otherwise.
#[derive(Debug, Clone, Default)]
pub struct NoiseFloorEstimator {
    floor: f32,
}

impl NoiseFloorEstimator {
    /// Update the floor with this frame's raw energy and return the
    /// floor-subtracted energy (>= 0).
    pub fn update(&mut self, raw: f32) -> f32 {
        if raw < self.floor {
            self.floor = raw;
        } else {
            let k = if raw <= 1.3 * self.floor { 0.01 } else { 0.0005 };
            self.floor += k * (raw - self.floor);
        }
        (raw - 1.10 * self.floor).max(0.0)
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    pub fn reset(&mut self) {
        self.floor = 0.0;
    }
}

/// Decaying-peak auto-gain so quiet sources still reach the target level.
#[derive(Debug, Clone)]
pub struct AutoGain {
    peak: f32,
}

impl Default for AutoGain {
    fn default() -> Self {
        Self { peak: 1e-6 }
    }
}

impl AutoGain {
    /// Track the decaying peak and normalize toward `target`, clamped to
    /// `[0, hard_cap]`.
    pub fn normalize(&mut self, adjusted: f32, target: f32, hard_cap: f32) -> f32 {
        self.peak = (self.peak * 0.995).max(adjusted);
        (adjusted / self.peak.max(1e-6) * target).clamp(0.0, hard_cap)
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn reset(&mut self) {
        self.peak = 1e-6;
    }
}

/// Forces energy to exactly zero once it has stayed under the threshold for
/// longer than the hold window.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold: f32,
    hold_s: f32,
    below_for_s: f32,
}

impl NoiseGate {
    pub fn new(threshold: f32, hold_s: f32) -> Self {
        Self { threshold, hold_s, below_for_s: 0.0 }
    }

    /// Returns true when the gate is closed (energy must be reported as 0).
    pub fn update(&mut self, energy: f32, dt_s: f32) -> bool {
        if energy >= self.threshold {
            self.below_for_s = 0.0;
            false
        } else {
            self.below_for_s += dt_s;
            self.below_for_s > self.hold_s
        }
    }

    pub fn reset(&mut self) {
        self.below_for_s = 0.0;
    }
}

/// Two-speed exponential average: a fast attack constant while the input
/// exceeds the current value, a slower release otherwise. Constants are
/// converted per block from the actual block duration so behavior is
/// consistent across block sizes.
#[derive(Debug, Clone)]
pub struct TwoSpeedSmoother {
    attack_s: f32,
    release_s: f32,
    value: f32,
}

impl TwoSpeedSmoother {
    pub fn new(attack_ms: f32, release_ms: f32) -> Self {
        Self {
            attack_s: (attack_ms / 1000.0).max(1e-3),
            release_s: (release_ms / 1000.0).max(1e-3),
            value: 0.0,
        }
    }

    pub fn update(&mut self, x: f32, dt_s: f32) -> f32 {
        let tau = if x > self.value { self.attack_s } else { self.release_s };
        let alpha = 1.0 - (-dt_s / tau).exp();
        self.value += alpha * (x - self.value);
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// The full normalization chain, in the fixed order: weighted band mix,
/// noise floor, auto-gain, gate, smoothing.
pub struct EnergyPipeline {
    target_level: f32,
    hard_cap: f32,
    floor: NoiseFloorEstimator,
    gain: AutoGain,
    gate: NoiseGate,
    smoother: TwoSpeedSmoother,
}

impl EnergyPipeline {
    pub fn new(
        target_level: f32,
        hard_cap: f32,
        gate_threshold: f32,
        gate_hold_s: f32,
        attack_ms: f32,
        release_ms: f32,
    ) -> Self {
        Self {
            target_level,
            hard_cap,
            floor: NoiseFloorEstimator::default(),
            gain: AutoGain::default(),
            gate: NoiseGate::new(gate_threshold, gate_hold_s),
            smoother: TwoSpeedSmoother::new(attack_ms, release_ms),
        }
    }

    /// Run one block's bass/mid sums through the chain. `dt_s` is the block
    /// duration (samples / sample_rate).
    pub fn process(&mut self, bass: f32, mid: f32, dt_s: f32) -> f32 {
        let raw = 0.7 * bass + 0.3 * mid;
        let adjusted = self.floor.update(raw);
        let normalized = self.gain.normalize(adjusted, self.target_level, self.hard_cap);

        if self.gate.update(normalized, dt_s) {
            // Gate closed: snap the reported energy (and the smoother tail)
            // to exactly zero.
            self.smoother.reset();
            return 0.0;
        }

        self.smoother
            .update(normalized, dt_s)
            .clamp(0.0, self.hard_cap)
    }

    /// Reset every stage together; called on full device re-acquisition.
    pub fn reset(&mut self) {
        self.floor.reset();
        self.gain.reset();
        self.gate.reset();
        self.smoother.reset();
    }
}

/// Mix interleaved frames down to mono.
pub fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Root-mean-square of a sample block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
