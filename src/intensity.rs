//! Audio intensity engine: turns raw capture volume into a smoothed,
//! auto-gained, outlier-filtered intensity scalar plus derived multipliers.
//!
//! The engine is session-scoped state: enabling resets every window and
//! starts a short linear ramp so dependent effects never jump, disabling
//! drops it all. Thresholds here are product-tuning presets, not derived
//! values; they live in `IntensityTuning` so they stay replaceable.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const SHORT_WINDOW: usize = 8;
const MEDIUM_WINDOW: usize = 30;
const LONG_WINDOW: usize = 90;
const OUTLIER_WINDOW: usize = 120;
const OUTLIER_PERCENTILE: f32 = 0.90;
const OUTLIER_RECALC_TICKS: u32 = 15;
const GAIN_RECALC_TICKS: u32 = 30;

const SPIKE_RATIOS: [f32; 3] = [1.3, 1.4, 1.5];
const SPIKE_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];
const SPIKE_FLAG_FLOOR: f32 = 0.05;

/// Tunable presets. Defaults mirror the values the visuals were dialed in
/// against; none of them is derived from a model.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct IntensityTuning {
    pub threshold: f32,
    pub range: f32,
    pub target_level: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub ramp_secs: f32,
    pub smoothing_rate: f32,
    pub spike_attack: f32,
    pub spike_release: f32,
    pub spike_weight: f32,
    pub outlier_multiplier: f32,
    pub outlier_recovery_secs: f32,
    pub tier_thresholds: [f32; 3],
    pub size_floor: f32,
    pub size_boost: f32,
    pub velocity_boost: f32,
}

impl Default for IntensityTuning {
    fn default() -> Self {
        Self {
            threshold: 0.06,
            range: 0.5,
            target_level: 0.35,
            min_gain: 0.5,
            max_gain: 4.0,
            ramp_secs: 2.0,
            smoothing_rate: 6.0,
            spike_attack: 12.0,
            spike_release: 2.5,
            spike_weight: 0.55,
            outlier_multiplier: 2.5,
            outlier_recovery_secs: 0.8,
            tier_thresholds: [0.38, 0.47, 0.57],
            size_floor: 0.15,
            size_boost: 0.9,
            velocity_boost: 0.6,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EngineState {
    Disabled,
    Ramping,
    Steady,
}

/// Bounded rolling-average window with an incrementally maintained sum.
struct RollingWindow {
    values: VecDeque<f32>,
    cap: usize,
    sum: f32,
}

impl RollingWindow {
    fn new(cap: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(cap),
            cap,
            sum: 0.0,
        }
    }

    fn push(&mut self, v: f32) {
        if self.values.len() >= self.cap {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(v);
        self.sum += v;
    }

    fn avg(&self) -> f32 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f32
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

pub struct IntensityEngine {
    tuning: IntensityTuning,
    enabled: bool,
    elapsed: f32,

    gain: f32,
    gain_window: RollingWindow,
    ticks_since_gain: u32,

    smoothed_base: f32,
    spike_env: f32,
    last_spike: bool,

    short: RollingWindow,
    medium: RollingWindow,
    long: RollingWindow,

    outlier_window: VecDeque<f32>,
    outlier_baseline: f32,
    ticks_since_baseline: u32,
    suppress_remaining: f32,

    total: f32,
}

impl IntensityEngine {
    pub fn new(tuning: IntensityTuning) -> Self {
        Self {
            tuning,
            enabled: false,
            elapsed: 0.0,
            gain: 1.0,
            gain_window: RollingWindow::new(OUTLIER_WINDOW),
            ticks_since_gain: 0,
            smoothed_base: 0.0,
            spike_env: 0.0,
            last_spike: false,
            short: RollingWindow::new(SHORT_WINDOW),
            medium: RollingWindow::new(MEDIUM_WINDOW),
            long: RollingWindow::new(LONG_WINDOW),
            outlier_window: VecDeque::with_capacity(OUTLIER_WINDOW),
            outlier_baseline: 0.0,
            ticks_since_baseline: 0,
            suppress_remaining: 0.0,
            total: 0.0,
        }
    }

    pub fn set_tuning(&mut self, tuning: IntensityTuning) {
        self.tuning = tuning;
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            self.reset();
            self.enabled = true;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.reset();
    }

    pub fn state(&self) -> EngineState {
        if !self.enabled {
            EngineState::Disabled
        } else if self.elapsed < self.tuning.ramp_secs {
            EngineState::Ramping
        } else {
            EngineState::Steady
        }
    }

    fn reset(&mut self) {
        self.elapsed = 0.0;
        self.gain = 1.0;
        self.gain_window.clear();
        self.ticks_since_gain = 0;
        self.smoothed_base = 0.0;
        self.spike_env = 0.0;
        self.last_spike = false;
        self.short.clear();
        self.medium.clear();
        self.long.clear();
        self.outlier_window.clear();
        self.outlier_baseline = 0.0;
        self.ticks_since_baseline = 0;
        self.suppress_remaining = 0.0;
        self.total = 0.0;
    }

    /// Advances the engine by one frame of raw analyzer volume. Returns the
    /// combined intensity in [0, 1].
    pub fn tick(&mut self, raw_volume: f32, dt: f32) -> f32 {
        if !self.enabled {
            return 0.0;
        }
        let raw_volume = if raw_volume.is_finite() {
            raw_volume.max(0.0)
        } else {
            0.0
        };
        self.elapsed += dt;
        self.suppress_remaining = (self.suppress_remaining - dt).max(0.0);

        // Auto-gain: nudge the multiplier toward target/average on a fixed
        // cadence, never every frame.
        self.gain_window.push(raw_volume);
        self.ticks_since_gain += 1;
        if self.ticks_since_gain >= GAIN_RECALC_TICKS {
            self.ticks_since_gain = 0;
            let avg = self.gain_window.avg();
            if avg > 1e-3 {
                let target_gain = (self.tuning.target_level / avg)
                    .clamp(self.tuning.min_gain, self.tuning.max_gain);
                self.gain += (target_gain - self.gain) * 0.2;
            }
        }
        let gained = (raw_volume * self.gain).clamp(0.0, 1.5);

        // Base intensity: thresholded, ramped, exponentially smoothed.
        let ramp = (self.elapsed / self.tuning.ramp_secs.max(0.01)).clamp(0.0, 1.0);
        let base =
            ((gained - self.tuning.threshold) / self.tuning.range.max(0.01)).clamp(0.0, 1.0) * ramp;
        let blend = 1.0 - (-self.tuning.smoothing_rate * dt).exp();
        self.smoothed_base += (base - self.smoothed_base) * blend;

        // Spike detection, outlier test first.
        self.update_outlier_baseline(raw_volume);
        let is_outlier = self.outlier_baseline > 0.02
            && raw_volume > self.outlier_baseline * self.tuning.outlier_multiplier;
        if is_outlier {
            self.suppress_remaining = self.tuning.outlier_recovery_secs;
        }

        let strength = if is_outlier || self.suppress_remaining > 0.0 {
            0.0
        } else {
            self.spike_strength(raw_volume)
        };
        self.last_spike = strength > SPIKE_FLAG_FLOOR;

        // Windows always see the sample, outlier or not, so the baselines
        // recover naturally.
        self.short.push(raw_volume);
        self.medium.push(raw_volume);
        self.long.push(raw_volume);

        // Attack/release envelope on the spike.
        let rate = if strength > self.spike_env {
            self.tuning.spike_attack
        } else {
            self.tuning.spike_release
        };
        let env_blend = 1.0 - (-rate * dt).exp();
        self.spike_env += (strength - self.spike_env) * env_blend;

        self.total =
            (self.smoothed_base + self.spike_env * self.tuning.spike_weight).clamp(0.0, 1.0);
        self.total
    }

    fn update_outlier_baseline(&mut self, raw_volume: f32) {
        if self.outlier_window.len() >= OUTLIER_WINDOW {
            self.outlier_window.pop_front();
        }
        self.outlier_window.push_back(raw_volume);

        self.ticks_since_baseline += 1;
        if self.ticks_since_baseline >= OUTLIER_RECALC_TICKS || self.outlier_baseline == 0.0 {
            self.ticks_since_baseline = 0;
            if self.outlier_window.len() >= SHORT_WINDOW {
                let mut sorted: Vec<f32> = self.outlier_window.iter().copied().collect();
                sorted.sort_unstable_by(f32::total_cmp);
                let idx = ((sorted.len() - 1) as f32 * OUTLIER_PERCENTILE) as usize;
                self.outlier_baseline = sorted[idx];
            }
        }
    }

    /// Weighted excess-over-window-average score; short window dominates.
    fn spike_strength(&self, v: f32) -> f32 {
        let mut strength = 0.0;
        for (i, window) in [&self.short, &self.medium, &self.long].into_iter().enumerate() {
            if window.len() < window.cap / 2 {
                continue;
            }
            let avg = window.avg();
            if avg > 1e-3 {
                strength += SPIKE_WEIGHTS[i] * (v / avg - SPIKE_RATIOS[i]).clamp(0.0, 1.0);
            }
        }
        strength
    }

    pub fn intensity(&self) -> f32 {
        self.total
    }

    pub fn spike_detected(&self) -> bool {
        self.last_spike
    }

    /// Size multiplier grows super-linearly above a low intensity floor so
    /// loud passages read as dramatic pulses.
    pub fn size_multiplier(&self) -> f32 {
        let t = &self.tuning;
        let excess = ((self.total - t.size_floor) / (1.0 - t.size_floor).max(0.01)).max(0.0);
        1.0 + excess.powf(1.6) * t.size_boost
    }

    /// Velocity multiplier is linear and mild.
    pub fn velocity_multiplier(&self) -> f32 {
        1.0 + self.total * self.tuning.velocity_boost
    }

    /// Discrete magnetic-inversion tier from total intensity. Thresholds
    /// are ascending, so the mapping is monotone and covers [0, 1].
    pub fn magnetic_tier(&self) -> u8 {
        tier_for(self.total, &self.tuning.tier_thresholds)
    }
}

pub fn tier_for(intensity: f32, thresholds: &[f32; 3]) -> u8 {
    if intensity >= thresholds[2] {
        3
    } else if intensity >= thresholds[1] {
        2
    } else if intensity >= thresholds[0] {
        1
    } else {
        0
    }
}
