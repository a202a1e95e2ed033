//! Audio effects coordinator: folds intensity-engine output into one
//! per-frame effects context consumed by physics and rendering.
//!
//! The context is an explicit struct passed by reference down the frame,
//! not ambient shared fields; the coordinator is its single writer.

use crate::audio::AudioLevels;
use crate::intensity::IntensityEngine;
use egui::Color32;

/// Seconds a magnetic-inversion tier stays active before auto-expiring.
const TIER_DURATION_SECS: f32 = 4.0;

/// Minimum seconds between tier transitions.
const TIER_COOLDOWN_SECS: f32 = 1.5;

/// Seconds the beat repulsion pulse takes to die out.
const BEAT_PULSE_DECAY: f32 = 3.5;

/// Per-tier (similarity-tolerance widening, force power multiplier).
/// Tier 0 is the identity pair.
const TIER_TABLE: [(f32, f32); 4] = [(0.0, 1.0), (0.15, 1.3), (0.25, 1.7), (0.40, 2.2)];

/// Magnetic-inversion state for one tier level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MagneticTier {
    pub level: u8,
    pub tolerance_boost: f32,
    pub power_mult: f32,
}

impl MagneticTier {
    pub fn inactive() -> Self {
        Self::from_level(0)
    }

    pub fn from_level(level: u8) -> Self {
        let level = level.min(3);
        let (tolerance_boost, power_mult) = TIER_TABLE[level as usize];
        Self {
            level,
            tolerance_boost,
            power_mult,
        }
    }

    pub fn is_active(&self) -> bool {
        self.level > 0
    }
}

/// Everything audio contributes to one frame. Single writer per frame
/// (the coordinator); physics and rendering read it by reference.
#[derive(Clone, Copy, Debug)]
pub struct EffectsContext {
    pub size_mult: f32,
    pub velocity_mult: f32,
    pub intensity: f32,
    pub tier: MagneticTier,
    /// 1.0 right on a beat, decaying toward 0; drives the center repulsion
    /// pulse when full magnetism is off.
    pub beat_pulse: f32,
    /// Frame color override for particles while audio color effects run.
    pub audio_color: Option<Color32>,
}

impl Default for EffectsContext {
    fn default() -> Self {
        Self {
            size_mult: 1.0,
            velocity_mult: 1.0,
            intensity: 0.0,
            tier: MagneticTier::inactive(),
            beat_pulse: 0.0,
            audio_color: None,
        }
    }
}

pub struct AudioEffects {
    active_level: u8,
    tier_age: f32,
    since_transition: f32,
    beat_pulse: f32,
}

impl AudioEffects {
    pub fn new() -> Self {
        Self {
            active_level: 0,
            tier_age: 0.0,
            since_transition: TIER_COOLDOWN_SECS,
            beat_pulse: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Builds this frame's effects context. With audio sync off the context
    /// is the identity and any in-flight tier/pulse state is dropped.
    pub fn frame(
        &mut self,
        enabled: bool,
        engine: &IntensityEngine,
        levels: &AudioLevels,
        dt: f32,
    ) -> EffectsContext {
        if !enabled {
            self.reset();
            return EffectsContext::default();
        }

        self.since_transition += dt;
        self.tier_age += dt;

        // Tier transitions are cooldown-gated; an active tier also expires
        // on its own after a fixed duration.
        let desired = engine.magnetic_tier();
        if self.active_level > 0 && self.tier_age >= TIER_DURATION_SECS {
            self.active_level = 0;
            self.since_transition = 0.0;
        }
        if desired != self.active_level && self.since_transition >= TIER_COOLDOWN_SECS {
            self.active_level = desired;
            self.tier_age = 0.0;
            self.since_transition = 0.0;
        }

        self.beat_pulse = if levels.beat {
            1.0
        } else {
            (self.beat_pulse - dt * BEAT_PULSE_DECAY).max(0.0)
        };

        let intensity = engine.intensity();
        EffectsContext {
            size_mult: engine.size_multiplier(),
            velocity_mult: engine.velocity_multiplier(),
            intensity,
            tier: MagneticTier::from_level(self.active_level),
            beat_pulse: self.beat_pulse,
            audio_color: Some(audio_color(intensity, levels)),
        }
    }

    pub fn active_tier(&self) -> u8 {
        self.active_level
    }
}

/// Maps intensity plus band balance onto a color: quiet dims toward blue,
/// loud saturates toward the hot end.
fn audio_color(intensity: f32, levels: &AudioLevels) -> Color32 {
    let heat = (intensity * 0.7 + levels.bass * 0.3).clamp(0.0, 1.0);
    let r = (80.0 + heat * 175.0) as u8;
    let g = (60.0 + levels.mid * 120.0) as u8;
    let b = (200.0 - heat * 120.0 + levels.high * 55.0).clamp(0.0, 255.0) as u8;
    Color32::from_rgb(r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intensity::IntensityTuning;

    const DT: f32 = 1.0 / 60.0;

    fn loud_engine() -> IntensityEngine {
        let mut engine = IntensityEngine::new(IntensityTuning::default());
        engine.enable();
        for _ in 0..600 {
            engine.tick(0.8, DT);
        }
        engine
    }

    #[test]
    fn disabled_context_is_identity() {
        let mut effects = AudioEffects::new();
        let engine = loud_engine();
        let ctx = effects.frame(false, &engine, &AudioLevels::default(), DT);
        assert_eq!(ctx.size_mult, 1.0);
        assert_eq!(ctx.velocity_mult, 1.0);
        assert_eq!(ctx.tier.level, 0);
        assert!(ctx.audio_color.is_none());
    }

    #[test]
    fn tier_activates_and_expires() {
        let mut effects = AudioEffects::new();
        let engine = loud_engine();
        let levels = AudioLevels::default();

        let ctx = effects.frame(true, &engine, &levels, DT);
        assert!(ctx.tier.level > 0, "loud engine should raise a tier");
        assert!(ctx.tier.power_mult > 1.0);
        assert!(ctx.tier.tolerance_boost > 0.0);

        // Hold the same engine state past the tier duration: the tier must
        // expire on its own even though intensity stays high, then re-arm
        // after the cooldown.
        let mut saw_expiry = false;
        for _ in 0..((TIER_DURATION_SECS / DT) as usize + 5) {
            let ctx = effects.frame(true, &engine, &levels, DT);
            if ctx.tier.level == 0 {
                saw_expiry = true;
                break;
            }
        }
        assert!(saw_expiry, "tier never auto-expired");
    }

    #[test]
    fn tier_transitions_are_cooldown_gated() {
        let mut effects = AudioEffects::new();
        let engine = loud_engine();
        let levels = AudioLevels::default();
        effects.frame(true, &engine, &levels, DT);
        let first = effects.active_tier();
        assert!(first > 0);

        // A quiet engine wants tier 0, but the cooldown pins the tier.
        let quiet = IntensityEngine::new(IntensityTuning::default());
        effects.frame(true, &quiet, &levels, DT);
        assert_eq!(effects.active_tier(), first);
    }

    #[test]
    fn beat_pulse_decays_between_beats() {
        let mut effects = AudioEffects::new();
        let engine = IntensityEngine::new(IntensityTuning::default());
        let beat = AudioLevels {
            beat: true,
            ..Default::default()
        };
        let ctx = effects.frame(true, &engine, &beat, DT);
        assert_eq!(ctx.beat_pulse, 1.0);

        let silent = AudioLevels::default();
        let a = effects.frame(true, &engine, &silent, DT).beat_pulse;
        let b = effects.frame(true, &engine, &silent, DT).beat_pulse;
        assert!(a < 1.0 && b < a);
    }

    #[test]
    fn tier_table_is_monotone() {
        for level in 1..4u8 {
            let lo = MagneticTier::from_level(level - 1);
            let hi = MagneticTier::from_level(level);
            assert!(hi.tolerance_boost > lo.tolerance_boost);
            assert!(hi.power_mult > lo.power_mult);
        }
    }
}
