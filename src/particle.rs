//! Particle store: the single owner of kinematic and visual-override state.
//!
//! Particles are always allocated with their full record shape (color
//! tracking fields included) so no pass ever has to probe for a missing
//! field. The population converges toward the configured count by
//! incremental add/remove, never by bulk reallocation, so in-flight state
//! like `hue_rotation` survives a count change.

use crate::config::{MouseMode, VisualizerConfig};
use crate::effects::EffectsContext;
use crate::size_scale;
use egui::Vec2;
use rand::Rng;
use rayon::prelude::*;

/// Particles added or removed per frame while converging on the target.
const COUNT_STEP: usize = 6;

/// Pointer interaction reach in canvas units.
const POINTER_RADIUS: f32 = 160.0;

/// Transient burst particles lose this much life per second.
const BURST_DECAY: f32 = 0.8;

/// How quickly a particle's velocity relaxes back to its rest drift.
const REST_RETURN_RATE: f32 = 0.6;

#[derive(Clone, Debug)]
pub struct Particle {
    pub pos: Vec2,
    pub vel: Vec2,
    /// Drift velocity returned to when no interaction is active.
    pub rest_vel: Vec2,
    /// Base radius; always > 0. Rendered/collision radius is this times
    /// the frame's audio size multiplier.
    pub size: f32,
    /// Per-particle size spread, fixed at creation.
    pub size_mult: f32,
    pub opacity: f32,
    pub life: f32,
    pub max_life: f32,
    /// Set for click-burst particles, which decay and die.
    pub transient: bool,
    /// Degrees, bumped on collision, wraps at 360.
    pub hue_rotation: f32,
    /// Frame-scoped audio color override; absent unless audio color
    /// effects are active this frame.
    pub audio_color: Option<egui::Color32>,
}

/// A particle's collision/connection radius under the current audio size
/// multiplier. Hitboxes track the rendered size, not the resting size.
#[inline]
pub fn effective_radius(p: &Particle, ctx: &EffectsContext) -> f32 {
    p.size * ctx.size_mult
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PointerState {
    pub pos: Vec2,
    pub active: bool,
}

pub struct ParticleField {
    pub particles: Vec<Particle>,
    pub width: f32,
    pub height: f32,
}

impl ParticleField {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            particles: Vec::new(),
            width,
            height,
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(1.0);
        self.height = height.max(1.0);
    }

    fn make_particle(&self, config: &VisualizerConfig, rng: &mut impl Rng) -> Particle {
        let size_mult = rng.gen_range(0.5..1.5);
        let vel = Vec2::new(rng.gen_range(-0.4..0.4), rng.gen_range(-0.4..0.4));
        Particle {
            pos: Vec2::new(
                rng.gen_range(0.0..self.width),
                rng.gen_range(0.0..self.height),
            ),
            vel,
            rest_vel: vel,
            size: size_scale::base_radius(config.particle_size) * size_mult,
            size_mult,
            opacity: rng.gen_range(0.3..0.9),
            life: 1.0,
            max_life: 1.0,
            transient: false,
            hue_rotation: 0.0,
            audio_color: None,
        }
    }

    fn persistent_count(&self) -> usize {
        self.particles.iter().filter(|p| !p.transient).count()
    }

    /// Converges the persistent population toward the configured target by
    /// at most `COUNT_STEP` additions or removals per call. Surviving
    /// particles are untouched.
    pub fn sync_count(&mut self, config: &VisualizerConfig) {
        let current = self.persistent_count();
        let target = config.particle_count;
        let mut rng = rand::thread_rng();

        if current < target {
            for _ in 0..(target - current).min(COUNT_STEP) {
                let p = self.make_particle(config, &mut rng);
                self.particles.push(p);
            }
        } else if current > target {
            let mut to_remove = (current - target).min(COUNT_STEP);
            // Remove from the tail so earlier particles keep their state.
            let mut i = self.particles.len();
            while to_remove > 0 && i > 0 {
                i -= 1;
                if !self.particles[i].transient {
                    self.particles.remove(i);
                    to_remove -= 1;
                }
            }
        }
    }

    /// Re-derives base radii after a particle-size setting change, keeping
    /// each particle's fixed spread multiplier.
    pub fn apply_size_setting(&mut self, config: &VisualizerConfig) {
        let base = size_scale::base_radius(config.particle_size);
        for p in &mut self.particles {
            p.size = base * p.size_mult;
        }
    }

    /// Click burst: short-lived particles thrown radially from `pos`.
    pub fn spawn_burst(&mut self, pos: Vec2, count: usize, config: &VisualizerConfig) {
        let mut rng = rand::thread_rng();
        let base = size_scale::base_radius(config.particle_size);
        for _ in 0..count {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let speed = rng.gen_range(1.5..4.0);
            let vel = Vec2::new(angle.cos() * speed, angle.sin() * speed);
            let size_mult = rng.gen_range(0.4..1.0);
            self.particles.push(Particle {
                pos,
                vel,
                rest_vel: vel * 0.1,
                size: base * size_mult,
                size_mult,
                opacity: rng.gen_range(0.5..1.0),
                life: 1.0,
                max_life: 1.0,
                transient: true,
                hue_rotation: rng.gen_range(0.0..360.0),
                audio_color: None,
            });
        }
    }

    /// Advances positions, applies pointer interaction, relaxes velocity
    /// toward the rest drift, decays transient life and refreshes the
    /// per-frame audio color override. Non-finite particles are re-seeded
    /// rather than left to poison later passes.
    pub fn integrate(
        &mut self,
        dt: f32,
        config: &VisualizerConfig,
        ctx: &EffectsContext,
        pointer: PointerState,
    ) {
        let speed = config.animation_speed * ctx.velocity_mult * dt * 60.0;
        let mouse_mode = config.mouse_mode;
        let audio_color = if config.audio_sync { ctx.audio_color } else { None };

        self.particles.par_iter_mut().for_each(|p| {
            let mut interacting = false;
            if pointer.active && mouse_mode != MouseMode::None {
                let to_pointer = pointer.pos - p.pos;
                let dist = to_pointer.length();
                if dist < POINTER_RADIUS && dist > 1.0 {
                    interacting = true;
                    let dir = to_pointer / dist;
                    let falloff = 1.0 - dist / POINTER_RADIUS;
                    match mouse_mode {
                        MouseMode::Attract => p.vel += dir * falloff * 0.25 * speed,
                        MouseMode::Repel => p.vel -= dir * falloff * 0.35 * speed,
                        MouseMode::Orbit => {
                            let tangent = Vec2::new(-dir.y, dir.x);
                            p.vel += tangent * falloff * 0.3 * speed;
                            p.vel += dir * falloff * 0.05 * speed;
                        }
                        MouseMode::None => {}
                    }
                }
            }

            p.pos += p.vel * speed;

            if !interacting {
                let blend = (REST_RETURN_RATE * dt).min(1.0);
                p.vel += (p.rest_vel - p.vel) * blend;
            }

            if p.transient {
                p.life -= dt * BURST_DECAY;
            }

            p.audio_color = audio_color;
        });

        self.particles.retain(|p| !p.transient || p.life > 0.0);

        // NaN hygiene: nothing upstream recovers a non-finite particle, so
        // re-seed it here.
        let mut rng = rand::thread_rng();
        for i in 0..self.particles.len() {
            let p = &self.particles[i];
            let bad = !p.pos.x.is_finite()
                || !p.pos.y.is_finite()
                || !p.vel.x.is_finite()
                || !p.vel.y.is_finite();
            if bad {
                let transient = p.transient;
                let mut fresh = self.make_particle(config, &mut rng);
                fresh.transient = transient;
                self.particles[i] = fresh;
            }
        }
    }
}
