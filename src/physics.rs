//! Physics: wall handling, elastic collision response and size-based
//! magnetism. Applied in that order each frame.
//!
//! Mass is size squared throughout, so the same size that renders a
//! particle also decides how it shoves and gets shoved.

use crate::collision::{CollisionEvent, CollisionHandler};
use crate::config::VisualizerConfig;
use crate::effects::EffectsContext;
use crate::grid::{self, SpatialGrid};
use crate::particle::{effective_radius, Particle};
use crate::size_scale;
use rand::Rng;

/// Hard cap on |velocity|; positions advance by velocity times the
/// animation rate, so this caps speed per configured rate.
const MAX_SPEED: f32 = 6.0;

/// Off-screen margin, beyond the radius, before a wrapped particle
/// re-enters on the far side.
const WRAP_MARGIN: f32 = 12.0;

/// Interaction range of the magnetism pass.
const MAGNETIC_RANGE: f32 = 140.0;

/// Size-similarity below which two particles count as "like poles".
const BASE_TOLERANCE: f32 = 0.25;

/// Scale of the pairwise magnetic acceleration.
const MAGNETIC_FORCE: f32 = 0.055;

/// Per-pair cap on the magnetic acceleration magnitude.
const PAIR_FORCE_CAP: f32 = 0.35;

/// Strength of the beat-driven repulsion pulse from canvas center.
const PULSE_FORCE: f32 = 0.9;

/// Reflects velocity off the canvas bounds with size-dependent energy
/// loss, or wraps toroidally with a radius-aware margin when bouncing is
/// off. Rubberized particles bounce with less retained energy so they
/// don't settle into perimeter orbits.
pub fn apply_walls(
    particles: &mut [Particle],
    width: f32,
    height: f32,
    config: &VisualizerConfig,
    ctx: &EffectsContext,
) {
    for p in particles.iter_mut() {
        let r = effective_radius(p, ctx);
        if config.bounce_off_walls {
            let mut restitution = (0.88 - p.size * 0.012).clamp(0.5, 0.95);
            if config.rubberize_particles {
                restitution *= 0.8;
            }
            if p.pos.x < r {
                p.pos.x = r;
                p.vel.x = p.vel.x.abs() * restitution;
            } else if p.pos.x > width - r {
                p.pos.x = width - r;
                p.vel.x = -p.vel.x.abs() * restitution;
            }
            if p.pos.y < r {
                p.pos.y = r;
                p.vel.y = p.vel.y.abs() * restitution;
            } else if p.pos.y > height - r {
                p.pos.y = height - r;
                p.vel.y = -p.vel.y.abs() * restitution;
            }
        } else {
            let margin = r + WRAP_MARGIN;
            if p.pos.x < -margin {
                p.pos.x = width + margin;
            } else if p.pos.x > width + margin {
                p.pos.x = -margin;
            }
            if p.pos.y < -margin {
                p.pos.y = height + margin;
            } else if p.pos.y > height + margin {
                p.pos.y = -margin;
            }
        }
    }
}

/// Elastic collision response: positional separation proportional to
/// relative mass, then a 1-D elastic exchange along the contact normal.
/// A rare randomized deflection keeps pairs from orbiting forever.
pub struct ElasticResolver {
    deflect_chance: f32,
}

impl ElasticResolver {
    pub fn new() -> Self {
        Self {
            deflect_chance: 0.04,
        }
    }

    #[cfg(test)]
    fn without_deflection() -> Self {
        Self {
            deflect_chance: 0.0,
        }
    }
}

impl CollisionHandler for ElasticResolver {
    fn on_collision(&mut self, particles: &mut [Particle], event: &CollisionEvent) {
        let (a, b) = match pair_mut(particles, event.a, event.b) {
            Some(pair) => pair,
            None => return,
        };

        let dist = event.distance.max(1e-4);
        let (nx, ny) = (event.dx / dist, event.dy / dist);
        if !nx.is_finite() || !ny.is_finite() {
            return;
        }

        let ma = size_scale::mass(a.size);
        let mb = size_scale::mass(b.size);
        let total = (ma + mb).max(1e-6);

        // Push overlapping particles apart along the normal, the lighter
        // one moving further.
        let overlap = (event.min_distance - event.distance).max(0.0);
        a.pos.x -= nx * overlap * (mb / total);
        a.pos.y -= ny * overlap * (mb / total);
        b.pos.x += nx * overlap * (ma / total);
        b.pos.y += ny * overlap * (ma / total);

        // Relative velocity along the normal; separating pairs are done.
        let rvx = b.vel.x - a.vel.x;
        let rvy = b.vel.y - a.vel.y;
        let along = rvx * nx + rvy * ny;
        if along >= 0.0 {
            return;
        }

        let impulse = -2.0 * along / (1.0 / ma + 1.0 / mb);
        a.vel.x -= impulse / ma * nx;
        a.vel.y -= impulse / ma * ny;
        b.vel.x += impulse / mb * nx;
        b.vel.y += impulse / mb * ny;

        if self.deflect_chance > 0.0 {
            let mut rng = rand::thread_rng();
            if rng.gen::<f32>() < self.deflect_chance {
                let angle = rng.gen_range(-0.35..0.35f32);
                rotate(&mut a.vel, angle);
                rotate(&mut b.vel, -angle);
            }
        }

        cap_speed(a);
        cap_speed(b);
    }
}

/// Bumps both particles' hue rotation on contact; drives the shared
/// 128-step palette used by particle and connection rendering.
pub struct CollisionColorShift {
    pub degrees_per_hit: f32,
}

impl CollisionColorShift {
    pub fn new() -> Self {
        Self {
            degrees_per_hit: 22.0,
        }
    }
}

impl CollisionHandler for CollisionColorShift {
    fn on_collision(&mut self, particles: &mut [Particle], event: &CollisionEvent) {
        for idx in [event.a, event.b] {
            if let Some(p) = particles.get_mut(idx) {
                p.hue_rotation = (p.hue_rotation + self.degrees_per_hit) % 360.0;
            }
        }
    }
}

/// Signed attraction factor for a pair of sizes: -1 repulsion for
/// near-equal sizes, blending through zero to strong attraction as the
/// size asymmetry grows. An inversion tier widens what counts as
/// "near-equal".
fn polarity(size_a: f32, size_b: f32, tolerance: f32) -> f32 {
    let larger = size_a.max(size_b).max(1e-4);
    let similarity = (size_a - size_b).abs() / larger;
    if similarity < tolerance {
        -1.0
    } else {
        let t = ((similarity - tolerance) / (1.0 - tolerance).max(1e-4)).clamp(0.0, 1.0);
        -1.0 + t * 2.6 // crosses into attraction, up to 1.6 at extreme asymmetry
    }
}

/// Size-asymmetry magnetism over its own grid pass. With full magnetism
/// off, a beat pulse in flight degrades to a repulsion pulse from canvas
/// center instead.
pub fn apply_magnetism(
    particles: &mut [Particle],
    width: f32,
    height: f32,
    config: &VisualizerConfig,
    ctx: &EffectsContext,
) {
    if !config.particle_magnetism {
        if ctx.beat_pulse > 0.01 {
            apply_center_pulse(particles, width, height, ctx);
        }
        return;
    }

    let cell = grid::cell_size_for(MAGNETIC_RANGE, width, height, particles.len());
    let mut spatial = SpatialGrid::new(width, height, cell);
    for (i, p) in particles.iter().enumerate() {
        spatial.insert(i, p.pos);
    }

    let tolerance = (BASE_TOLERANCE + ctx.tier.tolerance_boost).min(0.95);
    let power = MAGNETIC_FORCE * ctx.tier.power_mult;

    spatial.for_each_pair(|i, j| {
        let (a, b) = match pair_mut(particles, i, j) {
            Some(pair) => pair,
            None => return,
        };
        let dx = b.pos.x - a.pos.x;
        let dy = b.pos.y - a.pos.y;
        let dist_sq = dx * dx + dy * dy;
        if !dist_sq.is_finite() || dist_sq < 1e-4 {
            return;
        }
        let dist = dist_sq.sqrt();
        if dist > MAGNETIC_RANGE {
            return;
        }

        let (nx, ny) = (dx / dist, dy / dist);
        let falloff = size_scale::force_falloff(dist, MAGNETIC_RANGE);
        let strength =
            size_scale::magnetic_strength(a.size) * size_scale::magnetic_strength(b.size);
        let factor = polarity(a.size, b.size, tolerance);
        let force = (strength * falloff * power * factor).clamp(-PAIR_FORCE_CAP, PAIR_FORCE_CAP);

        // Accelerations scale inversely with mass: small bodies do the
        // orbiting around large ones.
        let ref_mass = size_scale::mass(size_scale::REFERENCE_SIZE);
        let inv_a = ref_mass / size_scale::mass(a.size).max(1e-4);
        let inv_b = ref_mass / size_scale::mass(b.size).max(1e-4);

        a.vel.x += nx * force * inv_a;
        a.vel.y += ny * force * inv_a;
        b.vel.x -= nx * force * inv_b;
        b.vel.y -= ny * force * inv_b;

        cap_speed(a);
        cap_speed(b);
    });
}

fn apply_center_pulse(particles: &mut [Particle], width: f32, height: f32, ctx: &EffectsContext) {
    let cx = width / 2.0;
    let cy = height / 2.0;
    let range = width.max(height) * 0.6;
    for p in particles.iter_mut() {
        let dx = p.pos.x - cx;
        let dy = p.pos.y - cy;
        let dist = (dx * dx + dy * dy).sqrt().max(1.0);
        if !dist.is_finite() {
            continue;
        }
        let push = size_scale::force_falloff(dist, range) * PULSE_FORCE * ctx.beat_pulse;
        p.vel.x += dx / dist * push;
        p.vel.y += dy / dist * push;
        cap_speed(p);
    }
}

fn cap_speed(p: &mut Particle) {
    let speed_sq = p.vel.x * p.vel.x + p.vel.y * p.vel.y;
    if speed_sq > MAX_SPEED * MAX_SPEED {
        let scale = MAX_SPEED / speed_sq.sqrt();
        p.vel.x *= scale;
        p.vel.y *= scale;
    }
}

fn rotate(v: &mut egui::Vec2, angle: f32) {
    let (sin, cos) = angle.sin_cos();
    let (x, y) = (v.x, v.y);
    v.x = x * cos - y * sin;
    v.y = x * sin + y * cos;
}

fn pair_mut(particles: &mut [Particle], a: usize, b: usize) -> Option<(&mut Particle, &mut Particle)> {
    if a == b || a >= particles.len() || b >= particles.len() {
        return None;
    }
    if a < b {
        let (left, right) = particles.split_at_mut(b);
        Some((&mut left[a], &mut right[0]))
    } else {
        let (left, right) = particles.split_at_mut(a);
        Some((&mut right[0], &mut left[b]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CollisionHandler;
    use egui::Vec2;

    fn particle_at(x: f32, y: f32, vx: f32, vy: f32, size: f32) -> Particle {
        Particle {
            pos: Vec2::new(x, y),
            vel: Vec2::new(vx, vy),
            rest_vel: Vec2::ZERO,
            size,
            size_mult: 1.0,
            opacity: 1.0,
            life: 1.0,
            max_life: 1.0,
            transient: false,
            hue_rotation: 0.0,
            audio_color: None,
        }
    }

    #[test]
    fn equal_mass_head_on_conserves_momentum() {
        let mut particles = vec![
            particle_at(100.0, 100.0, 1.0, 0.0, 4.0),
            particle_at(107.0, 100.0, -1.0, 0.0, 4.0),
        ];
        let event = CollisionEvent {
            a: 0,
            b: 1,
            dx: 7.0,
            dy: 0.0,
            distance: 7.0,
            min_distance: 8.0,
        };
        let before: f32 = particles.iter().map(|p| p.vel.x).sum();

        let mut resolver = ElasticResolver::without_deflection();
        resolver.on_collision(&mut particles, &event);

        let after: f32 = particles.iter().map(|p| p.vel.x).sum();
        assert!((before - after).abs() < 1e-4, "momentum drifted: {after}");
        // Equal masses head-on: velocities swap.
        assert!((particles[0].vel.x + 1.0).abs() < 1e-4);
        assert!((particles[1].vel.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn overlap_separation_favors_the_lighter_particle() {
        let mut particles = vec![
            particle_at(100.0, 100.0, 0.0, 0.0, 8.0),
            particle_at(106.0, 100.0, 0.0, 0.0, 2.0),
        ];
        let event = CollisionEvent {
            a: 0,
            b: 1,
            dx: 6.0,
            dy: 0.0,
            distance: 6.0,
            min_distance: 10.0,
        };
        let mut resolver = ElasticResolver::without_deflection();
        resolver.on_collision(&mut particles, &event);

        let heavy_shift = (particles[0].pos.x - 100.0).abs();
        let light_shift = (particles[1].pos.x - 106.0).abs();
        assert!(light_shift > heavy_shift * 3.0);
        // Fully separated after resolution.
        assert!(particles[1].pos.x - particles[0].pos.x >= 10.0 - 1e-3);
    }

    #[test]
    fn walls_reflect_with_energy_loss() {
        let mut particles = vec![particle_at(798.0, 300.0, 2.0, 0.0, 4.0)];
        let config = VisualizerConfig::default();
        let ctx = EffectsContext::default();
        apply_walls(&mut particles, 800.0, 600.0, &config, &ctx);

        assert!(particles[0].vel.x < 0.0);
        assert!(particles[0].vel.x.abs() < 2.0); // energy lost
        assert!(particles[0].pos.x <= 800.0 - 4.0);
    }

    #[test]
    fn rubberized_walls_keep_less_energy() {
        let ctx = EffectsContext::default();
        let mut plain = vec![particle_at(798.0, 300.0, 2.0, 0.0, 4.0)];
        let config = VisualizerConfig::default();
        apply_walls(&mut plain, 800.0, 600.0, &config, &ctx);

        let mut rubber = vec![particle_at(798.0, 300.0, 2.0, 0.0, 4.0)];
        let rubber_config = VisualizerConfig {
            rubberize_particles: true,
            ..Default::default()
        };
        apply_walls(&mut rubber, 800.0, 600.0, &rubber_config, &ctx);

        assert!(rubber[0].vel.x.abs() < plain[0].vel.x.abs());
    }

    #[test]
    fn disabled_bounce_wraps_with_margin() {
        let config = VisualizerConfig {
            bounce_off_walls: false,
            ..Default::default()
        };
        let ctx = EffectsContext::default();
        let r = 4.0;
        let mut particles = vec![particle_at(800.0 + r + WRAP_MARGIN + 1.0, 300.0, 1.0, 0.0, r)];
        apply_walls(&mut particles, 800.0, 600.0, &config, &ctx);
        assert!(particles[0].pos.x < 0.0);

        // Just inside the margin: no wrap yet.
        let mut edge = vec![particle_at(800.0 + r + WRAP_MARGIN - 1.0, 300.0, 1.0, 0.0, r)];
        apply_walls(&mut edge, 800.0, 600.0, &config, &ctx);
        assert!(edge[0].pos.x > 800.0);
    }

    #[test]
    fn near_equal_sizes_repel_and_asymmetric_sizes_attract() {
        assert!(polarity(4.0, 4.0, BASE_TOLERANCE) < 0.0);
        assert!(polarity(4.0, 4.5, BASE_TOLERANCE) < 0.0);
        assert!(polarity(2.0, 10.0, BASE_TOLERANCE) > 0.5);
        // The transition band crosses zero between the extremes.
        assert!(polarity(4.0, 7.0, BASE_TOLERANCE) > polarity(4.0, 4.5, BASE_TOLERANCE));
    }

    #[test]
    fn inversion_tier_widens_the_repulsion_band() {
        // A moderately asymmetric pair that attracts at tier 0 flips to
        // repulsion once the tolerance is widened.
        let widened = BASE_TOLERANCE + 0.40;
        assert!(polarity(4.0, 9.0, BASE_TOLERANCE) > 0.0);
        assert!(polarity(4.0, 9.0, widened) < 0.0);
    }

    #[test]
    fn magnetism_moves_an_asymmetric_pair_together() {
        let config = VisualizerConfig {
            particle_magnetism: true,
            ..Default::default()
        };
        let ctx = EffectsContext::default();
        let mut particles = vec![
            particle_at(300.0, 300.0, 0.0, 0.0, 2.0),
            particle_at(360.0, 300.0, 0.0, 0.0, 10.0),
        ];
        apply_magnetism(&mut particles, 800.0, 600.0, &config, &ctx);
        // Small particle accelerates toward the large one, harder than
        // the large one moves back.
        assert!(particles[0].vel.x > 0.0);
        assert!(particles[1].vel.x < 0.0);
        assert!(particles[0].vel.x.abs() > particles[1].vel.x.abs());
    }

    #[test]
    fn beat_pulse_repels_from_center_when_magnetism_is_off() {
        let config = VisualizerConfig {
            particle_magnetism: false,
            ..Default::default()
        };
        let ctx = EffectsContext {
            beat_pulse: 1.0,
            ..Default::default()
        };
        let mut particles = vec![particle_at(500.0, 300.0, 0.0, 0.0, 4.0)];
        apply_magnetism(&mut particles, 800.0, 600.0, &config, &ctx);
        assert!(particles[0].vel.x > 0.0); // pushed away from (400, 300)
    }

    #[test]
    fn speed_cap_holds() {
        let mut p = particle_at(0.0, 0.0, 100.0, 100.0, 4.0);
        cap_speed(&mut p);
        let speed = (p.vel.x * p.vel.x + p.vel.y * p.vel.y).sqrt();
        assert!((speed - MAX_SPEED).abs() < 1e-3);
    }
}
