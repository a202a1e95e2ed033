//! Connection lines between nearby particles, batched by draw state.
//!
//! Opacity is quantized to a small number of buckets and hue to a 128-step
//! palette, so thousands of pairwise lines collapse into a bounded set of
//! (color, thickness) batches instead of one styled stroke per line.

use crate::config::VisualizerConfig;
use crate::grid::{self, SpatialGrid};
use crate::particle::Particle;
use egui::{Color32, Painter, Pos2, Stroke, Vec2};
use std::collections::HashMap;

/// Overall transparency factor applied to every connection line.
const BASE_OPACITY: f32 = 0.35;

/// Quantization buckets for line opacity. Bucket 0 is invisible and never
/// emitted.
const OPACITY_STEPS: u32 = 21;

/// Hue palette resolution; 128 steps over the full wheel.
const PALETTE_STEPS: usize = 128;

/// Thin lines for weak connections, thick for close pairs.
const THICKNESS: [f32; 2] = [1.0, 1.8];

/// Pair strength above which the thick stroke is used.
const THICK_STRENGTH: f32 = 0.65;

/// Precomputed hue rotations of a base color. Collision-driven hue
/// rotation indexes into this instead of re-deriving HSV per line.
pub struct HuePalette {
    base: Color32,
    colors: Vec<Color32>,
}

impl HuePalette {
    pub fn new(base: Color32) -> Self {
        let (h, s, v) = rgb_to_hsv(base);
        let colors = (0..PALETTE_STEPS)
            .map(|i| {
                let hue = (h + i as f32 / PALETTE_STEPS as f32 * 360.0) % 360.0;
                hsv_to_rgb(hue, s, v)
            })
            .collect();
        Self { base, colors }
    }

    pub fn base(&self) -> Color32 {
        self.base
    }

    fn index_for(degrees: f32) -> usize {
        let wrapped = degrees.rem_euclid(360.0);
        ((wrapped / 360.0 * PALETTE_STEPS as f32) as usize).min(PALETTE_STEPS - 1)
    }

    /// The base color rotated by `degrees` around the hue wheel.
    pub fn rotated(&self, degrees: f32) -> Color32 {
        self.colors[Self::index_for(degrees)]
    }
}

/// One draw call's worth of identically styled lines.
pub struct ConnectionBatch {
    pub color: Color32,
    pub thickness: f32,
    pub lines: Vec<(Vec2, Vec2)>,
}

pub struct ConnectionRenderer {
    palette: HuePalette,
}

impl ConnectionRenderer {
    pub fn new(primary: Color32) -> Self {
        Self {
            palette: HuePalette::new(primary),
        }
    }

    pub fn palette(&self) -> &HuePalette {
        &self.palette
    }

    /// Rebuilds the palette when the primary color setting changes.
    pub fn set_primary(&mut self, primary: Color32) {
        if self.palette.base() != primary {
            self.palette = HuePalette::new(primary);
        }
    }

    /// Finds every particle pair within the connection distance and folds
    /// them into batches keyed by (color source, palette index, opacity
    /// bucket, thickness level).
    ///
    /// Color source per pair: blend of the endpoints' audio colors when
    /// both carry one, hue-rotated palette while collision color change is
    /// on, flat secondary color otherwise.
    pub fn compute(
        &self,
        particles: &[Particle],
        width: f32,
        height: f32,
        config: &VisualizerConfig,
    ) -> Vec<ConnectionBatch> {
        let max_dist = config.connection_distance;
        if max_dist <= 0.0 || particles.len() < 2 {
            return Vec::new();
        }

        let cell = grid::cell_size_for(max_dist, width, height, particles.len());
        let spatial = SpatialGrid::build(width, height, cell, particles.iter().map(|p| &p.pos));
        let secondary = config.secondary();

        let mut batches: HashMap<u32, (Color32, Vec<(Vec2, Vec2)>)> = HashMap::new();
        spatial.for_each_pair(|i, j| {
            let (a, b) = (&particles[i], &particles[j]);
            let d = a.pos - b.pos;
            let dist_sq = d.x * d.x + d.y * d.y;
            if !dist_sq.is_finite() || dist_sq > max_dist * max_dist {
                return;
            }

            let strength = 1.0 - dist_sq.sqrt() / max_dist;
            let alpha = strength * a.life.min(b.life) * BASE_OPACITY;
            let bucket = (alpha.clamp(0.0, 1.0) * (OPACITY_STEPS - 1) as f32).round() as u32;
            if bucket == 0 {
                return;
            }

            let hue_idx = HuePalette::index_for((a.hue_rotation + b.hue_rotation) * 0.5) as u32;
            let (mode, color) = match (a.audio_color, b.audio_color) {
                (Some(ca), Some(cb)) => (2u32, blend(ca, cb)),
                _ if config.collision_color_change => (1, self.palette.colors[hue_idx as usize]),
                _ => (0, secondary),
            };
            let thick = (strength > THICK_STRENGTH) as u32;
            // Only the palette mode varies by hue; keep the other modes in
            // one batch per bucket.
            let hue_key = if mode == 1 { hue_idx } else { 0 };
            let key = mode << 14 | hue_key << 6 | bucket << 1 | thick;
            batches
                .entry(key)
                .or_insert_with(|| (color, Vec::new()))
                .1
                .push((a.pos, b.pos));
        });

        let mut out: Vec<(u32, (Color32, Vec<(Vec2, Vec2)>))> = batches.into_iter().collect();
        out.sort_unstable_by_key(|(key, _)| *key);
        out.into_iter()
            .map(|(key, (color, lines))| {
                let bucket = (key >> 1) & 0x1f;
                let thick = key & 1;
                let alpha = (bucket as f32 / (OPACITY_STEPS - 1) as f32 * 255.0) as u8;
                ConnectionBatch {
                    color: Color32::from_rgba_unmultiplied(
                        color.r(),
                        color.g(),
                        color.b(),
                        alpha,
                    ),
                    thickness: THICKNESS[thick as usize],
                    lines,
                }
            })
            .collect()
    }

    /// Draws the batches, one stroke style per batch.
    pub fn paint(&self, painter: &Painter, origin: Pos2, batches: &[ConnectionBatch]) {
        for batch in batches {
            let stroke = Stroke::new(batch.thickness, batch.color);
            for &(a, b) in &batch.lines {
                painter.line_segment([origin + a, origin + b], stroke);
            }
        }
    }
}

fn blend(a: Color32, b: Color32) -> Color32 {
    Color32::from_rgb(
        ((a.r() as u16 + b.r() as u16) / 2) as u8,
        ((a.g() as u16 + b.g() as u16) / 2) as u8,
        ((a.b() as u16 + b.b() as u16) / 2) as u8,
    )
}

fn rgb_to_hsv(c: Color32) -> (f32, f32, f32) {
    let r = c.r() as f32 / 255.0;
    let g = c.g() as f32 / 255.0;
    let b = c.b() as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max < 1e-6 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Color32 {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Color32::from_rgb(
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle_at(x: f32, y: f32) -> Particle {
        Particle {
            pos: Vec2::new(x, y),
            vel: Vec2::ZERO,
            rest_vel: Vec2::ZERO,
            size: 4.0,
            size_mult: 1.0,
            opacity: 1.0,
            life: 1.0,
            max_life: 1.0,
            transient: false,
            hue_rotation: 0.0,
            audio_color: None,
        }
    }

    fn config_with_distance(d: f32) -> VisualizerConfig {
        VisualizerConfig {
            connection_distance: d,
            ..Default::default()
        }
    }

    #[test]
    fn lone_pair_among_fifty_yields_one_quantized_line() {
        // 50 particles, one pair 50 units apart, everything else spaced
        // beyond the 100-unit connection distance.
        let mut particles = vec![particle_at(10.0, 10.0), particle_at(60.0, 10.0)];
        for i in 0..48 {
            let (col, row) = (i % 8, i / 8);
            particles.push(particle_at(
                200.0 + col as f32 * 120.0,
                200.0 + row as f32 * 120.0,
            ));
        }
        let renderer = ConnectionRenderer::new(Color32::from_rgb(120, 180, 255));
        let batches = renderer.compute(&particles, 1400.0, 1000.0, &config_with_distance(100.0));

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].lines.len(), 1);

        // strength (100 - 50) / 100 = 0.5, full life, quantized to the
        // nearest of 21 buckets.
        let alpha = 0.5 * BASE_OPACITY;
        let bucket = (alpha * (OPACITY_STEPS - 1) as f32).round();
        let expected = (bucket / (OPACITY_STEPS - 1) as f32 * 255.0) as u8;
        assert_eq!(batches[0].color.a(), expected);
        assert_eq!(batches[0].thickness, THICKNESS[0]);
    }

    #[test]
    fn color_source_follows_particle_state() {
        let mut pair = vec![particle_at(0.0, 0.0), particle_at(20.0, 0.0)];
        let renderer = ConnectionRenderer::new(Color32::from_rgb(120, 180, 255));
        let mut config = config_with_distance(100.0);

        // Collision color change off: flat secondary.
        config.collision_color_change = false;
        let flat = renderer.compute(&pair, 800.0, 600.0, &config);
        let secondary = config.secondary();
        assert_eq!(flat[0].color.r(), secondary.r());
        assert_eq!(flat[0].color.g(), secondary.g());

        // Audio colors on both endpoints win over everything and blend.
        pair[0].audio_color = Some(Color32::from_rgb(200, 0, 0));
        pair[1].audio_color = Some(Color32::from_rgb(0, 100, 0));
        let blended = renderer.compute(&pair, 800.0, 600.0, &config);
        assert_eq!(blended[0].color.r(), 100);
        assert_eq!(blended[0].color.g(), 50);
    }

    #[test]
    fn out_of_range_pair_draws_nothing() {
        let particles = vec![particle_at(0.0, 0.0), particle_at(150.0, 0.0)];
        let renderer = ConnectionRenderer::new(Color32::WHITE);
        let batches = renderer.compute(&particles, 800.0, 600.0, &config_with_distance(100.0));
        assert!(batches.is_empty());
    }

    #[test]
    fn close_pairs_get_the_thick_stroke() {
        let particles = vec![particle_at(200.0, 200.0), particle_at(210.0, 200.0)];
        let renderer = ConnectionRenderer::new(Color32::WHITE);
        let batches = renderer.compute(&particles, 800.0, 600.0, &config_with_distance(100.0));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].thickness, THICKNESS[1]);
    }

    #[test]
    fn batch_count_stays_bounded_under_many_lines() {
        // A dense cluster produces hundreds of pairwise lines but the
        // quantization keeps the batch count at most buckets x thickness.
        let particles: Vec<Particle> = (0..30)
            .map(|i| particle_at(300.0 + (i % 6) as f32 * 9.0, 300.0 + (i / 6) as f32 * 9.0))
            .collect();
        let renderer = ConnectionRenderer::new(Color32::WHITE);
        let batches = renderer.compute(&particles, 800.0, 600.0, &config_with_distance(120.0));

        let total_lines: usize = batches.iter().map(|b| b.lines.len()).sum();
        assert!(total_lines > 100, "cluster should be fully connected");
        assert!(batches.len() <= (OPACITY_STEPS as usize - 1) * THICKNESS.len());
    }

    #[test]
    fn dying_particles_fade_their_connections() {
        let mut bright = vec![particle_at(0.0, 0.0), particle_at(20.0, 0.0)];
        let renderer = ConnectionRenderer::new(Color32::WHITE);
        let config = config_with_distance(100.0);
        let strong = renderer.compute(&bright, 800.0, 600.0, &config);

        bright[1].life = 0.2;
        let faded = renderer.compute(&bright, 800.0, 600.0, &config);
        assert!(faded[0].color.a() < strong[0].color.a());
    }

    #[test]
    fn palette_rotation_wraps_and_preserves_the_base() {
        let base = Color32::from_rgb(200, 40, 40);
        let palette = HuePalette::new(base);
        assert_eq!(palette.rotated(0.0), palette.rotated(360.0));
        assert_eq!(palette.rotated(-90.0), palette.rotated(270.0));
        let unrotated = palette.rotated(0.0);
        // HSV round trip may be off by a rounding step, never more.
        assert!((unrotated.r() as i32 - base.r() as i32).abs() <= 2);
        assert!((unrotated.g() as i32 - base.g() as i32).abs() <= 2);
        assert!((unrotated.b() as i32 - base.b() as i32).abs() <= 2);
    }
}
