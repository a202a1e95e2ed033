//! Collision detection over the spatial grid, with synchronous observer
//! dispatch.
//!
//! Events are delivered to every subscribed handler inside the same pass,
//! in subscription order; they are never queued across frames. Under high
//! particle counts a deterministic fraction of source particles is skipped
//! (stride skipping), so detection is explicitly non-exhaustive at load —
//! the trade is completeness for frame-rate stability.

use crate::effects::EffectsContext;
use crate::grid::{self, SpatialGrid};
use crate::particle::{effective_radius, Particle};

/// Above this many particles every 4th source particle is skipped; above
/// twice this, every 3rd.
const SKIP_THRESHOLD: usize = 1500;

#[derive(Clone, Copy, Debug)]
pub struct CollisionEvent {
    pub a: usize,
    pub b: usize,
    pub dx: f32,
    pub dy: f32,
    pub distance: f32,
    /// Sum of the two effective radii at detection time.
    pub min_distance: f32,
}

/// Observer interface for collision consumers (physics resolution, the
/// collision color effect). Handlers run in subscription order and may
/// mutate the particles they were handed.
pub trait CollisionHandler {
    fn on_collision(&mut self, particles: &mut [Particle], event: &CollisionEvent);
}

pub struct CollisionDetector {
    handlers: Vec<(usize, Box<dyn CollisionHandler>)>,
    next_id: usize,
}

impl CollisionDetector {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn subscribe(&mut self, handler: Box<dyn CollisionHandler>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    pub fn unsubscribe(&mut self, id: usize) {
        self.handlers.retain(|(hid, _)| *hid != id);
    }

    /// Runs one detection pass. The grid cell size is tuned to twice the
    /// largest effective radius so a pair can never span more than one
    /// forward neighborhood.
    pub fn detect(
        &mut self,
        particles: &mut [Particle],
        width: f32,
        height: f32,
        ctx: &EffectsContext,
    ) {
        if particles.len() < 2 || self.handlers.is_empty() {
            return;
        }

        let max_radius = particles
            .iter()
            .map(|p| effective_radius(p, ctx))
            .fold(0.0f32, f32::max);
        if max_radius <= 0.0 {
            return;
        }

        let cell = grid::cell_size_for(max_radius * 2.0, width, height, particles.len());
        let mut spatial = SpatialGrid::new(width, height, cell);
        for (i, p) in particles.iter().enumerate() {
            spatial.insert(i, p.pos);
        }

        let stride = if particles.len() > SKIP_THRESHOLD * 2 {
            3
        } else if particles.len() > SKIP_THRESHOLD {
            4
        } else {
            0
        };

        let handlers = &mut self.handlers;
        spatial.for_each_pair(|i, j| {
            if stride != 0 && i % stride == 0 {
                return;
            }

            let (pa, pb) = (&particles[i], &particles[j]);
            let min_dist = effective_radius(pa, ctx) + effective_radius(pb, ctx);
            let dx = pb.pos.x - pa.pos.x;
            let dy = pb.pos.y - pa.pos.y;

            // Cheap bounding-box reject before the squared-distance test.
            if dx.abs() > min_dist || dy.abs() > min_dist {
                return;
            }
            let dist_sq = dx * dx + dy * dy;
            if dist_sq >= min_dist * min_dist || !dist_sq.is_finite() {
                return;
            }

            let event = CollisionEvent {
                a: i,
                b: j,
                dx,
                dy,
                distance: dist_sq.sqrt(),
                min_distance: min_dist,
            };
            for (_, handler) in handlers.iter_mut() {
                handler.on_collision(particles, &event);
            }
        });
    }
}
