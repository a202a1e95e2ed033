//! Size-derived scaling shared by the physics and magnetism passes.
//!
//! All conversions from a particle's radius to a physical quantity live
//! here so collision response and magnetic forces agree on what "big"
//! means.

/// Radius that maps to a magnetic strength of 1.0.
pub const REFERENCE_SIZE: f32 = 3.0;

/// Collision mass. Area-proportional so large particles shrug off
/// small ones in the elastic exchange.
#[inline]
pub fn mass(size: f32) -> f32 {
    size * size
}

/// Magnetic field strength for a particle of the given radius.
/// Sub-linear so giant particles don't completely dominate the field.
#[inline]
pub fn magnetic_strength(size: f32) -> f32 {
    (size / REFERENCE_SIZE).max(0.0).sqrt()
}

/// Quadratic distance falloff: 1.0 at contact, 0.0 at `range`.
#[inline]
pub fn force_falloff(distance: f32, range: f32) -> f32 {
    if range <= 0.0 {
        return 0.0;
    }
    let t = (1.0 - distance / range).clamp(0.0, 1.0);
    t * t
}

/// Maps the 1..=100 "particle size" setting to a rendered base radius.
/// Logarithmic so the top of the slider doesn't explode the canvas.
#[inline]
pub fn base_radius(config_size: f32) -> f32 {
    1.1 + (1.0 + config_size.max(0.0)).ln() * 0.85
}
