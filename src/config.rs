//! Configuration for the particle field.
//!
//! Every field has a documented default and the whole struct is
//! `#[serde(default)]`, so missing keys fall back and unrecognized keys in
//! a loaded file are ignored rather than rejected.

use crate::intensity::IntensityTuning;
use egui::Color32;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum MouseMode {
    None,
    Attract,
    Repel,
    Orbit,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct VisualizerConfig {
    pub background_color: [u8; 3],
    pub primary_color: [u8; 3],
    pub secondary_color: [u8; 3],

    /// Animation rate multiplier; 1.0 is the dialed-in speed.
    pub animation_speed: f32,
    pub particle_count: usize,
    /// 1..=100 slider value, mapped logarithmically to a radius.
    pub particle_size: f32,
    pub connection_distance: f32,

    pub mouse_mode: MouseMode,
    pub bounce_off_walls: bool,
    pub rubberize_particles: bool,
    pub particle_magnetism: bool,
    pub collision_color_change: bool,
    pub audio_sync: bool,
    pub glow_effect: bool,

    pub audio: IntensityTuning,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            background_color: [8, 8, 18],
            primary_color: [120, 180, 255],
            secondary_color: [255, 120, 180],
            animation_speed: 1.0,
            particle_count: 120,
            particle_size: 20.0,
            connection_distance: 120.0,
            mouse_mode: MouseMode::Attract,
            bounce_off_walls: true,
            rubberize_particles: false,
            particle_magnetism: false,
            collision_color_change: true,
            audio_sync: false,
            glow_effect: true,
            audio: IntensityTuning::default(),
        }
    }
}

impl VisualizerConfig {
    pub fn background(&self) -> Color32 {
        let [r, g, b] = self.background_color;
        Color32::from_rgb(r, g, b)
    }

    pub fn primary(&self) -> Color32 {
        let [r, g, b] = self.primary_color;
        Color32::from_rgb(r, g, b)
    }

    pub fn secondary(&self) -> Color32 {
        let [r, g, b] = self.secondary_color;
        Color32::from_rgb(r, g, b)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let json = r#"{
            "particle_count": 40,
            "shimmer_factor": 9000,
            "legacy_blob": { "nested": true }
        }"#;
        let config: VisualizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.particle_count, 40);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: VisualizerConfig = serde_json::from_str("{}").unwrap();
        let defaults = VisualizerConfig::default();
        assert_eq!(config.particle_count, defaults.particle_count);
        assert_eq!(config.connection_distance, defaults.connection_distance);
        assert_eq!(config.mouse_mode, defaults.mouse_mode);
        assert_eq!(config.audio.tier_thresholds, defaults.audio.tier_thresholds);
    }

    #[test]
    fn mouse_mode_round_trips_lowercase() {
        let json = r#"{ "mouse_mode": "orbit" }"#;
        let config: VisualizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mouse_mode, MouseMode::Orbit);
    }
}
