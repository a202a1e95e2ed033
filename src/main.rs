//! Pulsefield - audio-reactive particle field
//! Mic-driven particle simulation with connection rendering and egui GUI

mod audio;
mod collision;
mod config;
mod connections;
mod effects;
mod grid;
mod intensity;
mod particle;
mod physics;
mod size_scale;

use audio::{AudioAnalyzer, AudioLevels};
use collision::CollisionDetector;
use config::{MouseMode, VisualizerConfig};
use connections::ConnectionRenderer;
use eframe::egui;
use effects::{AudioEffects, EffectsContext};
use intensity::IntensityEngine;
use particle::{ParticleField, PointerState};
use physics::{CollisionColorShift, ElasticResolver};
use std::time::Instant;

const CONFIG_PATH: &str = "pulsefield_config.json";

/// Particle count above which the collision and magnetism passes run on
/// alternating frames instead of every frame.
const THROTTLE_THRESHOLD: usize = 1500;

/// Click burst size.
const BURST_COUNT: usize = 14;

struct PulsefieldApp {
    config: VisualizerConfig,
    field: ParticleField,
    analyzer: AudioAnalyzer,
    engine: IntensityEngine,
    effects: AudioEffects,
    detector: CollisionDetector,
    color_handler: Option<usize>,
    connections: ConnectionRenderer,

    levels: AudioLevels,
    fx: EffectsContext,
    audio_error: Option<String>,

    last_update: Instant,
    last_dt: f32,
    frame_counter: u64,

    show_settings: bool,
    last_particle_size: f32,
    last_primary: [u8; 3],
}

impl PulsefieldApp {
    fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let mut visuals = egui::Visuals::dark();
        visuals.window_fill = egui::Color32::from_rgba_unmultiplied(12, 12, 22, 245);
        visuals.panel_fill = egui::Color32::from_rgba_unmultiplied(16, 16, 30, 240);
        cc.egui_ctx.set_visuals(visuals);

        let mut config = match VisualizerConfig::load(CONFIG_PATH) {
            Ok(config) => config,
            Err(_) => VisualizerConfig::default(),
        };
        // Capture never auto-starts; the user re-arms it each session.
        config.audio_sync = false;

        let mut detector = CollisionDetector::new();
        detector.subscribe(Box::new(ElasticResolver::new()));
        let color_handler = config
            .collision_color_change
            .then(|| detector.subscribe(Box::new(CollisionColorShift::new())));

        let engine = IntensityEngine::new(config.audio.clone());
        let connections = ConnectionRenderer::new(config.primary());
        let last_particle_size = config.particle_size;
        let last_primary = config.primary_color;

        Self {
            config,
            field: ParticleField::new(1280.0, 720.0),
            analyzer: AudioAnalyzer::new(),
            engine,
            effects: AudioEffects::new(),
            detector,
            color_handler,
            connections,
            levels: AudioLevels::default(),
            fx: EffectsContext::default(),
            audio_error: None,
            last_update: Instant::now(),
            last_dt: 1.0 / 60.0,
            frame_counter: 0,
            show_settings: true,
            last_particle_size,
            last_primary,
        }
    }

    fn set_audio_sync(&mut self, enabled: bool) {
        self.config.audio_sync = enabled;
        if enabled {
            match self.analyzer.start() {
                Ok(()) => {
                    self.audio_error = None;
                    self.engine.enable();
                }
                Err(e) => {
                    log::warn!("audio start failed: {e}");
                    self.audio_error = Some(e.to_string());
                    self.config.audio_sync = false;
                }
            }
        } else {
            self.analyzer.stop();
            self.engine.disable();
            self.levels = AudioLevels::default();
        }
    }

    fn set_collision_color(&mut self, enabled: bool) {
        self.config.collision_color_change = enabled;
        match (enabled, self.color_handler) {
            (true, None) => {
                self.color_handler =
                    Some(self.detector.subscribe(Box::new(CollisionColorShift::new())));
            }
            (false, Some(id)) => {
                self.detector.unsubscribe(id);
                self.color_handler = None;
            }
            _ => {}
        }
    }

    /// One simulation step over the current canvas size.
    fn step(&mut self, dt: f32, pointer: PointerState) {
        self.frame_counter += 1;
        let heavy = self.field.particles.len() > THROTTLE_THRESHOLD;

        // Audio pipeline. Under load the FFT runs on alternating frames and
        // the cached levels carry over.
        if self.config.audio_sync && (!heavy || self.frame_counter % 2 == 0) {
            self.levels = self.analyzer.analyze();
        }
        self.engine.tick(self.levels.volume, dt);
        self.fx = self
            .effects
            .frame(self.config.audio_sync, &self.engine, &self.levels, dt);

        self.field.sync_count(&self.config);
        self.field.integrate(dt, &self.config, &self.fx, pointer);
        physics::apply_walls(
            &mut self.field.particles,
            self.field.width,
            self.field.height,
            &self.config,
            &self.fx,
        );

        if !heavy || self.frame_counter % 2 == 0 {
            self.detector.detect(
                &mut self.field.particles,
                self.field.width,
                self.field.height,
                &self.fx,
            );
        }
        if !heavy || self.frame_counter % 2 == 1 {
            physics::apply_magnetism(
                &mut self.field.particles,
                self.field.width,
                self.field.height,
                &self.config,
                &self.fx,
            );
        }
    }
}

impl eframe::App for PulsefieldApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f32().min(0.1);
        self.last_update = now;
        self.last_dt = dt;

        self.render_top_bar(ctx);
        if self.show_settings {
            self.render_settings_panel(ctx);
        }
        self.render_canvas(ctx, dt);

        ctx.request_repaint();
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.analyzer.stop();
        if let Err(e) = self.config.save(CONFIG_PATH) {
            log::warn!("config save failed: {e}");
        }
    }
}

impl PulsefieldApp {
    fn render_top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Pulsefield");
                ui.separator();

                let mut audio_sync = self.config.audio_sync;
                if ui.toggle_value(&mut audio_sync, "🎤 Audio Sync").changed() {
                    self.set_audio_sync(audio_sync);
                }
                if self.analyzer.is_active() {
                    ui.colored_label(egui::Color32::LIGHT_GREEN, "● live");
                }
                if let Some(ref err) = self.audio_error {
                    ui.colored_label(egui::Color32::YELLOW, format!("⚠ {err}"));
                }

                ui.separator();
                ui.toggle_value(&mut self.show_settings, "⚙ Settings");

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let fps = 1.0 / self.last_dt.max(0.001);
                    ui.label(format!("FPS: {fps:.0}"));
                    ui.label(format!("Particles: {}", self.field.particles.len()));
                    if self.config.audio_sync {
                        ui.label(format!("Intensity: {:.2}", self.fx.intensity));
                        if self.fx.tier.is_active() {
                            ui.colored_label(
                                egui::Color32::LIGHT_BLUE,
                                format!("Inversion T{}", self.fx.tier.level),
                            );
                        }
                    }
                });
            });
        });
    }

    fn render_settings_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("settings_panel")
            .min_width(260.0)
            .show(ctx, |ui| {
                ui.heading("Settings");
                ui.separator();

                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.label("Particle Count");
                    ui.add(egui::Slider::new(&mut self.config.particle_count, 1..=5000));

                    ui.label("Particle Size");
                    ui.add(
                        egui::Slider::new(&mut self.config.particle_size, 1.0..=100.0)
                            .logarithmic(true),
                    );

                    ui.label("Animation Speed");
                    ui.add(egui::Slider::new(&mut self.config.animation_speed, 0.0..=3.0));

                    ui.label("Connection Distance");
                    ui.add(egui::Slider::new(
                        &mut self.config.connection_distance,
                        0.0..=300.0,
                    ));

                    ui.add_space(8.0);
                    ui.label("Mouse Mode");
                    ui.horizontal(|ui| {
                        ui.selectable_value(&mut self.config.mouse_mode, MouseMode::None, "Off");
                        ui.selectable_value(
                            &mut self.config.mouse_mode,
                            MouseMode::Attract,
                            "Attract",
                        );
                        ui.selectable_value(&mut self.config.mouse_mode, MouseMode::Repel, "Repel");
                        ui.selectable_value(&mut self.config.mouse_mode, MouseMode::Orbit, "Orbit");
                    });

                    ui.add_space(8.0);
                    ui.checkbox(&mut self.config.bounce_off_walls, "Bounce Off Walls");
                    ui.checkbox(&mut self.config.rubberize_particles, "Rubberize");
                    ui.checkbox(&mut self.config.particle_magnetism, "Magnetism");
                    ui.checkbox(&mut self.config.glow_effect, "Glow");

                    let mut color_change = self.config.collision_color_change;
                    if ui.checkbox(&mut color_change, "Collision Color Change").changed() {
                        self.set_collision_color(color_change);
                    }

                    ui.add_space(8.0);
                    ui.label("Colors");
                    ui.horizontal(|ui| {
                        ui.color_edit_button_srgb(&mut self.config.background_color);
                        ui.label("Background");
                    });
                    ui.horizontal(|ui| {
                        ui.color_edit_button_srgb(&mut self.config.primary_color);
                        ui.label("Primary");
                    });
                    ui.horizontal(|ui| {
                        ui.color_edit_button_srgb(&mut self.config.secondary_color);
                        ui.label("Secondary");
                    });

                    ui.add_space(8.0);
                    ui.separator();
                    ui.collapsing("Audio Tuning", |ui| {
                        let audio = &mut self.config.audio;
                        ui.label("Target Level");
                        ui.add(egui::Slider::new(&mut audio.target_level, 0.1..=0.8));
                        ui.label("Smoothing Rate");
                        ui.add(egui::Slider::new(&mut audio.smoothing_rate, 1.0..=20.0));
                        ui.label("Spike Weight");
                        ui.add(egui::Slider::new(&mut audio.spike_weight, 0.0..=1.0));
                        ui.label("Size Boost");
                        ui.add(egui::Slider::new(&mut audio.size_boost, 0.0..=2.0));
                        ui.label("Velocity Boost");
                        ui.add(egui::Slider::new(&mut audio.velocity_boost, 0.0..=2.0));
                        if ui.button("Apply Tuning").clicked() {
                            self.engine.set_tuning(audio.clone());
                        }
                    });

                    ui.add_space(8.0);
                    ui.separator();
                    ui.horizontal(|ui| {
                        if ui.button("💾 Save").clicked() {
                            if let Err(e) = self.config.save(CONFIG_PATH) {
                                log::warn!("config save failed: {e}");
                            }
                        }
                        if ui.button("📂 Load").clicked() {
                            match VisualizerConfig::load(CONFIG_PATH) {
                                Ok(config) => {
                                    let audio_sync = config.audio_sync;
                                    let color_change = config.collision_color_change;
                                    self.config = config;
                                    self.engine.set_tuning(self.config.audio.clone());
                                    self.set_audio_sync(audio_sync);
                                    self.set_collision_color(color_change);
                                }
                                Err(e) => log::warn!("config load failed: {e}"),
                            }
                        }
                        if ui.button("Reset").clicked() {
                            self.config = VisualizerConfig::default();
                        }
                    });
                });
            });

        // Side-effectful settings: re-derive sizes and palette only when the
        // underlying value actually changed.
        if self.config.particle_size != self.last_particle_size {
            self.last_particle_size = self.config.particle_size;
            self.field.apply_size_setting(&self.config);
        }
        if self.config.primary_color != self.last_primary {
            self.last_primary = self.config.primary_color;
            self.connections.set_primary(self.config.primary());
        }
    }

    fn render_canvas(&mut self, ctx: &egui::Context, dt: f32) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let (rect, response) =
                ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
            self.field.resize(rect.width(), rect.height());

            let pointer = match response.hover_pos() {
                Some(pos) => PointerState {
                    pos: pos - rect.min,
                    active: true,
                },
                None => PointerState::default(),
            };
            if response.clicked() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.field
                        .spawn_burst(pos - rect.min, BURST_COUNT, &self.config);
                }
            }

            self.step(dt, pointer);

            let painter = ui.painter_at(rect);
            painter.rect_filled(rect, 0.0, self.config.background());

            let batches = self.connections.compute(
                &self.field.particles,
                self.field.width,
                self.field.height,
                &self.config,
            );
            self.connections.paint(&painter, rect.min, &batches);

            self.draw_particles(&painter, rect.min);
        });
    }

    fn draw_particles(&self, painter: &egui::Painter, origin: egui::Pos2) {
        let palette = self.connections.palette();
        let secondary = self.config.secondary();

        for p in &self.field.particles {
            let radius = particle::effective_radius(p, &self.fx);
            let base = p.audio_color.unwrap_or_else(|| {
                if p.transient {
                    secondary
                } else {
                    palette.rotated(p.hue_rotation)
                }
            });
            let alpha = (p.opacity * p.life.clamp(0.0, 1.0) * 255.0) as u8;
            let color = egui::Color32::from_rgba_unmultiplied(base.r(), base.g(), base.b(), alpha);
            let center = origin + p.pos;

            if self.config.glow_effect {
                // Two soft halos behind the core.
                for (scale, halo_alpha) in [(2.2, alpha / 6), (1.5, alpha / 3)] {
                    painter.circle_filled(
                        center,
                        radius * scale,
                        egui::Color32::from_rgba_unmultiplied(
                            base.r(),
                            base.g(),
                            base.b(),
                            halo_alpha,
                        ),
                    );
                }
            }
            painter.circle_filled(center, radius, color);
        }
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 800.0])
            .with_title("Pulsefield")
            .with_min_inner_size([800.0, 600.0]),
        vsync: true,
        ..Default::default()
    };

    eframe::run_native(
        "Pulsefield",
        options,
        Box::new(|cc| Box::new(PulsefieldApp::new(cc))),
    )
}
