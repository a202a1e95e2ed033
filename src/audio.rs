//! Microphone analyzer: live capture wrapped into per-frame band levels.
//!
//! The cpal input callback runs on the device thread and only forwards
//! sample chunks over a bounded channel; all FFT work happens on the frame
//! loop side in `analyze()`. Stopping drops the stream synchronously so the
//! OS "microphone in use" indicator clears before `stop()` returns.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

const FFT_SIZE: usize = 1024;

/// Rolling-average history length for the beat reference (~1.5s at 30Hz).
const HISTORY_LEN: usize = 43;

/// Frames the beat flag stays gated after triggering.
const BEAT_COOLDOWN_FRAMES: u32 = 18;

const VOLUME_BEAT_RATIO: f32 = 1.35;
const BASS_BEAT_RATIO: f32 = 1.5;

#[derive(Debug, Error)]
pub enum AudioError {
    /// Capture permission refused or revoked. Recoverable: the simulation
    /// keeps running without audio reactivity.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// No capture device, or the backend failed to open one.
    #[error("audio capture unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Per-frame analysis output, every field normalized to [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioLevels {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub volume: f32,
    pub beat: bool,
}

/// Frequency-band bin ranges for the given sample rate.
fn band_bins(sample_rate: u32, fft_size: usize) -> (Range<usize>, Range<usize>, Range<usize>) {
    let resolution = sample_rate as f32 / fft_size as f32;
    let bin = |hz: f32| ((hz / resolution) as usize).min(fft_size / 2);
    let bass = bin(20.0).max(1)..bin(250.0).max(2);
    let mid = bass.end..bin(2000.0).max(bass.end + 1);
    let high = mid.end..bin(16000.0).max(mid.end + 1);
    (bass, mid, high)
}

/// Cooldown-gated beat trigger. Pure so the gating logic is testable
/// without a device.
struct BeatGate {
    since_last: u32,
}

impl BeatGate {
    fn new() -> Self {
        // Start past the cooldown so the first real hit can trigger.
        Self {
            since_last: BEAT_COOLDOWN_FRAMES,
        }
    }

    fn check(&mut self, volume: f32, volume_avg: f32, bass: f32, bass_avg: f32) -> bool {
        self.since_last = self.since_last.saturating_add(1);
        let hit = volume_avg > 1e-4
            && bass_avg > 1e-4
            && volume > volume_avg * VOLUME_BEAT_RATIO
            && bass > bass_avg * BASS_BEAT_RATIO;
        if hit && self.since_last >= BEAT_COOLDOWN_FRAMES {
            self.since_last = 0;
            true
        } else {
            false
        }
    }
}

pub struct AudioAnalyzer {
    stream: Option<cpal::Stream>,
    rx: Option<Receiver<Vec<f32>>>,
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    window: VecDeque<f32>,
    volume_history: VecDeque<f32>,
    bass_history: VecDeque<f32>,
    beat_gate: BeatGate,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            stream: None,
            rx: None,
            sample_rate: 44_100,
            fft: planner.plan_fft_forward(FFT_SIZE),
            window: VecDeque::with_capacity(FFT_SIZE * 2),
            volume_history: VecDeque::with_capacity(HISTORY_LEN),
            bass_history: VecDeque::with_capacity(HISTORY_LEN),
            beat_gate: BeatGate::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the default input device and starts capturing. Idempotent when
    /// already running. The frame loop keeps rendering audio-inactive until
    /// this succeeds.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no input device".into()))?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        self.sample_rate = config.sample_rate().0;
        let channels = config.channels().max(1) as usize;

        let (tx, rx) = bounded::<Vec<f32>>(32);
        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect();
                    // Never block the device thread: drop the chunk if the
                    // frame loop is behind.
                    let _ = tx.try_send(mono);
                },
                |err| log::warn!("capture stream error: {err}"),
                None,
            )
            .map_err(classify_build_error)?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        self.reset_analysis_state();
        self.stream = Some(stream);
        self.rx = Some(rx);
        log::info!("microphone capture started at {} Hz", self.sample_rate);
        Ok(())
    }

    /// Releases the capture device. Dropping the cpal stream closes it
    /// before this returns, which is what clears the OS capture indicator.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!("microphone capture stopped");
        }
        self.rx = None;
        self.reset_analysis_state();
    }

    fn reset_analysis_state(&mut self) {
        self.window.clear();
        self.volume_history.clear();
        self.bass_history.clear();
        self.beat_gate = BeatGate::new();
    }

    /// Drains captured samples and analyzes the latest window. Inactive or
    /// not-yet-filled analyzers return all-zero levels deterministically.
    pub fn analyze(&mut self) -> AudioLevels {
        let Some(rx) = &self.rx else {
            return AudioLevels::default();
        };

        while let Ok(chunk) = rx.try_recv() {
            self.window.extend(chunk);
        }
        while self.window.len() > FFT_SIZE {
            self.window.pop_front();
        }
        if self.window.len() < FFT_SIZE {
            return AudioLevels::default();
        }

        // Hann-windowed FFT of the latest capture window.
        let mut buffer: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos());
                Complex::new(s * w, 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        let mut spectrum: Vec<f32> = buffer[..FFT_SIZE / 2]
            .iter()
            .map(|c| (c.norm() / FFT_SIZE as f32).sqrt())
            .collect();
        let max_mag = spectrum.iter().cloned().fold(0.0f32, f32::max);
        if max_mag > 0.0 {
            for s in &mut spectrum {
                *s /= max_mag;
            }
        }

        let (bass_bins, mid_bins, high_bins) = band_bins(self.sample_rate, FFT_SIZE);
        let band_avg = |r: &Range<usize>| {
            let slice = &spectrum[r.start.min(spectrum.len())..r.end.min(spectrum.len())];
            if slice.is_empty() {
                0.0
            } else {
                slice.iter().sum::<f32>() / slice.len() as f32
            }
        };
        let bass = band_avg(&bass_bins);
        let mid = band_avg(&mid_bins);
        let high = band_avg(&high_bins);

        // RMS volume; a full-scale sine sits near 0.7 RMS, so scale up a
        // touch before clamping.
        let mean_sq = self.window.iter().map(|s| s * s).sum::<f32>() / self.window.len() as f32;
        let volume = (mean_sq.sqrt() * 1.4).clamp(0.0, 1.0);

        let volume_avg = rolling_avg(&self.volume_history);
        let bass_avg = rolling_avg(&self.bass_history);
        let beat = self.beat_gate.check(volume, volume_avg, bass, bass_avg);

        push_bounded(&mut self.volume_history, volume);
        push_bounded(&mut self.bass_history, bass);

        AudioLevels {
            bass: bass.clamp(0.0, 1.0),
            mid: mid.clamp(0.0, 1.0),
            high: high.clamp(0.0, 1.0),
            volume,
            beat,
        }
    }
}

fn rolling_avg(history: &VecDeque<f32>) -> f32 {
    if history.is_empty() {
        0.0
    } else {
        history.iter().sum::<f32>() / history.len() as f32
    }
}

fn push_bounded(history: &mut VecDeque<f32>, value: f32) {
    if history.len() >= HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(value);
}

fn classify_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable("device disappeared".into())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            let msg = err.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("denied") || lower.contains("permission") || lower.contains("access")
            {
                AudioError::PermissionDenied
            } else {
                AudioError::DeviceUnavailable(msg)
            }
        }
        other => AudioError::DeviceUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_analyzer_is_deterministically_silent() {
        let mut analyzer = AudioAnalyzer::new();
        for _ in 0..5 {
            assert_eq!(analyzer.analyze(), AudioLevels::default());
        }
    }

    #[test]
    fn band_bins_track_sample_rate() {
        let (bass, mid, high) = band_bins(44_100, 1024);
        // 43.07 Hz per bin at 44.1kHz/1024.
        assert_eq!(bass.start, 1);
        assert_eq!(bass.end, 5); // 250 Hz ≈ bin 5
        assert_eq!(mid.start, bass.end);
        assert_eq!(mid.end, 46); // 2000 Hz ≈ bin 46
        assert_eq!(high.start, mid.end);
        assert!(high.end <= 512);

        // Doubling the sample rate halves the bin indices for a given band.
        let (bass_hi, _, _) = band_bins(88_200, 1024);
        assert!(bass_hi.end <= bass.end / 2 + 1);
    }

    #[test]
    fn beat_gate_respects_cooldown() {
        let mut gate = BeatGate::new();
        // First qualifying hit triggers.
        assert!(gate.check(0.8, 0.4, 0.8, 0.4));
        // Immediate re-trigger is gated even though ratios still qualify.
        for _ in 0..(BEAT_COOLDOWN_FRAMES - 2) {
            assert!(!gate.check(0.8, 0.4, 0.8, 0.4));
        }
        // After the cooldown elapses it may fire again.
        let mut fired = false;
        for _ in 0..4 {
            fired |= gate.check(0.8, 0.4, 0.8, 0.4);
        }
        assert!(fired);
    }

    #[test]
    fn beat_gate_needs_both_bands() {
        let mut gate = BeatGate::new();
        // Loud overall but flat bass: no beat.
        assert!(!gate.check(0.9, 0.4, 0.3, 0.4));
        // Bass spike but quiet overall: no beat.
        assert!(!gate.check(0.3, 0.4, 0.9, 0.4));
    }
}
