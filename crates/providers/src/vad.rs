//! Energy VAD
//!
//! Dual-threshold energy detector over 16-bit PCM frames with a sliding
//! vote window and silence-based segmentation. A shared singleton: per
//! session state is keyed by session id and dropped on release. Model-based
//! detectors (Silero and friends) implement the same port out of tree.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

use voxline_config::AudioConfig;
use voxline_core::{CoreError, ListenMode, SessionContext, VadPort, VadVerdict};

/// Sliding vote window length in frames.
const VOTE_WINDOW: usize = 5;

struct DetectorState {
    window: VecDeque<bool>,
    in_segment: bool,
    last_voice: Instant,
    segment_start: Instant,
}

impl DetectorState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            window: VecDeque::with_capacity(VOTE_WINDOW),
            in_segment: false,
            last_voice: now,
            segment_start: now,
        }
    }
}

/// Energy-based voice activity detection.
pub struct EnergyVad {
    config: AudioConfig,
    states: Mutex<HashMap<String, DetectorState>>,
}

impl EnergyVad {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// RMS level of a 16-bit little-endian PCM frame, in dBFS.
    fn frame_db(frame: &[u8]) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for chunk in frame.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
            sum += sample * sample;
            count += 1;
        }
        if count == 0 {
            return f32::NEG_INFINITY;
        }
        let rms = (sum / count as f64).sqrt();
        (20.0 * (rms + 1e-10).log10()) as f32
    }
}

impl VadPort for EnergyVad {
    fn detect(&self, context: &SessionContext, frame: &[u8]) -> Result<VadVerdict, CoreError> {
        // Manual mode: the client brackets speech through listen messages,
        // every frame is treated as voiced and buffered.
        if context.listen_mode() == ListenMode::Manual {
            return Ok(VadVerdict {
                is_voice: true,
                segment_start: false,
                segment_end: false,
            });
        }

        let db = Self::frame_db(frame);

        let mut states = self.states.lock();
        let state = states
            .entry(context.session_id.clone())
            .or_insert_with(DetectorState::new);

        // Hysteresis: between the thresholds the previous frame's verdict
        // carries over.
        let frame_voice = if db >= self.config.vad_threshold_db {
            true
        } else if db <= self.config.vad_threshold_low_db {
            false
        } else {
            context.last_is_voice()
        };
        context.set_last_is_voice(frame_voice);

        if state.window.len() == VOTE_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(frame_voice);
        let votes = state.window.iter().filter(|v| **v).count();
        let is_voice = votes >= self.config.vad_window_frames.min(VOTE_WINDOW);

        let mut verdict = VadVerdict {
            is_voice,
            segment_start: false,
            segment_end: false,
        };
        let now = Instant::now();

        if is_voice {
            context.set_client_have_voice(true);
            context.touch_activity();
            state.last_voice = now;
            if !state.in_segment {
                state.in_segment = true;
                state.segment_start = now;
                verdict.segment_start = true;
                tracing::debug!(session_id = %context.session_id, db, "speech segment opened");
            } else if now.duration_since(state.segment_start).as_millis() as u64
                >= self.config.max_segment_ms
            {
                // Cap the segment length so a noisy room cannot hold the
                // pipeline open forever.
                state.in_segment = false;
                state.window.clear();
                context.set_client_voice_stop(true);
                verdict.segment_end = true;
                tracing::debug!(session_id = %context.session_id, "segment closed at max duration");
            }
        } else if state.in_segment
            && now.duration_since(state.last_voice).as_millis() as u64
                >= self.config.silence_window_ms
        {
            state.in_segment = false;
            state.window.clear();
            context.set_client_voice_stop(true);
            verdict.segment_end = true;
            tracing::debug!(session_id = %context.session_id, "speech segment closed");
        }

        Ok(verdict)
    }

    fn release(&self, session_id: &str) {
        self.states.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::AgentConfig;

    fn context() -> SessionContext {
        SessionContext::new("s1", None, None, "127.0.0.1", false, AgentConfig::default())
    }

    /// PCM frame at roughly the requested amplitude (0.0..1.0).
    fn pcm_frame(amplitude: f32, samples: usize) -> Vec<u8> {
        let value = (amplitude * i16::MAX as f32) as i16;
        let mut frame = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let sample = if i % 2 == 0 { value } else { -value };
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        frame
    }

    fn config() -> AudioConfig {
        let mut config = AudioConfig::default();
        config.silence_window_ms = 0; // close immediately on silence in tests
        config
    }

    #[test]
    fn loud_frames_open_a_segment() {
        let vad = EnergyVad::new(config());
        let ctx = context();

        let mut started = false;
        for _ in 0..5 {
            let verdict = vad.detect(&ctx, &pcm_frame(0.5, 320)).unwrap();
            started |= verdict.segment_start;
        }
        assert!(started);
        assert!(ctx.client_have_voice());
    }

    #[test]
    fn silence_after_voice_closes_the_segment() {
        let vad = EnergyVad::new(config());
        let ctx = context();

        for _ in 0..5 {
            vad.detect(&ctx, &pcm_frame(0.5, 320)).unwrap();
        }
        let mut ended = false;
        for _ in 0..6 {
            let verdict = vad.detect(&ctx, &pcm_frame(0.0, 320)).unwrap();
            ended |= verdict.segment_end;
        }
        assert!(ended);
        assert!(ctx.client_voice_stop());
    }

    #[test]
    fn segment_end_requires_a_prior_segment_start() {
        let vad = EnergyVad::new(config());
        let ctx = context();

        for _ in 0..10 {
            let verdict = vad.detect(&ctx, &pcm_frame(0.0, 320)).unwrap();
            assert!(!verdict.segment_end);
            assert!(!verdict.segment_start);
        }
    }

    #[test]
    fn manual_mode_marks_everything_voiced() {
        let vad = EnergyVad::new(config());
        let ctx = context();
        ctx.set_listen_mode(ListenMode::Manual);

        let verdict = vad.detect(&ctx, &pcm_frame(0.0, 320)).unwrap();
        assert!(verdict.is_voice);
        assert!(!verdict.segment_start);
    }

    #[test]
    fn release_drops_session_state() {
        let vad = EnergyVad::new(config());
        let ctx = context();
        vad.detect(&ctx, &pcm_frame(0.5, 320)).unwrap();
        assert!(!vad.states.lock().is_empty());
        vad.release("s1");
        assert!(vad.states.lock().is_empty());
    }
}
