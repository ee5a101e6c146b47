//! Per-call turn detector.

use super::config::VadTuning;

/// Outcome of feeding one frame's energy into the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// Caller is not speaking; nothing to do.
    Idle,
    /// A speech segment is open and still accumulating.
    Accumulating,
    /// Segment closed and met the minimums: signal end-of-turn to the AI leg.
    Commit,
    /// Segment closed but was too short or too quiet: drop it silently.
    Discard,
}

/// Hysteresis state machine over per-frame RMS energy.
///
/// One detector instance lives inside each call session. All counters reset
/// atomically whenever a segment closes, whether it committed or was
/// discarded.
#[derive(Debug)]
pub struct TurnDetector {
    tuning: VadTuning,
    /// Caller currently inside a speech segment
    speaking: bool,
    /// Consecutive frames below the silence threshold
    silence_run: u32,
    /// Frames at or above the speech threshold in this segment
    active_frames: u32,
    /// Sum of frame energies across the segment
    energy_sum: f64,
    /// Frames observed since the last commit or discard
    frames_since_commit: u32,
}

impl TurnDetector {
    pub fn new(tuning: VadTuning) -> Self {
        Self {
            tuning,
            speaking: false,
            silence_run: 0,
            active_frames: 0,
            energy_sum: 0.0,
            frames_since_commit: 0,
        }
    }

    /// Whether a speech segment is currently open.
    pub fn speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one frame's energy; returns what the session should do.
    pub fn push_frame(&mut self, energy: f64) -> FrameVerdict {
        if !self.speaking {
            // Onset requires the higher speech threshold, not the silence one
            if energy < self.tuning.speech_threshold {
                return FrameVerdict::Idle;
            }
            self.speaking = true;
        }

        self.frames_since_commit += 1;
        self.energy_sum += energy;

        if energy >= self.tuning.speech_threshold {
            self.active_frames += 1;
        }
        if energy < self.tuning.silence_threshold {
            self.silence_run += 1;
        } else {
            self.silence_run = 0;
        }

        let pause_ended = self.silence_run >= self.tuning.silence_frame_limit;
        let ceiling_hit = self.frames_since_commit >= self.tuning.forced_commit_frames;
        if !pause_ended && !ceiling_hit {
            return FrameVerdict::Accumulating;
        }

        self.evaluate_segment()
    }

    /// Close the current segment and decide commit vs. discard.
    fn evaluate_segment(&mut self) -> FrameVerdict {
        let frames = self.frames_since_commit.max(1);
        let average_energy = self.energy_sum / frames as f64;
        let commit = self.active_frames >= self.tuning.min_speech_frames
            && average_energy >= self.tuning.min_average_energy;

        self.reset();

        if commit {
            FrameVerdict::Commit
        } else {
            FrameVerdict::Discard
        }
    }

    /// Reset all counters, closing any open segment without a verdict.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.silence_run = 0;
        self.active_frames = 0;
        self.energy_sum = 0.0;
        self.frames_since_commit = 0;
    }
}
