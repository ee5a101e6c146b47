//! Energy-based voice activity detection and turn-taking.
//!
//! The carrier leg delivers 20ms mu-law frames; this module decides, frame by
//! frame, when the caller has finished a turn so the AI leg can be told to
//! commit its input buffer and respond. Detection is a hysteresis state
//! machine over RMS frame energy:
//!
//! - Speech onset triggers at `speech_threshold`, which sits above
//!   `silence_threshold` so energy hovering at the boundary cannot chatter
//!   the speaking flag.
//! - While speaking, the detector tracks consecutive sub-silence frames,
//!   active speech frames, cumulative energy, and total frames since the
//!   last commit.
//! - A segment is evaluated when the silence run reaches its limit or the
//!   forced-commit frame ceiling is hit. Segments that are too short or too
//!   quiet are discarded silently: transient noise must not fake a turn.
//!
//! All thresholds and frame counts are deployment tuning, not contract; see
//! [`VadTuning`].

pub mod config;
pub mod detector;

pub use config::VadTuning;
pub use detector::{FrameVerdict, TurnDetector};
