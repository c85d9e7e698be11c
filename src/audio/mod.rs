//! # Audio Module
//!
//! Per-guild playback engine for Guild Music.
//!
//! Every track flows through two external processes:
//!
//! ```text
//! yt-dlp (stdout) ──relay──▶ ffmpeg (stdin → s16le stdout) ──▶ voice sink
//!        stderr ─┐                  stderr ─┐
//!                └──── logs ◀───────────────┴── time= → playback position
//! ```
//!
//! ## Components
//!
//! ### [`args`] - Argument builders
//! - Pure functions producing the yt-dlp and FFmpeg command lines
//! - Volume and the active filter chain become a single `-filter:a` expression
//!
//! ### [`resolver`] - Track resolution
//! - `yt-dlp --print` with a hard timeout; free text becomes a `ytsearch:` query
//!
//! ### [`queue`] - Queue & loop modes
//! - Lock-protected FIFO with loop-mode reconciliation
//!
//! ### [`relay`] - Backpressure-aware copy
//! - Buffers at most ten chunks while paused, then stops reading upstream
//!
//! ### [`pipeline`] / [`engine`] - Orchestration
//! - One playback task per engine, one cancellation scope per track
//!
//! ### [`registry`] - Engine registry
//! - At most one engine per (guild, kind)
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed little-endian from FFmpeg
//! - **Channels**: Stereo (2 channels)

pub mod args;
pub mod engine;
pub mod filters;
pub mod pipeline;
pub mod process_log;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod voice;
