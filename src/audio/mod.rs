//! # Audio Relay Module
//!
//! Plays a remote call's live audio on the local output device.
//!
//! ## Key Components:
//! - **Sample Converter** (`convert`): 16-bit PCM frames to normalized floats
//! - **Playback Sink** (`playback`): output device context and non-blocking sample sink
//! - **Relay Session** (`session`): socket, conversion, and playback lifecycle
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (must match the remote feed, no resampling)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Output**: 2 channels, mono samples duplicated

// Listen feed socket handling is in src/websocket.rs at the root level
pub mod convert;      // PCM decoding and float conversion
pub mod playback;     // Output device and playback sink
pub mod session;      // Relay session state machine
