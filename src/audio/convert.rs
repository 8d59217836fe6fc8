//! # PCM Sample Conversion
//!
//! Turns binary listen-feed messages into playable samples.
//!
//! ## Audio Format Requirements:
//! - **Encoding**: Little-endian signed 16-bit integers
//! - **Framing**: One socket message per audio chunk
//! - **Output**: 32-bit floats in the range [-1.0, 1.0)

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Scale factor between the i16 range and the normalized float range.
const PCM_SCALE: f32 = 32768.0;

/// Reasons a binary frame cannot be decoded into samples.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Audio frame length must be even for 16-bit samples, got {0} bytes")]
    OddLength(usize),
}

/// Decode one binary message into 16-bit samples.
///
/// ## Validation:
/// An odd byte count means the frame is truncated or corrupted. The frame is
/// rejected instead of guessing which byte to discard.
pub fn decode_frame(data: &[u8]) -> Result<Vec<i16>, FrameError> {
    if data.len() % 2 != 0 {
        return Err(FrameError::OddLength(data.len()));
    }

    let mut samples = vec![0i16; data.len() / 2];
    LittleEndian::read_i16_into(data, &mut samples);
    Ok(samples)
}

/// Convert 16-bit PCM samples to 32-bit floats.
///
/// ## Conversion:
/// Divides by 32768 so the output stays within [-1.0, 0.99997] without clamping.
/// The input is never modified; a new buffer of the same length is returned.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / PCM_SCALE).collect()
}

/// Decode and convert a binary frame in one step.
pub fn frame_to_float(data: &[u8]) -> Result<Vec<f32>, FrameError> {
    decode_frame(data).map(|samples| pcm_to_float(&samples))
}
