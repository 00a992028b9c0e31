//! # Audio Acquisition Module
//!
//! Turns an analog microphone into a WAV object on storage.
//!
//! ## Key Components:
//! - **Analog inputs**: raw W-bit readings and the rescale to 16-bit PCM
//! - **Sample Clock**: one reading per slot of a fixed-period clock
//! - **WAV Framer**: placeholder header, sequential PCM, back-patched sizes
//!
//! ## Audio Format:
//! - **Sample Rate**: configurable (8 kHz by default)
//! - **Bit Depth**: 16-bit PCM, little-endian signed
//! - **Channels**: Mono (1 channel)

pub mod adc;      // Analog inputs and PCM rescale
pub mod sampler;  // Deadline-scheduled sample clock
pub mod wav;      // WAV header framing and back-patching
