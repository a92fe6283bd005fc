//! # Audio Normalization
//!
//! Turns an uploaded recording in whatever container/codec the browser produced
//! into the canonical waveform every later stage assumes.
//!
//! ## Components:
//! - **decoder**: symphonia-based decoding of any supported container/codec
//! - **waveform**: the canonical 16-bit PCM WAV file, written and read with `wav`
//! - **store**: where staged uploads and canonical waveforms live on disk
//! - **normalizer**: upload bytes → canonical waveform, with cleanup of the staged upload
//!
//! ## Canonical Format:
//! - **Encoding**: 16-bit signed PCM, little-endian, RIFF/WAVE container
//! - **Channels**: whatever the source had (no downmix here)
//! - **Sample Rate**: whatever the source had (no resampling)
//!
//! 24-bit and float sources are reduced to 16 bits while decoding.

pub mod decoder;
pub mod normalizer;
pub mod store;
pub mod waveform;

pub use decoder::DecodedAudio;
pub use normalizer::normalize;
pub use store::{SlotMode, WaveformSlot, WaveformStore};
pub use waveform::{CanonicalWaveform, MonoAudio};
