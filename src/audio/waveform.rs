#![allow(deprecated)]

use crate::audio::decoder::DecodedAudio;
use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Bit depth of every canonical waveform.
pub const CANONICAL_BITS_PER_SAMPLE: u16 = 16;

/// A canonical waveform that has been written to disk.
///
/// Written once by the normalizer, read once by the feature extractor,
/// never modified in between.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalWaveform {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frames: usize,
}

impl CanonicalWaveform {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames as u64 * 1000 / self.sample_rate as u64
    }
}

/// Write decoded audio as a 16-bit PCM WAV at `path`.
///
/// The file is first written next to its destination and then renamed into
/// place, so a reader never observes a half-written waveform.
pub fn write_canonical(path: &Path, audio: &DecodedAudio) -> PipelineResult<CanonicalWaveform> {
    let header = wav::Header::new(
        wav::WAV_FORMAT_PCM,
        audio.channels,
        audio.sample_rate,
        CANONICAL_BITS_PER_SAMPLE,
    );

    let partial = path.with_extension("wav.partial");
    let write_result = File::create(&partial).and_then(|mut file| {
        wav::write(header, &wav::BitDepth::Sixteen(audio.samples.clone()), &mut file)?;
        file.sync_all()
    });
    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&partial);
        return Err(PipelineError::io(&partial, e));
    }
    std::fs::rename(&partial, path).map_err(|e| PipelineError::io(path, e))?;

    Ok(CanonicalWaveform {
        path: path.to_path_buf(),
        sample_rate: audio.sample_rate,
        channels: audio.channels,
        bits_per_sample: CANONICAL_BITS_PER_SAMPLE,
        frames: audio.frames(),
    })
}

/// Result of reading a waveform and mixing it down to one channel.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Native sample rate of the file
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Read a PCM WAV file into mono f32 samples.
///
/// Accepts 8/16/24-bit integer and 32-bit float data, averages all channels
/// and keeps the stored sample rate. Every failure is reported as
/// [`PipelineError::FeatureExtraction`] since this is the extractor's input.
pub fn read_mono(path: &Path) -> PipelineResult<MonoAudio> {
    let mut file = File::open(path).map_err(|e| {
        PipelineError::FeatureExtraction(format!("cannot open {}: {}", path.display(), e))
    })?;

    let (header, data) = wav::read(&mut file).map_err(|e| {
        PipelineError::FeatureExtraction(format!("{} is not a readable WAV: {}", path.display(), e))
    })?;

    if header.sampling_rate == 0 {
        return Err(PipelineError::FeatureExtraction(
            "waveform declares a sample rate of 0".to_string(),
        ));
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(v) => v.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok(MonoAudio {
        samples: mix_to_mono(&interleaved, header.channel_count.max(1) as usize),
        sample_rate: header.sampling_rate,
    })
}

/// Average interleaved channels into one.
fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
