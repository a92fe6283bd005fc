use crate::error::{PipelineError, PipelineResult};
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Longest recording accepted when no other limit is configured.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);

/// A fully decoded recording, still at its native rate and channel layout.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved 16-bit samples (L, R, L, R, ... for stereo)
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Number of sample frames (one sample per channel each).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Build a probe hint from a file extension (`webm`, `.mp3`) or a MIME type (`audio/ogg`).
fn hint_from(format_hint: Option<&str>) -> Hint {
    let mut hint = Hint::new();
    if let Some(raw) = format_hint.map(str::trim).filter(|h| !h.is_empty()) {
        if raw.contains('/') {
            // "audio/webm;codecs=opus" → "audio/webm"
            let mime = raw.split(';').next().unwrap_or(raw).trim();
            hint.mime_type(mime);
        } else {
            hint.with_extension(raw.trim_start_matches('.'));
        }
    }
    hint
}

/// Decode a staged upload from disk.
///
/// With `max_duration` set, decoding stops with [`PipelineError::Decode`] as
/// soon as the recording runs past it.
pub fn decode_file(
    path: &Path,
    format_hint: Option<&str>,
    max_duration: Option<Duration>,
) -> PipelineResult<DecodedAudio> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    decode_source(Box::new(file), format_hint, max_duration)
}

/// Decode an in-memory recording.
#[cfg(test)]
pub fn decode_bytes(bytes: Vec<u8>, format_hint: Option<&str>) -> PipelineResult<DecodedAudio> {
    if bytes.is_empty() {
        return Err(PipelineError::Decode("recording is empty".to_string()));
    }
    decode_source(Box::new(std::io::Cursor::new(bytes)), format_hint, None)
}

/// Probe, decode every packet of the first audio track and collect 16-bit samples.
///
/// Corrupt packets are skipped; anything that stops us from finding an audio
/// track at all is a [`PipelineError::Decode`]. Samples are stored as 16-bit
/// whatever the source depth, since that is the canonical format anyway.
fn decode_source(
    source: Box<dyn MediaSource>,
    format_hint: Option<&str>,
    max_duration: Option<Duration>,
) -> PipelineResult<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());
    let hint = hint_from(format_hint);

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::Decode(format!("unsupported or corrupt container: {}", e)))?;

    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::Decode("no audio track found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples: Vec<i16> = Vec::new();
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(PipelineError::Decode(format!("error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                skipped_packets += 1;
                warn!(reason = %msg, "skipping corrupted packet");
                continue;
            }
            Err(e) => return Err(PipelineError::Decode(format!("decode error: {}", e))),
        };

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count() as u16;
        if channels == 0 {
            channels = packet_channels;
        } else if packet_channels != channels {
            return Err(PipelineError::Decode(format!(
                "channel layout changed mid-stream ({} → {})",
                channels, packet_channels
            )));
        }
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }

        if decoded.frames() == 0 {
            continue;
        }

        // Compressed input can expand by orders of magnitude, so the cap is
        // checked before the samples are kept.
        if let Some(limit) = max_duration {
            let max_frames = (limit.as_secs_f64() * sample_rate as f64).ceil() as usize;
            let frames_so_far = samples.len() / channels as usize;
            if frames_so_far + decoded.frames() > max_frames {
                return Err(PipelineError::Decode(format!(
                    "recording is longer than the {:.1} s limit",
                    limit.as_secs_f64()
                )));
            }
        }

        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if sample_rate == 0 || channels == 0 {
        return Err(PipelineError::Decode(
            "stream does not declare a sample rate or channel layout".to_string(),
        ));
    }

    debug!(
        sample_rate,
        channels,
        samples = samples.len(),
        skipped_packets,
        "decoded recording"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
