use crate::audio::decoder::decode_file;
use crate::audio::store::WaveformSlot;
use crate::audio::waveform::{write_canonical, CanonicalWaveform};
use crate::error::{PipelineError, PipelineResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Convert an uploaded recording into the canonical waveform of `slot`.
///
/// ## Steps:
/// 1. Stage the raw bytes at the slot's upload path
/// 2. Decode them fully with whatever codec matches, giving up once the audio
///    runs past `max_duration`
/// 3. Re-encode as 16-bit PCM WAV at the slot's waveform path
/// 4. Delete the staged upload
///
/// On failure the staged upload may still exist; the caller removes it.
pub fn normalize(
    raw: &[u8],
    format_hint: Option<&str>,
    slot: &WaveformSlot,
    max_duration: Option<Duration>,
) -> PipelineResult<CanonicalWaveform> {
    if raw.is_empty() {
        return Err(PipelineError::Decode("recording is empty".to_string()));
    }

    std::fs::write(&slot.upload_path, raw).map_err(|e| PipelineError::io(&slot.upload_path, e))?;

    let decoded = decode_file(&slot.upload_path, format_hint, max_duration)?;
    if decoded.frames() == 0 {
        return Err(PipelineError::Decode(
            "recording contains no audio frames".to_string(),
        ));
    }

    let waveform = write_canonical(&slot.waveform_path, &decoded)?;

    if let Err(e) = std::fs::remove_file(&slot.upload_path) {
        warn!(path = %slot.upload_path.display(), error = %e, "could not delete staged upload");
    }

    debug!(
        recording_id = %slot.id,
        sample_rate = waveform.sample_rate,
        channels = waveform.channels,
        frames = waveform.frames,
        "recording normalized"
    );

    Ok(waveform)
}
