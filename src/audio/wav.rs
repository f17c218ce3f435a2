//! WAV framing for transcription uploads.
//!
//! Wraps a raw PCM byte run in a canonical mono 16kHz 16-bit little-endian
//! WAV header, the format the transcription collaborator expects.

use crate::defaults::SAMPLE_RATE;
use crate::error::{FactlineError, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// The canonical spec for every chunk this pipeline produces.
pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Wrap raw little-endian 16-bit mono PCM bytes in a WAV container.
///
/// The output is the 44-byte canonical header followed by the input bytes
/// unchanged. A trailing odd byte is rejected: chunks are whole samples.
pub fn frame_wav(pcm: &[u8]) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(FactlineError::Ingest {
            message: format!("PCM byte run has odd length {}", pcm.len()),
        });
    }

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer =
            WavWriter::new(&mut cursor, wav_spec()).map_err(|e| FactlineError::Ingest {
                message: format!("Failed to create WAV writer: {e}"),
            })?;
        for sample in pcm.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            writer
                .write_sample(value)
                .map_err(|e| FactlineError::Ingest {
                    message: format!("Failed to write sample: {e}"),
                })?;
        }
        writer.finalize().map_err(|e| FactlineError::Ingest {
            message: format!("Failed to finalize WAV: {e}"),
        })?;
    }
    Ok(cursor.into_inner())
}
