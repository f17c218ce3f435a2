//! Audio ingest: subprocess supervision, PCM chunking and WAV framing.

pub mod backoff;
pub mod chunker;
pub mod supervisor;
pub mod wav;
