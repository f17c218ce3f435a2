//! factline - live fact-check pipeline for broadcast speech.
//!
//! Ingests a live stream, transcribes it in chunks, detects checkable
//! claims, researches them against external evidence providers, and gates
//! every verdict behind explicit human approval before exposing it as an
//! on-air graphics payload.

pub mod activity;
pub mod approval;
pub mod audio;
pub mod claims;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod outputs;
pub mod research;
pub mod run;
pub mod server;
pub mod transcript;
