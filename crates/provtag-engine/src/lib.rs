//! Provenance metadata decoding, tagger client and report pipeline.

pub mod a111;
pub mod comfy;
pub mod composer;
pub mod container;
pub mod error;
pub mod json_repair;
pub mod novelai;
pub mod orchestrator;
pub mod reader;
pub mod selector;
pub mod stealth;
pub mod tagger;

#[cfg(test)]
mod fixtures;

pub use composer::compose;
pub use error::{DecodeError, DecodeResult};
pub use orchestrator::{ImageDownloader, InboundFile, Orchestrator, Reply};
pub use reader::MetadataReader;
pub use selector::select;
pub use tagger::{TagInference, WdTaggerClient};
