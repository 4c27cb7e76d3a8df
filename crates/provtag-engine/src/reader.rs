use ed25519_dalek::VerifyingKey;
use provtag_contracts::blob::ImageBlob;
use provtag_contracts::provenance::ProvenanceRecord;
use provtag_contracts::settings::Settings;
use tracing::{debug, warn};

use crate::container::read_text_fields;
use crate::error::DecodeResult;
use crate::novelai::parse_verify_key;
use crate::selector::select;
use crate::{a111, comfy, novelai};

#[derive(Debug, Clone, Default)]
pub struct MetadataReader {
    verify_key: Option<VerifyingKey>,
}

impl MetadataReader {
    pub fn new(verify_key: Option<VerifyingKey>) -> Self {
        Self { verify_key }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let verify_key = settings
            .novelai_verify_key
            .as_deref()
            .and_then(|encoded| match parse_verify_key(encoded) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "NovelAI signature checks disabled");
                    None
                }
            });
        Self { verify_key }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.verify_key.is_some()
    }

    pub fn read(&self, blob: &ImageBlob) -> ProvenanceRecord {
        let fields = absorb("text fields", read_text_fields(blob)).unwrap_or_default();
        let novelai = absorb(
            "novelai",
            novelai::decode(blob, &fields, self.verify_key.as_ref()),
        );
        let comfy = absorb("comfy", comfy::decode(&fields));
        let a111 = absorb("a111", a111::decode(&fields));
        select(novelai, comfy, a111)
    }
}

fn absorb<T>(decoder: &str, result: DecodeResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(decoder, error = %err, "decoder produced nothing");
            None
        }
    }
}
