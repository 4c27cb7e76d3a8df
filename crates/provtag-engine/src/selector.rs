use provtag_contracts::provenance::{A111Record, ComfyRecord, NovelAiRecord, ProvenanceRecord};

pub fn select(
    novelai: Option<NovelAiRecord>,
    comfy: Option<ComfyRecord>,
    a111: Option<A111Record>,
) -> ProvenanceRecord {
    if let Some(record) = novelai {
        return ProvenanceRecord::NovelAi(record);
    }
    if let Some(record) = comfy {
        return ProvenanceRecord::Comfy(record);
    }
    match a111 {
        Some(record) => ProvenanceRecord::A111(record),
        None => ProvenanceRecord::NoMetadata,
    }
}
