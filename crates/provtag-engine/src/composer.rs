//! Turns inference output and the selected provenance record into chat blocks.

use provtag_contracts::inference::InferenceResult;
use provtag_contracts::provenance::{sanitize_tag, ProvenanceRecord};
use provtag_contracts::report::{Block, Report};

const TEXT: &str = "txt";

pub fn compose(inference: &InferenceResult, provenance: &ProvenanceRecord) -> Report {
    let mut report = Report::new();
    report.push(Block::heading("Tags"));
    let tags = inference.tags_text();
    if provenance.is_found() {
        report.push(Block::quote(tags));
    } else {
        report.push(Block::code(tags, TEXT));
    }

    if !inference.characters.is_empty() {
        report.push(Block::heading("Characters"));
        report.push(Block::code(inference.characters_text(), TEXT));
    }

    match provenance {
        ProvenanceRecord::NoMetadata => report.push(Block::heading("No Metadata")),
        ProvenanceRecord::A111(record) => {
            report.push(Block::code(record.prompt.as_str(), TEXT));
            if !record.negative_prompt.is_empty() {
                report.push(Block::heading("Negative Prompt"));
                report.push(Block::quote(record.negative_prompt.as_str()));
            }
        }
        ProvenanceRecord::Comfy(record) => report.push(Block::code(record.pretty(), TEXT)),
        ProvenanceRecord::NovelAi(record) => {
            report.push(Block::plain(format!("Mode: {}", record.mode)));
            report.push(Block::code(record.prompt.as_str(), TEXT));
            if !record.negative_prompt.is_empty() {
                report.push(Block::heading("Negative Prompt"));
                report.push(Block::code(record.negative_prompt.as_str(), TEXT));
            }
            for value in [&record.model, &record.source] {
                let tag = sanitize_tag(value);
                if !tag.is_empty() {
                    report.push(Block::heading(format!("#{tag}")));
                }
            }
            report.push(Block::heading(format!(
                "Signed by NovelAI: {}",
                yes_no(record.signed)
            )));
            report.push(Block::heading(format!(
                "Has Latent: {}",
                yes_no(record.has_latent)
            )));
            report.push(Block::code(record.metadata_pretty(), "json"));
        }
    }
    report
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use provtag_contracts::inference::InferenceResult;
    use provtag_contracts::provenance::{A111Record, ComfyRecord, NovelAiRecord, ProvenanceRecord};
    use provtag_contracts::report::Block;
    use serde_json::json;

    use super::compose;

    fn inference(tags: &str, characters: &[&str]) -> InferenceResult {
        InferenceResult::from_tag_string(tags, characters.iter().copied())
    }

    #[test]
    fn no_metadata_uses_code_block_for_tags() {
        let report = compose(&inference("1girl,solo", &[]), &ProvenanceRecord::NoMetadata);
        assert_eq!(
            report.blocks(),
            &[
                Block::heading("Tags"),
                Block::code("1girl,solo", "txt"),
                Block::heading("No Metadata"),
            ]
        );
    }

    #[test]
    fn a111_blocks_follow_tags() {
        let record = ProvenanceRecord::A111(A111Record {
            prompt: "masterpiece".to_string(),
            negative_prompt: "blurry".to_string(),
            generation_info: "20,Sampler: Euler".to_string(),
        });
        let report = compose(&inference("1girl,solo", &[]), &record);
        assert_eq!(
            report.blocks(),
            &[
                Block::heading("Tags"),
                Block::quote("1girl,solo"),
                Block::code("masterpiece", "txt"),
                Block::heading("Negative Prompt"),
                Block::quote("blurry"),
            ]
        );
    }

    #[test]
    fn characters_section_only_when_present() {
        let record = ProvenanceRecord::A111(A111Record {
            prompt: "castle".to_string(),
            ..A111Record::default()
        });
        let report = compose(&inference("1girl", &["hatsune_miku", "kagamine_rin"]), &record);
        assert_eq!(
            report.blocks(),
            &[
                Block::heading("Tags"),
                Block::quote("1girl"),
                Block::heading("Characters"),
                Block::code("hatsune_miku,kagamine_rin", "txt"),
                Block::code("castle", "txt"),
            ]
        );
    }

    #[test]
    fn comfy_workflow_is_pretty_printed() {
        let record = ProvenanceRecord::Comfy(ComfyRecord {
            workflow: json!({"3": {"class_type": "KSampler"}}),
        });
        let report = compose(&inference("scenery", &[]), &record);
        let Some(Block::CodeBlock { text, language }) = report.blocks().last() else {
            panic!("expected a trailing code block");
        };
        assert_eq!(language, "txt");
        assert!(text.contains("\n  \"3\": {"));
    }

    #[test]
    fn novelai_blocks_are_complete() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("Software".to_string(), json!("NovelAI"));
        let record = ProvenanceRecord::NovelAi(NovelAiRecord {
            prompt: "1girl, solo".to_string(),
            negative_prompt: "lowres".to_string(),
            model: "Stable Diffusion XL".to_string(),
            source: "Stable Diffusion XL C1E1DE52".to_string(),
            mode: "Img2Img+VibeTransfer".to_string(),
            signed: true,
            has_latent: false,
            metadata,
        });
        let report = compose(&inference("1girl,solo", &[]), &record);
        assert_eq!(
            report.blocks(),
            &[
                Block::heading("Tags"),
                Block::quote("1girl,solo"),
                Block::plain("Mode: Img2Img+VibeTransfer"),
                Block::code("1girl, solo", "txt"),
                Block::heading("Negative Prompt"),
                Block::code("lowres", "txt"),
                Block::heading("#stable_diffusion_xl"),
                Block::heading("#stable_diffusion_xl_c1e1de52"),
                Block::heading("Signed by NovelAI: yes"),
                Block::heading("Has Latent: no"),
                Block::code("{\n  \"Software\": \"NovelAI\"\n}", "json"),
            ]
        );
    }

    #[test]
    fn novelai_without_negative_or_source_skips_those_blocks() {
        let record = ProvenanceRecord::NovelAi(NovelAiRecord {
            prompt: "cat".to_string(),
            mode: "Text2Image".to_string(),
            ..NovelAiRecord::default()
        });
        let report = compose(&inference("", &[]), &record);
        let texts: Vec<&str> = report.blocks().iter().map(Block::text).collect();
        assert!(!texts.contains(&"Negative Prompt"));
        assert!(!texts.iter().any(|text| text.starts_with('#')));
        assert!(texts.contains(&"Signed by NovelAI: no"));
        assert_eq!(report.blocks()[1], Block::quote(""));
    }
}
