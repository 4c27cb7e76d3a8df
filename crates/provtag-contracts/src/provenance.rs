use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceRecord {
    NoMetadata,
    A111(A111Record),
    Comfy(ComfyRecord),
    NovelAi(NovelAiRecord),
}

impl ProvenanceRecord {
    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NoMetadata)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoMetadata => "none",
            Self::A111(_) => "a111",
            Self::Comfy(_) => "comfy",
            Self::NovelAi(_) => "novelai",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct A111Record {
    pub prompt: String,
    pub negative_prompt: String,
    pub generation_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComfyRecord {
    pub workflow: Value,
}

impl ComfyRecord {
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.workflow).unwrap_or_else(|_| self.workflow.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NovelAiRecord {
    pub prompt: String,
    pub negative_prompt: String,
    pub model: String,
    pub source: String,
    pub mode: String,
    pub signed: bool,
    pub has_latent: bool,
    pub metadata: Map<String, Value>,
}

impl NovelAiRecord {
    pub fn metadata_pretty(&self) -> String {
        serde_json::to_string_pretty(&Value::Object(self.metadata.clone())).unwrap_or_default()
    }
}

pub fn sanitize_tag(value: &str) -> String {
    value.trim().to_lowercase().replace(' ', "_")
}
