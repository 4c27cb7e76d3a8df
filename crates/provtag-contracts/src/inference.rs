use indexmap::IndexSet;
use serde::Serialize;

pub const DEFAULT_GENERAL_THRESHOLD: f64 = 0.35;
pub const DEFAULT_CHARACTER_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub general: f64,
    pub character: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            general: DEFAULT_GENERAL_THRESHOLD,
            character: DEFAULT_CHARACTER_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InferenceResult {
    pub tags: Vec<String>,
    pub characters: IndexSet<String>,
}

impl InferenceResult {
    pub fn from_tag_string<I, S>(sorted_general: &str, characters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = sorted_general
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            tags,
            characters: characters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tags_text(&self) -> String {
        self.tags.join(",")
    }

    pub fn characters_text(&self) -> String {
        self.characters
            .iter()
            .map(String::as_str)
            .collect::<Vec<&str>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::{InferenceResult, Thresholds};

    #[test]
    fn tag_string_is_split_and_trimmed() {
        let result = InferenceResult::from_tag_string("1girl, solo,  long_hair ,", Vec::<String>::new());
        assert_eq!(result.tags, vec!["1girl", "solo", "long_hair"]);
        assert_eq!(result.tags_text(), "1girl,solo,long_hair");
    }

    #[test]
    fn characters_keep_first_seen_order() {
        let result = InferenceResult::from_tag_string("", ["remilia_scarlet", "flandre_scarlet", "remilia_scarlet"]);
        assert_eq!(result.characters.len(), 2);
        assert_eq!(result.characters_text(), "remilia_scarlet,flandre_scarlet");
        assert!(result.tags.is_empty());
    }

    #[test]
    fn default_thresholds_match_tagger_defaults() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.general.to_string(), "0.35");
        assert_eq!(thresholds.character.to_string(), "0.75");
    }
}
