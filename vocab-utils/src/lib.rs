pub mod media;
pub mod text_cleanup;

use serde::{Deserialize, Deserializer, Serialize};

pub type WordId = u64;

/// A single vocabulary item as served by the content server.
///
/// Words are immutable once fetched. The category a word was selected from is
/// carried next to it (see the engine's `SelectedTarget`) rather than stamped
/// onto the word itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct Word {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: WordId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default)]
    pub audio_files: Vec<AudioFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub part_of_speech: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammatical_gender: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub similar_word_id: Option<WordId>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub wordset_ids: Vec<u64>,
    #[serde(default)]
    pub option_groups: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub option_blocked_ids: Vec<WordId>,
    #[serde(default)]
    pub all_categories: Vec<String>,
}

impl Word {
    /// The text shown on a text answer card: the translation label when there
    /// is one, otherwise the title.
    pub fn display_text(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.title
        } else {
            &self.label
        }
    }

    pub fn gender(&self) -> Option<GrammaticalGender> {
        self.grammatical_gender
            .as_deref()
            .and_then(GrammaticalGender::parse)
    }

    /// Whether either word names the other as its "similar" word.
    pub fn is_similar_to(&self, other: &Word) -> bool {
        self.similar_word_id == Some(other.id) || other.similar_word_id == Some(self.id)
    }

    pub fn blocks(&self, other: &Word) -> bool {
        self.option_blocked_ids.contains(&other.id) || other.option_blocked_ids.contains(&self.id)
    }

    pub fn shares_option_group(&self, other: &Word) -> bool {
        self.option_groups
            .iter()
            .any(|group| other.option_groups.contains(group))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct AudioFile {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub recording_type: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub speaker_user_id: Option<u64>,
}

/// What the learner is shown or played as the question.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    #[default]
    Audio,
    Image,
    #[serde(alias = "text_title", alias = "text_translation")]
    Text,
}

/// What the answer cards look like.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    #[default]
    Image,
    #[serde(alias = "text_title", alias = "text_translation")]
    Text,
    #[serde(alias = "text_and_audio")]
    TextAudio,
    Audio,
}

impl OptionType {
    pub fn is_text_mode(&self) -> bool {
        matches!(self, OptionType::Text | OptionType::TextAudio)
    }

    pub fn display_mode(&self) -> &'static str {
        match self {
            OptionType::Image => "image",
            OptionType::Text => "text",
            OptionType::TextAudio => "text_audio",
            OptionType::Audio => "audio",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<u64>,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default)]
    pub prompt_type: PromptType,
    #[serde(default)]
    pub option_type: OptionType,
    #[serde(default = "default_true")]
    pub learning_supported: bool,
    #[serde(default)]
    pub gender_supported: bool,
}

fn default_true() -> bool {
    true
}

impl CategoryConfig {
    pub fn requires_audio(&self) -> bool {
        self.prompt_type == PromptType::Audio
            || matches!(self.option_type, OptionType::Audio | OptionType::TextAudio)
    }

    pub fn requires_image(&self) -> bool {
        self.prompt_type == PromptType::Image || self.option_type == OptionType::Image
    }

    /// Label shown above the cards: the translated name when present.
    pub fn display_name(&self) -> &str {
        self.translation
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum GrammaticalGender {
    Masculine,
    Feminine,
    Neuter,
    Other(String),
}

impl GrammaticalGender {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let gender = match normalized.as_str() {
            "" => return None,
            "m" | "masc" | "masculine" => GrammaticalGender::Masculine,
            "f" | "fem" | "feminine" => GrammaticalGender::Feminine,
            "n" | "neut" | "neuter" => GrammaticalGender::Neuter,
            _ => GrammaticalGender::Other(normalized),
        };
        Some(gender)
    }

    pub fn label(&self) -> &str {
        match self {
            GrammaticalGender::Masculine => "masculine",
            GrammaticalGender::Feminine => "feminine",
            GrammaticalGender::Neuter => "neuter",
            GrammaticalGender::Other(label) => label,
        }
    }
}

impl std::fmt::Display for GrammaticalGender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// The content server is not consistent about ids: they show up as numbers,
// numeric strings, empty strings, or 0 for "none".
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Signed(i64),
    Text(String),
}

impl RawId {
    fn into_id(self) -> Option<u64> {
        match self {
            RawId::Number(0) => None,
            RawId::Number(n) => Some(n),
            RawId::Signed(n) => u64::try_from(n).ok().filter(|n| *n > 0),
            RawId::Text(s) => s.trim().parse::<u64>().ok().filter(|n| *n > 0),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?
        .into_id()
        .ok_or_else(|| serde::de::Error::custom("expected a positive id"))
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.and_then(RawId::into_id))
}

fn deserialize_id_list<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawId>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw.into_iter().filter_map(RawId::into_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_accepts_string_ids() {
        let word: Word = serde_json::from_value(serde_json::json!({
            "id": "42",
            "title": "kedi",
            "similar_word_id": "",
            "option_blocked_ids": ["7", 8, ""],
        }))
        .unwrap();
        assert_eq!(word.id, 42);
        assert_eq!(word.similar_word_id, None);
        assert_eq!(word.option_blocked_ids, vec![7, 8]);
    }

    #[test]
    fn test_word_rejects_missing_id() {
        let result: Result<Word, _> = serde_json::from_value(serde_json::json!({ "id": "" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_display_text_prefers_label() {
        let mut word = Word {
            id: 1,
            title: "chat".into(),
            label: "cat".into(),
            ..Default::default()
        };
        assert_eq!(word.display_text(), "cat");
        word.label = "  ".into();
        assert_eq!(word.display_text(), "chat");
    }

    #[test]
    fn test_gender_parsing() {
        assert_eq!(GrammaticalGender::parse("M"), Some(GrammaticalGender::Masculine));
        assert_eq!(GrammaticalGender::parse(" fem "), Some(GrammaticalGender::Feminine));
        assert_eq!(GrammaticalGender::parse("neuter"), Some(GrammaticalGender::Neuter));
        assert_eq!(
            GrammaticalGender::parse("Common"),
            Some(GrammaticalGender::Other("common".into()))
        );
        assert_eq!(GrammaticalGender::parse(""), None);
    }

    #[test]
    fn test_category_requirements() {
        let category: CategoryConfig = serde_json::from_value(serde_json::json!({
            "name": "Animals",
            "prompt_type": "audio",
            "option_type": "text_title",
        }))
        .unwrap();
        assert!(category.requires_audio());
        assert!(!category.requires_image());
        assert!(category.option_type.is_text_mode());
        assert!(category.learning_supported);
        assert!(!category.gender_supported);
    }

    #[test]
    fn test_similar_and_blocked_are_symmetric() {
        let a = Word {
            id: 1,
            similar_word_id: Some(2),
            ..Default::default()
        };
        let b = Word {
            id: 2,
            option_blocked_ids: vec![3],
            ..Default::default()
        };
        let c = Word {
            id: 3,
            ..Default::default()
        };
        assert!(b.is_similar_to(&a));
        assert!(c.blocks(&b));
        assert!(!a.blocks(&c));
    }
}
