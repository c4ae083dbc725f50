//! Page-load configuration for a quiz widget.

use std::collections::HashSet;
use std::time::Duration;

use vocab_utils::{CategoryConfig, WordId};

use crate::selection::StarMode;

pub const ROUNDS_PER_CATEGORY: u32 = 6;
pub const MIN_CORRECT_COUNT: u32 = 3;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 9;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct QuizConfig {
    pub wordset_id: Option<u64>,
    pub wordset_fallback: bool,
    /// Restricts target selection to these words when non-empty.
    pub session_word_ids: Vec<WordId>,
    /// Drops fetched words that belong to none of these wordsets when non-empty.
    pub allowed_wordset_ids: Vec<u64>,
    pub categories: Vec<CategoryConfig>,
    pub first_category: Option<String>,
    pub starred_word_ids: Vec<WordId>,
    pub star_mode: StarMode,
    pub audio_type_preference: Vec<String>,
    pub preferred_speaker_user_id: Option<u64>,
    pub min_options: usize,
    pub max_options: usize,
    pub correct_sound_url: Option<String>,
    pub wrong_sound_url: Option<String>,
    /// Answer labels for gender mode. Derived from the loaded words when empty.
    pub gender_options: Vec<String>,
    pub seed: Option<u64>,
    pub timings: Timings,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            wordset_id: None,
            wordset_fallback: false,
            session_word_ids: Vec::new(),
            allowed_wordset_ids: Vec::new(),
            categories: Vec::new(),
            first_category: None,
            starred_word_ids: Vec::new(),
            star_mode: StarMode::Normal,
            audio_type_preference: default_audio_type_preference(),
            preferred_speaker_user_id: None,
            min_options: MIN_OPTIONS,
            max_options: MAX_OPTIONS,
            correct_sound_url: None,
            wrong_sound_url: None,
            gender_options: Vec::new(),
            seed: None,
            timings: Timings::default(),
        }
    }
}

pub fn default_audio_type_preference() -> Vec<String> {
    ["question", "isolation", "introduction", "in sentence"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl QuizConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn starred_ids(&self) -> HashSet<WordId> {
        self.starred_word_ids.iter().copied().collect()
    }

    /// Option bounds after clamping whatever the page sent into 2..=9.
    pub fn option_bounds(&self) -> (usize, usize) {
        let min = self.min_options.clamp(MIN_OPTIONS, MAX_OPTIONS);
        let max = self.max_options.clamp(min, MAX_OPTIONS);
        (min, max)
    }
}

/// Timing and sizing constants. All durations are in milliseconds.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Timings {
    pub rounds_per_category: u32,
    pub min_correct_count: u32,
    pub resource_watchdog_ms: u64,
    pub introduction_watchdog_ms: u64,
    pub feedback_watchdog_ms: u64,
    pub abort_retry_ms: u64,
    pub first_chunk_size: usize,
    /// Categories with at most this many resources are preloaded in one go.
    pub single_chunk_limit: usize,
    pub progress_queue_cap: usize,
    pub progress_batch_size: usize,
    pub progress_retry_ms: u64,
    pub progress_max_retries: u32,
    pub outcome_debounce_ms: u64,
    pub exposure_debounce_ms: u64,
    pub category_study_debounce_ms: u64,
    pub session_complete_debounce_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            rounds_per_category: ROUNDS_PER_CATEGORY,
            min_correct_count: MIN_CORRECT_COUNT,
            resource_watchdog_ms: 4000,
            introduction_watchdog_ms: 15000,
            feedback_watchdog_ms: 4000,
            abort_retry_ms: 80,
            first_chunk_size: 20,
            single_chunk_limit: 30,
            progress_queue_cap: 400,
            progress_batch_size: 100,
            progress_retry_ms: 50,
            progress_max_retries: 3,
            outcome_debounce_ms: 900,
            exposure_debounce_ms: 1400,
            category_study_debounce_ms: 1200,
            session_complete_debounce_ms: 0,
        }
    }
}

impl Timings {
    pub fn resource_watchdog(&self) -> Duration {
        Duration::from_millis(self.resource_watchdog_ms)
    }

    pub fn introduction_watchdog(&self) -> Duration {
        Duration::from_millis(self.introduction_watchdog_ms)
    }

    pub fn feedback_watchdog(&self) -> Duration {
        Duration::from_millis(self.feedback_watchdog_ms)
    }

    pub fn abort_retry(&self) -> Duration {
        Duration::from_millis(self.abort_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_data() {
        let config = QuizConfig::from_json(
            r#"{
                "wordset_id": 12,
                "categories": [
                    {"name": "Animals", "id": "3", "prompt_type": "audio", "option_type": "image"}
                ],
                "starred_word_ids": [5, 9],
                "star_mode": "weighted",
                "max_options": 40
            }"#,
        )
        .unwrap();

        assert_eq!(config.wordset_id, Some(12));
        assert_eq!(config.category("Animals").and_then(|c| c.id), Some(3));
        assert_eq!(config.star_mode, StarMode::Weighted);
        assert_eq!(config.option_bounds(), (2, 9));
        assert_eq!(config.timings.rounds_per_category, 6);
        assert_eq!(config.audio_type_preference[0], "question");
    }

    #[test]
    fn test_option_bounds_never_invert() {
        let config = QuizConfig {
            min_options: 5,
            max_options: 3,
            ..Default::default()
        };
        assert_eq!(config.option_bounds(), (5, 5));
    }
}
