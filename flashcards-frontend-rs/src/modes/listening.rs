use vocab_utils::Word;

use crate::config::QuizConfig;
use crate::loader::resolve_playable_audio;

/// Passive rounds: each word is played and the learner moves on. Nothing is
/// graded, so only exposures are recorded.
#[derive(Clone, Debug)]
pub struct ListeningMode {
    audio_type_preference: Vec<String>,
    preferred_speaker_user_id: Option<u64>,
}

impl ListeningMode {
    pub fn new(config: &QuizConfig) -> Self {
        Self {
            audio_type_preference: config.audio_type_preference.clone(),
            preferred_speaker_user_id: config.preferred_speaker_user_id,
        }
    }

    /// Only words with something to play.
    pub fn eligible(&self, word: &Word) -> bool {
        !resolve_playable_audio(
            word,
            &self.audio_type_preference,
            self.preferred_speaker_user_id,
        )
        .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_without_audio_are_skipped() {
        let mode = ListeningMode::new(&QuizConfig::default());
        let silent = Word {
            id: 1,
            ..Default::default()
        };
        let spoken = Word {
            id: 2,
            audio: Some("https://example.org/a.mp3".into()),
            ..Default::default()
        };
        assert!(!mode.eligible(&silent));
        assert!(mode.eligible(&spoken));
    }
}
