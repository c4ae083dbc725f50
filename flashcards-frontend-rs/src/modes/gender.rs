use vocab_utils::{GrammaticalGender, Word};

use crate::config::QuizConfig;
use crate::loader::WordPools;

// Offered when fewer than two labels are known.
const DEFAULT_LABELS: [GrammaticalGender; 2] =
    [GrammaticalGender::Masculine, GrammaticalGender::Feminine];

/// The learner picks the grammatical gender of the target word.
#[derive(Clone, Debug, Default)]
pub struct GenderMode {
    labels: Vec<GrammaticalGender>,
    // labels came from the page rather than from the loaded words
    configured: bool,
}

impl GenderMode {
    pub fn new(config: &QuizConfig) -> Self {
        let mut labels: Vec<GrammaticalGender> = Vec::new();
        for raw in &config.gender_options {
            if let Some(gender) = GrammaticalGender::parse(raw) {
                if !labels.contains(&gender) {
                    labels.push(gender);
                }
            }
        }
        Self {
            configured: !labels.is_empty(),
            labels: with_defaults(labels),
        }
    }

    /// Derive the label list from the words loaded for `categories` unless
    /// the page supplied one.
    pub fn refresh_labels(&mut self, pools: &WordPools, categories: &[String]) {
        if self.configured {
            return;
        }
        let mut labels: Vec<GrammaticalGender> = categories
            .iter()
            .flat_map(|name| pools.scoped(name).iter())
            .filter_map(|w| w.gender())
            .collect();
        labels.sort();
        labels.dedup();
        self.labels = with_defaults(labels);
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.iter().map(|g| g.label().to_string()).collect()
    }

    pub fn eligible(&self, word: &Word) -> bool {
        word.gender().is_some_and(|g| self.labels.contains(&g))
    }

    /// The labels to offer for `word`, its own first.
    pub fn answer_set(&self, word: &Word) -> Vec<String> {
        let Some(correct) = word.gender() else {
            return self.labels();
        };
        std::iter::once(correct.label().to_string())
            .chain(
                self.labels
                    .iter()
                    .filter(|g| **g != correct)
                    .map(|g| g.label().to_string()),
            )
            .collect()
    }
}

fn with_defaults(mut labels: Vec<GrammaticalGender>) -> Vec<GrammaticalGender> {
    if labels.len() < 2 {
        for gender in DEFAULT_LABELS {
            if !labels.contains(&gender) {
                labels.push(gender);
            }
        }
        labels.sort();
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn gendered(id: u64, gender: &str) -> Rc<Word> {
        Rc::new(Word {
            id,
            grammatical_gender: Some(gender.into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_labels_from_config_are_normalized() {
        let config = QuizConfig {
            gender_options: vec!["F".into(), "masc".into(), "feminine".into()],
            ..Default::default()
        };
        let mode = GenderMode::new(&config);
        assert_eq!(mode.labels(), vec!["feminine", "masculine"]);
    }

    #[test]
    fn test_labels_derived_from_words() {
        let mut pools = WordPools::default();
        pools.scoped.insert(
            "Food".into(),
            vec![gendered(1, "f"), gendered(2, "m"), gendered(3, "F"), Rc::new(Word::default())],
        );
        let mut mode = GenderMode::new(&QuizConfig::default());
        mode.refresh_labels(&pools, &["Food".to_string()]);
        assert_eq!(mode.labels(), vec!["masculine", "feminine"]);

        let target = gendered(3, "feminine");
        assert_eq!(mode.answer_set(&target), vec!["feminine", "masculine"]);
        assert!(mode.eligible(&target));
        assert!(!mode.eligible(&Word::default()));
    }

    #[test]
    fn test_single_gender_still_offers_a_choice() {
        let mut pools = WordPools::default();
        pools.scoped.insert(
            "Nouns".into(),
            (1..=4).map(|id| gendered(id, "m")).collect(),
        );
        let mut mode = GenderMode::new(&QuizConfig::default());
        mode.refresh_labels(&pools, &["Nouns".to_string()]);
        assert_eq!(mode.labels(), vec!["masculine", "feminine"]);
        assert_eq!(mode.answer_set(&gendered(2, "m")), vec!["masculine", "feminine"]);

        pools.scoped.insert("Nouns".into(), vec![gendered(5, "n")]);
        mode.refresh_labels(&pools, &["Nouns".to_string()]);
        assert_eq!(mode.labels(), vec!["masculine", "feminine", "neuter"]);

        let config = QuizConfig {
            gender_options: vec!["f".into()],
            ..Default::default()
        };
        assert_eq!(GenderMode::new(&config).labels(), vec!["masculine", "feminine"]);
    }
}
