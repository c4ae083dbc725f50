//! Per-mode policies layered over the selection scheduler.

mod gender;
mod learning;
mod listening;
mod practice;
mod self_check;

pub use gender::GenderMode;
pub use learning::{LearningMode, introduction_pattern};
pub use listening::ListeningMode;
pub use practice::PracticeMode;
pub use self_check::SelfCheckMode;

use std::rc::Rc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use vocab_utils::{CategoryConfig, Word};

use crate::config::QuizConfig;
use crate::loader::WordPools;
use crate::selection::{SelectedTarget, SelectionScheduler};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    #[default]
    Practice,
    Learning,
    Gender,
    Listening,
    SelfCheck,
}

impl QuizMode {
    pub const ALL: [QuizMode; 5] = [
        QuizMode::Practice,
        QuizMode::Learning,
        QuizMode::Gender,
        QuizMode::Listening,
        QuizMode::SelfCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuizMode::Practice => "practice",
            QuizMode::Learning => "learning",
            QuizMode::Gender => "gender",
            QuizMode::Listening => "listening",
            QuizMode::SelfCheck => "self_check",
        }
    }

    /// Lenient parse of the names the page and older event payloads use.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        let mode = match normalized.as_str() {
            "practice" | "standard" | "quiz" => QuizMode::Practice,
            "learning" | "learn" => QuizMode::Learning,
            "gender" => QuizMode::Gender,
            "listening" | "listen" => QuizMode::Listening,
            "self_check" | "selfcheck" => QuizMode::SelfCheck,
            _ => return None,
        };
        Some(mode)
    }

    pub fn supports(&self, category: &CategoryConfig) -> bool {
        match self {
            QuizMode::Learning => category.learning_supported,
            QuizMode::Gender => category.gender_supported,
            QuizMode::Practice | QuizMode::Listening | QuizMode::SelfCheck => true,
        }
    }
}

impl std::fmt::Display for QuizMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a controller may read or update while choosing a target.
pub struct ModeContext<'a> {
    pub pools: &'a WordPools,
    pub scheduler: &'a mut SelectionScheduler,
    pub rng: &'a mut StdRng,
    pub config: &'a QuizConfig,
}

#[derive(Clone, Debug)]
pub enum Selection {
    Target(SelectedTarget),
    /// Learning mode wants these words introduced before quizzing them.
    Introduce {
        words: Vec<Rc<Word>>,
        category: String,
    },
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct RoundOutcome {
    pub word: Rc<Word>,
    pub category: String,
    pub correct: bool,
    /// At least one wrong answer was given for this word this round.
    pub had_wrong: bool,
}

impl RoundOutcome {
    pub fn first_try(&self) -> bool {
        self.correct && !self.had_wrong
    }
}

pub enum ModeController {
    Practice(PracticeMode),
    Learning(LearningMode),
    Gender(GenderMode),
    Listening(ListeningMode),
    SelfCheck(SelfCheckMode),
}

impl ModeController {
    pub fn new(mode: QuizMode, config: &QuizConfig) -> Self {
        match mode {
            QuizMode::Practice => ModeController::Practice(PracticeMode::new(config)),
            QuizMode::Learning => ModeController::Learning(LearningMode::default()),
            QuizMode::Gender => ModeController::Gender(GenderMode::new(config)),
            QuizMode::Listening => ModeController::Listening(ListeningMode::new(config)),
            QuizMode::SelfCheck => ModeController::SelfCheck(SelfCheckMode),
        }
    }

    pub fn mode(&self) -> QuizMode {
        match self {
            ModeController::Practice(_) => QuizMode::Practice,
            ModeController::Learning(_) => QuizMode::Learning,
            ModeController::Gender(_) => QuizMode::Gender,
            ModeController::Listening(_) => QuizMode::Listening,
            ModeController::SelfCheck(_) => QuizMode::SelfCheck,
        }
    }

    pub fn select_target_word(&mut self, ctx: &mut ModeContext<'_>) -> Selection {
        let selected = match self {
            ModeController::Learning(mode) => return mode.select_target_word(ctx),
            ModeController::Gender(mode) => {
                let eligible = |w: &Word| mode.eligible(w);
                ctx.scheduler
                    .select_target_word_and_category(ctx.pools, &eligible, &mut *ctx.rng)
            }
            ModeController::Listening(mode) => {
                let eligible = |w: &Word| mode.eligible(w);
                ctx.scheduler
                    .select_target_word_and_category(ctx.pools, &eligible, &mut *ctx.rng)
            }
            ModeController::Practice(_) | ModeController::SelfCheck(_) => ctx
                .scheduler
                .select_target_word_and_category(ctx.pools, &|_| true, &mut *ctx.rng),
        };
        selected.map_or(Selection::Exhausted, Selection::Target)
    }

    /// How many cards to show, target included. Modes without distractors
    /// return 1.
    pub fn choice_count(&self, config: &QuizConfig) -> usize {
        let (min, max) = config.option_bounds();
        match self {
            ModeController::Practice(mode) => mode.choice_count().clamp(min, max),
            ModeController::Learning(mode) => mode.choice_count(min, max),
            ModeController::Gender(mode) => mode.labels().len(),
            ModeController::Listening(_) | ModeController::SelfCheck(_) => 1,
        }
    }

    /// Whether answers in this mode count towards the results screen.
    pub fn keeps_results(&self) -> bool {
        !matches!(self, ModeController::Listening(_))
    }

    pub fn record_outcome(&mut self, ctx: &mut ModeContext<'_>, outcome: &RoundOutcome) {
        match self {
            ModeController::Practice(mode) => mode.record_outcome(ctx, outcome),
            ModeController::Learning(mode) => mode.record_outcome(ctx.config, outcome),
            ModeController::Gender(_) | ModeController::SelfCheck(_) => {
                requeue_missed(ctx, outcome)
            }
            ModeController::Listening(_) => {}
        }
    }

    /// A wrong answer was given but the round continues.
    pub fn record_wrong_attempt(&mut self, ctx: &mut ModeContext<'_>, word: &Rc<Word>, category: &str) {
        match self {
            ModeController::Learning(mode) => mode.record_wrong_attempt(word, category),
            ModeController::Listening(_) => {}
            ModeController::Practice(_) | ModeController::Gender(_) | ModeController::SelfCheck(_) => {
                ctx.scheduler
                    .queue_for_repetition(category, Rc::clone(word), &mut *ctx.rng);
            }
        }
    }

    pub fn as_learning_mut(&mut self) -> Option<&mut LearningMode> {
        match self {
            ModeController::Learning(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn as_gender_mut(&mut self) -> Option<&mut GenderMode> {
        match self {
            ModeController::Gender(mode) => Some(mode),
            _ => None,
        }
    }
}

/// Wrong answers, and right answers that needed more than one try, come back
/// a few rounds later.
fn requeue_missed(ctx: &mut ModeContext<'_>, outcome: &RoundOutcome) {
    if outcome.first_try() {
        return;
    }
    ctx.scheduler
        .queue_for_repetition(&outcome.category, Rc::clone(&outcome.word), &mut *ctx.rng);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_accepts_aliases() {
        assert_eq!(QuizMode::parse("self-check"), Some(QuizMode::SelfCheck));
        assert_eq!(QuizMode::parse("Self Check"), Some(QuizMode::SelfCheck));
        assert_eq!(QuizMode::parse("standard"), Some(QuizMode::Practice));
        assert_eq!(QuizMode::parse("listen"), Some(QuizMode::Listening));
        assert_eq!(QuizMode::parse("karaoke"), None);
        for mode in QuizMode::ALL {
            assert_eq!(QuizMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_mode_support_follows_category_flags() {
        let category = CategoryConfig {
            name: "Food".into(),
            learning_supported: false,
            gender_supported: true,
            ..Default::default()
        };
        assert!(!QuizMode::Learning.supports(&category));
        assert!(QuizMode::Gender.supports(&category));
        assert!(QuizMode::Practice.supports(&category));
    }
}
