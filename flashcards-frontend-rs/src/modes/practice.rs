use std::rc::Rc;

use crate::config::QuizConfig;

use super::{ModeContext, RoundOutcome};

/// Plain multiple choice. The number of cards grows by one after each
/// first-try answer and shrinks by one after a miss.
#[derive(Clone, Debug)]
pub struct PracticeMode {
    choice_count: usize,
}

impl PracticeMode {
    pub fn new(config: &QuizConfig) -> Self {
        let (min, max) = config.option_bounds();
        Self {
            choice_count: (min + 1).min(max),
        }
    }

    pub fn choice_count(&self) -> usize {
        self.choice_count
    }

    pub(super) fn record_outcome(&mut self, ctx: &mut ModeContext<'_>, outcome: &RoundOutcome) {
        let (min, max) = ctx.config.option_bounds();
        if outcome.first_try() {
            self.choice_count = (self.choice_count + 1).min(max);
            return;
        }

        self.choice_count = self.choice_count.saturating_sub(1).max(min);
        ctx.scheduler
            .queue_for_repetition(&outcome.category, Rc::clone(&outcome.word), &mut *ctx.rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::WordPools;
    use crate::selection::{SelectionScheduler, StarredState};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use vocab_utils::Word;

    #[test]
    fn test_choice_count_tracks_performance() {
        let config = QuizConfig::default();
        let mut mode = PracticeMode::new(&config);
        assert_eq!(mode.choice_count(), 3);

        let pools = WordPools::default();
        let mut scheduler = SelectionScheduler::new(6, StarredState::default());
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = ModeContext {
            pools: &pools,
            scheduler: &mut scheduler,
            rng: &mut rng,
            config: &config,
        };
        let word = Rc::new(Word {
            id: 4,
            ..Default::default()
        });
        let mut outcome = RoundOutcome {
            word,
            category: "Animals".into(),
            correct: true,
            had_wrong: false,
        };

        for _ in 0..10 {
            mode.record_outcome(&mut ctx, &outcome);
        }
        assert_eq!(mode.choice_count(), 9);

        outcome.had_wrong = true;
        mode.record_outcome(&mut ctx, &outcome);
        assert_eq!(mode.choice_count(), 8);
        assert!(ctx.scheduler.queue("Animals").is_some_and(|q| q.contains(4)));
    }
}
