use vocab_utils::Word;

use crate::quiz::QuizSummary;

/// Hooks for the rendering layer. Every method defaults to doing nothing.
pub trait QuizObserver {
    /// The browser refused to autoplay. Raised at most once per widget.
    fn autoplay_blocked(&self) {}

    fn category_changed(&self, _name: &str) {}

    /// A learning-mode introduction played repetition `repetition` (1-based).
    fn introduction_step(&self, _word: &Word, _repetition: usize) {}

    fn results_ready(&self, _summary: &QuizSummary) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl QuizObserver for NoopObserver {}
