/// The learner sees the word, decides for themselves whether they knew it,
/// and reports that. No answer cards are shown.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfCheckMode;
