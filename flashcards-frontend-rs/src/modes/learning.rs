//! Introduce a few words, quiz them until they stick, then introduce more.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use rand::Rng;
use rand::seq::IndexedRandom;
use vocab_utils::{Word, WordId};

use crate::config::QuizConfig;
use crate::loader::{audio_urls_of_type, resolve_playable_audio};
use crate::selection::SelectedTarget;

use super::{ModeContext, RoundOutcome, Selection};

pub const INTRODUCTION_REPETITIONS: u32 = 3;
const FIRST_BATCH_SIZE: usize = 2;
const LATER_BATCH_SIZE: usize = 1;
/// New words are only introduced while fewer than this many are still being learned.
const MAX_UNMASTERED: usize = 3;

#[derive(Clone, Debug, Default)]
pub struct LearningMode {
    introduced: Vec<Rc<Word>>,
    introduced_ids: HashSet<WordId>,
    category_of: HashMap<WordId, String>,
    introduction_progress: HashMap<WordId, u32>,
    correct_counts: HashMap<WordId, u32>,
    mastered: HashSet<WordId>,
    // (word, turn it becomes due)
    wrong_queue: Vec<(WordId, u32)>,
    turn: u32,
    batches: u32,
    last_shown: Option<WordId>,
    current_category: Option<String>,
}

impl LearningMode {
    pub fn introduced_words(&self) -> &[Rc<Word>] {
        &self.introduced
    }

    pub fn is_introduced(&self, id: WordId) -> bool {
        self.introduced_ids.contains(&id)
    }

    pub fn is_mastered(&self, id: WordId) -> bool {
        self.mastered.contains(&id)
    }

    pub fn correct_count(&self, id: WordId) -> u32 {
        self.correct_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn introduction_progress(&self, id: WordId) -> u32 {
        self.introduction_progress.get(&id).copied().unwrap_or(0)
    }

    /// Grows with progress: never more cards than introduced words, and two
    /// more than the number already mastered.
    pub fn choice_count(&self, min: usize, max: usize) -> usize {
        self.introduced
            .len()
            .min(2 + self.mastered.len())
            .clamp(min, max)
    }

    fn unmastered(&self) -> impl Iterator<Item = &Rc<Word>> {
        self.introduced
            .iter()
            .filter(|w| !self.mastered.contains(&w.id))
    }

    pub(super) fn select_target_word(&mut self, ctx: &mut ModeContext<'_>) -> Selection {
        self.turn += 1;

        if self.unmastered().count() < MAX_UNMASTERED {
            if let Some(selection) = self.next_introduction(ctx) {
                return selection;
            }
        }

        let Some(word) = self.pick_quiz_word(&mut *ctx.rng) else {
            return Selection::Exhausted;
        };
        let category = self
            .category_of
            .get(&word.id)
            .cloned()
            .unwrap_or_default();
        let category_changed = self.current_category.as_deref() != Some(category.as_str());
        self.current_category = Some(category.clone());
        self.last_shown = Some(word.id);
        Selection::Target(SelectedTarget {
            word,
            category,
            category_changed,
        })
    }

    fn next_introduction(&mut self, ctx: &ModeContext<'_>) -> Option<Selection> {
        let batch_size = if self.batches == 0 {
            FIRST_BATCH_SIZE
        } else {
            LATER_BATCH_SIZE
        };
        for name in ctx.scheduler.category_names() {
            let words: Vec<Rc<Word>> = ctx
                .pools
                .scoped(name)
                .iter()
                .filter(|w| !self.introduced_ids.contains(&w.id))
                .filter(|w| ctx.scheduler.starred().allows(w.id))
                .take(batch_size)
                .cloned()
                .collect();
            if words.is_empty() {
                continue;
            }
            self.batches += 1;
            for word in &words {
                self.category_of.insert(word.id, name.clone());
            }
            return Some(Selection::Introduce {
                words,
                category: name.clone(),
            });
        }
        None
    }

    fn pick_quiz_word(&mut self, rng: &mut impl Rng) -> Option<Rc<Word>> {
        let last = self.last_shown;
        let turn = self.turn;

        if let Some(index) = self
            .wrong_queue
            .iter()
            .position(|(id, due)| *due <= turn && Some(*id) != last)
        {
            let (id, _) = self.wrong_queue.remove(index);
            return self.word(id);
        }

        let queued: HashSet<WordId> = self.wrong_queue.iter().map(|(id, _)| *id).collect();
        let fresh: Vec<&Rc<Word>> = self
            .unmastered()
            .filter(|w| Some(w.id) != last && !queued.contains(&w.id))
            .collect();
        if let Some(word) = fresh.choose(rng) {
            return Some(Rc::clone(word));
        }

        if let Some(index) = self.wrong_queue.iter().position(|(id, _)| Some(*id) != last) {
            let (id, _) = self.wrong_queue.remove(index);
            return self.word(id);
        }

        let remaining: Vec<&Rc<Word>> = self.unmastered().collect();
        remaining.choose(rng).map(|w| Rc::clone(w))
    }

    fn word(&self, id: WordId) -> Option<Rc<Word>> {
        self.introduced.iter().find(|w| w.id == id).cloned()
    }

    /// One repetition of an introduction finished. Returns true once the word
    /// counts as introduced.
    pub fn record_introduction_step(&mut self, word: &Rc<Word>) -> bool {
        let progress = self.introduction_progress.entry(word.id).or_insert(0);
        *progress += 1;
        if *progress >= INTRODUCTION_REPETITIONS {
            self.mark_introduced(word);
            true
        } else {
            false
        }
    }

    pub fn mark_introduced(&mut self, word: &Rc<Word>) {
        if self.introduced_ids.insert(word.id) {
            self.introduced.push(Rc::clone(word));
        }
    }

    pub(super) fn record_wrong_attempt(&mut self, word: &Rc<Word>, category: &str) {
        self.category_of
            .entry(word.id)
            .or_insert_with(|| category.to_string());
        if !self.wrong_queue.iter().any(|(id, _)| *id == word.id) {
            self.wrong_queue.push((word.id, self.turn + 1));
        }
    }

    pub(super) fn record_outcome(&mut self, config: &QuizConfig, outcome: &RoundOutcome) {
        let id = outcome.word.id;
        if !outcome.first_try() {
            self.correct_counts.insert(id, 0);
            return;
        }
        let count = self.correct_counts.entry(id).or_insert(0);
        *count += 1;
        if *count >= config.timings.min_correct_count {
            log::debug!("Word {id} mastered");
            self.mastered.insert(id);
        }
    }
}

/// The recordings to play while introducing `word`, one per repetition.
///
/// Alternates the introduction and isolation recordings when the word has
/// both, otherwise repeats whichever single recording it has. Empty when the
/// word has nothing to play.
pub fn introduction_pattern(word: &Word, config: &QuizConfig, rng: &mut impl Rng) -> Vec<String> {
    let introduction = audio_urls_of_type(word, "introduction");
    let isolation = audio_urls_of_type(word, "isolation");
    let reps = INTRODUCTION_REPETITIONS as usize;

    match (introduction.first(), isolation.first()) {
        (Some(intro), Some(iso)) => {
            let (a, b) = if rng.random_bool(0.5) {
                (intro, iso)
            } else {
                (iso, intro)
            };
            (0..reps)
                .map(|i| if i % 2 == 0 { a.clone() } else { b.clone() })
                .collect()
        }
        (Some(only), None) | (None, Some(only)) => vec![only.clone(); reps],
        (None, None) => {
            let fallback = resolve_playable_audio(
                word,
                &config.audio_type_preference,
                config.preferred_speaker_user_id,
            );
            if fallback.is_empty() {
                Vec::new()
            } else {
                vec![fallback; reps]
            }
        }
    }
}
