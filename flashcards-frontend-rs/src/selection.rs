//! Round-by-round choice of the next target word and its category.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use vocab_utils::{Word, WordId};

use crate::loader::WordPools;

/// Probability of drawing from the starred words in weighted mode when both
/// starred and unstarred words are available.
const WEIGHTED_STAR_BIAS: f64 = 0.66;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(rename_all = "snake_case")]
pub enum StarMode {
    #[default]
    Normal,
    /// Starred words may be shown twice and are drawn more often.
    Weighted,
    /// Only starred words are shown.
    Only,
}

#[derive(Clone, Debug, Default)]
pub struct StarredState {
    ids: HashSet<WordId>,
    mode: StarMode,
}

impl StarredState {
    pub fn new(ids: impl IntoIterator<Item = WordId>, mode: StarMode) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            mode,
        }
    }

    pub fn mode(&self) -> StarMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: StarMode) {
        self.mode = mode;
    }

    pub fn is_starred(&self, id: WordId) -> bool {
        self.ids.contains(&id)
    }

    /// Flip the star on `id`, returning whether it is now starred.
    pub fn toggle(&mut self, id: WordId) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    pub fn starred_ids(&self) -> &HashSet<WordId> {
        &self.ids
    }

    pub fn max_uses(&self, id: WordId) -> u32 {
        if self.mode == StarMode::Weighted && self.is_starred(id) {
            2
        } else {
            1
        }
    }

    /// `Only` mode with an empty star set behaves like `Normal`.
    pub fn restricts(&self) -> bool {
        self.mode == StarMode::Only && !self.ids.is_empty()
    }

    pub fn allows(&self, id: WordId) -> bool {
        !self.restricts() || self.is_starred(id)
    }
}

#[derive(Clone, Debug)]
pub struct RepetitionEntry {
    pub word: Rc<Word>,
    pub reappear_round: u32,
}

/// Words waiting to be shown again, in the order they were queued.
#[derive(Clone, Debug, Default)]
pub struct RepetitionQueue {
    entries: Vec<RepetitionEntry>,
}

impl RepetitionQueue {
    /// Queue `entry` unless its word is already waiting. Returns whether it
    /// was added.
    pub fn push(&mut self, entry: RepetitionEntry) -> bool {
        if self.contains(entry.word.id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove and return the first entry matching `predicate`.
    pub fn take_first(
        &mut self,
        mut predicate: impl FnMut(&RepetitionEntry) -> bool,
    ) -> Option<RepetitionEntry> {
        let index = self.entries.iter().position(|e| predicate(e))?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, id: WordId) -> bool {
        self.entries.iter().any(|e| e.word.id == id)
    }

    pub fn has_ready(&self, round: u32) -> bool {
        self.entries.iter().any(|e| e.reappear_round <= round)
    }

    pub fn earliest_reappear(&self) -> Option<u32> {
        self.entries.iter().map(|e| e.reappear_round).min()
    }

    pub fn entry(&self, id: WordId) -> Option<&RepetitionEntry> {
        self.entries.iter().find(|e| e.word.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepetitionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SelectedTarget {
    pub word: Rc<Word>,
    pub category: String,
    pub category_changed: bool,
}

enum WordPick {
    Found(Rc<Word>),
    /// The only due word is the one that was just shown.
    Blocked,
    /// Only queued words remain and none is due yet.
    Deferred(u32),
    Exhausted,
}

pub struct SelectionScheduler {
    category_names: Vec<String>,
    first_category_name: Option<String>,
    current_category_name: Option<String>,
    current_category_round_count: u32,
    category_round_count: HashMap<String, u32>,
    repetition_queues: HashMap<String, RepetitionQueue>,
    used_word_ids: HashSet<WordId>,
    completed_categories: HashSet<String>,
    // categories whose words haven't arrived yet
    pending_categories: HashSet<String>,
    last_word_shown_id: Option<WordId>,
    is_first_round: bool,
    star_play_counts: HashMap<WordId, u32>,
    starred: StarredState,
    rounds_per_category: u32,
}

impl SelectionScheduler {
    pub fn new(rounds_per_category: u32, starred: StarredState) -> Self {
        Self {
            category_names: Vec::new(),
            first_category_name: None,
            current_category_name: None,
            current_category_round_count: 0,
            category_round_count: HashMap::new(),
            repetition_queues: HashMap::new(),
            used_word_ids: HashSet::new(),
            completed_categories: HashSet::new(),
            pending_categories: HashSet::new(),
            last_word_shown_id: None,
            is_first_round: true,
            star_play_counts: HashMap::new(),
            starred,
            rounds_per_category: rounds_per_category.max(1),
        }
    }

    /// Start over with `names` as the rotation. Star state survives.
    pub fn reset(&mut self, names: Vec<String>, first: Option<String>) {
        let starred = std::mem::take(&mut self.starred);
        *self = Self::new(self.rounds_per_category, starred);
        self.category_names = names;
        self.first_category_name = first;
    }

    pub fn category_names(&self) -> &[String] {
        &self.category_names
    }

    pub fn current_category(&self) -> Option<&str> {
        self.current_category_name.as_deref()
    }

    pub fn category_round_count(&self, name: &str) -> u32 {
        self.category_round_count.get(name).copied().unwrap_or(0)
    }

    pub fn queue(&self, name: &str) -> Option<&RepetitionQueue> {
        self.repetition_queues.get(name)
    }

    pub fn last_word_shown_id(&self) -> Option<WordId> {
        self.last_word_shown_id
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed_categories.contains(name)
    }

    /// Mark exactly `names` as still loading. Pending categories are skipped
    /// by selection rather than treated as empty.
    pub fn set_pending(&mut self, names: impl IntoIterator<Item = String>) {
        self.pending_categories = names.into_iter().collect();
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending_categories.contains(name)
    }

    /// The category the next selection will try first: the first category on
    /// the opening round, the current one while it keeps the floor, otherwise
    /// the one after it in rotation.
    pub fn upcoming_category(&self) -> Option<String> {
        let live: Vec<&String> = self
            .category_names
            .iter()
            .filter(|n| !self.completed_categories.contains(*n))
            .collect();
        if self.is_first_round {
            let first = self
                .first_category_name
                .as_ref()
                .filter(|first| live.contains(first));
            return first.or(live.first().copied()).cloned();
        }
        let Some(current) = self.current_category_name.as_ref() else {
            return live.first().map(|n| (*n).clone());
        };
        let Some(index) = live.iter().position(|n| *n == current) else {
            return live.first().map(|n| (*n).clone());
        };
        if live.len() == 1 || self.current_category_round_count < self.rounds_per_category {
            return Some(current.clone());
        }
        live.iter()
            .cycle()
            .skip(index + 1)
            .take(live.len())
            .find(|n| **n != current)
            .map(|n| (*n).clone())
    }

    /// A pending category worth loading next, the upcoming one first.
    pub fn next_pending(&self) -> Option<String> {
        self.upcoming_category()
            .filter(|n| self.is_pending(n))
            .or_else(|| {
                self.category_names
                    .iter()
                    .find(|n| self.is_pending(n) && !self.completed_categories.contains(*n))
                    .cloned()
            })
    }

    pub fn starred(&self) -> &StarredState {
        &self.starred
    }

    pub fn starred_mut(&mut self) -> &mut StarredState {
        &mut self.starred
    }

    /// Categories after the current one in rotation order.
    pub fn upcoming_categories(&self, count: usize) -> Vec<String> {
        let current = self.current_category_name.as_deref();
        self.category_names
            .iter()
            .filter(|n| Some(n.as_str()) != current)
            .take(count)
            .cloned()
            .collect()
    }

    /// Pick the next target. `None` means every category is exhausted.
    ///
    /// Runs without awaiting anything, so the last-shown word it reads is
    /// always the one from the previous round.
    pub fn select_target_word_and_category(
        &mut self,
        pools: &WordPools,
        eligible: &dyn Fn(&Word) -> bool,
        rng: &mut impl Rng,
    ) -> Option<SelectedTarget> {
        let completed = &self.completed_categories;
        self.category_names.retain(|n| !completed.contains(n));
        if self.category_names.is_empty() {
            return None;
        }

        if self.is_first_round {
            if let Some(first) = self.first_category_name.clone() {
                if let Some(index) = self.category_names.iter().position(|n| *n == first) {
                    let name = self.category_names.remove(index);
                    self.category_names.insert(0, name);
                }
            }
        } else {
            self.advance_rotation(pools, eligible);
        }

        let mut waiting: Vec<(String, Option<u32>)> = Vec::new();
        let mut index = 0;
        while index < self.category_names.len() {
            let name = self.category_names[index].clone();
            if self.is_pending(&name) {
                index += 1;
                continue;
            }
            match self.select_target_word(&name, pools, eligible, rng, false) {
                WordPick::Found(word) => return Some(self.commit(name, word)),
                WordPick::Blocked => {
                    waiting.push((name, None));
                    index += 1;
                }
                WordPick::Deferred(round) => {
                    waiting.push((name, Some(round)));
                    index += 1;
                }
                WordPick::Exhausted => {
                    log::debug!("Category {name} has nothing left to show");
                    self.completed_categories.insert(name);
                    self.category_names.remove(index);
                }
            }
        }

        // Fresh words may still be on their way; let the caller load them
        // before forcing a queued word or a repeat.
        if self.category_names.iter().any(|n| self.is_pending(n)) {
            return None;
        }

        // Everything left is either waiting in a queue or was just shown. Age a
        // waiting category until its earliest entry is due rather than ending
        // the quiz early, and only repeat the last word when nothing else is left.
        for allow_repeat in [false, true] {
            for (name, due) in &waiting {
                let before = self.category_round_count(name);
                if let Some(due) = due {
                    self.category_round_count.insert(name.clone(), before.max(*due));
                }
                match self.select_target_word(name, pools, eligible, rng, allow_repeat) {
                    WordPick::Found(word) => return Some(self.commit(name.clone(), word)),
                    _ => {
                        self.category_round_count.insert(name.clone(), before);
                    }
                }
            }
        }

        None
    }

    // Decide whether the current category keeps the floor, moving it to the
    // back of the rotation (or out of it) when it doesn't.
    fn advance_rotation(&mut self, pools: &WordPools, eligible: &dyn Fn(&Word) -> bool) {
        let Some(current) = self.current_category_name.clone() else {
            return;
        };
        let Some(index) = self.category_names.iter().position(|n| *n == current) else {
            return;
        };

        let round = self.category_round_count(&current);
        let queue_ready = self
            .repetition_queues
            .get(&current)
            .is_some_and(|q| q.has_ready(round));
        if queue_ready
            || self.category_names.len() == 1
            || self.current_category_round_count < self.rounds_per_category
        {
            let name = self.category_names.remove(index);
            self.category_names.insert(0, name);
            return;
        }

        let name = self.category_names.remove(index);
        *self.category_round_count.entry(name.clone()).or_insert(0) += 1;
        if self.has_remaining(&name, pools, eligible) {
            self.category_names.push(name);
        } else {
            self.completed_categories.insert(name);
        }
    }

    fn has_remaining(&self, name: &str, pools: &WordPools, eligible: &dyn Fn(&Word) -> bool) -> bool {
        if self.is_pending(name)
            || self.repetition_queues.get(name).is_some_and(|q| !q.is_empty())
        {
            return true;
        }
        pools
            .scoped(name)
            .iter()
            .any(|w| !self.used_word_ids.contains(&w.id) && self.starred.allows(w.id) && eligible(w))
    }

    fn exhausted_cap(&self, id: WordId) -> bool {
        self.star_play_counts.get(&id).copied().unwrap_or(0) >= self.starred.max_uses(id)
    }

    fn select_target_word(
        &mut self,
        name: &str,
        pools: &WordPools,
        eligible: &dyn Fn(&Word) -> bool,
        rng: &mut impl Rng,
        allow_repeat: bool,
    ) -> WordPick {
        let round = self.category_round_count(name);
        let last = self.last_word_shown_id;

        // a) a due queue entry that wasn't just shown
        let mut queue = self.repetition_queues.remove(name).unwrap_or_default();
        let due = queue.take_first(|e| {
            e.reappear_round <= round
                && Some(e.word.id) != last
                && self.starred.allows(e.word.id)
                && eligible(&e.word)
        });
        if let Some(entry) = due {
            self.repetition_queues.insert(name.to_string(), queue);
            return WordPick::Found(entry.word);
        }

        // b) a fresh word
        let fresh: Vec<&Rc<Word>> = pools
            .scoped(name)
            .iter()
            .filter(|w| {
                !self.used_word_ids.contains(&w.id)
                    && Some(w.id) != last
                    && !self.exhausted_cap(w.id)
                    && self.starred.allows(w.id)
                    && !queue.contains(w.id)
                    && eligible(w)
            })
            .collect();
        if let Some(word) = self.pick_fresh(&fresh, rng) {
            self.repetition_queues.insert(name.to_string(), queue);
            let plays = self.star_play_counts.entry(word.id).or_insert(0);
            *plays += 1;
            if *plays >= self.starred.max_uses(word.id) {
                self.used_word_ids.insert(word.id);
            }
            return WordPick::Found(word);
        }

        // c) a due queue entry even if it was just shown
        let pick = if queue.has_ready(round) {
            if allow_repeat {
                queue
                    .take_first(|e| {
                        e.reappear_round <= round
                            && self.starred.allows(e.word.id)
                            && eligible(&e.word)
                    })
                    .map_or(WordPick::Blocked, |e| WordPick::Found(e.word))
            } else {
                WordPick::Blocked
            }
        } else {
            match queue.earliest_reappear() {
                Some(round) => WordPick::Deferred(round),
                None => WordPick::Exhausted,
            }
        };
        self.repetition_queues.insert(name.to_string(), queue);
        pick
    }

    fn pick_fresh(&self, fresh: &[&Rc<Word>], rng: &mut impl Rng) -> Option<Rc<Word>> {
        if self.starred.mode() == StarMode::Weighted {
            let (starred, plain): (Vec<&Rc<Word>>, Vec<&Rc<Word>>) = fresh
                .iter()
                .copied()
                .partition(|w| self.starred.is_starred(w.id));
            if !starred.is_empty() && !plain.is_empty() {
                let pool = if rng.random_bool(WEIGHTED_STAR_BIAS) {
                    starred
                } else {
                    plain
                };
                return pool.choose(rng).map(|w| Rc::clone(w));
            }
        }
        fresh.choose(rng).map(|w| Rc::clone(w))
    }

    fn commit(&mut self, name: String, word: Rc<Word>) -> SelectedTarget {
        let category_changed = self.current_category_name.as_deref() != Some(name.as_str());
        if category_changed {
            self.current_category_name = Some(name.clone());
            self.current_category_round_count = 0;
        }
        self.current_category_round_count += 1;
        *self.category_round_count.entry(name.clone()).or_insert(0) += 1;
        self.last_word_shown_id = Some(word.id);
        self.is_first_round = false;
        SelectedTarget {
            word,
            category: name,
            category_changed,
        }
    }

    /// Show `word` again one to three rounds from now. Returns the round it
    /// becomes due, or `None` if it was already queued.
    pub fn queue_for_repetition(
        &mut self,
        category: &str,
        word: Rc<Word>,
        rng: &mut impl Rng,
    ) -> Option<u32> {
        let delay = rng.random_range(1..=3);
        self.queue_after_rounds(category, word, delay)
    }

    pub fn queue_after_rounds(&mut self, category: &str, word: Rc<Word>, delay: u32) -> Option<u32> {
        let reappear_round = self.category_round_count(category) + delay;
        let added = self
            .repetition_queues
            .entry(category.to_string())
            .or_default()
            .push(RepetitionEntry {
                word,
                reappear_round,
            });
        added.then_some(reappear_round)
    }
}
