//! One quiz widget: activation, rounds, answers, and teardown.
//!
//! Every entry point that cancels work (closing, restarting, switching mode)
//! suspends playback before touching any state, then bumps the activation
//! generation. Async work started under an older generation notices the bump
//! after its next await and gives up.

use std::cell::RefCell;
use std::collections::HashSet;
use std::pin::pin;
use std::rc::Rc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::{self, Stream};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use vocab_utils::{CategoryConfig, PromptType, Word, WordId};

use crate::SharedRng;
use crate::audio::{AudioHost, AudioKind, AudioOptions, AudioSessionManager, AudioSettings, Completion, FeedbackSound};
use crate::config::QuizConfig;
use crate::error::QuizError;
use crate::loader::{MediaPreloader, ResourceLoader, WordSource, WordsetScope};
use crate::modes::{LearningMode, ModeContext, ModeController, QuizMode, RoundOutcome, Selection, introduction_pattern};
use crate::observer::QuizObserver;
use crate::options::{OptionLayout, OptionRequest, build_options};
use crate::platform::Platform;
use crate::progress::{CategoryRef, ProgressEventQueue, ProgressTransport, RawProgressEvent};
use crate::selection::{SelectedTarget, SelectionScheduler, StarMode, StarredState};
use crate::utils;

const TARGET_FADE: Duration = Duration::from_millis(200);

/// Everything the page provides.
pub struct QuizServices {
    pub audio_host: Rc<dyn AudioHost>,
    pub preloader: Rc<dyn MediaPreloader>,
    pub word_source: Rc<dyn WordSource>,
    pub transport: Rc<dyn ProgressTransport>,
    pub platform: Rc<dyn Platform>,
    pub observer: Rc<dyn QuizObserver>,
    pub layout: Rc<dyn OptionLayout>,
}

/// The components one widget is built from, created once per page.
pub struct QuizSessionContext {
    pub config: Rc<QuizConfig>,
    pub audio: AudioSessionManager,
    pub loader: ResourceLoader,
    pub progress: ProgressEventQueue,
    pub platform: Rc<dyn Platform>,
    pub observer: Rc<dyn QuizObserver>,
    pub layout: Rc<dyn OptionLayout>,
    pub rng: SharedRng,
}

impl QuizSessionContext {
    pub fn new(config: QuizConfig, services: QuizServices) -> Self {
        let config = Rc::new(config);
        let rng: SharedRng = Rc::new(RefCell::new(utils::make_rng(config.seed)));
        let audio = AudioSessionManager::new(
            services.audio_host,
            Rc::clone(&services.platform),
            Rc::clone(&services.observer),
            AudioSettings {
                abort_retry: config.timings.abort_retry(),
                feedback_watchdog: config.timings.feedback_watchdog(),
                correct_sound_url: config.correct_sound_url.clone(),
                wrong_sound_url: config.wrong_sound_url.clone(),
            },
        );
        let loader = ResourceLoader::new(
            services.word_source,
            services.preloader,
            Rc::clone(&services.platform),
            Rc::clone(&config),
            Rc::clone(&rng),
        );
        let progress = ProgressEventQueue::new(
            services.transport,
            Rc::clone(&services.platform),
            config.timings.clone(),
            config.wordset_id,
        );
        Self {
            config,
            audio,
            loader,
            progress,
            platform: services.platform,
            observer: services.observer,
            layout: services.layout,
            rng,
        }
    }

    fn category_ref(&self, name: &str) -> CategoryRef {
        CategoryRef {
            id: self.loader.category_config(name).id,
            name: name.to_string(),
        }
    }
}

/// Tally for the results screen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct QuizResults {
    pub correct_on_first_try: u32,
    /// Words answered wrong at least once, in the order they were missed.
    pub incorrect: Vec<WordId>,
}

impl QuizResults {
    fn record_incorrect(&mut self, id: WordId) {
        if !self.incorrect.contains(&id) {
            self.incorrect.push(id);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct QuizSummary {
    pub mode: QuizMode,
    pub correct_on_first_try: u32,
    pub incorrect: Vec<WordId>,
    pub rounds_played: u32,
    pub categories: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum RoundChoices {
    /// Answer cards in display order.
    Words(Vec<Word>),
    Genders(Vec<String>),
    None,
}

impl RoundChoices {
    pub fn len(&self) -> usize {
        match self {
            RoundChoices::Words(words) => words.len(),
            RoundChoices::Genders(labels) => labels.len(),
            RoundChoices::None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
pub struct QuestionView {
    /// 1-based, counted across the whole activation.
    pub round: u32,
    pub mode: QuizMode,
    pub category: String,
    pub category_label: String,
    pub category_changed: bool,
    pub target: Word,
    pub prompt_audio: Option<String>,
    pub choices: RoundChoices,
    pub correct_index: Option<usize>,
    pub starred: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundView {
    Question(QuestionView),
    /// Learning mode played the introductions for these words.
    Introduction { words: Vec<Word>, category: String },
    Results(QuizSummary),
    /// None of the selected categories ever had a word to show.
    LoadingError,
    /// The widget was closed, restarted, or switched mode mid-round.
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(
    target_arch = "wasm32",
    derive(tsify::Tsify),
    tsify(into_wasm_abi, from_wasm_abi)
)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// No round was waiting for an answer, or that card was already tried.
    Ignored,
    TryAgain,
    RoundComplete { first_try: bool },
}

struct ActiveRound {
    view: QuestionView,
    word: Rc<Word>,
    category: String,
    had_wrong: bool,
    wrong_choices: Vec<usize>,
}

struct WidgetState {
    mode: ModeController,
    scheduler: SelectionScheduler,
    requested: Vec<String>,
    categories: Vec<String>,
    active: bool,
    finished: bool,
    session_reported: bool,
    generation: u64,
    results: QuizResults,
    round: Option<ActiveRound>,
    rounds_played: u32,
    saw_words: bool,
}

#[derive(Clone)]
pub struct FlashcardWidget {
    ctx: Rc<QuizSessionContext>,
    // never hold this borrow across an .await
    state: Rc<RefCell<WidgetState>>,
}

impl FlashcardWidget {
    pub fn new(config: QuizConfig, services: QuizServices) -> Self {
        crate::init_logging();

        let ctx = QuizSessionContext::new(config, services);
        let starred = StarredState::new(ctx.config.starred_ids(), ctx.config.star_mode);
        let state = WidgetState {
            mode: ModeController::new(QuizMode::Practice, &ctx.config),
            scheduler: SelectionScheduler::new(ctx.config.timings.rounds_per_category, starred),
            requested: Vec::new(),
            categories: Vec::new(),
            active: false,
            finished: false,
            session_reported: false,
            generation: 0,
            results: QuizResults::default(),
            round: None,
            rounds_played: 0,
            saw_words: false,
        };
        Self {
            ctx: Rc::new(ctx),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn context(&self) -> &QuizSessionContext {
        &self.ctx
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub fn mode(&self) -> QuizMode {
        self.state.borrow().mode.mode()
    }

    /// Categories in play for the current mode.
    pub fn categories(&self) -> Vec<String> {
        self.state.borrow().categories.clone()
    }

    pub fn results(&self) -> QuizResults {
        self.state.borrow().results.clone()
    }

    pub fn current_round(&self) -> Option<QuestionView> {
        self.state.borrow().round.as_ref().map(|r| r.view.clone())
    }

    /// Open the widget on `categories` in `mode`. Replaces any activation
    /// already running.
    pub async fn init_flashcard_widget(
        &self,
        categories: Vec<String>,
        mode: QuizMode,
    ) -> Result<(), QuizError> {
        let requested = normalize_categories(categories);
        let names = self.eligible_categories(&requested, mode)?;
        log::info!("Starting {mode} quiz over {} categories", names.len());
        self.activate(requested, names, mode).await;
        Ok(())
    }

    pub async fn switch_mode(&self, mode: QuizMode) -> Result<(), QuizError> {
        let requested = {
            let state = self.state.borrow();
            if !state.active {
                return Err(QuizError::Closed);
            }
            state.requested.clone()
        };
        let names = self.eligible_categories(&requested, mode)?;
        self.ctx.audio.suspend_playback().await;
        self.report_session_complete();
        log::info!("Switching to {mode} mode");
        self.activate(requested, names, mode).await;
        Ok(())
    }

    pub async fn restart_quiz(&self) -> Result<(), QuizError> {
        let (requested, names, mode) = {
            let state = self.state.borrow();
            if !state.active {
                return Err(QuizError::Closed);
            }
            (
                state.requested.clone(),
                state.categories.clone(),
                state.mode.mode(),
            )
        };
        self.ctx.audio.suspend_playback().await;
        self.report_session_complete();
        self.activate(requested, names, mode).await;
        Ok(())
    }

    pub async fn close_flashcard(&self) {
        self.ctx.audio.suspend_playback().await;
        self.report_session_complete();
        {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.active = false;
            state.round = None;
        }
        self.ctx.audio.flush_all_audio_sessions().await;
        self.ctx.audio.start_new_session().await;
        self.ctx.progress.flush().await;
        log::info!("Quiz closed");
    }

    /// Point the widget at another wordset. Cached words are dropped when the
    /// scope really changed, and a running quiz starts over.
    pub async fn set_wordset_scope(&self, scope: WordsetScope) -> bool {
        self.ctx.progress.set_wordset_id(scope.wordset_id);
        let changed = self.ctx.loader.set_wordset_scope(scope);
        if changed && self.is_active() {
            if let Err(e) = self.restart_quiz().await {
                log::warn!("Could not restart after a wordset change: {e}");
            }
        }
        changed
    }

    /// Returns whether `word_id` is now starred.
    pub fn toggle_star(&self, word_id: WordId) -> bool {
        let mut state = self.state.borrow_mut();
        let starred = state.scheduler.starred_mut().toggle(word_id);
        if let Some(round) = state.round.as_mut().filter(|r| r.word.id == word_id) {
            round.view.starred = starred;
        }
        starred
    }

    pub fn set_star_mode(&self, mode: StarMode) {
        self.state.borrow_mut().scheduler.starred_mut().set_mode(mode);
    }

    pub fn star_mode(&self) -> StarMode {
        self.state.borrow().scheduler.starred().mode()
    }

    pub fn on_visibility_change(&self, hidden: bool) {
        self.ctx.progress.on_visibility_change(hidden);
    }

    fn eligible_categories(&self, requested: &[String], mode: QuizMode) -> Result<Vec<String>, QuizError> {
        if requested.is_empty() {
            return Err(QuizError::NoCategories);
        }
        let names: Vec<String> = requested
            .iter()
            .filter(|name| mode.supports(&self.ctx.loader.category_config(name)))
            .cloned()
            .collect();
        if names.is_empty() {
            return Err(QuizError::ModeUnavailable(mode));
        }
        Ok(names)
    }

    async fn activate(&self, requested: Vec<String>, names: Vec<String>, mode: QuizMode) {
        self.ctx.audio.suspend_playback().await;
        {
            let mut state = self.state.borrow_mut();
            let first = self
                .ctx
                .config
                .first_category
                .clone()
                .filter(|first| names.contains(first));
            state.generation += 1;
            state.mode = ModeController::new(mode, &self.ctx.config);
            state.scheduler.reset(names.clone(), first);
            state.requested = requested;
            state.categories = names;
            state.results = QuizResults::default();
            state.round = None;
            state.rounds_played = 0;
            state.saw_words = false;
            state.finished = false;
            state.session_reported = false;
            state.active = true;
        }
        self.ctx.loader.clear_failures();
        self.ctx.audio.flush_all_audio_sessions().await;
        self.ctx.audio.start_new_session().await;
        self.ctx.audio.resume_playback();
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.active && state.generation == generation
    }

    /// Pick the next target and prepare its round.
    pub async fn start_quiz_round(&self) -> Result<RoundView, QuizError> {
        let generation = {
            let state = self.state.borrow();
            if !state.active {
                return Err(QuizError::Closed);
            }
            if state.finished {
                return Ok(RoundView::Results(self.summary()));
            }
            state.generation
        };

        self.ctx.audio.start_new_session().await;
        if !self.is_current(generation) {
            return Ok(RoundView::Interrupted);
        }

        // Only the category about to be shown is awaited. The rest warm in the
        // background and stay pending in the scheduler until they arrive.
        let mut tried: HashSet<String> = HashSet::new();
        let selection = loop {
            self.sync_loaded_categories();
            let upcoming = self.state.borrow().scheduler.upcoming_category();
            let next = match upcoming.filter(|n| self.is_pending(n) && !tried.contains(n)) {
                Some(name) => name,
                None => {
                    let selection = self.with_mode(|controller, ctx| controller.select_target_word(ctx));
                    if !matches!(selection, Selection::Exhausted) {
                        break selection;
                    }
                    let pending = self.state.borrow().scheduler.next_pending();
                    match pending.filter(|n| !tried.contains(n)) {
                        Some(name) => name,
                        None => break selection,
                    }
                }
            };
            tried.insert(next.clone());
            let count = self.ctx.loader.load_resources_for_category(&next, true).await;
            log::debug!("{next} ready with {count} words");
            if !self.is_current(generation) {
                return Ok(RoundView::Interrupted);
            }
        };
        let view = match selection {
            Selection::Target(target) => RoundView::Question(self.present(target)),
            Selection::Introduce { words, category } => {
                self.run_introductions(words, category, generation).await
            }
            Selection::Exhausted => self.finish(),
        };
        Ok(view)
    }

    fn is_pending(&self, name: &str) -> bool {
        self.state.borrow().scheduler.is_pending(name)
    }

    // Categories that have neither loaded nor just failed are still pending.
    fn sync_loaded_categories(&self) {
        let loader = &self.ctx.loader;
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let pending: Vec<String> = state
            .categories
            .iter()
            .filter(|n| !loader.is_loaded(n) && !loader.has_failed(n))
            .cloned()
            .collect();
        state.scheduler.set_pending(pending);
        let names = &state.categories;
        state.saw_words |= loader.with_pools(|pools| names.iter().any(|n| !pools.scoped(n).is_empty()));
        if let Some(gender) = state.mode.as_gender_mut() {
            loader.with_pools(|pools| gender.refresh_labels(pools, names));
        }
    }

    fn with_mode<R>(&self, f: impl FnOnce(&mut ModeController, &mut ModeContext<'_>) -> R) -> R {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let mut rng = self.ctx.rng.borrow_mut();
        self.ctx.loader.with_pools(|pools| {
            let mut ctx = ModeContext {
                pools,
                scheduler: &mut state.scheduler,
                rng: &mut *rng,
                config: &self.ctx.config,
            };
            f(&mut state.mode, &mut ctx)
        })
    }

    fn with_learning<R>(&self, f: impl FnOnce(&mut LearningMode) -> R) -> Option<R> {
        self.state.borrow_mut().mode.as_learning_mut().map(f)
    }

    fn present(&self, target: SelectedTarget) -> QuestionView {
        let SelectedTarget {
            word,
            category,
            category_changed,
        } = target;
        let category_config = self.ctx.loader.category_config(&category);
        let mode = self.mode();

        if category_changed {
            log::debug!("Category changed to {category}");
            self.ctx.observer.category_changed(category_config.display_name());
            let upcoming = self.state.borrow().scheduler.upcoming_categories(2);
            self.ctx.loader.preload_upcoming_categories(upcoming);
            self.ctx.progress.enqueue(RawProgressEvent::category_study(
                mode,
                &self.ctx.category_ref(&category),
            ));
        }

        let (choices, correct_index) = self.build_choices(&word, &category, &category_config);
        let prompt_audio = self.start_prompt_audio(&word, &category_config, mode);
        if category_config.requires_image() {
            self.preload_media(vec![Rc::clone(&word)], &category_config);
        }
        if mode == QuizMode::Listening {
            self.ctx.progress.enqueue(RawProgressEvent::word_exposure(
                mode,
                word.id,
                &self.ctx.category_ref(&category),
            ));
        }

        let mut state = self.state.borrow_mut();
        state.rounds_played += 1;
        let view = QuestionView {
            round: state.rounds_played,
            mode,
            category: category.clone(),
            category_label: category_config.display_name().to_string(),
            category_changed,
            target: (*word).clone(),
            prompt_audio,
            choices,
            correct_index,
            starred: state.scheduler.starred().is_starred(word.id),
        };
        state.round = Some(ActiveRound {
            view: view.clone(),
            word,
            category,
            had_wrong: false,
            wrong_choices: Vec::new(),
        });
        view
    }

    fn build_choices(
        &self,
        word: &Rc<Word>,
        category: &str,
        category_config: &CategoryConfig,
    ) -> (RoundChoices, Option<usize>) {
        let state = self.state.borrow();
        let (min_options, max_options) = self.ctx.config.option_bounds();
        let learning_pool = match &state.mode {
            ModeController::Gender(gender) => {
                let mut labels = gender.answer_set(word);
                let correct = labels.first().cloned();
                labels.shuffle(&mut *self.ctx.rng.borrow_mut());
                let index = correct.and_then(|c| labels.iter().position(|l| *l == c));
                return (RoundChoices::Genders(labels), index);
            }
            ModeController::Listening(_) | ModeController::SelfCheck(_) => {
                return (RoundChoices::None, None);
            }
            ModeController::Learning(learning) => Some(learning.introduced_words().to_vec()),
            ModeController::Practice(_) => None,
        };
        let desired = state.mode.choice_count(&self.ctx.config);
        drop(state);

        let mut accepted = Vec::new();
        let chosen = self.ctx.loader.with_pools(|pools| {
            let (primary, supplemental) = match &learning_pool {
                Some(introduced) => (introduced.as_slice(), pools.options(category).to_vec()),
                None => (pools.options(category), pools.supplemental(category)),
            };
            let request = OptionRequest {
                target: word,
                desired,
                primary,
                supplemental: &supplemental,
                text_mode: category_config.option_type.is_text_mode(),
                min_options,
                max_options,
            };
            build_options(
                &request,
                &mut *self.ctx.rng.borrow_mut(),
                self.ctx.layout.as_ref(),
                &mut |w| accepted.push(Rc::clone(w)),
            )
        });
        self.preload_media(accepted, category_config);

        let mut display = chosen;
        display.shuffle(&mut *self.ctx.rng.borrow_mut());
        let index = display.iter().position(|w| w.id == word.id);
        let cards = display.iter().map(|w| (**w).clone()).collect();
        (RoundChoices::Words(cards), index)
    }

    /// Warm the media the cards for `words` will need, in the background.
    fn preload_media(&self, words: Vec<Rc<Word>>, category_config: &CategoryConfig) {
        let mut audio = Vec::new();
        let mut images = Vec::new();
        for word in &words {
            if category_config.requires_audio() {
                let url = self.ctx.loader.resolve_playable_audio(word);
                if !url.is_empty() {
                    audio.push(url);
                }
            }
            if category_config.requires_image() {
                if let Some(image) = word.image.clone() {
                    images.push(image);
                }
            }
        }
        if audio.is_empty() && images.is_empty() {
            return;
        }
        let loader = self.ctx.loader.clone();
        self.ctx.platform.spawn(Box::pin(async move {
            let audio_loads = join_all(audio.iter().map(|url| loader.load_audio(url)));
            let image_loads = join_all(images.iter().map(|url| loader.load_image(url)));
            futures::join!(audio_loads, image_loads);
        }));
    }

    /// Create and start the target word's audio. Returns its URL.
    fn start_prompt_audio(&self, word: &Word, category_config: &CategoryConfig, mode: QuizMode) -> Option<String> {
        let wants_audio = category_config.prompt_type == PromptType::Audio || mode == QuizMode::Listening;
        let url = self.ctx.loader.resolve_playable_audio(word);
        let handle = wants_audio
            .then(|| {
                self.ctx.audio.create_audio(
                    &url,
                    AudioOptions {
                        kind: AudioKind::Prompt,
                        preload: true,
                    },
                )
            })
            .flatten();
        self.ctx.audio.set_target_word_audio(handle.clone());
        let handle = handle?;

        let audio = self.ctx.audio.clone();
        let url = handle.url().to_string();
        self.ctx.platform.spawn(Box::pin(async move {
            if let Err(e) = audio.play_audio(&handle).await {
                log::debug!("Prompt audio did not play: {e}");
            }
        }));
        Some(url)
    }

    /// Play each word's introduction, one repetition after another.
    async fn run_introductions(&self, words: Vec<Rc<Word>>, category: String, generation: u64) -> RoundView {
        let category_ref = self.ctx.category_ref(&category);
        for word in &words {
            let pattern = introduction_pattern(word, &self.ctx.config, &mut *self.ctx.rng.borrow_mut());
            if pattern.is_empty() {
                log::warn!("Word {} has nothing to play for its introduction", word.id);
                self.with_learning(|learning| learning.mark_introduced(word));
                continue;
            }

            let mut steps = pin!(self.introduction_playback(pattern).enumerate());
            while let Some((index, completion)) = steps.next().await {
                if !self.is_current(generation) {
                    return RoundView::Interrupted;
                }
                if completion == Completion::TimedOut {
                    log::debug!("Introduction audio for {} timed out, moving on", word.id);
                }
                self.with_learning(|learning| learning.record_introduction_step(word));
                self.ctx.observer.introduction_step(word, index + 1);
            }

            self.ctx.progress.enqueue(RawProgressEvent::word_exposure(
                QuizMode::Learning,
                word.id,
                &category_ref,
            ));
        }

        RoundView::Introduction {
            words: words.iter().map(|w| (**w).clone()).collect(),
            category,
        }
    }

    fn introduction_playback(&self, pattern: Vec<String>) -> impl Stream<Item = Completion> + '_ {
        let watchdog = self.ctx.config.timings.introduction_watchdog();
        stream::iter(pattern).then(move |url| async move {
            let audio = &self.ctx.audio;
            let Some(handle) = audio.create_audio(
                &url,
                AudioOptions {
                    kind: AudioKind::Introduction,
                    preload: true,
                },
            ) else {
                return Completion::Skipped;
            };
            let completion = audio.play_to_completion(&handle, watchdog).await;
            audio.cleanup_single_audio(&handle);
            completion
        })
    }

    fn finish(&self) -> RoundView {
        let saw_words = self.state.borrow().saw_words;
        if !saw_words {
            log::error!("None of the selected categories have any words");
            return RoundView::LoadingError;
        }

        {
            let mut state = self.state.borrow_mut();
            state.finished = true;
            state.round = None;
        }
        self.ctx.audio.set_target_word_audio(None);
        let summary = self.summary();
        log::info!(
            "Quiz finished: {} of {} rounds right on the first try",
            summary.correct_on_first_try,
            summary.rounds_played
        );
        self.ctx.observer.results_ready(&summary);
        self.report_session_complete();
        RoundView::Results(summary)
    }

    fn summary(&self) -> QuizSummary {
        let state = self.state.borrow();
        QuizSummary {
            mode: state.mode.mode(),
            correct_on_first_try: state.results.correct_on_first_try,
            incorrect: state.results.incorrect.clone(),
            rounds_played: state.rounds_played,
            categories: state.categories.clone(),
        }
    }

    /// Queue the end-of-session event once per activation, if anything was played.
    fn report_session_complete(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.session_reported || !state.active || state.rounds_played == 0 {
                return;
            }
            state.session_reported = true;
        }
        let summary = self.summary();
        let payload = serde_json::to_value(&summary).unwrap_or_default();
        self.ctx
            .progress
            .enqueue(RawProgressEvent::mode_session_complete(summary.mode, payload));
    }

    pub async fn on_correct_answer(&self) -> Result<AnswerOutcome, QuizError> {
        let round = {
            let mut state = self.state.borrow_mut();
            if !state.active {
                return Err(QuizError::Closed);
            }
            state.round.take()
        };
        let Some(round) = round else {
            return Ok(AnswerOutcome::Ignored);
        };

        let outcome = RoundOutcome {
            word: Rc::clone(&round.word),
            category: round.category.clone(),
            correct: true,
            had_wrong: round.had_wrong,
        };
        let mode = self.complete_round(&outcome);

        let target = self.ctx.audio.current_target();
        let fade = async {
            if let Some(target) = &target {
                self.ctx.audio.fade_out_audio(target, TARGET_FADE).await;
            }
        };
        if mode == QuizMode::Listening {
            fade.await;
        } else {
            futures::join!(fade, self.ctx.audio.play_feedback(FeedbackSound::Correct));
        }
        Ok(AnswerOutcome::RoundComplete {
            first_try: outcome.first_try(),
        })
    }

    /// The learner picked the card at `choice_index` and it was wrong.
    pub async fn on_wrong_answer(&self, choice_index: usize) -> Result<AnswerOutcome, QuizError> {
        let (mode, word, category, first_miss) = {
            let mut state = self.state.borrow_mut();
            if !state.active {
                return Err(QuizError::Closed);
            }
            let mode = state.mode.mode();
            let Some(round) = state.round.as_mut() else {
                return Ok(AnswerOutcome::Ignored);
            };
            if mode == QuizMode::Listening || round.wrong_choices.contains(&choice_index) {
                return Ok(AnswerOutcome::Ignored);
            }
            round.wrong_choices.push(choice_index);
            let first_miss = !std::mem::replace(&mut round.had_wrong, true);
            (mode, Rc::clone(&round.word), round.category.clone(), first_miss)
        };

        if first_miss {
            let keeps_results = self.with_mode(|controller, ctx| {
                controller.record_wrong_attempt(ctx, &word, &category);
                controller.keeps_results()
            });
            if keeps_results {
                self.state.borrow_mut().results.record_incorrect(word.id);
            }
        }

        if mode == QuizMode::SelfCheck {
            self.state.borrow_mut().round = None;
            self.complete_round(&RoundOutcome {
                word,
                category,
                correct: false,
                had_wrong: true,
            });
            self.ctx.audio.play_feedback(FeedbackSound::Wrong).await;
            return Ok(AnswerOutcome::RoundComplete { first_try: false });
        }

        self.ctx.audio.play_feedback(FeedbackSound::Wrong).await;
        Ok(AnswerOutcome::TryAgain)
    }

    fn complete_round(&self, outcome: &RoundOutcome) -> QuizMode {
        let (mode, keeps_results) = self.with_mode(|controller, ctx| {
            controller.record_outcome(ctx, outcome);
            (controller.mode(), controller.keeps_results())
        });
        if keeps_results && outcome.first_try() {
            self.state.borrow_mut().results.correct_on_first_try += 1;
        }
        if mode != QuizMode::Listening {
            self.ctx.progress.enqueue(RawProgressEvent::word_outcome(
                mode,
                outcome.word.id,
                &self.ctx.category_ref(&outcome.category),
                outcome.correct,
                outcome.had_wrong,
            ));
        }
        mode
    }
}

fn normalize_categories(categories: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in categories {
        let name = name.trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TokioPlatform;
    use crate::simulation::{Answer, QuizSimulation, StaticWordSource, word_with_audio};
    use tokio::task::LocalSet;

    fn animals() -> StaticWordSource {
        StaticWordSource::new().with_category(
            "Animals",
            vec![
                word_with_audio(1, "Cat"),
                word_with_audio(2, "Dog"),
                word_with_audio(3, "Bird"),
            ],
        )
    }

    fn config() -> QuizConfig {
        QuizConfig {
            seed: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_category_names_are_cleaned() {
        assert_eq!(
            normalize_categories(vec![" Animals ".into(), "".into(), "Animals".into(), "Food".into()]),
            vec!["Animals".to_string(), "Food".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_points_reject_bad_requests() {
        let sim = QuizSimulation::new(config(), animals(), Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                assert_eq!(sim.widget.start_quiz_round().await, Err(QuizError::Closed));
                assert_eq!(
                    sim.widget.init_flashcard_widget(vec![" ".into()], QuizMode::Practice).await,
                    Err(QuizError::NoCategories)
                );
                assert_eq!(
                    sim.widget.init_flashcard_widget(vec!["Animals".into()], QuizMode::Gender).await,
                    Err(QuizError::ModeUnavailable(QuizMode::Gender))
                );
                assert_eq!(sim.widget.switch_mode(QuizMode::Learning).await, Err(QuizError::Closed));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_animals_round() {
        let sim = QuizSimulation::new(config(), animals(), Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                sim.widget
                    .init_flashcard_widget(vec!["Animals".into()], QuizMode::Practice)
                    .await
                    .unwrap();
                let RoundView::Question(question) = sim.widget.start_quiz_round().await.unwrap() else {
                    panic!("expected a question");
                };
                assert!([1, 2, 3].contains(&question.target.id));
                assert_eq!(question.round, 1);
                let RoundChoices::Words(cards) = &question.choices else {
                    panic!("expected word cards");
                };
                let mut ids: Vec<_> = cards.iter().map(|w| w.id).collect();
                ids.sort();
                assert_eq!(ids, vec![1, 2, 3]);
                let correct = question.correct_index.unwrap();
                assert_eq!(cards[correct].id, question.target.id);
                assert_eq!(sim.widget.current_round(), Some(question));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_then_right_counts_once() {
        let sim = QuizSimulation::new(config(), animals(), Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                sim.widget
                    .init_flashcard_widget(vec!["Animals".into()], QuizMode::Practice)
                    .await
                    .unwrap();
                let RoundView::Question(question) = sim.widget.start_quiz_round().await.unwrap() else {
                    panic!("expected a question");
                };
                let wrong = (question.correct_index.unwrap() + 1) % question.choices.len();
                assert_eq!(sim.widget.on_wrong_answer(wrong).await, Ok(AnswerOutcome::TryAgain));
                assert_eq!(sim.widget.on_wrong_answer(wrong).await, Ok(AnswerOutcome::Ignored));
                assert_eq!(
                    sim.widget.on_correct_answer().await,
                    Ok(AnswerOutcome::RoundComplete { first_try: false })
                );
                assert_eq!(sim.widget.on_correct_answer().await, Ok(AnswerOutcome::Ignored));

                let results = sim.widget.results();
                assert_eq!(results.correct_on_first_try, 0);
                assert_eq!(results.incorrect, vec![question.target.id]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_after_every_word() {
        let sim = QuizSimulation::new(config(), animals(), Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                sim.widget
                    .init_flashcard_widget(vec!["Animals".into()], QuizMode::Practice)
                    .await
                    .unwrap();
                let report = sim.run(20, |_| Answer::Correct).await.unwrap();
                let mut ids = report.target_ids();
                ids.sort();
                assert_eq!(ids, vec![1, 2, 3]);
                let Some(RoundView::Results(summary)) = report.final_view else {
                    panic!("expected results");
                };
                assert_eq!(summary.correct_on_first_try, 3);
                assert_eq!(sim.observer.results().len(), 1);
                // asking again keeps showing the same results
                assert!(matches!(
                    sim.widget.start_quiz_round().await,
                    Ok(RoundView::Results(_))
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_categories_report_loading_error() {
        let source = StaticWordSource::new().with_category("Animals", Vec::new());
        let sim = QuizSimulation::new(config(), source, Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                sim.widget
                    .init_flashcard_widget(vec!["Animals".into()], QuizMode::Practice)
                    .await
                    .unwrap();
                assert_eq!(sim.widget.start_quiz_round().await, Ok(RoundView::LoadingError));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_star_toggle_updates_round() {
        let sim = QuizSimulation::new(config(), animals(), Rc::new(TokioPlatform::new()));
        let local = LocalSet::new();
        local
            .run_until(async {
                sim.widget
                    .init_flashcard_widget(vec!["Animals".into()], QuizMode::Practice)
                    .await
                    .unwrap();
                let RoundView::Question(question) = sim.widget.start_quiz_round().await.unwrap() else {
                    panic!("expected a question");
                };
                assert!(!question.starred);
                assert!(sim.widget.toggle_star(question.target.id));
                assert_eq!(sim.widget.current_round().map(|r| r.starred), Some(true));
                sim.widget.set_star_mode(StarMode::Only);
                assert_eq!(sim.widget.star_mode(), StarMode::Only);
            })
            .await;
    }
}
