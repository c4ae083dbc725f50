//! In-memory stand-ins for the browser and the content server, plus a driver
//! that plays a whole quiz headlessly. Used by the tests and for tuning the
//! scheduler offline.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use url::Url;
use vocab_utils::{Word, WordId};

use crate::audio::{AudioElement, AudioHost};
use crate::config::QuizConfig;
use crate::error::{FetchError, PlaybackError, QuizError, TransportError};
use crate::loader::{LoadOutcome, MediaPreloader, WordFetchRequest, WordFetchResponse, WordSource};
use crate::observer::QuizObserver;
use crate::options::UnboundedLayout;
use crate::platform::Platform;
use crate::progress::{ProgressBatch, ProgressEvent, ProgressTransport};
use crate::quiz::{AnswerOutcome, FlashcardWidget, QuestionView, QuizServices, QuizSummary, RoundView};

/// What the next `play()` on a URL does.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayScript {
    Fail(PlaybackError),
    /// Never settles on its own. A `pause()` rejects it with `Aborted`, the
    /// way browsers do.
    Hang,
}

type Scripts = Rc<RefCell<HashMap<String, VecDeque<PlayScript>>>>;

#[derive(Clone, Default)]
pub struct FakeAudioHost {
    origin: Option<Url>,
    elements: Rc<RefCell<Vec<Rc<FakeAudioElement>>>>,
    scripts: Scripts,
    auto_end: Rc<Cell<bool>>,
}

impl FakeAudioHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(origin: &str) -> Self {
        Self {
            origin: Url::parse(origin).ok(),
            ..Self::default()
        }
    }

    pub fn script_play(&self, url: &str, script: PlayScript) {
        self.scripts
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(script);
    }

    /// When set, every successful `play()` runs straight to the end.
    pub fn set_auto_end(&self, auto_end: bool) {
        self.auto_end.set(auto_end);
    }

    /// The most recently created element for `url`.
    pub fn element(&self, url: &str) -> Option<Rc<FakeAudioElement>> {
        self.elements
            .borrow()
            .iter()
            .rev()
            .find(|e| e.url == url)
            .cloned()
    }

    pub fn elements(&self) -> Vec<Rc<FakeAudioElement>> {
        self.elements.borrow().clone()
    }

    pub fn playing_urls(&self) -> Vec<String> {
        self.elements
            .borrow()
            .iter()
            .filter(|e| !e.is_paused())
            .map(|e| e.url.clone())
            .collect()
    }
}

impl AudioHost for FakeAudioHost {
    fn create_element(&self, url: &str, _preload: bool) -> Rc<dyn AudioElement> {
        let element = Rc::new(FakeAudioElement {
            url: url.to_string(),
            scripts: Rc::clone(&self.scripts),
            auto_end: Rc::clone(&self.auto_end),
            state: RefCell::new(ElementState {
                source: url.to_string(),
                paused: true,
                volume: 1.0,
                ..Default::default()
            }),
        });
        self.elements.borrow_mut().push(Rc::clone(&element));
        element
    }

    fn page_origin(&self) -> Option<Url> {
        self.origin.clone()
    }
}

pub struct FakeAudioElement {
    url: String,
    scripts: Scripts,
    auto_end: Rc<Cell<bool>>,
    state: RefCell<ElementState>,
}

#[derive(Default)]
struct ElementState {
    source: String,
    paused: bool,
    current_time: f64,
    volume: f64,
    volume_changes: usize,
    play_calls: usize,
    detached: bool,
    teardowns: usize,
    on_error: Option<Box<dyn FnOnce()>>,
    ended_waiters: Vec<oneshot::Sender<()>>,
    pending_play: Option<oneshot::Sender<Result<(), PlaybackError>>>,
}

impl FakeAudioElement {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn play_calls(&self) -> usize {
        self.state.borrow().play_calls
    }

    pub fn is_detached(&self) -> bool {
        self.state.borrow().detached
    }

    pub fn source(&self) -> String {
        self.state.borrow().source.clone()
    }

    pub fn volume_changes(&self) -> usize {
        self.state.borrow().volume_changes
    }

    pub fn teardowns(&self) -> usize {
        self.state.borrow().teardowns
    }

    /// Fire the element's load error.
    pub fn fail_to_load(&self) {
        let callback = self.state.borrow_mut().on_error.take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Play to the end of the media.
    pub fn finish_playback(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            state.paused = true;
            state.current_time = 0.0;
            std::mem::take(&mut state.ended_waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}

impl AudioElement for FakeAudioElement {
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlaybackError>> {
        let script = self
            .scripts
            .borrow_mut()
            .get_mut(&self.url)
            .and_then(VecDeque::pop_front);
        let mut state = self.state.borrow_mut();
        state.play_calls += 1;
        if state.source.is_empty() {
            return future::ready(Err(PlaybackError::MissingSource)).boxed_local();
        }
        match script {
            Some(PlayScript::Fail(e)) => future::ready(Err(e)).boxed_local(),
            Some(PlayScript::Hang) => {
                let (tx, rx) = oneshot::channel();
                state.paused = false;
                state.pending_play = Some(tx);
                rx.map(|result| result.unwrap_or(Err(PlaybackError::Aborted)))
                    .boxed_local()
            }
            None => {
                state.paused = false;
                drop(state);
                if self.auto_end.get() {
                    self.finish_playback();
                }
                future::ready(Ok(())).boxed_local()
            }
        }
    }

    fn pause(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            state.paused = true;
            state.pending_play.take()
        };
        if let Some(pending) = pending {
            let _ = pending.send(Err(PlaybackError::Aborted));
        }
    }

    fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    fn set_current_time(&self, seconds: f64) {
        self.state.borrow_mut().current_time = seconds;
    }

    fn volume(&self) -> f64 {
        self.state.borrow().volume
    }

    fn set_volume(&self, volume: f64) {
        let mut state = self.state.borrow_mut();
        state.volume = volume;
        state.volume_changes += 1;
    }

    fn clear_handlers(&self) {
        let mut state = self.state.borrow_mut();
        state.on_error = None;
        state.ended_waiters.clear();
    }

    fn clear_source(&self) {
        self.state.borrow_mut().source.clear();
    }

    fn load(&self) {}

    fn detach(&self) {
        let mut state = self.state.borrow_mut();
        state.detached = true;
        state.teardowns += 1;
    }

    fn ended(&self) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.state.borrow_mut().ended_waiters.push(tx);
        async move {
            // a dropped handler never fires
            if rx.await.is_err() {
                future::pending::<()>().await;
            }
        }
        .boxed_local()
    }

    fn on_error(&self, callback: Box<dyn FnOnce()>) {
        self.state.borrow_mut().on_error = Some(callback);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    autoplay_blocked: Cell<usize>,
    categories: RefCell<Vec<String>>,
    introduction_steps: RefCell<Vec<(WordId, usize)>>,
    results: RefCell<Vec<QuizSummary>>,
}

impl RecordingObserver {
    pub fn autoplay_blocked_count(&self) -> usize {
        self.autoplay_blocked.get()
    }

    pub fn categories_shown(&self) -> Vec<String> {
        self.categories.borrow().clone()
    }

    pub fn introduction_steps(&self) -> Vec<(WordId, usize)> {
        self.introduction_steps.borrow().clone()
    }

    pub fn results(&self) -> Vec<QuizSummary> {
        self.results.borrow().clone()
    }
}

impl QuizObserver for RecordingObserver {
    fn autoplay_blocked(&self) {
        self.autoplay_blocked.set(self.autoplay_blocked.get() + 1);
    }

    fn category_changed(&self, name: &str) {
        self.categories.borrow_mut().push(name.to_string());
    }

    fn introduction_step(&self, word: &Word, repetition: usize) {
        self.introduction_steps
            .borrow_mut()
            .push((word.id, repetition));
    }

    fn results_ready(&self, summary: &QuizSummary) {
        self.results.borrow_mut().push(summary.clone());
    }
}

/// Serves fixed word lists per category.
#[derive(Clone, Default)]
pub struct StaticWordSource {
    inner: Rc<SourceInner>,
}

#[derive(Default)]
struct SourceInner {
    categories: RefCell<HashMap<String, Vec<Word>>>,
    delay: RefCell<Option<(Rc<dyn Platform>, Duration)>>,
    category_delays: RefCell<HashMap<String, (Rc<dyn Platform>, Duration)>>,
    failing: RefCell<HashSet<String>>,
    fetch_counts: RefCell<HashMap<String, usize>>,
    requests: RefCell<Vec<WordFetchRequest>>,
}

impl StaticWordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(self, name: &str, words: Vec<Word>) -> Self {
        self.set_category(name, words);
        self
    }

    pub fn with_delay(self, platform: Rc<dyn Platform>, delay: Duration) -> Self {
        *self.inner.delay.borrow_mut() = Some((platform, delay));
        self
    }

    /// Slow down fetches for `name` only. Overrides [`Self::with_delay`].
    pub fn with_category_delay(self, name: &str, platform: Rc<dyn Platform>, delay: Duration) -> Self {
        self.inner
            .category_delays
            .borrow_mut()
            .insert(name.to_string(), (platform, delay));
        self
    }

    pub fn set_category(&self, name: &str, words: Vec<Word>) {
        self.inner
            .categories
            .borrow_mut()
            .insert(name.to_string(), words);
    }

    /// The next fetch for `name` fails.
    pub fn fail_next(&self, name: &str) {
        self.inner.failing.borrow_mut().insert(name.to_string());
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.inner
            .fetch_counts
            .borrow()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<WordFetchRequest> {
        self.inner.requests.borrow().clone()
    }
}

impl WordSource for StaticWordSource {
    fn fetch_words(
        &self,
        request: WordFetchRequest,
    ) -> LocalBoxFuture<'static, Result<WordFetchResponse, FetchError>> {
        let name = request.category.clone();
        *self
            .inner
            .fetch_counts
            .borrow_mut()
            .entry(name.clone())
            .or_default() += 1;
        self.inner.requests.borrow_mut().push(request);

        let result = if self.inner.failing.borrow_mut().remove(&name) {
            Err(FetchError::Request(format!("simulated outage for {name}")))
        } else {
            Ok(WordFetchResponse {
                success: true,
                data: self
                    .inner
                    .categories
                    .borrow()
                    .get(&name)
                    .cloned()
                    .unwrap_or_default(),
            })
        };
        let sleep = match self.inner.category_delays.borrow().get(&name) {
            Some((platform, delay)) => Some(platform.sleep(*delay)),
            None => self
                .inner
                .delay
                .borrow()
                .as_ref()
                .map(|(platform, delay)| platform.sleep(*delay)),
        };
        async move {
            if let Some(sleep) = sleep {
                sleep.await;
            }
            result
        }
        .boxed_local()
    }
}

/// Settles every preload at once unless told otherwise.
#[derive(Clone, Default)]
pub struct InstantPreloader {
    inner: Rc<RefCell<PreloaderState>>,
}

#[derive(Default)]
struct PreloaderState {
    hanging: HashSet<String>,
    failing: HashSet<String>,
    requests: HashMap<String, usize>,
}

impl InstantPreloader {
    pub fn hang(&self, url: &str) {
        self.inner.borrow_mut().hanging.insert(url.to_string());
    }

    pub fn fail(&self, url: &str) {
        self.inner.borrow_mut().failing.insert(url.to_string());
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.inner.borrow().requests.get(url).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.inner.borrow().requests.values().sum()
    }

    fn preload(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome> {
        let mut state = self.inner.borrow_mut();
        *state.requests.entry(url.to_string()).or_default() += 1;
        if state.hanging.contains(url) {
            future::pending().boxed_local()
        } else if state.failing.contains(url) {
            future::ready(LoadOutcome::Failed).boxed_local()
        } else {
            future::ready(LoadOutcome::Loaded).boxed_local()
        }
    }
}

impl MediaPreloader for InstantPreloader {
    fn preload_audio(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome> {
        self.preload(url)
    }

    fn preload_image(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome> {
        self.preload(url)
    }
}

#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Rc<RefCell<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    batches: Vec<ProgressBatch>,
    attempts: usize,
    failing: bool,
    delay: Option<(Rc<dyn Platform>, Duration)>,
}

impl RecordingTransport {
    pub fn set_failing(&self, failing: bool) {
        self.inner.borrow_mut().failing = failing;
    }

    pub fn set_delay(&self, platform: Rc<dyn Platform>, delay: Duration) {
        self.inner.borrow_mut().delay = Some((platform, delay));
    }

    /// Batches that were delivered.
    pub fn batches(&self) -> Vec<ProgressBatch> {
        self.inner.borrow().batches.clone()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.inner
            .borrow()
            .batches
            .iter()
            .flat_map(|b| b.events.iter().cloned())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.inner.borrow().attempts
    }
}

impl ProgressTransport for RecordingTransport {
    fn send_batch(&self, batch: ProgressBatch) -> LocalBoxFuture<'static, Result<(), TransportError>> {
        let sleep = {
            let mut state = self.inner.borrow_mut();
            state.attempts += 1;
            state
                .delay
                .as_ref()
                .map(|(platform, delay)| platform.sleep(*delay))
        };
        let inner = Rc::clone(&self.inner);
        async move {
            if let Some(sleep) = sleep {
                sleep.await;
            }
            let mut state = inner.borrow_mut();
            if state.failing {
                return Err(TransportError::Status(503));
            }
            state.batches.push(batch);
            Ok(())
        }
        .boxed_local()
    }
}

/// A word with a playable recording and no picture.
pub fn word_with_audio(id: WordId, title: &str) -> Word {
    Word {
        id,
        title: title.to_string(),
        audio: Some(format!("https://example.org/audio/{id}.mp3")),
        has_audio: true,
        ..Default::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Correct,
    /// Pick a wrong card first, then the right one if the round allows it.
    Wrong,
}

#[derive(Clone, Debug, Default)]
pub struct SimulationReport {
    /// (word, category) for every question shown, in order.
    pub targets: Vec<(WordId, String)>,
    pub introduced: Vec<WordId>,
    pub final_view: Option<RoundView>,
}

impl SimulationReport {
    pub fn target_ids(&self) -> Vec<WordId> {
        self.targets.iter().map(|(id, _)| *id).collect()
    }
}

/// A widget wired to in-memory collaborators.
pub struct QuizSimulation {
    pub widget: FlashcardWidget,
    pub audio: FakeAudioHost,
    pub words: StaticWordSource,
    pub preloader: InstantPreloader,
    pub transport: RecordingTransport,
    pub observer: Rc<RecordingObserver>,
}

impl QuizSimulation {
    /// Audio runs to the end the moment it starts, so introductions and
    /// feedback never wait on a watchdog.
    pub fn new(config: QuizConfig, words: StaticWordSource, platform: Rc<dyn Platform>) -> Self {
        let audio = FakeAudioHost::new();
        audio.set_auto_end(true);
        let preloader = InstantPreloader::default();
        let transport = RecordingTransport::default();
        let observer = Rc::new(RecordingObserver::default());
        let widget = FlashcardWidget::new(
            config,
            QuizServices {
                audio_host: Rc::new(audio.clone()),
                preloader: Rc::new(preloader.clone()),
                word_source: Rc::new(words.clone()),
                transport: Rc::new(transport.clone()),
                platform,
                observer: observer.clone(),
                layout: Rc::new(UnboundedLayout),
            },
        );
        Self {
            widget,
            audio,
            words,
            preloader,
            transport,
            observer,
        }
    }

    /// Play up to `max_rounds` rounds, answering each question as `strategy`
    /// says. Stops early at the results screen or any other terminal view.
    pub async fn run(
        &self,
        max_rounds: usize,
        mut strategy: impl FnMut(&QuestionView) -> Answer,
    ) -> Result<SimulationReport, QuizError> {
        let mut report = SimulationReport::default();
        for _ in 0..max_rounds {
            match self.widget.start_quiz_round().await? {
                RoundView::Question(question) => {
                    report
                        .targets
                        .push((question.target.id, question.category.clone()));
                    self.answer(&question, strategy(&question)).await?;
                }
                RoundView::Introduction { words, .. } => {
                    report.introduced.extend(words.iter().map(|w| w.id));
                }
                terminal => {
                    report.final_view = Some(terminal);
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn answer(&self, question: &QuestionView, answer: Answer) -> Result<(), QuizError> {
        if answer == Answer::Wrong {
            let wrong_index = (0..question.choices.len().max(1))
                .find(|i| Some(*i) != question.correct_index)
                .unwrap_or(0);
            let outcome = self.widget.on_wrong_answer(wrong_index).await?;
            if outcome != AnswerOutcome::TryAgain {
                return Ok(());
            }
        }
        self.widget.on_correct_answer().await?;
        Ok(())
    }
}
