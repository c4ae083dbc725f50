//! Session-scoped audio playback.
//!
//! Every audio element is tagged with the session that was current when it
//! was created. Starting a new session tears down everything older, and
//! nothing from an older session is ever allowed to start playing again. The
//! two feedback jingles are the only exception: they live outside the session
//! scheme and survive every cleanup.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use url::Url;

use crate::error::PlaybackError;
use crate::observer::QuizObserver;
use crate::platform::{self, Platform};

/// A platform audio element. Only [`AudioSessionManager`] talks to these.
pub trait AudioElement {
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlaybackError>>;
    fn pause(&self);
    fn is_paused(&self) -> bool;
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);
    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);
    /// Drop every event handler attached to the element.
    fn clear_handlers(&self);
    fn clear_source(&self);
    fn load(&self);
    /// Remove the element from the document, if it was ever attached.
    fn detach(&self);
    /// Resolves the next time playback reaches the end of the media.
    fn ended(&self) -> LocalBoxFuture<'static, ()>;
    /// Called at most once, when the element fails to load its source.
    fn on_error(&self, callback: Box<dyn FnOnce()>);
}

pub trait AudioHost {
    fn create_element(&self, url: &str, preload: bool) -> Rc<dyn AudioElement>;

    /// Origin of the page hosting the widget, used to rewrite same-host URLs.
    fn page_origin(&self) -> Option<Url> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionTag {
    /// Correct/wrong jingles. Exempt from cleanup and staleness checks.
    Feedback,
    Session(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioKind {
    Prompt,
    Option,
    Introduction,
    Feedback,
}

#[derive(Clone, Copy, Debug)]
pub struct AudioOptions {
    pub kind: AudioKind,
    pub preload: bool,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            kind: AudioKind::Prompt,
            preload: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedbackSound {
    Correct,
    Wrong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Ended,
    TimedOut,
    /// Playback never started: the handle was stale, playback was suspended,
    /// or the element refused to play.
    Skipped,
}

struct ManagedAudio {
    id: u64,
    url: String,
    element: Rc<dyn AudioElement>,
    session: SessionTag,
    kind: AudioKind,
    torn_down: Cell<bool>,
}

/// Opaque reference to an audio element owned by an [`AudioSessionManager`].
#[derive(Clone)]
pub struct AudioHandle(Rc<ManagedAudio>);

impl AudioHandle {
    pub fn session(&self) -> SessionTag {
        self.0.session
    }

    pub fn url(&self) -> &str {
        &self.0.url
    }

    pub fn is_torn_down(&self) -> bool {
        self.0.torn_down.get()
    }

    fn same_as(&self, other: &AudioHandle) -> bool {
        self.0.id == other.0.id
    }
}

impl std::fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHandle")
            .field("id", &self.0.id)
            .field("url", &self.0.url)
            .field("session", &self.0.session)
            .field("kind", &self.0.kind)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct AudioSettings {
    pub abort_retry: Duration,
    pub feedback_watchdog: Duration,
    pub correct_sound_url: Option<String>,
    pub wrong_sound_url: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            abort_retry: Duration::from_millis(80),
            feedback_watchdog: Duration::from_millis(4000),
            correct_sound_url: None,
            wrong_sound_url: None,
        }
    }
}

#[derive(Clone)]
pub struct AudioSessionManager {
    inner: Rc<Inner>,
}

struct Inner {
    host: Rc<dyn AudioHost>,
    platform: Rc<dyn Platform>,
    observer: Rc<dyn QuizObserver>,
    settings: AudioSettings,
    // never hold this borrow across an .await
    state: RefCell<AudioState>,
}

#[derive(Default)]
struct AudioState {
    session_id: u64,
    next_handle_id: u64,
    tracked: Vec<AudioHandle>,
    cleanup_in_flight: Option<Shared<LocalBoxFuture<'static, ()>>>,
    cleanup_generation: u64,
    suspended: bool,
    current_target: Option<AudioHandle>,
    autoplay_notified: bool,
    feedback: HashMap<FeedbackSound, AudioHandle>,
}

enum PlayOutcome {
    Started,
    Skipped,
}

impl AudioSessionManager {
    pub fn new(
        host: Rc<dyn AudioHost>,
        platform: Rc<dyn Platform>,
        observer: Rc<dyn QuizObserver>,
        settings: AudioSettings,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                host,
                platform,
                observer,
                settings,
                state: RefCell::new(AudioState::default()),
            }),
        }
    }

    pub fn current_session(&self) -> u64 {
        self.inner.state.borrow().session_id
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.borrow().suspended
    }

    /// Number of live elements, feedback jingles included.
    pub fn tracked_count(&self) -> usize {
        self.inner.state.borrow().tracked.len()
    }

    pub fn current_target(&self) -> Option<AudioHandle> {
        self.inner.state.borrow().current_target.clone()
    }

    /// Advance the session and tear down everything created under older
    /// sessions. A call that arrives while a cleanup is still running waits
    /// for it and then cleans up for its own session.
    pub async fn start_new_session(&self) {
        let cleanup = {
            let mut state = self.inner.state.borrow_mut();
            state.session_id += 1;
            state.cleanup_generation += 1;
            let target_session = state.session_id;
            let previous = state.cleanup_in_flight.take();
            let inner = Rc::clone(&self.inner);
            let cleanup = async move {
                if let Some(previous) = previous {
                    previous.await;
                }
                inner.cleanup_sessions_before(target_session);
            }
            .boxed_local()
            .shared();
            state.cleanup_in_flight = Some(cleanup.clone());
            (cleanup, state.cleanup_generation)
        };

        let (cleanup, generation) = cleanup;
        cleanup.await;

        let mut state = self.inner.state.borrow_mut();
        if state.cleanup_generation == generation {
            state.cleanup_in_flight = None;
        }
    }

    /// Create an element for `url` tagged with the current session. Returns
    /// `None` when there is no URL to play.
    pub fn create_audio(&self, url: &str, options: AudioOptions) -> Option<AudioHandle> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let url = vocab_utils::media::normalize_same_host(url, self.inner.host.page_origin().as_ref());
        let element = self.inner.host.create_element(&url, options.preload);

        let handle = {
            let mut state = self.inner.state.borrow_mut();
            state.next_handle_id += 1;
            let session = match options.kind {
                AudioKind::Feedback => SessionTag::Feedback,
                _ => SessionTag::Session(state.session_id),
            };
            let handle = AudioHandle(Rc::new(ManagedAudio {
                id: state.next_handle_id,
                url,
                element: Rc::clone(&element),
                session,
                kind: options.kind,
                torn_down: Cell::new(false),
            }));
            state.tracked.push(handle.clone());
            handle
        };

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let id = handle.0.id;
        element.on_error(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                log::debug!("Audio element {id} failed to load, untracking it");
                inner.untrack(id);
            }
        }));

        Some(handle)
    }

    /// Play `handle` from the start.
    ///
    /// Stale or suspended audio resolves `Ok` without playing. An `AbortError`
    /// gets one retry after a short delay. Autoplay blocks are reported to the
    /// observer the first time only and then returned like any other error.
    pub async fn play_audio(&self, handle: &AudioHandle) -> Result<(), PlaybackError> {
        self.play_inner(handle).await.map(|_| ())
    }

    async fn play_inner(&self, handle: &AudioHandle) -> Result<PlayOutcome, PlaybackError> {
        if !self.inner.is_playable(handle) {
            stop_element(&handle.0.element);
            return Ok(PlayOutcome::Skipped);
        }

        let element = Rc::clone(&handle.0.element);
        if !element.is_paused() {
            element.pause();
            element.set_current_time(0.0);
        }

        match element.play().await {
            Ok(()) => Ok(self.settle_started(handle)),
            Err(PlaybackError::Aborted) => {
                log::debug!("play() was aborted for {}, retrying once", handle.url());
                self.inner
                    .platform
                    .sleep(self.inner.settings.abort_retry)
                    .await;
                if !self.inner.is_playable(handle) {
                    stop_element(&element);
                    return Ok(PlayOutcome::Skipped);
                }
                match element.play().await {
                    Ok(()) => Ok(self.settle_started(handle)),
                    Err(PlaybackError::Aborted) => {
                        log::debug!("play() aborted again for {}, giving up", handle.url());
                        Ok(PlayOutcome::Skipped)
                    }
                    Err(e) => Err(self.report_failure(handle, e)),
                }
            }
            Err(e) => Err(self.report_failure(handle, e)),
        }
    }

    // Playback started, but the session may have moved on while we waited.
    fn settle_started(&self, handle: &AudioHandle) -> PlayOutcome {
        if self.inner.is_playable(handle) {
            PlayOutcome::Started
        } else {
            stop_element(&handle.0.element);
            PlayOutcome::Skipped
        }
    }

    fn report_failure(&self, handle: &AudioHandle, error: PlaybackError) -> PlaybackError {
        if error == PlaybackError::NotAllowed {
            let first_time = {
                let mut state = self.inner.state.borrow_mut();
                !std::mem::replace(&mut state.autoplay_notified, true)
            };
            if first_time {
                self.inner.observer.autoplay_blocked();
            }
        }
        log::warn!("Failed to play {}: {error}", handle.url());
        error
    }

    /// Play and wait for the end of the media, giving up after `watchdog`.
    pub async fn play_to_completion(&self, handle: &AudioHandle, watchdog: Duration) -> Completion {
        let ended = handle.0.element.ended();
        match self.play_inner(handle).await {
            Ok(PlayOutcome::Started) => {}
            Ok(PlayOutcome::Skipped) | Err(_) => return Completion::Skipped,
        }
        match platform::timeout(self.inner.platform.as_ref(), watchdog, ended).await {
            Some(()) => Completion::Ended,
            None => {
                log::debug!("{} did not finish in time", handle.url());
                Completion::TimedOut
            }
        }
    }

    /// Hard stop: every later `play_audio` resolves immediately without
    /// playing until [`resume_playback`](Self::resume_playback).
    pub async fn suspend_playback(&self) {
        let tracked = {
            let mut state = self.inner.state.borrow_mut();
            state.suspended = true;
            state.tracked.clone()
        };
        for handle in tracked {
            stop_element(&handle.0.element);
        }
    }

    pub fn resume_playback(&self) {
        self.inner.state.borrow_mut().suspended = false;
    }

    /// Ramp the volume down to zero, then stop and restore the volume so the
    /// element can be played again.
    pub async fn fade_out_audio(&self, handle: &AudioHandle, duration: Duration) {
        let element = Rc::clone(&handle.0.element);
        if element.is_paused() || element.volume() <= 0.0 {
            return;
        }

        let duration_ms = duration.as_millis().max(60) as u64;
        let steps = (duration_ms / 16).max(3);
        let interval = Duration::from_millis((duration_ms / steps).max(16));
        let original = element.volume();

        for step in 1..=steps {
            self.inner.platform.sleep(interval).await;
            if element.is_paused() {
                break;
            }
            let remaining = 1.0 - step as f64 / steps as f64;
            element.set_volume((original * remaining).max(0.0));
        }

        stop_element(&element);
        element.set_volume(original);
    }

    /// Tear down every tracked element except the feedback jingles.
    pub async fn flush_all_audio_sessions(&self) {
        let (target, doomed) = {
            let mut state = self.inner.state.borrow_mut();
            let target = state.current_target.take();
            let (doomed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.tracked)
                .into_iter()
                .partition(|h| h.session() != SessionTag::Feedback);
            state.tracked = kept;
            (target, doomed)
        };
        if let Some(target) = target {
            teardown(&target);
        }
        for handle in doomed {
            teardown(&handle);
        }
    }

    /// Make `handle` the audio for the current target word, tearing down
    /// whatever held the role before.
    pub fn set_target_word_audio(&self, handle: Option<AudioHandle>) {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            std::mem::replace(&mut state.current_target, handle.clone())
        };
        if let Some(previous) = previous {
            let replaced = handle.as_ref().is_none_or(|h| !h.same_as(&previous));
            if replaced {
                self.cleanup_single_audio(&previous);
            }
        }
    }

    pub fn cleanup_single_audio(&self, handle: &AudioHandle) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state
                .current_target
                .as_ref()
                .is_some_and(|t| t.same_as(handle))
            {
                state.current_target = None;
            }
        }
        self.inner.untrack(handle.0.id);
        teardown(handle);
    }

    /// Play the correct/wrong jingle to completion. Does nothing when the page
    /// didn't configure a sound.
    pub async fn play_feedback(&self, sound: FeedbackSound) -> Completion {
        let existing = self.inner.state.borrow().feedback.get(&sound).cloned();
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let url = match sound {
                    FeedbackSound::Correct => self.inner.settings.correct_sound_url.clone(),
                    FeedbackSound::Wrong => self.inner.settings.wrong_sound_url.clone(),
                };
                let Some(handle) = url.and_then(|url| {
                    self.create_audio(
                        &url,
                        AudioOptions {
                            kind: AudioKind::Feedback,
                            preload: true,
                        },
                    )
                }) else {
                    return Completion::Skipped;
                };
                self.inner
                    .state
                    .borrow_mut()
                    .feedback
                    .insert(sound, handle.clone());
                handle
            }
        };
        self.play_to_completion(&handle, self.inner.settings.feedback_watchdog)
            .await
    }
}

impl Inner {
    fn is_playable(&self, handle: &AudioHandle) -> bool {
        let state = self.state.borrow();
        if state.suspended || handle.is_torn_down() {
            return false;
        }
        match handle.session() {
            SessionTag::Feedback => true,
            SessionTag::Session(id) => id == state.session_id,
        }
    }

    fn untrack(&self, id: u64) {
        self.state.borrow_mut().tracked.retain(|h| h.0.id != id);
    }

    fn cleanup_sessions_before(&self, session: u64) {
        let (stale, target) = {
            let mut state = self.state.borrow_mut();
            let is_stale =
                |h: &AudioHandle| matches!(h.session(), SessionTag::Session(id) if id < session);
            let (stale, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.tracked).into_iter().partition(is_stale);
            state.tracked = kept;
            let target = match &state.current_target {
                Some(target) if is_stale(target) => state.current_target.take(),
                _ => None,
            };
            (stale, target)
        };
        if !stale.is_empty() {
            log::debug!("Cleaning up {} stale audio elements", stale.len());
        }
        for handle in stale.iter().chain(target.iter()) {
            teardown(handle);
        }
    }
}

fn stop_element(element: &Rc<dyn AudioElement>) {
    if !element.is_paused() {
        element.pause();
    }
    element.set_current_time(0.0);
}

fn teardown(handle: &AudioHandle) {
    if handle.0.torn_down.replace(true) {
        return;
    }
    let element = &handle.0.element;
    element.pause();
    element.set_current_time(0.0);
    element.clear_handlers();
    element.clear_source();
    element.load();
    element.detach();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::platform::TokioPlatform;
    use crate::simulation::{FakeAudioHost, PlayScript, RecordingObserver};
    use tokio::task::LocalSet;

    fn manager(host: &FakeAudioHost) -> AudioSessionManager {
        AudioSessionManager::new(
            Rc::new(host.clone()),
            Rc::new(TokioPlatform::new()),
            Rc::new(NoopObserver),
            AudioSettings {
                correct_sound_url: Some("https://example.org/correct.mp3".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_audio_never_plays() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);

        let old = audio
            .create_audio("https://example.org/cat.mp3", AudioOptions::default())
            .unwrap();
        audio.start_new_session().await;

        assert_eq!(audio.play_audio(&old).await, Ok(()));
        let element = host.element("https://example.org/cat.mp3").unwrap();
        assert_eq!(element.play_calls(), 0);
        assert!(element.is_detached());
        assert!(element.source().is_empty());
        assert_eq!(audio.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_audio_requires_url() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        assert!(audio.create_audio("  ", AudioOptions::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_url_follows_page_scheme() {
        let host = FakeAudioHost::with_origin("https://example.org");
        let audio = manager(&host);
        let handle = audio
            .create_audio("http://example.org/cat.mp3", AudioOptions::default())
            .unwrap();
        assert_eq!(handle.url(), "https://example.org/cat.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_retried_once() {
        let host = FakeAudioHost::new();
        host.script_play("https://example.org/dog.mp3", PlayScript::Fail(PlaybackError::Aborted));
        let audio = manager(&host);
        let handle = audio
            .create_audio("https://example.org/dog.mp3", AudioOptions::default())
            .unwrap();

        assert_eq!(audio.play_audio(&handle).await, Ok(()));
        let element = host.element("https://example.org/dog.mp3").unwrap();
        assert_eq!(element.play_calls(), 2);
        assert!(!element.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_abort_is_swallowed() {
        let host = FakeAudioHost::new();
        host.script_play("https://example.org/dog.mp3", PlayScript::Fail(PlaybackError::Aborted));
        host.script_play("https://example.org/dog.mp3", PlayScript::Fail(PlaybackError::Aborted));
        let audio = manager(&host);
        let handle = audio
            .create_audio("https://example.org/dog.mp3", AudioOptions::default())
            .unwrap();

        assert_eq!(audio.play_audio(&handle).await, Ok(()));
        assert_eq!(host.element("https://example.org/dog.mp3").unwrap().play_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_block_is_reported_once() {
        let host = FakeAudioHost::new();
        let observer = Rc::new(RecordingObserver::default());
        for _ in 0..2 {
            host.script_play("https://example.org/a.mp3", PlayScript::Fail(PlaybackError::NotAllowed));
        }
        let audio = AudioSessionManager::new(
            Rc::new(host.clone()),
            Rc::new(TokioPlatform::new()),
            observer.clone(),
            AudioSettings::default(),
        );
        let handle = audio
            .create_audio("https://example.org/a.mp3", AudioOptions::default())
            .unwrap();

        assert_eq!(audio.play_audio(&handle).await, Err(PlaybackError::NotAllowed));
        assert_eq!(audio.play_audio(&handle).await, Err(PlaybackError::NotAllowed));
        assert_eq!(observer.autoplay_blocked_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_audio_restarts_from_zero() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        let handle = audio
            .create_audio("https://example.org/a.mp3", AudioOptions::default())
            .unwrap();
        audio.play_audio(&handle).await.unwrap();
        let element = host.element("https://example.org/a.mp3").unwrap();
        element.set_current_time(1.5);

        audio.play_audio(&handle).await.unwrap();
        assert_eq!(element.current_time(), 0.0);
        assert_eq!(element.play_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_resolves_pending_play() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let host = FakeAudioHost::new();
                host.script_play("https://example.org/a.mp3", PlayScript::Hang);
                let audio = manager(&host);
                let handle = audio
                    .create_audio("https://example.org/a.mp3", AudioOptions::default())
                    .unwrap();

                let pending = {
                    let audio = audio.clone();
                    let handle = handle.clone();
                    tokio::task::spawn_local(async move { audio.play_audio(&handle).await })
                };
                tokio::task::yield_now().await;

                audio.suspend_playback().await;
                assert_eq!(pending.await.unwrap(), Ok(()));

                let element = host.element("https://example.org/a.mp3").unwrap();
                assert!(element.is_paused());
                assert_eq!(element.play_calls(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_out_restores_volume() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        let handle = audio
            .create_audio("https://example.org/a.mp3", AudioOptions::default())
            .unwrap();
        audio.play_audio(&handle).await.unwrap();
        let element = host.element("https://example.org/a.mp3").unwrap();
        element.set_volume(0.8);

        audio.fade_out_audio(&handle, Duration::from_millis(10)).await;
        assert!(element.is_paused());
        assert_eq!(element.volume(), 0.8);
        assert!(element.volume_changes() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_keeps_feedback_sounds() {
        let host = FakeAudioHost::new();
        host.set_auto_end(true);
        let audio = manager(&host);
        assert_eq!(audio.play_feedback(FeedbackSound::Correct).await, Completion::Ended);
        assert_eq!(audio.play_feedback(FeedbackSound::Wrong).await, Completion::Skipped);

        let target = audio
            .create_audio("https://example.org/a.mp3", AudioOptions::default())
            .unwrap();
        audio.set_target_word_audio(Some(target.clone()));
        audio
            .create_audio("https://example.org/b.mp3", AudioOptions::default())
            .unwrap();

        audio.flush_all_audio_sessions().await;
        assert!(audio.current_target().is_none());
        assert!(target.is_torn_down());
        assert_eq!(audio.tracked_count(), 1);

        audio.start_new_session().await;
        assert_eq!(audio.play_feedback(FeedbackSound::Correct).await, Completion::Ended);
        assert_eq!(
            host.element("https://example.org/correct.mp3").unwrap().play_calls(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_session_starts_both_finish() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        audio
            .create_audio("https://example.org/a.mp3", AudioOptions::default())
            .unwrap();

        futures::join!(audio.start_new_session(), audio.start_new_session());
        assert_eq!(audio.current_session(), 2);
        assert_eq!(audio.tracked_count(), 0);
        assert_eq!(
            host.element("https://example.org/a.mp3").unwrap().teardowns(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_error_untracks_element() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        audio
            .create_audio("https://example.org/missing.mp3", AudioOptions::default())
            .unwrap();
        assert_eq!(audio.tracked_count(), 1);
        host.element("https://example.org/missing.mp3")
            .unwrap()
            .fail_to_load();
        assert_eq!(audio.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_to_completion_times_out() {
        let host = FakeAudioHost::new();
        let audio = manager(&host);
        let handle = audio
            .create_audio("https://example.org/long.mp3", AudioOptions::default())
            .unwrap();
        assert_eq!(
            audio
                .play_to_completion(&handle, Duration::from_millis(15000))
                .await,
            Completion::TimedOut
        );
    }
}
