//! Browser bindings: DOM-backed audio, media preloading, page callbacks, and
//! the `FlashcardApp` handle the page drives the quiz through.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use url::Url;
use vocab_utils::{Word, WordId};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{EventTarget, HtmlAudioElement, HtmlImageElement, VisibilityState};

use crate::audio::{AudioElement, AudioHost};
use crate::config::QuizConfig;
use crate::error::{FetchError, PlaybackError, TransportError};
use crate::loader::{LoadOutcome, MediaPreloader, WordFetchRequest, WordFetchResponse, WordSource, WordsetScope};
use crate::modes::QuizMode;
use crate::observer::QuizObserver;
use crate::options::UnboundedLayout;
use crate::platform::Platform;
use crate::progress::{ProgressBatch, ProgressTransport};
use crate::quiz::{AnswerOutcome, FlashcardWidget, QuizResults, QuizServices, QuizSummary, RoundView};
use crate::selection::StarMode;

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Reads a string property off a thrown JS value, if it has one.
fn js_property(value: &JsValue, key: &str) -> String {
    js_sys::Reflect::get(value, &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_default()
}

/// A promise that settles on the first of `resolve_on` or `reject_on`
/// firing on `target`.
fn event_promise(target: &EventTarget, resolve_on: &str, reject_on: Option<&str>) -> js_sys::Promise {
    js_sys::Promise::new(&mut |resolve, reject| {
        let _ = target.add_event_listener_with_callback(resolve_on, &resolve);
        if let Some(event) = reject_on {
            let _ = target.add_event_listener_with_callback(event, &reject);
        }
    })
}

pub(crate) struct WebPlatform;

impl Platform for WebPlatform {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = duration.as_millis().min(i32::MAX as u128) as i32;
        let promise = js_sys::Promise::new(&mut |resolve, _| {
            if let Some(window) = web_sys::window() {
                let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis);
            }
        });
        async move {
            let _ = JsFuture::from(promise).await;
        }
        .boxed_local()
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

struct DomAudio {
    element: HtmlAudioElement,
    // listeners registered through `ended`/`on_error`, removed by `clear_handlers`
    ended_listeners: RefCell<Vec<js_sys::Function>>,
    error_listeners: RefCell<Vec<Closure<dyn FnMut()>>>,
}

impl AudioElement for DomAudio {
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlaybackError>> {
        let started = self.element.play();
        async move {
            let promise = started.map_err(|e| {
                PlaybackError::from_dom_name(&js_property(&e, "name"), &js_property(&e, "message"))
            })?;
            JsFuture::from(promise).await.map(|_| ()).map_err(|e| {
                PlaybackError::from_dom_name(&js_property(&e, "name"), &js_property(&e, "message"))
            })
        }
        .boxed_local()
    }

    fn pause(&self) {
        let _ = self.element.pause();
    }

    fn is_paused(&self) -> bool {
        self.element.paused()
    }

    fn current_time(&self) -> f64 {
        self.element.current_time()
    }

    fn set_current_time(&self, seconds: f64) {
        self.element.set_current_time(seconds);
    }

    fn volume(&self) -> f64 {
        self.element.volume()
    }

    fn set_volume(&self, volume: f64) {
        self.element.set_volume(volume.clamp(0.0, 1.0));
    }

    fn clear_handlers(&self) {
        for listener in self.ended_listeners.borrow_mut().drain(..) {
            let _ = self.element.remove_event_listener_with_callback("ended", &listener);
        }
        for listener in self.error_listeners.borrow_mut().drain(..) {
            let _ = self
                .element
                .remove_event_listener_with_callback("error", listener.as_ref().unchecked_ref());
        }
    }

    fn clear_source(&self) {
        let _ = self.element.remove_attribute("src");
    }

    fn load(&self) {
        self.element.load();
    }

    fn detach(&self) {
        self.element.remove();
    }

    fn ended(&self) -> LocalBoxFuture<'static, ()> {
        let listeners = &self.ended_listeners;
        let promise = js_sys::Promise::new(&mut |resolve, _| {
            let _ = self.element.add_event_listener_with_callback("ended", &resolve);
            listeners.borrow_mut().push(resolve);
        });
        async move {
            let _ = JsFuture::from(promise).await;
        }
        .boxed_local()
    }

    fn on_error(&self, callback: Box<dyn FnOnce()>) {
        let listener = Closure::once(callback);
        let _ = self
            .element
            .add_event_listener_with_callback("error", listener.as_ref().unchecked_ref());
        self.error_listeners.borrow_mut().push(listener);
    }
}

pub(crate) struct DomAudioHost;

impl AudioHost for DomAudioHost {
    fn create_element(&self, url: &str, preload: bool) -> Rc<dyn AudioElement> {
        let element = HtmlAudioElement::new().unwrap_or_else(|_| {
            log::error!("Could not create an audio element");
            wasm_bindgen::throw_str("audio elements are unavailable")
        });
        element.set_preload(if preload { "auto" } else { "none" });
        element.set_src(url);
        Rc::new(DomAudio {
            element,
            ended_listeners: RefCell::new(Vec::new()),
            error_listeners: RefCell::new(Vec::new()),
        })
    }

    fn page_origin(&self) -> Option<Url> {
        let origin = web_sys::window()?.location().origin().ok()?;
        Url::parse(&origin).ok()
    }
}

pub(crate) struct DomPreloader;

impl DomPreloader {
    async fn settle(promise: js_sys::Promise) -> LoadOutcome {
        match JsFuture::from(promise).await {
            Ok(_) => LoadOutcome::Loaded,
            Err(_) => LoadOutcome::Failed,
        }
    }
}

impl MediaPreloader for DomPreloader {
    fn preload_audio(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome> {
        let Ok(element) = HtmlAudioElement::new() else {
            return async { LoadOutcome::Failed }.boxed_local();
        };
        element.set_preload("auto");
        let promise = event_promise(&element, "canplaythrough", Some("error"));
        element.set_src(url);
        element.load();
        Self::settle(promise).boxed_local()
    }

    fn preload_image(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome> {
        let Ok(image) = HtmlImageElement::new() else {
            return async { LoadOutcome::Failed }.boxed_local();
        };
        let promise = event_promise(&image, "load", Some("error"));
        image.set_src(url);
        Self::settle(promise).boxed_local()
    }
}

/// Calls a page function that returns a promise.
async fn call_page(function: &js_sys::Function, argument: &JsValue) -> Result<JsValue, JsValue> {
    let returned = function.call1(&JsValue::NULL, argument)?;
    match returned.dyn_into::<js_sys::Promise>() {
        Ok(promise) => JsFuture::from(promise).await,
        Err(value) => Ok(value),
    }
}

/// Fetches words through `fetchWords(request)` on the page.
pub(crate) struct JsWordSource {
    fetch_words: js_sys::Function,
}

impl WordSource for JsWordSource {
    fn fetch_words(&self, request: WordFetchRequest) -> LocalBoxFuture<'static, Result<WordFetchResponse, FetchError>> {
        let function = self.fetch_words.clone();
        async move {
            let argument =
                serde_wasm_bindgen::to_value(&request).map_err(|e| FetchError::Request(e.to_string()))?;
            let value = call_page(&function, &argument)
                .await
                .map_err(|e| FetchError::Request(js_property(&e, "message")))?;
            serde_wasm_bindgen::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
        }
        .boxed_local()
    }
}

/// Sends batches through `sendProgress(batch)`. A rejected promise, or a
/// resolved `{ status }` outside 2xx, counts as a failure.
pub(crate) struct JsTransport {
    send_progress: js_sys::Function,
}

impl ProgressTransport for JsTransport {
    fn send_batch(&self, batch: ProgressBatch) -> LocalBoxFuture<'static, Result<(), TransportError>> {
        let function = self.send_progress.clone();
        async move {
            let argument =
                serde_wasm_bindgen::to_value(&batch).map_err(|e| TransportError::Request(e.to_string()))?;
            let value = call_page(&function, &argument)
                .await
                .map_err(|e| TransportError::Request(js_property(&e, "message")))?;
            let status = js_sys::Reflect::get(&value, &JsValue::from_str("status"))
                .ok()
                .and_then(|s| s.as_f64());
            match status {
                Some(status) if !(200.0..300.0).contains(&status) => Err(TransportError::Status(status as u16)),
                _ => Ok(()),
            }
        }
        .boxed_local()
    }
}

/// Forwards engine notifications to optional callbacks on a page object:
/// `autoplayBlocked()`, `categoryChanged(name)`, `introductionStep(word, n)`
/// and `resultsReady(summary)`.
pub(crate) struct JsObserver {
    callbacks: JsValue,
}

impl JsObserver {
    fn callback(&self, name: &str) -> Option<js_sys::Function> {
        if self.callbacks.is_undefined() || self.callbacks.is_null() {
            return None;
        }
        js_sys::Reflect::get(&self.callbacks, &JsValue::from_str(name))
            .ok()?
            .dyn_into::<js_sys::Function>()
            .ok()
    }
}

impl QuizObserver for JsObserver {
    fn autoplay_blocked(&self) {
        if let Some(f) = self.callback("autoplayBlocked") {
            let _ = f.call0(&JsValue::NULL);
        }
    }

    fn category_changed(&self, name: &str) {
        if let Some(f) = self.callback("categoryChanged") {
            let _ = f.call1(&JsValue::NULL, &JsValue::from_str(name));
        }
    }

    fn introduction_step(&self, word: &Word, repetition: usize) {
        if let Some(f) = self.callback("introductionStep") {
            let word = serde_wasm_bindgen::to_value(word).unwrap_or(JsValue::NULL);
            let _ = f.call2(&JsValue::NULL, &word, &JsValue::from(repetition as u32));
        }
    }

    fn results_ready(&self, summary: &QuizSummary) {
        if let Some(f) = self.callback("resultsReady") {
            let summary = serde_wasm_bindgen::to_value(summary).unwrap_or(JsValue::NULL);
            let _ = f.call1(&JsValue::NULL, &summary);
        }
    }
}

#[wasm_bindgen]
pub struct FlashcardApp {
    widget: FlashcardWidget,
    _visibility: Option<Closure<dyn FnMut()>>,
}

#[wasm_bindgen]
impl FlashcardApp {
    /// `config` is the page's JSON settings blob.
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: &str,
        fetch_words: js_sys::Function,
        send_progress: js_sys::Function,
        callbacks: JsValue,
    ) -> Result<FlashcardApp, JsValue> {
        crate::init_logging();

        let config = QuizConfig::from_json(config).map_err(|e| {
            log::error!("Invalid quiz settings: {e}");
            js_error(e)
        })?;
        let widget = FlashcardWidget::new(
            config,
            QuizServices {
                audio_host: Rc::new(DomAudioHost),
                preloader: Rc::new(DomPreloader),
                word_source: Rc::new(JsWordSource { fetch_words }),
                transport: Rc::new(JsTransport { send_progress }),
                platform: Rc::new(WebPlatform),
                observer: Rc::new(JsObserver { callbacks }),
                layout: Rc::new(UnboundedLayout),
            },
        );
        let visibility = Self::watch_visibility(&widget);
        Ok(Self {
            widget,
            _visibility: visibility,
        })
    }

    fn watch_visibility(widget: &FlashcardWidget) -> Option<Closure<dyn FnMut()>> {
        let document = web_sys::window()?.document()?;
        let widget = widget.clone();
        let watched = document.clone();
        let listener = Closure::<dyn FnMut()>::new(move || {
            widget.on_visibility_change(watched.visibility_state() == VisibilityState::Hidden);
        });
        document
            .add_event_listener_with_callback("visibilitychange", listener.as_ref().unchecked_ref())
            .ok()?;
        Some(listener)
    }

    pub async fn init_flashcard_widget(&self, categories: Vec<String>, mode: QuizMode) -> Result<(), JsValue> {
        self.widget
            .init_flashcard_widget(categories, mode)
            .await
            .map_err(js_error)
    }

    pub async fn start_quiz_round(&self) -> Result<RoundView, JsValue> {
        self.widget.start_quiz_round().await.map_err(js_error)
    }

    pub async fn on_correct_answer(&self) -> Result<AnswerOutcome, JsValue> {
        self.widget.on_correct_answer().await.map_err(js_error)
    }

    pub async fn on_wrong_answer(&self, choice_index: usize) -> Result<AnswerOutcome, JsValue> {
        self.widget.on_wrong_answer(choice_index).await.map_err(js_error)
    }

    pub async fn switch_mode(&self, mode: QuizMode) -> Result<(), JsValue> {
        self.widget.switch_mode(mode).await.map_err(js_error)
    }

    pub async fn restart_quiz(&self) -> Result<(), JsValue> {
        self.widget.restart_quiz().await.map_err(js_error)
    }

    pub async fn close_flashcard(&self) {
        self.widget.close_flashcard().await
    }

    pub async fn set_wordset_scope(
        &self,
        wordset_id: Option<u64>,
        fallback: bool,
        session_word_ids: Vec<u64>,
    ) -> bool {
        self.widget
            .set_wordset_scope(WordsetScope {
                wordset_id,
                fallback,
                session_word_ids,
            })
            .await
    }

    pub fn toggle_star(&self, word_id: WordId) -> bool {
        self.widget.toggle_star(word_id)
    }

    pub fn set_star_mode(&self, mode: StarMode) {
        self.widget.set_star_mode(mode)
    }

    pub fn results(&self) -> QuizResults {
        self.widget.results()
    }

    #[wasm_bindgen(getter)]
    pub fn mode(&self) -> QuizMode {
        self.widget.mode()
    }

    #[wasm_bindgen(getter)]
    pub fn is_active(&self) -> bool {
        self.widget.is_active()
    }
}
