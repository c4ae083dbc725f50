//! Outbox for study-progress events.
//!
//! Events are validated on the way in, held in a bounded queue, and sent in
//! batches after a short per-type debounce. A failed send puts the batch back
//! at the front of the queue and tries again shortly, a bounded number of times.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use vocab_utils::WordId;

use crate::config::Timings;
use crate::error::TransportError;
use crate::modes::QuizMode;
use crate::platform::Platform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    WordOutcome,
    WordExposure,
    CategoryStudy,
    ModeSessionComplete,
}

impl ProgressEventType {
    pub fn parse(raw: &str) -> Option<Self> {
        let event_type = match raw.trim().to_lowercase().as_str() {
            "word_outcome" => ProgressEventType::WordOutcome,
            "word_exposure" => ProgressEventType::WordExposure,
            "category_study" => ProgressEventType::CategoryStudy,
            "mode_session_complete" => ProgressEventType::ModeSessionComplete,
            _ => return None,
        };
        Some(event_type)
    }

    fn needs_word(&self) -> bool {
        matches!(
            self,
            ProgressEventType::WordOutcome | ProgressEventType::WordExposure
        )
    }

    fn debounce(&self, timings: &Timings) -> Duration {
        let ms = match self {
            ProgressEventType::WordOutcome => timings.outcome_debounce_ms,
            ProgressEventType::WordExposure => timings.exposure_debounce_ms,
            ProgressEventType::CategoryStudy => timings.category_study_debounce_ms,
            ProgressEventType::ModeSessionComplete => timings.session_complete_debounce_ms,
        };
        Duration::from_millis(ms)
    }
}

/// An event as callers hand it in, before validation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProgressEvent {
    pub event_type: String,
    pub mode: Option<String>,
    pub word_id: Option<WordId>,
    pub category_id: Option<u64>,
    pub category_name: Option<String>,
    pub is_correct: Option<bool>,
    pub had_wrong_before: Option<bool>,
    pub payload: serde_json::Value,
}

impl RawProgressEvent {
    pub fn word_outcome(
        mode: QuizMode,
        word_id: WordId,
        category: &CategoryRef,
        is_correct: bool,
        had_wrong_before: bool,
    ) -> Self {
        Self {
            event_type: "word_outcome".into(),
            mode: Some(mode.as_str().into()),
            word_id: Some(word_id),
            is_correct: Some(is_correct),
            had_wrong_before: Some(had_wrong_before),
            ..Self::for_category(category)
        }
    }

    pub fn word_exposure(mode: QuizMode, word_id: WordId, category: &CategoryRef) -> Self {
        Self {
            event_type: "word_exposure".into(),
            mode: Some(mode.as_str().into()),
            word_id: Some(word_id),
            ..Self::for_category(category)
        }
    }

    pub fn category_study(mode: QuizMode, category: &CategoryRef) -> Self {
        Self {
            event_type: "category_study".into(),
            mode: Some(mode.as_str().into()),
            ..Self::for_category(category)
        }
    }

    pub fn mode_session_complete(mode: QuizMode, payload: serde_json::Value) -> Self {
        Self {
            event_type: "mode_session_complete".into(),
            mode: Some(mode.as_str().into()),
            payload,
            ..Default::default()
        }
    }

    fn for_category(category: &CategoryRef) -> Self {
        Self {
            category_id: category.id,
            category_name: Some(category.name.clone()).filter(|n| !n.is_empty()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CategoryRef {
    pub id: Option<u64>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_type: ProgressEventType,
    pub mode: QuizMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_id: Option<WordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub had_wrong_before: Option<bool>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Validate `raw`. Unknown event types, outcome/exposure events without a
    /// word, and category events without a category are rejected. Unknown
    /// modes fall back to practice.
    pub fn validate(raw: RawProgressEvent) -> Option<Self> {
        let event_type = ProgressEventType::parse(&raw.event_type)?;
        let word_id = raw.word_id.filter(|id| *id > 0);
        if event_type.needs_word() && word_id.is_none() {
            return None;
        }
        let category_id = raw.category_id.filter(|id| *id > 0);
        let category_name = raw
            .category_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if event_type == ProgressEventType::CategoryStudy
            && category_id.is_none()
            && category_name.is_none()
        {
            return None;
        }
        let mode = raw
            .mode
            .as_deref()
            .and_then(QuizMode::parse)
            .unwrap_or_default();

        Some(Self {
            event_type,
            mode,
            word_id,
            category_id,
            category_name,
            is_correct: raw.is_correct,
            had_wrong_before: raw.had_wrong_before,
            payload: raw.payload,
            created_at: Utc::now(),
        })
    }
}

/// One request to the progress endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressBatch {
    pub events: Vec<ProgressEvent>,
    pub wordset_id: Option<u64>,
    pub category_ids: Vec<u64>,
}

pub trait ProgressTransport {
    fn send_batch(&self, batch: ProgressBatch) -> LocalBoxFuture<'static, Result<(), TransportError>>;
}

#[derive(Clone)]
pub struct ProgressEventQueue {
    inner: Rc<QueueInner>,
}

struct QueueInner {
    transport: Rc<dyn ProgressTransport>,
    platform: Rc<dyn Platform>,
    timings: Timings,
    state: RefCell<QueueState>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ProgressEvent>,
    wordset_id: Option<u64>,
    flush_in_flight: bool,
    debounce_generation: u64,
    consecutive_failures: u32,
}

impl ProgressEventQueue {
    pub fn new(
        transport: Rc<dyn ProgressTransport>,
        platform: Rc<dyn Platform>,
        timings: Timings,
        wordset_id: Option<u64>,
    ) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                transport,
                platform,
                timings,
                state: RefCell::new(QueueState {
                    wordset_id,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> Vec<ProgressEvent> {
        self.inner.state.borrow().queue.iter().cloned().collect()
    }

    pub fn set_wordset_id(&self, wordset_id: Option<u64>) {
        self.inner.state.borrow_mut().wordset_id = wordset_id;
    }

    /// Validate and queue `raw`, scheduling a debounced flush. Returns the
    /// stored event, or `None` when it was rejected.
    pub fn enqueue(&self, raw: RawProgressEvent) -> Option<ProgressEvent> {
        let Some(event) = ProgressEvent::validate(raw) else {
            log::debug!("Dropping invalid progress event");
            return None;
        };
        let delay = event.event_type.debounce(&self.inner.timings);
        {
            let mut state = self.inner.state.borrow_mut();
            state.queue.push_back(event.clone());
            self.inner.enforce_cap(&mut state);
        }
        self.schedule_flush(delay);
        Some(event)
    }

    /// Flush after `delay`, replacing any flush scheduled earlier.
    fn schedule_flush(&self, delay: Duration) {
        let generation = {
            let mut state = self.inner.state.borrow_mut();
            state.debounce_generation += 1;
            state.debounce_generation
        };
        let this = self.clone();
        let sleep = self.inner.platform.sleep(delay);
        self.inner.platform.spawn(Box::pin(async move {
            sleep.await;
            if this.inner.state.borrow().debounce_generation == generation {
                this.flush().await;
            }
        }));
    }

    /// Send everything queued. If a flush is already running this only
    /// reports the queue size. Returns the number of events still queued.
    pub async fn flush(&self) -> usize {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.flush_in_flight {
                return state.queue.len();
            }
            state.flush_in_flight = true;
            // supersedes any debounced flush still waiting
            state.debounce_generation += 1;
        }

        loop {
            let batch = {
                let mut state = self.inner.state.borrow_mut();
                let take = state.queue.len().min(self.inner.timings.progress_batch_size.max(1));
                if take == 0 {
                    state.flush_in_flight = false;
                    return 0;
                }
                let events: Vec<ProgressEvent> = state.queue.drain(..take).collect();
                let mut category_ids: Vec<u64> =
                    events.iter().filter_map(|e| e.category_id).collect();
                category_ids.sort_unstable();
                category_ids.dedup();
                ProgressBatch {
                    events,
                    wordset_id: state.wordset_id,
                    category_ids,
                }
            };

            match self.inner.transport.send_batch(batch.clone()).await {
                Ok(()) => {
                    log::debug!("Sent {} progress events", batch.events.len());
                    self.inner.state.borrow_mut().consecutive_failures = 0;
                }
                Err(e) => {
                    log::warn!("Failed to send progress events: {e}");
                    let retry = {
                        let mut state = self.inner.state.borrow_mut();
                        for event in batch.events.into_iter().rev() {
                            state.queue.push_front(event);
                        }
                        self.inner.enforce_cap(&mut state);
                        state.flush_in_flight = false;
                        state.consecutive_failures += 1;
                        state.consecutive_failures <= self.inner.timings.progress_max_retries
                    };
                    if retry {
                        self.schedule_retry();
                    }
                    return self.len();
                }
            }
        }
    }

    fn schedule_retry(&self) {
        let this = self.clone();
        let sleep = self
            .inner
            .platform
            .sleep(Duration::from_millis(self.inner.timings.progress_retry_ms));
        self.inner.platform.spawn(Box::pin(async move {
            sleep.await;
            this.flush().await;
        }));
    }

    /// Pages going into the background may never come back, so send now.
    pub fn on_visibility_change(&self, hidden: bool) {
        if !hidden {
            return;
        }
        {
            let mut state = self.inner.state.borrow_mut();
            state.debounce_generation += 1;
            state.consecutive_failures = 0;
        }
        let this = self.clone();
        self.inner.platform.spawn(Box::pin(async move {
            this.flush().await;
        }));
    }
}

impl QueueInner {
    fn enforce_cap(&self, state: &mut QueueState) {
        let cap = self.timings.progress_queue_cap.max(1);
        let overflow = state.queue.len().saturating_sub(cap);
        if overflow > 0 {
            log::warn!("Progress queue full, dropping {overflow} oldest events");
            state.queue.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TokioPlatform;
    use crate::simulation::RecordingTransport;
    use tokio::task::LocalSet;

    fn queue(transport: &RecordingTransport, timings: Timings) -> ProgressEventQueue {
        ProgressEventQueue::new(
            Rc::new(transport.clone()),
            Rc::new(TokioPlatform::new()),
            timings,
            Some(12),
        )
    }

    fn animals() -> CategoryRef {
        CategoryRef {
            id: Some(3),
            name: "Animals".into(),
        }
    }

    fn outcome(word_id: WordId) -> RawProgressEvent {
        RawProgressEvent::word_outcome(QuizMode::Practice, word_id, &animals(), true, false)
    }

    #[test]
    fn test_validation() {
        assert!(ProgressEvent::validate(outcome(5)).is_some());
        assert!(ProgressEvent::validate(outcome(0)).is_none());
        assert!(
            ProgressEvent::validate(RawProgressEvent {
                event_type: "page_view".into(),
                ..Default::default()
            })
            .is_none()
        );
        assert!(
            ProgressEvent::validate(RawProgressEvent::category_study(
                QuizMode::Learning,
                &CategoryRef::default()
            ))
            .is_none()
        );
        let by_name = ProgressEvent::validate(RawProgressEvent::category_study(
            QuizMode::Learning,
            &CategoryRef {
                id: None,
                name: "Food".into(),
            },
        ))
        .unwrap();
        assert_eq!(by_name.category_name.as_deref(), Some("Food"));

        let odd_mode = ProgressEvent::validate(RawProgressEvent {
            mode: Some("Self-Check".into()),
            ..outcome(5)
        })
        .unwrap();
        assert_eq!(odd_mode.mode, QuizMode::SelfCheck);
        let unknown_mode = ProgressEvent::validate(RawProgressEvent {
            mode: Some("???".into()),
            ..outcome(5)
        })
        .unwrap();
        assert_eq!(unknown_mode.mode, QuizMode::Practice);
    }

    #[test]
    fn test_raw_events_parse_from_json() {
        let raw: RawProgressEvent = serde_json::from_str(
            r#"{"event_type": "word_exposure", "word_id": 9, "mode": "listening"}"#,
        )
        .unwrap();
        let event = ProgressEvent::validate(raw).unwrap();
        assert_eq!(event.event_type, ProgressEventType::WordExposure);
        assert_eq!(event.mode, QuizMode::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_is_capped() {
        let transport = RecordingTransport::default();
        let queue = queue(
            &transport,
            Timings {
                progress_queue_cap: 3,
                ..Default::default()
            },
        );
        let local = LocalSet::new();
        local
            .run_until(async {
                for id in 1..=5 {
                    queue.enqueue(outcome(id));
                }
                let ids: Vec<_> = queue.pending().iter().filter_map(|e| e.word_id).collect();
                assert_eq!(ids, vec![3, 4, 5]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_empties_queue_on_success() {
        let transport = RecordingTransport::default();
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                queue.enqueue(outcome(2));
                assert_eq!(queue.flush().await, 0);
                assert!(queue.is_empty());

                let batches = transport.batches();
                assert_eq!(batches.len(), 1);
                assert_eq!(batches[0].events.len(), 2);
                assert_eq!(batches[0].wordset_id, Some(12));
                assert_eq!(batches[0].category_ids, vec![3]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_goes_back_in_order() {
        let transport = RecordingTransport::default();
        transport.set_failing(true);
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                queue.enqueue(outcome(2));
                assert_eq!(queue.flush().await, 2);
                let ids: Vec<_> = queue.pending().iter().filter_map(|e| e.word_id).collect();
                assert_eq!(ids, vec![1, 2]);

                // bounded retries, then it gives up until something new arrives
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert_eq!(queue.len(), 2);
                assert_eq!(transport.attempts(), 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_events() {
        let transport = RecordingTransport::default();
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                tokio::time::sleep(Duration::from_millis(500)).await;
                queue.enqueue(outcome(2));
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert!(transport.batches().is_empty());

                tokio::time::sleep(Duration::from_millis(500)).await;
                assert_eq!(transport.batches().len(), 1);
                assert_eq!(transport.batches()[0].events.len(), 2);
                assert!(queue.is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_outage() {
        let transport = RecordingTransport::default();
        transport.set_failing(true);
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                queue.flush().await;
                transport.set_failing(false);
                tokio::time::sleep(Duration::from_millis(60)).await;
                assert!(queue.is_empty());
                assert_eq!(transport.batches().len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_page_flushes_immediately() {
        let transport = RecordingTransport::default();
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                queue.on_visibility_change(false);
                tokio::task::yield_now().await;
                assert_eq!(queue.len(), 1);

                queue.on_visibility_change(true);
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(queue.is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flush_reports_size() {
        let transport = RecordingTransport::default();
        transport.set_delay(Rc::new(TokioPlatform::new()), Duration::from_millis(100));
        let queue = queue(&transport, Timings::default());
        let local = LocalSet::new();
        local
            .run_until(async {
                queue.enqueue(outcome(1));
                queue.enqueue(outcome(2));
                let (first, second) = futures::join!(queue.flush(), async {
                    tokio::task::yield_now().await;
                    queue.flush().await
                });
                assert_eq!(first, 0);
                assert_eq!(second, 0);
                assert_eq!(transport.batches().len(), 1);
            })
            .await;
    }
}
