//! Per-category word lists and media preloading.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::rc::Rc;

use chokepoint::ChokePoint;
use futures::future::{LocalBoxFuture, join_all};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use vocab_utils::media::is_placeholder_audio;
use vocab_utils::{CategoryConfig, OptionType, PromptType, Word, WordId};

use crate::SharedRng;
use crate::config::QuizConfig;
use crate::error::FetchError;
use crate::platform::{self, Platform};

/// Payload for the word-fetch endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordFetchRequest {
    pub category: String,
    pub display_mode: String,
    pub wordset: Option<u64>,
    pub wordset_fallback: bool,
    pub prompt_type: PromptType,
    pub option_type: OptionType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WordFetchResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Word>,
}

pub trait WordSource {
    fn fetch_words(
        &self,
        request: WordFetchRequest,
    ) -> LocalBoxFuture<'static, Result<WordFetchResponse, FetchError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed,
    Stalled,
    /// The watchdog gave up waiting.
    TimedOut,
}

pub trait MediaPreloader {
    fn preload_audio(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome>;
    fn preload_image(&self, url: &str) -> LocalBoxFuture<'static, LoadOutcome>;
}

/// Which slice of the content the widget is showing. Any change to it
/// invalidates every cached category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WordsetScope {
    pub wordset_id: Option<u64>,
    pub fallback: bool,
    pub session_word_ids: Vec<WordId>,
}

impl WordsetScope {
    pub fn from_config(config: &QuizConfig) -> Self {
        Self {
            wordset_id: config.wordset_id,
            fallback: config.wordset_fallback,
            session_word_ids: config.session_word_ids.clone(),
        }
    }

    pub fn key(&self) -> String {
        let mut ids = self.session_word_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        let ids = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let wordset = self
            .wordset_id
            .map_or_else(|| "none".to_string(), |id| id.to_string());
        format!("{wordset}|{}|{ids}", u8::from(self.fallback))
    }
}

/// The two per-category pools: `scoped` holds the words that may be chosen
/// as targets, `options` the unfiltered list used to pad answer choices.
#[derive(Clone, Debug, Default)]
pub struct WordPools {
    pub scoped: HashMap<String, Vec<Rc<Word>>>,
    pub options: HashMap<String, Vec<Rc<Word>>>,
}

impl WordPools {
    pub fn scoped(&self, category: &str) -> &[Rc<Word>] {
        self.scoped.get(category).map_or(&[], Vec::as_slice)
    }

    pub fn options(&self, category: &str) -> &[Rc<Word>] {
        self.options.get(category).map_or(&[], Vec::as_slice)
    }

    /// Option words from every loaded category other than `category`.
    pub fn supplemental(&self, category: &str) -> Vec<Rc<Word>> {
        let mut names: Vec<&String> = self.options.keys().filter(|n| *n != category).collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| self.options[name].iter().cloned())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Media {
    Audio(String),
    Image(String),
}

#[derive(Clone)]
pub struct ResourceLoader {
    inner: Rc<LoaderInner>,
}

struct LoaderInner {
    source: Rc<dyn WordSource>,
    preloader: Rc<dyn MediaPreloader>,
    platform: Rc<dyn Platform>,
    config: Rc<QuizConfig>,
    rng: SharedRng,
    category_loads: ChokePoint<String, usize, FetchError>,
    media: ChokePoint<Media, LoadOutcome, Infallible>,
    state: RefCell<LoaderState>,
}

#[derive(Default)]
struct LoaderState {
    scope: WordsetScope,
    key: String,
    loaded: HashSet<String>,
    failed: HashSet<String>,
    resources: HashMap<String, Vec<Media>>,
    pools: WordPools,
}

impl ResourceLoader {
    pub fn new(
        source: Rc<dyn WordSource>,
        preloader: Rc<dyn MediaPreloader>,
        platform: Rc<dyn Platform>,
        config: Rc<QuizConfig>,
        rng: SharedRng,
    ) -> Self {
        let scope = WordsetScope::from_config(&config);
        let state = LoaderState {
            key: scope.key(),
            scope,
            ..Default::default()
        };
        Self {
            inner: Rc::new(LoaderInner {
                source,
                preloader,
                platform,
                config,
                rng,
                category_loads: ChokePoint::new(),
                media: ChokePoint::new(),
                state: RefCell::new(state),
            }),
        }
    }

    fn cache_key(&self, name: &str) -> String {
        format!("{}::{name}", self.inner.state.borrow().key)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        let key = self.cache_key(name);
        self.inner.state.borrow().loaded.contains(&key)
    }

    /// The last fetch for `name` failed and nothing has succeeded since.
    pub fn has_failed(&self, name: &str) -> bool {
        let key = self.cache_key(name);
        self.inner.state.borrow().failed.contains(&key)
    }

    /// Forget failed fetches so background warming tries them again.
    pub fn clear_failures(&self) {
        self.inner.state.borrow_mut().failed.clear();
    }

    /// Switch to a new wordset scope. Returns whether anything changed.
    pub fn set_wordset_scope(&self, scope: WordsetScope) -> bool {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            let key = scope.key();
            state.scope = scope;
            if key == state.key {
                false
            } else {
                state.key = key;
                true
            }
        };
        if changed {
            log::info!("Wordset scope changed, dropping cached categories");
            self.reset_cache_for_new_wordset();
        }
        changed
    }

    pub fn reset_cache_for_new_wordset(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.loaded.clear();
            state.failed.clear();
            state.resources.clear();
            state.pools = WordPools::default();
        }
        self.inner.category_loads.clear();
        self.inner.media.clear();
    }

    pub fn with_pools<R>(&self, f: impl FnOnce(&WordPools) -> R) -> R {
        f(&self.inner.state.borrow().pools)
    }

    /// Fetch and cache the words for `name`, then preload their media.
    ///
    /// With `early` set, returns once the first chunk of media is ready and
    /// leaves the rest loading in the background. Never fails: a failed fetch
    /// is logged, yields zero words and is remembered by [`Self::has_failed`]
    /// until a later call gets through.
    pub async fn load_resources_for_category(&self, name: &str, early: bool) -> usize {
        let cache_key = self.cache_key(name);
        if let Some(count) = self.loaded_count(&cache_key, name) {
            return count;
        }

        let this = self.clone();
        let fetch = {
            let name = name.to_string();
            let cache_key = cache_key.clone();
            async move { this.fetch_and_store(name, cache_key).await }
        };
        let count = match self.inner.category_loads.get(cache_key.clone(), fetch).await {
            Ok(count) => {
                self.inner.state.borrow_mut().failed.remove(&cache_key);
                count
            }
            Err(e) => {
                log::error!("Failed to load words for {name}: {e}");
                self.inner.state.borrow_mut().failed.insert(cache_key);
                return 0;
            }
        };

        let resources = self
            .inner
            .state
            .borrow()
            .resources
            .get(&cache_key)
            .cloned()
            .unwrap_or_default();
        self.preload_resources(resources, early).await;
        count
    }

    fn loaded_count(&self, cache_key: &str, name: &str) -> Option<usize> {
        let state = self.inner.state.borrow();
        state
            .loaded
            .contains(cache_key)
            .then(|| state.pools.scoped(name).len())
    }

    async fn fetch_and_store(&self, name: String, cache_key: String) -> Result<usize, FetchError> {
        let category = self.category_config(&name);
        let request = {
            let state = self.inner.state.borrow();
            WordFetchRequest {
                category: name.clone(),
                display_mode: category.option_type.display_mode().to_string(),
                wordset: state.scope.wordset_id,
                wordset_fallback: state.scope.fallback,
                prompt_type: category.prompt_type,
                option_type: category.option_type,
            }
        };

        let response = self.inner.source.fetch_words(request).await?;
        if !response.success {
            return Err(FetchError::Unsuccessful(format!(
                "word fetch for {name} returned success=false"
            )));
        }

        let mut options = self.filter_words(&category, response.data);
        options.shuffle(&mut *self.inner.rng.borrow_mut());

        let mut state = self.inner.state.borrow_mut();
        if !cache_key.starts_with(&format!("{}::", state.key)) {
            log::debug!("Dropping words for {name} fetched under an old wordset");
            return Ok(0);
        }

        let session_ids: HashSet<WordId> = state.scope.session_word_ids.iter().copied().collect();
        let scoped: Vec<Rc<Word>> = options
            .iter()
            .filter(|w| session_ids.is_empty() || session_ids.contains(&w.id))
            .cloned()
            .collect();
        let resources = self.resources_for(&category, &options);

        let count = scoped.len();
        log::info!("Loaded {count} words for {name}");
        state.pools.scoped.insert(name.clone(), scoped);
        state.pools.options.insert(name, options);
        state.resources.insert(cache_key.clone(), resources);
        state.loaded.insert(cache_key);
        Ok(count)
    }

    fn filter_words(&self, category: &CategoryConfig, words: Vec<Word>) -> Vec<Rc<Word>> {
        let config = &self.inner.config;
        let mut seen = HashSet::new();
        words
            .into_iter()
            .filter(|w| seen.insert(w.id))
            .filter(|w| !category.requires_audio() || !self.resolve_playable_audio(w).is_empty())
            .filter(|w| {
                config.allowed_wordset_ids.is_empty()
                    || w.wordset_ids.is_empty()
                    || w.wordset_ids
                        .iter()
                        .any(|id| config.allowed_wordset_ids.contains(id))
            })
            .map(Rc::new)
            .collect()
    }

    fn resources_for(&self, category: &CategoryConfig, words: &[Rc<Word>]) -> Vec<Media> {
        let mut resources = Vec::new();
        for word in words {
            if category.requires_audio() {
                let audio = self.resolve_playable_audio(word);
                if !audio.is_empty() {
                    resources.push(Media::Audio(audio));
                }
            }
            if category.requires_image() {
                if let Some(image) = word.image.as_deref().filter(|i| !i.trim().is_empty()) {
                    resources.push(Media::Image(image.to_string()));
                }
            }
        }
        resources
    }

    async fn preload_resources(&self, resources: Vec<Media>, early: bool) {
        let timings = &self.inner.config.timings;
        if !early || resources.len() <= timings.single_chunk_limit {
            self.preload_chunk(resources).await;
            return;
        }

        let chunk_size = timings.first_chunk_size.max(1);
        let mut chunks = resources.chunks(chunk_size).map(<[Media]>::to_vec);
        if let Some(first) = chunks.next() {
            self.preload_chunk(first).await;
        }
        let rest: Vec<Vec<Media>> = chunks.collect();
        if rest.is_empty() {
            return;
        }
        let this = self.clone();
        self.inner.platform.spawn(Box::pin(async move {
            for chunk in rest {
                this.preload_chunk(chunk).await;
            }
        }));
    }

    async fn preload_chunk(&self, chunk: Vec<Media>) {
        join_all(chunk.into_iter().map(|media| self.load_media(media))).await;
    }

    /// Warm `names` in the background. Categories whose fetch just failed
    /// are left alone.
    pub fn preload_upcoming_categories(&self, names: Vec<String>) {
        for name in names {
            if self.is_loaded(&name) || self.has_failed(&name) {
                continue;
            }
            let this = self.clone();
            self.inner.platform.spawn(Box::pin(async move {
                this.load_resources_for_category(&name, false).await;
            }));
        }
    }

    pub fn category_config(&self, name: &str) -> CategoryConfig {
        self.inner
            .config
            .category(name)
            .cloned()
            .unwrap_or_else(|| CategoryConfig {
                name: name.to_string(),
                learning_supported: true,
                ..Default::default()
            })
    }

    pub fn resolve_playable_audio(&self, word: &Word) -> String {
        resolve_playable_audio(
            word,
            &self.inner.config.audio_type_preference,
            self.inner.config.preferred_speaker_user_id,
        )
    }

    pub async fn load_audio(&self, url: &str) -> LoadOutcome {
        self.load_media(Media::Audio(url.trim().to_string())).await
    }

    pub async fn load_image(&self, url: &str) -> LoadOutcome {
        self.load_media(Media::Image(url.trim().to_string())).await
    }

    async fn load_media(&self, media: Media) -> LoadOutcome {
        let url = match &media {
            Media::Audio(url) | Media::Image(url) => url.clone(),
        };
        if url.is_empty() {
            return LoadOutcome::Failed;
        }
        if let Some(outcome) = self.inner.media.completed(&media) {
            return outcome;
        }

        let preloader = Rc::clone(&self.inner.preloader);
        let platform = Rc::clone(&self.inner.platform);
        let watchdog = self.inner.config.timings.resource_watchdog();
        let kind = media.clone();
        let load = async move {
            let preload = match &kind {
                Media::Audio(url) => preloader.preload_audio(url),
                Media::Image(url) => preloader.preload_image(url),
            };
            let outcome = platform::timeout(platform.as_ref(), watchdog, preload)
                .await
                .unwrap_or(LoadOutcome::TimedOut);
            if outcome != LoadOutcome::Loaded {
                log::warn!("Preloading {url} settled as {outcome:?}");
            }
            Ok(outcome)
        };
        match self.inner.media.get(media, load).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }
}

/// Pick the URL to play for `word`, or an empty string when it has none.
///
/// An explicit `audio` URL wins. Otherwise recordings are ranked by the
/// position of their type in `preference`, preferring `preferred_speaker`
/// among equally ranked ones. Recordings of unlisted types are only used when
/// nothing listed is available.
pub fn resolve_playable_audio(
    word: &Word,
    preference: &[String],
    preferred_speaker: Option<u64>,
) -> String {
    if let Some(audio) = word.audio.as_deref().map(str::trim) {
        if !is_placeholder_audio(audio) {
            return audio.to_string();
        }
    }

    let playable: Vec<_> = word
        .audio_files
        .iter()
        .filter(|f| !is_placeholder_audio(&f.url))
        .collect();

    let rank = |recording_type: &str| {
        let recording_type = recording_type.trim().to_lowercase();
        preference
            .iter()
            .position(|p| p.trim().eq_ignore_ascii_case(&recording_type))
    };

    let best = playable
        .iter()
        .filter_map(|f| rank(&f.recording_type).map(|r| (r, f)))
        .min_by_key(|(r, f)| {
            let other_speaker = preferred_speaker.is_some() && f.speaker_user_id != preferred_speaker;
            (*r, other_speaker)
        })
        .map(|(_, f)| f.url.trim().to_string());

    best.or_else(|| playable.first().map(|f| f.url.trim().to_string()))
        .unwrap_or_default()
}

/// Every recording URL for `word` with the given type, in server order.
pub fn audio_urls_of_type(word: &Word, recording_type: &str) -> Vec<String> {
    word.audio_files
        .iter()
        .filter(|f| f.recording_type.trim().eq_ignore_ascii_case(recording_type))
        .filter(|f| !is_placeholder_audio(&f.url))
        .map(|f| f.url.trim().to_string())
        .collect()
}
