#![deny(clippy::string_slice)]

pub mod audio;
pub mod config;
pub mod error;
pub mod loader;
pub mod modes;
pub mod observer;
pub mod options;
pub mod platform;
pub mod progress;
pub mod quiz;
pub mod selection;
pub mod simulation;
mod utils;
#[cfg(target_arch = "wasm32")]
mod web;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use rand::rngs::StdRng;

pub use config::QuizConfig;
pub use error::{FetchError, PlaybackError, QuizError, TransportError};
pub use modes::QuizMode;
pub use quiz::{
    AnswerOutcome, FlashcardWidget, QuestionView, QuizResults, QuizServices, QuizSessionContext,
    QuizSummary, RoundChoices, RoundView,
};
pub use selection::StarMode;
pub use simulation::QuizSimulation;

/// The engine is single-threaded, so every component that draws random
/// numbers shares one generator.
pub type SharedRng = Rc<RefCell<StdRng>>;

// keeping this in a static means the logger is only ever initialized once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    #[cfg(target_arch = "wasm32")]
    wasm_logger::init(wasm_logger::Config::default());

    #[cfg(not(target_arch = "wasm32"))]
    if env_logger::try_init().is_err() {
        return;
    }

    log::info!("Logging initialized");
});

pub fn init_logging() {
    LazyLock::force(&LOGGER);
}
