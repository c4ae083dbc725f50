use crate::modes::QuizMode;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    /// `play()` was interrupted by a `pause()` or a source change.
    #[error("playback was aborted")]
    Aborted,
    /// The browser refused to start audio without a user gesture.
    #[error("autoplay was blocked")]
    NotAllowed,
    #[error("audio has no source")]
    MissingSource,
    #[error("media error: {0}")]
    Media(String),
}

impl PlaybackError {
    /// Classify a DOM exception by its `name`.
    pub fn from_dom_name(name: &str, message: &str) -> Self {
        match name {
            "AbortError" => PlaybackError::Aborted,
            "NotAllowedError" => PlaybackError::NotAllowed,
            _ => PlaybackError::Media(format!("{name}: {message}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(String),
    #[error("server reported failure: {0}")]
    Unsuccessful(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request error: {0}")]
    Request(String),
    #[error("HTTP error: {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuizError {
    #[error("none of the selected categories support {0} mode")]
    ModeUnavailable(QuizMode),
    #[error("no known categories were selected")]
    NoCategories,
    #[error("the quiz has been closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_exception_classification() {
        assert_eq!(
            PlaybackError::from_dom_name("AbortError", "interrupted"),
            PlaybackError::Aborted
        );
        assert_eq!(
            PlaybackError::from_dom_name("NotAllowedError", "no gesture"),
            PlaybackError::NotAllowed
        );
        assert_eq!(
            PlaybackError::from_dom_name("NotSupportedError", "bad codec"),
            PlaybackError::Media("NotSupportedError: bad codec".into())
        );
    }
}
