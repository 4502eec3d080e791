//! User input handed to the response pipeline

/// Where an utterance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Typed at the prompt
    Typed,
    /// Recognized from the microphone
    Spoken,
}

/// A finalized piece of user text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Text as entered or recognized
    pub text: String,

    /// Input source
    pub origin: Origin,
}

impl Utterance {
    /// A typed line
    #[must_use]
    pub fn typed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: Origin::Typed,
        }
    }

    /// A recognized utterance
    #[must_use]
    pub fn spoken(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: Origin::Spoken,
        }
    }
}
