//! Interaction loop: typed or spoken input, control phrases, dispatch
//!
//! The controller owns the input [`Mode`]. In typed mode it reads lines; in
//! voice mode it listens on a capture session. Control phrases switch modes
//! or exit, everything else is answered by a [`Responder`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, CaptureSession};
use crate::display::DisplaySink;
use crate::orchestrator::ResponseOrchestrator;
use crate::utterance::{Origin, Utterance};
use crate::{Error, Result};

/// Typed phrase that ends the session
pub const EXIT_PHRASE: &str = "/bye";

/// Typed phrase that switches to voice input
pub const ACTIVATE_PHRASE: &str = "activate voice control";

/// Spoken phrase that switches back to typed input
pub const DISABLE_PHRASE: &str = "disable voice control";

/// Active input source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Lines from the terminal
    Typed,
    /// Utterances from the microphone
    Voice,
}

/// What an utterance asks the controller to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the session
    Exit,
    /// Open a capture session
    EnableVoice,
    /// Close the capture session
    DisableVoice,
    /// Answer the utterance
    Prompt(Utterance),
    /// Nothing to do
    Ignore,
}

/// Map an utterance to a command for the current mode
///
/// Matching is case-insensitive on trimmed text. Only voice mode looks for
/// the disable phrase, and it matches anywhere in the utterance.
#[must_use]
pub fn interpret(mode: Mode, utterance: &Utterance) -> Command {
    let text = utterance.text.trim();
    if text.is_empty() {
        return Command::Ignore;
    }

    let normalized = text.to_lowercase();
    if normalized == EXIT_PHRASE {
        return Command::Exit;
    }

    match mode {
        Mode::Typed if normalized == ACTIVATE_PHRASE => Command::EnableVoice,
        Mode::Voice if normalized.contains(DISABLE_PHRASE) => Command::DisableVoice,
        _ => Command::Prompt(Utterance {
            text: text.to_string(),
            origin: utterance.origin,
        }),
    }
}

/// Why the interaction loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The exit phrase was entered
    Bye,
    /// Typed input reached end of file
    EndOfInput,
    /// Shutdown was requested
    Interrupted,
}

/// Answers dispatched utterances
#[async_trait]
pub trait Responder: Send + Sync {
    /// Answer one utterance to completion
    async fn respond(&self, utterance: &Utterance);
}

#[async_trait]
impl Responder for ResponseOrchestrator {
    async fn respond(&self, utterance: &Utterance) {
        self.handle(utterance).await;
    }
}

/// Source of typed lines
#[async_trait]
pub trait LineSource: Send {
    /// Next line, `None` at end of input
    ///
    /// # Errors
    ///
    /// Returns error if input cannot be read
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Reads lines from stdin after printing a prompt
pub struct StdinLines {
    lines: Lines<BufReader<Stdin>>,
    prompt: String,
}

impl StdinLines {
    /// Read from the process's stdin
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(self.prompt.as_bytes()).await?;
        stdout.flush().await?;

        Ok(self.lines.next_line().await?)
    }
}

/// Opens capture sessions
#[async_trait]
pub trait VoiceInput: Send + Sync {
    /// Open a fresh session
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the device or recognizer is unavailable
    async fn open(&self) -> Result<Box<dyn Listener>>;
}

/// An open capture session
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` on device or recognizer failure
    async fn listen(&self) -> Result<Utterance>;

    /// Release the session
    async fn close(self: Box<Self>);
}

/// Voice input backed by capture sessions on a device
pub struct CaptureInput {
    backend: Arc<dyn CaptureBackend>,
}

impl CaptureInput {
    /// Open sessions on `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl VoiceInput for CaptureInput {
    async fn open(&self) -> Result<Box<dyn Listener>> {
        let session = CaptureSession::open(Arc::clone(&self.backend)).await?;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl Listener for CaptureSession {
    async fn listen(&self) -> Result<Utterance> {
        Self::listen(self).await
    }

    async fn close(self: Box<Self>) {
        (*self).close().await;
    }
}

enum Input {
    Utterance(Utterance),
    EndOfInput,
    Interrupted,
    CaptureFailed(Error),
    Unreadable(Error),
}

/// Top-level interaction loop
pub struct InteractionController {
    responder: Arc<dyn Responder>,
    lines: Box<dyn LineSource>,
    voice: Arc<dyn VoiceInput>,
    display: Arc<dyn DisplaySink>,
    shutdown: CancellationToken,
}

impl InteractionController {
    /// Create a controller; cancelling `shutdown` ends the loop
    #[must_use]
    pub fn new(
        responder: Arc<dyn Responder>,
        lines: Box<dyn LineSource>,
        voice: Arc<dyn VoiceInput>,
        display: Arc<dyn DisplaySink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            responder,
            lines,
            voice,
            display,
            shutdown,
        }
    }

    /// Run until exit, end of input or shutdown
    pub async fn run(mut self) -> ExitReason {
        let mut mode = Mode::Typed;
        let mut session: Option<Box<dyn Listener>> = None;

        let reason = loop {
            let input = match &session {
                Some(listener) => {
                    read_spoken(self.display.as_ref(), &self.shutdown, listener.as_ref()).await
                }
                None => self.read_typed().await,
            };

            let utterance = match input {
                Input::Utterance(utterance) => utterance,
                Input::EndOfInput => break ExitReason::EndOfInput,
                Input::Interrupted => break ExitReason::Interrupted,
                Input::CaptureFailed(e) => {
                    tracing::error!(error = %e, "voice input failed, returning to typed input");
                    self.display.error(&e);
                    close_session(&mut session).await;
                    mode = Mode::Typed;
                    continue;
                }
                Input::Unreadable(e) => {
                    self.display.error(&e);
                    continue;
                }
            };

            match interpret(mode, &utterance) {
                Command::Ignore => {}
                Command::Exit => {
                    self.display.notice("Goodbye!");
                    break ExitReason::Bye;
                }
                Command::EnableVoice => match self.voice.open().await {
                    Ok(listener) => {
                        session = Some(listener);
                        mode = Mode::Voice;
                        tracing::info!(?mode, "voice control enabled");
                        self.display.notice("Voice control enabled! Speak freely.");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to enable voice control");
                        self.display.error(&e);
                    }
                },
                Command::DisableVoice => {
                    close_session(&mut session).await;
                    mode = Mode::Typed;
                    tracing::info!(?mode, "voice control disabled");
                    self.display.notice("Voice control disabled.");
                }
                Command::Prompt(utterance) => {
                    if utterance.origin == Origin::Spoken {
                        self.display.notice(&format!("You (speech): {}", utterance.text));
                    }

                    tokio::select! {
                        () = self.responder.respond(&utterance) => {}
                        () = self.shutdown.cancelled() => break ExitReason::Interrupted,
                    }
                }
            }
        };

        close_session(&mut session).await;
        tracing::info!(?reason, "interaction loop finished");
        reason
    }

    async fn read_typed(&mut self) -> Input {
        tokio::select! {
            line = self.lines.next_line() => match line {
                Ok(Some(line)) => Input::Utterance(Utterance::typed(line)),
                Ok(None) => Input::EndOfInput,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!(error = %e, "skipping unreadable input line");
                    Input::Unreadable(Error::Io(e))
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input");
                    Input::EndOfInput
                }
            },
            () = self.shutdown.cancelled() => Input::Interrupted,
        }
    }
}

async fn read_spoken(
    display: &dyn DisplaySink,
    shutdown: &CancellationToken,
    listener: &dyn Listener,
) -> Input {
    display.notice("Speak now...");

    tokio::select! {
        heard = listener.listen() => match heard {
            Ok(utterance) => Input::Utterance(utterance),
            Err(e) => Input::CaptureFailed(e),
        },
        () = shutdown.cancelled() => Input::Interrupted,
    }
}

async fn close_session(session: &mut Option<Box<dyn Listener>>) {
    if let Some(listener) = session.take() {
        listener.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_in_both_modes() {
        assert_eq!(interpret(Mode::Typed, &Utterance::typed(" /BYE ")), Command::Exit);
        assert_eq!(interpret(Mode::Voice, &Utterance::spoken("/bye")), Command::Exit);
    }

    #[test]
    fn test_activate_only_when_typed() {
        assert_eq!(
            interpret(Mode::Typed, &Utterance::typed("Activate Voice Control")),
            Command::EnableVoice
        );
        assert_eq!(
            interpret(Mode::Voice, &Utterance::spoken("activate voice control")),
            Command::Prompt(Utterance::spoken("activate voice control"))
        );
    }

    #[test]
    fn test_disable_matches_substring_in_voice_mode() {
        assert_eq!(
            interpret(Mode::Voice, &Utterance::spoken("please disable voice control now")),
            Command::DisableVoice
        );
        assert_eq!(
            interpret(Mode::Typed, &Utterance::typed("disable voice control")),
            Command::Prompt(Utterance::typed("disable voice control"))
        );
    }

    #[test]
    fn test_blank_is_ignored() {
        assert_eq!(interpret(Mode::Typed, &Utterance::typed("   ")), Command::Ignore);
    }

    #[test]
    fn test_prompt_is_trimmed_but_keeps_case() {
        assert_eq!(
            interpret(Mode::Typed, &Utterance::typed("  Why is the sky blue?\n")),
            Command::Prompt(Utterance::typed("Why is the sky blue?"))
        );
    }
}
