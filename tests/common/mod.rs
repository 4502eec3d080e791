//! Shared test utilities

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chorus::controller::{LineSource, Listener, Responder, VoiceInput};
use chorus::generation::EventStream;
use chorus::render::ArtifactKind;
use chorus::{
    AudioArtifact, DisplaySink, Error, Player, Renderer, Result, Segment, TokenEvent,
    TokenSource, Utterance,
};

/// One scripted generation record
#[derive(Debug, Clone)]
pub enum Step {
    Token(&'static str),
    Done,
    Malformed,
    Truncated,
}

/// Token source replaying a script and recording prompts
#[derive(Default)]
pub struct ScriptedSource {
    script: Vec<Step>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Tokens followed by the completion record
    pub fn tokens(tokens: &[&'static str]) -> Self {
        let mut script: Vec<Step> = tokens.iter().copied().map(Step::Token).collect();
        script.push(Step::Done);
        Self::new(script)
    }
}

struct ScriptedStream {
    steps: VecDeque<Step>,
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<Result<TokenEvent>> {
        let event = match self.steps.pop_front()? {
            Step::Token(text) => Ok(TokenEvent {
                text: text.to_string(),
                done: false,
            }),
            Step::Done => {
                self.steps.clear();
                Ok(TokenEvent {
                    text: String::new(),
                    done: true,
                })
            }
            Step::Malformed => {
                self.steps.clear();
                Err(Error::Decode("expected value at line 1 column 1".to_string()))
            }
            Step::Truncated => {
                self.steps.clear();
                Err(Error::TruncatedStream)
            }
        };
        Some(event)
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn stream(&self, prompt: &str) -> Result<Box<dyn EventStream>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(Box::new(ScriptedStream {
            steps: self.script.iter().cloned().collect(),
        }))
    }
}

/// Token source whose requests always fail
pub struct UnreachableSource;

#[async_trait]
impl TokenSource for UnreachableSource {
    async fn stream(&self, _prompt: &str) -> Result<Box<dyn EventStream>> {
        Err(Error::Generation("connection refused".to_string()))
    }
}

/// Renderer recording segment text, failing on chosen texts
#[derive(Default)]
pub struct RecordingRenderer {
    pub rendered: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay: Duration,
}

impl RecordingRenderer {
    pub fn failing_on(texts: &[&str]) -> Self {
        Self {
            failing: texts.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn render(&self, segment: &Segment) -> Result<AudioArtifact> {
        tokio::time::sleep(self.delay).await;
        self.rendered.lock().unwrap().push(segment.text.clone());

        if self.failing.contains(&segment.text) {
            return Err(Error::Synthesis("renderer exited with code 1".to_string()));
        }

        Ok(AudioArtifact::new(
            PathBuf::from(format!("/nonexistent/chorus/{}.wav", segment.text)),
            ArtifactKind::Synthesized,
        ))
    }
}

/// Player recording artifact names and detecting overlapping playback
#[derive(Default)]
pub struct RecordingPlayer {
    pub played: Mutex<Vec<String>>,
    playing: AtomicBool,
    pub overlaps: AtomicUsize,
    delay: Duration,
}

impl RecordingPlayer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn play(&self, artifact: &AudioArtifact) -> Result<()> {
        if self.playing.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        tokio::time::sleep(self.delay).await;

        let name = artifact
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.played.lock().unwrap().push(name);

        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Something the display was asked to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shown {
    Begin(String),
    Token(String),
    Error(String),
    End,
    Notice(String),
}

/// Display sink recording every call
#[derive(Default)]
pub struct RecordingDisplay {
    pub shown: Mutex<Vec<Shown>>,
}

impl RecordingDisplay {
    pub fn events(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Shown::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Shown::Error(_)))
            .count()
    }
}

impl DisplaySink for RecordingDisplay {
    fn begin(&self, bot_name: &str) {
        self.shown.lock().unwrap().push(Shown::Begin(bot_name.to_string()));
    }

    fn token(&self, text: &str) {
        self.shown.lock().unwrap().push(Shown::Token(text.to_string()));
    }

    fn error(&self, error: &Error) {
        self.shown.lock().unwrap().push(Shown::Error(error.to_string()));
    }

    fn end(&self) {
        self.shown.lock().unwrap().push(Shown::End);
    }

    fn notice(&self, text: &str) {
        self.shown.lock().unwrap().push(Shown::Notice(text.to_string()));
    }
}

/// Typed input from a fixed list, then end of input
///
/// A `None` entry is read as a line that is not valid UTF-8
pub struct ScriptedLines {
    lines: VecDeque<Option<String>>,
}

impl ScriptedLines {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| Some((*l).to_string())).collect(),
        }
    }

    pub fn with_unreadable(lines: &[Option<&str>]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.map(ToString::to_string)).collect(),
        }
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.pop_front() {
            Some(Some(line)) => Ok(Some(line)),
            Some(None) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream did not contain valid UTF-8",
            ))),
            None => Ok(None),
        }
    }
}

/// Typed input that never arrives
pub struct SilentLines;

#[async_trait]
impl LineSource for SilentLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        std::future::pending().await
    }
}

/// Responder recording dispatched utterances
#[derive(Default)]
pub struct RecordingResponder {
    pub received: Mutex<Vec<Utterance>>,
}

impl RecordingResponder {
    pub fn texts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn respond(&self, utterance: &Utterance) {
        self.received.lock().unwrap().push(utterance.clone());
    }
}

/// One scripted capture result
#[derive(Debug, Clone)]
pub enum Heard {
    Text(&'static str),
    Failure,
}

/// Voice input handing out sessions that replay a shared script
#[derive(Default)]
pub struct ScriptedVoice {
    script: Arc<Mutex<VecDeque<Heard>>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    unavailable: bool,
}

impl ScriptedVoice {
    pub fn new(heard: &[Heard]) -> Self {
        Self {
            script: Arc::new(Mutex::new(heard.iter().cloned().collect())),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

struct ScriptedListener {
    script: Arc<Mutex<VecDeque<Heard>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl VoiceInput for ScriptedVoice {
    async fn open(&self) -> Result<Box<dyn Listener>> {
        if self.unavailable {
            return Err(Error::Capture("no input device available".to_string()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedListener {
            script: Arc::clone(&self.script),
            closed: Arc::clone(&self.closed),
        }))
    }
}

#[async_trait]
impl Listener for ScriptedListener {
    async fn listen(&self) -> Result<Utterance> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Heard::Text(text)) => Ok(Utterance::spoken(text)),
            Some(Heard::Failure) => Err(Error::Capture("input stream closed".to_string())),
            // Nothing left to say: wait like a quiet room
            None => std::future::pending().await,
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
