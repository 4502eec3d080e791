//! Conversation output

use std::io::Write;

use crate::Error;

/// Receives response text as it streams
pub trait DisplaySink: Send + Sync {
    /// A response is starting
    fn begin(&self, bot_name: &str);

    /// A token arrived
    fn token(&self, text: &str);

    /// The response hit an error
    fn error(&self, error: &Error);

    /// The response is over
    fn end(&self);

    /// A status line outside any response
    fn notice(&self, text: &str);
}

/// Writes the conversation to stdout
#[derive(Debug, Default)]
pub struct TerminalDisplay;

impl DisplaySink for TerminalDisplay {
    fn begin(&self, bot_name: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{bot_name}: ");
        let _ = out.flush();
    }

    fn token(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn error(&self, error: &Error) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out);
        let _ = writeln!(out, "[error] {error}");
        let _ = out.flush();
    }

    fn end(&self) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }

    fn notice(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}
