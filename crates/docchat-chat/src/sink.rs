//! Streaming output sinks.
//!
//! A sink receives text fragments in order via `on_token` and exactly one
//! `on_done` when the model finishes. Calls never overlap.

use std::io::Write;

use tokio::sync::mpsc;

/// Consumer of streamed model output.
pub trait TokenSink: Send {
    fn on_token(&mut self, token: &str);

    fn on_done(&mut self) {}
}

/// Appends fragments to one display buffer and re-renders after each one.
///
/// Create a new handler per turn; the buffer is never reset.
pub struct StreamHandler<F>
where
    F: FnMut(&str) + Send,
{
    text: String,
    render: F,
    done: bool,
}

impl<F> StreamHandler<F>
where
    F: FnMut(&str) + Send,
{
    pub fn new(render: F) -> Self {
        Self {
            text: String::new(),
            render,
            done: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<F> TokenSink for StreamHandler<F>
where
    F: FnMut(&str) + Send,
{
    fn on_token(&mut self, token: &str) {
        self.text.push_str(token);
        (self.render)(&self.text);
    }

    fn on_done(&mut self) {
        self.done = true;
    }
}

/// Discards output. Used for intermediate chain steps.
#[derive(Debug, Default)]
pub struct NullSink;

impl TokenSink for NullSink {
    fn on_token(&mut self, _token: &str) {}
}

/// Forwards fragments over a channel, e.g. to an SSE response.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl TokenSink for ChannelSink {
    fn on_token(&mut self, token: &str) {
        // A closed receiver means the client went away; the turn still completes.
        let _ = self.tx.send(token.to_string());
    }
}

/// Writes fragments to a terminal as they arrive.
pub struct StdoutSink<W: Write + Send> {
    out: W,
}

impl StdoutSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> StdoutSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TokenSink for StdoutSink<W> {
    fn on_token(&mut self, token: &str) {
        let _ = self.out.write_all(token.as_bytes());
        let _ = self.out.flush();
    }

    fn on_done(&mut self) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}
