//! Delta sinks for streamed replies.
//!
//! The stream decoder hands every content delta to a [`Renderer`] as soon as
//! it is decoded. Renderers also carry the interrupt signal that lets a caller
//! stop an exchange mid-stream.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for consuming streamed output.
///
/// `print_text` is invoked synchronously, in stream order, once per decoded
/// delta. Implementations must return promptly; the decoder neither buffers
/// nor coalesces deltas on their behalf.
pub trait Renderer: Send {
    /// Print a chunk of reply text.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str) {
        _ = error;
    }

    /// Print an informational message.
    fn print_info(&mut self, info: &str) {
        _ = info;
    }

    /// Called when a reply has been fully streamed.
    fn finish_response(&mut self) {}

    /// Called when the stream is interrupted on request.
    fn print_interrupted(&mut self) {}

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// A renderer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn print_text(&mut self, _: &str) {}
}

/// Adapts a closure into a [`Renderer`].
///
/// ```
/// use chatrelay::{CallbackRenderer, Renderer};
///
/// let mut seen = Vec::new();
/// let mut renderer = CallbackRenderer::new(|delta: &str| seen.push(delta.to_string()));
/// renderer.print_text("Hel");
/// renderer.print_text("lo");
/// drop(renderer);
/// assert_eq!(seen, vec!["Hel", "lo"]);
/// ```
pub struct CallbackRenderer<F> {
    callback: F,
    interrupted: Option<Arc<AtomicBool>>,
}

impl<F: FnMut(&str) + Send> CallbackRenderer<F> {
    /// Wraps `callback`; it is called once per delta.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }
}

impl<F: FnMut(&str) + Send> Renderer for CallbackRenderer<F> {
    fn print_text(&mut self, text: &str) {
        (self.callback)(text);
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// This renderer writes deltas straight to stdout and flushes after each one
/// so tokens show up as they arrive.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Creates a new PlainTextRenderer with specified color and interrupt flag.
    pub fn with_color_and_interrupt(use_color: bool, interrupted: Arc<AtomicBool>) -> Self {
        Self::with_color(use_color).with_interrupt(interrupted)
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        print!("{text}");
        if !text.is_empty() {
            self.line_start = text.ends_with('\n');
        }
        self.flush();
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_error(&mut self, error: &str) {
        if !self.line_start {
            self.write("\n");
        }
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_info(&mut self, info: &str) {
        if !self.line_start {
            self.write("\n");
        }
        let line = self.styled(ANSI_DIM, info);
        self.write(&format!("{line}\n"));
    }

    fn finish_response(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }

    fn print_interrupted(&mut self) {
        self.write("\n[interrupted]\n");
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
