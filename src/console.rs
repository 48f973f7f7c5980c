use crate::event::LogEvent;
use crate::level::LogLevel;
use colored::{ColoredString, Colorize};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Immediate, unbuffered destination for rendered events.
///
/// Called synchronously from the emitting thread. Implementations must not
/// fail the caller; write errors are swallowed.
pub trait ConsoleSink: Send + Sync {
    fn write_event(&self, event: &LogEvent);
}

/// Renders events as single text lines into any `Write`.
pub struct ConsoleWriter<W> {
    out: Mutex<W>,
    ansi: bool,
}

impl ConsoleWriter<io::Stdout> {
    pub fn stdout(ansi: bool) -> Self {
        ConsoleWriter::new(io::stdout(), ansi)
    }
}

impl<W: Write + Send> ConsoleWriter<W> {
    pub fn new(out: W, ansi: bool) -> Self {
        ConsoleWriter { out: Mutex::new(out), ansi }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ConsoleSink for ConsoleWriter<W> {
    fn write_event(&self, event: &LogEvent) {
        let line = render(event, self.ansi);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
}

/// Render one event, newline terminated:
///
/// `2026-01-02T03:04:05.678Z  INFO request completed status=200 user_id="42" (src/api.rs:88)`
///
/// A stack trace, when present, follows on the next lines.
pub fn render(event: &LogEvent, ansi: bool) -> String {
    let mut line = String::with_capacity(128);

    let ts = event.timestamp().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let level = format!("{:>5}", event.level().as_str().to_ascii_uppercase());
    if ansi {
        line.push_str(&ts.dimmed().to_string());
        line.push(' ');
        line.push_str(&paint_level(event.level(), &level).to_string());
        line.push(' ');
        line.push_str(&event.message().bold().to_string());
    } else {
        line.push_str(&ts);
        line.push(' ');
        line.push_str(&level);
        line.push(' ');
        line.push_str(event.message());
    }

    for (key, value) in event.fields() {
        line.push(' ');
        let value = serde_json::to_string(value).unwrap_or_default();
        if ansi {
            line.push_str(&key.italic().to_string());
        } else {
            line.push_str(key);
        }
        line.push('=');
        line.push_str(&value);
    }

    if let Some(caller) = event.caller() {
        let caller = format!("({})", caller);
        line.push(' ');
        if ansi {
            line.push_str(&caller.dimmed().to_string());
        } else {
            line.push_str(&caller);
        }
    }
    line.push('\n');

    if let Some(trace) = event.stack_trace() {
        line.push_str(trace.trim_end());
        line.push('\n');
    }
    line
}

fn paint_level(level: LogLevel, text: &str) -> ColoredString {
    match level {
        LogLevel::Debug => text.blue(),
        LogLevel::Info => text.green(),
        LogLevel::Warn => text.yellow(),
        LogLevel::Error => text.red(),
        LogLevel::Fatal => text.white().on_red().bold(),
    }
}
