//! Line-oriented status protocol.
//!
//! A supervising process reads the worker's stdout line by line, so every
//! status line is written whole and flushed immediately. Nothing else may
//! be written to stdout; logs go to stderr.

use std::fmt;
use std::io::{self, Write};

use farmhand_core::job::TaskId;

/// A lifecycle transition visible to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent<'a> {
    /// Emitted right before the render call.
    RenderStart(&'a TaskId),
    /// Emitted right after a successful render call.
    Success(&'a TaskId),
    /// Emitted once when the frame queue closes.
    BatchComplete,
    /// Emitted once by the top-level handler on an unrecoverable error.
    Exception(String),
}

impl fmt::Display for StatusEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenderStart(id) => write!(f, "RENDER_START: {id}"),
            Self::Success(id) => write!(f, "SUCCESS: {id}"),
            Self::BatchComplete => f.write_str("BATCH_COMPLETE"),
            // Keep multi-line error chains on one protocol line.
            Self::Exception(message) => {
                write!(f, "EXCEPTION:{}", message.replace(['\r', '\n'], " "))
            }
        }
    }
}

pub struct StatusReporter<W: Write> {
    out: W,
}

impl StatusReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> StatusReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one status line and flush it.
    pub fn report(&mut self, event: &StatusEvent<'_>) -> io::Result<()> {
        writeln!(self.out, "{event}")?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(events: &[StatusEvent<'_>]) -> String {
        let mut reporter = StatusReporter::new(Vec::new());
        for event in events {
            reporter.report(event).unwrap();
        }
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn render_lines_carry_task_id() {
        let id = TaskId::Text("7f3c".into());
        assert_eq!(
            lines(&[StatusEvent::RenderStart(&id), StatusEvent::Success(&id)]),
            "RENDER_START: 7f3c\nSUCCESS: 7f3c\n"
        );
    }

    #[test]
    fn numeric_task_id() {
        let id = TaskId::Number(12);
        assert_eq!(lines(&[StatusEvent::Success(&id)]), "SUCCESS: 12\n");
    }

    #[test]
    fn batch_complete_line() {
        assert_eq!(lines(&[StatusEvent::BatchComplete]), "BATCH_COMPLETE\n");
    }

    #[test]
    fn exception_has_no_space_after_colon() {
        assert_eq!(
            lines(&[StatusEvent::Exception("Unknown scene: Night".into())]),
            "EXCEPTION:Unknown scene: Night\n"
        );
    }

    #[test]
    fn exception_stays_on_one_line() {
        let out = lines(&[StatusEvent::Exception("first\nsecond\r\nthird".into())]);
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("EXCEPTION:first second"));
    }

    struct FlushCounter {
        buf: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn every_line_is_flushed() {
        let mut reporter = StatusReporter::new(FlushCounter {
            buf: Vec::new(),
            flushes: 0,
        });
        reporter.report(&StatusEvent::BatchComplete).unwrap();
        reporter.report(&StatusEvent::BatchComplete).unwrap();
        assert_eq!(reporter.into_inner().flushes, 2);
    }
}
