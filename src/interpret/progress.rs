//! The progress channel: one machine-readable line per state change.
//!
//! ```text
//! Status={'index': 3, 'code': 'current'}
//! Env={'TOTAL': '42'}
//! ```
//!
//! An editor following a run parses these lines to highlight steps.

use std::io::{self, Write};

use crate::event::py_repr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Comment lines and lines skipped by a failed block.
    Skipped,
    Current,
    Completed,
    Failed,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "",
            Self::Current => "current",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

pub struct Progress<W: Write> {
    out: W,
}

impl<W: Write> Progress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn status(&mut self, index: usize, code: Code) -> io::Result<()> {
        writeln!(
            self.out,
            "Status={{'index': {index}, 'code': {}}}",
            py_repr(code.as_str())
        )?;
        self.out.flush()
    }

    pub fn env(&mut self, key: &str, value: &str) -> io::Result<()> {
        writeln!(self.out, "Env={{{}: {}}}", py_repr(key), py_repr(value))?;
        self.out.flush()
    }
}
