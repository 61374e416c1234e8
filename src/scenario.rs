//! Scenario files and the line-level edits `retrace edit` performs.
//!
//! A scenario is a UTF-8 text file with one event per line. Lines are kept
//! raw and parsed on demand, so a malformed line only matters once something
//! reads it:
//!
//! ```text
//! <dir>/
//!   login.retrace    # the scenario
//!   ok-button.png    # pattern images, relative to <dir>
//!   .tmp/            # diagnostics, screencast, UPLOAD_PATH for shell commands
//! ```
//!
//! Indices are 0-based here; the CLI converts from line numbers.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::event::{self, Event, ParseError};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("line {line} is out of range (the scenario has {len} lines)")]
    LineOutOfRange { line: usize, len: usize },

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: ParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, ScenarioError>;

#[derive(Debug, Clone)]
pub struct Scenario {
    path: PathBuf,
    lines: Vec<String>,
}

impl Scenario {
    /// Reads the scenario at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path)?;
        let lines = text.lines().map(str::to_string).collect();
        Ok(Self { path, lines })
    }

    /// Writes the lines back, newline-terminated.
    pub fn save(&self) -> Result<()> {
        let mut text = self.lines.join("\n");
        if !self.lines.is_empty() {
            text.push('\n');
        }
        fs::write(&self.path, text)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Directory pattern paths are relative to.
    pub fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Scratch directory for diagnostics and uploads.
    pub fn tmp_dir(&self) -> PathBuf {
        self.dir().join(".tmp")
    }

    /// Parses the line at `index`.
    pub fn event(&self, index: usize) -> Result<Event> {
        let line = self.line(index)?;
        event::restore(line).map_err(|source| ScenarioError::Parse {
            line: index + 1,
            source,
        })
    }

    fn line(&self, index: usize) -> Result<&String> {
        self.lines.get(index).ok_or(ScenarioError::LineOutOfRange {
            line: index + 1,
            len: self.lines.len(),
        })
    }

    fn check(&self, indices: &[usize]) -> Result<()> {
        for &index in indices {
            self.line(index)?;
        }
        Ok(())
    }

    // ── Edits ──

    /// Inserts `line` before `index`; `index == len` appends. The line must
    /// parse.
    pub fn insert(&mut self, index: usize, line: &str) -> Result<()> {
        if index > self.lines.len() {
            return Err(ScenarioError::LineOutOfRange {
                line: index + 1,
                len: self.lines.len(),
            });
        }
        event::restore(line).map_err(|source| ScenarioError::Parse {
            line: index + 1,
            source,
        })?;
        self.lines.insert(index, line.to_string());
        Ok(())
    }

    /// Removes up to `count` lines starting at `index`.
    pub fn delete(&mut self, index: usize, count: usize) -> Result<()> {
        self.line(index)?;
        let end = (index + count).min(self.lines.len());
        self.lines.drain(index..end);
        Ok(())
    }

    /// Cuts `count` lines at `from` and reinserts them at `to`, where `to`
    /// indexes the list after the cut.
    pub fn move_lines(&mut self, from: usize, to: usize, count: usize) -> Result<()> {
        let len = self.lines.len();
        if count == 0 || from + count > len {
            return Err(ScenarioError::LineOutOfRange {
                line: from + count,
                len,
            });
        }
        if to > len - count {
            return Err(ScenarioError::LineOutOfRange { line: to + 1, len });
        }
        let cut: Vec<String> = self.lines.drain(from..from + count).collect();
        self.lines.splice(to..to, cut);
        Ok(())
    }

    /// Adds `by` levels of indentation (negative removes), never below zero.
    /// Indentation is normalized to tabs.
    pub fn shift(&mut self, indices: &[usize], by: isize) -> Result<()> {
        self.check(indices)?;
        for &index in indices {
            let line = &self.lines[index];
            let level = event::level_of(line).saturating_add_signed(by);
            self.lines[index] = format!("{}{}", "\t".repeat(level), line.trim_start());
        }
        Ok(())
    }

    /// Prefixes non-blank lines with `# `, turning events into inert comments.
    pub fn comment(&mut self, indices: &[usize]) -> Result<()> {
        self.check(indices)?;
        for &index in indices {
            let line = &self.lines[index];
            let body = line.trim_start();
            if body.is_empty() || body.starts_with('#') {
                continue;
            }
            let level = event::level_of(line);
            self.lines[index] = format!("{}# {body}", "\t".repeat(level));
        }
        Ok(())
    }

    /// Reverses [`Scenario::comment`] for lines that hide an event.
    /// Ordinary comments are left alone.
    pub fn uncomment(&mut self, indices: &[usize]) -> Result<()> {
        self.check(indices)?;
        for &index in indices {
            let line = &self.lines[index];
            let body = line.trim_start();
            if !body.starts_with("# {") {
                continue;
            }
            let level = event::level_of(line);
            let event = body.trim_start_matches(['#', ' ']);
            self.lines[index] = format!("{}{event}", "\t".repeat(level));
        }
        Ok(())
    }

    /// Merges the events at `indices` into the first of them: pattern lists
    /// are concatenated, other fields keep the first value seen. The other
    /// lines are removed.
    pub fn join(&mut self, indices: &[usize]) -> Result<()> {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();
        let Some((&first, rest)) = indices.split_first() else {
            return Ok(());
        };

        let mut merged = self.event(first)?;
        for &index in rest {
            merged.absorb(self.event(index)?);
        }

        self.lines[first] = event::dump(&merged);
        for &index in rest.iter().rev() {
            self.lines.remove(index);
        }
        Ok(())
    }

    /// Replaces each event that lists several patterns with one event per
    /// pattern.
    pub fn split(&mut self, indices: &[usize]) -> Result<()> {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();
        let events = indices
            .iter()
            .map(|&index| self.event(index))
            .collect::<Result<Vec<_>>>()?;

        // Back to front so earlier indices stay valid.
        for (&index, event) in indices.iter().zip(events).rev() {
            let Some(patterns) = event.patterns.clone() else {
                continue;
            };
            let parts: Vec<String> = patterns
                .into_iter()
                .map(|pattern| {
                    let mut part = event.clone();
                    part.patterns = Some(vec![pattern]);
                    event::dump(&part)
                })
                .collect();
            self.lines.splice(index..=index, parts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::event::EventType;

    fn scenario(lines: &[&str]) -> (TempDir, Scenario) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.retrace");
        fs::write(&path, lines.join("\n")).unwrap();
        let scenario = Scenario::open(&path).unwrap();
        (dir, scenario)
    }

    #[test]
    fn open_and_save_round_trip() {
        let (_dir, scenario) = scenario(&["{'type': 'label', 'value': 'a'}", "\t# note"]);
        assert_eq!(scenario.lines().len(), 2);
        scenario.save().unwrap();
        let text = fs::read_to_string(scenario.path()).unwrap();
        assert_eq!(text, "{'type': 'label', 'value': 'a'}\n\t# note\n");
        assert_eq!(scenario.tmp_dir(), scenario.dir().join(".tmp"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = Scenario::open(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ScenarioError::Io(_)));
    }

    #[test]
    fn event_reports_one_based_lines() {
        let (_dir, scenario) = scenario(&["# ok", "{'type': 'nope'}"]);
        assert!(scenario.event(0).unwrap().is_comment());
        assert!(matches!(
            scenario.event(1),
            Err(ScenarioError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            scenario.event(5),
            Err(ScenarioError::LineOutOfRange { line: 6, len: 2 })
        ));
    }

    #[test]
    fn insert_validates_and_delete_clamps() {
        let (_dir, mut scenario) = scenario(&["a", "b", "c"]);
        scenario
            .insert(1, "{'type': 'delay', 'value': '1'}")
            .unwrap();
        assert_eq!(scenario.lines()[1], "{'type': 'delay', 'value': '1'}");
        assert!(scenario.insert(0, "{'type': 'bogus'}").is_err());
        assert!(scenario.insert(9, "# x").is_err());

        scenario.delete(2, 10).unwrap();
        assert_eq!(scenario.lines(), ["a", "{'type': 'delay', 'value': '1'}"]);
        assert!(scenario.delete(2, 1).is_err());
    }

    #[test]
    fn move_reinserts_after_cut() {
        let (_dir, mut scenario) = scenario(&["a", "b", "c", "d", "e"]);
        scenario.move_lines(0, 2, 2).unwrap();
        assert_eq!(scenario.lines(), ["c", "d", "a", "b", "e"]);
        scenario.move_lines(4, 0, 1).unwrap();
        assert_eq!(scenario.lines(), ["e", "c", "d", "a", "b"]);
        assert!(scenario.move_lines(4, 0, 2).is_err());
        assert!(scenario.move_lines(0, 5, 1).is_err());
    }

    #[test]
    fn shift_clamps_at_zero_and_normalizes_to_tabs() {
        let (_dir, mut scenario) = scenario(&["  x", "\ty", "z"]);
        scenario.shift(&[0, 1, 2], -1).unwrap();
        assert_eq!(scenario.lines(), ["\tx", "y", "z"]);
        scenario.shift(&[2], 2).unwrap();
        assert_eq!(scenario.lines()[2], "\t\tz");
        assert!(scenario.shift(&[3], 1).is_err());
    }

    #[test]
    fn comment_and_uncomment_only_touch_events() {
        let (_dir, mut scenario) = scenario(&[
            "\t{'type': 'delay', 'value': '1'}",
            "# already a note",
            "",
        ]);
        scenario.comment(&[0, 1, 2]).unwrap();
        assert_eq!(
            scenario.lines(),
            ["\t# {'type': 'delay', 'value': '1'}", "# already a note", ""]
        );
        assert!(scenario.event(0).unwrap().is_comment());

        scenario.uncomment(&[0, 1]).unwrap();
        assert_eq!(scenario.lines()[0], "\t{'type': 'delay', 'value': '1'}");
        assert_eq!(scenario.lines()[1], "# already a note");
    }

    #[test]
    fn join_merges_into_first_and_removes_rest() {
        let (_dir, mut scenario) = scenario(&[
            "\t{'type': 'mouse_click', 'patterns': ['a.png'], 'timeout': 3.0}",
            "# between",
            "{'type': 'mouse_move', 'patterns': ['b.png'], 'timeout': 9.0, 'x': '+4'}",
        ]);
        scenario.join(&[2, 0]).unwrap();
        assert_eq!(scenario.lines().len(), 2);
        let merged = scenario.event(0).unwrap();
        assert_eq!(merged.level, 1);
        assert_eq!(merged.kind, Some(EventType::MouseClick));
        assert_eq!(merged.patterns, Some(vec!["a.png".into(), "b.png".into()]));
        assert_eq!(merged.timeout, Some(3.0));
        assert_eq!(merged.x.as_deref(), Some("+4"));
        assert_eq!(scenario.lines()[1], "# between");
    }

    #[test]
    fn split_expands_each_pattern() {
        let (_dir, mut scenario) = scenario(&[
            "{'type': 'mouse_click', 'patterns': ['a.png', 'b.png']}",
            "{'type': 'delay', 'value': '1'}",
            "\t{'type': 'mouse_move', 'patterns': ['c.png', 'd.png', 'e.png']}",
        ]);
        scenario.split(&[0, 1, 2]).unwrap();
        assert_eq!(
            scenario.lines(),
            [
                "{'type': 'mouse_click', 'patterns': ['a.png']}",
                "{'type': 'mouse_click', 'patterns': ['b.png']}",
                "{'type': 'delay', 'value': '1'}",
                "\t{'type': 'mouse_move', 'patterns': ['c.png']}",
                "\t{'type': 'mouse_move', 'patterns': ['d.png']}",
                "\t{'type': 'mouse_move', 'patterns': ['e.png']}",
            ]
        );
    }
}
