//! Scenario events: one line of a scenario file.
//!
//! A line is either a pure comment or a mapping literal describing an
//! action or a control-flow directive:
//!
//! ```text
//! {'type': 'mouse_click', 'patterns': ['ok-button.png'], 'timeout': 5.0}
//! 	{'type': 'jump', 'value': '-1', 'message': 'no dialog'}  # optional
//! ```
//!
//! Leading tabs encode the event's level. The level is recomputed on every
//! parse and never stored as a key.

mod literal;

use std::collections::BTreeMap;

use serde::Serialize;

pub use literal::{Literal, float_repr, py_repr, unescape};

/// Every kind of event a scenario line can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Label,
    Goto,
    Delay,
    Jump,
    Break,
    Equation,
    Condition,
    ShellCommand,
    KeyboardTap,
    KeyboardPress,
    KeyboardRelease,
    KeyboardType,
    MouseMove,
    MousePress,
    MouseRelease,
    MouseClick,
    MouseDoubleClick,
    MouseRightClick,
    MouseScroll,
}

impl EventType {
    pub const ALL: [Self; 19] = [
        Self::Label,
        Self::Goto,
        Self::Delay,
        Self::Jump,
        Self::Break,
        Self::Equation,
        Self::Condition,
        Self::ShellCommand,
        Self::KeyboardTap,
        Self::KeyboardPress,
        Self::KeyboardRelease,
        Self::KeyboardType,
        Self::MouseMove,
        Self::MousePress,
        Self::MouseRelease,
        Self::MouseClick,
        Self::MouseDoubleClick,
        Self::MouseRightClick,
        Self::MouseScroll,
    ];

    /// The name used in scenario files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Goto => "goto",
            Self::Delay => "delay",
            Self::Jump => "jump",
            Self::Break => "break",
            Self::Equation => "equation",
            Self::Condition => "condition",
            Self::ShellCommand => "shell_command",
            Self::KeyboardTap => "keyboard_tap",
            Self::KeyboardPress => "keyboard_press",
            Self::KeyboardRelease => "keyboard_release",
            Self::KeyboardType => "keyboard_type",
            Self::MouseMove => "mouse_move",
            Self::MousePress => "mouse_press",
            Self::MouseRelease => "mouse_release",
            Self::MouseClick => "mouse_click",
            Self::MouseDoubleClick => "mouse_double_click",
            Self::MouseRightClick => "mouse_right_click",
            Self::MouseScroll => "mouse_scroll",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn is_mouse(self) -> bool {
        self.as_str().starts_with("mouse_")
    }
}

/// One line of a scenario.
///
/// Pure comment lines have no `kind` and carry their text in `comments`.
/// Structured lines have a `kind` and may also carry a trailing comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Event {
    pub level: usize,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Template images to locate before a mouse action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,

    /// Per-method overrides, keyed by upper-case method name
    /// (`TM_CCOEFF_NORMED`). Written as `tm_ccoeff_normed_threshold`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, f64>,

    /// Signed offset (`+10`) or absolute coordinate (`300`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    /// Keys this version doesn't interpret, preserved for the round trip.
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "literal::serialize_entries"
    )]
    pub extra: Vec<(String, Literal)>,
}

/// A scenario line that could not be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed line {line:?}: {reason}")]
pub struct ParseError {
    pub line: String,
    pub reason: String,
}

impl ParseError {
    fn new(line: &str, reason: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

const THRESHOLD_SUFFIX: &str = "_threshold";

impl Event {
    /// A structured event of the given type at level 0.
    pub fn new(kind: EventType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// A pure comment line.
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            comments: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn at_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// True for lines without a structured payload. These are inert.
    pub fn is_comment(&self) -> bool {
        self.kind.is_none()
    }

    /// Merges `other` into `self`: lists are concatenated, every other field
    /// keeps the first value seen.
    pub fn absorb(&mut self, other: Self) {
        if let Some(patterns) = other.patterns {
            self.patterns.get_or_insert_with(Vec::new).extend(patterns);
        }
        self.kind = self.kind.or(other.kind);
        self.value = self.value.take().or(other.value);
        self.timeout = self.timeout.or(other.timeout);
        self.delay = self.delay.or(other.delay);
        self.x = self.x.take().or(other.x);
        self.y = self.y.take().or(other.y);
        self.wait = self.wait.or(other.wait);
        self.message = self.message.take().or(other.message);
        self.comments = self.comments.take().or(other.comments);
        for (method, threshold) in other.thresholds {
            self.thresholds.entry(method).or_insert(threshold);
        }
        for (key, value) in other.extra {
            match self.extra.iter_mut().find(|(k, _)| *k == key) {
                Some((_, Literal::List(items))) => {
                    if let Literal::List(more) = value {
                        items.extend(more);
                    }
                }
                Some(_) => {}
                None => self.extra.push((key, value)),
            }
        }
    }

    fn from_entries(level: usize, entries: Vec<(String, Literal)>) -> Result<Self, String> {
        let mut event = Self {
            level,
            ..Self::default()
        };

        for (key, value) in entries {
            match key.as_str() {
                "type" => {
                    let name = text(&key, value)?;
                    let kind = EventType::from_name(&name)
                        .ok_or_else(|| format!("unknown event type {}", py_repr(&name)))?;
                    event.kind = Some(kind);
                }
                "value" => event.value = optional_text(&key, value)?,
                "message" => event.message = optional_text(&key, value)?,
                "x" => event.x = optional_text(&key, value)?,
                "y" => event.y = optional_text(&key, value)?,
                "patterns" => event.patterns = Some(text_list(&key, value)?),
                "timeout" => event.timeout = Some(number(&key, value)?),
                "delay" => event.delay = Some(number(&key, value)?),
                "wait" => event.wait = Some(boolean(&key, value)?),
                k if k.ends_with(THRESHOLD_SUFFIX) && k.len() > THRESHOLD_SUFFIX.len() => {
                    let method = k[..k.len() - THRESHOLD_SUFFIX.len()].to_uppercase();
                    event.thresholds.insert(method, number(&key, value)?);
                }
                _ => event.extra.push((key, value)),
            }
        }

        if event.kind.is_none() {
            return Err("missing `type`".to_string());
        }
        Ok(event)
    }

    fn to_entries(&self) -> Vec<(String, Literal)> {
        let mut entries = Vec::new();
        let mut push = |key: &str, value: Literal| entries.push((key.to_string(), value));
        let string = |s: &String| Literal::Str(s.clone());

        if let Some(kind) = self.kind {
            push("type", Literal::Str(kind.as_str().to_string()));
        }
        if let Some(value) = &self.value {
            push("value", string(value));
        }
        if let Some(patterns) = &self.patterns {
            push("patterns", Literal::List(patterns.iter().map(string).collect()));
        }
        if let Some(timeout) = self.timeout {
            push("timeout", Literal::Float(timeout));
        }
        if let Some(delay) = self.delay {
            push("delay", Literal::Float(delay));
        }
        for (method, threshold) in &self.thresholds {
            let key = format!("{}{THRESHOLD_SUFFIX}", method.to_lowercase());
            push(&key, Literal::Float(*threshold));
        }
        if let Some(x) = &self.x {
            push("x", string(x));
        }
        if let Some(y) = &self.y {
            push("y", string(y));
        }
        if let Some(wait) = self.wait {
            push("wait", Literal::Bool(wait));
        }
        if let Some(message) = &self.message {
            push("message", string(message));
        }
        for (key, value) in &self.extra {
            push(key, value.clone());
        }
        entries
    }
}

/// Parses one scenario line.
///
/// The level is the number of leading whitespace characters. A stripped
/// line starting with `{` must be a mapping literal with a known `type`;
/// any text after the closing brace becomes the trailing comment. Every
/// other line is a pure comment.
pub fn restore(line: &str) -> Result<Event, ParseError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let body = line.trim_start();
    let level = line.chars().count() - body.chars().count();
    let body = body.trim_end();

    if !body.starts_with('{') {
        return Ok(Event::comment(body).at_level(level));
    }

    let (literal, consumed) =
        literal::parse_prefix(body).map_err(|e| ParseError::new(line, e.to_string()))?;
    let Literal::Map(entries) = literal else {
        return Err(ParseError::new(line, "expected a mapping"));
    };

    let mut event = Event::from_entries(level, entries).map_err(|e| ParseError::new(line, e))?;
    let trailing = body[consumed..].trim();
    if !trailing.is_empty() {
        event.comments = Some(trailing.to_string());
    }
    Ok(event)
}

/// Serializes an event back into a scenario line, without a newline.
pub fn dump(event: &Event) -> String {
    let mut line = "\t".repeat(event.level);
    match event.kind {
        None => {
            if let Some(comments) = &event.comments {
                line.push_str(comments);
            }
        }
        Some(_) => {
            line.push_str(&Literal::Map(event.to_entries()).to_string());
            if let Some(comments) = event.comments.as_deref().filter(|c| !c.is_empty()) {
                line.push_str("  ");
                line.push_str(comments);
            }
        }
    }
    line
}

/// Number of leading whitespace characters, without parsing the rest.
pub fn level_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

// ── Field coercion ──

fn text(key: &str, value: Literal) -> Result<String, String> {
    optional_text(key, value)?.ok_or_else(|| format!("`{key}` must not be None"))
}

/// Scalars become their textual form; numbers are kept as written.
fn optional_text(key: &str, value: Literal) -> Result<Option<String>, String> {
    match value {
        Literal::None => Ok(None),
        Literal::Str(s) => Ok(Some(s)),
        Literal::Int(n) => Ok(Some(n.to_string())),
        Literal::Float(v) => Ok(Some(float_repr(v))),
        Literal::Bool(b) => Ok(Some(if b { "True" } else { "False" }.to_string())),
        other => Err(format!("`{key}` must be a scalar, got {other}")),
    }
}

fn text_list(key: &str, value: Literal) -> Result<Vec<String>, String> {
    match value {
        Literal::List(items) => items.into_iter().map(|item| text(key, item)).collect(),
        Literal::Str(s) => Ok(vec![s]),
        other => Err(format!("`{key}` must be a list of filenames, got {other}")),
    }
}

/// Finite numbers only; `inf` and `nan` have no literal form to dump back.
fn number(key: &str, value: Literal) -> Result<f64, String> {
    let parsed = match value {
        Literal::Int(n) => Some(n as f64),
        Literal::Float(v) => Some(v),
        Literal::Str(ref s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("`{key}` must be a finite number, got {value}"))
}

fn boolean(key: &str, value: Literal) -> Result<bool, String> {
    match value {
        Literal::Bool(b) => Ok(b),
        Literal::Int(n) => Ok(n != 0),
        other => Err(format!("`{key}` must be True or False, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(event: &Event) {
        let line = dump(event);
        assert_eq!(&restore(&line).unwrap(), event, "line: {line}");
    }

    #[test]
    fn restores_structured_line_with_level() {
        let event = restore("\t\t{'type': 'delay', 'value': 2}").unwrap();
        assert_eq!(event.level, 2);
        assert_eq!(event.kind, Some(EventType::Delay));
        assert_eq!(event.value.as_deref(), Some("2"));
        assert!(event.comments.is_none());
    }

    #[test]
    fn non_mapping_lines_are_comments() {
        let event = restore("\t# just a note").unwrap();
        assert!(event.is_comment());
        assert_eq!(event.level, 1);
        assert_eq!(event.comments.as_deref(), Some("# just a note"));

        let blank = restore("").unwrap();
        assert!(blank.is_comment());
        assert_eq!(blank.comments.as_deref(), Some(""));
    }

    #[test]
    fn trailing_text_becomes_comment() {
        let event = restore("{'type': 'label', 'value': 'top'}  # entry point").unwrap();
        assert_eq!(event.kind, Some(EventType::Label));
        assert_eq!(event.comments.as_deref(), Some("# entry point"));
    }

    #[test]
    fn thresholds_and_numeric_strings_are_coerced() {
        let event = restore(
            "{'type': 'mouse_click', 'patterns': 'ok.png', 'timeout': '3', \
             'tm_ccoeff_normed_threshold': 0.9, 'x': 10, 'y': '-5', 'wait': 0}",
        )
        .unwrap();
        assert_eq!(event.patterns, Some(vec!["ok.png".to_string()]));
        assert_eq!(event.timeout, Some(3.0));
        assert_eq!(event.thresholds.get("TM_CCOEFF_NORMED"), Some(&0.9));
        assert_eq!(event.x.as_deref(), Some("10"));
        assert_eq!(event.y.as_deref(), Some("-5"));
        assert_eq!(event.wait, Some(false));
    }

    #[test]
    fn malformed_lines_are_parse_errors() {
        let err = restore("{'type': 'delay'").unwrap_err();
        assert_eq!(err.line, "{'type': 'delay'");

        assert!(restore("{'value': '1'}").unwrap_err().reason.contains("missing"));
        assert!(restore("{'type': 'teleport'}").unwrap_err().reason.contains("unknown"));
        assert!(restore("{'type': 'delay', 'timeout': [1]}").is_err());
        assert!(restore("{'type': exec('rm')}").is_err());
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        for text in ["'inf'", "'-inf'", "'nan'"] {
            let line = format!("{{'type': 'mouse_click', 'timeout': {text}}}");
            let err = restore(&line).unwrap_err();
            assert!(err.reason.contains("finite"), "{line}: {}", err.reason);
        }
        let line = "{'type': 'mouse_click', 'tm_sqdiff_normed_threshold': 'nan'}";
        assert!(restore(line).is_err());
        assert_eq!(
            restore("{'type': 'mouse_click', 'delay': ' 1.5 '}").unwrap().delay,
            Some(1.5)
        );
    }

    #[test]
    fn dump_orders_keys_and_indents_with_tabs() {
        let mut event = Event::new(EventType::MouseClick).at_level(2);
        event.patterns = Some(vec!["a.png".into(), "b.png".into()]);
        event.timeout = Some(5.0);
        event.x = Some("+10".into());
        event.comments = Some("# click it".into());
        assert_eq!(
            dump(&event),
            "\t\t{'type': 'mouse_click', 'patterns': ['a.png', 'b.png'], 'timeout': 5.0, 'x': '+10'}  # click it"
        );
    }

    #[test]
    fn round_trips_well_formed_events() {
        round_trip(&Event::comment("# heading").at_level(1));
        round_trip(&Event::comment(""));
        round_trip(&Event::new(EventType::ShellCommand).with_value("echo 'it''s' \"ok\"\\n"));

        let mut event = Event::new(EventType::MouseDoubleClick).at_level(3);
        event.patterns = Some(vec!["{DIR}/x.png".into()]);
        event.timeout = Some(0.25);
        event.delay = Some(1.0);
        event.thresholds.insert("TM_CCORR_NORMED".into(), 0.995);
        event.x = Some("-4".into());
        event.y = Some("120".into());
        event.message = Some("no button".into());
        event.comments = Some("# trailing".into());
        event.extra.push(("retries".into(), Literal::Int(3)));
        round_trip(&event);

        let mut shell = Event::new(EventType::ShellCommand).with_value("sleep 5");
        shell.wait = Some(false);
        round_trip(&shell);
    }

    #[test]
    fn absorb_concatenates_patterns_and_keeps_first_values() {
        let mut first = Event::new(EventType::MouseClick);
        first.patterns = Some(vec!["a.png".into()]);
        first.timeout = Some(1.0);
        let mut second = Event::new(EventType::MouseMove);
        second.patterns = Some(vec!["b.png".into()]);
        second.timeout = Some(9.0);
        second.message = Some("from second".into());

        first.absorb(second);
        assert_eq!(first.kind, Some(EventType::MouseClick));
        assert_eq!(first.patterns, Some(vec!["a.png".into(), "b.png".into()]));
        assert_eq!(first.timeout, Some(1.0));
        assert_eq!(first.message.as_deref(), Some("from second"));
    }

    #[test]
    fn event_type_names_round_trip() {
        for kind in EventType::ALL {
            assert_eq!(EventType::from_name(kind.as_str()), Some(kind));
        }
        assert!(EventType::MouseScroll.is_mouse());
        assert!(!EventType::KeyboardTap.is_mouse());
    }
}
