//! Key names as they appear in keyboard events.
//!
//! Names follow X11 keysyms (`Return`, `Shift_L`, `F5`), and any single
//! printable character stands for itself. Keys are stored in keysym form so
//! the xdotool backend can pass them through untouched.

use std::fmt;

/// Named keys accepted in addition to single characters.
const NAMED: &[&str] = &[
    "Return", "Escape", "Tab", "ISO_Left_Tab", "BackSpace", "Delete", "Insert", "Home", "End",
    "Prior", "Next", "Page_Up", "Page_Down", "Left", "Right", "Up", "Down", "space", "Shift_L",
    "Shift_R", "Control_L", "Control_R", "Alt_L", "Alt_R", "Meta_L", "Meta_R", "Super_L",
    "Super_R", "Hyper_L", "Hyper_R", "ISO_Level3_Shift", "Mode_switch", "Caps_Lock", "Num_Lock",
    "Scroll_Lock", "Print", "Pause", "Break", "Menu", "Sys_Req", "KP_Enter", "KP_Add",
    "KP_Subtract", "KP_Multiply", "KP_Divide", "KP_Decimal", "KP_0", "KP_1", "KP_2", "KP_3",
    "KP_4", "KP_5", "KP_6", "KP_7", "KP_8", "KP_9", "XF86AudioMute", "XF86AudioLowerVolume",
    "XF86AudioRaiseVolume", "XF86AudioPlay",
];

/// Printable ASCII punctuation and its keysym name.
const PUNCTUATION: &[(char, &str)] = &[
    (' ', "space"),
    ('!', "exclam"),
    ('"', "quotedbl"),
    ('#', "numbersign"),
    ('$', "dollar"),
    ('%', "percent"),
    ('&', "ampersand"),
    ('\'', "apostrophe"),
    ('(', "parenleft"),
    (')', "parenright"),
    ('*', "asterisk"),
    ('+', "plus"),
    (',', "comma"),
    ('-', "minus"),
    ('.', "period"),
    ('/', "slash"),
    (':', "colon"),
    (';', "semicolon"),
    ('<', "less"),
    ('=', "equal"),
    ('>', "greater"),
    ('?', "question"),
    ('@', "at"),
    ('[', "bracketleft"),
    ('\\', "backslash"),
    (']', "bracketright"),
    ('^', "asciicircum"),
    ('_', "underscore"),
    ('`', "grave"),
    ('{', "braceleft"),
    ('|', "bar"),
    ('}', "braceright"),
    ('~', "asciitilde"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(String);

impl Key {
    /// Returns `None` for anything that isn't a known key.
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Self::from_char(c);
        }
        if NAMED.contains(&name) || PUNCTUATION.iter().any(|(_, n)| *n == name) {
            return Some(Self(name.to_string()));
        }
        function_key(name).then(|| Self(name.to_string()))
    }

    fn from_char(c: char) -> Option<Self> {
        if c.is_alphanumeric() {
            return Some(Self(c.to_string()));
        }
        PUNCTUATION
            .iter()
            .find(|(p, _)| *p == c)
            .map(|(_, name)| Self((*name).to_string()))
    }

    pub fn keysym(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `F1` through `F35`.
fn function_key(name: &str) -> bool {
    name.strip_prefix('F')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=35).contains(&n))
        && !name[1..].starts_with('0')
}

/// One action of a keyboard event's comma-separated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStroke {
    Press(Key),
    Release(Key),
    Tap(Key),
}

/// Parses `+Control_L,c,-Control_L` style sequences.
///
/// A lone `+` or `-` is the key itself. Empty items are skipped. The error
/// carries the first item that isn't a key.
pub fn parse_sequence(value: &str) -> Result<Vec<KeyStroke>, String> {
    let mut strokes = Vec::new();
    for item in value.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let prefixed = |sign: char| item.strip_prefix(sign).filter(|rest| !rest.is_empty());
        let (make, name): (fn(Key) -> KeyStroke, &str) = if let Some(rest) = prefixed('+') {
            (KeyStroke::Press, rest)
        } else if let Some(rest) = prefixed('-') {
            (KeyStroke::Release, rest)
        } else {
            (KeyStroke::Tap, item)
        };
        let key = Key::parse(name).ok_or_else(|| item.to_string())?;
        strokes.push(make(key));
    }
    Ok(strokes)
}
