//! Output formatting for CLI display.

use crate::event::Event;
use crate::substitute::{Environment, substitute_with_keys_values};

/// One event as a single display line, indented by level.
///
/// Variables in the value are shown as `NAME[value]`; unknown ones are left
/// as written.
pub(super) fn format_event(event: &Event, env: &Environment) -> String {
    let indent = "  ".repeat(event.level);
    let Some(kind) = event.kind else {
        return match event.comments.as_deref() {
            Some(text) if !text.is_empty() => format!("{indent}{text}"),
            _ => String::new(),
        };
    };

    let mut parts = vec![kind.as_str().to_string()];
    if let Some(value) = &event.value {
        let shown = substitute_with_keys_values(value, env, None).unwrap_or_else(|_| value.clone());
        parts.push(format!("{shown:?}"));
    }
    if let Some(patterns) = &event.patterns {
        parts.push(format!("[{}]", patterns.join(", ")));
    }
    if kind.is_mouse() && (event.x.is_some() || event.y.is_some()) {
        let x = event.x.as_deref().unwrap_or("+0");
        let y = event.y.as_deref().unwrap_or("+0");
        parts.push(format!("at ({x}, {y})"));
    }
    if let Some(message) = &event.message {
        parts.push(format!("-> {message:?}"));
    }
    if event.wait == Some(false) {
        parts.push("(background)".to_string());
    }
    if let Some(comments) = event.comments.as_deref().filter(|c| !c.is_empty()) {
        parts.push(comments.to_string());
    }
    format!("{indent}{}", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn env() -> Environment {
        [("USER".to_string(), "ada".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn format_comment_lines() {
        let event = Event::comment("# setup").at_level(1);
        assert_eq!(format_event(&event, &env()), "  # setup");
        assert_eq!(format_event(&Event::comment(""), &env()), "");
    }

    #[test]
    fn format_value_with_variables() {
        let event = Event::new(EventType::KeyboardType).with_value("hi {USER}");
        assert_eq!(
            format_event(&event, &env()),
            "keyboard_type \"hi USER[ada]\""
        );

        let event = Event::new(EventType::KeyboardType).with_value("hi {NOBODY}");
        assert_eq!(
            format_event(&event, &env()),
            "keyboard_type \"hi {NOBODY}\""
        );
    }

    #[test]
    fn format_mouse_event() {
        let mut event = Event::new(EventType::MouseClick).at_level(2);
        event.patterns = Some(vec!["ok.png".into(), "ok-hover.png".into()]);
        event.x = Some("+10".into());
        assert_eq!(
            format_event(&event, &env()),
            "    mouse_click [ok.png, ok-hover.png] at (+10, +0)"
        );
    }

    #[test]
    fn format_background_shell_command() {
        let mut event = Event::new(EventType::ShellCommand).with_value("make");
        event.wait = Some(false);
        event.comments = Some("# build".into());
        assert_eq!(
            format_event(&event, &env()),
            "shell_command \"make\" (background) # build"
        );
    }
}
