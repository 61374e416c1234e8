//! Variable substitution: `{NAME}` placeholders against an environment.
//!
//! The environment starts as a copy of the process environment and is
//! mutated by `equation` events. Child shell commands receive exactly this
//! map, so a value computed by one step is visible to every later command.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// `{{` and `}}` are literal braces; `{NAME}` is a placeholder.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstituteError {
    #[error("variable {{{0}}} is not defined")]
    Undefined(String),
}

/// String-keyed variables shared by substitution, equations and shell commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Replaces every `{NAME}` with its value.
///
/// A missing name falls back to `default` when given; otherwise it's an error.
pub fn substitute_with_values(
    text: &str,
    env: &Environment,
    default: Option<&str>,
) -> Result<String, SubstituteError> {
    substitute(text, env, default, |_, value| value.to_string())
}

/// Like [`substitute_with_values`] but renders `NAME[value]`.
///
/// For display only; never feed the result to execution.
pub fn substitute_with_keys_values(
    text: &str,
    env: &Environment,
    default: Option<&str>,
) -> Result<String, SubstituteError> {
    substitute(text, env, default, |name, value| format!("{name}[{value}]"))
}

fn substitute(
    text: &str,
    env: &Environment,
    default: Option<&str>,
    render: impl Fn(&str, &str) -> String,
) -> Result<String, SubstituteError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();
        out.push_str(&replacement(&caps, env, default, &render)?);
    }

    out.push_str(&text[last..]);
    Ok(out)
}

fn replacement(
    caps: &Captures<'_>,
    env: &Environment,
    default: Option<&str>,
    render: &impl Fn(&str, &str) -> String,
) -> Result<String, SubstituteError> {
    let Some(name) = caps.get(1) else {
        // An escaped brace pair collapses to a single brace.
        return Ok(caps[0][..1].to_string());
    };
    let name = name.as_str();
    match env.get(name).or(default) {
        Some(value) => Ok(render(name, value)),
        None => Err(SubstituteError::Undefined(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        [("USER", "ada"), ("COUNT", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_known_names() {
        let out = substitute_with_values("hi {USER}, {COUNT} left", &env(), None).unwrap();
        assert_eq!(out, "hi ada, 3 left");
    }

    #[test]
    fn undefined_name_is_an_error_without_default() {
        let err = substitute_with_values("{MISSING}", &env(), None).unwrap_err();
        assert_eq!(err, SubstituteError::Undefined("MISSING".into()));
    }

    #[test]
    fn default_fills_undefined_names() {
        let out = substitute_with_values("{X} or 0", &env(), Some("None")).unwrap();
        assert_eq!(out, "None or 0");
    }

    #[test]
    fn keys_values_rendering_shows_both() {
        let out = substitute_with_keys_values("{USER}/{X}", &env(), Some("")).unwrap();
        assert_eq!(out, "USER[ada]/X[]");
    }

    #[test]
    fn doubled_braces_and_non_identifiers_are_left_alone() {
        let out = substitute_with_values("{{USER}} awk '{print $1}'", &env(), None).unwrap();
        assert_eq!(out, "{USER} awk '{print $1}'");
    }

    #[test]
    fn environment_set_overrides() {
        let mut env = env();
        env.set("USER", "grace");
        assert_eq!(env.get("USER"), Some("grace"));
        assert_eq!(env.iter().count(), 2);
    }
}
