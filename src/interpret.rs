//! Scenario execution: the program counter, failure scoping and dispatch.
//!
//! Every event runs to one of three ends: the next line, a jump elsewhere
//! ([`Step::Goto`]), or a [`Break`] carrying a level. A break at level 0 ends
//! the run. A break at a deeper level skips every following line at that
//! level or deeper, until a shallower line resets the skip. Indentation is
//! therefore a try-block: a failed step abandons the rest of its block.

pub mod progress;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use crate::cancel::{Cancel, Interrupted, seconds_to_duration};
use crate::device::{Button, Device, DeviceError, KeyStroke, parse_sequence};
use crate::event::{self, Event, EventType};
use crate::expr;
use crate::locate::{self, LocateError, Locator, Request};
use crate::scenario::Scenario;
use crate::substitute::{Environment, substitute_with_values};

use progress::{Code, Progress};

/// Pauses between device actions, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Before and after most actions, so the UI can react.
    pub settle: f64,
    /// Between moving onto a target and clicking it.
    pub before_click: f64,
    /// Between the single click and the double click of `mouse_double_click`.
    pub between_clicks: f64,
    /// Before the first screenshot of a pattern search.
    pub before_screenshot: f64,
    /// Between key strokes of `keyboard_*`.
    pub key_interval: f64,
    /// Per character of `keyboard_type`.
    pub type_interval: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: 0.2,
            before_click: 0.5,
            between_clicks: 1.0,
            before_screenshot: 2.0,
            key_interval: 0.08,
            type_interval: 0.15,
        }
    }
}

impl Timing {
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            settle: 0.0,
            before_click: 0.0,
            between_clicks: 0.0,
            before_screenshot: 0.0,
            key_interval: 0.0,
            type_interval: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// First line to run, 0-based and inclusive.
    pub from_line: Option<usize>,
    /// Last line to run, 0-based and inclusive.
    pub to_line: Option<usize>,
    /// Prepended verbatim to every shell command.
    pub shell_command_prefix: String,
    /// Pattern search defaults when an event doesn't set its own.
    pub pattern_timeout: f64,
    pub pattern_delay: f64,
    /// Method name to threshold, before per-event overrides.
    pub thresholds: BTreeMap<String, f64>,
    pub timing: Timing,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            from_line: None,
            to_line: None,
            shell_command_prefix: String::new(),
            pattern_timeout: 10.0,
            pattern_delay: 2.0,
            thresholds: locate::default_thresholds(),
            timing: Timing::default(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Ran off the end of the scenario.
    Completed,
    /// A top-level `jump` ended the run on purpose.
    Jumped { message: String },
    /// Ctrl+C.
    Interrupted,
    /// A top-level failure.
    Failed { index: usize, message: String },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed { .. } => 1,
            Self::Completed | Self::Jumped { .. } | Self::Interrupted => 0,
        }
    }
}

/// A failed step, and the level it abandons.
#[derive(Debug, Clone, PartialEq)]
struct Break {
    level: usize,
    message: String,
}

enum Halt {
    Break(Break),
    Interrupted,
    Io(io::Error),
}

impl Halt {
    fn at(level: usize, message: impl fmt::Display) -> Self {
        Self::Break(Break {
            level,
            message: message.to_string(),
        })
    }
}

impl From<Interrupted> for Halt {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<io::Error> for Halt {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

enum Step {
    Next,
    Goto(usize),
}

pub struct Interpreter<'a> {
    lines: &'a [String],
    base_dir: PathBuf,
    tmp_dir: PathBuf,
    env: Environment,
    device: &'a mut dyn Device,
    progress: Progress<&'a mut dyn Write>,
    cancel: Cancel,
    options: Options,
    /// Shell commands started with `wait: False`.
    background: Vec<Child>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        scenario: &'a Scenario,
        env: Environment,
        device: &'a mut dyn Device,
        progress: &'a mut dyn Write,
        cancel: Cancel,
        options: Options,
    ) -> Self {
        Self {
            lines: scenario.lines(),
            base_dir: scenario.dir(),
            tmp_dir: scenario.tmp_dir(),
            env,
            device,
            progress: Progress::new(progress),
            cancel,
            options,
            background: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Runs the scenario to an [`Outcome`]. Only failures to create the temp
    /// directory or to write progress are errors.
    pub fn run(&mut self) -> io::Result<Outcome> {
        fs::create_dir_all(&self.tmp_dir)?;
        let outcome = self.steps();
        self.reap_background();
        outcome
    }

    fn steps(&mut self) -> io::Result<Outcome> {
        let mut program_counter = 0;
        let mut skip_level: Option<usize> = None;
        let mut range = (self.options.from_line, self.options.to_line);
        let lines = self.lines;

        while program_counter < lines.len() {
            if self.cancel.is_set() {
                return Ok(Outcome::Interrupted);
            }
            let index = program_counter;
            program_counter += 1;

            if range.0.is_some_and(|from| index < from) || range.1.is_some_and(|to| index > to) {
                continue;
            }

            let line = &lines[index];
            let parsed = event::restore(line);
            if parsed.as_ref().is_ok_and(Event::is_comment) {
                self.progress.status(index, Code::Skipped)?;
                continue;
            }
            let level = parsed
                .as_ref()
                .map_or_else(|_| event::level_of(line), |e| e.level);

            if let Some(skip) = skip_level {
                if level >= skip {
                    self.progress.status(index, Code::Skipped)?;
                    continue;
                }
                skip_level = None;
            }

            self.progress.status(index, Code::Current)?;
            log::info!("Doing step #{}", index + 1);

            let kind = parsed.as_ref().ok().and_then(|e| e.kind);
            let result = match &parsed {
                Ok(event) => self.execute(index, event),
                Err(e) => Err(Halt::at(level, e)),
            };

            match result {
                Ok(Step::Next) => self.progress.status(index, Code::Completed)?,
                Ok(Step::Goto(target)) => {
                    self.progress.status(index, Code::Completed)?;
                    program_counter = target;
                    range = (None, None);
                }
                Err(Halt::Interrupted) => return Ok(Outcome::Interrupted),
                Err(Halt::Io(e)) => return Err(e),
                Err(Halt::Break(_)) if self.cancel.is_set() => {
                    // The step failed because Ctrl+C reached it too.
                    return Ok(Outcome::Interrupted);
                }
                Err(Halt::Break(brk)) => {
                    let expected = match kind {
                        Some(EventType::Jump) => true,
                        Some(EventType::Condition) => brk.level > 0,
                        _ => false,
                    };
                    let code = if expected { Code::Completed } else { Code::Failed };
                    self.progress.status(index, code)?;

                    if brk.level > 0 {
                        log::debug!("Skipping level {} after step #{}", brk.level, index + 1);
                        skip_level = Some(brk.level);
                    } else if kind == Some(EventType::Jump) {
                        return Ok(Outcome::Jumped {
                            message: brk.message,
                        });
                    } else {
                        return Ok(Outcome::Failed {
                            index,
                            message: brk.message,
                        });
                    }
                }
            }
        }
        Ok(Outcome::Completed)
    }

    fn execute(&mut self, index: usize, event: &Event) -> Result<Step, Halt> {
        let Some(kind) = event.kind else {
            return Ok(Step::Next);
        };
        log::debug!("Making event {}", kind.as_str());
        let level = event.level;
        let timing = self.options.timing;

        match kind {
            EventType::Label => {}
            EventType::Goto => {
                let value = self.substitute(event, event.value.as_deref().unwrap_or(""))?;
                let target = self.goto_target(index, &value).map_err(|e| Halt::at(level, e))?;
                return Ok(Step::Goto(target));
            }
            EventType::Delay => {
                let value = self.substitute(event, event.value.as_deref().unwrap_or("0"))?;
                let duration = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|seconds| Duration::try_from_secs_f64(seconds.max(0.0)).ok())
                    .ok_or_else(|| Halt::at(level, format!("invalid delay {value:?}")))?;
                self.cancel.sleep(duration)?;
            }
            EventType::Jump | EventType::Break => {
                self.cancel.sleep_secs(timing.settle)?;
                return Err(Halt::Break(jump_break(kind, event)?));
            }
            EventType::Equation => self.equation(event)?,
            EventType::Condition => self.condition(event)?,
            EventType::ShellCommand => self.shell_command(event)?,
            EventType::KeyboardTap | EventType::KeyboardPress | EventType::KeyboardRelease => {
                self.cancel.sleep_secs(timing.settle)?;
                self.keys(event)?;
            }
            EventType::KeyboardType => {
                self.cancel.sleep_secs(timing.settle)?;
                let text = self.substitute(event, event.value.as_deref().unwrap_or(""))?;
                let interval = seconds_to_duration(timing.type_interval);
                self.device
                    .type_text(&text, interval)
                    .map_err(|e| Halt::at(level, e))?;
            }
            EventType::MouseMove
            | EventType::MousePress
            | EventType::MouseRelease
            | EventType::MouseClick
            | EventType::MouseDoubleClick
            | EventType::MouseRightClick
            | EventType::MouseScroll => self.mouse(kind, event)?,
        }
        Ok(Step::Next)
    }

    fn substitute(&self, event: &Event, text: &str) -> Result<String, Halt> {
        substitute_with_values(text, &self.env, None).map_err(|e| Halt::at(event.level, e))
    }

    // ── Control flow ──

    /// Index of the next line to run after a goto from `index`.
    fn goto_target(&self, index: usize, value: &str) -> Result<usize, String> {
        let value = value.trim();
        let len = self.lines.len();
        let in_range = |target: usize| {
            if target <= len {
                Ok(target)
            } else {
                Err(format!("goto {value:?}: line {} is out of range", target + 1))
            }
        };

        let (direction, name) = match value.chars().next() {
            Some(sign @ ('+' | '-')) => (Some(sign), &value[1..]),
            _ => (None, value),
        };

        if let Ok(n) = name.parse::<usize>() {
            return match direction {
                Some(_) if n == 0 => Err(format!("goto {value:?} would repeat itself forever")),
                Some('+') => in_range(index + n),
                Some(_) => index
                    .checked_sub(n)
                    .ok_or_else(|| format!("goto {value:?}: before the first line")),
                None if n == 0 => Err("goto 0: lines are numbered from 1".to_string()),
                None => in_range(n - 1),
            };
        }

        let mut candidates: Box<dyn Iterator<Item = usize>> = match direction {
            Some('+') => Box::new(index + 1..len),
            Some(_) => Box::new((0..index).rev()),
            None => Box::new(0..len),
        };
        candidates
            .find(|&i| self.is_label(i, name))
            .map(|i| i + 1)
            .ok_or_else(|| format!("label {} not found", event::py_repr(name)))
    }

    fn is_label(&self, index: usize, name: &str) -> bool {
        event::restore(&self.lines[index]).is_ok_and(|e| {
            e.kind == Some(EventType::Label) && e.value.as_deref().map(str::trim) == Some(name)
        })
    }

    fn equation(&mut self, event: &Event) -> Result<(), Halt> {
        let level = event.level;
        let text = event.value.as_deref().unwrap_or("");
        let (key, expression) = expr::split_equation(text).map_err(|e| Halt::at(level, e))?;
        let expression = substitute_with_values(expression, &self.env, Some("None"))
            .map_err(|e| Halt::at(level, e))?;
        let value = expr::evaluate(&expression)
            .map_err(|e| Halt::at(level, format!("{key} = {expression}: {e}")))?
            .to_string();

        log::debug!("{key} = {value}");
        self.progress.env(key, &value)?;
        self.env.set(key, value);
        Ok(())
    }

    fn condition(&mut self, event: &Event) -> Result<(), Halt> {
        let level = event.level;
        let expression =
            substitute_with_values(event.value.as_deref().unwrap_or(""), &self.env, Some("None"))
                .map_err(|e| Halt::at(level, e))?;
        let result = expr::evaluate(&expression)
            .map_err(|e| Halt::at(level, format!("{expression}: {e}")))?;
        if result.truthy() {
            return Ok(());
        }
        let message = event
            .message
            .clone()
            .unwrap_or_else(|| format!("Condition \"{expression}\" is false"));
        Err(Halt::at(level, message))
    }

    // ── Shell ──

    fn shell_command(&mut self, event: &Event) -> Result<(), Halt> {
        let level = event.level;
        let command = format!(
            "{}{}",
            self.options.shell_command_prefix,
            self.substitute(event, event.value.as_deref().unwrap_or(""))?
        );
        log::debug!("Command: {command}");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env_clear()
            .envs(self.env.iter())
            .env("UPLOAD_PATH", &self.tmp_dir)
            .spawn()
            .map_err(|e| Halt::at(level, format!("failed to run sh: {e}")))?;

        if !event.wait.unwrap_or(true) {
            self.background.push(child);
            return Ok(());
        }

        let status = child
            .wait()
            .map_err(|e| Halt::at(level, format!("failed to wait for command: {e}")))?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(Halt::at(
                level,
                format!("Command was terminated with exit code {code}."),
            )),
            None => Err(Halt::at(level, "Command was terminated by a signal.")),
        }
    }

    /// Collects background commands that already finished; the rest are
    /// left running.
    fn reap_background(&mut self) {
        for mut child in self.background.drain(..) {
            match child.try_wait() {
                Ok(Some(status)) => log::debug!("Background command {} exited: {status}", child.id()),
                Ok(None) => log::info!("Background command {} is still running", child.id()),
                Err(e) => log::warn!("Failed to check background command {}: {e}", child.id()),
            }
        }
    }

    // ── Devices ──

    fn keys(&mut self, event: &Event) -> Result<(), Halt> {
        let level = event.level;
        let interval = self.options.timing.key_interval;
        let strokes = parse_sequence(event.value.as_deref().unwrap_or(""))
            .map_err(|item| Halt::at(level, format!("Wrong key {item}")))?;

        let device_error = |e: DeviceError| Halt::at(level, e);
        for stroke in strokes {
            match &stroke {
                KeyStroke::Press(key) => self.device.press(key).map_err(device_error)?,
                KeyStroke::Release(key) => self.device.release(key).map_err(device_error)?,
                KeyStroke::Tap(key) => {
                    self.device.press(key).map_err(device_error)?;
                    self.cancel.sleep_secs(interval)?;
                    self.device.release(key).map_err(device_error)?;
                }
            }
            self.cancel.sleep_secs(interval)?;
        }
        Ok(())
    }

    fn mouse(&mut self, kind: EventType, event: &Event) -> Result<(), Halt> {
        let level = event.level;
        let timing = self.options.timing;
        let device_error = |e: DeviceError| Halt::at(level, e);

        let (mut x, mut y) = self.device.position().map_err(device_error)?;
        if let Some(patterns) = &event.patterns {
            (x, y) = self.locate(event, patterns)?;
        }
        let x = offset(x, event.x.as_deref()).map_err(|e| Halt::at(level, e))?;
        let y = offset(y, event.y.as_deref()).map_err(|e| Halt::at(level, e))?;

        let pause = |seconds: f64| self.cancel.sleep_secs(seconds);
        match kind {
            EventType::MouseMove => {
                pause(timing.settle)?;
                self.device.slide(x, y).map_err(device_error)?;
            }
            EventType::MousePress => {
                pause(timing.settle)?;
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.settle)?;
                self.device
                    .press_button(x, y, Button::Left)
                    .map_err(device_error)?;
            }
            EventType::MouseRelease => {
                pause(timing.settle)?;
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.settle)?;
                self.device
                    .release_button(x, y, Button::Left)
                    .map_err(device_error)?;
            }
            EventType::MouseClick => {
                pause(timing.settle)?;
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.before_click)?;
                self.device
                    .click(x, y, Button::Left, 1)
                    .map_err(device_error)?;
            }
            EventType::MouseDoubleClick => {
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.settle)?;
                self.device
                    .click(x, y, Button::Left, 1)
                    .map_err(device_error)?;
                pause(timing.between_clicks)?;
                self.device
                    .click(x, y, Button::Left, 2)
                    .map_err(device_error)?;
            }
            EventType::MouseRightClick => {
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.settle)?;
                self.device
                    .click(x, y, Button::Right, 1)
                    .map_err(device_error)?;
            }
            EventType::MouseScroll => {
                let value = self.substitute(event, event.value.as_deref().unwrap_or("1"))?;
                let clicks: i32 = value
                    .trim()
                    .parse()
                    .map_err(|_| Halt::at(level, format!("invalid scroll amount {value:?}")))?;
                self.device.slide(x, y).map_err(device_error)?;
                pause(timing.settle)?;
                self.device.scroll(x, y, clicks).map_err(device_error)?;
            }
            _ => return Ok(()),
        }
        // Lets the UI react before the next step.
        pause(timing.settle)?;
        Ok(())
    }

    fn locate(&mut self, event: &Event, patterns: &[String]) -> Result<(i32, i32), Halt> {
        let level = event.level;
        log::debug!(
            "Waiting {}s before looking for patterns",
            self.options.timing.before_screenshot
        );
        self.cancel.sleep_secs(self.options.timing.before_screenshot)?;

        let paths = patterns
            .iter()
            .map(|p| self.substitute(event, p).map(|p| self.base_dir.join(p)))
            .collect::<Result<Vec<_>, _>>()?;
        let thresholds = locate::resolve_thresholds(&self.options.thresholds, &event.thresholds)
            .map_err(|e| Halt::at(level, e))?;
        let request = Request {
            paths: &paths,
            timeout: event.timeout.unwrap_or(self.options.pattern_timeout),
            delay: event.delay.unwrap_or(self.options.pattern_delay),
            thresholds: &thresholds,
        };

        Locator::new(&mut *self.device, &self.tmp_dir, &self.cancel)
            .locate(&request)
            .map_err(|e| match e {
                LocateError::Interrupted => Halt::Interrupted,
                other => Halt::at(level, other),
            })
    }
}

/// Builds the break a `jump` or `break` event raises.
///
/// An unsigned value is the absolute level to abandon; a signed one is
/// relative to the block the event opens (`-1` leaves the current block).
/// A missing value means `-1`.
fn jump_break(kind: EventType, event: &Event) -> Result<Break, Halt> {
    let value = event.value.as_deref().unwrap_or("-1").trim();
    let invalid = || Halt::at(event.level, format!("invalid {} level {value:?}", kind.as_str()));
    let level = if value.starts_with(['+', '-']) {
        let delta: i64 = value.parse().map_err(|_| invalid())?;
        usize::try_from((event.level as i64 + 1 + delta).max(0)).map_err(|_| invalid())?
    } else {
        value.parse().map_err(|_| invalid())?
    };

    let verb = match kind {
        EventType::Jump => "Jumping",
        _ => "Breaking",
    };
    let message = match &event.message {
        Some(m) => format!("{verb} to {level} with message \"{m}\"."),
        None => format!("{verb} to {level} with no message."),
    };
    Ok(Break { level, message })
}

/// `+N`/`-N` shift `base`; an unsigned number replaces it.
fn offset(base: i32, spec: Option<&str>) -> Result<i32, String> {
    let Some(spec) = spec.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(base);
    };
    let n: i32 = spec
        .parse()
        .map_err(|_| format!("invalid coordinate {spec:?}"))?;
    if spec.starts_with(['+', '-']) {
        base.checked_add(n)
            .ok_or_else(|| format!("coordinate {base} {spec} overflows"))
    } else {
        Ok(n)
    }
}
