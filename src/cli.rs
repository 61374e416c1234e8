//! CLI interface for Retrace.
//!
//! - `retrace run` replays a scenario against the X display.
//! - `retrace show` lists a scenario's events.
//! - `retrace edit` rewrites a scenario in place.
//!
//! Line numbers on the command line are 1-based, as an editor shows them.

mod format;

use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::cancel::Cancel;
use crate::config::Config;
use crate::device::XdotoolDevice;
use crate::event;
use crate::interpret::{Interpreter, Options, Outcome};
use crate::scenario::Scenario;
use crate::screencast::Screencast;
use crate::substitute::Environment;

use format::format_event;

/// Retrace: replay recorded GUI scenarios.
#[derive(Debug, Parser)]
#[command(name = "retrace", after_long_help = SCENARIO_HELP)]
pub struct Cli {
    /// Log more: `-v` for progress, `-vv` for every step's details.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

const SCENARIO_HELP: &str = r#"Scenario lines
  {'type': 'mouse_click', 'patterns': ['ok.png'], 'x': '+10'}
  {'type': 'equation', 'value': 'N = {N} + 1'}
  	{'type': 'condition', 'value': '{N} < 3'}
  	{'type': 'goto', 'value': '-loop'}
  # comment

Indentation (tabs) makes blocks: a failed step skips the rest of its block."#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a scenario.
    ///
    /// Progress lines (`Status=...`, `Env=...`) are written to stderr.
    /// Exits 1 when a top-level step fails.
    Run {
        path: PathBuf,

        /// First line to run (1-based, inclusive).
        #[arg(long)]
        from_line: Option<usize>,

        /// Last line to run (1-based, inclusive).
        #[arg(long)]
        to_line: Option<usize>,

        /// Record the screen into `<scenario dir>/.tmp/screencast.mkv`.
        #[arg(long)]
        with_screencast: bool,

        /// Prepended to every shell command. Overrides the config.
        #[arg(long)]
        shell_command_prefix: Option<String>,
    },

    /// List a scenario's events with variables previewed.
    Show {
        path: PathBuf,

        /// Print the parsed events as JSON instead.
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a scenario in place.
    Edit {
        path: PathBuf,

        #[command(subcommand)]
        op: EditOp,
    },
}

/// `--lines` takes `N` or `N-M`, comma-separated or repeated.
#[derive(Debug, Subcommand)]
pub enum EditOp {
    /// Indent (positive) or dedent (negative) lines.
    Shift {
        #[arg(long, required = true, value_delimiter = ',', value_parser = parse_span)]
        lines: Vec<RangeInclusive<usize>>,

        #[arg(long, allow_hyphen_values = true)]
        by: isize,
    },

    /// Turn events into `# ` comments.
    Comment {
        #[arg(long, required = true, value_delimiter = ',', value_parser = parse_span)]
        lines: Vec<RangeInclusive<usize>>,
    },

    /// Restore events hidden by `comment`.
    Uncomment {
        #[arg(long, required = true, value_delimiter = ',', value_parser = parse_span)]
        lines: Vec<RangeInclusive<usize>>,
    },

    /// Merge events into the first, concatenating their patterns.
    Join {
        #[arg(long, required = true, value_delimiter = ',', value_parser = parse_span)]
        lines: Vec<RangeInclusive<usize>>,
    },

    /// Split multi-pattern events into one event per pattern.
    Split {
        #[arg(long, required = true, value_delimiter = ',', value_parser = parse_span)]
        lines: Vec<RangeInclusive<usize>>,
    },

    /// Remove lines.
    Delete {
        #[arg(long)]
        line: usize,

        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Move lines; `--to` is the position after they are cut out.
    Move {
        #[arg(long)]
        from: usize,

        #[arg(long)]
        to: usize,

        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Insert a line before `--at`; one past the last line appends.
    Insert {
        #[arg(long)]
        at: usize,

        line: String,
    },
}

/// Run the CLI, returning the process exit code or an error message.
pub fn run(cli: Cli, config: &Config) -> Result<i32, String> {
    match cli.command {
        Command::Run {
            path,
            from_line,
            to_line,
            with_screencast,
            shell_command_prefix,
        } => {
            let mut options = config.options();
            options.from_line = from_line.map(to_index).transpose()?;
            options.to_line = to_line.map(to_index).transpose()?;
            if let Some(prefix) = shell_command_prefix {
                options.shell_command_prefix = prefix;
            }
            cmd_run(config, &path, options, with_screencast)
        }
        Command::Show { path, json } => cmd_show(&path, json).map(|()| 0),
        Command::Edit { path, op } => cmd_edit(&path, op).map(|()| 0),
    }
}

fn cmd_run(
    config: &Config,
    path: &Path,
    options: Options,
    with_screencast: bool,
) -> Result<i32, String> {
    let scenario = open(path)?;
    let cancel = Cancel::install()?;

    let mut screencast = if with_screencast {
        std::fs::create_dir_all(scenario.tmp_dir())
            .map_err(|e| format!("failed to create {}: {e}", scenario.tmp_dir().display()))?;
        let recording = Screencast::start(&scenario.tmp_dir(), &config.display, config.screencast_fps)
            .map_err(|e| format!("failed to start screen recording: {e}"))?;
        Some(recording)
    } else {
        None
    };

    let mut device = XdotoolDevice::new(config.display.clone());
    let mut progress = io::stderr();
    let outcome = Interpreter::new(
        &scenario,
        Environment::from_process(),
        &mut device,
        &mut progress,
        cancel,
        options,
    )
    .run();

    if let Some(recording) = screencast.as_mut() {
        recording.stop();
        eprintln!("Screen record saved to {}", recording.path().display());
    }

    let outcome = outcome.map_err(|e| format!("failed to run {}: {e}", path.display()))?;
    match &outcome {
        Outcome::Completed => log::info!("Scenario completed"),
        Outcome::Jumped { message } => println!("{message}"),
        Outcome::Interrupted => log::warn!("Scenario interrupted"),
        Outcome::Failed { index, message } => {
            log::debug!("Step #{} failed", index + 1);
            eprintln!("{message}");
        }
    }
    Ok(outcome.exit_code())
}

fn cmd_show(path: &Path, json: bool) -> Result<(), String> {
    let scenario = open(path)?;

    if json {
        let entries: Vec<serde_json::Value> = scenario
            .lines()
            .iter()
            .enumerate()
            .map(|(index, line)| match event::restore(line) {
                Ok(event) => serde_json::json!({ "line": index + 1, "event": event }),
                Err(e) => serde_json::json!({ "line": index + 1, "error": e.to_string() }),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| format!("failed to serialize events: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let env = Environment::from_process();
    for (index, line) in scenario.lines().iter().enumerate() {
        let shown = match event::restore(line) {
            Ok(event) => format_event(&event, &env),
            Err(e) => format!("!! {e}"),
        };
        println!("{:>4}  {shown}", index + 1);
    }
    Ok(())
}

fn cmd_edit(path: &Path, op: EditOp) -> Result<(), String> {
    let mut scenario = open(path)?;

    let result = match op {
        EditOp::Shift { lines, by } => scenario.shift(&indices(&lines)?, by),
        EditOp::Comment { lines } => scenario.comment(&indices(&lines)?),
        EditOp::Uncomment { lines } => scenario.uncomment(&indices(&lines)?),
        EditOp::Join { lines } => scenario.join(&indices(&lines)?),
        EditOp::Split { lines } => scenario.split(&indices(&lines)?),
        EditOp::Delete { line, count } => scenario.delete(to_index(line)?, count),
        EditOp::Move { from, to, count } => {
            scenario.move_lines(to_index(from)?, to_index(to)?, count)
        }
        EditOp::Insert { at, line } => scenario.insert(to_index(at)?, &line),
    };
    result.map_err(|e| format!("{}: {e}", path.display()))?;

    scenario
        .save()
        .map_err(|e| format!("failed to save {}: {e}", path.display()))?;
    eprintln!("Updated {}", scenario.path().display());
    Ok(())
}

fn open(path: &Path) -> Result<Scenario, String> {
    Scenario::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))
}

/// 1-based line number to 0-based index.
fn to_index(line: usize) -> Result<usize, String> {
    line.checked_sub(1)
        .ok_or_else(|| "line numbers start at 1".to_string())
}

/// Flattens 1-based spans into 0-based indices.
fn indices(spans: &[RangeInclusive<usize>]) -> Result<Vec<usize>, String> {
    let mut out = Vec::new();
    for span in spans {
        for line in span.clone() {
            out.push(to_index(line)?);
        }
    }
    Ok(out)
}

/// Parses `N` or `N-M`.
fn parse_span(s: &str) -> Result<RangeInclusive<usize>, String> {
    let number = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid line number {part:?}"))
    };
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (number(start)?, number(end)?),
        None => {
            let n = number(s)?;
            (n, n)
        }
    };
    if start > end {
        return Err(format!("line span {s:?} runs backwards"));
    }
    Ok(start..=end)
}
