//! Screen recording alongside a run.
//!
//! A background thread owns an `ffmpeg` x11grab process and stops it when
//! the shared flag clears. Dropping the [`Screencast`] stops and joins it, so
//! every exit path of a run tears the recorder down.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScreencastError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed: {stderr}")]
    Failed {
        program: &'static str,
        stderr: String,
    },

    #[error("can not detect screen resolution")]
    UnknownSize,
}

const POLL: Duration = Duration::from_millis(100);

pub struct Screencast {
    keep_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl Screencast {
    /// Starts recording `display` into `<tmp_dir>/screencast.mkv`,
    /// replacing any earlier recording.
    pub fn start(tmp_dir: &Path, display: &str, fps: u32) -> Result<Self, ScreencastError> {
        let (width, height) = screen_size(display)?;
        let path = tmp_dir.join("screencast.mkv");
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed previous recording {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
        }

        let mut child = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-y", "-f", "x11grab"])
            .args(["-r", &fps.to_string()])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-i", &format!("{display}+0,0")])
            .args(["-vcodec", "libx264", "-preset", "ultrafast", "-crf", "0"])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| ScreencastError::Spawn {
                program: "ffmpeg",
                source,
            })?;
        log::info!("Screen is recording into {}", path.display());

        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep_running);
        let saved = path.clone();
        let handle = thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                if let Ok(Some(status)) = child.try_wait() {
                    log::warn!("Screen recorder exited early: {status}");
                    return;
                }
                thread::sleep(POLL);
            }
            // ffmpeg finalizes the file when it reads `q`.
            if let Some(mut stdin) = child.stdin.take()
                && let Err(e) = stdin.write_all(b"q")
            {
                log::warn!("Failed to stop screen recorder: {e}");
            }
            match child.wait() {
                Ok(_) => log::info!("Screen record is saved to {}", saved.display()),
                Err(e) => log::warn!("Failed to wait for screen recorder: {e}"),
            }
        });

        Ok(Self {
            keep_running,
            handle: Some(handle),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops the recording and waits for the file to be written.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("Screen recorder thread panicked");
        }
    }
}

impl Drop for Screencast {
    fn drop(&mut self) {
        self.stop();
    }
}

fn screen_size(display: &str) -> Result<(u32, u32), ScreencastError> {
    let output = Command::new("xdpyinfo")
        .args(["-display", display])
        .output()
        .map_err(|source| ScreencastError::Spawn {
            program: "xdpyinfo",
            source,
        })?;
    if !output.status.success() {
        return Err(ScreencastError::Failed {
            program: "xdpyinfo",
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    parse_screen_size(&String::from_utf8_lossy(&output.stdout)).ok_or(ScreencastError::UnknownSize)
}

/// Reads `dimensions:    1920x1080 pixels (508x285 millimeters)`.
fn parse_screen_size(xdpyinfo: &str) -> Option<(u32, u32)> {
    let line = xdpyinfo
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("dimensions:"))?;
    let (width, height) = line.split_whitespace().nth(1)?.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_dimensions_line() {
        let output = "name of display:    :0\n\
                      screen #0:\n  \
                        dimensions:    1920x1080 pixels (508x285 millimeters)\n  \
                        resolution:    96x96 dots per inch\n";
        assert_eq!(parse_screen_size(output), Some((1920, 1080)));
    }

    #[test]
    fn missing_or_garbled_dimensions() {
        assert_eq!(parse_screen_size("screen #0:\n"), None);
        assert_eq!(parse_screen_size("  dimensions:    wide pixels\n"), None);
    }
}
