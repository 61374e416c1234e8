//! The keyboard, mouse and screen a scenario drives.
//!
//! The interpreter only talks to [`Device`]. The binary uses the xdotool
//! backend; tests use a recording fake.

#[cfg(test)]
pub mod fake;
mod key;
mod xdotool;

use std::time::Duration;

use image::DynamicImage;

pub use key::{Key, KeyStroke, parse_sequence};
pub use xdotool::XdotoolDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

impl Button {
    /// X11 button number.
    pub fn number(self) -> &'static str {
        match self {
            Self::Left => "1",
            Self::Right => "3",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("unexpected output from {program}: {output:?}")]
    Output { program: String, output: String },

    #[error("unreadable screenshot: {0}")]
    Image(#[from] image::ImageError),
}

/// Synthetic input and screen capture.
///
/// Coordinates are absolute screen pixels. Mouse methods move the pointer to
/// `(x, y)` before acting.
pub trait Device {
    fn press(&mut self, key: &Key) -> Result<(), DeviceError>;

    fn release(&mut self, key: &Key) -> Result<(), DeviceError>;

    /// Types `text` character by character, `interval` apart.
    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), DeviceError>;

    /// Moves the pointer in visible steps rather than jumping.
    fn slide(&mut self, x: i32, y: i32) -> Result<(), DeviceError>;

    fn press_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError>;

    fn release_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError>;

    fn click(&mut self, x: i32, y: i32, button: Button, count: u32) -> Result<(), DeviceError>;

    /// Positive `clicks` scroll down, negative scroll up.
    fn scroll(&mut self, x: i32, y: i32, clicks: i32) -> Result<(), DeviceError>;

    fn position(&mut self) -> Result<(i32, i32), DeviceError>;

    fn screenshot(&mut self) -> Result<DynamicImage, DeviceError>;
}
