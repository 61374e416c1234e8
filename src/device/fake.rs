//! A device that records calls and serves canned screenshots.

use std::collections::VecDeque;
use std::time::Duration;

use image::{DynamicImage, RgbImage};

use super::{Button, Device, DeviceError, Key};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Press(String),
    Release(String),
    Type(String),
    Slide(i32, i32),
    PressButton(i32, i32, Button),
    ReleaseButton(i32, i32, Button),
    Click(i32, i32, Button, u32),
    Scroll(i32, i32, i32),
    Screenshot,
}

#[derive(Debug, Default)]
pub struct FakeDevice {
    pub calls: Vec<Call>,
    pub cursor: (i32, i32),
    /// Served in order; the last one repeats.
    screens: VecDeque<DynamicImage>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screens(screens: impl IntoIterator<Item = DynamicImage>) -> Self {
        Self {
            screens: screens.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Calls other than screenshots.
    pub fn actions(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|c| **c != Call::Screenshot)
            .cloned()
            .collect()
    }
}

impl Device for FakeDevice {
    fn press(&mut self, key: &Key) -> Result<(), DeviceError> {
        self.calls.push(Call::Press(key.keysym().to_string()));
        Ok(())
    }

    fn release(&mut self, key: &Key) -> Result<(), DeviceError> {
        self.calls.push(Call::Release(key.keysym().to_string()));
        Ok(())
    }

    fn type_text(&mut self, text: &str, _interval: Duration) -> Result<(), DeviceError> {
        self.calls.push(Call::Type(text.to_string()));
        Ok(())
    }

    fn slide(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.cursor = (x, y);
        self.calls.push(Call::Slide(x, y));
        Ok(())
    }

    fn press_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError> {
        self.cursor = (x, y);
        self.calls.push(Call::PressButton(x, y, button));
        Ok(())
    }

    fn release_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError> {
        self.cursor = (x, y);
        self.calls.push(Call::ReleaseButton(x, y, button));
        Ok(())
    }

    fn click(&mut self, x: i32, y: i32, button: Button, count: u32) -> Result<(), DeviceError> {
        self.cursor = (x, y);
        self.calls.push(Call::Click(x, y, button, count));
        Ok(())
    }

    fn scroll(&mut self, x: i32, y: i32, clicks: i32) -> Result<(), DeviceError> {
        self.cursor = (x, y);
        self.calls.push(Call::Scroll(x, y, clicks));
        Ok(())
    }

    fn position(&mut self) -> Result<(i32, i32), DeviceError> {
        Ok(self.cursor)
    }

    fn screenshot(&mut self) -> Result<DynamicImage, DeviceError> {
        self.calls.push(Call::Screenshot);
        let screen = if self.screens.len() > 1 {
            self.screens.pop_front()
        } else {
            self.screens.front().cloned()
        };
        Ok(screen.unwrap_or_else(|| DynamicImage::ImageRgb8(RgbImage::new(64, 64))))
    }
}
