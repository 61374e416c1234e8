//! X11 backend: `xdotool` for input, ImageMagick `import` for screenshots.

use std::process::Command;
use std::thread;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};

use super::{Button, Device, DeviceError, Key};

/// Pointer speed while sliding, in pixels per second.
const SLIDE_VELOCITY: f64 = 1000.0;
const SLIDE_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct XdotoolDevice {
    display: String,
}

impl XdotoolDevice {
    pub fn new(display: impl Into<String>) -> Self {
        Self {
            display: display.into(),
        }
    }

    /// Runs a command against the configured display and returns stdout.
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        log::debug!("{program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .env("DISPLAY", &self.display)
            .output()
            .map_err(|source| DeviceError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeviceError::Failed {
                command: format!("{program} {}", args.join(" ")),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    fn xdotool(&self, args: &[&str]) -> Result<(), DeviceError> {
        self.run("xdotool", args).map(drop)
    }

    fn move_to(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.xdotool(&["mousemove", &x.to_string(), &y.to_string()])
    }
}

impl Device for XdotoolDevice {
    fn press(&mut self, key: &Key) -> Result<(), DeviceError> {
        self.xdotool(&["keydown", key.keysym()])
    }

    fn release(&mut self, key: &Key) -> Result<(), DeviceError> {
        self.xdotool(&["keyup", key.keysym()])
    }

    fn type_text(&mut self, text: &str, interval: Duration) -> Result<(), DeviceError> {
        let delay = interval.as_millis().to_string();
        self.xdotool(&["type", "--delay", &delay, "--", text])
    }

    fn slide(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        let (from_x, from_y) = self.position()?;
        let (dx, dy) = (f64::from(x - from_x), f64::from(y - from_y));
        let steps = (dx.hypot(dy) / (SLIDE_VELOCITY * SLIDE_STEP.as_secs_f64())) as u32;
        for step in 1..steps {
            let t = f64::from(step) / f64::from(steps);
            let (sx, sy) = (from_x + (dx * t) as i32, from_y + (dy * t) as i32);
            self.move_to(sx, sy)?;
            thread::sleep(SLIDE_STEP);
        }
        self.move_to(x, y)
    }

    fn press_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.xdotool(&["mousemove", &x, &y, "mousedown", button.number()])
    }

    fn release_button(&mut self, x: i32, y: i32, button: Button) -> Result<(), DeviceError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.xdotool(&["mousemove", &x, &y, "mouseup", button.number()])
    }

    fn click(&mut self, x: i32, y: i32, button: Button, count: u32) -> Result<(), DeviceError> {
        let (x, y, count) = (x.to_string(), y.to_string(), count.to_string());
        self.xdotool(&[
            "mousemove",
            &x,
            &y,
            "click",
            "--repeat",
            &count,
            "--delay",
            "80",
            button.number(),
        ])
    }

    fn scroll(&mut self, x: i32, y: i32, clicks: i32) -> Result<(), DeviceError> {
        if clicks == 0 {
            return self.move_to(x, y);
        }
        // Buttons 4 and 5 are the wheel.
        let wheel = if clicks < 0 { "4" } else { "5" };
        let (x, y, count) = (x.to_string(), y.to_string(), clicks.unsigned_abs().to_string());
        self.xdotool(&["mousemove", &x, &y, "click", "--repeat", &count, wheel])
    }

    fn position(&mut self) -> Result<(i32, i32), DeviceError> {
        let stdout = self.run("xdotool", &["getmouselocation", "--shell"])?;
        let output = String::from_utf8_lossy(&stdout);
        parse_mouse_location(&output).ok_or_else(|| DeviceError::Output {
            program: "xdotool".to_string(),
            output: output.to_string(),
        })
    }

    fn screenshot(&mut self) -> Result<DynamicImage, DeviceError> {
        let png = self.run("import", &["-window", "root", "png:-"])?;
        Ok(image::load_from_memory_with_format(&png, ImageFormat::Png)?)
    }
}

/// Reads `X=..` and `Y=..` from `xdotool getmouselocation --shell`.
fn parse_mouse_location(output: &str) -> Option<(i32, i32)> {
    let field = |name: &str| {
        output
            .lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix('='))
            .and_then(|v| v.trim().parse().ok())
    };
    Some((field("X")?, field("Y")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shell_mouse_location() {
        let output = "X=812\nY=44\nSCREEN=0\nWINDOW=65011719\n";
        assert_eq!(parse_mouse_location(output), Some((812, 44)));
    }

    #[test]
    fn rejects_incomplete_mouse_location() {
        assert_eq!(parse_mouse_location("X=1\nSCREEN=0\n"), None);
        assert_eq!(parse_mouse_location(""), None);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let device = XdotoolDevice::new(":0");
        let err = device
            .run("retrace-test-no-such-program", &[])
            .unwrap_err();
        assert!(matches!(err, DeviceError::Spawn { .. }));
    }
}
