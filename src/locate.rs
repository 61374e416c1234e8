//! Finding template images on the screen.
//!
//! [`Locator::locate`] polls screenshots until one of the templates matches
//! with at least one method, or the time budget runs out. Near misses are
//! written to the diagnostics directory as `pattern-<i>-<METHOD>-<score>%.png`
//! so thresholds can be tuned after a failed run.

mod correlate;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;

use crate::cancel::{Cancel, Interrupted};
use crate::device::{Device, DeviceError};

pub use correlate::{Match, best_match};

/// Scores at this fraction of a threshold are kept as near-miss crops.
const NEAR_MISS_RATIO: f64 = 0.8;

/// Upper bound on how much one poll may count against the budget.
const MAX_POLL_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    CcoeffNormed,
    CcorrNormed,
    SqdiffNormed,
}

impl Method {
    pub const ALL: [Self; 3] = [Self::CcoeffNormed, Self::CcorrNormed, Self::SqdiffNormed];

    pub fn name(self) -> &'static str {
        match self {
            Self::CcoeffNormed => "TM_CCOEFF_NORMED",
            Self::CcorrNormed => "TM_CCORR_NORMED",
            Self::SqdiffNormed => "TM_SQDIFF_NORMED",
        }
    }

    /// Case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

/// Minimum score per method. A template matches when any method reaches its
/// threshold.
pub type Thresholds = BTreeMap<Method, f64>;

pub fn default_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([
        (Method::CcoeffNormed.name().to_string(), 0.963),
        (Method::CcorrNormed.name().to_string(), 0.999),
    ])
}

/// Merges per-event overrides into the base set and resolves method names.
pub fn resolve_thresholds(
    base: &BTreeMap<String, f64>,
    overrides: &BTreeMap<String, f64>,
) -> Result<Thresholds, LocateError> {
    let mut resolved = Thresholds::new();
    for (name, threshold) in base.iter().chain(overrides) {
        let method =
            Method::from_name(name).ok_or_else(|| LocateError::UnknownMethod(name.clone()))?;
        resolved.insert(method, *threshold);
    }
    Ok(resolved)
}

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("patterns {} not found within {timeout} s", .patterns.join(", "))]
    PatternNotFound { patterns: Vec<String>, timeout: f64 },

    #[error("pattern file {} does not exist", .0.display())]
    MissingTemplate(PathBuf),

    #[error("failed to load pattern {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("unknown matching method {0:?}")]
    UnknownMethod(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("interrupted")]
    Interrupted,
}

impl From<Interrupted> for LocateError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

/// One template request from a mouse event.
#[derive(Debug, Clone)]
pub struct Request<'p> {
    pub paths: &'p [PathBuf],
    /// Seconds of polling before giving up.
    pub timeout: f64,
    /// Seconds between the starts of consecutive polls.
    pub delay: f64,
    pub thresholds: &'p Thresholds,
}

struct Template {
    path: PathBuf,
    image: RgbImage,
}

pub struct Locator<'a> {
    device: &'a mut dyn Device,
    diagnostics: &'a Path,
    cancel: &'a Cancel,
}

impl<'a> Locator<'a> {
    pub fn new(device: &'a mut dyn Device, diagnostics: &'a Path, cancel: &'a Cancel) -> Self {
        Self {
            device,
            diagnostics,
            cancel,
        }
    }

    /// Centre of the first template that matches.
    pub fn locate(&mut self, request: &Request<'_>) -> Result<(i32, i32), LocateError> {
        log::debug!("Looking for patterns {:?}", request.paths);
        let templates = request
            .paths
            .iter()
            .map(|path| load_template(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut remaining = request.timeout;
        loop {
            let started = Instant::now();
            self.clear_near_misses();

            log::debug!("Capturing screenshot");
            let screen = self.device.screenshot()?.to_rgb8();

            for (index, template) in templates.iter().enumerate() {
                if let Some(found) = self.match_template(&screen, index + 1, template, request) {
                    log::debug!("Pattern {} is found", template.path.display());
                    return Ok(found);
                }
            }

            let elapsed = started.elapsed().as_secs_f64().clamp(0.0, MAX_POLL_SECONDS);
            let wait = request.delay - elapsed;
            if wait > 0.0 {
                self.cancel.sleep_secs(wait)?;
            } else {
                log::warn!("Screenshot overtime {:.3} s", -wait);
            }
            remaining -= started.elapsed().as_secs_f64().clamp(0.0, MAX_POLL_SECONDS);
            if remaining <= 0.0 {
                self.keep_failure(&templates, &screen);
                return Err(LocateError::PatternNotFound {
                    patterns: templates.iter().map(|t| basename(&t.path)).collect(),
                    timeout: request.timeout,
                });
            }
            if self.cancel.is_set() {
                return Err(LocateError::Interrupted);
            }
        }
    }

    /// Scores one template with every method and returns its centre if any
    /// method reaches its threshold.
    fn match_template(
        &self,
        screen: &RgbImage,
        index: usize,
        template: &Template,
        request: &Request<'_>,
    ) -> Option<(i32, i32)> {
        let scored: Vec<(Method, f64, Match)> = request
            .thresholds
            .iter()
            .filter_map(|(&method, &threshold)| {
                best_match(screen, &template.image, method).map(|m| (method, threshold, m))
            })
            .collect();

        if scored
            .iter()
            .any(|(_, threshold, m)| m.score >= NEAR_MISS_RATIO * threshold)
        {
            let summary: Vec<String> = scored
                .iter()
                .map(|(method, _, m)| {
                    format!("{:.1}% for {} ({}, {})", m.score * 100.0, method.name(), m.x, m.y)
                })
                .collect();
            log::info!("Correlation: {}", summary.join(", "));
            for (method, threshold, m) in &scored {
                if m.score >= NEAR_MISS_RATIO * threshold {
                    self.save_crop(screen, index, *method, template, m);
                }
            }
        }

        let (w, h) = template.image.dimensions();
        scored
            .iter()
            .find(|(_, threshold, m)| m.score >= *threshold)
            .map(|(_, _, m)| ((m.x + w / 2) as i32, (m.y + h / 2) as i32))
    }

    // ── Diagnostics (best effort) ──

    fn clear_near_misses(&self) {
        let Ok(entries) = fs::read_dir(self.diagnostics) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("pattern-") && name.ends_with(".png") {
                if let Err(e) = fs::remove_file(entry.path()) {
                    log::warn!("Failed to remove {}: {e}", entry.path().display());
                }
            }
        }
    }

    fn save_crop(
        &self,
        screen: &RgbImage,
        index: usize,
        method: Method,
        template: &Template,
        found: &Match,
    ) {
        let (w, h) = template.image.dimensions();
        let crop = image::imageops::crop_imm(screen, found.x, found.y, w, h).to_image();
        let name = format!(
            "pattern-{index}-{}-{:.1}%.png",
            method.name(),
            found.score * 100.0
        );
        let path = self.diagnostics.join(name);
        if let Err(e) = crop.save(&path) {
            log::warn!("Failed to save {}: {e}", path.display());
        }
    }

    fn keep_failure(&self, templates: &[Template], screen: &RgbImage) {
        for (index, template) in templates.iter().enumerate() {
            let target = self.diagnostics.join(format!("pattern-{}.png", index + 1));
            if let Err(e) = fs::copy(&template.path, &target) {
                log::warn!("Failed to copy {}: {e}", template.path.display());
            }
        }
        let path = self.diagnostics.join("screenshot.png");
        if let Err(e) = screen.save(&path) {
            log::warn!("Failed to save {}: {e}", path.display());
        }
    }
}

fn load_template(path: &Path) -> Result<Template, LocateError> {
    if !path.exists() {
        return Err(LocateError::MissingTemplate(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|source| LocateError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Template {
        path: path.to_path_buf(),
        image: image.to_rgb8(),
    })
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::{Call, FakeDevice};
    use image::{DynamicImage, Rgb};

    fn button() -> RgbImage {
        RgbImage::from_fn(6, 4, |x, y| Rgb([(x * 40) as u8, (y * 60) as u8, 255 - (x * 30) as u8]))
    }

    fn screen_with_button_at(x: i64, y: i64) -> DynamicImage {
        let mut screen = RgbImage::from_fn(40, 30, |x, y| {
            let v = ((x * 11 + y * 5) % 17) as u8 * 9;
            Rgb([v, 255 - v, v / 2])
        });
        image::imageops::replace(&mut screen, &button(), x, y);
        DynamicImage::ImageRgb8(screen)
    }

    fn thresholds() -> Thresholds {
        resolve_thresholds(&default_thresholds(), &BTreeMap::new()).unwrap()
    }

    #[test]
    fn method_names_are_case_insensitive() {
        assert_eq!(Method::from_name("tm_ccoeff_normed"), Some(Method::CcoeffNormed));
        assert_eq!(Method::from_name("TM_SQDIFF_NORMED"), Some(Method::SqdiffNormed));
        assert_eq!(Method::from_name("TM_FANCY"), None);
    }

    #[test]
    fn overrides_extend_and_replace_base_thresholds() {
        let overrides = BTreeMap::from([
            ("TM_CCORR_NORMED".to_string(), 0.9),
            ("TM_SQDIFF_NORMED".to_string(), 0.95),
        ]);
        let resolved = resolve_thresholds(&default_thresholds(), &overrides).unwrap();
        assert_eq!(resolved[&Method::CcoeffNormed], 0.963);
        assert_eq!(resolved[&Method::CcorrNormed], 0.9);
        assert_eq!(resolved[&Method::SqdiffNormed], 0.95);

        let bad = BTreeMap::from([("TM_FANCY".to_string(), 0.5)]);
        assert!(matches!(
            resolve_thresholds(&default_thresholds(), &bad),
            Err(LocateError::UnknownMethod(name)) if name == "TM_FANCY"
        ));
    }

    #[test]
    fn locates_centre_of_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button.png");
        button().save(&path).unwrap();

        let mut device = FakeDevice::with_screens([screen_with_button_at(20, 9)]);
        let cancel = Cancel::new();
        let thresholds = thresholds();
        let paths = [path];
        let request = Request {
            paths: &paths,
            timeout: 1.0,
            delay: 0.0,
            thresholds: &thresholds,
        };

        let found = Locator::new(&mut device, dir.path(), &cancel)
            .locate(&request)
            .unwrap();
        assert_eq!(found, (23, 11));
        let screenshots = device.calls.iter().filter(|c| **c == Call::Screenshot).count();
        assert_eq!(screenshots, 1);
    }

    #[test]
    fn later_poll_can_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button.png");
        button().save(&path).unwrap();
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([10, 10, 10])));

        let mut device = FakeDevice::with_screens([blank, screen_with_button_at(2, 3)]);
        let cancel = Cancel::new();
        let thresholds = thresholds();
        let paths = [path];
        let request = Request {
            paths: &paths,
            timeout: 5.0,
            delay: 0.01,
            thresholds: &thresholds,
        };

        let found = Locator::new(&mut device, dir.path(), &cancel)
            .locate(&request)
            .unwrap();
        assert_eq!(found, (5, 5));
        let screenshots = device.calls.iter().filter(|c| **c == Call::Screenshot).count();
        assert_eq!(screenshots, 2);
    }

    #[test]
    fn timeout_reports_basenames_and_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent-button.png");
        button().save(&path).unwrap();
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([10, 10, 10])));
        let diagnostics = dir.path().join(".tmp");
        fs::create_dir(&diagnostics).unwrap();

        let mut device = FakeDevice::with_screens([blank]);
        let cancel = Cancel::new();
        let thresholds = thresholds();
        let paths = [path];
        let request = Request {
            paths: &paths,
            timeout: 0.05,
            delay: 0.02,
            thresholds: &thresholds,
        };

        let started = Instant::now();
        let err = Locator::new(&mut device, &diagnostics, &cancel)
            .locate(&request)
            .unwrap_err();
        let elapsed = started.elapsed().as_secs_f64();
        assert!(
            (0.05..0.05 + 0.02 + 0.5).contains(&elapsed),
            "gave up after {elapsed} s"
        );
        match err {
            LocateError::PatternNotFound { patterns, timeout } => {
                assert_eq!(patterns, vec!["absent-button.png".to_string()]);
                assert_eq!(timeout, 0.05);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(diagnostics.join("pattern-1.png").exists());
        assert!(diagnostics.join("screenshot.png").exists());
    }

    #[test]
    fn missing_template_fails_before_polling() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = FakeDevice::new();
        let cancel = Cancel::new();
        let thresholds = thresholds();
        let paths = [dir.path().join("nope.png")];
        let request = Request {
            paths: &paths,
            timeout: 1.0,
            delay: 0.0,
            thresholds: &thresholds,
        };

        let err = Locator::new(&mut device, dir.path(), &cancel)
            .locate(&request)
            .unwrap_err();
        assert!(matches!(err, LocateError::MissingTemplate(_)));
        assert!(device.calls.is_empty());
    }

    #[test]
    fn cancellation_stops_polling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button.png");
        button().save(&path).unwrap();
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([10, 10, 10])));

        let mut device = FakeDevice::with_screens([blank]);
        let cancel = Cancel::new();
        cancel.trigger();
        let thresholds = thresholds();
        let paths = [path];
        let request = Request {
            paths: &paths,
            timeout: 60.0,
            delay: 1.0,
            thresholds: &thresholds,
        };

        let err = Locator::new(&mut device, dir.path(), &cancel)
            .locate(&request)
            .unwrap_err();
        assert!(matches!(err, LocateError::Interrupted));
    }
}
