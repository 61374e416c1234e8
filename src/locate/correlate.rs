//! Normalized template correlation.
//!
//! The colour methods sum over the three channels, with the raw
//! cross-correlation per channel coming from `imageproc` and the window
//! statistics from summed-area tables. The squared-difference method runs on
//! greyscale entirely inside `imageproc`.

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::definitions::Image;
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};

use super::Method;

/// Best position of a template on a screen, top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Higher is better, 1.0 is a perfect match for every method.
    pub score: f64,
    pub x: u32,
    pub y: u32,
}

/// `None` when the template is empty or doesn't fit on the screen.
pub fn best_match(screen: &RgbImage, template: &RgbImage, method: Method) -> Option<Match> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    match method {
        Method::CcoeffNormed | Method::CcorrNormed => {
            let scores = colour_correlation(screen, template, method == Method::CcoeffNormed);
            let extremes = find_extremes(&scores);
            let (x, y) = extremes.max_value_location;
            Some(Match {
                score: f64::from(extremes.max_value),
                x,
                y,
            })
        }
        Method::SqdiffNormed => {
            let screen = image::imageops::grayscale(screen);
            let template = image::imageops::grayscale(template);
            let distances = match_template(
                &screen,
                &template,
                MatchTemplateMethod::SumOfSquaredErrorsNormalized,
            );
            let extremes = find_extremes(&distances);
            let (x, y) = extremes.min_value_location;
            let distance = f64::from(extremes.min_value);
            Some(Match {
                score: if distance.is_finite() { 1.0 - distance } else { 0.0 },
                x,
                y,
            })
        }
    }
}

/// Score map for the normalized cross-correlation, optionally mean-centred.
fn colour_correlation(screen: &RgbImage, template: &RgbImage, centred: bool) -> Image<Luma<f32>> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    let (rw, rh) = (sw - tw + 1, sh - th + 1);
    let area = f64::from(tw) * f64::from(th);
    let cells = rw as usize * rh as usize;

    let mut numerator = vec![0.0_f64; cells];
    let mut window_energy = vec![0.0_f64; cells];
    let mut template_energy = 0.0_f64;

    for c in 0..3 {
        let screen_channel = channel(screen, c);
        let template_channel = channel(template, c);
        let cross = match_template(
            &screen_channel,
            &template_channel,
            MatchTemplateMethod::CrossCorrelation,
        );
        let table = SummedArea::new(&screen_channel);

        let (t_sum, t_squares) = template_channel.pixels().fold((0.0, 0.0), |(s, q), p| {
            let v = f64::from(p[0]);
            (s + v, q + v * v)
        });
        template_energy += if centred {
            t_squares - t_sum * t_sum / area
        } else {
            t_squares
        };

        for y in 0..rh {
            for x in 0..rw {
                let i = y as usize * rw as usize + x as usize;
                let (sum, squares) = table.window(x, y, tw, th);
                let product = f64::from(cross.get_pixel(x, y)[0]);
                if centred {
                    numerator[i] += product - t_sum * sum / area;
                    window_energy[i] += squares - sum * sum / area;
                } else {
                    numerator[i] += product;
                    window_energy[i] += squares;
                }
            }
        }
    }

    ImageBuffer::from_fn(rw, rh, |x, y| {
        let i = y as usize * rw as usize + x as usize;
        let denominator = (template_energy * window_energy[i].max(0.0)).sqrt();
        Luma([normalize(numerator[i], denominator) as f32])
    })
}

/// Divides, keeping rounding noise near a zero denominator out of range.
/// A flat window or template scores 0.
fn normalize(numerator: f64, denominator: f64) -> f64 {
    if numerator.abs() < denominator {
        numerator / denominator
    } else if numerator.abs() < denominator * 1.125 {
        numerator.signum()
    } else {
        0.0
    }
}

fn channel(image: &RgbImage, c: usize) -> GrayImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[c]])
    })
}

/// Summed-area tables of values and squared values, one row and column of
/// zero padding on the top-left.
struct SummedArea {
    stride: usize,
    sums: Vec<f64>,
    squares: Vec<f64>,
}

impl SummedArea {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0.0; stride * (h + 1)];
        let mut squares = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_squares = 0.0;
            for x in 0..w {
                let v = f64::from(image.get_pixel(x as u32, y as u32)[0]);
                row_sum += v;
                row_squares += v * v;
                let i = (y + 1) * stride + x + 1;
                sums[i] = sums[i - stride] + row_sum;
                squares[i] = squares[i - stride] + row_squares;
            }
        }
        Self {
            stride,
            sums,
            squares,
        }
    }

    /// Sum and sum of squares over the `w`×`h` window at `(x, y)`.
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[f64]| {
            table[y1 * self.stride + x1] - table[y0 * self.stride + x1]
                - table[y1 * self.stride + x0]
                + table[y0 * self.stride + x0]
        };
        (at(&self.sums), at(&self.squares))
    }
}
