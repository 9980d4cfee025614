//! Screenshot comparison against stored baselines

use std::io::Cursor;
use std::path::PathBuf;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-channel difference tolerated before a pixel counts as changed
const CHANNEL_TOLERANCE: i32 = 5;

/// Result of a visual comparison
#[derive(Debug, Clone)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    /// Changed pixels in red over a dimmed copy of the screenshot
    pub diff_png: Option<Vec<u8>>,
}

pub struct VisualTester {
    baseline_dir: PathBuf,
    /// Allowed share of changed pixels (0.0 - 100.0 percent)
    threshold: f64,
    /// Record a missing baseline instead of failing
    auto_update: bool,
}

impl VisualTester {
    pub fn new(config: &VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        Ok(Self {
            baseline_dir: config.baseline_dir.clone(),
            threshold: config.threshold,
            auto_update: config.auto_update,
        })
    }

    fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(format!("{}.png", sanitize(name)))
    }

    /// Compare PNG bytes with the baseline stored for `name`
    pub fn compare_png(&self, name: &str, actual_png: &[u8]) -> E2eResult<VisualDiff> {
        let baseline_path = self.baseline_path(name);

        if !baseline_path.exists() {
            if !self.auto_update {
                return Err(E2eError::BaselineNotFound(baseline_path.display().to_string()));
            }
            info!("Creating baseline for '{}'", name);
            std::fs::write(&baseline_path, actual_png)?;
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: 0,
                diff_png: None,
            });
        }

        let baseline_png = std::fs::read(&baseline_path)?;
        let actual = image::load_from_memory(actual_png)?;

        if Sha256::digest(actual_png) == Sha256::digest(&baseline_png) {
            debug!("Screenshot '{}' matches baseline byte for byte", name);
            let (width, height) = actual.dimensions();
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: width as u64 * height as u64,
                diff_png: None,
            });
        }

        let baseline = image::load_from_memory(&baseline_png)?;
        let (diff_pixels, total_pixels, diff_img) = pixel_diff(&actual, &baseline);

        let diff_percent = if total_pixels == 0 {
            0.0
        } else {
            diff_pixels as f64 / total_pixels as f64 * 100.0
        };
        let matches = diff_percent <= self.threshold;

        let diff_png = if diff_pixels > 0 {
            let mut buf = Vec::new();
            DynamicImage::ImageRgba8(diff_img)
                .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
            Some(buf)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual difference in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
                name, diff_percent, self.threshold
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_png,
        })
    }

    /// Replace the baseline for `name`
    pub fn update_baseline(&self, name: &str, actual_png: &[u8]) -> E2eResult<()> {
        std::fs::write(self.baseline_path(name), actual_png)?;
        info!("Updated baseline for '{}'", name);
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Pixels outside the overlap of differently sized images count as changed
fn pixel_diff(actual: &DynamicImage, baseline: &DynamicImage) -> (u64, u64, RgbaImage) {
    let (aw, ah) = actual.dimensions();
    let (bw, bh) = baseline.dimensions();
    let (width, height) = (aw.max(bw), ah.max(bh));

    let actual = actual.to_rgba8();
    let baseline = baseline.to_rgba8();
    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = (x < aw && y < ah).then(|| actual.get_pixel(x, y));
            let b = (x < bw && y < bh).then(|| baseline.get_pixel(x, y));

            match (a, b) {
                (Some(a), Some(b)) if !pixels_differ(a, b) => {
                    diff_img.put_pixel(x, y, Rgba([a.0[0] / 2, a.0[1] / 2, a.0[2] / 2, 128]));
                }
                _ => {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                }
            }
        }
    }

    (diff_pixels, width as u64 * height as u64, diff_img)
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

/// Baseline file names derive from screenshot names
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Compare scenario screenshots against baselines
    pub enabled: bool,
    pub baseline_dir: PathBuf,
    pub threshold: f64,
    pub auto_update: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            baseline_dir: PathBuf::from("visual-baselines"),
            threshold: 0.5,
            auto_update: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn tester(dir: &std::path::Path, auto_update: bool) -> VisualTester {
        VisualTester::new(&VisualConfig {
            enabled: true,
            baseline_dir: dir.to_path_buf(),
            threshold: 1.0,
            auto_update,
        })
        .unwrap()
    }

    #[test]
    fn missing_baseline_without_auto_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = tester(dir.path(), false)
            .compare_png("Screenshot", &png(4, 4, [0, 0, 0, 255]))
            .unwrap_err();
        assert!(matches!(err, E2eError::BaselineNotFound(_)));
    }

    #[test]
    fn auto_update_records_then_matches() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), true);
        let shot = png(4, 4, [10, 20, 30, 255]);

        assert!(visual.compare_png("Screenshot", &shot).unwrap().matches);
        assert!(dir.path().join("Screenshot.png").exists());

        let again = visual.compare_png("Screenshot", &shot).unwrap();
        assert!(again.matches);
        assert_eq!(again.total_pixels, 16);
        assert!(again.diff_png.is_none());
    }

    #[test]
    fn small_color_drift_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        visual.update_baseline("page", &png(4, 4, [100, 100, 100, 255])).unwrap();

        let diff = visual.compare_png("page", &png(4, 4, [103, 98, 100, 255])).unwrap();
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
    }

    #[test]
    fn changed_pixels_fail_and_produce_diff_image() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        visual.update_baseline("page", &png(4, 4, [0, 0, 0, 255])).unwrap();

        let diff = visual.compare_png("page", &png(4, 4, [255, 255, 255, 255])).unwrap();
        assert!(!diff.matches);
        assert_eq!(diff.diff_pixels, 16);
        assert!((diff.diff_percent - 100.0).abs() < f64::EPSILON);
        assert!(diff.diff_png.is_some());
    }

    #[test]
    fn size_change_counts_extra_area() {
        let dir = tempfile::tempdir().unwrap();
        let visual = tester(dir.path(), false);
        visual.update_baseline("page", &png(2, 2, [0, 0, 0, 255])).unwrap();

        let diff = visual.compare_png("page", &png(4, 2, [0, 0, 0, 255])).unwrap();
        assert_eq!(diff.total_pixels, 8);
        assert_eq!(diff.diff_pixels, 4);
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize("Screenshot after add"), "Screenshot-after-add");
    }
}
