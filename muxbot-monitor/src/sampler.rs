//! Page sampler
//!
//! Extracts the live "concurrent viewers" metric from dashboard page text.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

const METRIC_LABEL: &str = "concurrent viewers";

/// Source of the current metric sample
#[async_trait]
pub trait PageSampler: Send + Sync {
    /// Largest metric sample currently visible, or 0
    async fn sample_current_metric(&self) -> u64;
}

/// Reads the page text from a file on every tick
///
/// The file is rewritten by whatever captures the dashboard; a missing or
/// unreadable file samples as 0.
pub struct SnapshotFileSampler {
    path: PathBuf,
}

impl SnapshotFileSampler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PageSampler for SnapshotFileSampler {
    async fn sample_current_metric(&self) -> u64 {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => largest_metric_sample(&text),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Page snapshot unreadable");
                0
            }
        }
    }
}

/// Scan page text for numbers next to a "concurrent viewers" label
///
/// For every labelled line the neighbouring lines, the whole line and each
/// of its tokens are candidates. Candidates look like `1234`, `12.5k` or
/// `1.2M`. Returns the largest value, or 0 when none is found.
pub fn largest_metric_sample(text: &str) -> u64 {
    let lines: Vec<&str> = text.lines().collect();
    let mut max_found = 0;

    for (index, line) in lines.iter().enumerate() {
        if !line.to_lowercase().contains(METRIC_LABEL) {
            continue;
        }

        let previous = index.checked_sub(1).and_then(|i| lines.get(i));
        let next = lines.get(index + 1);
        let neighbours = previous.into_iter().chain(next).copied();

        let candidates = neighbours
            .chain(std::iter::once(*line))
            .chain(line.split_whitespace());

        for candidate in candidates {
            if let Some(value) = parse_metric(candidate) {
                max_found = max_found.max(value);
            }
        }
    }

    max_found
}

/// Digits with an optional decimal part and an optional `k` or `M` suffix,
/// scaled by the suffix
fn parse_metric(text: &str) -> Option<u64> {
    let text = text.trim();
    let (number, scale) = match text.strip_suffix('k') {
        Some(rest) => (rest, 1_000.0),
        None => match text.strip_suffix('M') {
            Some(rest) => (rest, 1_000_000.0),
            None => (text, 1.0),
        },
    };

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (number, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !fraction.map_or(true, all_digits) {
        return None;
    }

    let value: f64 = number.parse().ok()?;
    Some((value * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_metric_forms() {
        assert_eq!(parse_metric("1234"), Some(1234));
        assert_eq!(parse_metric("12.5k"), Some(12_500));
        assert_eq!(parse_metric("1.2M"), Some(1_200_000));
        assert_eq!(parse_metric(" 7 "), Some(7));
        assert_eq!(parse_metric("1,234"), None);
        assert_eq!(parse_metric("k"), None);
        assert_eq!(parse_metric(".5k"), None);
        assert_eq!(parse_metric("5.k"), None);
        assert_eq!(parse_metric("12K"), None);
        assert_eq!(parse_metric("-3"), None);
    }

    #[test]
    fn test_sample_from_neighbouring_lines() {
        let page = "Overview\n1.2k\nConcurrent Viewers\n980\nViews\n5M";
        assert_eq!(largest_metric_sample(page), 1_200);
    }

    #[test]
    fn test_sample_from_own_tokens() {
        let page = "Peak concurrent viewers 3400 today";
        assert_eq!(largest_metric_sample(page), 3_400);
    }

    #[test]
    fn test_largest_of_several_labels() {
        let page = "concurrent viewers\n120\n---\nCONCURRENT VIEWERS\n45.5k";
        assert_eq!(largest_metric_sample(page), 45_500);
    }

    #[test]
    fn test_no_label_samples_zero() {
        assert_eq!(largest_metric_sample("Views\n1000\nWatch time\n20k"), 0);
        assert_eq!(largest_metric_sample(""), 0);
    }

    #[tokio::test]
    async fn test_snapshot_file_sampler() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Concurrent viewers\n2.5k").unwrap();

        let sampler = SnapshotFileSampler::new(file.path());
        assert_eq!(sampler.sample_current_metric().await, 2_500);
    }

    #[tokio::test]
    async fn test_missing_snapshot_samples_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = SnapshotFileSampler::new(dir.path().join("absent.txt"));
        assert_eq!(sampler.sample_current_metric().await, 0);
    }
}
