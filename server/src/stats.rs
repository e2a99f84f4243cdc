use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Local};
use kernel::{FolderStats, Stats};

use crate::scanner::ImageRecord;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Reduces an unfiltered scan of the whole store into usage figures.
///
/// Counts only originals, sizes include derivatives. `this_month` counts
/// originals created in the calendar month of `now`.
#[must_use]
pub fn aggregate(records: &[ImageRecord], now: DateTime<Local>) -> Stats {
    let mut stats = Stats::default();
    let mut folders: BTreeMap<String, FolderStats> = BTreeMap::new();

    for record in records {
        let folder = folders.entry(record.folder.clone()).or_default();
        folder.size += record.size;
        stats.total_size += record.size;

        if record.is_derivative() {
            continue;
        }
        folder.count += 1;
        stats.total_images += 1;
        if record.created.year() == now.year() && record.created.month() == now.month() {
            stats.this_month += 1;
        }
    }

    stats.folders = folders;
    stats.total_size_human = human_size(stats.total_size);
    stats
}

/// Formats a byte count with 1024 based units and at most two decimals.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_owned();
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kernel::Dimensions;
    use rstest::rstest;

    fn record(relative_path: &str, size: u64, created: DateTime<Local>) -> ImageRecord {
        let (folder, _) = relative_path.split_once('/').unwrap();
        ImageRecord {
            file_name: relative_path.rsplit('/').next().unwrap().to_owned(),
            relative_path: relative_path.to_owned(),
            folder: folder.to_owned(),
            size,
            created,
            dimensions: Dimensions::default(),
        }
    }

    fn at(year: i32, month: u32, day: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
    }

    #[rstest]
    #[case(0, "0 B")]
    #[case(1, "1 B")]
    #[case(1023, "1023 B")]
    #[case(1024, "1 KB")]
    #[case(1536, "1.5 KB")]
    #[case(1_048_576, "1 MB")]
    #[case(1_234_567, "1.18 MB")]
    #[case(5 * 1024 * 1024 * 1024, "5 GB")]
    #[case(3 * 1024 * 1024 * 1024 * 1024 * 1024, "3072 TB")]
    #[trace]
    fn human_size_cases(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(human_size(bytes), expected);
    }

    #[test]
    fn aggregate_empty() {
        // Act
        let stats = aggregate(&[], at(2026, 3, 1));

        // Assert
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.total_size_human, "0 B");
        assert_eq!(stats.this_month, 0);
        assert!(stats.folders.is_empty());
    }

    #[test]
    fn aggregate_counts_originals_and_sizes_everything() {
        // Arrange
        let now = at(2026, 3, 15);
        let records = vec![
            record("blog/2026/03/1-a.webp", 1000, at(2026, 3, 2)),
            record("blog/2026/03/1-a-thumb.webp", 100, at(2026, 3, 2)),
            record("blog/2026/03/1-a-small.webp", 300, at(2026, 3, 2)),
            record("blog/2025/03/2-b.webp", 500, at(2025, 3, 9)),
            record("news/2026/02/3-c.webp", 2000, at(2026, 2, 28)),
        ];

        // Act
        let stats = aggregate(&records, now);

        // Assert
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.total_size, 3900);
        assert_eq!(stats.this_month, 1);
        assert_eq!(stats.folders["blog"], FolderStats { count: 2, size: 1900 });
        assert_eq!(stats.folders["news"], FolderStats { count: 1, size: 2000 });
    }

    #[test]
    fn aggregate_folder_with_only_derivatives_has_zero_count() {
        // Arrange
        let records = vec![record("orphans/x-thumb.webp", 42, at(2026, 1, 1))];

        // Act
        let stats = aggregate(&records, at(2026, 1, 2));

        // Assert
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.folders["orphans"], FolderStats { count: 0, size: 42 });
    }
}
