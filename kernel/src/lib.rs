#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result of a successful upload.
///
/// URLs point at the three stored derivatives. `size` is the on-disk size of the
/// optimized original, `width` is capped at 1200 for display purposes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResult {
    /// Public URL of the optimized original
    pub url: String,
    /// Public URL of the 300x300 thumbnail
    pub thumbnail: String,
    /// Public URL of the small (600px bound) variant
    pub small: String,
    /// Size of the stored original in bytes
    pub size: u64,
    pub width: u32,
    pub height: u32,
    /// Sanitized folder the image was stored in
    pub folder: String,
    /// File name of the original, `{millis}-{id}.webp`
    pub filename: String,
    /// Path relative to the upload root, always `/` separated
    pub path: String,
}

/// Pixel dimensions of an image. Zero when the image could not be probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Stored original as seen by a directory scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    pub path: String,
    pub url: String,
    pub thumbnail: String,
    pub small: String,
    pub size: u64,
    /// ISO 8601 creation time in UTC
    pub created_at: String,
    pub folder: String,
    pub filename: String,
    pub dimensions: Dimensions,
}

/// Page description returned along with a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-indexed page number
    pub page: usize,
    pub limit: usize,
    /// Number of originals matching the query
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ImageList {
    pub images: Vec<ImageItem>,
    pub pagination: Pagination,
}

/// Per folder usage. `count` covers originals only while `size` includes derivatives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FolderStats {
    pub count: usize,
    pub size: u64,
}

/// Aggregated usage of the whole upload root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Number of stored originals
    pub total_images: usize,
    /// Bytes used by all files including derivatives
    pub total_size: u64,
    /// `total_size` formatted for humans, e.g. `1.5 MB`
    pub total_size_human: String,
    pub folders: BTreeMap<String, FolderStats>,
    /// Originals created in the current calendar month
    pub this_month: usize,
}

/// Result of a delete operation listing every removed relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
}

/// Error payload returned by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine readable code, e.g. `FILE_NOT_FOUND`
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Health {
    pub status: String,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
}

/// Listing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest first
    #[default]
    Date,
    /// Largest first
    Size,
    /// File name ascending
    Name,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(SortOrder::Date),
            "size" => Ok(SortOrder::Size),
            "name" => Ok(SortOrder::Name),
            other => Err(format!("unknown sort order '{other}', expected one of: date, size, name")),
        }
    }
}

/// Resize policy applied when both or one of the target dimensions are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Crop to fill the box, centered
    Cover,
    /// Shrink within the box and letterbox the rest
    Contain,
    /// Stretch to the box ignoring aspect ratio
    Fill,
    /// Shrink within the box preserving aspect ratio
    #[default]
    Inside,
    /// Cover the box preserving aspect ratio without cropping
    Outside,
}

impl Fit {
    pub const ALL: [Fit; 5] = [Fit::Cover, Fit::Contain, Fit::Fill, Fit::Inside, Fit::Outside];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Fit::Cover => "cover",
            Fit::Contain => "contain",
            Fit::Fill => "fill",
            Fit::Inside => "inside",
            Fit::Outside => "outside",
        }
    }
}

impl fmt::Display for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Fit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fit::ALL
            .into_iter()
            .find(|fit| fit.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Fit::ALL.iter().map(|f| f.as_str()).collect();
                format!("parameter \"fit\" must be one of: {}", valid.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cover", Fit::Cover)]
    #[case("contain", Fit::Contain)]
    #[case("fill", Fit::Fill)]
    #[case("inside", Fit::Inside)]
    #[case("outside", Fit::Outside)]
    #[trace]
    fn fit_from_str(#[case] input: &str, #[case] expected: Fit) {
        // Act
        let fit: Fit = input.parse().unwrap();

        // Assert
        assert_eq!(fit, expected);
        assert_eq!(fit.to_string(), input);
    }

    #[rstest]
    #[case("")]
    #[case("Cover")]
    #[case("stretch")]
    fn fit_from_str_invalid(#[case] input: &str) {
        // Act
        let result = input.parse::<Fit>();

        // Assert
        assert!(result.is_err());
    }

    #[rstest]
    #[case("date", SortOrder::Date)]
    #[case("size", SortOrder::Size)]
    #[case("name", SortOrder::Name)]
    fn sort_order_from_str(#[case] input: &str, #[case] expected: SortOrder) {
        // Act
        let order: SortOrder = input.parse().unwrap();

        // Assert
        assert_eq!(order, expected);
    }

    #[test]
    fn stats_serialized_in_camel_case() {
        // Arrange
        let mut stats = Stats {
            total_images: 1,
            total_size: 30,
            total_size_human: "30 B".to_owned(),
            this_month: 1,
            ..Default::default()
        };
        stats.folders.insert("blog".to_owned(), FolderStats { count: 1, size: 30 });

        // Act
        let json = serde_json::to_value(&stats).unwrap();

        // Assert
        assert_eq!(json["totalImages"], 1);
        assert_eq!(json["totalSize"], 30);
        assert_eq!(json["thisMonth"], 1);
        assert_eq!(json["folders"]["blog"]["count"], 1);
        assert_eq!(json["folders"]["blog"]["size"], 30);
    }

    #[test]
    fn pagination_serialized_in_camel_case() {
        // Arrange
        let pagination = Pagination {
            page: 1,
            limit: 5,
            total: 7,
            total_pages: 2,
        };

        // Act
        let json = serde_json::to_value(pagination).unwrap();

        // Assert
        assert_eq!(json["totalPages"], 2);
    }
}
