use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_ALLOWED_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "image/gif"];

const PORT_VAR: &str = "IMGSTORE_PORT";
const PUBLIC_URL_VAR: &str = "IMGSTORE_PUBLIC_URL";
const UPLOAD_DIR_VAR: &str = "IMGSTORE_UPLOAD_DIR";
const MAX_FILE_SIZE_VAR: &str = "IMGSTORE_MAX_FILE_SIZE";
const ALLOWED_MIME_TYPES_VAR: &str = "IMGSTORE_ALLOWED_MIME_TYPES";
const DEFAULT_QUALITY_VAR: &str = "IMGSTORE_DEFAULT_QUALITY";

/// Runtime settings of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    /// Base of every URL handed out, without trailing slash
    pub public_url: String,
    pub upload_dir: PathBuf,
    /// Largest accepted upload in bytes
    pub max_file_size: usize,
    pub allowed_mime_types: Vec<String>,
    /// Quality of stored originals and of on-the-fly output without `q`
    pub default_quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            public_url: format!("http://localhost:{DEFAULT_PORT}"),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            default_quality: DEFAULT_QUALITY,
        }
    }
}

impl Settings {
    /// Reads `IMGSTORE_*` variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = parse_or(PORT_VAR, lookup(PORT_VAR), DEFAULT_PORT);
        let public_url = lookup(PUBLIC_URL_VAR)
            .filter(|s| !s.trim().is_empty())
            .map_or_else(
                || format!("http://localhost:{port}"),
                |url| url.trim().trim_end_matches('/').to_owned(),
            );
        let upload_dir = lookup(UPLOAD_DIR_VAR)
            .filter(|s| !s.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR), PathBuf::from);
        let max_file_size = parse_or(
            MAX_FILE_SIZE_VAR,
            lookup(MAX_FILE_SIZE_VAR),
            DEFAULT_MAX_FILE_SIZE,
        );
        let allowed_mime_types = lookup(ALLOWED_MIME_TYPES_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|types| !types.is_empty())
            .unwrap_or_else(|| Self::default().allowed_mime_types);
        let quality: u8 = parse_or(DEFAULT_QUALITY_VAR, lookup(DEFAULT_QUALITY_VAR), DEFAULT_QUALITY);
        let default_quality = quality.clamp(1, 100);
        if default_quality != quality {
            tracing::warn!("{DEFAULT_QUALITY_VAR}={quality} out of range, using {default_quality}");
        }

        Self {
            port,
            public_url,
            upload_dir,
            max_file_size,
            allowed_mime_types,
            default_quality,
        }
    }

    #[must_use]
    pub fn is_allowed_mime_type(&self, mime: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime.trim()))
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(name: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!("cannot parse {name}={raw}, using {default}");
        default
    })
}
