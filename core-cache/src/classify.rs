//! Request classification
//!
//! Every cacheable request is routed to one traffic class. The class decides
//! which container holds the payload, which byte budget applies, and which
//! strategy serves the request the first time its URL is seen.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Relative URLs are resolved against this origin before parsing.
const PLACEHOLDER_ORIGIN: &str = "http://localhost/";

const STATIC_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot", "wasm", "webmanifest"];

const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "bmp", // images
    "mp3", "wav", "ogg", "m4a", "aac", "flac", // audio
    "mp4", "webm", "mov", "m4v", // video
];

/// Content-hashed bundle names such as `app.3f9a1c2e.css` or `main-0a1b2c3d4e.js`.
const HASHED_ASSET_PATTERN: &str = r"(?i)[.-][0-9a-f]{8,}\.(?:js|css)$";

/// Traffic class of a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheClass {
    /// Fonts, wasm modules and content-hashed bundles
    Static,
    /// Pages and anything not matched elsewhere
    Dynamic,
    /// Images, audio and video
    Images,
    /// JSON API responses
    Api,
}

impl CacheClass {
    pub const ALL: [CacheClass; 4] = [
        CacheClass::Static,
        CacheClass::Dynamic,
        CacheClass::Images,
        CacheClass::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::Static => "STATIC",
            CacheClass::Dynamic => "DYNAMIC",
            CacheClass::Images => "IMAGES",
            CacheClass::Api => "API",
        }
    }

    /// Suffix appended to the namespace to form the container name.
    pub fn container_suffix(&self) -> &'static str {
        match self {
            CacheClass::Static => "static",
            CacheClass::Dynamic => "dynamic",
            CacheClass::Images => "images",
            CacheClass::Api => "api",
        }
    }

    pub fn default_strategy(&self) -> CacheStrategy {
        match self {
            CacheClass::Static => CacheStrategy::CacheFirst,
            CacheClass::Api | CacheClass::Dynamic => CacheStrategy::NetworkFirst,
            CacheClass::Images => CacheStrategy::StaleWhileRevalidate,
        }
    }
}

impl fmt::Display for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheClass {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        CacheClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CacheError::InvalidConfig(format!("Unknown cache class: {}", s)))
    }
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Serve from cache when present; network only on a miss.
    CacheFirst,
    /// Try the network; fall back to the cached copy when it fails.
    NetworkFirst,
    /// Serve the cached copy immediately and refresh it in the background.
    StaleWhileRevalidate,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::CacheFirst => "cache-first",
            CacheStrategy::NetworkFirst => "network-first",
            CacheStrategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps request URLs onto traffic classes.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    api_segments: Vec<String>,
    hashed_asset: Regex,
}

impl RequestClassifier {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            api_segments: config
                .api_segments
                .iter()
                .map(|segment| segment.to_ascii_lowercase())
                .collect(),
            hashed_asset: Regex::new(HASHED_ASSET_PATTERN)?,
        })
    }

    /// Classify a URL. Never fails: anything unparseable is `Dynamic`.
    pub fn classify(&self, url: &str) -> CacheClass {
        let Some(path) = Self::parse_path(url) else {
            return CacheClass::Dynamic;
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let file_name = segments.last().copied().unwrap_or("");
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        if let Some(ext) = extension.as_deref() {
            if STATIC_EXTENSIONS.contains(&ext) {
                return CacheClass::Static;
            }
        }
        if self.hashed_asset.is_match(file_name) {
            return CacheClass::Static;
        }

        if segments.iter().any(|segment| {
            self.api_segments
                .iter()
                .any(|api| segment.eq_ignore_ascii_case(api))
        }) {
            return CacheClass::Api;
        }

        match extension.as_deref() {
            Some(ext) if MEDIA_EXTENSIONS.contains(&ext) => CacheClass::Images,
            _ => CacheClass::Dynamic,
        }
    }

    fn parse_path(url: &str) -> Option<String> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(PLACEHOLDER_ORIGIN).ok()?.join(url).ok()?
            }
            Err(_) => return None,
        };
        Some(parsed.path().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(&CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_static_assets() {
        let c = classifier();
        assert_eq!(c.classify("/fonts/inter.woff2"), CacheClass::Static);
        assert_eq!(c.classify("/pkg/engine_bg.wasm"), CacheClass::Static);
        assert_eq!(c.classify("/site.webmanifest"), CacheClass::Static);
        assert_eq!(c.classify("/assets/app.3f9a1c2e.css"), CacheClass::Static);
        assert_eq!(
            c.classify("https://cdn.example.com/js/main-0a1b2c3d4e5f.js?v=2"),
            CacheClass::Static
        );
    }

    #[test]
    fn test_unhashed_bundles_are_dynamic() {
        let c = classifier();
        assert_eq!(c.classify("/js/main.js"), CacheClass::Dynamic);
        assert_eq!(c.classify("/css/theme-dark.css"), CacheClass::Dynamic);
    }

    #[test]
    fn test_api_segment() {
        let c = classifier();
        assert_eq!(c.classify("/api/posts"), CacheClass::Api);
        assert_eq!(c.classify("https://example.com/v2/API/users/7"), CacheClass::Api);
        // Only a whole segment counts
        assert_eq!(c.classify("/apiary/bees"), CacheClass::Dynamic);
        // An image served from under the API stays an API response
        assert_eq!(c.classify("/api/avatars/1.png"), CacheClass::Api);
    }

    #[test]
    fn test_media() {
        let c = classifier();
        assert_eq!(c.classify("/img/hero.WEBP"), CacheClass::Images);
        assert_eq!(c.classify("/media/episode.mp3"), CacheClass::Images);
        assert_eq!(c.classify("/media/trailer.mp4"), CacheClass::Images);
    }

    #[test]
    fn test_fallback_and_unparseable() {
        let c = classifier();
        assert_eq!(c.classify("/dashboard"), CacheClass::Dynamic);
        assert_eq!(c.classify(""), CacheClass::Dynamic);
        assert_eq!(c.classify("http://[::1"), CacheClass::Dynamic);
    }

    #[test]
    fn test_custom_api_segments() {
        let config = CacheConfig::default().with_api_segments(vec!["graphql".to_string()]);
        let c = RequestClassifier::new(&config).unwrap();
        assert_eq!(c.classify("/graphql"), CacheClass::Api);
        assert_eq!(c.classify("/api/posts"), CacheClass::Dynamic);
    }

    #[test]
    fn test_class_defaults() {
        assert_eq!(CacheClass::Static.default_strategy(), CacheStrategy::CacheFirst);
        assert_eq!(CacheClass::Api.default_strategy(), CacheStrategy::NetworkFirst);
        assert_eq!(CacheClass::Dynamic.default_strategy(), CacheStrategy::NetworkFirst);
        assert_eq!(
            CacheClass::Images.default_strategy(),
            CacheStrategy::StaleWhileRevalidate
        );
        assert_eq!("images".parse::<CacheClass>().unwrap(), CacheClass::Images);
        assert!("thumbnails".parse::<CacheClass>().is_err());
        assert_eq!(CacheStrategy::StaleWhileRevalidate.to_string(), "stale-while-revalidate");
    }
}
