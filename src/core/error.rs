//! Error types for ahn-dl
//!
//! Every failure a run can hit is one of these variants. Validation errors are
//! raised before any network or disk work starts; transfer and I/O errors abort
//! the whole run.

use std::fmt;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Main error type for ahn-dl operations
#[derive(Debug)]
pub enum Error {
    /// Base URL is missing a scheme, host or path
    InvalidUrl(String),

    /// Region name did not match any row of the region table
    RegionNotFound {
        name: String,
        suggestion: Option<String>,
    },

    /// Polygon has a zero-area bounding box
    DegeneratePolygon(String),

    /// Holed or multi-part polygon where a single exterior ring is required
    UnsupportedGeometry(String),

    /// Conflicting or out-of-range options
    InvalidConfiguration(String),

    /// The area of interest resolved to zero tiles
    NoTiles(String),

    /// Remote tile could not be transferred
    TransferFailure { url: String, reason: String },

    /// Connection or timeout failure, retried before becoming a transfer failure
    Network(String),

    /// Staging or output file error
    Io(std::io::Error),

    /// LAS/LAZ decoding or encoding error
    PointCloud(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUrl(url) => write!(f, "Invalid URL: '{url}'"),
            Error::RegionNotFound { name, suggestion } => match suggestion {
                Some(s) => write!(f, "Region '{name}' not found. Did you mean '{s}'?"),
                None => write!(f, "Region '{name}' not found"),
            },
            Error::DegeneratePolygon(msg) => write!(f, "Degenerate polygon: {msg}"),
            Error::UnsupportedGeometry(msg) => write!(f, "Unsupported geometry: {msg}"),
            Error::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            Error::NoTiles(area) => write!(f, "No tiles intersect {area}"),
            Error::TransferFailure { url, reason } => {
                write!(f, "Transfer of {url} failed: {reason}")
            }
            Error::Network(msg) => write!(f, "Network error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::PointCloud(msg) => write!(f, "Point cloud error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::Network(err.to_string())
        } else {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            Error::TransferFailure {
                url,
                reason: err.to_string(),
            }
        }
    }
}

impl From<las::Error> for Error {
    fn from(err: las::Error) -> Self {
        Error::PointCloud(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}

/// Convenience result type for ahn-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimum blended similarity for a region name to be offered as a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Suggest the closest known region name for a misspelled one.
///
/// Scores are 70% Jaro-Winkler plus 30% normalized Levenshtein on the
/// lowercased names. Returns `None` for exact (case-insensitive) matches and
/// when nothing clears the threshold.
pub fn suggest_region<'a, I>(name: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted = name.to_lowercase();
    let mut best: Option<(&str, f64)> = None;

    for candidate in candidates {
        let lower = candidate.to_lowercase();
        if lower == wanted {
            return None;
        }
        let score =
            jaro_winkler(&wanted, &lower) * 0.7 + normalized_levenshtein(&wanted, &lower) * 0.3;
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }

    best.map(|(c, _)| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CITIES: [&str; 5] = ["Delft", "Westervoort", "Rotterdam", "Den Haag", "Amsterdam"];

    #[test]
    fn test_suggest_region_typos() {
        assert_eq!(suggest_region("Delf", CITIES), Some("Delft".to_string()));
        assert_eq!(suggest_region("rotterdm", CITIES), Some("Rotterdam".to_string()));
        assert_eq!(suggest_region("westervort", CITIES), Some("Westervoort".to_string()));
    }

    #[test]
    fn test_suggest_region_exact_match_needs_no_suggestion() {
        assert_eq!(suggest_region("delft", CITIES), None);
        assert_eq!(suggest_region("AMSTERDAM", CITIES), None);
    }

    #[test]
    fn test_suggest_region_no_match() {
        assert_eq!(suggest_region("totally-unknown-place", CITIES), None);
        assert_eq!(suggest_region("Delft", std::iter::empty()), None);
    }

    #[test]
    fn test_region_not_found_display() {
        let err = Error::RegionNotFound {
            name: "Delf".to_string(),
            suggestion: Some("Delft".to_string()),
        };
        assert_eq!(err.to_string(), "Region 'Delf' not found. Did you mean 'Delft'?");

        let err = Error::RegionNotFound {
            name: "Nowhere".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "Region 'Nowhere' not found");
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
        assert!(Error::NoTiles("bbox".into()).source().is_none());
    }
}
