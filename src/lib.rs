#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod distance;
pub mod event;
pub mod model;
pub mod sync;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use app::App;
pub use capabilities::{Capabilities, LocationSample};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::Event;
pub use model::{Model, TripPhase, TripSummary, ViewModel};

pub const SNAPSHOT_KEY: &str = "trip_state_v1";
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const JITTER_THRESHOLD_M: f64 = 1.5;
pub const MIN_SPEED_TIME_DELTA_MS: u64 = 1;
pub const SYNC_INTERVAL_MS: u64 = 5_000;
pub const MAX_SYNC_ATTEMPTS: u32 = 3;
pub const SYNC_BASE_BACKOFF_MS: u64 = 1_000;
pub const SYNC_MAX_BACKOFF_MS: u64 = 30_000;
pub const MIN_FUEL_LEVEL_PERCENT: f64 = 0.0;
pub const MAX_FUEL_LEVEL_PERCENT: f64 = 100.0;
pub const DEFAULT_LEDGER_BASE_URL: &str = "https://api.tripgauge.app";
pub const RECONCILE_PATH: &str = "/api/v1/fuel/reconcile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    NotFound,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    Positioning,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Positioning => "POSITIONING_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage
            | Self::Positioning => ErrorSeverity::Transient,

            Self::Serialization | Self::Deserialization | Self::Internal
            | Self::InvalidState => ErrorSeverity::Fatal,

            Self::Validation | Self::NotFound | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage | Self::Positioning
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to reach the fuel service. Tracking continues; sync will retry.".into()
            }
            ErrorKind::Timeout => "The fuel service timed out. Sync will retry.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "This vehicle is not registered with the fuel service.".into(),
            ErrorKind::RateLimited => "Too many requests. Sync will retry shortly.".into(),
            ErrorKind::Storage => {
                "Unable to save trip data locally. Please free up some storage space.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Positioning => {
                "Location signal lost. The trip is paused until GPS is available again.".into()
            }
            ErrorKind::InvalidState => self.message.clone(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, message: Option<String>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        Self::new(kind, message.unwrap_or_else(|| format!("HTTP error: {status}")))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lon: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        haversine_distance(self, other)
    }
}

/// Great-circle distance in meters.
#[must_use]
pub fn haversine_distance(p1: ValidatedCoordinate, p2: ValidatedCoordinate) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (p1.lat - p2.lat).abs() < EPSILON && (p1.lon - p2.lon).abs() < EPSILON {
        return 0.0;
    }

    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().asin();

    let result = EARTH_RADIUS_M * c;

    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct VehicleId(pub String);

impl VehicleId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TripId(pub String);

impl TripId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TripId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ledger_base_url: String,
    pub sync_interval_ms: u64,
    pub jitter_threshold_m: f64,
    pub max_sync_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_base_url: DEFAULT_LEDGER_BASE_URL.into(),
            sync_interval_ms: SYNC_INTERVAL_MS,
            jitter_threshold_m: JITTER_THRESHOLD_M,
            max_sync_attempts: MAX_SYNC_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let parsed = url::Url::parse(&self.ledger_base_url).map_err(|e| {
            AppError::new(
                ErrorKind::Validation,
                format!("invalid ledger base URL: {e}"),
            )
        })?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(AppError::new(
                ErrorKind::Validation,
                format!("invalid ledger URL scheme '{scheme}'"),
            ));
        }

        if parsed.host_str().is_none() {
            return Err(AppError::new(
                ErrorKind::Validation,
                "ledger base URL must have a host",
            ));
        }

        if self.sync_interval_ms == 0 {
            return Err(AppError::new(
                ErrorKind::Validation,
                "sync interval must be positive",
            ));
        }

        if !self.jitter_threshold_m.is_finite() || self.jitter_threshold_m < 0.0 {
            return Err(AppError::new(
                ErrorKind::Validation,
                "jitter threshold must be a non-negative finite number",
            ));
        }

        if self.max_sync_attempts == 0 {
            return Err(AppError::new(
                ErrorKind::Validation,
                "at least one sync attempt is required",
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn reconcile_url(&self) -> String {
        format!(
            "{}{RECONCILE_PATH}",
            self.ledger_base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod coordinate_tests {
        use super::*;

        #[test]
        fn test_valid_coordinates() {
            assert!(ValidatedCoordinate::new(0.0, 0.0).is_ok());
            assert!(ValidatedCoordinate::new(90.0, 180.0).is_ok());
            assert!(ValidatedCoordinate::new(-90.0, -180.0).is_ok());
            assert!(ValidatedCoordinate::new(51.5074, -0.1278).is_ok());
        }

        #[test]
        fn test_invalid_latitude() {
            assert!(matches!(
                ValidatedCoordinate::new(91.0, 0.0),
                Err(CoordinateError::LatitudeOutOfRange(_))
            ));
            assert!(matches!(
                ValidatedCoordinate::new(-91.0, 0.0),
                Err(CoordinateError::LatitudeOutOfRange(_))
            ));
        }

        #[test]
        fn test_invalid_longitude() {
            assert!(matches!(
                ValidatedCoordinate::new(0.0, 181.0),
                Err(CoordinateError::LongitudeOutOfRange(_))
            ));
        }

        #[test]
        fn test_non_finite_coordinates() {
            assert!(matches!(
                ValidatedCoordinate::new(f64::NAN, 0.0),
                Err(CoordinateError::NonFinite)
            ));
            assert!(matches!(
                ValidatedCoordinate::new(0.0, f64::INFINITY),
                Err(CoordinateError::NonFinite)
            ));
        }
    }

    mod distance_tests {
        use super::*;

        #[test]
        fn test_same_point_distance() {
            let p = ValidatedCoordinate::new(51.5074, -0.1278).unwrap();
            assert_eq!(haversine_distance(p, p), 0.0);
        }

        #[test]
        fn test_near_zero_distance() {
            let p1 = ValidatedCoordinate::new(51.5074, -0.1278).unwrap();
            let p2 = ValidatedCoordinate::new(51.5074000001, -0.1278000001).unwrap();
            assert!(haversine_distance(p1, p2) < 1.0);
        }

        #[test]
        fn test_london_paris_distance() {
            let london = ValidatedCoordinate::new(51.5074, -0.1278).unwrap();
            let paris = ValidatedCoordinate::new(48.8566, 2.3522).unwrap();
            let distance = haversine_distance(london, paris);
            assert!((distance - 343_500.0).abs() < 10_000.0);
        }

        #[test]
        fn test_one_degree_of_latitude() {
            let p1 = ValidatedCoordinate::new(45.0, 7.0).unwrap();
            let p2 = ValidatedCoordinate::new(46.0, 7.0).unwrap();
            let distance = haversine_distance(p1, p2);
            assert!((distance - 111_195.0).abs() < 500.0);
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_format_distance_meters() {
            assert_eq!(format_distance(0.0), "0 m");
            assert_eq!(format_distance(500.0), "500 m");
            assert_eq!(format_distance(999.0), "999 m");
        }

        #[test]
        fn test_format_distance_kilometers() {
            assert_eq!(format_distance(1000.0), "1.0 km");
            assert_eq!(format_distance(1500.0), "1.5 km");
            assert_eq!(format_distance(15000.0), "15 km");
        }

        #[test]
        fn test_format_distance_invalid() {
            assert_eq!(format_distance(f64::NAN), "Unknown");
            assert_eq!(format_distance(-100.0), "Unknown");
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_http_status_mapping() {
            assert_eq!(AppError::from_http_status(400, None).kind, ErrorKind::Validation);
            assert_eq!(AppError::from_http_status(404, None).kind, ErrorKind::NotFound);
            assert_eq!(AppError::from_http_status(429, None).kind, ErrorKind::RateLimited);
            assert_eq!(AppError::from_http_status(500, None).kind, ErrorKind::Internal);
            assert_eq!(AppError::from_http_status(503, None).kind, ErrorKind::Internal);
        }

        #[test]
        fn test_retryable_follows_kind_and_severity() {
            let transient = AppError::new(ErrorKind::Network, "offline");
            assert!(transient.is_retryable());

            let fatal = AppError::new(ErrorKind::Network, "offline")
                .with_severity(ErrorSeverity::Fatal);
            assert!(!fatal.is_retryable());

            let rejected = AppError::new(ErrorKind::Validation, "bad vehicle id");
            assert!(!rejected.is_retryable());
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_default_config_is_valid() {
            assert!(EngineConfig::default().validate().is_ok());
        }

        #[test]
        fn test_rejects_bad_scheme() {
            let config = EngineConfig {
                ledger_base_url: "ftp://ledger.example.com".into(),
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_rejects_unparseable_url() {
            let config = EngineConfig {
                ledger_base_url: "not a url".into(),
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_rejects_zero_interval() {
            let config = EngineConfig {
                sync_interval_ms: 0,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_reconcile_url_joins_without_double_slash() {
            let config = EngineConfig {
                ledger_base_url: "https://ledger.example.com/".into(),
                ..EngineConfig::default()
            };
            assert_eq!(
                config.reconcile_url(),
                "https://ledger.example.com/api/v1/fuel/reconcile"
            );
        }
    }
}
