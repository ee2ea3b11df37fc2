use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::distance::DistanceAccumulator;
use crate::sync::{SyncAttempt, SyncOutcome};
use crate::{
    AppError, EngineConfig, ErrorKind, TripId, UnixTimeMs, VehicleId,
    MAX_FUEL_LEVEL_PERCENT, MIN_FUEL_LEVEL_PERCENT, SNAPSHOT_SCHEMA_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripAction {
    Start,
    Pause,
    Resume,
    Stop,
    LogMaintenance,
}

impl TripAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::LogMaintenance => "log_maintenance",
        }
    }
}

impl fmt::Display for TripAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    #[default]
    Idle,
    Tracking,
    Paused,
    Stopped,
}

impl TripPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Tracking => "tracking",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// A trip is live in both states; distance only accrues while
    /// `Tracking`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Tracking | Self::Paused)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// A finalized trip is discarded wholesale by the next start, so
    /// `Start` is allowed from `Stopped` as well as `Idle`.
    #[must_use]
    pub const fn permits(self, action: TripAction) -> bool {
        match action {
            TripAction::Start => matches!(self, Self::Idle | Self::Stopped),
            TripAction::Pause => matches!(self, Self::Tracking),
            TripAction::Resume => matches!(self, Self::Paused),
            TripAction::Stop | TripAction::LogMaintenance => {
                matches!(self, Self::Tracking | Self::Paused)
            }
        }
    }

    pub fn validate(self, action: TripAction) -> Result<(), InvalidTransition> {
        if self.permits(action) {
            Ok(())
        } else {
            Err(InvalidTransition {
                attempted: action,
                phase: self,
            })
        }
    }
}

impl fmt::Display for TripPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle method was called from a phase that does not permit it.
/// Always a caller bug; surfaced immediately, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot {attempted} while trip is {phase}")]
pub struct InvalidTransition {
    pub attempted: TripAction,
    pub phase: TripPhase,
}

impl From<InvalidTransition> for AppError {
    fn from(e: InvalidTransition) -> Self {
        AppError::new(ErrorKind::InvalidState, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceKind {
    Refuel,
    OilChange,
    TuneUp,
    Other,
}

impl MaintenanceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Refuel => "refuel",
            Self::OilChange => "oil_change",
            Self::TuneUp => "tune_up",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One maintenance action logged mid-trip. Created by the UI layer,
/// never mutated afterwards; owned by the trip until stop, then carried
/// by the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceEntry {
    pub kind: MaintenanceKind,
    pub timestamp: UnixTimeMs,
    pub cost_minor_units: Option<i64>,
    pub quantity_liters: Option<f64>,
    pub price_per_liter_minor_units: Option<i64>,
    /// Fuel gauge reading after the action. Required for refuels, which
    /// update the live fuel level without waiting for the next sync.
    pub resulting_fuel_level_percent: Option<f64>,
    pub notes: Option<String>,
}

impl MaintenanceEntry {
    #[must_use]
    pub fn refuel(timestamp: UnixTimeMs, resulting_fuel_level_percent: f64) -> Self {
        Self {
            kind: MaintenanceKind::Refuel,
            timestamp,
            cost_minor_units: None,
            quantity_liters: None,
            price_per_liter_minor_units: None,
            resulting_fuel_level_percent: Some(resulting_fuel_level_percent),
            notes: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.kind == MaintenanceKind::Refuel {
            let Some(level) = self.resulting_fuel_level_percent else {
                return Err(AppError::new(
                    ErrorKind::Validation,
                    "a refuel must report the resulting fuel level",
                ));
            };
            if !level.is_finite()
                || !(MIN_FUEL_LEVEL_PERCENT..=MAX_FUEL_LEVEL_PERCENT).contains(&level)
            {
                return Err(AppError::new(
                    ErrorKind::Validation,
                    format!("resulting fuel level {level} is outside [0, 100]"),
                ));
            }
        }

        if let Some(quantity) = self.quantity_liters {
            if !quantity.is_finite() || quantity < 0.0 {
                return Err(AppError::new(
                    ErrorKind::Validation,
                    format!("quantity {quantity} liters is invalid"),
                ));
            }
        }

        if self.cost_minor_units.is_some_and(|c| c < 0) {
            return Err(AppError::new(ErrorKind::Validation, "cost cannot be negative"));
        }

        if self.price_per_liter_minor_units.is_some_and(|p| p < 0) {
            return Err(AppError::new(
                ErrorKind::Validation,
                "price per liter cannot be negative",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Completed,
    Cancelled,
}

/// The mutable record of one trip. Exactly one instance is live at a
/// time; a new start replaces it after the previous one was finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TripState {
    pub trip_id: TripId,
    pub vehicle_id: VehicleId,
    pub phase: TripPhase,
    pub total_distance_km: f64,
    /// Last figure acknowledged by the ledger. Advances only on an
    /// `Applied` sync outcome, never optimistically.
    pub last_posted_km: f64,
    pub starting_fuel_level_percent: f64,
    pub fuel_level_percent: f64,
    pub fuel_consumed_percent: f64,
    /// Latched once the ledger reports low fuel; cleared only by a
    /// refuel entry.
    pub low_fuel_warning: bool,
    pub started_at: UnixTimeMs,
    pub stopped_at: Option<UnixTimeMs>,
    pub last_sync_attempt: Option<UnixTimeMs>,
    /// Insertion order is chronological order; append-only.
    pub maintenance: Vec<MaintenanceEntry>,
}

impl TripState {
    #[must_use]
    pub fn new(vehicle_id: VehicleId, initial_fuel_level_percent: f64, now: UnixTimeMs) -> Self {
        let fuel = initial_fuel_level_percent.clamp(MIN_FUEL_LEVEL_PERCENT, MAX_FUEL_LEVEL_PERCENT);
        Self {
            trip_id: TripId::generate(),
            vehicle_id,
            phase: TripPhase::Tracking,
            total_distance_km: 0.0,
            last_posted_km: 0.0,
            starting_fuel_level_percent: fuel,
            fuel_level_percent: fuel,
            fuel_consumed_percent: 0.0,
            low_fuel_warning: false,
            started_at: now,
            stopped_at: None,
            last_sync_attempt: None,
            maintenance: Vec::new(),
        }
    }

    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Distance accrues only while tracking; the total never decreases.
    pub fn record_distance(&mut self, delta_km: f64) {
        if self.phase == TripPhase::Tracking && delta_km.is_finite() && delta_km > 0.0 {
            self.total_distance_km += delta_km;
        }
    }

    /// Fold a confirmed `Applied` outcome. `posted_km` is the figure
    /// that was on the wire, not the current total, so distance gathered
    /// while the request was in flight stays unposted.
    pub fn apply_sync(&mut self, posted_km: f64, new_fuel_level_percent: f64, low_fuel: bool) {
        let level = new_fuel_level_percent.clamp(MIN_FUEL_LEVEL_PERCENT, MAX_FUEL_LEVEL_PERCENT);
        let burned = (self.fuel_level_percent - level).max(0.0);

        self.fuel_consumed_percent += burned;
        self.fuel_level_percent = level;
        self.low_fuel_warning = self.low_fuel_warning || low_fuel;
        self.last_posted_km = posted_km;
    }

    pub fn apply_refuel(&mut self, entry: &MaintenanceEntry) {
        if let Some(level) = entry.resulting_fuel_level_percent {
            self.fuel_level_percent =
                level.clamp(MIN_FUEL_LEVEL_PERCENT, MAX_FUEL_LEVEL_PERCENT);
            self.low_fuel_warning = false;
        }
    }

    #[must_use]
    pub fn unposted_km(&self) -> f64 {
        (self.total_distance_km - self.last_posted_km).max(0.0)
    }

    #[must_use]
    pub fn duration_ms(&self, now: UnixTimeMs) -> u64 {
        self.stopped_at
            .unwrap_or(now)
            .elapsed_since(self.started_at)
    }

    #[must_use]
    pub fn average_speed_kmh(&self, now: UnixTimeMs) -> f64 {
        let hours = self.duration_ms(now) as f64 / 3_600_000.0;
        if hours > 0.0 {
            self.total_distance_km / hours
        } else {
            0.0
        }
    }

    /// Pure data assembly; no I/O happens here.
    #[must_use]
    pub fn finalize(&self, stopped_at: UnixTimeMs, status: TripStatus) -> TripSummary {
        TripSummary {
            trip_id: self.trip_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            status,
            started_at: self.started_at,
            stopped_at,
            duration_ms: stopped_at.elapsed_since(self.started_at),
            total_distance_km: self.total_distance_km,
            average_speed_kmh: self.average_speed_kmh(stopped_at),
            fuel_consumed_percent: self.fuel_consumed_percent,
            final_fuel_level_percent: self.fuel_level_percent,
            low_fuel_warning: self.low_fuel_warning,
            maintenance: self.maintenance.clone(),
        }
    }
}

/// Immutable snapshot handed to the UI/storage layer at stop time. The
/// engine keeps no reference to it once acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: TripId,
    pub vehicle_id: VehicleId,
    pub status: TripStatus,
    pub started_at: UnixTimeMs,
    pub stopped_at: UnixTimeMs,
    pub duration_ms: u64,
    pub total_distance_km: f64,
    pub average_speed_kmh: f64,
    pub fuel_consumed_percent: f64,
    pub final_fuel_level_percent: f64,
    pub low_fuel_warning: bool,
    pub maintenance: Vec<MaintenanceEntry>,
}

/// The persisted subset of engine state, for crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub schema_version: u32,
    pub trip: TripState,
}

impl TripSnapshot {
    #[must_use]
    pub fn new(trip: TripState) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            trip,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer).map_err(|e| {
            AppError::new(ErrorKind::Serialization, "failed to encode trip snapshot")
                .with_internal(e.to_string())
        })?;
        Ok(buffer)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        ciborium::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
            AppError::new(ErrorKind::Deserialization, "failed to decode trip snapshot")
                .with_internal(e.to_string())
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub config: EngineConfig,
    pub trip: TripState,
    pub accumulator: DistanceAccumulator,
    /// Bumped on every start and stop; tags the live trip's timer,
    /// subscription and sync traffic so stale callbacks are discarded.
    pub generation: u64,
    pub sync_in_flight: Option<SyncAttempt>,
    pub last_outcome: Option<SyncOutcome>,
    /// False for a crash-restored trip until resume restarts the
    /// scheduler.
    pub scheduler_running: bool,
    pub positioning_lost: bool,
    pub completed: Option<TripSummary>,
    pub active_error: Option<AppError>,
    pub now_ms: u64,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    #[must_use]
    pub fn sync_indicator(&self) -> SyncIndicator {
        match (&self.sync_in_flight, &self.last_outcome) {
            (Some(attempt), _) => SyncIndicator::Syncing {
                attempt: attempt.attempt,
            },
            (None, Some(SyncOutcome::Failed { kind })) => {
                if kind.is_retryable() {
                    SyncIndicator::WillRetry
                } else {
                    SyncIndicator::Failed
                }
            }
            (None, Some(_)) => SyncIndicator::Synced,
            (None, None) => SyncIndicator::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncIndicator {
    Idle,
    Syncing { attempt: u32 },
    Synced,
    /// Passive "will retry" state; never blocks pause or stop.
    WillRetry,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

/// What the UI observes: the live trip figures plus enough context to
/// render sync health and the finished-trip hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub phase: TripPhase,
    pub total_distance_km: f64,
    pub distance_text: String,
    pub current_speed_kmh: f64,
    pub fuel_level_percent: f64,
    pub low_fuel_warning: bool,
    pub sync: SyncIndicator,
    pub positioning_lost: bool,
    pub duration_ms: u64,
    pub maintenance_count: usize,
    pub summary: Option<TripSummary>,
    pub error: Option<UserFacingError>,
}
