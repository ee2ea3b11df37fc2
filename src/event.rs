use serde::{Deserialize, Serialize};

use crate::capabilities::LocationSample;
use crate::model::MaintenanceEntry;
use crate::sync::{ReconcileResponse, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Noop,

    /// Fired once by the shell when the app process comes up; triggers
    /// crash recovery from the snapshot store.
    AppStarted,

    TripStartRequested {
        vehicle_id: String,
        initial_fuel_level_percent: f64,
    },
    TripPauseRequested,
    TripResumeRequested,
    TripStopRequested,
    TripCancelRequested,
    MaintenanceLogged(MaintenanceEntry),
    /// The UI has taken ownership of the finished trip's summary.
    TripSummaryAcknowledged,
    DismissError,

    PositionReceived(LocationSample),
    PositioningFailed {
        reason: String,
    },

    SyncTick {
        generation: u64,
    },
    SyncRetry {
        generation: u64,
        attempt: u32,
    },
    SyncCompleted {
        generation: u64,
        attempt: u32,
        posted_km: f64,
        result: Box<Result<ReconcileResponse, SyncError>>,
    },

    SnapshotLoaded {
        bytes: Option<Vec<u8>>,
    },
    SnapshotWritten {
        success: bool,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted => "app_started",
            Self::TripStartRequested { .. } => "trip_start_requested",
            Self::TripPauseRequested => "trip_pause_requested",
            Self::TripResumeRequested => "trip_resume_requested",
            Self::TripStopRequested => "trip_stop_requested",
            Self::TripCancelRequested => "trip_cancel_requested",
            Self::MaintenanceLogged(_) => "maintenance_logged",
            Self::TripSummaryAcknowledged => "trip_summary_acknowledged",
            Self::DismissError => "dismiss_error",
            Self::PositionReceived(_) => "position_received",
            Self::PositioningFailed { .. } => "positioning_failed",
            Self::SyncTick { .. } => "sync_tick",
            Self::SyncRetry { .. } => "sync_retry",
            Self::SyncCompleted { .. } => "sync_completed",
            Self::SnapshotLoaded { .. } => "snapshot_loaded",
            Self::SnapshotWritten { .. } => "snapshot_written",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::TripStartRequested { .. }
                | Self::TripPauseRequested
                | Self::TripResumeRequested
                | Self::TripStopRequested
                | Self::TripCancelRequested
                | Self::MaintenanceLogged(_)
                | Self::TripSummaryAcknowledged
                | Self::DismissError
        )
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::Noop
    }
}
