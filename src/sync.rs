use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{UnixTimeMs, VehicleId, SYNC_BASE_BACKOFF_MS, SYNC_MAX_BACKOFF_MS};

/// Request body for one reconciliation against the remote fuel ledger.
/// The server computes the delta and the fuel conversion itself; the
/// client only reports the two odometer figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub vehicle_id: VehicleId,
    pub total_distance_traveled_km: f64,
    pub last_posted_distance_km: f64,
}

/// Ledger response. `skipped` means the delta was below the server's
/// minimum significant distance and nothing changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ReconcileResponse {
    Applied {
        new_fuel_level_percent: f64,
        low_fuel_warning: bool,
    },
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncErrorKind {
    /// Network or server failure; retried with backoff, then left for
    /// the next scheduled tick to pick up with a larger delta.
    Transient,
    /// The server rejected the request outright; never retried.
    Rejected,
}

impl SyncErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("sync failed ({}): {detail}", .kind.as_str())]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub detail: String,
}

impl SyncError {
    #[must_use]
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: SyncErrorKind::Transient,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            kind: SyncErrorKind::Rejected,
            detail: detail.into(),
        }
    }
}

/// Non-success HTTP statuses from the ledger. Client errors that
/// indicate a malformed request or unknown vehicle are final; anything
/// else is worth retrying.
#[must_use]
pub const fn classify_status(status: u16) -> SyncErrorKind {
    match status {
        400 | 404 | 422 => SyncErrorKind::Rejected,
        _ => SyncErrorKind::Transient,
    }
}

/// Maps the raw transport result onto domain terms at the capability
/// callback boundary, so update-loop events carry no HTTP types.
pub fn interpret_ledger_result(
    result: crux_http::Result<crux_http::Response<Vec<u8>>>,
) -> Result<ReconcileResponse, SyncError> {
    match result {
        Ok(mut response) => {
            let status = u16::from(response.status());

            if (200..300).contains(&status) {
                let body = response.take_body().unwrap_or_default();
                serde_json::from_slice::<ReconcileResponse>(&body).map_err(|e| {
                    SyncError::transient(format!("malformed ledger response: {e}"))
                })
            } else {
                Err(SyncError {
                    kind: classify_status(status),
                    detail: format!("ledger returned HTTP {status}"),
                })
            }
        }
        // Rejections only ever arrive as an HTTP status; every transport
        // failure is worth retrying.
        Err(e) => Err(SyncError::transient(e.to_string())),
    }
}

/// Exponential backoff for transient failures: 1 s, 2 s, 4 s for
/// attempts 1..=3, capped.
#[must_use]
pub fn sync_backoff_ms(attempt: u32) -> u64 {
    SYNC_BASE_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(SYNC_MAX_BACKOFF_MS)
}

/// The single reconcile allowed in flight for the vehicle. Retries
/// repost exactly these figures; only an `Applied` outcome may advance
/// the posted distance, and only to `posted_km`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub generation: u64,
    pub attempt: u32,
    pub posted_km: f64,
    pub requested_at: UnixTimeMs,
}

/// Result of one reconciliation cycle, folded into trip state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SyncOutcome {
    Applied {
        new_fuel_level_percent: f64,
        low_fuel_warning: bool,
    },
    Skipped,
    Failed {
        kind: SyncErrorKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    mod wire_tests {
        use super::*;

        #[test]
        fn test_request_serializes_to_ledger_field_names() {
            let request = ReconcileRequest {
                vehicle_id: VehicleId::new("veh-1"),
                total_distance_traveled_km: 12.5,
                last_posted_distance_km: 10.0,
            };

            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(
                value,
                serde_json::json!({
                    "vehicleId": "veh-1",
                    "totalDistanceTraveledKm": 12.5,
                    "lastPostedDistanceKm": 10.0,
                })
            );
        }

        #[test]
        fn test_applied_response_parses() {
            let body = br#"{"status":"applied","newFuelLevelPercent":79.5,"lowFuelWarning":false}"#;
            let response: ReconcileResponse = serde_json::from_slice(body).unwrap();
            assert_eq!(
                response,
                ReconcileResponse::Applied {
                    new_fuel_level_percent: 79.5,
                    low_fuel_warning: false,
                }
            );
        }

        #[test]
        fn test_skipped_response_parses() {
            let body = br#"{"status":"skipped"}"#;
            let response: ReconcileResponse = serde_json::from_slice(body).unwrap();
            assert_eq!(response, ReconcileResponse::Skipped);
        }

        #[test]
        fn test_unknown_status_is_an_error() {
            let body = br#"{"status":"rebooting"}"#;
            assert!(serde_json::from_slice::<ReconcileResponse>(body).is_err());
        }
    }

    mod classification_tests {
        use super::*;

        #[test]
        fn test_client_errors_are_rejected() {
            assert_eq!(classify_status(400), SyncErrorKind::Rejected);
            assert_eq!(classify_status(404), SyncErrorKind::Rejected);
            assert_eq!(classify_status(422), SyncErrorKind::Rejected);
        }

        #[test]
        fn test_server_and_throttling_errors_are_transient() {
            assert_eq!(classify_status(408), SyncErrorKind::Transient);
            assert_eq!(classify_status(429), SyncErrorKind::Transient);
            assert_eq!(classify_status(500), SyncErrorKind::Transient);
            assert_eq!(classify_status(503), SyncErrorKind::Transient);
        }

        #[test]
        fn test_retryability() {
            assert!(SyncErrorKind::Transient.is_retryable());
            assert!(!SyncErrorKind::Rejected.is_retryable());
        }
    }

    mod backoff_tests {
        use super::*;

        #[test]
        fn test_backoff_doubles_per_attempt() {
            assert_eq!(sync_backoff_ms(1), 1_000);
            assert_eq!(sync_backoff_ms(2), 2_000);
            assert_eq!(sync_backoff_ms(3), 4_000);
        }

        #[test]
        fn test_backoff_is_capped() {
            assert_eq!(sync_backoff_ms(40), SYNC_MAX_BACKOFF_MS);
        }
    }
}
