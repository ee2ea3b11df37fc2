use crux_kv::KeyValueOutput;
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, PositioningOutput, SubscriptionId, TimerId};
use crate::distance::DistanceAccumulator;
use crate::event::Event;
use crate::model::{
    MaintenanceKind, Model, TripAction, TripPhase, TripSnapshot, TripState, TripStatus,
    UserFacingError, ViewModel,
};
use crate::sync::{
    interpret_ledger_result, sync_backoff_ms, ReconcileRequest, ReconcileResponse, SyncAttempt,
    SyncErrorKind, SyncOutcome,
};
use crate::{
    format_distance, get_current_time_ms, AppError, ErrorKind, UnixTimeMs, VehicleId,
    MAX_FUEL_LEVEL_PERCENT, MIN_FUEL_LEVEL_PERCENT, SNAPSHOT_KEY, SNAPSHOT_SCHEMA_VERSION,
};

/// The periodic scheduler and the retry one-shot share a generation but
/// must not collide on timer ids.
const fn periodic_timer_id(generation: u64) -> TimerId {
    TimerId(generation << 1)
}

const fn retry_timer_id(generation: u64) -> TimerId {
    TimerId((generation << 1) | 1)
}

#[derive(Default)]
pub struct App;

impl App {
    fn open_subscription(generation: u64, caps: &Capabilities) {
        caps.positioning
            .subscribe(SubscriptionId(generation), |output| match output {
                PositioningOutput::Sample(sample) => Event::PositionReceived(sample),
                PositioningOutput::Failed { reason } => Event::PositioningFailed { reason },
            });
    }

    fn start_scheduler(model: &mut Model, caps: &Capabilities) {
        let generation = model.generation;
        caps.timer.start(
            periodic_timer_id(generation),
            model.config.sync_interval_ms,
            move |_| Event::SyncTick { generation },
        );
        model.scheduler_running = true;
    }

    /// Posts the two odometer figures to the ledger. Returns false when
    /// the request could not even be encoded, so callers can unwind
    /// their in-flight bookkeeping.
    fn send_reconcile(
        model: &Model,
        caps: &Capabilities,
        generation: u64,
        attempt: u32,
        posted_km: f64,
    ) -> bool {
        let request = ReconcileRequest {
            vehicle_id: model.trip.vehicle_id.clone(),
            total_distance_traveled_km: posted_km,
            last_posted_distance_km: model.trip.last_posted_km,
        };

        let url = model.config.reconcile_url();

        let builder = match caps.http.post(&url).body_json(&request) {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "failed to encode reconcile request");
                return false;
            }
        };

        debug!(attempt, posted_km, "posting distance delta to fuel ledger");

        builder.send(move |result| Event::SyncCompleted {
            generation,
            attempt,
            posted_km,
            result: Box::new(interpret_ledger_result(result)),
        });

        true
    }

    fn begin_reconcile(model: &mut Model, caps: &Capabilities, attempt: u32) {
        let generation = model.generation;
        let posted_km = model.trip.total_distance_km;
        let now = UnixTimeMs(model.now_ms);

        if !Self::send_reconcile(model, caps, generation, attempt, posted_km) {
            return;
        }

        model.trip.last_sync_attempt = Some(now);
        model.sync_in_flight = Some(SyncAttempt {
            generation,
            attempt,
            posted_km,
            requested_at: now,
        });
    }

    fn persist_snapshot(model: &Model, caps: &Capabilities) {
        let snapshot = TripSnapshot::new(model.trip.clone());

        let bytes = match snapshot.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode trip snapshot");
                return;
            }
        };

        caps.key_value
            .write(SNAPSHOT_KEY, bytes, |response| match response {
                KeyValueOutput::Write(success) => Event::SnapshotWritten { success },
                KeyValueOutput::Read(_) => Event::Noop,
            });
    }

    fn reject_transition(
        model: &mut Model,
        caps: &Capabilities,
        attempted: TripAction,
    ) -> Result<(), ()> {
        if let Err(e) = model.trip.phase.validate(attempted) {
            warn!(attempted = %attempted, phase = %model.trip.phase, "invalid trip transition");
            model.set_error(e.into());
            caps.render.render();
            return Err(());
        }
        Ok(())
    }

    fn finish_trip(model: &mut Model, caps: &Capabilities, status: TripStatus) {
        if Self::reject_transition(model, caps, TripAction::Stop).is_err() {
            return;
        }

        let old_generation = model.generation;
        caps.timer.cancel(periodic_timer_id(old_generation));
        caps.timer.cancel(retry_timer_id(old_generation));
        caps.positioning.cancel(SubscriptionId(old_generation));
        model.generation += 1;
        model.scheduler_running = false;

        // Best-effort final reconcile. Its response arrives after the
        // phase is Stopped and is discarded; the ledger still sees the
        // closing delta.
        if status == TripStatus::Completed
            && model.trip.unposted_km() > 0.0
            && model.sync_in_flight.is_none()
        {
            Self::send_reconcile(
                model,
                caps,
                old_generation,
                1,
                model.trip.total_distance_km,
            );
        }
        model.sync_in_flight = None;

        let stopped_at = UnixTimeMs(model.now_ms);
        model.trip.phase = TripPhase::Stopped;
        model.trip.stopped_at = Some(stopped_at);
        model.positioning_lost = false;

        let summary = model.trip.finalize(stopped_at, status);
        info!(
            trip_id = %summary.trip_id,
            distance_km = summary.total_distance_km,
            samples_accepted = model.accumulator.accepted_count(),
            samples_discarded = model.accumulator.discarded_count(),
            status = ?summary.status,
            "trip finished"
        );
        model.completed = Some(summary);

        Self::persist_snapshot(model, caps);
        caps.render.render();
    }

    fn handle_sync_result(
        model: &mut Model,
        caps: &Capabilities,
        generation: u64,
        attempt: u32,
        posted_km: f64,
        result: Result<ReconcileResponse, crate::sync::SyncError>,
    ) {
        if generation != model.generation || model.trip.phase == TripPhase::Stopped {
            debug!("discarding reconcile result from a finished trip");
            return;
        }

        match model.sync_in_flight {
            Some(in_flight) if in_flight.generation == generation && in_flight.attempt == attempt => {}
            _ => {
                debug!("discarding stale reconcile result");
                return;
            }
        }

        match result {
            Ok(ReconcileResponse::Applied {
                new_fuel_level_percent,
                low_fuel_warning,
            }) => {
                model.sync_in_flight = None;
                model
                    .trip
                    .apply_sync(posted_km, new_fuel_level_percent, low_fuel_warning);
                model.last_outcome = Some(SyncOutcome::Applied {
                    new_fuel_level_percent: model.trip.fuel_level_percent,
                    low_fuel_warning,
                });

                info!(
                    posted_km,
                    fuel = model.trip.fuel_level_percent,
                    low_fuel = model.trip.low_fuel_warning,
                    "fuel level reconciled"
                );

                Self::persist_snapshot(model, caps);
                caps.render.render();
            }

            Ok(ReconcileResponse::Skipped) => {
                model.sync_in_flight = None;
                model.last_outcome = Some(SyncOutcome::Skipped);
                debug!("ledger skipped sub-threshold delta");
                caps.render.render();
            }

            Err(error) => {
                if error.kind.is_retryable() && attempt < model.config.max_sync_attempts {
                    let next_attempt = attempt + 1;
                    let delay_ms = sync_backoff_ms(attempt);

                    warn!(
                        attempt,
                        delay_ms,
                        error = %error,
                        "reconcile failed; retrying the same figures"
                    );

                    caps.timer.after(retry_timer_id(generation), delay_ms, move |_| {
                        Event::SyncRetry {
                            generation,
                            attempt: next_attempt,
                        }
                    });
                    caps.render.render();
                } else {
                    model.sync_in_flight = None;
                    model.last_outcome = Some(SyncOutcome::Failed { kind: error.kind });

                    if error.kind == SyncErrorKind::Rejected {
                        model.set_error(
                            AppError::new(
                                ErrorKind::Validation,
                                "the fuel ledger rejected the sync request",
                            )
                            .with_internal(error.detail.clone()),
                        );
                    }

                    warn!(error = %error, "reconcile abandoned; next tick will retry the delta");
                    caps.render.render();
                }
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        model.now_ms = get_current_time_ms();

        match event {
            Event::Noop => {}

            Event::AppStarted => {
                caps.key_value.read(SNAPSHOT_KEY, |response| match response {
                    KeyValueOutput::Read(bytes) => Event::SnapshotLoaded { bytes },
                    KeyValueOutput::Write(_) => Event::Noop,
                });
                caps.render.render();
            }

            Event::SnapshotLoaded { bytes } => {
                let Some(bytes) = bytes else {
                    debug!("no stored trip snapshot");
                    return;
                };

                match TripSnapshot::from_bytes(&bytes) {
                    Ok(snapshot)
                        if snapshot.schema_version == SNAPSHOT_SCHEMA_VERSION
                            && snapshot.trip.phase.is_active() =>
                    {
                        let mut trip = snapshot.trip;
                        // The old positioning subscription died with the
                        // process; the trip waits as Paused until the
                        // user resumes.
                        trip.phase = TripPhase::Paused;

                        info!(trip_id = %trip.trip_id, "restored interrupted trip as paused");

                        model.generation += 1;
                        model.trip = trip;
                        model.accumulator =
                            DistanceAccumulator::new(model.config.jitter_threshold_m);
                        model.sync_in_flight = None;
                        model.last_outcome = None;
                        model.scheduler_running = false;
                        model.positioning_lost = true;
                        model.completed = None;

                        caps.render.render();
                    }
                    Ok(_) => debug!("stored snapshot holds no live trip"),
                    Err(e) => warn!(error = %e, "stored trip snapshot is unreadable"),
                }
            }

            Event::SnapshotWritten { success } => {
                if !success {
                    warn!("trip snapshot write failed");
                }
            }

            Event::TripStartRequested {
                vehicle_id,
                initial_fuel_level_percent,
            } => {
                if Self::reject_transition(model, caps, TripAction::Start).is_err() {
                    return;
                }

                if let Err(e) = model.config.validate() {
                    model.set_error(e);
                    caps.render.render();
                    return;
                }

                if !initial_fuel_level_percent.is_finite()
                    || !(MIN_FUEL_LEVEL_PERCENT..=MAX_FUEL_LEVEL_PERCENT)
                        .contains(&initial_fuel_level_percent)
                {
                    model.set_error(AppError::new(
                        ErrorKind::Validation,
                        format!("initial fuel level {initial_fuel_level_percent} is outside [0, 100]"),
                    ));
                    caps.render.render();
                    return;
                }

                model.generation += 1;
                model.trip = TripState::new(
                    VehicleId::new(vehicle_id),
                    initial_fuel_level_percent,
                    UnixTimeMs(model.now_ms),
                );
                model.accumulator = DistanceAccumulator::new(model.config.jitter_threshold_m);
                model.sync_in_flight = None;
                model.last_outcome = None;
                model.positioning_lost = false;
                model.completed = None;
                model.clear_error();

                Self::open_subscription(model.generation, caps);
                Self::start_scheduler(model, caps);

                info!(
                    trip_id = %model.trip.trip_id,
                    vehicle_id = %model.trip.vehicle_id,
                    "trip started"
                );

                Self::persist_snapshot(model, caps);
                caps.render.render();
            }

            Event::TripPauseRequested => {
                if Self::reject_transition(model, caps, TripAction::Pause).is_err() {
                    return;
                }

                model.trip.phase = TripPhase::Paused;
                info!(trip_id = %model.trip.trip_id, "trip paused");

                Self::persist_snapshot(model, caps);
                caps.render.render();
            }

            Event::TripResumeRequested => {
                if Self::reject_transition(model, caps, TripAction::Resume).is_err() {
                    return;
                }

                model.trip.phase = TripPhase::Tracking;

                if model.positioning_lost {
                    model.positioning_lost = false;
                    if model
                        .active_error
                        .as_ref()
                        .is_some_and(|e| e.kind == ErrorKind::Positioning)
                    {
                        model.clear_error();
                    }
                    Self::open_subscription(model.generation, caps);
                }

                if !model.scheduler_running {
                    Self::start_scheduler(model, caps);
                }

                // Sync picks up again on the next tick boundary.
                info!(trip_id = %model.trip.trip_id, "trip resumed");

                Self::persist_snapshot(model, caps);
                caps.render.render();
            }

            Event::TripStopRequested => {
                Self::finish_trip(model, caps, TripStatus::Completed);
            }

            Event::TripCancelRequested => {
                Self::finish_trip(model, caps, TripStatus::Cancelled);
            }

            Event::MaintenanceLogged(entry) => {
                if Self::reject_transition(model, caps, TripAction::LogMaintenance).is_err() {
                    return;
                }

                if let Err(e) = entry.validate() {
                    model.set_error(e);
                    caps.render.render();
                    return;
                }

                model.trip.maintenance.push(entry.clone());

                if entry.kind == MaintenanceKind::Refuel {
                    model.trip.apply_refuel(&entry);
                    info!(
                        fuel = model.trip.fuel_level_percent,
                        "refuel logged; low-fuel warning cleared"
                    );
                } else {
                    info!(kind = %entry.kind, "maintenance logged");
                }

                Self::persist_snapshot(model, caps);
                caps.render.render();
            }

            Event::TripSummaryAcknowledged => {
                model.completed = None;
                caps.render.render();
            }

            Event::DismissError => {
                model.clear_error();
                caps.render.render();
            }

            Event::PositionReceived(sample) => {
                if !model.trip.phase.is_active() {
                    debug!("discarding sample from a finished trip");
                    return;
                }

                let delta = model.accumulator.observe(&sample);

                if model.trip.phase == TripPhase::Tracking {
                    if let Some(delta_km) = delta {
                        model.trip.record_distance(delta_km);
                    }
                }

                caps.render.render();
            }

            Event::PositioningFailed { reason } => match model.trip.phase {
                TripPhase::Tracking => {
                    warn!(reason = %reason, "positioning lost; auto-pausing trip");

                    model.trip.phase = TripPhase::Paused;
                    model.positioning_lost = true;
                    model.set_error(
                        AppError::new(ErrorKind::Positioning, "positioning lost")
                            .with_internal(reason),
                    );

                    Self::persist_snapshot(model, caps);
                    caps.render.render();
                }
                TripPhase::Paused => {
                    model.positioning_lost = true;
                    model.set_error(
                        AppError::new(ErrorKind::Positioning, "positioning lost")
                            .with_internal(reason),
                    );
                    caps.render.render();
                }
                TripPhase::Idle | TripPhase::Stopped => {
                    debug!("stale positioning failure ignored");
                }
            },

            Event::SyncTick { generation } => {
                if generation != model.generation {
                    debug!("stale scheduler tick discarded");
                    return;
                }

                // Paused trips skip silently; ticks keep arriving.
                if model.trip.phase != TripPhase::Tracking {
                    return;
                }

                if model.sync_in_flight.is_some() {
                    debug!("reconcile already in flight; tick skipped");
                    return;
                }

                if model.trip.unposted_km() <= 0.0 {
                    return;
                }

                Self::begin_reconcile(model, caps, 1);
            }

            Event::SyncRetry {
                generation,
                attempt,
            } => {
                if generation != model.generation || model.trip.phase == TripPhase::Stopped {
                    debug!("stale sync retry discarded");
                    return;
                }

                if model.trip.phase != TripPhase::Tracking {
                    // No network while paused. Drop the attempt; the
                    // next tick after resume reposts the larger delta.
                    model.sync_in_flight = None;
                    return;
                }

                let Some(mut in_flight) = model.sync_in_flight else {
                    return;
                };
                if in_flight.generation != generation {
                    return;
                }

                in_flight.attempt = attempt;
                in_flight.requested_at = UnixTimeMs(model.now_ms);

                if !Self::send_reconcile(model, caps, generation, attempt, in_flight.posted_km) {
                    model.sync_in_flight = None;
                    return;
                }

                model.trip.last_sync_attempt = Some(in_flight.requested_at);
                model.sync_in_flight = Some(in_flight);
            }

            Event::SyncCompleted {
                generation,
                attempt,
                posted_km,
                result,
            } => {
                Self::handle_sync_result(model, caps, generation, attempt, posted_km, *result);
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let now = UnixTimeMs(model.now_ms);

        ViewModel {
            phase: model.trip.phase,
            total_distance_km: model.trip.total_distance_km,
            distance_text: format_distance(model.trip.total_distance_km * 1000.0),
            current_speed_kmh: if model.trip.phase.is_active() {
                model.accumulator.speed_kmh()
            } else {
                0.0
            },
            fuel_level_percent: model.trip.fuel_level_percent,
            low_fuel_warning: model.trip.low_fuel_warning,
            sync: model.sync_indicator(),
            positioning_lost: model.positioning_lost,
            duration_ms: if model.trip.phase == TripPhase::Idle {
                0
            } else {
                model.trip.duration_ms(now)
            },
            maintenance_count: model.trip.maintenance.len(),
            summary: model.completed.clone(),
            error: model.active_error.as_ref().map(UserFacingError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_ids_do_not_collide() {
        for generation in [0u64, 1, 2, 1_000] {
            assert_ne!(periodic_timer_id(generation), retry_timer_id(generation));
        }
        assert_ne!(periodic_timer_id(2), retry_timer_id(1));
    }
}
