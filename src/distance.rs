use serde::{Deserialize, Serialize};

use crate::capabilities::LocationSample;
use crate::{haversine_distance, ValidatedCoordinate, JITTER_THRESHOLD_M, MIN_SPEED_TIME_DELTA_MS};

/// Turns the noisy stream of positioning fixes into trustworthy
/// incremental distance.
///
/// Every valid sample replaces the reference point, so a stationary
/// vehicle never accumulates jitter no matter how long it sits; only
/// displacements at or above the jitter threshold are reported to the
/// caller as distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceAccumulator {
    jitter_threshold_m: f64,
    last_sample: Option<LocationSample>,
    speed_mps: f64,
    accepted: u64,
    discarded: u64,
    invalid: u64,
}

impl Default for DistanceAccumulator {
    fn default() -> Self {
        Self::new(JITTER_THRESHOLD_M)
    }
}

impl DistanceAccumulator {
    #[must_use]
    pub fn new(jitter_threshold_m: f64) -> Self {
        Self {
            jitter_threshold_m,
            last_sample: None,
            speed_mps: 0.0,
            accepted: 0,
            discarded: 0,
            invalid: 0,
        }
    }

    /// Feed one sample, in arrival order. Returns the distance delta in
    /// kilometers when the displacement clears the jitter threshold.
    pub fn observe(&mut self, sample: &LocationSample) -> Option<f64> {
        let Ok(position) = ValidatedCoordinate::new(sample.latitude, sample.longitude) else {
            self.invalid += 1;
            return None;
        };

        let Some(previous) = self.last_sample else {
            self.last_sample = Some(*sample);
            self.speed_mps = reported_speed(sample).unwrap_or(0.0);
            return None;
        };

        // The previous sample was validated before it was retained.
        let Ok(anchor) = ValidatedCoordinate::new(previous.latitude, previous.longitude) else {
            self.last_sample = Some(*sample);
            return None;
        };

        let meters = haversine_distance(anchor, position);
        let elapsed_ms = sample
            .timestamp_ms
            .saturating_sub(previous.timestamp_ms)
            .max(MIN_SPEED_TIME_DELTA_MS);

        self.speed_mps = reported_speed(sample)
            .unwrap_or_else(|| meters / (elapsed_ms as f64 / 1000.0));

        self.last_sample = Some(*sample);

        if meters < self.jitter_threshold_m {
            self.discarded += 1;
            return None;
        }

        self.accepted += 1;
        Some(meters / 1000.0)
    }

    /// Called exactly once, at trip start.
    pub fn reset(&mut self) {
        self.last_sample = None;
        self.speed_mps = 0.0;
        self.accepted = 0;
        self.discarded = 0;
        self.invalid = 0;
    }

    #[must_use]
    pub const fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    #[must_use]
    pub fn speed_kmh(&self) -> f64 {
        self.speed_mps * 3.6
    }

    #[must_use]
    pub const fn accepted_count(&self) -> u64 {
        self.accepted
    }

    #[must_use]
    pub const fn discarded_count(&self) -> u64 {
        self.discarded
    }

    #[must_use]
    pub const fn invalid_count(&self) -> u64 {
        self.invalid
    }

    #[must_use]
    pub const fn last_sample(&self) -> Option<LocationSample> {
        self.last_sample
    }
}

fn reported_speed(sample: &LocationSample) -> Option<f64> {
    sample
        .speed_mps
        .filter(|s| s.is_finite() && *s >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Roughly one meter of latitude.
    const LAT_METER: f64 = 1.0 / 111_195.0;

    fn sample(lat: f64, lon: f64, speed_mps: Option<f64>, timestamp_ms: u64) -> LocationSample {
        LocationSample {
            latitude: lat,
            longitude: lon,
            speed_mps,
            timestamp_ms,
        }
    }

    mod filtering_tests {
        use super::*;

        #[test]
        fn test_first_sample_yields_no_delta() {
            let mut acc = DistanceAccumulator::default();
            assert_eq!(acc.observe(&sample(48.0, 11.0, None, 1_000)), None);
            assert_eq!(acc.accepted_count(), 0);
        }

        #[test]
        fn test_stationary_jitter_never_accumulates() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, None, 0));

            let mut total = 0.0;
            for i in 1..=10u32 {
                let lat = 48.0 + f64::from(i) * LAT_METER;
                if let Some(delta) = acc.observe(&sample(lat, 11.0, None, u64::from(i) * 1_000)) {
                    total += delta;
                }
            }

            assert_eq!(total, 0.0);
            assert_eq!(acc.accepted_count(), 0);
            assert_eq!(acc.discarded_count(), 10);
        }

        #[test]
        fn test_real_movement_accumulates() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, None, 0));

            // ~10 m hops, well above the threshold
            let mut total = 0.0;
            for i in 1..=5u32 {
                let lat = 48.0 + f64::from(i) * 10.0 * LAT_METER;
                if let Some(delta) = acc.observe(&sample(lat, 11.0, None, u64::from(i) * 1_000)) {
                    total += delta;
                }
            }

            assert_eq!(acc.accepted_count(), 5);
            assert!((total - 0.05).abs() < 0.001, "expected ~0.05 km, got {total}");
        }

        #[test]
        fn test_invalid_sample_keeps_reference() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, None, 0));
            assert_eq!(acc.observe(&sample(f64::NAN, 11.0, None, 1_000)), None);
            assert_eq!(acc.invalid_count(), 1);

            // Next valid fix still measures from the original reference.
            let delta = acc.observe(&sample(48.0 + 10.0 * LAT_METER, 11.0, None, 2_000));
            assert!(delta.is_some());
        }

        #[test]
        fn test_out_of_range_sample_is_dropped() {
            let mut acc = DistanceAccumulator::default();
            assert_eq!(acc.observe(&sample(95.0, 11.0, None, 0)), None);
            assert_eq!(acc.invalid_count(), 1);
            assert!(acc.last_sample().is_none());
        }
    }

    mod speed_tests {
        use super::*;

        #[test]
        fn test_prefers_reported_speed() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, Some(12.5), 0));
            assert!((acc.speed_mps() - 12.5).abs() < f64::EPSILON);

            acc.observe(&sample(48.0 + 10.0 * LAT_METER, 11.0, Some(9.0), 1_000));
            assert!((acc.speed_mps() - 9.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_negative_reported_speed_falls_back_to_derived() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, None, 0));

            // ~10 m in 1 s with a bogus negative report
            acc.observe(&sample(48.0 + 10.0 * LAT_METER, 11.0, Some(-1.0), 1_000));
            assert!((acc.speed_mps() - 10.0).abs() < 0.5);
        }

        #[test]
        fn test_derived_speed_floors_time_delta() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, None, 1_000));

            // Same timestamp: delta floored to 1 ms rather than dividing by zero.
            acc.observe(&sample(48.0 + 10.0 * LAT_METER, 11.0, None, 1_000));
            assert!(acc.speed_mps().is_finite());
        }

        #[test]
        fn test_kmh_conversion() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, Some(10.0), 0));
            assert!((acc.speed_kmh() - 36.0).abs() < f64::EPSILON);
        }
    }

    mod reset_tests {
        use super::*;

        #[test]
        fn test_reset_clears_everything() {
            let mut acc = DistanceAccumulator::default();
            acc.observe(&sample(48.0, 11.0, Some(5.0), 0));
            acc.observe(&sample(48.0 + 10.0 * LAT_METER, 11.0, None, 1_000));

            acc.reset();

            assert!(acc.last_sample().is_none());
            assert_eq!(acc.speed_mps(), 0.0);
            assert_eq!(acc.accepted_count(), 0);
            assert_eq!(acc.discarded_count(), 0);
            assert_eq!(acc.invalid_count(), 0);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn deltas_are_never_negative(
                steps in proptest::collection::vec((-50.0f64..50.0, 0u64..10_000), 1..40)
            ) {
                let mut acc = DistanceAccumulator::default();
                let mut lat = 0.0f64;
                let mut ts = 0u64;

                for (meters, dt) in steps {
                    lat = (lat + meters * LAT_METER).clamp(-89.0, 89.0);
                    ts += dt;
                    if let Some(delta) = acc.observe(&sample(lat, 0.0, None, ts)) {
                        prop_assert!(delta > 0.0);
                        prop_assert!(delta.is_finite());
                    }
                    prop_assert!(acc.speed_mps().is_finite());
                }
            }
        }
    }
}
