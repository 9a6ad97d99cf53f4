//! Sanity supervision: detects conditions that make the rescue unsafe
//! (crash-flip, lost GPS, low satellites, no progress) and decides between
//! continuing, holding position, and aborting. Runs a cheap pass every tick
//! and a counter pass once per second, both from the same `update` call — no
//! timers or tasks.
//!
//! Also hosts the availability probe the OSD polls to flash "RESCUE N/A".

use crate::config::{RescueConfig, SanityPolicy};
use crate::inputs::{GpsView, RescueInputs};
use crate::sensors::SensorView;
use crate::state::{Failure, IntentModel, Phase};

const SLOW_TICK_US: u64 = 1_000_000;

/// Seconds of no progress toward home before a FlyHome rescue is declared
/// stalled (or a flyaway).
const FLY_HOME_FAIL_S: i8 = 20;
/// Seconds of inadequate climb/descent progress before aborting.
const PROGRESS_FAIL_S: i8 = 10;
/// Seconds allowed in the DoNothing hold before aborting.
const DO_NOTHING_FAIL_S: i8 = 10;
/// Seconds of low satellite count before the rescue itself faults.
const LOW_SATS_FAIL_S: i8 = 10;
/// The availability probe is less patient than the rescue.
const PROBE_LOW_SATS_S: i8 = 2;

/// What the supervisor decided this tick; the engine applies it.
pub struct SanityVerdict {
    pub failure: Failure,
    pub next_phase: Option<Phase>,
}

#[derive(Default)]
pub struct SanitySupervisor {
    last_slow_us: u64,
    prev_altitude_cm: f32,
    seconds_low_sats: i8,
    seconds_doing_nothing: i8,
    mag_force_disabled: bool,
}

impl SanitySupervisor {
    /// Seed the counters when a rescue initializes. Low-sat tolerance starts
    /// half spent so a marginal constellation fails fast early on.
    pub fn init(&mut self, now_us: u64, current_altitude_cm: f32) {
        self.last_slow_us = now_us;
        self.prev_altitude_cm = current_altitude_cm;
        self.seconds_low_sats = 5;
        self.seconds_doing_nothing = 0;
        self.mag_force_disabled = false;
    }

    /// The rescue asked the compass be ignored after failing to make progress
    /// home. Read by the heading-source selection outside this crate.
    pub fn mag_force_disabled(&self) -> bool {
        self.mag_force_disabled
    }

    pub fn check(
        &mut self,
        now_us: u64,
        phase: Phase,
        failure_in: Failure,
        sensors: &SensorView,
        intent: &mut IntentModel,
        config: &RescueConfig,
        inputs: &RescueInputs,
    ) -> SanityVerdict {
        if phase == Phase::Idle {
            return SanityVerdict {
                failure: Failure::Healthy,
                next_phase: None,
            };
        }

        let mut failure = failure_in;
        if inputs.arming.crash_flip_active {
            failure = Failure::CrashFlipDetected;
        }
        if !sensors.healthy {
            failure = Failure::GpsLost;
        }

        let mut next_phase = None;

        if now_us.wrapping_sub(self.last_slow_us) >= SLOW_TICK_US {
            self.last_slow_us = now_us;
            let climb_cm = sensors.current_altitude_cm - self.prev_altitude_cm;
            self.prev_altitude_cm = sensors.current_altitude_cm;

            match phase {
                Phase::FlyHome => {
                    if sensors.velocity_to_home_cm_s < 0.5 * intent.target_velocity_cm_s {
                        intent.seconds_failing += 1;
                    } else {
                        intent.seconds_failing -= 1;
                    }
                    intent.seconds_failing = intent.seconds_failing.clamp(0, FLY_HOME_FAIL_S);
                    if intent.seconds_failing == FLY_HOME_FAIL_S {
                        if config.use_mag && !self.mag_force_disabled {
                            // One shot: a bad compass heading can hold the
                            // craft off-course indefinitely.
                            self.mag_force_disabled = true;
                            intent.seconds_failing = 0;
                            warn!("gps rescue: no progress home, disabling compass");
                        } else if sensors.velocity_to_home_cm_s < 0. {
                            failure = Failure::Flyaway;
                        } else {
                            failure = Failure::Stalled;
                        }
                    }
                }
                Phase::AttainAlt => {
                    if climb_cm < 0.5 * config.ascend_rate_cm_s as f32 {
                        intent.seconds_failing += 1;
                    } else {
                        intent.seconds_failing -= 1;
                    }
                    intent.seconds_failing = intent.seconds_failing.clamp(0, PROGRESS_FAIL_S);
                    if intent.seconds_failing == PROGRESS_FAIL_S {
                        next_phase = Some(Phase::Abort);
                    }
                }
                Phase::Descent | Phase::Landing => {
                    if -climb_cm < 0.5 * config.descend_rate_cm_s as f32 {
                        intent.seconds_failing += 1;
                    } else {
                        intent.seconds_failing -= 1;
                    }
                    intent.seconds_failing = intent.seconds_failing.clamp(0, PROGRESS_FAIL_S);
                    if intent.seconds_failing == PROGRESS_FAIL_S {
                        next_phase = Some(Phase::Abort);
                    }
                }
                Phase::DoNothing => {
                    self.seconds_doing_nothing =
                        (self.seconds_doing_nothing + 1).min(DO_NOTHING_FAIL_S);
                    if self.seconds_doing_nothing == DO_NOTHING_FAIL_S {
                        next_phase = Some(Phase::Abort);
                    }
                }
                _ => {}
            }

            if inputs.gps.num_sats < config.min_sats {
                self.seconds_low_sats = (self.seconds_low_sats + 1).min(LOW_SATS_FAIL_S);
            } else {
                self.seconds_low_sats = (self.seconds_low_sats - 1).max(0);
            }
            if self.seconds_low_sats == LOW_SATS_FAIL_S {
                failure = Failure::LowSats;
            }
        }

        // Map any detected failure through the configured policy. Abort and
        // Complete are already winding down; leave them to finish.
        if failure != Failure::Healthy && !matches!(phase, Phase::Abort | Phase::Complete) {
            let escalate = match config.sanity_checks {
                SanityPolicy::On => true,
                SanityPolicy::Off => false,
                SanityPolicy::FailsafeOnly => !inputs.rc.receiving_signal,
            };
            if escalate {
                next_phase = Some(Phase::Abort);
            } else if next_phase.is_none() && phase != Phase::DoNothing {
                next_phase = Some(Phase::DoNothing);
            }
        }

        SanityVerdict {
            failure,
            next_phase,
        }
    }
}

/// 1 Hz readiness check for the OSD. Does not influence the controllers.
pub struct AvailabilityProbe {
    last_slow_us: u64,
    seconds_low_sats: i8,
    available: bool,
}

impl Default for AvailabilityProbe {
    fn default() -> Self {
        Self {
            last_slow_us: 0,
            seconds_low_sats: 0,
            available: true,
        }
    }
}

impl AvailabilityProbe {
    pub fn update(&mut self, now_us: u64, gps: &GpsView, config: &RescueConfig) -> bool {
        if !gps.healthy || !gps.has_home_fix || !gps.has_fix {
            return false;
        }
        if now_us.wrapping_sub(self.last_slow_us) >= SLOW_TICK_US {
            self.last_slow_us = now_us;
            if gps.num_sats < config.min_sats {
                self.seconds_low_sats = (self.seconds_low_sats + 1).min(PROBE_LOW_SATS_S);
            } else {
                self.seconds_low_sats = (self.seconds_low_sats - 1).max(0);
            }
            self.available = self.seconds_low_sats < PROBE_LOW_SATS_S;
        }
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        supervisor: SanitySupervisor,
        sensors: SensorView,
        intent: IntentModel,
        config: RescueConfig,
        inputs: RescueInputs,
        now_us: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let mut sensors = SensorView::default();
            sensors.healthy = true;
            let mut inputs = RescueInputs::default();
            inputs.gps.healthy = true;
            inputs.gps.num_sats = 12;

            let mut supervisor = SanitySupervisor::default();
            supervisor.init(1_000_000, 0.);

            Self {
                supervisor,
                sensors,
                intent: IntentModel::default(),
                config: RescueConfig::default(),
                inputs,
                now_us: 1_000_000,
            }
        }

        /// Advance one second and run the check.
        fn slow_tick(&mut self, phase: Phase, failure: Failure) -> SanityVerdict {
            self.now_us += 1_000_000;
            self.supervisor.check(
                self.now_us,
                phase,
                failure,
                &self.sensors,
                &mut self.intent,
                &self.config,
                &self.inputs,
            )
        }
    }

    #[test]
    fn idle_always_reports_healthy() {
        let mut fx = Fixture::new();
        fx.inputs.arming.crash_flip_active = true;
        let verdict = fx.slow_tick(Phase::Idle, Failure::GpsLost);
        assert_eq!(verdict.failure, Failure::Healthy);
        assert!(verdict.next_phase.is_none());
    }

    #[test]
    fn per_tick_detection_sets_failures() {
        let mut fx = Fixture::new();
        fx.inputs.arming.crash_flip_active = true;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        assert_eq!(verdict.failure, Failure::CrashFlipDetected);

        let mut fx = Fixture::new();
        fx.sensors.healthy = false;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        assert_eq!(verdict.failure, Failure::GpsLost);
    }

    #[test]
    fn policy_maps_failures_to_phases() {
        let mut fx = Fixture::new();
        fx.config.sanity_checks = SanityPolicy::On;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::GpsLost);
        assert_eq!(verdict.next_phase, Some(Phase::Abort));

        let mut fx = Fixture::new();
        fx.config.sanity_checks = SanityPolicy::Off;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::GpsLost);
        assert_eq!(verdict.next_phase, Some(Phase::DoNothing));

        let mut fx = Fixture::new();
        fx.config.sanity_checks = SanityPolicy::FailsafeOnly;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::GpsLost);
        assert_eq!(verdict.next_phase, Some(Phase::DoNothing));

        let mut fx = Fixture::new();
        fx.config.sanity_checks = SanityPolicy::FailsafeOnly;
        fx.inputs.rc.receiving_signal = false;
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::GpsLost);
        assert_eq!(verdict.next_phase, Some(Phase::Abort));
    }

    #[test]
    fn low_sats_counter_starts_half_spent() {
        let mut fx = Fixture::new();
        fx.inputs.gps.num_sats = 5;
        // Initialized at 5; five more bad seconds reach the limit of 10.
        for _ in 0..4 {
            let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
            assert_eq!(verdict.failure, Failure::Healthy);
        }
        let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        assert_eq!(verdict.failure, Failure::LowSats);
    }

    #[test]
    fn good_sats_recover_the_counter() {
        let mut fx = Fixture::new();
        fx.inputs.gps.num_sats = 5;
        for _ in 0..4 {
            fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        }
        fx.inputs.gps.num_sats = 12;
        for _ in 0..20 {
            let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
            assert_eq!(verdict.failure, Failure::Healthy);
        }
    }

    #[test]
    fn fly_home_stall_disables_mag_once_then_faults() {
        let mut fx = Fixture::new();
        fx.intent.target_velocity_cm_s = 500.;
        fx.sensors.velocity_to_home_cm_s = 200.;

        // First saturation spends the compass one-shot.
        for _ in 0..20 {
            let verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
            assert_eq!(verdict.failure, Failure::Healthy);
        }
        assert!(fx.supervisor.mag_force_disabled());
        assert_eq!(fx.intent.seconds_failing, 0);

        // Second saturation is a stall.
        let mut verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        for _ in 0..19 {
            verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        }
        assert_eq!(verdict.failure, Failure::Stalled);
    }

    #[test]
    fn receding_craft_reports_flyaway() {
        let mut fx = Fixture::new();
        fx.config.use_mag = false;
        fx.intent.target_velocity_cm_s = 500.;
        fx.sensors.velocity_to_home_cm_s = -300.;

        let mut verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        for _ in 0..19 {
            verdict = fx.slow_tick(Phase::FlyHome, Failure::Healthy);
        }
        assert_eq!(verdict.failure, Failure::Flyaway);
    }

    #[test]
    fn attain_alt_without_climb_aborts_after_ten_seconds() {
        let mut fx = Fixture::new();
        // Altitude pinned: no climb at all.
        let mut verdict = fx.slow_tick(Phase::AttainAlt, Failure::Healthy);
        for _ in 0..9 {
            verdict = fx.slow_tick(Phase::AttainAlt, Failure::Healthy);
        }
        assert_eq!(verdict.next_phase, Some(Phase::Abort));
    }

    #[test]
    fn descent_progress_resets_the_counter() {
        let mut fx = Fixture::new();
        // Descend 100 cm per second, well above half the 125 cm/s target.
        for i in 1..=30 {
            fx.sensors.current_altitude_cm = 5_000. - 100. * i as f32;
            let verdict = fx.slow_tick(Phase::Descent, Failure::Healthy);
            assert!(verdict.next_phase.is_none());
        }
    }

    #[test]
    fn do_nothing_times_out_into_abort() {
        let mut fx = Fixture::new();
        let mut verdict = fx.slow_tick(Phase::DoNothing, Failure::Healthy);
        for _ in 0..9 {
            verdict = fx.slow_tick(Phase::DoNothing, Failure::Healthy);
        }
        assert_eq!(verdict.next_phase, Some(Phase::Abort));
    }

    #[test]
    fn probe_needs_health_home_and_fix() {
        let config = RescueConfig::default();
        let mut probe = AvailabilityProbe::default();
        let mut gps = GpsView {
            healthy: true,
            has_fix: true,
            has_home_fix: true,
            num_sats: 12,
            ..Default::default()
        };
        assert!(probe.update(1_000_000, &gps, &config));

        gps.healthy = false;
        assert!(!probe.update(2_000_000, &gps, &config));
        gps.healthy = true;
        gps.has_home_fix = false;
        assert!(!probe.update(3_000_000, &gps, &config));
    }

    #[test]
    fn probe_goes_false_after_two_low_sat_seconds() {
        let config = RescueConfig::default();
        let mut probe = AvailabilityProbe::default();
        let gps = GpsView {
            healthy: true,
            has_fix: true,
            has_home_fix: true,
            num_sats: 5,
            ..Default::default()
        };
        assert!(probe.update(1_000_000, &gps, &config));
        assert!(!probe.update(2_000_000, &gps, &config));
        assert!(!probe.update(2_500_000, &gps, &config));
    }
}
