//! The rescue engine: one owned value holding every piece of rescue state,
//! driven by the flight controller's main loop at tick rate (~100 Hz).
//!
//! Each `update` runs, in order: sensor derivation, the phase machine, the
//! sanity supervisor, then the setpoint controllers, and finally publishes
//! outputs for the attitude controller and mixer to read through the
//! accessors. The GPS new-sample flag is consumed (cleared) at the end of the
//! tick.

use crate::config::{AltitudeMode, RescueConfig, PWM_MAX, PWM_MIN};
use crate::controllers::PositionController;
use crate::debug::RescueDebug;
use crate::inputs::{
    ArmingControl, ArmingDisabledReason, DisarmReason, NewSampleFlag, RescueInputs,
};
use crate::sanity::{AvailabilityProbe, SanitySupervisor};
use crate::sensors::SensorView;
use crate::state::{Failure, IntentModel, Phase};
use crate::util::map_linear;

/// Accelerometer magnitude that counts as ground impact while landing, g.
const IMPACT_ACCEL_G: f32 = 2.0;

pub struct RescueEngine {
    config: RescueConfig,
    phase: Phase,
    failure: Failure,
    /// Whether AttainAlt approaches the return altitude from below; latched
    /// once when the rescue initializes.
    started_low: bool,
    is_available: bool,
    last_min_check: u16,
    last_home_fix: bool,
    sensors: SensorView,
    intent: IntentModel,
    controller: PositionController,
    supervisor: SanitySupervisor,
    probe: AvailabilityProbe,
    debug: RescueDebug,
}

impl RescueEngine {
    pub fn new(config: RescueConfig) -> Self {
        let mut controller = PositionController::default();
        controller.reset(&config);
        Self {
            config,
            phase: Phase::Idle,
            failure: Failure::Healthy,
            started_low: false,
            is_available: false,
            last_min_check: 1050,
            last_home_fix: false,
            sensors: SensorView::default(),
            intent: IntentModel::default(),
            controller,
            supervisor: SanitySupervisor::default(),
            probe: AvailabilityProbe::default(),
            debug: RescueDebug::default(),
        }
    }

    /// One tick of the rescue subsystem. `now_us` is a monotonic microsecond
    /// clock; `sample_flag` is set by the GPS driver when fresh data was
    /// published and is cleared here at the end of the tick.
    pub fn update(
        &mut self,
        now_us: u64,
        inputs: &RescueInputs,
        sample_flag: &NewSampleFlag,
        arming: &mut impl ArmingControl,
    ) {
        let new_gps_sample = sample_flag.is_set();

        self.sensors
            .refresh(now_us, inputs, &self.config, self.phase, new_gps_sample);
        self.run_phase_machine(now_us, inputs, new_gps_sample, arming);
        self.run_sanity_checks(now_us, inputs);
        self.controller.apply(
            self.phase,
            new_gps_sample,
            &self.sensors,
            &self.intent,
            &self.config,
            inputs,
            &mut self.debug,
        );
        self.is_available = self.probe.update(now_us, &inputs.gps, &self.config);

        self.last_min_check = inputs.rc.min_check;
        self.last_home_fix = inputs.gps.has_home_fix;
        self.debug.tracking = [
            self.sensors.distance_to_home_m as i32,
            self.sensors.velocity_to_home_cm_s as i32,
            self.sensors.current_altitude_cm as i32,
            self.intent.target_altitude_cm as i32,
        ];

        sample_flag.clear();
    }

    fn run_phase_machine(
        &mut self,
        now_us: u64,
        inputs: &RescueInputs,
        new_gps_sample: bool,
        arming: &mut impl ArmingControl,
    ) {
        if !inputs.mode_active {
            if self.phase != Phase::Idle {
                self.stop();
            }
        } else if self.phase == Phase::Idle {
            info!("gps rescue: activated");
            self.set_phase(Phase::Initialize);
            self.controller.reset(&self.config);
            self.supervisor.init(now_us, self.sensors.current_altitude_cm);
        }

        let angle = self.config.angle_deg as f32;

        match self.phase {
            Phase::Idle => self.idle_tasks(inputs, new_gps_sample),
            Phase::Initialize => {
                if !inputs.gps.has_home_fix {
                    // Nothing to fly back to; the supervisor escalates this
                    // per the sanity policy.
                    self.failure = Failure::NoHomePoint;
                } else if self.sensors.distance_to_home_m < self.config.min_rescue_dth_m as f32 {
                    // Close enough that climbing out and returning would
                    // overshoot; land straight down from here.
                    self.intent.reduce_authority(angle);
                    self.intent.target_altitude_cm =
                        self.sensors.current_altitude_cm - self.sensors.descend_step_cm;
                    self.set_phase(Phase::Landing);
                } else {
                    self.intent.reduce_authority(angle);
                    self.intent.update_yaw = true;
                    self.started_low =
                        self.sensors.current_altitude_cm <= self.intent.return_altitude_cm;
                    self.set_phase(Phase::AttainAlt);
                }
            }
            Phase::AttainAlt => {
                if new_gps_sample {
                    let return_alt = self.intent.return_altitude_cm;
                    let crossed = if self.started_low {
                        self.intent.target_altitude_cm = (self.intent.target_altitude_cm
                            + self.sensors.ascend_step_cm)
                            .min(return_alt);
                        self.sensors.current_altitude_cm >= return_alt
                    } else {
                        self.intent.target_altitude_cm = (self.intent.target_altitude_cm
                            - self.sensors.descend_step_cm)
                            .max(return_alt);
                        self.sensors.current_altitude_cm <= return_alt
                    };
                    if crossed {
                        self.intent.target_altitude_cm = return_alt;
                        self.set_phase(Phase::Rotate);
                    }
                }
            }
            Phase::Rotate => {
                if new_gps_sample {
                    if self.sensors.abs_error_angle_deg < 60. {
                        self.intent.target_velocity_cm_s =
                            self.config.rescue_groundspeed_cm_s as f32;
                        self.intent.pitch_angle_limit_deg = angle;
                    }
                    if self.sensors.abs_error_angle_deg < 15. {
                        self.intent.roll_angle_limit_deg = angle;
                        self.intent.seconds_failing = 0;
                        self.set_phase(Phase::FlyHome);
                    }
                }
            }
            Phase::FlyHome => {
                if new_gps_sample
                    && self.sensors.distance_to_home_m <= self.intent.descent_distance_m
                {
                    self.intent.seconds_failing = 0;
                    self.set_phase(Phase::Descent);
                }
            }
            Phase::Descent => {
                if new_gps_sample {
                    if self.sensors.current_altitude_cm
                        < self.config.target_landing_altitude_m as f32 * 100.
                    {
                        self.intent.reduce_authority(angle);
                        self.intent.target_altitude_cm -= self.sensors.descend_step_cm;
                        self.set_phase(Phase::Landing);
                    } else {
                        // Steepen the descent and taper speed and roll
                        // authority to zero across the final 2 m box.
                        let d = (self.sensors.distance_to_home_m - 2.).max(0.);
                        let proximity = (d / self.intent.descent_distance_m).clamp(0., 1.);
                        self.intent.target_altitude_cm -=
                            self.sensors.descend_step_cm * (1. + proximity);
                        self.intent.target_velocity_cm_s =
                            self.config.rescue_groundspeed_cm_s as f32 * proximity;
                        self.intent.roll_angle_limit_deg = angle * proximity;
                    }
                }
            }
            Phase::Landing => {
                if new_gps_sample {
                    self.intent.target_altitude_cm -= self.sensors.descend_step_cm;
                }
                // Impact is checked at tick rate; waiting for a GPS sample
                // could miss the touchdown spike entirely.
                if self.sensors.acc_magnitude_g > IMPACT_ACCEL_G {
                    info!("gps rescue: touchdown, disarming");
                    arming.set_arming_disabled(ArmingDisabledReason::GpsRescue);
                    arming.disarm(DisarmReason::GpsRescue);
                    self.set_phase(Phase::Complete);
                }
            }
            Phase::Complete => self.stop(),
            Phase::Abort => {
                error!("gps rescue: aborted");
                arming.set_arming_disabled(ArmingDisabledReason::GpsRescue);
                arming.disarm(DisarmReason::GpsRescue);
                self.stop();
            }
            // Outputs are frozen by the controllers; the supervisor's
            // ten-second timeout is the only way out.
            Phase::DoNothing => {}
        }
    }

    /// Housekeeping while no rescue is active: track the highest altitude
    /// seen (the `Max` return basis) and keep the return intent seeded so
    /// activation starts from current data.
    fn idle_tasks(&mut self, inputs: &RescueInputs, new_gps_sample: bool) {
        if !inputs.arming.armed {
            self.sensors.max_altitude_cm = 0.;
            return;
        }
        if inputs.altitude.offset_applied
            && self.sensors.current_altitude_cm > self.sensors.max_altitude_cm
        {
            self.sensors.max_altitude_cm = self.sensors.current_altitude_cm;
        }
        if new_gps_sample {
            let buffer_cm = self.config.rescue_altitude_buffer_m as f32 * 100.;
            self.intent.target_altitude_cm = self.sensors.current_altitude_cm;
            self.intent.descent_distance_m = self
                .sensors
                .distance_to_home_m
                .clamp(10., self.config.descent_distance_m as f32);
            self.intent.return_altitude_cm = match self.config.altitude_mode {
                AltitudeMode::Fixed => self.config.initial_altitude_m as f32 * 100.,
                AltitudeMode::Current => self.sensors.current_altitude_cm + buffer_cm,
                AltitudeMode::Max => self.sensors.max_altitude_cm + buffer_cm,
            };
        }
    }

    fn run_sanity_checks(&mut self, now_us: u64, inputs: &RescueInputs) {
        let verdict = self.supervisor.check(
            now_us,
            self.phase,
            self.failure,
            &self.sensors,
            &mut self.intent,
            &self.config,
            inputs,
        );
        self.failure = verdict.failure;
        if let Some(next) = verdict.next_phase {
            self.set_phase(next);
        }
    }

    fn set_phase(&mut self, next: Phase) {
        if next != self.phase {
            debug!("gps rescue: phase {} -> {}", self.phase as u8, next as u8);
            self.phase = next;
        }
    }

    /// Drop back to Idle. The next activation re-initializes everything.
    fn stop(&mut self) {
        self.set_phase(Phase::Idle);
        self.failure = Failure::Healthy;
    }

    // ---- Public surface ----

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn failure(&self) -> Failure {
        self.failure
    }

    /// Commanded yaw rate, deg/s.
    pub fn yaw_rate_out(&self) -> f32 {
        self.controller.yaw_rate_dps()
    }

    /// Additive pitch setpoint for the angle-mode PID, centi-degrees.
    pub fn pitch_bias_centi_deg(&self) -> f32 {
        self.controller.pitch_bias_cdeg()
    }

    /// Additive roll setpoint for the angle-mode PID, centi-degrees.
    pub fn roll_bias_centi_deg(&self) -> f32 {
        self.controller.roll_bias_cdeg()
    }

    /// Throttle normalized to [0, 1] over the usable PWM range.
    pub fn throttle_out(&self) -> f32 {
        let floor = (self.last_min_check as f32).max(PWM_MIN);
        map_linear(self.controller.rescue_throttle(), (floor, PWM_MAX), (0., 1.)).clamp(0., 1.)
    }

    /// Whether a rescue could start right now; polled by the OSD. A plain
    /// scalar — integrators publishing it to another execution context should
    /// copy it into an atomic.
    pub fn is_available(&self) -> bool {
        self.is_available
    }

    pub fn is_configured(&self) -> bool {
        self.config.validate().is_ok()
    }

    /// True while no home point exists to fly back to.
    pub fn is_disabled(&self) -> bool {
        !self.last_home_fix
    }

    /// The rescue wants the compass ignored after repeated failure to make
    /// progress home.
    pub fn disable_mag(&self) -> bool {
        self.supervisor.mag_force_disabled()
    }

    /// Consumed by the arming subsystem's pre-arm checks.
    pub fn allow_arming_without_fix(&self) -> bool {
        self.config.allow_arming_without_fix
    }

    pub fn debug(&self) -> &RescueDebug {
        &self.debug
    }

    pub fn config(&self) -> &RescueConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestArming {
        disarms: Vec<DisarmReason>,
        inhibits: Vec<ArmingDisabledReason>,
    }

    impl ArmingControl for TestArming {
        fn set_arming_disabled(&mut self, reason: ArmingDisabledReason) {
            self.inhibits.push(reason);
        }

        fn disarm(&mut self, reason: DisarmReason) {
            self.disarms.push(reason);
        }
    }

    fn flying_inputs() -> RescueInputs {
        let mut inputs = RescueInputs::default();
        inputs.arming.armed = true;
        inputs.gps.healthy = true;
        inputs.gps.has_fix = true;
        inputs.gps.has_home_fix = true;
        inputs.gps.num_sats = 12;
        inputs.gps.distance_to_home_cm = 20_000;
        inputs.altitude.offset_applied = true;
        inputs.altitude.estimated_altitude_cm = 5_000;
        inputs.rc.throttle_pwm = 1400;
        inputs
    }

    #[test]
    fn idle_passes_pilot_throttle_and_reports_healthy() {
        let mut engine = RescueEngine::new(RescueConfig::default());
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let inputs = flying_inputs();

        flag.set();
        engine.update(1_000_000, &inputs, &flag, &mut arming);

        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.failure(), Failure::Healthy);
        assert_eq!(engine.pitch_bias_centi_deg(), 0.);
        assert_eq!(engine.roll_bias_centi_deg(), 0.);
        assert_eq!(engine.yaw_rate_out(), 0.);
        // Pilot throttle 1400 maps into (1050, 2000) -> ~0.368.
        assert!((engine.throttle_out() - 0.368).abs() < 0.01);
        assert!(arming.disarms.is_empty());
        // The sample flag was consumed.
        assert!(!flag.is_set());
    }

    #[test]
    fn activation_far_from_home_enters_attain_alt() {
        let mut engine = RescueEngine::new(RescueConfig::default());
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let mut inputs = flying_inputs();
        inputs.gps.distance_to_home_cm = 20_000; // 200 m

        // One idle tick seeds the return altitude from current data.
        flag.set();
        engine.update(1_000_000, &inputs, &flag, &mut arming);

        inputs.mode_active = true;
        engine.update(1_010_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::AttainAlt);
        assert_eq!(engine.failure(), Failure::Healthy);
    }

    #[test]
    fn activation_without_home_faults() {
        let mut config = RescueConfig::default();
        config.sanity_checks = crate::config::SanityPolicy::Off;
        let mut engine = RescueEngine::new(config);
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let mut inputs = flying_inputs();
        inputs.gps.has_home_fix = false;
        inputs.mode_active = true;

        engine.update(1_000_000, &inputs, &flag, &mut arming);
        // The failure is latched and the policy (Off) holds rather than
        // disarming.
        assert_eq!(engine.failure(), Failure::NoHomePoint);
        assert_eq!(engine.phase(), Phase::DoNothing);
        assert!(arming.disarms.is_empty());
    }

    #[test]
    fn mode_deactivation_returns_to_idle() {
        let mut engine = RescueEngine::new(RescueConfig::default());
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let mut inputs = flying_inputs();

        flag.set();
        engine.update(1_000_000, &inputs, &flag, &mut arming);
        inputs.mode_active = true;
        engine.update(1_010_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::AttainAlt);

        inputs.mode_active = false;
        engine.update(1_020_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.failure(), Failure::Healthy);
    }

    #[test]
    fn max_altitude_tracks_while_armed_and_resets_on_disarm() {
        let mut engine = RescueEngine::new(RescueConfig::default());
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let mut inputs = flying_inputs();

        inputs.altitude.estimated_altitude_cm = 3_000;
        engine.update(1_000_000, &inputs, &flag, &mut arming);
        inputs.altitude.estimated_altitude_cm = 8_000;
        engine.update(1_010_000, &inputs, &flag, &mut arming);
        inputs.altitude.estimated_altitude_cm = 4_000;
        engine.update(1_020_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.sensors.max_altitude_cm, 8_000.);

        inputs.arming.armed = false;
        engine.update(1_030_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.sensors.max_altitude_cm, 0.);
    }

    #[test]
    fn abort_disarms_and_inhibits_arming() {
        let mut config = RescueConfig::default();
        config.sanity_checks = crate::config::SanityPolicy::On;
        let mut engine = RescueEngine::new(config);
        let flag = NewSampleFlag::new();
        let mut arming = TestArming::default();
        let mut inputs = flying_inputs();

        flag.set();
        engine.update(1_000_000, &inputs, &flag, &mut arming);
        inputs.mode_active = true;
        engine.update(1_010_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::AttainAlt);

        // GPS goes unhealthy: the supervisor aborts, and the next tick's
        // phase machine disarms and stops.
        inputs.gps.healthy = false;
        engine.update(1_020_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::Abort);
        assert_eq!(engine.failure(), Failure::GpsLost);

        engine.update(1_030_000, &inputs, &flag, &mut arming);
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(arming.disarms, vec![DisarmReason::GpsRescue]);
        assert_eq!(arming.inhibits, vec![ArmingDisabledReason::GpsRescue]);
    }
}
