//! The three cascaded setpoint controllers: heading to yaw rate (with roll
//! cross-feed), closure velocity to pitch bias, and altitude to throttle.
//! They run every tick but only recompute when a fresh GPS sample arrived;
//! between samples the last outputs hold.
//!
//! Sample-rate normalization: `s = gps_dt_s * 10` is ~1 at the 10 Hz design
//! point. Integrals multiply by `s`, derivatives divide by it, which keeps
//! the gains meaningful from 1 Hz to 25 Hz GPS.

#[allow(unused_imports)]
use num_traits::float::Float; // abs on no_std builds.

use crate::config::RescueConfig;
use crate::debug::RescueDebug;
use crate::inputs::RescueInputs;
use crate::sensors::SensorView;
use crate::state::{IntentModel, Phase};
use crate::util::Pt1Filter;

const YAW_RATE_MAX_DPS: f32 = 90.;
const VELOCITY_I_CLAMP: f32 = 1000.;
const THROTTLE_I_CLAMP: f32 = 200.;

/// Controller memory and held outputs. Zeroed when a rescue initializes so
/// one flight's state never leaks into the next.
#[derive(Default)]
pub struct PositionController {
    velocity_i: f32,
    prev_velocity_error: f32,
    velocity_d_filter: Pt1Filter,
    /// Previous pitch adjustment, pre-average (see `update_velocity`).
    prev_pitch_adjustment: f32,

    throttle_i: f32,
    prev_altitude_error_m: f32,
    prev_throttle_d_raw: f32,
    prev_throttle_d_boosted: f32,
    throttle_d_filter: Pt1Filter,

    // Held outputs.
    yaw_rate_dps: f32,
    pitch_bias_cdeg: f32,
    roll_bias_cdeg: f32,
    rescue_throttle: f32,
}

impl PositionController {
    pub fn yaw_rate_dps(&self) -> f32 {
        self.yaw_rate_dps
    }

    pub fn pitch_bias_cdeg(&self) -> f32 {
        self.pitch_bias_cdeg
    }

    pub fn roll_bias_cdeg(&self) -> f32 {
        self.roll_bias_cdeg
    }

    /// Rescue throttle in PWM units; the pilot's raw throttle while idle.
    pub fn rescue_throttle(&self) -> f32 {
        self.rescue_throttle
    }

    pub fn reset(&mut self, config: &RescueConfig) {
        self.velocity_i = 0.;
        self.prev_velocity_error = 0.;
        self.velocity_d_filter.reset();
        self.prev_pitch_adjustment = 0.;
        self.throttle_i = 0.;
        self.prev_altitude_error_m = 0.;
        self.prev_throttle_d_raw = 0.;
        self.prev_throttle_d_boosted = 0.;
        self.throttle_d_filter.reset();
        self.yaw_rate_dps = 0.;
        self.pitch_bias_cdeg = 0.;
        self.roll_bias_cdeg = 0.;
        self.rescue_throttle = config.throttle_hover as f32;
    }

    pub fn apply(
        &mut self,
        phase: Phase,
        new_gps_sample: bool,
        sensors: &SensorView,
        intent: &IntentModel,
        config: &RescueConfig,
        inputs: &RescueInputs,
        debug: &mut RescueDebug,
    ) {
        match phase {
            Phase::Idle => {
                // No rescue active: biases off, throttle passes through.
                self.yaw_rate_dps = 0.;
                self.pitch_bias_cdeg = 0.;
                self.roll_bias_cdeg = 0.;
                self.rescue_throttle = inputs.rc.throttle_pwm as f32;
                return;
            }
            Phase::Initialize => {
                self.reset(config);
                return;
            }
            Phase::DoNothing => {
                self.yaw_rate_dps = 0.;
                self.pitch_bias_cdeg = 0.;
                self.roll_bias_cdeg = 0.;
                self.rescue_throttle = config.throttle_hover as f32;
                return;
            }
            _ => {}
        }

        if !new_gps_sample {
            return;
        }
        let s = sensors.gps_dt_s * 10.;

        self.update_heading(sensors, intent, config, inputs, debug);
        self.update_velocity(s, sensors, intent, config, debug);
        self.update_throttle(s, sensors, intent, config, inputs, debug);
    }

    fn update_heading(
        &mut self,
        sensors: &SensorView,
        intent: &IntentModel,
        config: &RescueConfig,
        inputs: &RescueInputs,
        debug: &mut RescueDebug,
    ) {
        let mut yaw_rate = (sensors.error_angle_deg * config.yaw_p as f32 * 0.1)
            .clamp(-YAW_RATE_MAX_DPS, YAW_RATE_MAX_DPS);

        // Cross-feed roll into the turn, fading it out entirely by
        // 100 deg/s of commanded yaw.
        let roll_mix_attenuation = (1. - yaw_rate.abs() * 0.01).clamp(0., 1.);
        let roll_limit_cdeg = intent.roll_angle_limit_deg * 100.;
        self.roll_bias_cdeg = (-yaw_rate * config.roll_mix_pct as f32 * roll_mix_attenuation)
            .clamp(-roll_limit_cdeg, roll_limit_cdeg);

        if inputs.rc.yaw_reversed {
            yaw_rate = -yaw_rate;
        }
        if !intent.update_yaw {
            yaw_rate = 0.;
        }
        self.yaw_rate_dps = yaw_rate;

        debug.heading = [
            (sensors.error_angle_deg * 10.) as i32,
            yaw_rate as i32,
            (roll_mix_attenuation * 100.) as i32,
            self.roll_bias_cdeg as i32,
        ];
    }

    fn update_velocity(
        &mut self,
        s: f32,
        sensors: &SensorView,
        intent: &IntentModel,
        config: &RescueConfig,
        debug: &mut RescueDebug,
    ) {
        // Suppress the forward-velocity target while not pointing home; full
        // target only inside 0 deg error, nothing beyond 60.
        let limiter = ((60. - sensors.abs_error_angle_deg) / 60.).clamp(0., 1.);
        let error = intent.target_velocity_cm_s * limiter - sensors.velocity_to_home_cm_s;

        let p = error * config.vel_p as f32;

        self.velocity_i += 0.01 * config.vel_i as f32 * error * s;
        self.velocity_i = self.velocity_i.clamp(-VELOCITY_I_CLAMP, VELOCITY_I_CLAMP);

        let d_raw = (error - self.prev_velocity_error) / s;
        self.prev_velocity_error = error;
        let d = self.velocity_d_filter.apply(d_raw, sensors.filter_k) * config.vel_d as f32;

        let mut pitch = p + self.velocity_i + d;

        // Slew-limit, then average with the previous adjustment. The stored
        // value is the pre-average one; storing the emitted average would
        // halve the slew response.
        pitch = self.prev_pitch_adjustment
            + (pitch - self.prev_pitch_adjustment)
                .clamp(-sensors.max_pitch_step, sensors.max_pitch_step);
        let pitch_out = 0.5 * (self.prev_pitch_adjustment + pitch);
        self.prev_pitch_adjustment = pitch;

        let limit_cdeg = intent.pitch_angle_limit_deg * 100.;
        self.pitch_bias_cdeg = pitch_out.clamp(-limit_cdeg, limit_cdeg);

        debug.velocity = [
            p as i32,
            self.velocity_i as i32,
            d as i32,
            self.pitch_bias_cdeg as i32,
        ];
    }

    fn update_throttle(
        &mut self,
        s: f32,
        sensors: &SensorView,
        intent: &IntentModel,
        config: &RescueConfig,
        inputs: &RescueInputs,
        debug: &mut RescueDebug,
    ) {
        let altitude_error_m = (intent.target_altitude_cm - sensors.current_altitude_cm) * 0.01;

        let p = config.throttle_p as f32 * altitude_error_m;

        self.throttle_i += 0.01 * config.throttle_i as f32 * altitude_error_m * s;
        self.throttle_i = self.throttle_i.clamp(-THROTTLE_I_CLAMP, THROTTLE_I_CLAMP);

        // D with a jerk boost, then a two-point moving average, then PT1
        // smoothing matched to the sample interval.
        let d_raw = (altitude_error_m - self.prev_altitude_error_m) / s;
        self.prev_altitude_error_m = altitude_error_m;
        let jerk = 2. * (d_raw - self.prev_throttle_d_raw);
        self.prev_throttle_d_raw = d_raw;
        let boosted = d_raw + jerk;
        let averaged = 0.5 * (boosted + self.prev_throttle_d_boosted);
        self.prev_throttle_d_boosted = boosted;
        let d = self.throttle_d_filter.apply(averaged, sensors.filter_k)
            * 10.
            * config.throttle_d as f32;

        let hover = config.throttle_hover as f32;
        // Thrust lost to tilt comes back as extra throttle.
        let tilt_ff = (1. - inputs.attitude.cos_tilt_angle) * (hover - 1000.);

        self.rescue_throttle = (hover + p + self.throttle_i + d + tilt_ff)
            .clamp(config.throttle_min as f32, config.throttle_max as f32);

        debug.throttle_pid = [
            p as i32,
            self.throttle_i as i32,
            d as i32,
            self.rescue_throttle as i32,
        ];
    }
}
