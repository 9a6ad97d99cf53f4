//! Normalized per-tick and per-GPS-sample quantities derived from the raw
//! input views. Altitude and accelerometer values refresh every tick; the
//! GPS block recomputes only when the driver flags a fresh sample, so the
//! derived terms stay consistent from 1 Hz to 25 Hz GPS.

#[allow(unused_imports)]
use num_traits::float::Float; // sqrt, abs on no_std builds.

use crate::config::RescueConfig;
use crate::inputs::RescueInputs;
use crate::state::Phase;
use crate::util::{pt1_gain, wrap_180};

/// Cutoff of the PT1 smoothing applied to controller derivative terms.
const D_SMOOTHING_CUTOFF_HZ: f32 = 0.8;

/// Slew cap on the pitch bias, centi-degrees per second.
const PITCH_SLEW_RATE_CDEG_S: f32 = 3000.;

#[derive(Default)]
pub struct SensorView {
    // Refreshed every tick.
    pub current_altitude_cm: f32,
    /// Accelerometer magnitude in g; computed at tick rate, but only while
    /// landing (impact detection must not wait for a GPS sample).
    pub acc_magnitude_g: f32,
    pub healthy: bool,

    // Refreshed per GPS sample.
    pub distance_to_home_cm: f32,
    pub distance_to_home_m: f32,
    pub ground_speed_cm_s: f32,
    pub direction_to_home_deg: f32,
    /// Closure rate toward home, cm/s; positive means approaching.
    pub velocity_to_home_cm_s: f32,
    /// Heading error to the home bearing, degrees in (-180, 180].
    pub error_angle_deg: f32,
    pub abs_error_angle_deg: f32,
    /// Interval between GPS samples, clamped to [0.01, 1.0] s.
    pub gps_dt_s: f32,
    /// PT1 gain matched to `gps_dt_s` for derivative smoothing.
    pub filter_k: f32,
    /// Per-sample target-altitude slew steps, cm.
    pub ascend_step_cm: f32,
    pub descend_step_cm: f32,
    /// Per-sample pitch-bias slew cap, centi-degrees.
    pub max_pitch_step: f32,

    /// Highest altitude seen while armed and not rescuing; the `Max` return
    /// altitude basis. Maintained by the idle tasks, cleared on disarm.
    pub max_altitude_cm: f32,

    prev_gps_time_us: u64,
    prev_distance_to_home_cm: f32,
}

impl SensorView {
    pub fn refresh(
        &mut self,
        now_us: u64,
        inputs: &RescueInputs,
        config: &RescueConfig,
        phase: Phase,
        new_gps_sample: bool,
    ) {
        self.current_altitude_cm = inputs.altitude.estimated_altitude_cm as f32;
        self.healthy = inputs.gps.healthy;

        if phase == Phase::Landing {
            let [x, y, z] = inputs.attitude.accel;
            self.acc_magnitude_g =
                (x * x + y * y + z * z).sqrt() * inputs.attitude.acc_one_g_recip;
        } else {
            self.acc_magnitude_g = 0.;
        }

        if new_gps_sample {
            self.refresh_gps_block(now_us, inputs, config);
        }
    }

    fn refresh_gps_block(&mut self, now_us: u64, inputs: &RescueInputs, config: &RescueConfig) {
        let dt = (now_us.wrapping_sub(self.prev_gps_time_us)) as f32 / 1_000_000.;
        self.prev_gps_time_us = now_us;
        self.gps_dt_s = dt.clamp(0.01, 1.0);
        self.filter_k = pt1_gain(D_SMOOTHING_CUTOFF_HZ, self.gps_dt_s);

        let distance_cm = inputs.gps.distance_to_home_cm as f32;
        // The first sample after a reset has no usable previous distance;
        // report zero closure rather than a spike.
        self.velocity_to_home_cm_s = if self.prev_distance_to_home_cm == 0. {
            0.
        } else {
            (self.prev_distance_to_home_cm - distance_cm) / self.gps_dt_s
        };
        self.prev_distance_to_home_cm = distance_cm;
        self.distance_to_home_cm = distance_cm;
        self.distance_to_home_m = distance_cm / 100.;

        self.ground_speed_cm_s = inputs.gps.ground_speed_cm_s as f32;
        self.direction_to_home_deg = inputs.gps.direction_to_home_ddeg as f32 / 10.;

        let error_ddeg = inputs.attitude.yaw_ddeg as f32 - inputs.gps.direction_to_home_ddeg as f32;
        self.error_angle_deg = wrap_180(error_ddeg / 10.);
        self.abs_error_angle_deg = self.error_angle_deg.abs();

        self.ascend_step_cm = self.gps_dt_s * config.ascend_rate_cm_s as f32;
        self.descend_step_cm = self.gps_dt_s * config.descend_rate_cm_s as f32;
        self.max_pitch_step = self.gps_dt_s * PITCH_SLEW_RATE_CDEG_S;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::RescueInputs;

    fn base_inputs() -> RescueInputs {
        let mut inputs = RescueInputs::default();
        inputs.gps.healthy = true;
        inputs
    }

    fn sample(view: &mut SensorView, now_us: u64, inputs: &RescueInputs) {
        view.refresh(now_us, inputs, &RescueConfig::default(), Phase::FlyHome, true);
    }

    #[test]
    fn gps_dt_clamps_to_documented_range() {
        let mut view = SensorView::default();
        let inputs = base_inputs();

        // First sample: enormous elapsed time clamps to 1 s.
        sample(&mut view, 10_000_000, &inputs);
        assert_eq!(view.gps_dt_s, 1.0);

        // 2 ms later: clamps up to 10 ms.
        sample(&mut view, 10_002_000, &inputs);
        assert_eq!(view.gps_dt_s, 0.01);

        // 100 ms later: taken as-is.
        sample(&mut view, 10_102_000, &inputs);
        assert!((view.gps_dt_s - 0.1).abs() < 1e-6);
    }

    #[test]
    fn first_sample_velocity_is_discarded() {
        let mut view = SensorView::default();
        let mut inputs = base_inputs();

        inputs.gps.distance_to_home_cm = 20_000;
        sample(&mut view, 1_000_000, &inputs);
        assert_eq!(view.velocity_to_home_cm_s, 0.);

        // 100 ms later, 50 cm closer: 500 cm/s toward home.
        inputs.gps.distance_to_home_cm = 19_950;
        sample(&mut view, 1_100_000, &inputs);
        assert!((view.velocity_to_home_cm_s - 500.).abs() < 1e-3);

        // Receding reads negative.
        inputs.gps.distance_to_home_cm = 20_050;
        sample(&mut view, 1_200_000, &inputs);
        assert!((view.velocity_to_home_cm_s + 1000.).abs() < 1e-3);
    }

    #[test]
    fn error_angle_wraps_across_north() {
        let mut view = SensorView::default();
        let mut inputs = base_inputs();

        inputs.attitude.yaw_ddeg = 3500; // 350 deg
        inputs.gps.direction_to_home_ddeg = 100; // 10 deg
        sample(&mut view, 1_000_000, &inputs);
        assert!((view.error_angle_deg - -20.).abs() < 1e-3);
        assert!((view.abs_error_angle_deg - 20.).abs() < 1e-3);
    }

    #[test]
    fn slew_steps_scale_with_sample_interval() {
        let mut view = SensorView::default();
        let inputs = base_inputs();

        sample(&mut view, 1_000_000, &inputs);
        // 100 ms cadence.
        sample(&mut view, 1_100_000, &inputs);
        assert!((view.ascend_step_cm - 50.).abs() < 1e-3);
        assert!((view.descend_step_cm - 12.5).abs() < 1e-3);
        assert!((view.max_pitch_step - 300.).abs() < 1e-3);
        assert!((view.filter_k - 0.334).abs() < 0.01);
    }

    #[test]
    fn accel_magnitude_only_computed_while_landing() {
        let mut view = SensorView::default();
        let mut inputs = base_inputs();
        inputs.attitude.accel = [0., 0., 1024.];
        inputs.attitude.acc_one_g_recip = 1. / 512.;

        view.refresh(0, &inputs, &RescueConfig::default(), Phase::FlyHome, false);
        assert_eq!(view.acc_magnitude_g, 0.);

        view.refresh(0, &inputs, &RescueConfig::default(), Phase::Landing, false);
        assert!((view.acc_magnitude_g - 2.).abs() < 1e-3);
    }
}
