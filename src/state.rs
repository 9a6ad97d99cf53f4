//! Rescue phase and failure codes, and the setpoint envelope the phase
//! machine hands to the controllers.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Where the rescue is in its sequence. Repr u8 so OSD/telemetry can ship the
/// code as-is.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Phase {
    #[default]
    Idle = 0,
    Initialize = 1,
    AttainAlt = 2,
    Rotate = 3,
    FlyHome = 4,
    Descent = 5,
    Landing = 6,
    Abort = 7,
    Complete = 8,
    /// Hold hover with zero authority; the supervisor escalates to Abort
    /// after ten seconds here.
    DoNothing = 9,
}

/// Unhealthy condition detected during a rescue. Stored, never thrown; the
/// sanity supervisor maps it to continue/hold/abort.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Failure {
    #[default]
    Healthy = 0,
    Flyaway = 1,
    GpsLost = 2,
    LowSats = 3,
    CrashFlipDetected = 4,
    Stalled = 5,
    /// Kept for telemetry compatibility; the current phase flow lands
    /// vertically instead of raising this.
    TooClose = 6,
    NoHomePoint = 7,
}

/// Per-phase setpoints and authority limits. The phase machine writes, the
/// controllers read.
pub struct IntentModel {
    /// Altitude to fly home at, cm.
    pub return_altitude_cm: f32,
    /// Altitude setpoint the throttle controller tracks, cm.
    pub target_altitude_cm: f32,
    /// Forward groundspeed setpoint, cm/s.
    pub target_velocity_cm_s: f32,
    pub pitch_angle_limit_deg: f32,
    pub roll_angle_limit_deg: f32,
    pub update_yaw: bool,
    /// Radius at which descent begins, clamped to the distance at activation.
    /// Never below the 10 m floor, even before the idle tasks have seeded it.
    pub descent_distance_m: f32,
    /// Progress-fault counter maintained by the supervisor's 1 Hz pass.
    pub seconds_failing: i8,
}

impl Default for IntentModel {
    fn default() -> Self {
        Self {
            return_altitude_cm: 0.,
            target_altitude_cm: 0.,
            target_velocity_cm_s: 0.,
            pitch_angle_limit_deg: 0.,
            roll_angle_limit_deg: 0.,
            update_yaw: false,
            descent_distance_m: 10.,
            seconds_failing: 0,
        }
    }
}

impl IntentModel {
    /// Authority restriction applied entering Initialize, AttainAlt and
    /// Landing: no forward velocity, half pitch, no roll, fresh fault counter.
    pub fn reduce_authority(&mut self, angle_deg: f32) {
        self.target_velocity_cm_s = 0.;
        self.pitch_angle_limit_deg = angle_deg / 2.;
        self.roll_angle_limit_deg = 0.;
        self.seconds_failing = 0;
    }
}
