//! The read side of the rescue's seam with the rest of the flight controller:
//! per-tick snapshots of the GPS, altitude estimator, IMU, RC link and arming
//! state, plus the capability trait through which the rescue actuates disarm.
//!
//! Drivers and estimators live elsewhere; everything here is plain data the
//! main loop copies in before calling [`RescueEngine::update`].
//!
//! [`RescueEngine::update`]: crate::engine::RescueEngine::update

use core::sync::atomic::{AtomicBool, Ordering};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Snapshot of the GPS driver's published state.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsView {
    pub healthy: bool,
    pub num_sats: u8,
    pub has_fix: bool,
    /// A home position has been recorded (normally at arming).
    pub has_home_fix: bool,
    pub distance_to_home_cm: u32,
    /// Bearing to home in degrees * 10.
    pub direction_to_home_ddeg: i16,
    pub ground_speed_cm_s: u16,
}

/// Snapshot of the altitude estimator.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AltitudeView {
    pub estimated_altitude_cm: i32,
    /// The estimator has applied its ground-level offset; until then the
    /// altitude is not comparable across the flight.
    pub offset_applied: bool,
}

/// Snapshot of the attitude estimate and raw accelerometer.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttitudeView {
    /// Heading in degrees * 10, [0, 3600).
    pub yaw_ddeg: u16,
    /// Cosine of the tilt angle from level; 1.0 when flat.
    pub cos_tilt_angle: f32,
    /// Raw accelerometer sample, device units.
    pub accel: [f32; 3],
    /// Reciprocal of the device's 1 g reading, for scaling `accel`.
    pub acc_one_g_recip: f32,
}

impl Default for AttitudeView {
    fn default() -> Self {
        Self {
            yaw_ddeg: 0,
            cos_tilt_angle: 1.,
            accel: [0.; 3],
            acc_one_g_recip: 1.,
        }
    }
}

/// Snapshot of the RC link.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RcView {
    /// Raw pilot throttle, PWM units.
    pub throttle_pwm: u16,
    /// False when the receiver is not delivering valid frames (hard failsafe).
    pub receiving_signal: bool,
    /// Pilot has reversed the yaw channel.
    pub yaw_reversed: bool,
    /// Bottom of the usable throttle range, PWM units.
    pub min_check: u16,
}

impl Default for RcView {
    fn default() -> Self {
        Self {
            throttle_pwm: 1000,
            receiving_signal: true,
            yaw_reversed: false,
            min_check: 1050,
        }
    }
}

/// Snapshot of the arming subsystem.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArmingView {
    pub armed: bool,
    pub crash_flip_active: bool,
}

/// Everything the rescue reads in one tick.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RescueInputs {
    /// The GPS-rescue flight mode switch (or failsafe) is active.
    pub mode_active: bool,
    pub gps: GpsView,
    pub altitude: AltitudeView,
    pub attitude: AttitudeView,
    pub rc: RcView,
    pub arming: ArmingView,
}

/// Cross-context flag raised by the GPS driver when a fresh sample has been
/// published. The engine samples it at the start of a tick and clears it at
/// the end; release/acquire ordering makes the sample data written before
/// `set` visible to the tick that observes the flag.
#[derive(Default)]
pub struct NewSampleFlag {
    flag: AtomicBool,
}

impl NewSampleFlag {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Called from the GPS driver after publishing a sample.
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Why the rescue disarmed the craft; forwarded to the arming subsystem for
/// its telemetry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DisarmReason {
    Failsafe = 0,
    GpsRescue = 1,
    CrashProtection = 2,
}

/// Why arming is being inhibited.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ArmingDisabledReason {
    ArmSwitch = 0,
    GpsRescue = 1,
}

/// Capability through which the rescue actuates the arming subsystem. The
/// firmware implements this against the real arming flags; tests implement it
/// with a recorder.
pub trait ArmingControl {
    /// Latch arming off so the craft cannot re-arm without a switch cycle.
    fn set_arming_disabled(&mut self, reason: ArmingDisabledReason);
    /// Stop the motors now.
    fn disarm(&mut self, reason: DisarmReason);
}
