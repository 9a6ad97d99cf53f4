//! GPS return-to-home rescue for a multirotor flight controller.
//!
//! When activated (by mode switch or failsafe), the rescue flies the craft
//! back to the recorded home position and lands it with no pilot input: climb
//! to a safe return altitude, rotate to face home, fly back at the configured
//! groundspeed, then descend and land, watching the accelerometer for the
//! touchdown impact. A sanity supervisor aborts or holds when the rescue
//! stops making sense (GPS lost, too few satellites, crash-flip, no progress
//! toward home).
//!
//! The crate owns no hardware. The firmware's main loop copies sensor state
//! into [`RescueInputs`] and calls [`RescueEngine::update`] at tick rate
//! (~100 Hz); GPS-derived terms recompute only when the driver raises the
//! [`NewSampleFlag`], normalized so behavior is consistent from 1 Hz to
//! 25 Hz GPS. Outputs (pitch/roll biases, yaw rate, throttle) are read back
//! through accessors; disarm and arming-inhibit actuate through the
//! [`ArmingControl`] capability so integrations and tests choose what those
//! mean.
//!
//! `no_std` except under test. Logging goes through `defmt` or `log`,
//! whichever feature the integrator enables.

#![cfg_attr(not(test), no_std)]

// This must come first so the logging macros are visible everywhere.
#[macro_use]
mod fmt;

pub mod config;
mod controllers;
pub mod debug;
pub mod engine;
pub mod inputs;
mod sanity;
pub mod sensors;
pub mod state;
mod util;

pub use config::{AltitudeMode, ConfigError, RescueConfig, SanityPolicy, PWM_MAX, PWM_MIN};
pub use debug::RescueDebug;
pub use engine::RescueEngine;
pub use inputs::{
    AltitudeView, ArmingControl, ArmingDisabledReason, ArmingView, AttitudeView, DisarmReason,
    GpsView, NewSampleFlag, RcView, RescueInputs,
};
pub use state::{Failure, Phase};
