//! Debug channels, written as side effects of the tick so a blackbox or
//! configurator can trace the rescue without extra instrumentation.

/// Four 4-slot numeric groups. Slot assignments are stable; tooling depends
/// on them.
#[derive(Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RescueDebug {
    /// [0] error angle, deg * 10; [1] yaw rate, deg/s; [2] roll mix
    /// attenuation, percent; [3] roll bias, centi-deg.
    pub heading: [i32; 4],
    /// [0] velocity P; [1] velocity I; [2] velocity D; [3] pitch bias,
    /// centi-deg.
    pub velocity: [i32; 4],
    /// [0] throttle P; [1] throttle I; [2] throttle D; [3] rescue throttle,
    /// PWM.
    pub throttle_pid: [i32; 4],
    /// [0] distance to home, m; [1] velocity to home, cm/s; [2] current
    /// altitude, cm; [3] target altitude, cm.
    pub tracking: [i32; 4],
}
