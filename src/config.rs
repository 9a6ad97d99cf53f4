//! Rescue configuration. Persisted by the flight controller's settings layer;
//! this module only defines the field set, defaults, validation, and the raw
//! byte layout that layer stores.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Low end of the RC PWM range.
pub const PWM_MIN: f32 = 1000.;
/// High end of the RC PWM range.
pub const PWM_MAX: f32 = 2000.;

/// How strictly supervisor faults end the rescue.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SanityPolicy {
    /// Faults hold position (hover) but never disarm.
    Off = 0,
    /// Any fault aborts the rescue and disarms.
    On = 1,
    /// Faults disarm only when the RC link is also down; otherwise hold.
    FailsafeOnly = 2,
}

/// Basis for the altitude flown back to home.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AltitudeMode {
    /// Highest altitude seen this flight, plus the buffer.
    Max = 0,
    /// A fixed configured altitude.
    Fixed = 1,
    /// Altitude at the moment the rescue starts, plus the buffer.
    Current = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    BadLength,
    BadVersion(u8),
    BadValue(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadLength => write!(f, "config blob has the wrong length"),
            Self::BadVersion(v) => write!(f, "unsupported config version {v}"),
            Self::BadValue(field) => write!(f, "config field `{field}` out of range"),
        }
    }
}

/// Rescue settings, immutable while a rescue runs.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RescueConfig {
    /// Maximum pitch/roll authority the rescue may add, degrees.
    pub angle_deg: u8,
    /// Return altitude for `AltitudeMode::Fixed`, metres.
    pub initial_altitude_m: u16,
    /// Margin added above the max/current altitude basis, metres.
    pub rescue_altitude_buffer_m: u16,
    /// Altitude below which the final landing phase begins, metres.
    pub target_landing_altitude_m: u16,
    /// Radius at which the descent toward home begins, metres.
    pub descent_distance_m: u16,
    /// Activating closer to home than this skips straight to landing, metres.
    pub min_rescue_dth_m: u16,
    /// Cruise groundspeed toward home, cm/s.
    pub rescue_groundspeed_cm_s: u16,
    pub throttle_p: u8,
    pub throttle_i: u8,
    pub throttle_d: u8,
    pub vel_p: u8,
    pub vel_i: u8,
    pub vel_d: u8,
    pub yaw_p: u8,
    /// Throttle clamp and hover feedforward point, PWM units.
    pub throttle_min: u16,
    pub throttle_max: u16,
    pub throttle_hover: u16,
    /// Target-altitude slew caps, cm/s.
    pub ascend_rate_cm_s: u16,
    pub descend_rate_cm_s: u16,
    /// Satellite floor for the low-sat counters.
    pub min_sats: u8,
    pub sanity_checks: SanityPolicy,
    pub altitude_mode: AltitudeMode,
    pub use_mag: bool,
    pub allow_arming_without_fix: bool,
    /// Roll cross-feed from commanded yaw, percent.
    pub roll_mix_pct: u8,
}

impl Default for RescueConfig {
    /// These starting values are Betaflight defaults.
    fn default() -> Self {
        Self {
            angle_deg: 32,
            initial_altitude_m: 30,
            rescue_altitude_buffer_m: 10,
            target_landing_altitude_m: 5,
            descent_distance_m: 20,
            min_rescue_dth_m: 30,
            rescue_groundspeed_cm_s: 500,
            throttle_p: 20,
            throttle_i: 20,
            throttle_d: 10,
            vel_p: 6,
            vel_i: 20,
            vel_d: 70,
            yaw_p: 25,
            throttle_min: 1100,
            throttle_max: 1600,
            throttle_hover: 1275,
            ascend_rate_cm_s: 500,
            descend_rate_cm_s: 125,
            min_sats: 8,
            sanity_checks: SanityPolicy::FailsafeOnly,
            altitude_mode: AltitudeMode::Max,
            use_mag: true,
            allow_arming_without_fix: false,
            roll_mix_pct: 100,
        }
    }
}

pub const CONFIG_SIZE: usize = 37;

impl RescueConfig {
    /// Version tag of the persisted layout. Bump on any layout change.
    pub const VERSION: u8 = 2;

    /// Range-check the settings. The rescue reports itself unconfigured (and
    /// the OSD flags it) while this fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=80).contains(&self.angle_deg) {
            return Err(ConfigError::BadValue("angle_deg"));
        }
        if self.throttle_min >= self.throttle_hover || self.throttle_hover >= self.throttle_max {
            return Err(ConfigError::BadValue("throttle range"));
        }
        if self.roll_mix_pct > 100 {
            return Err(ConfigError::BadValue("roll_mix_pct"));
        }
        if self.ascend_rate_cm_s == 0 || self.descend_rate_cm_s == 0 {
            return Err(ConfigError::BadValue("climb rates"));
        }
        if self.rescue_groundspeed_cm_s == 0 {
            return Err(ConfigError::BadValue("rescue_groundspeed_cm_s"));
        }
        if self.min_sats < 4 {
            return Err(ConfigError::BadValue("min_sats"));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut result = [0; CONFIG_SIZE];

        result[0] = Self::VERSION;
        result[1] = self.angle_deg;
        result[2..4].copy_from_slice(&self.initial_altitude_m.to_le_bytes());
        result[4..6].copy_from_slice(&self.rescue_altitude_buffer_m.to_le_bytes());
        result[6..8].copy_from_slice(&self.target_landing_altitude_m.to_le_bytes());
        result[8..10].copy_from_slice(&self.descent_distance_m.to_le_bytes());
        result[10..12].copy_from_slice(&self.min_rescue_dth_m.to_le_bytes());
        result[12..14].copy_from_slice(&self.rescue_groundspeed_cm_s.to_le_bytes());
        result[14] = self.throttle_p;
        result[15] = self.throttle_i;
        result[16] = self.throttle_d;
        result[17] = self.vel_p;
        result[18] = self.vel_i;
        result[19] = self.vel_d;
        result[20] = self.yaw_p;
        result[21..23].copy_from_slice(&self.throttle_min.to_le_bytes());
        result[23..25].copy_from_slice(&self.throttle_max.to_le_bytes());
        result[25..27].copy_from_slice(&self.throttle_hover.to_le_bytes());
        result[27..29].copy_from_slice(&self.ascend_rate_cm_s.to_le_bytes());
        result[29..31].copy_from_slice(&self.descend_rate_cm_s.to_le_bytes());
        result[31] = self.min_sats;
        result[32] = self.sanity_checks.into();
        result[33] = self.altitude_mode.into();
        result[34] = self.use_mag as u8;
        result[35] = self.allow_arming_without_fix as u8;
        result[36] = self.roll_mix_pct;

        result
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() != CONFIG_SIZE {
            return Err(ConfigError::BadLength);
        }
        if buf[0] != Self::VERSION {
            return Err(ConfigError::BadVersion(buf[0]));
        }

        fn u16_at(buf: &[u8], i: usize) -> u16 {
            u16::from_le_bytes([buf[i], buf[i + 1]])
        }

        Ok(Self {
            angle_deg: buf[1],
            initial_altitude_m: u16_at(buf, 2),
            rescue_altitude_buffer_m: u16_at(buf, 4),
            target_landing_altitude_m: u16_at(buf, 6),
            descent_distance_m: u16_at(buf, 8),
            min_rescue_dth_m: u16_at(buf, 10),
            rescue_groundspeed_cm_s: u16_at(buf, 12),
            throttle_p: buf[14],
            throttle_i: buf[15],
            throttle_d: buf[16],
            vel_p: buf[17],
            vel_i: buf[18],
            vel_d: buf[19],
            yaw_p: buf[20],
            throttle_min: u16_at(buf, 21),
            throttle_max: u16_at(buf, 23),
            throttle_hover: u16_at(buf, 25),
            ascend_rate_cm_s: u16_at(buf, 27),
            descend_rate_cm_s: u16_at(buf, 29),
            min_sats: buf[31],
            sanity_checks: SanityPolicy::try_from(buf[32])
                .map_err(|_| ConfigError::BadValue("sanity_checks"))?,
            altitude_mode: AltitudeMode::try_from(buf[33])
                .map_err(|_| ConfigError::BadValue("altitude_mode"))?,
            use_mag: buf[34] != 0,
            allow_arming_without_fix: buf[35] != 0,
            roll_mix_pct: buf[36],
        })
    }
}
