//! # Constants and type definitions for Pulsefit
//!
//! This module centralizes the **physical constants**, **conversion factors**, and **common type
//! aliases** used throughout the `pulsefit` library.
//!
//! ## Overview
//!
//! - Astronomical and relativistic constants (speed of light, solar mass in seconds, AU)
//! - Unit conversions (degrees ↔ radians, days ↔ seconds, mas ↔ radians, km ↔ light-seconds)
//! - Dispersion constant used by the cold-plasma delay
//! - Core type aliases shared by the clock, ephemeris, model and fitting layers

use std::collections::HashMap;

use ahash::RandomState;

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for trigonometric conversions
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Number of seconds in a Julian day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Number of days in a Julian year
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Number of seconds in a Julian year
pub const SECONDS_PER_YEAR: f64 = DAYS_PER_YEAR * SECONDS_PER_DAY;

/// Astronomical Unit in kilometers (IAU 2012)
pub const AU: f64 = 149_597_870.7;

/// MJD epoch of J2000.0 (2000-01-01 12:00:00 TT)
pub const T2000: f64 = 51544.5;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Arcseconds → radians
pub const RADSEC: f64 = std::f64::consts::PI / 648000.0;

/// Milliarcseconds → radians
pub const RADMAS: f64 = RADSEC / 1000.0;

/// Earth equatorial radius in meters (GRS1980/WGS84)
pub const EARTH_MAJOR_AXIS: f64 = 6_378_137.0;

/// Earth polar radius in meters (GRS1980/WGS84)
pub const EARTH_MINOR_AXIS: f64 = 6_356_752.3;

/// Sidereal rotation rate of the Earth relative to the solar day
pub const SIDEREAL_RATIO: f64 = 1.00273790934;

/// Speed of light in km/s
pub const VLIGHT: f64 = 2.99792458e5;

/// One astronomical unit expressed in light-seconds
pub const AU_LIGHT_SECONDS: f64 = AU / VLIGHT;

/// One parsec expressed in light-seconds
pub const PARSEC_LIGHT_SECONDS: f64 = AU_LIGHT_SECONDS * 648000.0 / std::f64::consts::PI;

/// G·M☉ / c³ in seconds (solar mass expressed as a time)
pub const T_SUN: f64 = 4.925490947641267e-6;

/// TT − TAI in seconds
pub const TT_MINUS_TAI: f64 = 32.184;

/// Cold-plasma dispersion constant in s·MHz²·cm³/pc (1 / 2.41e-4, tempo convention)
pub const DM_CONST: f64 = 1.0 / 2.41e-4;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcseconds
pub type ArcSec = f64;
/// Angle in radians
pub type Radian = f64;
/// Distance in meters
pub type Meter = f64;
/// Time in seconds
pub type Second = f64;
/// Distance in light-seconds
pub type LightSecond = f64;
/// Frequency in MHz
pub type MHz = f64;
/// Modified Julian Date (days), low-precision form used for table lookups
pub type MJD = f64;

/// Observatory identifier as it appears on TOAs (e.g. `"gbt"`, `"@"`)
pub type ObsCode = String;

/// Hash map using the crate-wide `ahash` hasher
pub type FastMap<K, V> = HashMap<K, V, RandomState>;
