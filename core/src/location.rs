//! Observing site
//!
//! Converts between horizontal (azimuth/altitude) and equatorial
//! (right ascension/declination) coordinates for a site on Earth at a given
//! time. [`SkyConverter`] is the seam used by the coordinator; [`Location`]
//! is the built-in implementation based on mean sidereal time with an
//! optional refraction correction. Precession and nutation are not modelled.
//!
//! Conventions:
//! - azimuth in degrees from North through East, `[0, 360)`
//! - altitude and declination in degrees
//! - right ascension in hours, `[0, 24)`

use crate::attitude::normalize_azimuth;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Horizontal coordinates, degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizontal {
    pub azi: f64,
    pub alt: f64,
}

/// Equatorial coordinates, right ascension in hours and declination in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Equatorial {
    pub ra: f64,
    pub dec: f64,
}

/// Horizontal <-> equatorial conversion at a site
pub trait SkyConverter: Send + Sync {
    fn to_equatorial(&self, horizontal: Horizontal, utc: DateTime<Utc>) -> Equatorial;
    fn to_horizontal(&self, equatorial: Equatorial, utc: DateTime<Utc>) -> Horizontal;
}

/// Site description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees, negative for West
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: f64,
    /// Pressure in hPa, 0 disables the refraction correction
    pub pressure: f64,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity `[0, 1]`
    pub rel_humidity: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 33.30167,
            longitude: -87.6075,
            elevation: 85.0,
            pressure: 0.0,
            temperature: 0.0,
            rel_humidity: 0.0,
        }
    }
}

/// Observing site
#[derive(Debug, Clone)]
pub struct Location {
    config: LocationConfig,
}

impl Location {
    pub fn new(config: LocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    /// Local mean sidereal time in degrees
    pub fn local_sidereal_time(&self, utc: DateTime<Utc>) -> f64 {
        normalize_azimuth(greenwich_mean_sidereal_time(utc) + self.config.longitude)
    }

    fn refraction_enabled(&self) -> bool {
        self.config.pressure > 0.0
    }

    /// Pressure/temperature scale applied to the standard refraction formulas
    fn refraction_scale(&self) -> f64 {
        (self.config.pressure / 1010.0) * (283.0 / (273.0 + self.config.temperature))
    }

    /// Apparent altitude for a geometric altitude (Saemundsson)
    fn apparent_altitude(&self, true_alt: f64) -> f64 {
        if !self.refraction_enabled() || true_alt < -1.0 {
            return true_alt;
        }
        let arg = (true_alt + 10.3 / (true_alt + 5.11)).to_radians();
        let r_arcmin = 1.02 / arg.tan() * self.refraction_scale();
        (true_alt + r_arcmin / 60.0).min(90.0)
    }

    /// Geometric altitude for an apparent altitude (Bennett)
    fn true_altitude(&self, apparent_alt: f64) -> f64 {
        if !self.refraction_enabled() || apparent_alt < -1.0 {
            return apparent_alt;
        }
        let arg = (apparent_alt + 7.31 / (apparent_alt + 4.4)).to_radians();
        let r_arcmin = 1.0 / arg.tan() * self.refraction_scale();
        (apparent_alt - r_arcmin / 60.0).min(90.0)
    }
}

impl SkyConverter for Location {
    fn to_equatorial(&self, horizontal: Horizontal, utc: DateTime<Utc>) -> Equatorial {
        let lat = self.config.latitude.to_radians();
        let az = horizontal.azi.to_radians();
        let alt = self.true_altitude(horizontal.alt).to_radians();

        let sin_dec = lat.sin() * alt.sin() + lat.cos() * alt.cos() * az.cos();
        let dec = sin_dec.clamp(-1.0, 1.0).asin();

        let ha = (-az.sin() * alt.cos()).atan2(lat.cos() * alt.sin() - lat.sin() * alt.cos() * az.cos());
        let ra = normalize_azimuth(self.local_sidereal_time(utc) - ha.to_degrees());

        Equatorial {
            ra: ra / 15.0,
            dec: dec.to_degrees(),
        }
    }

    fn to_horizontal(&self, equatorial: Equatorial, utc: DateTime<Utc>) -> Horizontal {
        let lat = self.config.latitude.to_radians();
        let dec = equatorial.dec.to_radians();
        let ha = (self.local_sidereal_time(utc) - equatorial.ra * 15.0).to_radians();

        let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
        let alt = sin_alt.clamp(-1.0, 1.0).asin();

        let az = (-dec.cos() * ha.sin()).atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * ha.cos());

        Horizontal {
            azi: normalize_azimuth(az.to_degrees()),
            alt: self.apparent_altitude(alt.to_degrees()),
        }
    }
}

/// Julian Day for a UTC instant
pub fn julian_day(utc: DateTime<Utc>) -> f64 {
    let year = utc.year();
    let month = utc.month() as i32;
    let day = utc.day() as f64;
    let hour = utc.hour() as f64
        + utc.minute() as f64 / 60.0
        + (utc.second() as f64 + utc.nanosecond() as f64 * 1e-9) / 3600.0;

    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y as f64 + 4716.0)).floor() + (30.6001 * (m as f64 + 1.0)).floor() + day + hour / 24.0 + b
        - 1524.5
}

/// Greenwich mean sidereal time in degrees (IAU 1982 expression)
pub fn greenwich_mean_sidereal_time(utc: DateTime<Utc>) -> f64 {
    let jd = julian_day(utc);
    let d = jd - 2451545.0;
    let t = d / 36525.0;
    let gmst = 280.46061837 + 360.98564736629 * d + 0.000387933 * t * t - t * t * t / 38710000.0;
    normalize_azimuth(gmst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn site() -> Location {
        Location::new(LocationConfig {
            latitude: 45.0,
            longitude: -75.0,
            ..Default::default()
        })
    }

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 17, 3, 30, 0).unwrap()
    }

    #[test]
    fn test_julian_day() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_day(j2000) - 2451545.0).abs() < 1e-9);

        let unix_epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!((julian_day(unix_epoch) - 2440587.5).abs() < 1e-9);
    }

    #[test]
    fn test_gmst_at_j2000() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((greenwich_mean_sidereal_time(j2000) - 280.46061837).abs() < 1e-6);
    }

    #[test]
    fn test_zenith_is_local_sidereal_time_and_latitude() {
        let site = site();
        let eq = site.to_equatorial(Horizontal { azi: 0.0, alt: 90.0 }, when());
        assert!((eq.dec - 45.0).abs() < 1e-9);
        assert!((eq.ra * 15.0 - site.local_sidereal_time(when())).abs() < 1e-6);
    }

    #[test]
    fn test_pole_is_north_at_latitude() {
        let hz = site().to_horizontal(Equatorial { ra: 2.5, dec: 90.0 }, when());
        assert!((hz.alt - 45.0).abs() < 1e-9);
        let az = if hz.azi > 180.0 { hz.azi - 360.0 } else { hz.azi };
        assert!(az.abs() < 1e-6);
    }

    #[test]
    fn test_rising_object_is_east() {
        let site = site();
        let lst_hours = site.local_sidereal_time(when()) / 15.0;
        // Hour angle of -3h: not yet culminated
        let hz = site.to_horizontal(Equatorial { ra: lst_hours + 3.0, dec: 0.0 }, when());
        assert!(hz.azi > 0.0 && hz.azi < 180.0);
    }

    #[test]
    fn test_round_trip() {
        let site = site();
        for (azi, alt) in [(10.0, 20.0), (135.0, 45.0), (270.0, 5.0), (359.0, 80.0)] {
            let eq = site.to_equatorial(Horizontal { azi, alt }, when());
            assert!((0.0..24.0).contains(&eq.ra));
            let hz = site.to_horizontal(eq, when());
            assert!((hz.alt - alt).abs() < 1e-8);
            let da = normalize_azimuth(hz.azi - azi + 180.0) - 180.0;
            assert!(da.abs() < 1e-8);
        }
    }

    #[test]
    fn test_refraction_lifts_objects() {
        let refracting = Location::new(LocationConfig {
            latitude: 45.0,
            longitude: -75.0,
            pressure: 1010.0,
            temperature: 10.0,
            ..Default::default()
        });
        let eq = site().to_equatorial(Horizontal { azi: 180.0, alt: 10.0 }, when());
        let hz = refracting.to_horizontal(eq, when());
        // About 5 arcminutes at 10 degrees
        let lift = (hz.alt - 10.0) * 60.0;
        assert!(lift > 4.5 && lift < 6.0, "lift {}", lift);

        // Bennett and Saemundsson agree to a fraction of an arcminute
        let back = refracting.to_equatorial(hz, when());
        assert!((back.dec - eq.dec).abs() < 0.01);
    }
}
