//! Telescope attitude
//!
//! Encoder counts are turned into a raw telescope attitude by [`EncoderConfig`],
//! which is then corrected for mount imperfections by [`PointingModel`].
//!
//! Angles use the telescope frame convention:
//! - `phi`: azimuthal angle in degrees, normalized to `[0, 360)`
//! - `theta`: elevation angle in degrees, normalized to `[-90, 90]`
//!
//! A single encoder pair covers the whole sphere, so an elevation reading
//! past a pole is reflected back and the azimuth turned by 180 degrees.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Normalize an angle into `[0, 360)`, wrapping negative angles upwards
pub fn normalize_azimuth(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Normalize an angle into `(-180, 180]`
pub fn normalize_elevation(angle: f64) -> f64 {
    let wrapped = normalize_azimuth(angle);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Fold a normalized `(phi, theta)` pair onto `theta` in `[-90, 90]`
fn reflect_pole(phi: f64, theta: f64) -> (f64, f64) {
    if theta > 90.0 {
        (normalize_azimuth(phi + 180.0), 180.0 - theta)
    } else if theta < -90.0 {
        (normalize_azimuth(phi + 180.0), -180.0 - theta)
    } else {
        (phi, theta)
    }
}

/// Put an arbitrary angle pair into canonical spherical form
pub fn canonical_angles(phi: f64, theta: f64) -> (f64, f64) {
    reflect_pole(normalize_azimuth(phi), normalize_elevation(theta))
}

/// Encoder geometry, counts per revolution include any gearing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Counts per revolution of the azimuthal (axis 1) encoder
    pub phi_counts_per_rev: u32,
    /// Counts per revolution of the elevation (axis 2) encoder
    pub theta_counts_per_rev: u32,
    /// Reverse the sense (CW <-> CCW) of the azimuthal encoder
    pub flip_phi: bool,
    /// Reverse the sense (CW <-> CCW) of the elevation encoder
    pub flip_theta: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            phi_counts_per_rev: 2400,
            theta_counts_per_rev: 2400,
            flip_phi: false,
            flip_theta: false,
        }
    }
}

impl EncoderConfig {
    /// Create a validated encoder configuration
    pub fn new(
        phi_counts_per_rev: u32,
        theta_counts_per_rev: u32,
        flip_phi: bool,
        flip_theta: bool,
    ) -> CoreResult<Self> {
        let config = Self {
            phi_counts_per_rev,
            theta_counts_per_rev,
            flip_phi,
            flip_theta,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that both axes have a usable resolution
    pub fn validate(&self) -> CoreResult<()> {
        if self.phi_counts_per_rev == 0 {
            return Err(CoreError::InvalidEncoderConfig(
                "azimuthal counts per revolution must be positive".to_string(),
            ));
        }
        if self.theta_counts_per_rev == 0 {
            return Err(CoreError::InvalidEncoderConfig(
                "elevation counts per revolution must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert encoder counts into the raw telescope attitude `(phi, theta)`
    pub fn convert(&self, phi_cnt: i64, theta_cnt: i64) -> (f64, f64) {
        // Negated as floats, i64::MIN has no i64 negation
        let phi_cnt = if self.flip_phi { -(phi_cnt as f64) } else { phi_cnt as f64 };
        let theta_cnt = if self.flip_theta { -(theta_cnt as f64) } else { theta_cnt as f64 };

        let phi = phi_cnt * 360.0 / self.phi_counts_per_rev as f64;
        let theta = theta_cnt * 360.0 / self.theta_counts_per_rev as f64;

        canonical_angles(phi, theta)
    }
}

/// Maximum number of fixed-point steps used by [`PointingModel::deapply`]
pub const DEAPPLY_MAX_ITERATIONS: u32 = 50;

/// Residual, in degrees, at which [`PointingModel::deapply`] stops
pub const DEAPPLY_TOLERANCE_DEG: f64 = 1e-9;

/// 8 parameter TPOINT-style pointing model for an alt-az mount
///
/// All terms are in arcseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointingModel {
    /// Index error in azimuth
    pub ia: f64,
    /// Index error in elevation
    pub ie: f64,
    /// North-south misalignment of the azimuth axis
    pub an: f64,
    /// West-east misalignment of the azimuth axis
    pub aw: f64,
    /// Non-perpendicularity of optical axis and elevation axis
    pub ca: f64,
    /// Non-perpendicularity of elevation axis and azimuth axis
    pub npae: f64,
    /// Tube flexure proportional to cot(el)
    pub tx: f64,
    /// Tube flexure proportional to cos(el)
    pub tf: f64,
}

impl PointingModel {
    /// True when every term is zero
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Correct a raw telescope attitude, returning `(azimuth, altitude)` in degrees
    pub fn apply(&self, phi: f64, theta: f64) -> (f64, f64) {
        let phi_r = phi.to_radians();
        let theta_r = theta.to_radians();

        let mut da = -self.ia;
        da -= self.an * phi_r.sin() * theta_r.tan();
        da -= self.aw * phi_r.cos() * theta_r.tan();
        if theta.abs() != 90.0 {
            da -= self.ca / theta_r.cos();
        }
        da -= self.npae * theta_r.tan();

        let mut de = self.ie;
        de -= self.an * phi_r.cos();
        de += self.aw * phi_r.sin();
        de -= self.tf * theta_r.cos();
        if theta != 0.0 {
            de -= self.tx / theta_r.tan();
        }

        canonical_angles(phi + da / 3600.0, theta + de / 3600.0)
    }

    /// Invert [`apply`](Self::apply): find the raw attitude whose correction is `(azi, alt)`.
    ///
    /// Uses fixed-point iteration on the forward model, starting at the target.
    /// Converges when both residuals drop below [`DEAPPLY_TOLERANCE_DEG`]; gives up
    /// after [`DEAPPLY_MAX_ITERATIONS`] steps, which happens close to the
    /// singular cot(el) and 1/cos(el) terms.
    pub fn deapply(&self, azi: f64, alt: f64) -> CoreResult<(f64, f64)> {
        let (target_azi, target_alt) = canonical_angles(azi, alt);
        let mut guess = (target_azi, target_alt);
        let mut residual = f64::INFINITY;

        for _ in 0..DEAPPLY_MAX_ITERATIONS {
            let (a, e) = self.apply(guess.0, guess.1);
            let da = normalize_elevation(a - target_azi);
            let de = e - target_alt;
            if da.abs() < DEAPPLY_TOLERANCE_DEG && de.abs() < DEAPPLY_TOLERANCE_DEG {
                return Ok(canonical_angles(guess.0, guess.1));
            }
            // f64::max would hide a NaN residual
            residual = if da.is_nan() || de.is_nan() { f64::NAN } else { da.abs().max(de.abs()) };
            guess = (guess.0 - da, guess.1 - de);
        }

        Err(CoreError::PointingModelNotConverged {
            azimuth: azi,
            altitude: alt,
            iterations: DEAPPLY_MAX_ITERATIONS,
            residual,
        })
    }
}
