//! Telescope alignment
//!
//! Estimates the rotation between the telescope frame and the horizontal
//! (sky) frame from pairs of star sightings by solving Wahba's problem with a
//! singular value decomposition, following Markley, "Attitude determination
//! using vector observations and the singular value decomposition",
//! J. Astronaut. Sci. 36(3), 1988.
//!
//! The rotation is recomputed from the full observation list every time a
//! star is added, so the result only depends on the set of observations.

use crate::direction::{angles_from_vec, vec_from_angles, Direction};
use nalgebra::{Matrix3, Vector3};
use tracing::{debug, warn};

/// One calibration star: where the telescope pointed and where the star really is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarObservation {
    pub telescope: Direction,
    pub sky: Direction,
    pub weight: f64,
}

/// How well the current rotation explains the observations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentQuality {
    /// Fewer than two stars, rotation is the identity
    Uncalibrated,
    /// Loss (0 is a perfect fit) and approximate rotation covariance in the sky frame
    Calibrated { loss: f64, covariance: Matrix3<f64> },
    /// Star geometry is degenerate, loss or covariance are not finite
    Degenerate { loss: f64 },
}

impl AlignmentQuality {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, AlignmentQuality::Calibrated { .. })
    }
}

/// Aligner, transforms between telescope and horizontal coordinates
#[derive(Debug, Clone)]
pub struct Aligner {
    max_stars: Option<usize>,
    stars: Vec<StarObservation>,
    rotation: Matrix3<f64>,
    rotation_inv: Matrix3<f64>,
    loss: Option<f64>,
    covariance: Option<Matrix3<f64>>,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Aligner {
    /// Create an aligner, optionally limited to `max_stars` observations
    pub fn new(max_stars: Option<usize>) -> Self {
        Self {
            max_stars,
            stars: Vec::new(),
            rotation: Matrix3::identity(),
            rotation_inv: Matrix3::identity(),
            loss: None,
            covariance: None,
        }
    }

    pub fn max_stars(&self) -> Option<usize> {
        self.max_stars
    }

    pub fn stars(&self) -> &[StarObservation] {
        &self.stars
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Telescope -> sky rotation
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    /// Sky -> telescope rotation
    pub fn rotation_inverse(&self) -> &Matrix3<f64> {
        &self.rotation_inv
    }

    /// Wahba loss of the current fit, `None` while uncalibrated
    pub fn loss(&self) -> Option<f64> {
        self.loss
    }

    pub fn covariance(&self) -> Option<&Matrix3<f64>> {
        self.covariance.as_ref()
    }

    pub fn quality(&self) -> AlignmentQuality {
        match (self.loss, self.covariance) {
            (Some(loss), Some(covariance))
                if loss.is_finite() && covariance.iter().all(|c| c.is_finite()) =>
            {
                AlignmentQuality::Calibrated { loss, covariance }
            }
            (Some(loss), _) => AlignmentQuality::Degenerate { loss },
            _ => AlignmentQuality::Uncalibrated,
        }
    }

    /// Add an alignment star given as angle pairs in degrees.
    ///
    /// `(phi, theta)` is the telescope attitude, `(azi, alt)` the horizontal position.
    /// Returns false when the aligner is already full or the weight is invalid.
    pub fn add_star(&mut self, phi: f64, theta: f64, azi: f64, alt: f64, weight: f64) -> bool {
        self.add_observation(vec_from_angles(phi, theta), vec_from_angles(azi, alt), weight)
    }

    /// Add an alignment star given as direction vectors.
    ///
    /// The rotation is recomputed for every star from the second one on.
    /// Returns false (and changes nothing) when the aligner is already full
    /// or the weight is not a positive finite number.
    pub fn add_observation(&mut self, telescope: Direction, sky: Direction, weight: f64) -> bool {
        if !(weight.is_finite() && weight > 0.0) {
            warn!("Ignoring observation with weight {}, weights must be positive", weight);
            return false;
        }
        if let Some(max) = self.max_stars {
            if self.stars.len() >= max {
                debug!("Aligner full ({} stars), ignoring observation", max);
                return false;
            }
        }

        self.stars.push(StarObservation {
            telescope,
            sky,
            weight,
        });
        self.update();
        true
    }

    /// Forget every star and go back to the identity rotation
    pub fn reset(&mut self) {
        self.stars.clear();
        self.rotation = Matrix3::identity();
        self.rotation_inv = Matrix3::identity();
        self.loss = None;
        self.covariance = None;
    }

    fn update(&mut self) {
        if self.stars.len() < 2 {
            return;
        }

        // Attitude profile matrix B = sum(w * sky x telescope^T) / sum(w)
        let mut norm = 0.0;
        let mut b = Matrix3::<f64>::zeros();
        for star in &self.stars {
            norm += star.weight;
            b += star.weight * star.sky * star.telescope.transpose();
        }
        b /= norm;

        let Some((u, s, v_t)) = sorted_svd(b) else {
            warn!("SVD of the attitude profile matrix failed, keeping previous rotation");
            return;
        };

        let d = u.determinant() * v_t.determinant();
        let rotation = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * v_t;
        let loss = 1.0 - s[0] - s[1] - d * s[2];

        let n = self.stars.len() as f64;
        let ps = Matrix3::from_diagonal(&Vector3::new(
            covariance_term(1.0 - s[0], s[1] + d * s[2]),
            covariance_term(1.0 - s[1], s[0] + d * s[2]),
            covariance_term(1.0 - d * s[2], s[0] + s[1]),
        )) / n;
        let covariance = v_t.transpose() * ps * v_t;

        self.rotation_inv = rotation.try_inverse().unwrap_or_else(|| {
            warn!("Alignment rotation is singular, using its transpose as inverse");
            rotation.transpose()
        });
        self.rotation = rotation;
        self.loss = Some(loss);
        self.covariance = Some(covariance);

        debug!(
            "Alignment updated with {} stars: loss={:e}, singular values={:?}",
            self.stars.len(),
            loss,
            s
        );
    }

    /// Rotate a telescope-frame direction into the sky frame
    pub fn telescope_vec_to_horizontal(&self, telescope: &Direction) -> Direction {
        self.rotation * telescope
    }

    /// Rotate a sky-frame direction into the telescope frame
    pub fn horizontal_vec_to_telescope(&self, sky: &Direction) -> Direction {
        self.rotation_inv * sky
    }

    /// Transform telescope attitude `(phi, theta)` to horizontal `(azi, alt)`, degrees
    pub fn telescope_to_horizontal(&self, phi: f64, theta: f64) -> (f64, f64) {
        angles_from_vec(&self.telescope_vec_to_horizontal(&vec_from_angles(phi, theta)))
    }

    /// Transform horizontal `(azi, alt)` to telescope attitude `(phi, theta)`, degrees
    pub fn horizontal_to_telescope(&self, azi: f64, alt: f64) -> (f64, f64) {
        angles_from_vec(&self.horizontal_vec_to_telescope(&vec_from_angles(azi, alt)))
    }
}

/// Singular values below this leave a rotation axis unconstrained
const DEGENERATE_SINGULAR_VALUE: f64 = 1e-12;

/// One diagonal term of the covariance, infinite when its axis is unconstrained
fn covariance_term(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < DEGENERATE_SINGULAR_VALUE {
        f64::INFINITY
    } else {
        numerator / denominator.powi(2)
    }
}

/// SVD with singular values sorted in decreasing order
fn sorted_svd(m: Matrix3<f64>) -> Option<(Matrix3<f64>, [f64; 3], Matrix3<f64>)> {
    let svd = m.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return None,
    };

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        svd.singular_values[b]
            .partial_cmp(&svd.singular_values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut u_sorted = Matrix3::zeros();
    let mut v_t_sorted = Matrix3::zeros();
    let mut s = [0.0; 3];
    for (i, &k) in order.iter().enumerate() {
        u_sorted.set_column(i, &u.column(k));
        v_t_sorted.set_row(i, &v_t.row(k));
        s[i] = svd.singular_values[k];
    }

    Some((u_sorted, s, v_t_sorted))
}
