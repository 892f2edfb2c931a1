//! Direction vectors
//!
//! Conversions between an (azimuth-like, elevation-like) angle pair in degrees
//! and a unit direction vector. Azimuth is measured in the x-y plane from +x
//! towards +y, elevation from the x-y plane towards +z.

use nalgebra::Vector3;

/// Unit vector in 3-space
pub type Direction = Vector3<f64>;

/// Build a unit direction vector from an azimuthal angle `phi` and an
/// elevation angle `theta`, both in degrees.
pub fn vec_from_angles(phi: f64, theta: f64) -> Direction {
    let phi = phi.to_radians();
    let theta = theta.to_radians();

    Vector3::new(
        theta.cos() * phi.cos(),
        theta.cos() * phi.sin(),
        theta.sin(),
    )
}

/// Recover `(phi, theta)` in degrees from a direction vector.
///
/// The vector does not need to be normalized, but it must not be the zero
/// vector: the result is undefined (NaN) in that case. `phi` lies in
/// `[0, 360)`, `theta` in `[-90, 90]`. At the poles the azimuth is
/// ambiguous and is reported as 0.
pub fn angles_from_vec(v: &Direction) -> (f64, f64) {
    let norm = v.norm();
    let theta = (v[2] / norm).clamp(-1.0, 1.0).asin();

    if v[0] == 0.0 && v[1] == 0.0 {
        return (0.0, theta.to_degrees());
    }

    let mut phi = v[1].atan2(v[0]).to_degrees();
    while phi < 0.0 {
        phi += 360.0;
    }
    if phi >= 360.0 {
        phi -= 360.0;
    }

    (phi, theta.to_degrees())
}

/// Angle between two directions, in degrees
pub fn separation(a: &Direction, b: &Direction) -> f64 {
    let cos = a.dot(b) / (a.norm() * b.norm());
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_angles_from_vec_axes() {
        assert_eq!(angles_from_vec(&Vector3::new(10.0, 0.0, 0.0)), (0.0, 0.0));
        assert_eq!(angles_from_vec(&Vector3::new(0.0, 10.0, 0.0)), (90.0, 0.0));
        assert_eq!(angles_from_vec(&Vector3::new(0.0, 0.0, 10.0)), (0.0, 90.0));
        assert_eq!(angles_from_vec(&Vector3::new(-10.0, 0.0, 0.0)), (180.0, 0.0));
        assert_eq!(angles_from_vec(&Vector3::new(0.0, -10.0, 0.0)), (270.0, 0.0));
        assert_eq!(angles_from_vec(&Vector3::new(0.0, 0.0, -10.0)), (0.0, -90.0));
    }

    #[test]
    fn test_negative_zero_pole_is_canonical() {
        let (phi, theta) = angles_from_vec(&Vector3::new(-0.0, -0.0, 1.0));
        assert_eq!(phi, 0.0);
        assert_eq!(theta, 90.0);
    }

    #[test]
    fn test_vec_from_angles_axes() {
        let v = vec_from_angles(0.0, 0.0);
        assert_eq!(v, Vector3::new(1.0, 0.0, 0.0));

        let v = vec_from_angles(90.0, 0.0);
        assert!(v[0].abs() < EPS);
        assert!((v[1] - 1.0).abs() < EPS);
        assert_eq!(v[2], 0.0);

        let v = vec_from_angles(0.0, -90.0);
        assert!(v[0].abs() < EPS);
        assert!((v[2] + 1.0).abs() < EPS);
    }

    #[test]
    fn test_round_trip_away_from_poles() {
        for phi in [-725.0, -90.0, 0.0, 12.5, 179.9, 180.0, 270.0, 359.5, 400.0] {
            for theta in [-89.5, -45.0, -1.0, 0.0, 30.0, 89.0] {
                let v = vec_from_angles(phi, theta);
                assert!((v.norm() - 1.0).abs() < EPS);

                let (p, t) = angles_from_vec(&v);
                let expected = f64::rem_euclid(phi, 360.0);
                let dp = (p - expected).abs();
                assert!(dp < 1e-9 || (360.0 - dp) < 1e-9, "phi {} -> {}", phi, p);
                assert!((t - theta).abs() < 1e-9, "theta {} -> {}", theta, t);
                assert!((0.0..360.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_round_trip_at_pole_keeps_elevation() {
        let (_, t) = angles_from_vec(&vec_from_angles(123.0, 90.0));
        assert!((t - 90.0).abs() < 1e-9);
        let (_, t) = angles_from_vec(&vec_from_angles(17.0, -90.0));
        assert!((t + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_separation() {
        let a = vec_from_angles(0.0, 0.0);
        let b = vec_from_angles(90.0, 0.0);
        assert!((separation(&a, &b) - 90.0).abs() < 1e-9);
        assert!(separation(&a, &a).abs() < 1e-6);
    }
}
