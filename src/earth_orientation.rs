//! Earth orientation: precession, nutation and sidereal rotation.
//!
//! Used to carry a terrestrial (ITRF) site vector into the GCRS/ICRS equatorial
//! frame of the solar-system ephemeris:
//!
//! ```text
//! r_gcrs = Pᵀ · Nᵀ · R₃(−GAST) · r_itrf
//! ```
//!
//! with `P` the IAU 1976 precession matrix, `N` the IAU 1980 nutation
//! and GAST the apparent sidereal time. Polar motion is neglected; its effect on
//! the site vector is below 15 m (50 ns of light travel time).
//!
//! All rotation matrices follow the *frame rotation* convention: [`rotmt`]`(α, k)`
//! rotates the coordinate axes by `α` about axis `k`.

use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::constants::{ArcSec, Radian, DPI, MJD, RADEG, RADSEC, SECONDS_PER_DAY, SIDEREAL_RATIO, T2000};
use crate::time::gmst;

/// Frame rotation by `alpha` about axis `k` (0 = X, 1 = Y, 2 = Z).
///
/// # Panics
///
/// Panics if `k > 2`.
pub fn rotmt(alpha: f64, k: usize) -> Matrix3<f64> {
    let axis = match k {
        0 => Vector3::x_axis(),
        1 => Vector3::y_axis(),
        2 => Vector3::z_axis(),
        _ => panic!("rotmt: invalid axis index {k} (must be 0, 1 or 2)"),
    };

    Rotation3::from_axis_angle(&axis, -alpha).into()
}

/// Mean obliquity of the ecliptic (IAU 1976), in radians, at MJD `tjm` (TT).
pub fn obleq(tjm: MJD) -> Radian {
    let ob0 = ((23.0 * 3600.0 + 26.0 * 60.0) + 21.448) * RADSEC;
    let ob1 = -46.815 * RADSEC;
    let ob2 = -0.0006 * RADSEC;
    let ob3 = 0.00181 * RADSEC;

    let t = (tjm - T2000) / 36525.0;

    ((ob3 * t + ob2) * t + ob1) * t + ob0
}

/// IAU 1980 nutation series (Seidelmann 1982).
///
/// Multipliers of `(l, l′, F, D, Ω)`, then `[ψ, ψ̇, ε, ε̇]` in units of 0.1 mas
/// and 0.1 mas per Julian century.
const NUT80: [([i8; 5], [f64; 4]); 106] = [
    ([0, 0, 0, 0, 1], [-171996.0, -174.2, 92025.0, 8.9]),
    ([0, 0, 0, 0, 2], [2062.0, 0.2, -895.0, 0.5]),
    ([-2, 0, 2, 0, 1], [46.0, 0.0, -24.0, 0.0]),
    ([2, 0, -2, 0, 0], [11.0, 0.0, 0.0, 0.0]),
    ([-2, 0, 2, 0, 2], [-3.0, 0.0, 1.0, 0.0]),
    ([1, -1, 0, -1, 0], [-3.0, 0.0, 0.0, 0.0]),
    ([0, -2, 2, -2, 1], [-2.0, 0.0, 1.0, 0.0]),
    ([2, 0, -2, 0, 1], [1.0, 0.0, 0.0, 0.0]),
    ([0, 0, 2, -2, 2], [-13187.0, -1.6, 5736.0, -3.1]),
    ([0, 1, 0, 0, 0], [1426.0, -3.4, 54.0, -0.1]),
    ([0, 1, 2, -2, 2], [-517.0, 1.2, 224.0, -0.6]),
    ([0, -1, 2, -2, 2], [217.0, -0.5, -95.0, 0.3]),
    ([0, 0, 2, -2, 1], [129.0, 0.1, -70.0, 0.0]),
    ([2, 0, 0, -2, 0], [48.0, 0.0, 1.0, 0.0]),
    ([0, 0, 2, -2, 0], [-22.0, 0.0, 0.0, 0.0]),
    ([0, 2, 0, 0, 0], [17.0, -0.1, 0.0, 0.0]),
    ([0, 1, 0, 0, 1], [-15.0, 0.0, 9.0, 0.0]),
    ([0, 2, 2, -2, 2], [-16.0, 0.1, 7.0, 0.0]),
    ([0, -1, 0, 0, 1], [-12.0, 0.0, 6.0, 0.0]),
    ([-2, 0, 0, 2, 1], [-6.0, 0.0, 3.0, 0.0]),
    ([0, -1, 2, -2, 1], [-5.0, 0.0, 3.0, 0.0]),
    ([2, 0, 0, -2, 1], [4.0, 0.0, -2.0, 0.0]),
    ([0, 1, 2, -2, 1], [4.0, 0.0, -2.0, 0.0]),
    ([1, 0, 0, -1, 0], [-4.0, 0.0, 0.0, 0.0]),
    ([2, 1, 0, -2, 0], [1.0, 0.0, 0.0, 0.0]),
    ([0, 0, -2, 2, 1], [1.0, 0.0, 0.0, 0.0]),
    ([0, 1, -2, 2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 1, 0, 0, 2], [1.0, 0.0, 0.0, 0.0]),
    ([-1, 0, 0, 1, 1], [1.0, 0.0, 0.0, 0.0]),
    ([0, 1, 2, -2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 0, 2, 0, 2], [-2274.0, -0.2, 977.0, -0.5]),
    ([1, 0, 0, 0, 0], [712.0, 0.1, -7.0, 0.0]),
    ([0, 0, 2, 0, 1], [-386.0, -0.4, 200.0, 0.0]),
    ([1, 0, 2, 0, 2], [-301.0, 0.0, 129.0, -0.1]),
    ([1, 0, 0, -2, 0], [-158.0, 0.0, -1.0, 0.0]),
    ([-1, 0, 2, 0, 2], [123.0, 0.0, -53.0, 0.0]),
    ([0, 0, 0, 2, 0], [63.0, 0.0, -2.0, 0.0]),
    ([1, 0, 0, 0, 1], [63.0, 0.1, -33.0, 0.0]),
    ([-1, 0, 0, 0, 1], [-58.0, -0.1, 32.0, 0.0]),
    ([-1, 0, 2, 2, 2], [-59.0, 0.0, 26.0, 0.0]),
    ([1, 0, 2, 0, 1], [-51.0, 0.0, 27.0, 0.0]),
    ([0, 0, 2, 2, 2], [-38.0, 0.0, 16.0, 0.0]),
    ([2, 0, 0, 0, 0], [29.0, 0.0, -1.0, 0.0]),
    ([1, 0, 2, -2, 2], [29.0, 0.0, -12.0, 0.0]),
    ([2, 0, 2, 0, 2], [-31.0, 0.0, 13.0, 0.0]),
    ([0, 0, 2, 0, 0], [26.0, 0.0, -1.0, 0.0]),
    ([-1, 0, 2, 0, 1], [21.0, 0.0, -10.0, 0.0]),
    ([-1, 0, 0, 2, 1], [16.0, 0.0, -8.0, 0.0]),
    ([1, 0, 0, -2, 1], [-13.0, 0.0, 7.0, 0.0]),
    ([-1, 0, 2, 2, 1], [-10.0, 0.0, 5.0, 0.0]),
    ([1, 1, 0, -2, 0], [-7.0, 0.0, 0.0, 0.0]),
    ([0, 1, 2, 0, 2], [7.0, 0.0, -3.0, 0.0]),
    ([0, -1, 2, 0, 2], [-7.0, 0.0, 3.0, 0.0]),
    ([1, 0, 2, 2, 2], [-8.0, 0.0, 3.0, 0.0]),
    ([1, 0, 0, 2, 0], [6.0, 0.0, 0.0, 0.0]),
    ([2, 0, 2, -2, 2], [6.0, 0.0, -3.0, 0.0]),
    ([0, 0, 0, 2, 1], [-6.0, 0.0, 3.0, 0.0]),
    ([0, 0, 2, 2, 1], [-7.0, 0.0, 3.0, 0.0]),
    ([1, 0, 2, -2, 1], [6.0, 0.0, -3.0, 0.0]),
    ([0, 0, 0, -2, 1], [-5.0, 0.0, 3.0, 0.0]),
    ([1, -1, 0, 0, 0], [5.0, 0.0, 0.0, 0.0]),
    ([2, 0, 2, 0, 1], [-5.0, 0.0, 3.0, 0.0]),
    ([0, 1, 0, -2, 0], [-4.0, 0.0, 0.0, 0.0]),
    ([1, 0, -2, 0, 0], [4.0, 0.0, 0.0, 0.0]),
    ([0, 0, 0, 1, 0], [-4.0, 0.0, 0.0, 0.0]),
    ([1, 1, 0, 0, 0], [-3.0, 0.0, 0.0, 0.0]),
    ([1, 0, 2, 0, 0], [3.0, 0.0, 0.0, 0.0]),
    ([1, -1, 2, 0, 2], [-3.0, 0.0, 1.0, 0.0]),
    ([-1, -1, 2, 2, 2], [-3.0, 0.0, 1.0, 0.0]),
    ([-2, 0, 0, 0, 1], [-2.0, 0.0, 1.0, 0.0]),
    ([3, 0, 2, 0, 2], [-3.0, 0.0, 1.0, 0.0]),
    ([0, -1, 2, 2, 2], [-3.0, 0.0, 1.0, 0.0]),
    ([1, 1, 2, 0, 2], [2.0, 0.0, -1.0, 0.0]),
    ([-1, 0, 2, -2, 1], [-2.0, 0.0, 1.0, 0.0]),
    ([2, 0, 0, 0, 1], [2.0, 0.0, -1.0, 0.0]),
    ([1, 0, 0, 0, 2], [-2.0, 0.0, 1.0, 0.0]),
    ([3, 0, 0, 0, 0], [2.0, 0.0, 0.0, 0.0]),
    ([0, 0, 2, 1, 2], [2.0, 0.0, -1.0, 0.0]),
    ([-1, 0, 0, 0, 2], [1.0, 0.0, -1.0, 0.0]),
    ([1, 0, 0, -4, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([-2, 0, 2, 2, 2], [1.0, 0.0, -1.0, 0.0]),
    ([-1, 0, 2, 4, 2], [-2.0, 0.0, 1.0, 0.0]),
    ([2, 0, 0, -4, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([1, 1, 2, -2, 2], [1.0, 0.0, -1.0, 0.0]),
    ([1, 0, 2, 2, 1], [-1.0, 0.0, 1.0, 0.0]),
    ([-2, 0, 2, 4, 2], [-1.0, 0.0, 1.0, 0.0]),
    ([-1, 0, 4, 0, 2], [1.0, 0.0, 0.0, 0.0]),
    ([1, -1, 0, -2, 0], [1.0, 0.0, 0.0, 0.0]),
    ([2, 0, 2, -2, 1], [1.0, 0.0, -1.0, 0.0]),
    ([2, 0, 2, 2, 2], [-1.0, 0.0, 0.0, 0.0]),
    ([1, 0, 0, 2, 1], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 0, 4, -2, 2], [1.0, 0.0, 0.0, 0.0]),
    ([3, 0, 2, -2, 2], [1.0, 0.0, 0.0, 0.0]),
    ([1, 0, 2, -2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 1, 2, 0, 1], [1.0, 0.0, 0.0, 0.0]),
    ([-1, -1, 0, 2, 1], [1.0, 0.0, 0.0, 0.0]),
    ([0, 0, -2, 0, 1], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 0, 2, -1, 2], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 1, 0, 2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([1, 0, -2, -2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([0, -1, 2, 0, 1], [-1.0, 0.0, 0.0, 0.0]),
    ([1, 1, 0, -2, 1], [-1.0, 0.0, 0.0, 0.0]),
    ([1, 0, -2, 2, 0], [-1.0, 0.0, 0.0, 0.0]),
    ([2, 0, 0, 2, 0], [1.0, 0.0, 0.0, 0.0]),
    ([0, 0, 2, 4, 2], [-1.0, 0.0, 0.0, 0.0]),
    ([0, 1, 0, 1, 0], [1.0, 0.0, 0.0, 0.0]),
];

/// Nutation in longitude and obliquity `(Δψ, Δε)` in arcseconds.
///
/// The full 106-term IAU 1980 series.
pub fn nutation(tjm: MJD) -> (ArcSec, ArcSec) {
    let t = (tjm - T2000) / 36525.0;
    let arg = |c: [f64; 4]| ((((c[3] * t + c[2]) * t + c[1]) * t + c[0]) * RADSEC).rem_euclid(DPI);

    // Delaunay arguments
    let fundamental = [
        arg([485866.733, 1717915922.633, 31.310, 0.064]),
        arg([1287099.804, 129596581.224, -0.577, -0.012]),
        arg([335778.877, 1739527263.137, -13.257, 0.011]),
        arg([1072261.307, 1602961601.328, -6.891, 0.019]),
        arg([450160.280, -6962890.539, 7.455, 0.008]),
    ];

    // Smallest terms first
    let (dpsi, deps) = NUT80.iter().rev().fold((0.0, 0.0), |(dpsi, deps), (n, [ps, pst, ec, ect])| {
        let a: f64 = n.iter().zip(&fundamental).map(|(&k, x)| f64::from(k) * x).sum();
        (dpsi + (ps + pst * t) * a.sin(), deps + (ec + ect * t) * a.cos())
    });
    (dpsi * 1e-4, deps * 1e-4)
}

/// Equation of the equinoxes `Δψ·cos ε` in radians.
pub fn equequ(tjm: MJD) -> Radian {
    let (dpsi, _) = nutation(tjm);
    RADSEC * dpsi * obleq(tjm).cos()
}

/// Nutation matrix: mean equator of date → true equator of date.
pub fn nutation_matrix(tjm: MJD) -> Matrix3<f64> {
    let epsm = obleq(tjm);
    let (dpsi, deps) = nutation(tjm);
    let epst = epsm + deps * RADSEC;

    rotmt(-epst, 0) * rotmt(-dpsi * RADSEC, 2) * rotmt(epsm, 0)
}

/// Precession matrix (IAU 1976): mean J2000 equator → mean equator of date.
pub fn prec(tjm: MJD) -> Matrix3<f64> {
    let t = (tjm - T2000) / 36525.0;

    // Angles in degrees per Julian century (Lieske et al. 1977)
    let zeta = ((0.0000050 * t + 0.0000839) * t + 0.6406161) * t * RADEG;
    let z = ((0.0000051 * t + 0.0003041) * t + 0.6406161) * t * RADEG;
    let theta = ((-0.0000116 * t - 0.0001185) * t + 0.5567530) * t * RADEG;

    rotmt(-z, 2) * rotmt(theta, 1) * rotmt(-zeta, 2)
}

/// Earth rotation rate in rad/s.
pub fn earth_rotation_rate() -> f64 {
    DPI * SIDEREAL_RATIO / SECONDS_PER_DAY
}

/// Rotation carrying a terrestrial vector into the J2000 mean equatorial frame.
///
/// Arguments
/// -----------------
/// * `mjd_tt`: epoch in TT, used for precession and nutation.
/// * `mjd_ut1`: same epoch in UT1, used for the sidereal angle.
///
/// Return
/// ----------
/// * `(rot, rot_true)` where `rot` maps ITRF → GCRS and `rot_true` maps the
///   true-of-date equatorial frame → GCRS (needed for the rotational velocity).
pub fn itrf_to_gcrs(mjd_tt: MJD, mjd_ut1: MJD) -> (Matrix3<f64>, Matrix3<f64>) {
    let gast = gmst(mjd_ut1) + equequ(mjd_tt);
    let true_to_gcrs = prec(mjd_tt).transpose() * nutation_matrix(mjd_tt).transpose();
    (true_to_gcrs * rotmt(-gast, 2), true_to_gcrs)
}

#[cfg(test)]
mod earth_orientation_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_obliquity() {
        let obl = obleq(T2000);
        assert_abs_diff_eq!(obl, 0.40909280422232897, epsilon = 1e-15);
    }

    #[test]
    fn test_nutation_at_j2000() {
        let (dpsi, deps) = nutation(T2000);
        assert_abs_diff_eq!(dpsi, -13.923385, epsilon = 1e-6);
        assert_abs_diff_eq!(deps, -5.773808, epsilon = 1e-6);
    }

    #[test]
    fn test_nutation_against_erfa() {
        // eraNut80(2400000.5, 53736.0)
        let (dpsi, deps) = nutation(53736.0);
        assert_abs_diff_eq!(dpsi * RADSEC, -0.9643658353226563966e-5, epsilon = 1e-13);
        assert_abs_diff_eq!(deps * RADSEC, 0.4060051006879713322e-4, epsilon = 1e-13);
    }

    #[test]
    fn test_rotmt_is_frame_rotation() {
        let r = rotmt(std::f64::consts::FRAC_PI_2, 2);
        let v = r * Vector3::new(1.0, 0.0, 0.0);
        // Rotating the axes by +90° about Z moves the old X axis to -Y
        assert_abs_diff_eq!(v, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-15);
    }

    #[test]
    fn test_precession_is_identity_at_j2000() {
        assert_abs_diff_eq!(prec(T2000), Matrix3::identity(), epsilon = 1e-15);
        let p = prec(T2000 + 36525.0);
        assert_abs_diff_eq!(p * p.transpose(), Matrix3::identity(), epsilon = 1e-14);
    }

    #[test]
    fn test_greenwich_points_to_gast() {
        let mjd = 58000.25;
        let (rot, _) = itrf_to_gcrs(mjd, mjd);
        let g = rot * Vector3::new(1.0, 0.0, 0.0);
        let gast = gmst(mjd) + equequ(mjd);
        // Precession over 17 years moves the direction by ~0.24°
        let ra = g.y.atan2(g.x).rem_euclid(DPI);
        assert_abs_diff_eq!(ra, gast.rem_euclid(DPI), epsilon = 0.01);
    }
}
