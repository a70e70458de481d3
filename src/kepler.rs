use std::f64::consts::PI;

use crate::constants::DPI;

/// Principal value of an angle in `[0, 2π)`.
pub fn principal_angle(a: f64) -> f64 {
    a.rem_euclid(DPI)
}

/// Principal difference of two angles in `[-π, π]`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let mut diff = principal_angle(a) - principal_angle(b);
    if diff > PI {
        diff -= DPI;
    } else if diff < -PI {
        diff += DPI;
    }
    diff
}

/// Eccentric anomaly `E` solving Kepler's equation `E − e sin E = M`.
///
/// The returned anomaly is continuous in `M`: the whole-turn part of the mean
/// anomaly is carried over, so `E − M` stays in `[−e, e]`.
///
/// Arguments
/// -----------------
/// * `mean_anomaly`: mean anomaly `M` in radians (any value).
/// * `ecc`: eccentricity in `[0, 1)`.
///
/// Return
/// ----------
/// * `E` in radians, converged to machine precision (Newton iteration,
///   at most 50 steps; the last iterate is returned if the bound is reached).
pub fn eccentric_anomaly(mean_anomaly: f64, ecc: f64) -> f64 {
    const ITX: usize = 50;
    let contr = 100.0 * f64::EPSILON;

    let turns = (mean_anomaly / DPI).floor() * DPI;
    let ell = mean_anomaly - turns;

    // Starting guess robust up to e → 1
    let mut u = if ecc < 0.8 { ell } else { PI };
    for _ in 0..ITX {
        let du = -(u - ecc * u.sin() - ell) / (1.0 - ecc * u.cos());
        u += du;
        if du.abs() < contr * (1.0 + u.abs()) {
            break;
        }
    }
    u + turns
}

/// True anomaly from the eccentric anomaly, continuous across turns.
pub fn true_anomaly(eccentric_anomaly: f64, ecc: f64) -> f64 {
    let half = 0.5 * eccentric_anomaly;
    let nu = 2.0 * (((1.0 + ecc) / (1.0 - ecc)).sqrt() * half.tan()).atan();
    // atan branch is (−π, π); restore the turn count of E
    eccentric_anomaly + angle_diff(nu, eccentric_anomaly)
}

#[cfg(test)]
mod kepler_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_kepler_equation() {
        for &ecc in &[0.0, 0.1, 0.5, 0.9, 0.99] {
            for &m in &[-7.0, -0.3, 0.0, 1.0, 3.1, 20.0] {
                let e = eccentric_anomaly(m, ecc);
                assert_abs_diff_eq!(e - ecc * e.sin(), m, epsilon = 1e-12);
                assert!((e - m).abs() <= ecc + 1e-12);
            }
        }
    }

    #[test]
    fn test_true_anomaly() {
        assert_abs_diff_eq!(true_anomaly(0.0, 0.3), 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(true_anomaly(PI, 0.3), PI, epsilon = 1e-12);
        // Continuity over several turns
        let nu = true_anomaly(4.0 * PI + 0.5, 0.2);
        assert!((nu - 4.0 * PI).abs() < PI);
        let e = 1.0;
        let nu = true_anomaly(e, 0.2);
        let cos_nu = (e.cos() - 0.2) / (1.0 - 0.2 * e.cos());
        assert_abs_diff_eq!(nu.cos(), cos_nu, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_diff() {
        assert_abs_diff_eq!(angle_diff(0.1, DPI - 0.1), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_diff(DPI - 0.1, 0.1), -0.2, epsilon = 1e-12);
    }
}
