/// Converts `e²/Å` to kcal/mol, the unit of the Lennard-Jones channel.
pub const COULOMB_CONSTANT: f64 = 332.0637; // In kcal·Å/(mol·e²)

/// Electrostatic energy `k·q_ij / r` in kcal/mol, for charges in e and distances in Å.
///
/// An infinite distance marks an excluded contact and contributes exactly zero.
#[inline]
pub fn coulomb(dist: f64, charge_product: f64) -> f64 {
    COULOMB_CONSTANT * charge_product / dist
}

#[inline]
pub fn lennard_jones_12_6(dist: f64, sigma: f64, epsilon: f64) -> f64 {
    let rho = sigma / dist;
    let rho6 = rho.powi(6);
    let rho12 = rho6 * rho6;
    4.0 * epsilon * (rho12 - rho6)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn lennard_jones_at_sigma_returns_zero() {
        assert!(f64_approx_equal(lennard_jones_12_6(3.0, 3.0, 0.2), 0.0));
    }

    #[test]
    fn lennard_jones_at_minimum_returns_negative_epsilon() {
        let r_min = 2f64.powf(1.0 / 6.0) * 3.0;
        assert!(f64_approx_equal(lennard_jones_12_6(r_min, 3.0, 0.2), -0.2));
    }

    #[test]
    fn lennard_jones_at_infinite_distance_is_zero() {
        assert_eq!(lennard_jones_12_6(f64::INFINITY, 3.0, 0.2), 0.0);
    }

    #[test]
    fn lennard_jones_with_zero_epsilon_is_zero() {
        assert_eq!(lennard_jones_12_6(1.0, 3.0, 0.0), 0.0);
    }

    #[test]
    fn coulomb_scales_inversely_with_distance() {
        assert!(f64_approx_equal(coulomb(2.0, -1.0), -COULOMB_CONSTANT / 2.0));
        assert!(f64_approx_equal(coulomb(0.5, 0.25), COULOMB_CONSTANT / 2.0));
    }

    #[test]
    fn coulomb_and_lennard_jones_share_kcal_per_mol() {
        // Na+ Cl- contact at 2.8 Å: about -118.6 kcal/mol of electrostatics against a
        // Lennard-Jones term on the order of 0.1 kcal/mol.
        let elstat = coulomb(2.8, -1.0);
        assert!((elstat + 118.594).abs() < 1e-3);
        let lj = lennard_jones_12_6(2.8, 3.0, 0.1);
        assert!(lj.abs() < 1.0 && lj > 0.0);
    }

    #[test]
    fn coulomb_at_infinite_distance_is_zero() {
        assert_eq!(coulomb(f64::INFINITY, 1.0), 0.0);
    }
}
