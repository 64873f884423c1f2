//! The CFL controller never returns a step above the cap or above the
//! advective bound, whatever the hysteresis threshold.

use proptest::prelude::*;
use spectral_rs::{
    BallBasis, CartesianCoordinates, CartesianSpace, Cfl, CflConfig, Distributor, Dtype, Field, FieldRef,
    FourierBasis, JacobiBasis, Space, SphericalCoordinates,
};
use std::f64::consts::PI;
use std::sync::Arc;

fn channel_velocity() -> FieldRef {
    let c = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(c.coord(0).clone(), 16, (0.0, 2.0 * PI), 1.5).unwrap();
    let y = JacobiBasis::chebyshev(c.coord(1).clone(), 12, (-1.0, 1.0), 1.5).unwrap();
    let s = CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
    Field::vector("u", s.into()).unwrap().into_ref()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn step_respects_cap_and_bound(
        amplitudes in prop::collection::vec(0.0f64..20.0, 1..12),
        threshold in 0.0f64..0.5,
        safety in 0.1f64..1.0,
    ) {
        let u = channel_velocity();
        let max_dt = 0.05;
        let config = CflConfig::default()
            .with_safety(safety)
            .with_threshold(threshold)
            .with_max_dt(max_dt);
        let mut cfl = Cfl::new(max_dt, config, Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        for (it, a) in amplitudes.iter().enumerate() {
            u.write()
                .set_grid_fn(|comp, p| if comp == 0 { a * (1.0 - p[1] * p[1]) } else { 0.5 * a * p[0].sin() })
                .unwrap();
            let freq = cfl.compute_max_frequency().unwrap();
            let dt = cfl.compute_timestep(it as u64).unwrap();
            prop_assert!(dt > 0.0);
            prop_assert!(dt <= max_dt);
            if freq > 0.0 {
                prop_assert!(dt <= safety / freq * (1.0 + 1e-12), "dt {} above bound {}", dt, safety / freq);
            }
        }
    }
}

#[test]
fn test_ball_velocity_bound() {
    let coords = SphericalCoordinates::new("phi", "theta", "r");
    let ball = Arc::new(BallBasis::new(coords, (8, 6, 8), 1.0, 1.5, Dtype::Real).unwrap());
    let mut u = Field::vector("u", Space::from(Arc::clone(&ball))).unwrap();
    // Solid-body rotation about z: u_φ = r sin θ.
    u.set_grid_fn(|comp, p| if comp == 0 { p[2] * p[1].sin() } else { 0.0 }).unwrap();
    let u = u.into_ref();
    let mut cfl = Cfl::new(1.0, CflConfig::default().with_safety(0.5), Distributor::serial()).unwrap();
    cfl.add_velocity(&u).unwrap();
    let l = ball.l_max() as f64;
    // |u_h| / r = sin θ ≤ 1, so the frequency is at most √(L(L+1)).
    let freq = cfl.compute_max_frequency().unwrap();
    assert!(freq > 0.0 && freq <= (l * (l + 1.0)).sqrt() + 1e-12);
    let dt = cfl.compute_timestep(0).unwrap();
    assert!((dt - 0.5 / freq).abs() < 1e-14);
}

#[test]
fn test_zero_velocity_falls_back_to_cap() {
    let u = channel_velocity();
    let config = CflConfig::default().with_max_dt(0.02).with_threshold(0.1);
    let mut cfl = Cfl::new(0.01, config, Distributor::serial()).unwrap();
    cfl.add_velocity(&u).unwrap();
    assert_eq!(cfl.compute_timestep(0).unwrap(), 0.02);
}
