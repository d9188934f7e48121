use faer::Col;
use proptest::prelude::*;

use crate::{History, Method, MidAnalysis, MixCfg, Stepper};

/// A componentwise affine contraction with per-component rates below 1,
/// so every method has a well-conditioned problem to chew on.
fn contraction(x: &Col<f64>, rates: &[f64], shifts: &[f64]) -> Col<f64> {
    let vals: Vec<f64> = x.iter().copied().collect();
    Col::from_fn(vals.len(), |i| rates[i] * vals[i] + shifts[i])
}

fn run(method: Method, steps: usize, rates: &[f64], shifts: &[f64], x0: &[f64]) -> History {
    let mut stepper = Stepper::new(
        method,
        |_x: &mut Col<f64>, _x_prev: &Col<f64>| {},
        |mid: &MidAnalysis| mid.clone(),
        |_live: &crate::LiveAnalysis<'_>| (),
    );
    let mut hs = stepper.history();
    let mut x = Col::from_fn(x0.len(), |i| x0[i]);
    for _ in 0..steps {
        let x_prev = x.clone();
        x = contraction(&x_prev, rates, shifts);
        // A singular mixing solve is a legitimate outcome on random
        // problems; container invariants must hold up to that point.
        if stepper.step(&mut hs, &mut x, &x_prev).is_err() {
            break;
        }
        for v in x.iter() {
            assert!(v.is_finite(), "iterate left the finite range");
        }
    }
    hs
}

proptest! {
    #[test]
    fn vanilla_window_bound_holds_for_any_step_count(
        m in 1usize..5,
        steps in 1usize..12,
        rate in 0.05f64..0.9,
        shift in -5.0f64..5.0,
        x0 in -10.0f64..10.0,
    ) {
        let hs = run(
            Method::Vanilla { m },
            steps,
            &[rate, rate * 0.5],
            &[shift, -shift],
            &[x0, x0 + 1.0],
        );
        match hs {
            History::Vanilla(v) => {
                prop_assert!(v.residuals().len() <= m + 1);
                prop_assert!(v.solutions().len() <= m + 1);
                prop_assert!(v.solutions().len() >= v.residuals().len());
            }
            _ => prop_assert!(false, "wrong history variant"),
        }
    }

    #[test]
    fn faa_difference_matrices_stay_joint_and_bounded(
        m in 2usize..6,
        steps in 1usize..12,
        rate in 0.05f64..0.9,
        shift in -5.0f64..5.0,
    ) {
        let hs = run(
            Method::Faa { m, cs: 0.9, kappabar: 1e4 },
            steps,
            &[rate, 0.8 * rate],
            &[shift, shift + 0.5],
            &[1.0, -1.0],
        );
        match hs {
            History::Faa(f) => {
                prop_assert_eq!(f.g_cols().ncols(), f.x_cols().ncols());
                prop_assert!(f.g_cols().ncols() <= m - 1);
            }
            _ => prop_assert!(false, "wrong history variant"),
        }
    }

    #[test]
    fn paqr_alpha_is_always_a_convex_normalization(
        steps in 2usize..10,
        rate in 0.05f64..0.9,
        shift in -5.0f64..5.0,
    ) {
        let mut stepper = Stepper::new(
            Method::Paqr { tol: 1e-12 },
            |_x: &mut Col<f64>, _x_prev: &Col<f64>| {},
            |mid: &MidAnalysis| match mid {
                MidAnalysis::Paqr { alpha, .. } => alpha.iter().sum::<f64>(),
                _ => f64::NAN,
            },
            |_live: &crate::LiveAnalysis<'_>| (),
        );
        let mut hs = stepper.history();
        let mut x = Col::from_fn(2, |_| 1.0);
        for _ in 0..steps {
            let x_prev = x.clone();
            x = contraction(&x_prev, &[rate, 0.5 * rate], &[shift, shift]);
            match stepper.step(&mut hs, &mut x, &x_prev) {
                Ok((total, ())) => prop_assert!((total - 1.0).abs() < 1e-9, "alpha sums to {}", total),
                Err(_) => break,
            }
        }
    }

    #[test]
    fn unknown_method_names_never_parse(name in "[a-z]{1,8}") {
        prop_assume!(!matches!(name.as_str(), "vanilla" | "paqr" | "faa"));
        prop_assert!(Method::parse(&name, MixCfg::default()).is_err());
    }
}
