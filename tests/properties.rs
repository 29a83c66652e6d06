use convexfolio::portfolio::hc_optimization;
use convexfolio::portfolio::HierarchicalConfig;
use convexfolio::portfolio::OptimizationInputs;
use convexfolio::portfolio::SolverChain;
use convexfolio::risk::cvar_hist;
use convexfolio::risk::var_hist;
use convexfolio::stats::moments::sample_covariance;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use proptest::prelude::*;

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn cvar_dominates_var(x in prop::collection::vec(-0.2f64..0.2, 20..200), alpha in 0.01f64..0.5) {
    prop_assert!(cvar_hist(&x, alpha) >= var_hist(&x, alpha) - 1e-12);
  }

  #[test]
  fn cvar_grows_deeper_in_the_tail(x in prop::collection::vec(-0.2f64..0.2, 20..200), a in 0.01f64..0.5, b in 0.01f64..0.5) {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    prop_assert!(cvar_hist(&x, lo) >= cvar_hist(&x, hi) - 1e-12);
  }

  #[test]
  fn hrp_keeps_weights_inside_bounds(
    n in 3usize..8,
    phase in 0.0f64..3.0,
    lo_seed in prop::collection::vec(0.0f64..0.1, 8),
    hi_seed in prop::collection::vec(0.4f64..1.0, 8),
  ) {
    let returns = Array2::from_shape_fn((150, n), |(t, j)| {
      let x = t as f64;
      0.001 * j as f64 + 0.01 * (1.0 + 0.3 * j as f64) * (x * (0.17 + 0.13 * j as f64) + phase).sin()
        + 0.004 * (x * 0.9 + j as f64 * phase).cos()
    });
    let assets: Vec<String> = (0..n).map(|j| format!("A{j}")).collect();
    let mu = returns.mean_axis(Axis(0)).unwrap();
    let cov = sample_covariance(&returns.view()).unwrap();
    let inputs = OptimizationInputs {
      assets: &assets,
      mu: mu.view(),
      cov: cov.view(),
      returns: returns.view(),
    };
    let w_min = Array1::from(lo_seed[..n].to_vec());
    let w_max = Array1::from(hi_seed[..n].to_vec());
    let cfg = HierarchicalConfig {
      w_min: Some(w_min.clone()),
      w_max: Some(w_max.clone()),
      ..HierarchicalConfig::default()
    };
    let w = hc_optimization(&inputs, None, &cfg, &SolverChain::default())
      .unwrap()
      .into_weights()
      .unwrap()
      .into_values();
    prop_assert!((w.sum() - 1.0).abs() < 1e-9);
    for i in 0..n {
      prop_assert!(w[i] >= w_min[i] - 1e-9 && w[i] <= w_max[i] + 1e-9, "asset {} = {} outside [{}, {}]", i, w[i], w_min[i], w_max[i]);
    }
  }
}
