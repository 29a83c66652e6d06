use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::brent::BrentOpt;

struct ScalarCost<F: Fn(f64) -> f64> {
  f: F,
}

impl<F: Fn(f64) -> f64> CostFunction for ScalarCost<F> {
  type Param = f64;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let v = (self.f)(*x);
    Ok(if v.is_finite() { v } else { f64::MAX })
  }
}

/// Bounded Brent minimization of `f` on `[lo, hi]`.
///
/// Returns the minimizer and the minimum, or `None` when the solver could
/// not produce a finite point.
pub fn minimize_scalar<F>(f: F, lo: f64, hi: f64, max_iters: u64) -> Option<(f64, f64)>
where
  F: Fn(f64) -> f64,
{
  let solver = BrentOpt::new(lo, hi).set_tolerance(1e-10, 1e-12);
  let res = Executor::new(ScalarCost { f }, solver)
    .configure(|state| state.max_iters(max_iters))
    .run()
    .ok()?;
  let x = res.state.best_param?;
  let fx = res.state.best_cost;
  (x.is_finite() && fx.is_finite()).then_some((x, fx))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn finds_parabola_vertex() {
    let (x, fx) = minimize_scalar(|x| (x - 0.3).powi(2) + 1.0, -2.0, 2.0, 200).unwrap();
    assert_abs_diff_eq!(x, 0.3, epsilon = 1e-6);
    assert_abs_diff_eq!(fx, 1.0, epsilon = 1e-10);
  }
}
