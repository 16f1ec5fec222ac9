//! L1-penalised logistic regression.
//!
//! Minimises `mean(log_loss) + ||w||₁ / (C·n)` with FISTA (accelerated proximal
//! gradient). Features are standardised internally; the stored coefficients are
//! mapped back to the raw feature scale, and the intercept is not penalised.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{
    check_training_input, check_width, sigmoid, unknown_param, Classifier, ModelError, ParamValue,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularisation strength; must be positive.
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    /// Accepted for grid compatibility; the solver is deterministic.
    pub random_state: Option<u64>,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            random_state: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub params: LogisticParams,
    #[serde(default)]
    coef: Option<Vec<f64>>,
    #[serde(default)]
    intercept: f64,
}

fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            coef: None,
            intercept: 0.0,
        }
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coef.as_deref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        check_training_input(&x, &y)?;
        let c = self.params.c;
        if !(c > 0.0 && c.is_finite()) {
            return Err(ModelError::InvalidParam {
                name: "C".into(),
                value: c.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }

        let (n, p) = x.dim();
        let nf = n as f64;
        let means = x.mean_axis(Axis(0)).ok_or(ModelError::EmptyInput)?;
        let scales = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let z = (&x - &means) / &scales;

        // Lipschitz bound of the mean log loss gradient on standardised data.
        let step = 1.0 / (0.25 * (p as f64 + 1.0));
        let penalty = 1.0 / (c * nf);

        let mut w = Array1::<f64>::zeros(p);
        let mut b = 0.0;
        let mut v_w = w.clone();
        let mut v_b = b;
        let mut t = 1.0_f64;

        for _ in 0..self.params.max_iter {
            let margin = z.dot(&v_w) + v_b;
            let residual = margin.mapv(sigmoid) - y;
            let grad_w = z.t().dot(&residual) / nf;
            let grad_b = residual.sum() / nf;

            let w_next = (&v_w - &(grad_w * step)).mapv(|v| soft_threshold(v, step * penalty));
            let b_next = v_b - step * grad_b;
            if w_next.iter().any(|v| !v.is_finite()) || !b_next.is_finite() {
                return Err(ModelError::Diverged);
            }

            let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
            let momentum = (t - 1.0) / t_next;
            let delta = (&w_next - &w)
                .iter()
                .fold((b_next - b).abs(), |m, d| m.max(d.abs()));

            v_w = &w_next + &((&w_next - &w) * momentum);
            v_b = b_next + momentum * (b_next - b);
            w = w_next;
            b = b_next;
            t = t_next;

            if delta < self.params.tol {
                break;
            }
        }

        let coef = &w / &scales;
        self.intercept = b - coef.dot(&means);
        self.coef = Some(coef.to_vec());
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let coef = self.coef.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(coef.len(), &x)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }
        let coef = ArrayView1::from(coef.as_slice());
        Ok((x.dot(&coef) + self.intercept).mapv(sigmoid))
    }

    /// Linear models expose no importances.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError> {
        match name {
            "C" | "c" => self.params.c = value.to_f64(name)?,
            "max_iter" => self.params.max_iter = value.to_usize(name, 1)?,
            "tol" => self.params.tol = value.to_f64(name)?,
            "random_state" => {
                self.params.random_state = match value {
                    ParamValue::Null => None,
                    other => Some(other.to_seed(name)?),
                }
            }
            _ => return Err(unknown_param("logistic_regression", name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            if j == 0 {
                i as f64 * 10.0
            } else {
                ((i * 7) % 5) as f64
            }
        });
        let y: Array1<f64> = (0..40).map(|i| f64::from(i >= 20)).collect();
        (x, y)
    }

    #[test]
    fn separates_on_raw_scale() {
        let (x, y) = data();
        let mut lr = LogisticRegression::default();
        lr.fit(x.view(), y.view()).unwrap();
        let p = lr.predict_proba(x.view()).unwrap();
        assert!(p[0] < 0.2);
        assert!(p[39] > 0.8);
        assert!(lr.coefficients().unwrap()[0] > 0.0);
    }

    #[test]
    fn strong_penalty_zeroes_coefficients() {
        let (x, y) = data();
        let mut lr = LogisticRegression::default();
        lr.set_param("C", &ParamValue::Float(1e-4)).unwrap();
        lr.fit(x.view(), y.view()).unwrap();
        assert!(lr.coefficients().unwrap().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn zero_c_fails_to_fit() {
        let (x, y) = data();
        let mut lr = LogisticRegression::default();
        lr.set_param("C", &ParamValue::Float(0.0)).unwrap();
        assert!(matches!(
            lr.fit(x.view(), y.view()),
            Err(ModelError::InvalidParam { .. })
        ));
    }

    #[test]
    fn rejects_missing_values() {
        let mut lr = LogisticRegression::default();
        let x = array![[1.0], [f64::NAN]];
        let y = array![0.0, 1.0];
        assert_eq!(lr.fit(x.view(), y.view()), Err(ModelError::NonFiniteInput));
    }

    #[test]
    fn no_importances() {
        let (x, y) = data();
        let mut lr = LogisticRegression::default();
        lr.fit(x.view(), y.view()).unwrap();
        assert!(lr.feature_importances().is_none());
    }

    #[test]
    fn random_state_accepted() {
        let mut lr = LogisticRegression::default();
        lr.set_param("random_state", &ParamValue::Int(1992)).unwrap();
        assert_eq!(lr.params.random_state, Some(1992));
    }
}
