//! Stochastic action sampling with log-probability bookkeeping.
//!
//! Every continuous head outputs `(mu, logsigma)` rows. Actions are drawn
//! from the implied normal and pushed through a squashing transform
//! (sigmoid for proportions, exp for prices and labor). The recorded
//! log-probability is always that of the latent normal draw: the policy
//! gradient only ever needs the log-probability of the sampled action, not
//! the transformed density.

use candle_core::{IndexOp, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::Result;

const SQRT_2PI: f64 = 2.5066282746310002;

/// Draw from `N(mu, exp(logsigma))` rowwise.
///
/// `params` has shape `[n, 2]` with `mu` in column 0 and `logsigma` in
/// column 1. Returns `(values, log_probas)`, both `[n]`, with the graph
/// kept through `mu` and `sigma`.
pub fn sample_normal(params: &Tensor, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
    let mu = params.i((.., 0))?;
    let sigma = params.i((.., 1))?.exp()?;
    let n = mu.dim(0)?;

    let eps: Vec<f32> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let eps = Tensor::from_vec(eps, (n,), mu.device())?;

    let values = ((&eps * &sigma)? + &mu)?;
    let z = ((&values - &mu)? / &sigma)?;
    let log_probas = ((z.sqr()? * -0.5)? - (sigma * SQRT_2PI)?.log()?)?;
    Ok((values, log_probas))
}

/// Logit-normal: a normal draw squashed through a sigmoid, yielding values
/// in `(0, 1)` to be read as proportions.
pub fn sample_logit_normal(params: &Tensor, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
    let (values, log_probas) = sample_normal(params, rng)?;
    Ok((candle_nn::ops::sigmoid(&values)?, log_probas))
}

/// Log-normal: a normal draw exponentiated, yielding values in `(0, inf)`
/// for prices, wages, and labor totals.
pub fn sample_log_normal(params: &Tensor, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
    let (values, log_probas) = sample_normal(params, rng)?;
    Ok((values.exp()?, log_probas))
}

/// Independent Bernoulli draw per slot.
///
/// `probas` is `[n]` of take-probabilities. Returns the taken mask and a
/// single scalar log-probability: `log p` for taken slots, `log (1 - p)`
/// for rejected ones, summed.
pub fn sample_bernoulli(probas: &Tensor, rng: &mut StdRng) -> Result<(Vec<bool>, Tensor)> {
    let n = probas.dim(0)?;
    let values = probas.to_vec1::<f32>()?;

    let mut taken = Vec::with_capacity(n);
    let mut log_proba = Tensor::new(0f32, probas.device())?;
    for (i, p) in values.iter().enumerate() {
        let take = rng.random::<f32>() < *p;
        taken.push(take);
        let slot = probas.i(i)?;
        let term = if take {
            slot.log()?
        } else {
            slot.affine(-1.0, 1.0)?.log()?
        };
        log_proba = (&log_proba + &term)?;
    }
    Ok((taken, log_proba))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    fn params(rows: &[(f32, f32)]) -> Tensor {
        let data: Vec<f32> = rows.iter().flat_map(|(m, s)| [*m, *s]).collect();
        Tensor::from_vec(data, (rows.len(), 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn normal_log_proba_matches_closed_form() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = params(&[(0.5, -1.0), (2.0, 0.0)]);
        let (values, log_probas) = sample_normal(&p, &mut rng).unwrap();

        let values = values.to_vec1::<f32>().unwrap();
        let log_probas = log_probas.to_vec1::<f32>().unwrap();
        for (i, (mu, logsigma)) in [(0.5f64, -1.0f64), (2.0, 0.0)].iter().enumerate() {
            let sigma = logsigma.exp();
            let z = (values[i] as f64 - mu) / sigma;
            let expected = -0.5 * z * z - (sigma * SQRT_2PI).ln();
            approx::assert_relative_eq!(log_probas[i] as f64, expected, max_relative = 1e-4);
        }
    }

    #[test]
    fn squashed_samples_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let p = params(&[(0.0, 1.0); 16]);
        let (props, _) = sample_logit_normal(&p, &mut rng).unwrap();
        assert!(props
            .to_vec1::<f32>()
            .unwrap()
            .iter()
            .all(|v| (0.0..=1.0).contains(v)));

        let (prices, _) = sample_log_normal(&p, &mut rng).unwrap();
        assert!(prices.to_vec1::<f32>().unwrap().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn bernoulli_log_proba_sums_slotwise_terms() {
        let mut rng = StdRng::seed_from_u64(5);
        let probas = Tensor::from_vec(vec![0.25f32, 0.75, 0.5], (3,), &Device::Cpu).unwrap();
        let (taken, log_proba) = sample_bernoulli(&probas, &mut rng).unwrap();

        let expected: f32 = taken
            .iter()
            .zip([0.25f32, 0.75, 0.5])
            .map(|(t, p)| if *t { p.ln() } else { (1.0 - p).ln() })
            .sum();
        approx::assert_relative_eq!(
            log_proba.to_scalar::<f32>().unwrap(),
            expected,
            max_relative = 1e-5
        );
    }
}
