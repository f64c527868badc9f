//! Production and utility function objects.
//!
//! A closed family of vector-in/scalar-out and vector-in/vector-out shapes
//! with componentwise partial derivatives. Callers dispatch through `f`/`df`
//! and never branch on the variant tag.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

// ============================================================================
// VecToScalar - real-valued functions of a quantity vector
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VecToScalar {
    /// Perfect substitutes.
    Linear { productivities: Vec<f64> },
    CobbDouglas { tfp: f64, elasticities: Vec<f64> },
    /// Cobb-Douglas with elasticities normalized to sum to one.
    CobbDouglasCrs { tfp: f64, elasticities: Vec<f64> },
    StoneGeary {
        tfp: f64,
        elasticities: Vec<f64>,
        thresholds: Vec<f64>,
    },
    /// Perfect complements.
    Leontief { productivities: Vec<f64> },
    /// Constant elasticity of substitution.
    ///
    /// `substitution` is the transformed exponent `1 / (1 - elasticity)`;
    /// elasticity 1 degenerates to Cobb-Douglas, 0 to Leontief.
    Ces {
        tfp: f64,
        share_params: Vec<f64>,
        substitution: f64,
    },
}

impl VecToScalar {
    pub fn linear(productivities: Vec<f64>) -> Self {
        VecToScalar::Linear { productivities }
    }

    pub fn cobb_douglas(tfp: f64, elasticities: Vec<f64>) -> Self {
        VecToScalar::CobbDouglas { tfp, elasticities }
    }

    pub fn cobb_douglas_crs(tfp: f64, mut elasticities: Vec<f64>) -> Self {
        let total: f64 = elasticities.iter().sum();
        if total > 0.0 {
            for e in &mut elasticities {
                *e /= total;
            }
        }
        VecToScalar::CobbDouglasCrs { tfp, elasticities }
    }

    pub fn stone_geary(tfp: f64, elasticities: Vec<f64>, thresholds: Vec<f64>) -> Result<Self> {
        if thresholds.len() != elasticities.len() {
            return Err(SimError::ScenarioParamLength("stone_geary.thresholds"));
        }
        Ok(VecToScalar::StoneGeary {
            tfp,
            elasticities,
            thresholds,
        })
    }

    pub fn leontief(productivities: Vec<f64>) -> Self {
        VecToScalar::Leontief { productivities }
    }

    pub fn ces(tfp: f64, share_params: Vec<f64>, elasticity_of_substitution: f64) -> Self {
        VecToScalar::Ces {
            tfp,
            share_params,
            substitution: 1.0 / (1.0 - elasticity_of_substitution),
        }
    }

    /// Number of inputs this function consumes.
    pub fn num_inputs(&self) -> usize {
        match self {
            VecToScalar::Linear { productivities } | VecToScalar::Leontief { productivities } => {
                productivities.len()
            }
            VecToScalar::CobbDouglas { elasticities, .. }
            | VecToScalar::CobbDouglasCrs { elasticities, .. }
            | VecToScalar::StoneGeary { elasticities, .. } => elasticities.len(),
            VecToScalar::Ces { share_params, .. } => share_params.len(),
        }
    }

    pub fn f(&self, quantities: &[f64]) -> f64 {
        match self {
            VecToScalar::Linear { productivities } => productivities
                .iter()
                .zip(quantities)
                .map(|(p, q)| p * q)
                .sum(),
            VecToScalar::CobbDouglas { tfp, elasticities }
            | VecToScalar::CobbDouglasCrs { tfp, elasticities } => elasticities
                .iter()
                .zip(quantities)
                .fold(*tfp, |acc, (e, q)| acc * q.powf(*e)),
            VecToScalar::StoneGeary {
                tfp,
                elasticities,
                thresholds,
            } => elasticities
                .iter()
                .zip(thresholds)
                .zip(quantities)
                .fold(*tfp, |acc, ((e, th), q)| acc * (q - th).powf(*e)),
            VecToScalar::Leontief { productivities } => productivities
                .iter()
                .zip(quantities)
                .map(|(p, q)| p * q)
                .fold(f64::INFINITY, f64::min),
            VecToScalar::Ces {
                tfp, substitution, ..
            } => tfp * self.ces_inner_sum(quantities).powf(1.0 / substitution),
        }
    }

    /// Partial derivative of `f` with respect to the `idx`th input.
    pub fn df(&self, quantities: &[f64], idx: usize) -> f64 {
        match self {
            VecToScalar::Linear { productivities } => productivities[idx],
            VecToScalar::CobbDouglas { tfp, elasticities }
            | VecToScalar::CobbDouglasCrs { tfp, elasticities } => {
                let mut out = *tfp;
                for (i, (e, q)) in elasticities.iter().zip(quantities).enumerate() {
                    if i == idx {
                        out *= e * q.powf(e - 1.0);
                    } else {
                        out *= q.powf(*e);
                    }
                }
                out
            }
            VecToScalar::StoneGeary {
                tfp,
                elasticities,
                thresholds,
            } => {
                let mut out = *tfp;
                for (i, ((e, th), q)) in elasticities
                    .iter()
                    .zip(thresholds)
                    .zip(quantities)
                    .enumerate()
                {
                    if i == idx {
                        out *= e * (q - th).powf(e - 1.0);
                    } else {
                        out *= (q - th).powf(*e);
                    }
                }
                out
            }
            VecToScalar::Leontief { productivities } => {
                // Derivative is the productivity of the unique binding input.
                let values: Vec<f64> = productivities
                    .iter()
                    .zip(quantities)
                    .map(|(p, q)| p * q)
                    .collect();
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let binding: Vec<usize> = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| **v == min)
                    .map(|(i, _)| i)
                    .collect();
                if binding == [idx] {
                    productivities[idx]
                } else {
                    0.0
                }
            }
            VecToScalar::Ces {
                tfp,
                share_params,
                substitution,
            } => {
                if share_params[idx] == 0.0 {
                    return 0.0;
                }
                let inner = self.ces_inner_sum(quantities);
                tfp * inner.powf(1.0 / substitution - 1.0)
                    * share_params[idx]
                    * quantities[idx].powf(substitution - 1.0)
            }
        }
    }

    fn ces_inner_sum(&self, quantities: &[f64]) -> f64 {
        match self {
            VecToScalar::Ces {
                share_params,
                substitution,
                ..
            } => share_params
                .iter()
                .zip(quantities)
                // A zero share contributes nothing; skipping it avoids
                // 0 * inf = NaN when the quantity is zero and the exponent
                // is negative.
                .map(|(s, q)| if *s == 0.0 { 0.0 } else { s * q.powf(*substitution) })
                .sum(),
            _ => unreachable!("ces_inner_sum on a non-CES variant"),
        }
    }

    /// Flat parameter vector consumed by the decision nets:
    /// `[tfp, shares..., substitution]` for CES, analogous for the rest.
    pub fn param_vector(&self) -> Vec<f64> {
        match self {
            VecToScalar::Linear { productivities }
            | VecToScalar::Leontief { productivities } => productivities.clone(),
            VecToScalar::CobbDouglas { tfp, elasticities }
            | VecToScalar::CobbDouglasCrs { tfp, elasticities } => {
                let mut out = vec![*tfp];
                out.extend_from_slice(elasticities);
                out
            }
            VecToScalar::StoneGeary {
                tfp,
                elasticities,
                thresholds,
            } => {
                let mut out = vec![*tfp];
                out.extend_from_slice(elasticities);
                out.extend_from_slice(thresholds);
                out
            }
            VecToScalar::Ces {
                tfp,
                share_params,
                substitution,
            } => {
                let mut out = vec![*tfp];
                out.extend_from_slice(share_params);
                out.push(*substitution);
                out
            }
        }
    }
}

// ============================================================================
// VecToVec - vector-valued production functions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VecToVec {
    /// Wraps a `VecToScalar` as a vector function that is positive in a
    /// single output index.
    FromScalar {
        inner: VecToScalar,
        num_outputs: usize,
        output_index: usize,
    },
    /// Componentwise sum of inner functions with identical arities.
    Sum { inner: Vec<VecToVec> },
}

impl VecToVec {
    pub fn from_scalar(inner: VecToScalar, num_outputs: usize, output_index: usize) -> Self {
        VecToVec::FromScalar {
            inner,
            num_outputs,
            output_index,
        }
    }

    pub fn sum(inner: Vec<VecToVec>) -> Self {
        VecToVec::Sum { inner }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            VecToVec::FromScalar { inner, .. } => inner.num_inputs(),
            VecToVec::Sum { inner } => inner.first().map_or(0, VecToVec::num_inputs),
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            VecToVec::FromScalar { num_outputs, .. } => *num_outputs,
            VecToVec::Sum { inner } => inner.first().map_or(0, VecToVec::num_outputs),
        }
    }

    pub fn f(&self, quantities: &[f64]) -> Vec<f64> {
        match self {
            VecToVec::FromScalar {
                inner,
                num_outputs,
                output_index,
            } => {
                let mut out = vec![0.0; *num_outputs];
                out[*output_index] = inner.f(quantities);
                out
            }
            VecToVec::Sum { inner } => {
                let mut out = vec![0.0; self.num_outputs()];
                for func in inner {
                    for (acc, v) in out.iter_mut().zip(func.f(quantities)) {
                        *acc += v;
                    }
                }
                out
            }
        }
    }

    /// Derivative of the `i`th output with respect to the `j`th input.
    pub fn df(&self, quantities: &[f64], i: usize, j: usize) -> f64 {
        match self {
            VecToVec::FromScalar {
                inner,
                output_index,
                ..
            } => {
                if i == *output_index {
                    inner.df(quantities, j)
                } else {
                    0.0
                }
            }
            VecToVec::Sum { inner } => inner.iter().map(|func| func.df(quantities, i, j)).sum(),
        }
    }

    /// Concatenated per-output parameter vectors for the decision nets.
    pub fn param_vector(&self) -> Vec<f64> {
        match self {
            VecToVec::FromScalar { inner, .. } => inner.param_vector(),
            VecToVec::Sum { inner } => inner.iter().flat_map(VecToVec::param_vector).collect(),
        }
    }
}

/// A sum of single-output CES production functions, one per output good.
///
/// This is the standard firm technology: each output `i` is produced by its
/// own CES over `[labor, goods...]`.
pub fn ces_vec_to_vec(
    tfps: Vec<f64>,
    share_params: Vec<Vec<f64>>,
    elasticities: Vec<f64>,
) -> Result<VecToVec> {
    if share_params.len() != tfps.len() || elasticities.len() != tfps.len() {
        return Err(SimError::ScenarioParamLength("ces_vec_to_vec"));
    }
    let num_outputs = tfps.len();
    let inner = tfps
        .into_iter()
        .zip(share_params)
        .zip(elasticities)
        .enumerate()
        .map(|(i, ((tfp, shares), elast))| {
            VecToVec::from_scalar(VecToScalar::ces(tfp, shares, elast), num_outputs, i)
        })
        .collect();
    Ok(VecToVec::sum(inner))
}
