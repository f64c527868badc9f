//! The decision-net family: one shared encoder per market plus the policy
//! and value heads that consume them.
//!
//! Every module owns its own `VarMap` so checkpoints stay one file per
//! module. Heads that read encoded offers do not own the encoder; instead
//! the family exposes per-head var-sets that include the shared encoder's
//! variables, so stepping any consumer head's optimizer also moves the
//! encoder.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder, VarMap};

use crate::constants::{
    DEFAULT_ENCODING_SIZE, DEFAULT_HIDDEN_SIZE, DEFAULT_N_HIDDEN, DEFAULT_N_HIDDEN_SMALL,
    DEFAULT_STACK_SIZE,
};
use crate::error::Result;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Offers presented to an encoder in one decision call.
    pub stack_size: usize,
    pub encoding_size: usize,
    pub hidden_size: usize,
    pub n_hidden: usize,
    /// Depth of the offer net's post-split branches.
    pub n_hidden_small: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            stack_size: DEFAULT_STACK_SIZE,
            encoding_size: DEFAULT_ENCODING_SIZE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            n_hidden: DEFAULT_N_HIDDEN,
            n_hidden_small: DEFAULT_N_HIDDEN_SMALL,
        }
    }
}

fn hidden_stack(
    vb: &VarBuilder,
    prefix: &str,
    first_in: usize,
    hidden_size: usize,
    n_hidden: usize,
) -> Result<Vec<Linear>> {
    let mut layers = Vec::with_capacity(n_hidden);
    for i in 0..n_hidden {
        let in_size = if i == 0 { first_in } else { hidden_size };
        layers.push(linear(
            in_size,
            hidden_size,
            vb.pp(format!("{prefix}{i}")),
        )?);
    }
    Ok(layers)
}

/// First layer plain, the rest residual-added, all tanh-activated.
fn forward_residual(layers: &[Linear], x: &Tensor) -> Result<Tensor> {
    let mut x = layers[0].forward(x)?.tanh()?;
    for layer in &layers[1..] {
        x = (&x + layer.forward(&x)?.tanh()?)?;
    }
    Ok(x)
}

// ============================================================================
// Offer encoder
// ============================================================================

/// Condenses per-offer feature vectors into fixed-size embeddings shared by
/// every downstream head.
///
/// Input `[stack, num_features]`, output `[stack, encoding_size]`.
pub struct OfferEncoder {
    varmap: VarMap,
    dim_reduce: Linear,
    hidden: Vec<Linear>,
    last: Linear,
    pub stack_size: usize,
    pub encoding_size: usize,
}

impl OfferEncoder {
    pub fn new(
        stack_size: usize,
        num_features: usize,
        hidden_size: usize,
        n_hidden: usize,
        encoding_size: usize,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let dim_reduce = linear(num_features, hidden_size, vb.pp("dim_reduce"))?;
        let mut hidden = Vec::with_capacity(n_hidden);
        for i in 0..n_hidden {
            hidden.push(linear(hidden_size, hidden_size, vb.pp(format!("hidden{i}")))?);
        }
        let last = linear(hidden_size, encoding_size, vb.pp("last"))?;
        Ok(OfferEncoder {
            varmap,
            dim_reduce,
            hidden,
            last,
            stack_size,
            encoding_size,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = self.dim_reduce.forward(x)?.tanh()?;
        for layer in &self.hidden {
            // Residual connections help trainability through the stack.
            x = (&x + layer.forward(&x)?.tanh()?)?;
        }
        Ok(self.last.forward(&x)?.tanh()?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// Purchase net (also the labor-search head)
// ============================================================================

/// Per-slot take-probabilities for a stack of encoded offers, conditional on
/// the offer being affordable.
///
/// The same architecture serves person purchases, firm purchases, and
/// person labor search; only the parameter vector and encoder differ.
pub struct PurchaseNet {
    varmap: VarMap,
    flatten: Linear,
    hidden: Vec<Linear>,
    last: Linear,
    pub stack_size: usize,
}

impl PurchaseNet {
    pub fn new(
        stack_size: usize,
        encoding_size: usize,
        num_params: usize,
        num_goods: usize,
        hidden_size: usize,
        n_hidden: usize,
        device: &Device,
    ) -> Result<Self> {
        assert!(n_hidden >= 1);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let flatten = linear(encoding_size, 1, vb.pp("flatten"))?;
        let num_features = stack_size + num_params + num_goods + 2;
        let hidden = hidden_stack(&vb, "hidden", num_features, hidden_size, n_hidden)?;
        let last = linear(hidden_size, stack_size, vb.pp("last"))?;
        Ok(PurchaseNet {
            varmap,
            flatten,
            hidden,
            last,
            stack_size,
        })
    }

    /// `encodings` is `[stack, encoding]`; the rest are `[1, _]` rows.
    /// Returns `[stack]` take-probabilities.
    pub fn forward(
        &self,
        encodings: &Tensor,
        params: &Tensor,
        money: &Tensor,
        labor: &Tensor,
        inventory: &Tensor,
    ) -> Result<Tensor> {
        // One scalar per stack slot, then the agent's own state.
        let slots = self
            .flatten
            .forward(encodings)?
            .tanh()?
            .squeeze(1)?
            .unsqueeze(0)?;
        let x = Tensor::cat(&[&slots, params, money, labor, inventory], 1)?;
        let x = forward_residual(&self.hidden, &x)?;
        let out = candle_nn::ops::sigmoid(&self.last.forward(&x)?)?;
        Ok(out.squeeze(0)?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// Consumption net (also the production head)
// ============================================================================

/// `(mu, logsigma)` per good for a logit-normal over the proportion of each
/// good to consume (persons) or commit as production input (firms).
pub struct ConsumptionNet {
    varmap: VarMap,
    first: Linear,
    hidden: Vec<Linear>,
    last: Linear,
    num_goods: usize,
}

impl ConsumptionNet {
    pub fn new(
        num_params: usize,
        num_goods: usize,
        hidden_size: usize,
        n_hidden: usize,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let first = linear(num_params + num_goods + 2, hidden_size, vb.pp("first"))?;
        let mut hidden = Vec::with_capacity(n_hidden);
        for i in 0..n_hidden {
            hidden.push(linear(hidden_size, hidden_size, vb.pp(format!("hidden{i}")))?);
        }
        let last = linear(hidden_size, num_goods * 2, vb.pp("last"))?;
        Ok(ConsumptionNet {
            varmap,
            first,
            hidden,
            last,
            num_goods,
        })
    }

    /// Returns `[num_goods, 2]` rows of `(mu, logsigma)`.
    pub fn forward(
        &self,
        params: &Tensor,
        money: &Tensor,
        labor: &Tensor,
        inventory: &Tensor,
    ) -> Result<Tensor> {
        let x = Tensor::cat(&[params, money, labor, inventory], 1)?;
        let mut x = self.first.forward(&x)?.tanh()?;
        for layer in &self.hidden {
            x = (&x + layer.forward(&x)?.tanh()?)?;
        }
        Ok(self.last.forward(&x)?.reshape((self.num_goods, 2))?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// Offer net
// ============================================================================

/// Two-stage head for posting good offers: a shared trunk, then separate
/// branches for the proportion of inventory to offer (logit-normal) and the
/// per-good price (log-normal).
///
/// Output is `[num_goods, 4]`: `(prop_mu, prop_logsigma, price_mu,
/// price_logsigma)`.
pub struct OfferNet {
    varmap: VarMap,
    flatten: Linear,
    trunk: Vec<Linear>,
    branch_amounts: Vec<Linear>,
    branch_prices: Vec<Linear>,
    last_amounts: Linear,
    last_prices: Linear,
    num_goods: usize,
}

impl OfferNet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stack_size: usize,
        encoding_size: usize,
        num_params: usize,
        num_goods: usize,
        hidden_size: usize,
        n_hidden: usize,
        n_hidden_small: usize,
        device: &Device,
    ) -> Result<Self> {
        assert!(n_hidden >= 1 && n_hidden_small >= 1);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let flatten = linear(encoding_size, 1, vb.pp("flatten"))?;
        let num_features = stack_size + num_params + num_goods + 2;
        let trunk = hidden_stack(&vb, "trunk", num_features, hidden_size, n_hidden)?;
        let branch_amounts = hidden_stack(&vb, "amounts", hidden_size, hidden_size, n_hidden_small)?;
        let branch_prices = hidden_stack(&vb, "prices", hidden_size, hidden_size, n_hidden_small)?;
        let last_amounts = linear(hidden_size, num_goods * 2, vb.pp("last_amounts"))?;
        let last_prices = linear(hidden_size, num_goods * 2, vb.pp("last_prices"))?;
        Ok(OfferNet {
            varmap,
            flatten,
            trunk,
            branch_amounts,
            branch_prices,
            last_amounts,
            last_prices,
            num_goods,
        })
    }

    pub fn forward(
        &self,
        encodings: &Tensor,
        params: &Tensor,
        money: &Tensor,
        labor: &Tensor,
        inventory: &Tensor,
    ) -> Result<Tensor> {
        let slots = self
            .flatten
            .forward(encodings)?
            .tanh()?
            .squeeze(1)?
            .unsqueeze(0)?;
        let x = Tensor::cat(&[&slots, params, money, labor, inventory], 1)?;
        let x = forward_residual(&self.trunk, &x)?;

        // Split into the quantity branch and the price branch.
        let mut x_a = (&x + self.branch_amounts[0].forward(&x)?.tanh()?)?;
        let mut x_b = (&x + self.branch_prices[0].forward(&x)?.tanh()?)?;
        for (a, b) in self.branch_amounts[1..]
            .iter()
            .zip(&self.branch_prices[1..])
        {
            x_a = (&x_a + a.forward(&x_a)?.tanh()?)?;
            x_b = (&x_b + b.forward(&x_b)?.tanh()?)?;
        }
        let amounts = self
            .last_amounts
            .forward(&x_a)?
            .reshape((self.num_goods, 2))?;
        let prices = self
            .last_prices
            .forward(&x_b)?
            .reshape((self.num_goods, 2))?;
        Ok(Tensor::cat(&[&amounts, &prices], 1)?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// Job offer net
// ============================================================================

/// `(labor_mu, labor_logsigma, wage_mu, wage_logsigma)`; both pairs feed
/// log-normal draws.
pub struct JobOfferNet {
    varmap: VarMap,
    flatten: Linear,
    hidden: Vec<Linear>,
    last: Linear,
}

impl JobOfferNet {
    pub fn new(
        stack_size: usize,
        encoding_size: usize,
        num_params: usize,
        num_goods: usize,
        hidden_size: usize,
        n_hidden: usize,
        device: &Device,
    ) -> Result<Self> {
        assert!(n_hidden >= 1);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let flatten = linear(encoding_size, 1, vb.pp("flatten"))?;
        let num_features = stack_size + num_params + num_goods + 2;
        let hidden = hidden_stack(&vb, "hidden", num_features, hidden_size, n_hidden)?;
        let last = linear(hidden_size, 4, vb.pp("last"))?;
        Ok(JobOfferNet {
            varmap,
            flatten,
            hidden,
            last,
        })
    }

    /// Returns `[2, 2]`: row 0 is the labor `(mu, logsigma)`, row 1 the wage.
    pub fn forward(
        &self,
        encodings: &Tensor,
        params: &Tensor,
        money: &Tensor,
        labor: &Tensor,
        inventory: &Tensor,
    ) -> Result<Tensor> {
        let slots = self
            .flatten
            .forward(encodings)?
            .tanh()?
            .squeeze(1)?
            .unsqueeze(0)?;
        let x = Tensor::cat(&[&slots, params, money, labor, inventory], 1)?;
        let x = forward_residual(&self.hidden, &x)?;
        Ok(self.last.forward(&x)?.reshape((2, 2))?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// Value net
// ============================================================================

/// State-value estimate from both encoded markets plus the agent's state.
pub struct ValueNet {
    varmap: VarMap,
    offer_flatten: Linear,
    job_offer_flatten: Linear,
    hidden: Vec<Linear>,
    last: Linear,
}

impl ValueNet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stack_size: usize,
        encoding_size: usize,
        num_params: usize,
        num_goods: usize,
        hidden_size: usize,
        n_hidden: usize,
        device: &Device,
    ) -> Result<Self> {
        assert!(n_hidden >= 1);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let offer_flatten = linear(encoding_size, 1, vb.pp("offer_flatten"))?;
        let job_offer_flatten = linear(encoding_size, 1, vb.pp("job_offer_flatten"))?;
        let num_features = 2 * stack_size + num_params + num_goods + 2;
        let hidden = hidden_stack(&vb, "hidden", num_features, hidden_size, n_hidden)?;
        let last = linear(hidden_size, 1, vb.pp("last"))?;
        Ok(ValueNet {
            varmap,
            offer_flatten,
            job_offer_flatten,
            hidden,
            last,
        })
    }

    /// Returns a 0-dim value estimate.
    pub fn forward(
        &self,
        offer_encodings: &Tensor,
        job_offer_encodings: &Tensor,
        params: &Tensor,
        money: &Tensor,
        labor: &Tensor,
        inventory: &Tensor,
    ) -> Result<Tensor> {
        let offers = self
            .offer_flatten
            .forward(offer_encodings)?
            .tanh()?
            .squeeze(1)?
            .unsqueeze(0)?;
        let job_offers = self
            .job_offer_flatten
            .forward(job_offer_encodings)?
            .tanh()?
            .squeeze(1)?
            .unsqueeze(0)?;
        let x = Tensor::cat(&[&offers, &job_offers, params, money, labor, inventory], 1)?;
        let x = forward_residual(&self.hidden, &x)?;
        Ok(self.last.forward(&x)?.squeeze(1)?.squeeze(0)?)
    }

    pub fn vars(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let mut varmap = self.varmap.clone();
        varmap.load(path)?;
        Ok(())
    }
}

// ============================================================================
// The family
// ============================================================================

/// All eleven modules, wired to the two shared encoders.
pub struct NetFamily {
    pub offer_encoder: OfferEncoder,
    pub job_offer_encoder: OfferEncoder,
    pub purchase_net: PurchaseNet,
    pub firm_purchase_net: PurchaseNet,
    pub labor_search_net: PurchaseNet,
    pub consumption_net: ConsumptionNet,
    pub production_net: ConsumptionNet,
    pub offer_net: OfferNet,
    pub job_offer_net: JobOfferNet,
    pub value_net: ValueNet,
    pub firm_value_net: ValueNet,
    pub num_goods: usize,
    pub num_util_params: usize,
    pub num_prod_params: usize,
}

impl NetFamily {
    /// Build the family for an economy trading `num_goods` goods.
    ///
    /// Utility parameter counts assume CES shapes: `tfp + (goods + labor)
    /// shares + substitution` per person, one such block per output good
    /// for firms.
    pub fn new(num_goods: usize, cfg: &NetConfig, device: &Device) -> Result<Self> {
        let num_util_params = num_goods + 3;
        let num_prod_params = num_util_params * num_goods;

        let offer_encoder = OfferEncoder::new(
            cfg.stack_size,
            num_goods + 1,
            cfg.hidden_size,
            cfg.n_hidden,
            cfg.encoding_size,
            device,
        )?;
        let job_offer_encoder = OfferEncoder::new(
            cfg.stack_size,
            2,
            cfg.hidden_size,
            cfg.n_hidden,
            cfg.encoding_size,
            device,
        )?;
        let purchase_net = PurchaseNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_util_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let firm_purchase_net = PurchaseNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_prod_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let labor_search_net = PurchaseNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_util_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let consumption_net = ConsumptionNet::new(
            num_util_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let production_net = ConsumptionNet::new(
            num_prod_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let offer_net = OfferNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_prod_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            cfg.n_hidden_small,
            device,
        )?;
        let job_offer_net = JobOfferNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_prod_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let value_net = ValueNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_util_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;
        let firm_value_net = ValueNet::new(
            cfg.stack_size,
            cfg.encoding_size,
            num_prod_params,
            num_goods,
            cfg.hidden_size,
            cfg.n_hidden,
            device,
        )?;

        Ok(NetFamily {
            offer_encoder,
            job_offer_encoder,
            purchase_net,
            firm_purchase_net,
            labor_search_net,
            consumption_net,
            production_net,
            offer_net,
            job_offer_net,
            value_net,
            firm_value_net,
            num_goods,
            num_util_params,
            num_prod_params,
        })
    }

    // Per-head optimizer var-sets. Heads that consume an encoder carry its
    // variables so backprop through the head trains the encoder too.

    pub fn purchase_vars(&self) -> Vec<candle_core::Var> {
        [self.purchase_net.vars(), self.offer_encoder.vars()].concat()
    }

    pub fn firm_purchase_vars(&self) -> Vec<candle_core::Var> {
        [self.firm_purchase_net.vars(), self.offer_encoder.vars()].concat()
    }

    pub fn labor_search_vars(&self) -> Vec<candle_core::Var> {
        [self.labor_search_net.vars(), self.job_offer_encoder.vars()].concat()
    }

    pub fn consumption_vars(&self) -> Vec<candle_core::Var> {
        self.consumption_net.vars()
    }

    pub fn production_vars(&self) -> Vec<candle_core::Var> {
        self.production_net.vars()
    }

    pub fn offer_vars(&self) -> Vec<candle_core::Var> {
        [self.offer_net.vars(), self.offer_encoder.vars()].concat()
    }

    pub fn job_offer_vars(&self) -> Vec<candle_core::Var> {
        [self.job_offer_net.vars(), self.job_offer_encoder.vars()].concat()
    }

    pub fn value_vars(&self) -> Vec<candle_core::Var> {
        [
            self.value_net.vars(),
            self.offer_encoder.vars(),
            self.job_offer_encoder.vars(),
        ]
        .concat()
    }

    pub fn firm_value_vars(&self) -> Vec<candle_core::Var> {
        [
            self.firm_value_net.vars(),
            self.offer_encoder.vars(),
            self.job_offer_encoder.vars(),
        ]
        .concat()
    }

    /// Write one checkpoint file per module into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for (name, module) in self.modules() {
            module.save(&dir.join(format!("{name}.safetensors")))?;
        }
        Ok(())
    }

    /// Load every module from `dir`.
    pub fn load(&self, dir: &Path) -> Result<()> {
        for (name, module) in self.modules() {
            module.load(&dir.join(format!("{name}.safetensors")))?;
        }
        Ok(())
    }

    /// Add exploration noise to every module's weights; `pct` in `[0, 1]`
    /// is the fraction of the weight variance replaced by noise.
    pub fn perturb_weights(&self, pct: f64) -> Result<()> {
        for varmap in [
            &self.offer_encoder.varmap,
            &self.job_offer_encoder.varmap,
            &self.purchase_net.varmap,
            &self.firm_purchase_net.varmap,
            &self.labor_search_net.varmap,
            &self.consumption_net.varmap,
            &self.production_net.varmap,
            &self.offer_net.varmap,
            &self.job_offer_net.varmap,
            &self.value_net.varmap,
            &self.firm_value_net.varmap,
        ] {
            perturb_varmap(varmap, pct)?;
        }
        Ok(())
    }

    fn modules(&self) -> Vec<(&'static str, &dyn Checkpoint)> {
        vec![
            ("offer_encoder", &self.offer_encoder),
            ("job_offer_encoder", &self.job_offer_encoder),
            ("purchase_net", &self.purchase_net),
            ("firm_purchase_net", &self.firm_purchase_net),
            ("labor_search_net", &self.labor_search_net),
            ("consumption_net", &self.consumption_net),
            ("production_net", &self.production_net),
            ("offer_net", &self.offer_net),
            ("job_offer_net", &self.job_offer_net),
            ("value_net", &self.value_net),
            ("firm_value_net", &self.firm_value_net),
        ]
    }
}

/// Mix standard-normal noise into every weight matrix of `varmap`,
/// preserving the layer's fan-in/fan-out variance.
///
/// With `var(aW + bN) = a^2 var(W) + b^2` and `a^2 = 1 - pct`, noise drawn
/// at `b = sqrt(xavier_var * pct)` keeps the perturbed weights at the
/// initialization scale. Bias vectors (rank 1) are left alone.
fn perturb_varmap(varmap: &VarMap, pct: f64) -> Result<()> {
    for var in varmap.all_vars() {
        let dims = var.dims().to_vec();
        if dims.len() != 2 {
            continue;
        }
        let (out_dim, in_dim) = (dims[0], dims[1]);
        let xavier_var = 2.0 / (in_dim + out_dim) as f64;
        let noise_std = (xavier_var * pct).sqrt() as f32;
        let noise = Tensor::randn(0f32, noise_std, (out_dim, in_dim), var.device())?;
        let scaled = (var.as_tensor() * (1.0 - pct).sqrt())?;
        var.set(&(scaled + noise)?)?;
    }
    Ok(())
}

trait Checkpoint {
    fn save(&self, path: &Path) -> Result<()>;
    fn load(&self, path: &Path) -> Result<()>;
}

macro_rules! impl_checkpoint {
    ($($ty:ty),*) => {
        $(impl Checkpoint for $ty {
            fn save(&self, path: &Path) -> Result<()> {
                <$ty>::save(self, path)
            }
            fn load(&self, path: &Path) -> Result<()> {
                <$ty>::load(self, path)
            }
        })*
    };
}

impl_checkpoint!(OfferEncoder, PurchaseNet, ConsumptionNet, OfferNet, JobOfferNet, ValueNet);
