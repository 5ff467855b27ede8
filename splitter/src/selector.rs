use crate::config::{Config, Variant};
use crate::errors::SelectionError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the variant for each request according to the configured weights.
///
/// The random source is owned by the selector so tests can seed it.
pub struct VariantSelector {
    rng: Mutex<StdRng>,
}

impl VariantSelector {
    pub fn from_entropy() -> Self {
        VariantSelector {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        VariantSelector {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Weighted coin flip between the two variants.
    ///
    /// Draws `r` uniformly from `[0, 100)` and routes to variant A when
    /// `r <= weight_a` once the weights are normalized to sum to 100.
    pub fn select(&self, config: &Config) -> Result<Variant, SelectionError> {
        let (weight_a, _) = normalized_weights(config.variant_a.weight, config.variant_b.weight)?;
        let draw: f64 = self.rng.lock().gen_range(0.0..100.0);

        if draw <= weight_a {
            Ok(Variant::VariantA)
        } else {
            Ok(Variant::VariantB)
        }
    }
}

/// Rescales the two weights so they sum to 100.
///
/// Fails when the total is not a positive finite number, since there is
/// nothing meaningful to divide by.
pub fn normalized_weights(weight_a: f64, weight_b: f64) -> Result<(f64, f64), SelectionError> {
    let total = weight_a + weight_b;
    if !total.is_finite() || total <= 0.0 {
        return Err(SelectionError::NoRoutableWeight { weight_a, weight_b });
    }

    if total == 100.0 {
        return Ok((weight_a, weight_b));
    }

    Ok((weight_a / total * 100.0, weight_b / total * 100.0))
}
