use std::sync::Arc;

use crate::model::ChatModel;

/// Converts token usage into quota units.
pub trait Pricing: Send + Sync {
    fn cost(&self, model: &ChatModel, input_tokens: i64, output_tokens: i64) -> i64;
}

impl<P> Pricing for Arc<P>
where
    P: Pricing + ?Sized,
{
    fn cost(&self, model: &ChatModel, input_tokens: i64, output_tokens: i64) -> i64 {
        (**self).cost(model, input_tokens, output_tokens)
    }
}

/// Prices from the model's per-1000-token rates, rounded up to a whole unit.
#[derive(Debug, Default, Copy, Clone)]
pub struct PerThousandTokenPricing;

impl Pricing for PerThousandTokenPricing {
    fn cost(&self, model: &ChatModel, input_tokens: i64, output_tokens: i64) -> i64 {
        let milli = i128::from(input_tokens.max(0)) * i128::from(model.input_price.max(0))
            + i128::from(output_tokens.max(0)) * i128::from(model.output_price.max(0));

        let units = (milli + 999) / 1000;
        i64::try_from(units).unwrap_or(i64::MAX)
    }
}
