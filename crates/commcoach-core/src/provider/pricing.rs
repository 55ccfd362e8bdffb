//! Model pricing table for the metered tier.

/// Pricing information for a single model, USD per 1M tokens.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelPricing {
    pub model: &'static str,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

/// Static pricing table for OpenRouter model slugs.
pub const PRICING_TABLE: &[ModelPricing] = &[
    ModelPricing { model: "meta-llama/llama-3.1-8b-instruct",  input_per_1m: 0.02, output_per_1m: 0.05 },
    ModelPricing { model: "meta-llama/llama-3.3-70b-instruct", input_per_1m: 0.13, output_per_1m: 0.40 },
    ModelPricing { model: "mistralai/mistral-7b-instruct",     input_per_1m: 0.03, output_per_1m: 0.05 },
    ModelPricing { model: "google/gemini-2.0-flash-001",       input_per_1m: 0.10, output_per_1m: 0.40 },
    ModelPricing { model: "openai/gpt-4o-mini",                input_per_1m: 0.15, output_per_1m: 0.60 },
    ModelPricing { model: "openai/gpt-4o",                     input_per_1m: 2.50, output_per_1m: 10.00 },
    ModelPricing { model: "anthropic/claude-3.5-haiku",        input_per_1m: 0.80, output_per_1m: 4.00 },
    ModelPricing { model: "anthropic/claude-3.5-sonnet",       input_per_1m: 3.00, output_per_1m: 15.00 },
    ModelPricing { model: "deepseek/deepseek-chat",            input_per_1m: 0.28, output_per_1m: 0.42 },
];

/// Row used when a model is not in the table.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing {
    model: "default",
    input_per_1m: 0.50,
    output_per_1m: 1.50,
};

/// Row for OpenRouter's `:free` model variants.
pub const FREE_PRICING: ModelPricing = ModelPricing {
    model: "free",
    input_per_1m: 0.0,
    output_per_1m: 0.0,
};

/// Look up pricing for a model. `:free` variants cost nothing; otherwise
/// exact slug first, then a prefix match so dated variants
/// (`openai/gpt-4o-2024-08-06`) resolve to their family.
pub fn lookup_model(model: &str) -> Option<&'static ModelPricing> {
    let lower = model.to_lowercase();
    if lower.ends_with(":free") {
        return Some(&FREE_PRICING);
    }
    PRICING_TABLE
        .iter()
        .find(|p| p.model == lower)
        .or_else(|| {
            PRICING_TABLE
                .iter()
                .filter(|p| lower.starts_with(p.model))
                .max_by_key(|p| p.model.len())
        })
}

/// Calculate cost in USD for a given number of input/output tokens.
pub fn calculate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let pricing = lookup_model(model).unwrap_or(&DEFAULT_PRICING);
    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_1m;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output_per_1m;
    input_cost + output_cost
}
