//! Flat per-stage credit costs (§4.5, §8 scenario 1).

/// `viewsCost(model)`: the fan-out step's debit depends on which vision model
/// backs the pipeline's `settings.geminiModel`. Unlisted models fall back to
/// the base cost, matching scenario 1's `debits 3` with no model configured.
pub fn views_cost(gemini_model: &str) -> i64 {
    match gemini_model {
        "gemini-2.0-flash-exp" | "" => 3,
        "gemini-1.5-pro" => 4,
        other if other.contains("pro") => 4,
        _ => 3,
    }
}
