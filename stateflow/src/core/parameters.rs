//! Parameter maps passed to plugins.

use std::collections::BTreeMap;

use serde_json::Value;

/// Named plugin parameters.
pub type Parameters = BTreeMap<String, Value>;

/// Declared parameters with `overriding` merged on top; the caller's values
/// win on key collisions.
pub fn merge_parameters(declared: &Parameters, overriding: &Parameters) -> Parameters {
    let mut merged = declared.clone();
    merged.extend(
        overriding
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overriding_values_win_on_collision() {
        let declared = Parameters::from([
            ("window".to_string(), json!(5)),
            ("label".to_string(), json!("declared")),
        ]);
        let overriding = Parameters::from([
            ("label".to_string(), json!("caller")),
            ("analysis_start_time".to_string(), json!("t0")),
        ]);

        let merged = merge_parameters(&declared, &overriding);
        assert_eq!(merged["window"], json!(5));
        assert_eq!(merged["label"], json!("caller"));
        assert_eq!(merged["analysis_start_time"], json!("t0"));
        assert_eq!(declared["label"], json!("declared"));
    }
}
