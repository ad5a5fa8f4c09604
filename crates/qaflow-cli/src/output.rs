use serde::Serialize;

/// Emit `value` as pretty JSON when `--json` was passed, otherwise run the
/// human renderer.
pub fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

/// Render a metric value as a percentage with two decimals.
pub fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_formats() {
        assert_eq!(pct(0.85), "85.00%");
        assert_eq!(pct(1.0), "100.00%");
        assert_eq!(pct(0.0333), "3.33%");
    }
}
