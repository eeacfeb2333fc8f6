//! Translation of the HAProxy `status` column into an up/down value.

/// Map a status token to `1.0` (operational) or `0.0` (anything else).
///
/// Total over all inputs: unknown tokens, including the empty string, are
/// treated as down.
pub fn parse_status_field(value: &str) -> f64 {
    match value {
        "UP" | "OPEN" | "no check" => 1.0,
        // Transitional states while health checks rise or fall, e.g. "UP 1/3".
        v if v.starts_with("UP ") => 1.0,
        // DOWN, NOLB, MAINT and their transitional forms.
        _ => 0.0,
    }
}
