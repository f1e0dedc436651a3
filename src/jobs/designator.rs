//! Job Designators
//!
//! Textual references to jobs: `%1` (by id), `%+` / `%%` (current),
//! `%-` (previous). Bare forms without `%` are accepted where the
//! context makes the meaning unambiguous (`fg 1`, `kill %+`).

/// Resolve a designator token against the current/previous job ids.
pub fn resolve_designator(
    token: &str,
    current: Option<u32>,
    previous: Option<u32>,
) -> Option<u32> {
    match token {
        "%+" | "+" | "%%" => current,
        "%-" | "-" => previous,
        _ => {
            let digits = token.strip_prefix('%').unwrap_or(token);
            digits.parse::<u32>().ok()
        }
    }
}
