//! Message/property priority and the `"name:high"` suffix convention.

use serde::{Deserialize, Serialize};

/// Delivery priority for a single queued outbound message.
///
/// Declared high-to-low so the derived `Ord` sorts `High < Medium < Low`,
/// matching the batcher's "no low precedes medium, no medium precedes
/// high" ordering requirement when messages are sorted ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Splits a property name on a trailing `:high`/`:med`/`:low` suffix.
///
/// Returns `(bare_name, Some(priority))` if a recognized suffix was
/// present, else `(name, None)` — the caller leaves stored priority
/// untouched when `None` is returned.
pub fn strip_priority_suffix(name: &str) -> (&str, Option<Priority>) {
    for (suffix, prio) in [
        (":high", Priority::High),
        (":med", Priority::Medium),
        (":low", Priority::Low),
    ] {
        if let Some(bare) = name.strip_suffix(suffix) {
            return (bare, Some(prio));
        }
    }
    (name, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_high_before_medium_before_low() {
        let mut v = vec![Priority::Low, Priority::High, Priority::Medium];
        v.sort();
        assert_eq!(v, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn strips_recognized_suffixes() {
        assert_eq!(strip_priority_suffix("foo:high"), ("foo", Some(Priority::High)));
        assert_eq!(strip_priority_suffix("foo:med"), ("foo", Some(Priority::Medium)));
        assert_eq!(strip_priority_suffix("foo:low"), ("foo", Some(Priority::Low)));
    }

    #[test]
    fn leaves_unsuffixed_names_alone() {
        assert_eq!(strip_priority_suffix("foo"), ("foo", None));
    }
}
