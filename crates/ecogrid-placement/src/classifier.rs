//! SLA tier → priority mapping.

use ecogrid_core::{Priority, SlaTier};

/// Map an SLA tier to a scheduling priority.
///
/// Unknown tiers get `Mid`: a task is never refused over its tier alone.
pub fn classify(tier: SlaTier) -> Priority {
    match tier {
        SlaTier::Sla0 | SlaTier::Sla1 => Priority::High,
        SlaTier::Sla2 => Priority::Mid,
        SlaTier::Sla3 => Priority::Low,
        SlaTier::Unrecognized => Priority::Mid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_tiers_are_high() {
        assert_eq!(classify(SlaTier::Sla0), Priority::High);
        assert_eq!(classify(SlaTier::Sla1), Priority::High);
    }

    #[test]
    fn relaxed_tiers_step_down() {
        assert_eq!(classify(SlaTier::Sla2), Priority::Mid);
        assert_eq!(classify(SlaTier::Sla3), Priority::Low);
    }

    #[test]
    fn unrecognized_defaults_to_mid() {
        assert_eq!(classify(SlaTier::Unrecognized), Priority::Mid);
        assert_eq!(classify(SlaTier::from_code(42)), Priority::Mid);
    }

    #[test]
    fn classification_is_stable() {
        for code in 0..=5 {
            let tier = SlaTier::from_code(code);
            assert_eq!(classify(tier), classify(tier));
        }
    }
}
