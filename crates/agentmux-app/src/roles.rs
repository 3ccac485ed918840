//! Preset debate roles assigned to panes by grid position. Role prompts
//! are plain instructions; they deliberately omit the chain output marker
//! because a role assignment is not a chain injection.

/// Confirmation suffix asking the agent to acknowledge briefly.
const CONFIRMATION: &str =
    " [System instruction: confirm your role with a short acknowledgement only.]";

pub const ROLE_MODERATOR: &str = "You are the MODERATOR and dispatcher.\n\
Goal: [fill in the topic under discussion]\n\
Duties: do not argue a side; weigh the arguments from PROPONENT and OPPONENT.";

pub const ROLE_PROPONENT: &str = "You are the PROPONENT.\n\
Duties: argue firmly in favor of the topic with concrete evidence.";

pub const ROLE_OPPONENT: &str = "You are the OPPONENT.\n\
Duties: take a sceptical position; hunt for flaws and counterexamples.";

pub const ROLE_OBSERVER: &str = "You are an OBSERVER.\n\
Duties: record the key points; do not join the debate directly.";

/// Default role prompt for a pane at `index` in display order.
pub fn preset_for_index(index: usize) -> String {
    let base = match index {
        0 => ROLE_MODERATOR,
        1 => ROLE_PROPONENT,
        2 => ROLE_OPPONENT,
        _ => ROLE_OBSERVER,
    };
    format!("\n\n{base}{CONFIRMATION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_three_panes_get_distinct_roles() {
        assert!(preset_for_index(0).contains("MODERATOR"));
        assert!(preset_for_index(1).contains("PROPONENT"));
        assert!(preset_for_index(2).contains("OPPONENT"));
        assert!(preset_for_index(3).contains("OBSERVER"));
        assert!(preset_for_index(8).contains("OBSERVER"));
    }

    #[test]
    fn role_prompts_never_carry_the_output_marker() {
        for index in 0..9 {
            assert!(!preset_for_index(index).contains(":::VIBE_OUTPUT:::"));
        }
    }
}
