use agentmux_core::ProjectId;

/// Expands a turn-sequence expression over the grid's display order into an
/// ordered list of session ids. Items are comma-separated zero-based
/// indices or inclusive `lo-hi` ranges. Empty input, and any expression
/// that expands to nothing, mean "every id in display order"; out-of-range
/// indices and reversed ranges are dropped silently.
pub fn parse_turn_sequence(input: &str, grid_ids: &[ProjectId]) -> Vec<ProjectId> {
    if input.trim().is_empty() {
        return grid_ids.to_vec();
    }

    let mut result = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) else {
                continue;
            };
            if lo > hi {
                continue;
            }
            for index in lo..=hi {
                if let Some(id) = grid_ids.get(index) {
                    result.push(id.clone());
                }
            }
        } else if let Ok(index) = part.parse::<usize>() {
            if let Some(id) = grid_ids.get(index) {
                result.push(id.clone());
            }
        }
    }

    if result.is_empty() {
        return grid_ids.to_vec();
    }
    result
}
