//! Parser for `"Phase N: Name"` plan lines.

use thiserror::Error;

/// Parsed phase label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseLabel {
    /// 1-based phase number.
    pub number: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseLabelError {
    #[error("phase line is empty")]
    Empty,
    #[error("phase line '{0}' has no name after the colon")]
    EmptyName(String),
}

/// Parse a plan line into `{number, name}`.
///
/// `position` is the zero-based index of the line in the plan; it supplies the
/// number whenever the prefix before the colon carries no usable integer, and
/// when there is no colon at all (the whole line is then the name).
pub fn parse_phase_label(line: &str, position: usize) -> Result<PhaseLabel, PhaseLabelError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(PhaseLabelError::Empty);
    }

    let Some((prefix, rest)) = trimmed.split_once(':') else {
        return Ok(PhaseLabel {
            number: position + 1,
            name: trimmed.to_string(),
        });
    };

    let name = rest.trim();
    if name.is_empty() {
        return Err(PhaseLabelError::EmptyName(trimmed.to_string()));
    }

    let number = prefix
        .split_whitespace()
        .last()
        .and_then(|token| token.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(position + 1);

    Ok(PhaseLabel {
        number,
        name: name.to_string(),
    })
}

/// True for planner output lines that describe a phase.
pub fn is_phase_line(line: &str) -> bool {
    line.trim().starts_with("Phase")
}

/// Commit message the operator is asked to use for a phase.
pub fn expected_commit_message(label: &PhaseLabel) -> String {
    format!(
        "phase-{}: {} complete",
        label.number,
        label.name.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_label() {
        let label = parse_phase_label("Phase 2: Build API", 0).expect("parse");
        assert_eq!(
            label,
            PhaseLabel {
                number: 2,
                name: "Build API".to_string()
            }
        );
    }

    #[test]
    fn missing_colon_uses_whole_line_and_position() {
        let label = parse_phase_label("  Build the frontend ", 3).expect("parse");
        assert_eq!(label.number, 4);
        assert_eq!(label.name, "Build the frontend");
    }

    #[test]
    fn non_numeric_prefix_falls_back_to_position() {
        let label = parse_phase_label("Stage A: Deploy", 1).expect("parse");
        assert_eq!(label.number, 2);
        assert_eq!(label.name, "Deploy");
    }

    #[test]
    fn zero_is_not_a_phase_number() {
        let label = parse_phase_label("Phase 0: Bootstrap", 0).expect("parse");
        assert_eq!(label.number, 1);
    }

    #[test]
    fn only_first_colon_splits() {
        let label = parse_phase_label("Phase 1: API: v2", 0).expect("parse");
        assert_eq!(label.name, "API: v2");
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = parse_phase_label("Phase 3:   ", 2).unwrap_err();
        assert_eq!(err, PhaseLabelError::EmptyName("Phase 3:".to_string()));
    }

    #[test]
    fn blank_line_is_rejected() {
        assert_eq!(parse_phase_label("   ", 0), Err(PhaseLabelError::Empty));
    }

    #[test]
    fn phase_line_filter_matches_original_planner_output() {
        assert!(is_phase_line("  Phase 1: Setup"));
        assert!(!is_phase_line("Here is your plan:"));
        assert!(!is_phase_line("phase 1: lowercase"));
    }

    #[test]
    fn expected_commit_lowercases_name() {
        let label = PhaseLabel {
            number: 2,
            name: "Build API".to_string(),
        };
        assert_eq!(expected_commit_message(&label), "phase-2: build api complete");
    }
}
