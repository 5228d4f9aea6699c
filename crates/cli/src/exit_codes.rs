//! CLI Exit Code Registry
//!
//! Single source of truth for `tgraph` exit codes. Scripts rely on them.
//!
//! | Range | Domain    | Description                                  |
//! |-------|-----------|----------------------------------------------|
//! | 0     | Universal | Success                                      |
//! | 1     | Universal | General error (unspecified)                  |
//! | 2     | Universal | Usage error (bad args, bad period)           |
//! | 3-9   | input     | Config and data loading                      |
//! | 10-19 | analysis  | Results that a pipeline should stop on       |

use taxgraph_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

pub const EXIT_SUCCESS: u8 = 0;

/// General error. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Input (3-9)
// =============================================================================

/// Config failed to parse or validate.
pub const EXIT_CONFIG_INVALID: u8 = 3;

/// A data file could not be read or has a bad header.
pub const EXIT_DATA: u8 = 4;

/// Requested entity is not in the entity snapshot.
pub const EXIT_UNKNOWN_ENTITY: u8 = 5;

// =============================================================================
// Analysis (10-19)
// =============================================================================

/// A finding at or above `--fail-on` severity was produced.
pub const EXIT_FINDINGS: u8 = 10;

/// Cycle detection or propagation did not complete (`--strict` only).
pub const EXIT_STEP_INCOMPLETE: u8 = 11;

pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG_INVALID,
        ReconError::Io(_) | ReconError::DataIncomplete { .. } => EXIT_DATA,
        ReconError::UnknownEntity(_) => EXIT_UNKNOWN_ENTITY,
        ReconError::InvalidPeriod(_) => EXIT_USAGE,
        ReconError::GraphTooLarge { .. } | ReconError::ConvergenceNotReached { .. } => {
            EXIT_STEP_INCOMPLETE
        }
        ReconError::Store(_) => EXIT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CONFIG_INVALID,
            EXIT_DATA,
            EXIT_UNKNOWN_ENTITY,
            EXIT_FINDINGS,
            EXIT_STEP_INCOMPLETE,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_registry() {
        assert_eq!(
            recon_exit_code(&ReconError::ConfigValidation("x".into())),
            EXIT_CONFIG_INVALID
        );
        assert_eq!(recon_exit_code(&ReconError::UnknownEntity("x".into())), EXIT_UNKNOWN_ENTITY);
        assert_eq!(recon_exit_code(&ReconError::InvalidPeriod("13".into())), EXIT_USAGE);
        assert_eq!(recon_exit_code(&ReconError::Io("gone".into())), EXIT_DATA);
    }
}
