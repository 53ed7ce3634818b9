//! Sovereignty Validation
//!
//! Gates writes flagged as culturally sensitive. Validation runs before any
//! tier is touched and is fail-closed: a missing precondition blocks the
//! write with a non-retryable error naming what is missing.

use super::entry::SovereigntyContext;
use crate::error::{Error, Result};

/// Validates sovereignty preconditions for sensitive writes
#[derive(Debug, Default)]
pub struct SovereigntyValidator;

impl SovereigntyValidator {
    /// Create a validator
    pub fn new() -> Self {
        Self
    }

    /// Check every precondition, reporting the first one that fails.
    ///
    /// Requirements: a non-empty nation and territory, elder approval,
    /// community consent; data that may not leave its territory must declare
    /// a data location matching the territory.
    pub fn validate(&self, ctx: &SovereigntyContext) -> Result<()> {
        let nation = ctx.nation.as_deref().unwrap_or("");
        if nation.trim().is_empty() {
            return Err(violation("missing nation"));
        }

        let territory = ctx.territory.as_deref().unwrap_or("");
        if territory.trim().is_empty() {
            return Err(violation("missing territory"));
        }

        if !ctx.elder_approved {
            return Err(violation("missing elder approval"));
        }

        if !ctx.community_consent {
            return Err(violation("missing community consent"));
        }

        if !ctx.can_leave_territory {
            match ctx.data_location.as_deref() {
                None => {
                    return Err(violation(
                        "data cannot leave territory but no data location is declared",
                    ))
                }
                Some(location) if location != territory => {
                    return Err(violation(
                        "data cannot leave territory but data location is outside it",
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn violation(precondition: &str) -> Error {
    Error::SovereigntyViolation {
        precondition: precondition.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_context() -> SovereigntyContext {
        SovereigntyContext {
            nation: Some("Yolngu".to_string()),
            territory: Some("Arnhem Land".to_string()),
            data_location: Some("Arnhem Land".to_string()),
            elder_approved: true,
            community_consent: true,
            can_leave_territory: false,
        }
    }

    #[test]
    fn test_valid_context_passes() {
        let validator = SovereigntyValidator::new();
        assert!(validator.validate(&valid_context()).is_ok());
    }

    #[test]
    fn test_missing_nation_blocks() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.nation = None;

        let err = validator.validate(&ctx).unwrap_err();
        assert_matches!(
            err,
            Error::SovereigntyViolation { ref precondition } if precondition.contains("nation")
        );
    }

    #[test]
    fn test_blank_territory_blocks() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.territory = Some("   ".to_string());

        let err = validator.validate(&ctx).unwrap_err();
        assert_matches!(
            err,
            Error::SovereigntyViolation { ref precondition } if precondition.contains("territory")
        );
    }

    #[test]
    fn test_missing_elder_approval_blocks() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.elder_approved = false;

        let err = validator.validate(&ctx).unwrap_err();
        assert_matches!(
            err,
            Error::SovereigntyViolation { ref precondition }
                if precondition.contains("elder approval")
        );
    }

    #[test]
    fn test_missing_community_consent_blocks() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.community_consent = false;

        assert!(validator.validate(&ctx).is_err());
    }

    #[test]
    fn test_location_outside_territory_blocks() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.data_location = Some("somewhere else".to_string());

        assert!(validator.validate(&ctx).is_err());
    }

    #[test]
    fn test_location_unconstrained_when_data_may_leave() {
        let validator = SovereigntyValidator::new();
        let mut ctx = valid_context();
        ctx.can_leave_territory = true;
        ctx.data_location = None;

        assert!(validator.validate(&ctx).is_ok());
    }
}
