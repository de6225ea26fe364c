//! Per-variable choice of regridding method and pre-regrid adjustments.

use std::collections::HashMap;

use crate::canonical::CanonicalField;
use crate::error::Result;
use crate::types::RegridMethod;

/// Codes of extensive quantities (fluxes), which are area-averaged.
pub const CONSERVATIVE_CODES: &[&str] = &["rlds", "rsds"];

/// Decides how each variable is regridded.
///
/// Implement this to onboard a data product whose fields need special
/// treatment: `adjust` runs on a copy of the canonical field right before
/// the numerical regrid, and does nothing by default.
pub trait RegridPolicy: Send + Sync {
    /// Method for a variable. `code` is the variable name stored in the
    /// canonical file, which carries the level suffix for pressure-level
    /// variables (e.g. `ta500`).
    fn method(&self, code: &str) -> RegridMethod;

    fn adjust(&self, _field: &mut CanonicalField) -> Result<()> {
        Ok(())
    }
}

/// Strip a pressure-level suffix: `ta500` -> `ta`.
pub fn base_code(code: &str) -> &str {
    code.trim_end_matches(|c: char| c.is_ascii_digit())
}

/// Conservative for fluxes, bilinear for everything else, with optional
/// per-code overrides.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    overrides: HashMap<String, RegridMethod>,
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, code: impl Into<String>, method: RegridMethod) -> Self {
        self.overrides.insert(code.into(), method);
        self
    }

    /// Method before any override is applied.
    pub fn default_method(code: &str) -> RegridMethod {
        if CONSERVATIVE_CODES.contains(&base_code(code)) {
            RegridMethod::Conservative
        } else {
            RegridMethod::Bilinear
        }
    }
}

impl RegridPolicy for DefaultPolicy {
    fn method(&self, code: &str) -> RegridMethod {
        self.overrides
            .get(code)
            .or_else(|| self.overrides.get(base_code(code)))
            .copied()
            .unwrap_or_else(|| Self::default_method(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_code() {
        assert_eq!(base_code("ta500"), "ta");
        assert_eq!(base_code("tas"), "tas");
    }

    #[test]
    fn test_default_methods() {
        let policy = DefaultPolicy::new();
        assert_eq!(policy.method("rsds"), RegridMethod::Conservative);
        assert_eq!(policy.method("tas"), RegridMethod::Bilinear);
        assert_eq!(policy.method("ta850"), RegridMethod::Bilinear);
    }

    #[test]
    fn test_overrides() {
        let policy = DefaultPolicy::new()
            .with_override("ta", RegridMethod::Nearest)
            .with_override("ta500", RegridMethod::Conservative);
        assert_eq!(policy.method("ta850"), RegridMethod::Nearest);
        assert_eq!(policy.method("ta500"), RegridMethod::Conservative);
        assert_eq!(policy.method("rlds"), RegridMethod::Conservative);
    }
}
