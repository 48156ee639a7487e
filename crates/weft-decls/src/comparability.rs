//! Comparability group lookup
//!
//! Comparability partitions variables into equivalence classes that may
//! be meaningfully compared. The partition is computed by an external
//! static analysis and consumed here read-only, either from a serialized
//! summary blob or as a fixed sentinel when no analysis ran.

use crate::error::DeclResult;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Group id assigned when no comparability analysis is available
pub const FIXED_GROUP: i32 = 22;

/// Source of comparability group ids for declared variables
pub trait ComparabilityProvider {
    /// Group id for a variable at a program point
    fn compare_group(&self, ppt: &str, var: &str) -> i32;

    /// Group id for a sequence variable's elements
    fn element_group(&self, ppt: &str, var: &str) -> i32;

    /// Whether group ids carry real analysis results. Controls the
    /// `var-comparability` header token (`implicit` vs `none`).
    fn is_implicit(&self) -> bool {
        false
    }
}

/// Sentinel provider used when comparability analysis is disabled
#[derive(Debug, Default)]
pub struct FixedComparability;

impl ComparabilityProvider for FixedComparability {
    fn compare_group(&self, _ppt: &str, _var: &str) -> i32 {
        FIXED_GROUP
    }

    fn element_group(&self, _ppt: &str, _var: &str) -> i32 {
        FIXED_GROUP
    }
}

/// Per-ppt group assignments inside a serialized summary
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PptGroups {
    /// Variable name to group id
    pub vars: FxHashMap<String, i32>,
    /// Sequence variable name to element group id
    pub elements: FxHashMap<String, i32>,
}

/// Serialized output of the external comparability analysis
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ComparabilitySummary {
    /// Program-point name to its group assignments
    pub ppts: FxHashMap<String, PptGroups>,
}

/// Provider backed by a [`ComparabilitySummary`] blob.
///
/// Variables the analysis did not see fall back to the fixed sentinel.
#[derive(Debug)]
pub struct SummaryComparability {
    summary: ComparabilitySummary,
}

impl SummaryComparability {
    /// Wrap an in-memory summary
    pub fn new(summary: ComparabilitySummary) -> Self {
        Self { summary }
    }

    /// Decode a summary blob
    pub fn from_bytes(bytes: &[u8]) -> DeclResult<Self> {
        Ok(Self::new(bincode::deserialize(bytes)?))
    }
}

impl ComparabilityProvider for SummaryComparability {
    fn compare_group(&self, ppt: &str, var: &str) -> i32 {
        self.summary
            .ppts
            .get(ppt)
            .and_then(|groups| groups.vars.get(var).copied())
            .unwrap_or(FIXED_GROUP)
    }

    fn element_group(&self, ppt: &str, var: &str) -> i32 {
        self.summary
            .ppts
            .get(ppt)
            .and_then(|groups| groups.elements.get(var).copied())
            .unwrap_or(FIXED_GROUP)
    }

    fn is_implicit(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_provider() {
        let provider = FixedComparability;
        assert_eq!(provider.compare_group("P:::ENTER", "this.x"), FIXED_GROUP);
        assert_eq!(provider.element_group("P:::ENTER", "this.items[..]"), FIXED_GROUP);
        assert!(!provider.is_implicit());
    }

    #[test]
    fn test_summary_round_trip_and_fallback() {
        let mut summary = ComparabilitySummary::default();
        let mut groups = PptGroups::default();
        groups.vars.insert("this.x".to_string(), 3);
        groups.elements.insert("this.items[..]".to_string(), 7);
        summary.ppts.insert("P:::ENTER".to_string(), groups);

        let bytes = bincode::serialize(&summary).unwrap();
        let provider = SummaryComparability::from_bytes(&bytes).unwrap();
        assert!(provider.is_implicit());
        assert_eq!(provider.compare_group("P:::ENTER", "this.x"), 3);
        assert_eq!(provider.element_group("P:::ENTER", "this.items[..]"), 7);
        // Unknown variables fall back to the sentinel
        assert_eq!(provider.compare_group("P:::ENTER", "this.y"), FIXED_GROUP);
        assert_eq!(provider.compare_group("Q:::ENTER", "this.x"), FIXED_GROUP);
    }

    #[test]
    fn test_bad_blob_rejected() {
        assert!(SummaryComparability::from_bytes(&[0xFF; 3]).is_err());
    }
}
