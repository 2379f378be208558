// ABOUTME: Hook timing/granularity descriptors used when registering tables
// ABOUTME: Mirrors trigger registration: BEFORE/AFTER and ROW/STATEMENT

use serde::Deserialize;
use std::fmt;

/// When a hook runs relative to the row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookTiming {
    Before,
    After,
}

/// Whether a hook runs once per affected row or once per statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookGranularity {
    Row,
    Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    pub timing: HookTiming,
    pub granularity: HookGranularity,
}

impl HookSpec {
    /// Change capture: observes the row after the write, once per row.
    pub const AFTER_ROW: HookSpec = HookSpec {
        timing: HookTiming::After,
        granularity: HookGranularity::Row,
    };

    /// Node tagging: rewrites the row before it is written, once per row.
    pub const BEFORE_ROW: HookSpec = HookSpec {
        timing: HookTiming::Before,
        granularity: HookGranularity::Row,
    };

    pub fn new(timing: HookTiming, granularity: HookGranularity) -> Self {
        Self {
            timing,
            granularity,
        }
    }
}

impl fmt::Display for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timing = match self.timing {
            HookTiming::Before => "BEFORE",
            HookTiming::After => "AFTER",
        };
        let granularity = match self.granularity {
            HookGranularity::Row => "ROW",
            HookGranularity::Statement => "STATEMENT",
        };
        write!(f, "{} {}", timing, granularity)
    }
}
