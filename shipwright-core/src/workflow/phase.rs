//! Pipeline phases and the flags that skip them

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One stage of the delivery pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Build,
    Test,
    Review,
    Document,
    Ship,
}

impl Phase {
    /// All phases in pipeline order
    pub const ALL: [Phase; 6] = [
        Phase::Plan,
        Phase::Build,
        Phase::Test,
        Phase::Review,
        Phase::Document,
        Phase::Ship,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::Test => "test",
            Phase::Review => "review",
            Phase::Document => "document",
            Phase::Ship => "ship",
        }
    }

    /// Phase that follows this one, `None` after ship
    pub fn next(&self) -> Option<Phase> {
        let idx = self.index();
        Phase::ALL.get(idx + 1).copied()
    }

    /// Position in the pipeline, starting at 0
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .find(|p| p.name() == s.trim().to_lowercase())
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown phase '{}', expected one of plan, build, test, review, document, ship",
                    s
                )
            })
    }
}

/// Operator flags consulted once per phase boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseOptions {
    /// Phases recorded as skipped instead of run
    pub skip_phases: BTreeSet<Phase>,

    /// Tell the test phase to leave out end-to-end tests
    pub skip_e2e: bool,

    /// Report review findings without attempting fixes
    pub skip_resolution: bool,
}

impl PhaseOptions {
    pub fn skip(mut self, phase: Phase) -> Self {
        self.skip_phases.insert(phase);
        self
    }

    pub fn should_skip(&self, phase: Phase) -> bool {
        self.skip_phases.contains(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert_eq!(Phase::Plan.next(), Some(Phase::Build));
        assert_eq!(Phase::Document.next(), Some(Phase::Ship));
        assert_eq!(Phase::Ship.next(), None);
        assert!(Phase::Test < Phase::Review);
        assert_eq!(Phase::Review.index(), 3);
    }

    #[test]
    fn test_parse() {
        assert_eq!("build".parse::<Phase>().unwrap(), Phase::Build);
        assert_eq!(" Ship ".parse::<Phase>().unwrap(), Phase::Ship);
        assert!("deploy".parse::<Phase>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Phase::Document).unwrap(), "\"document\"");
    }

    #[test]
    fn test_options() {
        let options = PhaseOptions::default().skip(Phase::Document);
        assert!(options.should_skip(Phase::Document));
        assert!(!options.should_skip(Phase::Ship));

        let json = serde_json::to_string(&options).unwrap();
        let back: PhaseOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
