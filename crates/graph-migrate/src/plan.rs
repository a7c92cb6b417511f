use std::fmt;
use std::sync::Arc;

use crate::mapping::CustomMapping;
use crate::version::ModelVersion;

/// Where a step's mapping comes from.
#[derive(Clone)]
pub enum StepMapping {
    /// Named mapping resource, or an inferred structural diff.
    Inferred,
    /// Procedure registered with the destination version.
    Custom(Arc<dyn CustomMapping>),
}

impl fmt::Debug for StepMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inferred => f.write_str("Inferred"),
            Self::Custom(mapping) => f.debug_tuple("Custom").field(&mapping.name()).finish(),
        }
    }
}

/// One hop between adjacent registered versions.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    /// Position in the plan, starting at 0.
    pub index: usize,
    pub source: ModelVersion,
    pub destination: ModelVersion,
    pub mapping: StepMapping,
}

impl MigrationStep {
    /// Whether a custom procedure drives this step.
    pub fn is_custom(&self) -> bool {
        matches!(self.mapping, StepMapping::Custom(_))
    }

    /// The custom procedure, if any.
    pub fn custom(&self) -> Option<&dyn CustomMapping> {
        match &self.mapping {
            StepMapping::Custom(mapping) => Some(mapping.as_ref()),
            StepMapping::Inferred => None,
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Ordered chain of steps from `source` to `destination`.
///
/// Every step starts where the previous one ended; the first starts at
/// `source` and the last ends at `destination`. An empty plan means the
/// store is already at `destination`.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub source: ModelVersion,
    pub destination: ModelVersion,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Plan with no steps.
    pub fn empty(version: ModelVersion) -> Self {
        Self {
            source: version.clone(),
            destination: version,
            steps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether the steps form a contiguous chain from source to destination.
    pub fn is_contiguous(&self) -> bool {
        let Some(first) = self.steps.first() else {
            return self.source == self.destination;
        };
        let chained = self
            .steps
            .windows(2)
            .all(|pair| pair[0].destination == pair[1].source);
        let ordered = self
            .steps
            .iter()
            .enumerate()
            .all(|(i, s)| s.index == i && s.source < s.destination);
        chained
            && ordered
            && first.source == self.source
            && self.steps.last().is_some_and(|s| s.destination == self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: usize, from: &str, to: &str) -> MigrationStep {
        MigrationStep {
            index,
            source: ModelVersion::parse(from).unwrap(),
            destination: ModelVersion::parse(to).unwrap(),
            mapping: StepMapping::Inferred,
        }
    }

    #[test]
    fn contiguity() {
        let v = |s: &str| ModelVersion::parse(s).unwrap();
        let plan = MigrationPlan {
            source: v("V1"),
            destination: v("V3"),
            steps: vec![step(0, "V1", "V2"), step(1, "V2", "V3")],
        };
        assert!(plan.is_contiguous());
        assert_eq!(plan.len(), 2);

        let gap = MigrationPlan {
            steps: vec![step(0, "V1", "V2"), step(1, "V2_5", "V3")],
            ..plan.clone()
        };
        assert!(!gap.is_contiguous());

        let short = MigrationPlan {
            steps: vec![step(0, "V1", "V2")],
            ..plan
        };
        assert!(!short.is_contiguous());

        assert!(MigrationPlan::empty(v("V2")).is_contiguous());
    }

    #[test]
    fn descending_steps_are_not_contiguous() {
        let v = |s: &str| ModelVersion::parse(s).unwrap();
        let single = MigrationPlan {
            source: v("V2"),
            destination: v("V1"),
            steps: vec![step(0, "V2", "V1")],
        };
        assert!(!single.is_contiguous());

        let last = MigrationPlan {
            source: v("V1"),
            destination: v("V2"),
            steps: vec![step(0, "V1", "V3"), step(1, "V3", "V2")],
        };
        assert!(!last.is_contiguous());
    }

    #[test]
    fn step_display() {
        assert_eq!(step(0, "V1_0_0", "V1_1_0").to_string(), "V1_0_0 -> V1_1_0");
    }
}
