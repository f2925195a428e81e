// Trace preprocessing pipeline
//
// Converts traces from "as collected" form (environment-specific paths,
// OS-assigned descriptor numbers, run-specific literals) into a form where
// structural comparison is meaningful.
//
// Every stage is a pure `Strace -> Strace` transform returning a new value.
// A stage that cannot interpret an argument passes it through unchanged:
// preprocessing may lose precision but never aborts a comparison.
//
// Conventional order:
//   CanonicalForm -> ReplaceFileDescriptors -> SelectSyscalls   (per trace)
//   PunchHoles                                                 (per pair)

mod canonical;
mod descriptors;
mod holes;
mod select;

pub use canonical::CanonicalForm;
pub use descriptors::ReplaceFileDescriptors;
pub use holes::{HoleSet, Pin, PunchHoles, VolatilityRules};
pub use select::SelectSyscalls;

use crate::filter::SyscallFilter;
use crate::trace::Strace;

/// One preprocessing stage
pub trait Preprocessor: Send + Sync {
    /// Stage name for logs and reports
    fn name(&self) -> &'static str;

    /// Transform a trace into a new trace
    fn apply(&self, trace: &Strace) -> Strace;
}

/// Ordered composition of stages
pub struct Pipeline {
    stages: Vec<Box<dyn Preprocessor>>,
}

impl Pipeline {
    /// Pipeline with no stages (identity)
    pub fn empty() -> Self {
        Pipeline { stages: Vec::new() }
    }

    /// CanonicalForm, ReplaceFileDescriptors, then SelectSyscalls with `filter`
    pub fn standard(filter: SyscallFilter) -> Self {
        Pipeline::empty()
            .with_stage(CanonicalForm::new())
            .with_stage(ReplaceFileDescriptors::new())
            .with_stage(SelectSyscalls::new(filter))
    }

    pub fn with_stage<P: Preprocessor + 'static>(mut self, stage: P) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::standard(SyscallFilter::all())
    }
}

impl Preprocessor for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn apply(&self, trace: &Strace) -> Strace {
        let mut current = trace.clone();
        for stage in &self.stages {
            current = stage.apply(&current);
            tracing::trace!(stage = stage.name(), lines = current.len(), "Applied preprocessing stage");
        }
        current
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
