// SelectSyscalls: keep only syscalls in the selected categories

use super::Preprocessor;
use crate::filter::SyscallFilter;
use crate::trace::Strace;

/// Filters the syscall sequence through a [`SyscallFilter`]
#[derive(Debug, Clone)]
pub struct SelectSyscalls {
    filter: SyscallFilter,
}

impl SelectSyscalls {
    pub fn new(filter: SyscallFilter) -> Self {
        SelectSyscalls { filter }
    }

    pub fn filter(&self) -> &SyscallFilter {
        &self.filter
    }
}

impl Preprocessor for SelectSyscalls {
    fn name(&self) -> &'static str {
        "select_syscalls"
    }

    fn apply(&self, trace: &Strace) -> Strace {
        if self.filter.is_all() {
            return trace.clone();
        }
        let kept = trace
            .iter()
            .filter(|call| self.filter.should_trace(&call.name))
            .cloned()
            .collect();
        trace.with_lines(kept)
    }
}
