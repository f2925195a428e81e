//! Trace model: literals, holes, syscalls and whole execution traces
//!
//! All values are immutable once built. Preprocessing stages return new
//! values, scoring borrows them, and results hold them behind `Arc`.

mod literal;
mod strace;
mod syscall;

pub use literal::{Hole, Literal, Number, Value};
pub use strace::{meta, ExecutableParameter, Strace};
pub use syscall::{ArgumentPath, Syscall};
