//! Priority-preemptive scheduler: run queues, context switching and
//! priority inheritance.

pub mod idle;
pub mod priority_inherit;
pub mod queue;
pub mod reaper;
pub mod scheduler;
pub mod tcb;
