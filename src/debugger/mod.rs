mod backend;
mod breakpoints;
mod context;
mod interrupts;
mod stepping;
mod timeline;

pub use backend::{BackendEvent, RemoteDebuggerBackend, RunningState};
pub use breakpoints::{Breakpoint, BreakpointKind, BreakpointRegistry};
pub use context::{
    CallstackFrame, Context, EventItem, ExceptionInfo, GlobalValue, StackValue, Variable,
};
pub use interrupts::InterruptTracker;
pub use stepping::{StepKind, SteppingEngine};
pub use timeline::DebuggingTimeline;
