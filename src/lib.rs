//! Debugging-protocol engine for remote WebAssembly targets.
//!
//! Translates source-level debugging intents (step, step-over, step-out,
//! step-iteration, breakpoints, run, pause) into breakpoint placements and
//! run/resume commands over a serial request/response channel, and rebuilds
//! a navigable snapshot of the remote machine's state from the responses.
//! External interrupts that preempt execution into callback functions are
//! correlated with the stepping operation they interrupted, so stepping
//! resumes where it left off once the callbacks return.
//!
//! The transport and the source map/CFG are collaborators behind the
//! [`vm::TargetVm`] and [`model::SourceModel`] traits; the IDE-facing
//! adapter sits on top of [`debugger::RemoteDebuggerBackend`].

pub mod config;
pub mod debugger;
pub mod error;
pub mod model;
pub mod vm;
pub mod wire;

pub use config::{Connection, DebuggerConfig, DebuggingMode, OnStartConfig};
pub use debugger::{
    BackendEvent, Context, RemoteDebuggerBackend, RunningState, StepKind,
};
pub use error::{DebuggerError, Result};
pub use model::{SourceCfgNode, SourceCodeLocation, SourceModel};
pub use vm::{TargetVm, VmNotification};
pub use wire::{StateRequest, WireState};
