//! Source-level stepping over the bytecode control-flow graph.
//!
//! Every operation follows one template: compute destination nodes, install
//! transient breakpoints for them, resume the target, and wait for the
//! asynchronous hit. The hit handler retires the transient breakpoints
//! before the snapshot is rebuilt.

use log::{debug, info};

use crate::debugger::breakpoints::{BreakpointKind, BreakpointRegistry};
use crate::debugger::context::Context;
use crate::debugger::interrupts::InterruptTracker;
use crate::error::{DebuggerError, Result};
use crate::model::{single_node_from_address, SourceCfgNode, SourceModel};
use crate::vm::TargetVm;

/// The stepping granularities the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Into the next steppable unit, following calls.
    Into,
    /// Over the next steppable unit, calls taken as atomic.
    Over,
    /// Out of the current function, back to the caller.
    Out,
    /// Past one loop back-edge without leaving loop or function.
    Iteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnginePhase {
    Idle,
    AwaitingHit,
}

#[derive(Debug)]
pub struct SteppingEngine {
    phase: EnginePhase,
    /// Addresses the in-flight operation may legally land on.
    destinations: Vec<u32>,
    break_on_interrupts: bool,
}

impl Default for SteppingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SteppingEngine {
    pub fn new() -> SteppingEngine {
        SteppingEngine {
            phase: EnginePhase::Idle,
            destinations: Vec::new(),
            break_on_interrupts: false,
        }
    }

    pub fn is_awaiting_hit(&self) -> bool {
        self.phase == EnginePhase::AwaitingHit
    }

    pub fn break_on_interrupts_active(&self) -> bool {
        self.break_on_interrupts
    }

    /// Destination addresses computed for the operation in flight.
    pub fn predicted_destinations(&self) -> &[u32] {
        &self.destinations
    }

    /// Starts a stepping operation: computes destinations, installs the
    /// transient breakpoints and resumes the target. Stale transient
    /// breakpoints from a paused or preempted operation are retired first.
    pub fn begin_step(
        &mut self,
        kind: StepKind,
        context: &Context,
        model: &dyn SourceModel,
        tracker: &mut InterruptTracker,
        registry: &mut BreakpointRegistry,
        vm: &mut dyn TargetVm,
    ) -> Result<()> {
        registry.clear_transient(vm)?;
        self.phase = EnginePhase::Idle;
        self.destinations.clear();

        let finishing_callback = tracker.callback_in_progress();
        let targets = self.compute_destinations(kind, context, model, tracker, vm)?;

        if targets.is_empty() {
            if finishing_callback {
                // the callback burst already drained back to the resume
                // point; there is nothing left to run to
                debug!("callback destinations exhausted, staying put");
                return Ok(());
            }
            return Err(DebuggerError::NoSteppingTarget);
        }

        self.destinations = targets.iter().map(|(_, address)| *address).collect();
        install_transients(&targets, registry, vm)?;

        if !vm.run()? {
            registry.clear_transient(vm)?;
            self.destinations.clear();
            return Err(DebuggerError::Transport(
                "target refused to resume for stepping".to_string(),
            ));
        }
        self.phase = EnginePhase::AwaitingHit;
        info!(
            "{:?} step running towards {} destination(s)",
            kind,
            self.destinations.len()
        );
        Ok(())
    }

    fn compute_destinations(
        &mut self,
        kind: StepKind,
        context: &Context,
        model: &dyn SourceModel,
        tracker: &mut InterruptTracker,
        vm: &mut dyn TargetVm,
    ) -> Result<Vec<(SourceCfgNode, u32)>> {
        // an interrupted callback is always finished before the step
        // behaves normally again
        if tracker.callback_in_progress() {
            return tracker.end_current_callback(vm, model);
        }

        // a freshly signalled interrupt redirects a plain step into its
        // callback instead of the CFG successor
        if kind == StepKind::Into {
            if let Some(pin) = tracker.pop_pending() {
                let targets = tracker.resolve_callback_targets(pin, vm, model)?;
                let ids = tracker.callback_ids_for_pin(pin).to_vec();
                tracker.begin_callback(ids, context.pc());
                return Ok(targets);
            }
        }

        let node = single_node_from_address(model, context.pc())?
            .ok_or(DebuggerError::NoSteppingTarget)?;
        let targets = match kind {
            StepKind::Into => model.step_into_targets(&node),
            StepKind::Over => model.step_over_targets(&node),
            StepKind::Out => model.step_out_targets(&node),
            StepKind::Iteration => model.step_iteration_targets(&node),
        };
        Ok(targets)
    }

    /// Acknowledges the asynchronous hit that ends the in-flight
    /// operation: transient breakpoints are retired and the engine returns
    /// to idle. Safe to call for hits outside any operation.
    pub fn finish_hit(
        &mut self,
        registry: &mut BreakpointRegistry,
        vm: &mut dyn TargetVm,
    ) -> Result<()> {
        if self.phase == EnginePhase::AwaitingHit {
            registry.clear_transient(vm)?;
        }
        self.phase = EnginePhase::Idle;
        self.destinations.clear();
        Ok(())
    }

    /// Installs a breakpoint at every known callback entry and resumes the
    /// target, without awaiting a hit. A second call while active is a
    /// no-op.
    pub fn break_on_interrupts(
        &mut self,
        tracker: &mut InterruptTracker,
        registry: &mut BreakpointRegistry,
        vm: &mut dyn TargetVm,
        model: &dyn SourceModel,
    ) -> Result<()> {
        if self.break_on_interrupts {
            debug!("break-on-interrupts already active");
            return Ok(());
        }
        let entries = tracker.all_callback_entries(vm, model)?;
        for (node, address) in &entries {
            if registry.covers(*address) {
                continue;
            }
            let location = node.location().clone().with_address(*address);
            if !registry.install(vm, location.clone(), BreakpointKind::CallbackEntry)? {
                return Err(DebuggerError::BreakpointOperationFailed {
                    failures: vec![location],
                });
            }
        }
        if !vm.run()? {
            return Err(DebuggerError::Transport(
                "target refused to resume".to_string(),
            ));
        }
        self.break_on_interrupts = true;
        info!(
            "breaking on interrupts at {} callback entry point(s)",
            entries.len()
        );
        Ok(())
    }
}

/// Installs transient breakpoints for `targets`, skipping addresses an
/// existing breakpoint of any kind already covers: the hit will fire
/// through that breakpoint instead.
fn install_transients(
    targets: &[(SourceCfgNode, u32)],
    registry: &mut BreakpointRegistry,
    vm: &mut dyn TargetVm,
) -> Result<()> {
    for (node, address) in targets {
        if registry.covers(*address) {
            debug!("destination {:#x} already covered, not duplicating", address);
            continue;
        }
        let location = node.location().clone().with_address(*address);
        if !registry.install(vm, location.clone(), BreakpointKind::Transient)? {
            // withdraw what this operation managed to place
            registry.clear_transient(vm)?;
            return Err(DebuggerError::BreakpointOperationFailed {
                failures: vec![location],
            });
        }
    }
    Ok(())
}
