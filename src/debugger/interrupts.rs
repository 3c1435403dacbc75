//! Correlation of device interrupts with the callback functions they
//! preempt execution into.
//!
//! The stepping engine models a single instruction pointer, but an external
//! interrupt can re-enter the module through a callback at any moment,
//! nested arbitrarily. This tracker remembers which callbacks are running,
//! where the preempted operation must resume, and how to find that resume
//! point again from an arbitrary call stack.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::debugger::context::Context;
use crate::error::{DebuggerError, Result};
use crate::model::{single_node_from_address, SourceCfgNode, SourceModel};
use crate::vm::TargetVm;
use crate::wire::StateRequest;

#[derive(Debug, Default)]
pub struct InterruptTracker {
    /// Device-reported pins waiting to be routed to their callbacks.
    pending: VecDeque<u32>,
    /// Pin id to callback function ids, filled lazily from the target.
    pin_mapping: HashMap<u32, Vec<u32>>,
    mapping_loaded: bool,
    callbacks_in_progress: Vec<u32>,
    /// Where the preempted operation resumes once the callback burst
    /// drains. Set exactly once per burst.
    return_address: Option<u32>,
}

impl InterruptTracker {
    pub fn new() -> InterruptTracker {
        InterruptTracker::default()
    }

    /// Queues a device interrupt. Breakpoint placement is driven by the
    /// next stepping evaluation, never from here.
    pub fn on_interrupt_signal(&mut self, pin: u32) {
        debug!("interrupt signalled on pin {}", pin);
        self.pending.push_back(pin);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pop_pending(&mut self) -> Option<u32> {
        self.pending.pop_front()
    }

    pub fn callback_in_progress(&self) -> bool {
        !self.callbacks_in_progress.is_empty()
    }

    pub fn callbacks_in_progress(&self) -> &[u32] {
        &self.callbacks_in_progress
    }

    pub fn return_address(&self) -> Option<u32> {
        self.return_address
    }

    /// Fetches the pin-to-callback mapping and the indirect-call table in
    /// one inspection round-trip, once.
    fn ensure_mapping(&mut self, vm: &mut dyn TargetVm) -> Result<()> {
        if self.mapping_loaded {
            return Ok(());
        }
        let state = vm.send_request(&StateRequest::callback_tables())?;
        let table = state.table.unwrap_or_default();
        for mapping in state.callbacks.unwrap_or_default() {
            let mut fidxs = Vec::with_capacity(mapping.targets.len());
            for target in &mapping.targets {
                let fidx = table.get(*target as usize).copied().ok_or_else(|| {
                    DebuggerError::ModelInconsistency(format!(
                        "callback for pin {} points at table slot {} outside the table",
                        mapping.pin, target
                    ))
                })?;
                fidxs.push(fidx);
            }
            self.pin_mapping.insert(mapping.pin, fidxs);
        }
        self.mapping_loaded = true;
        debug!("loaded callback mapping for {} pin(s)", self.pin_mapping.len());
        Ok(())
    }

    pub fn callback_ids_for_pin(&self, pin: u32) -> &[u32] {
        self.pin_mapping.get(&pin).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Callback ids whose function entry sits at `address`. Used to decide
    /// whether a hit entered a callback.
    pub fn callback_ids_at_entry(&self, address: u32, model: &dyn SourceModel) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .pin_mapping
            .values()
            .flatten()
            .copied()
            .filter(|&fidx| {
                model
                    .function(fidx)
                    .is_some_and(|f| f.entry_address == address)
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Entry nodes of the callbacks a pin routes to. A pin without any
    /// resolvable callback cannot be stepped into and is fatal.
    pub fn resolve_callback_targets(
        &mut self,
        pin: u32,
        vm: &mut dyn TargetVm,
        model: &dyn SourceModel,
    ) -> Result<Vec<(SourceCfgNode, u32)>> {
        self.ensure_mapping(vm)?;
        let fidxs = self
            .pin_mapping
            .get(&pin)
            .filter(|ids| !ids.is_empty())
            .cloned()
            .ok_or(DebuggerError::UnknownCallbackTarget { pin })?;

        let mut targets = Vec::with_capacity(fidxs.len());
        for fidx in fidxs {
            let function = model.function(fidx).ok_or_else(|| {
                DebuggerError::ModelInconsistency(format!(
                    "callback function {} is not present in the source map",
                    fidx
                ))
            })?;
            let node = single_node_from_address(model, function.entry_address)?
                .ok_or(DebuggerError::UnknownCallbackTarget { pin })?;
            targets.push((node, function.entry_address));
        }
        Ok(targets)
    }

    /// Entry nodes of every known callback, for breaking on all interrupts.
    pub fn all_callback_entries(
        &mut self,
        vm: &mut dyn TargetVm,
        model: &dyn SourceModel,
    ) -> Result<Vec<(SourceCfgNode, u32)>> {
        self.ensure_mapping(vm)?;
        let mut fidxs: Vec<u32> = self.pin_mapping.values().flatten().copied().collect();
        fidxs.sort_unstable();
        fidxs.dedup();

        let mut entries = Vec::with_capacity(fidxs.len());
        for fidx in fidxs {
            let function = model.function(fidx).ok_or_else(|| {
                DebuggerError::ModelInconsistency(format!(
                    "callback function {} is not present in the source map",
                    fidx
                ))
            })?;
            if let Some(node) = single_node_from_address(model, function.entry_address)? {
                entries.push((node, function.entry_address));
            }
        }
        Ok(entries)
    }

    /// Marks `ids` as executing. The resume address is latched only for
    /// the first callback of a burst; nested callbacks return through it.
    pub fn begin_callback(&mut self, ids: Vec<u32>, current_address: u32) {
        debug!(
            "callback(s) {:?} entered, resume address {:#x}",
            ids, current_address
        );
        self.callbacks_in_progress = ids;
        if self.return_address.is_none() {
            self.return_address = Some(current_address);
        }
    }

    /// Ends the executing callback. A queued interrupt keeps the burst
    /// alive and yields the next callback's entry nodes; otherwise the
    /// preempted operation resumes with the step-over successors of the
    /// node enclosing the latched resume address.
    pub fn end_current_callback(
        &mut self,
        vm: &mut dyn TargetVm,
        model: &dyn SourceModel,
    ) -> Result<Vec<(SourceCfgNode, u32)>> {
        self.callbacks_in_progress.clear();

        if let Some(pin) = self.pending.pop_front() {
            debug!("nested interrupt on pin {} continues the burst", pin);
            return self.resolve_callback_targets(pin, vm, model);
        }

        let Some(resume) = self.return_address.take() else {
            // burst already drained back to the resume point
            return Ok(Vec::new());
        };
        let node = single_node_from_address(model, resume)?.ok_or_else(|| {
            DebuggerError::ModelInconsistency(format!(
                "resume address {:#x} maps to no source node",
                resume
            ))
        })?;
        debug!("callback burst over, resuming around {:#x}", resume);
        Ok(model.step_over_targets(&node))
    }

    /// Finds the completion point of a callback that interrupted an
    /// arbitrary call stack: the first frame, innermost to outermost,
    /// whose return address has a direct source mapping, or failing that a
    /// reachable source node.
    pub fn return_path_target(
        &self,
        context: &Context,
        model: &dyn SourceModel,
    ) -> Result<(SourceCfgNode, u32)> {
        for frame in context.callstack().iter().rev() {
            let ra = frame.return_address;
            if let Some(node) = single_node_from_address(model, ra)? {
                return Ok((node, ra));
            }
            if let Some((node, address)) = model
                .next_reachable_nodes_from_address(ra)
                .into_iter()
                .next()
            {
                return Ok((node, address));
            }
        }
        Err(DebuggerError::UnresolvableReturnPath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FunctionInfo, GlobalInfo, SourceCodeLocation};
    use crate::wire::WireState;

    /// Target answering only the callback-table request.
    struct TableVm {
        requests: usize,
    }

    impl TargetVm for TableVm {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        fn run(&mut self) -> Result<bool> {
            Ok(true)
        }
        fn pause(&mut self) -> Result<()> {
            Ok(())
        }
        fn send_request(&mut self, request: &StateRequest) -> Result<WireState> {
            assert!(request.callback_mappings && request.table);
            self.requests += 1;
            WireState::from_json(
                r#"{
                    "callbacks": [
                        {"pin": 3, "targets": [0]},
                        {"pin": 5, "targets": [1]},
                        {"pin": 9, "targets": []}
                    ],
                    "table": [7, 8]
                }"#,
            )
        }
        fn add_breakpoint(&mut self, _: u32) -> Result<bool> {
            Ok(true)
        }
        fn remove_breakpoint(&mut self, _: u32) -> Result<bool> {
            Ok(true)
        }
        fn poll_notification(&mut self) -> Option<crate::vm::VmNotification> {
            None
        }
    }

    struct CallbackModel;

    impl SourceModel for CallbackModel {
        fn nodes_from_address(&self, address: u32) -> Vec<SourceCfgNode> {
            // nodes at known addresses only
            let known = [0x100u32, 0x140, 0x20];
            if known.contains(&address) {
                let loc = SourceCodeLocation::new("main.ts", address / 0x10).with_address(address);
                vec![SourceCfgNode::new(u64::from(address), loc, address, address + 8)]
            } else {
                vec![]
            }
        }
        fn next_reachable_nodes_from_address(&self, address: u32) -> Vec<(SourceCfgNode, u32)> {
            if address == 0x33 {
                let loc = SourceCodeLocation::new("main.ts", 2).with_address(0x20);
                vec![(SourceCfgNode::new(0x20, loc, 0x20, 0x28), 0x20)]
            } else {
                vec![]
            }
        }
        fn step_into_targets(&self, _: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)> {
            vec![]
        }
        fn step_over_targets(&self, node: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)> {
            let next = node.first_address() + 0x10;
            let loc = SourceCodeLocation::new("main.ts", next / 0x10).with_address(next);
            vec![(SourceCfgNode::new(u64::from(next), loc, next, next + 8), next)]
        }
        fn step_out_targets(&self, _: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)> {
            vec![]
        }
        fn step_iteration_targets(&self, _: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)> {
            vec![]
        }
        fn function(&self, fidx: u32) -> Option<FunctionInfo> {
            let entry_address = match fidx {
                7 => 0x100,
                8 => 0x140,
                _ => return None,
            };
            Some(FunctionInfo {
                fidx,
                name: format!("callback_{}", fidx),
                nr_args: 0,
                locals: vec![],
                entry_address,
            })
        }
        fn global(&self, _: u32) -> Option<GlobalInfo> {
            None
        }
        fn locations_on_line(&self, _: &str, _: u32) -> Vec<SourceCodeLocation> {
            vec![]
        }
    }

    #[test]
    fn mapping_is_fetched_once() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        tracker
            .resolve_callback_targets(3, &mut vm, &CallbackModel)
            .unwrap();
        tracker
            .resolve_callback_targets(5, &mut vm, &CallbackModel)
            .unwrap();
        assert_eq!(vm.requests, 1);
    }

    #[test]
    fn resolves_pin_to_entry_nodes() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        let targets = tracker
            .resolve_callback_targets(3, &mut vm, &CallbackModel)
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].1, 0x100);
        assert_eq!(tracker.callback_ids_for_pin(3), &[7]);
    }

    #[test]
    fn unmapped_pin_is_fatal() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        assert!(matches!(
            tracker.resolve_callback_targets(42, &mut vm, &CallbackModel),
            Err(DebuggerError::UnknownCallbackTarget { pin: 42 })
        ));
        // a pin mapped to nothing is just as unsteppable
        assert!(matches!(
            tracker.resolve_callback_targets(9, &mut vm, &CallbackModel),
            Err(DebuggerError::UnknownCallbackTarget { pin: 9 })
        ));
    }

    #[test]
    fn resume_address_latches_once_per_burst() {
        let mut tracker = InterruptTracker::new();
        tracker.begin_callback(vec![7], 0x20);
        assert_eq!(tracker.return_address(), Some(0x20));
        // nested callback does not move the resume point
        tracker.begin_callback(vec![8], 0x100);
        assert_eq!(tracker.return_address(), Some(0x20));
    }

    #[test]
    fn end_resumes_where_stepping_was_interrupted() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        tracker.begin_callback(vec![7], 0x20);

        let destinations = tracker
            .end_current_callback(&mut vm, &CallbackModel)
            .unwrap();
        assert!(!tracker.callback_in_progress());
        assert_eq!(tracker.return_address(), None);
        // step-over successors of the node enclosing 0x20
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].1, 0x30);
    }

    #[test]
    fn queued_interrupt_continues_the_burst() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        tracker.begin_callback(vec![7], 0x20);
        tracker.on_interrupt_signal(5);

        let destinations = tracker
            .end_current_callback(&mut vm, &CallbackModel)
            .unwrap();
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].1, 0x140);
        // the original resume point is still latched
        assert_eq!(tracker.return_address(), Some(0x20));
    }

    #[test]
    fn exhausted_burst_yields_no_destinations() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        tracker.begin_callback(vec![7], 0x20);
        tracker.end_current_callback(&mut vm, &CallbackModel).unwrap();

        let destinations = tracker
            .end_current_callback(&mut vm, &CallbackModel)
            .unwrap();
        assert!(destinations.is_empty());
    }

    #[test]
    fn callback_ids_at_entry_matches_function_entries() {
        let mut vm = TableVm { requests: 0 };
        let mut tracker = InterruptTracker::new();
        tracker
            .resolve_callback_targets(3, &mut vm, &CallbackModel)
            .unwrap();
        assert_eq!(tracker.callback_ids_at_entry(0x100, &CallbackModel), vec![7]);
        assert_eq!(tracker.callback_ids_at_entry(0x140, &CallbackModel), vec![8]);
        assert!(tracker.callback_ids_at_entry(0x20, &CallbackModel).is_empty());
    }
}
