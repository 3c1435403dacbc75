//! Facade over one connected target: composes the snapshot builder, the
//! breakpoint registry, the interrupt tracker and the stepping engine, and
//! pushes notifications outward.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::DebuggingMode;
use crate::debugger::breakpoints::{BreakpointKind, BreakpointRegistry};
use crate::debugger::context::{Context, EventItem};
use crate::debugger::interrupts::InterruptTracker;
use crate::debugger::stepping::{StepKind, SteppingEngine};
use crate::debugger::timeline::DebuggingTimeline;
use crate::error::{DebuggerError, Result};
use crate::model::{SourceCodeLocation, SourceModel};
use crate::vm::{TargetVm, VmNotification};
use crate::wire::StateRequest;

/// Notification pushed to subscribers after a state transition. Dispatched
/// synchronously, in order, over plain channels; no listener ever holds a
/// reference back into the backend.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    StateUpdated(Arc<Context>),
    BreakpointReached {
        context: Arc<Context>,
        location: Option<SourceCodeLocation>,
    },
    NewEventArrived {
        event: EventItem,
    },
    EventHandled {
        event: EventItem,
        remaining: Vec<EventItem>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    Paused,
    Running,
}

/// One debugging session against one remote target.
///
/// All operations take `&mut self`: the transport is a serial
/// request/response channel and exactly one exchange may be outstanding.
pub struct RemoteDebuggerBackend {
    vm: Box<dyn TargetVm>,
    model: Arc<dyn SourceModel>,
    mode: DebuggingMode,
    running_state: RunningState,
    context: Arc<Context>,
    registry: BreakpointRegistry,
    tracker: InterruptTracker,
    engine: SteppingEngine,
    timeline: DebuggingTimeline,
    subscribers: Vec<Sender<BackendEvent>>,
}

impl RemoteDebuggerBackend {
    pub fn new(
        vm: Box<dyn TargetVm>,
        model: Arc<dyn SourceModel>,
        mode: DebuggingMode,
    ) -> RemoteDebuggerBackend {
        RemoteDebuggerBackend {
            vm,
            model,
            mode,
            running_state: RunningState::Paused,
            context: Arc::new(Context::empty()),
            registry: BreakpointRegistry::new(),
            tracker: InterruptTracker::new(),
            engine: SteppingEngine::new(),
            timeline: DebuggingTimeline::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn debugging_mode(&self) -> DebuggingMode {
        self.mode
    }

    pub fn running_state(&self) -> RunningState {
        self.running_state
    }

    pub fn is_paused(&self) -> bool {
        self.running_state == RunningState::Paused
    }

    pub fn can_proxy(&self) -> bool {
        self.vm.supports_proxying()
    }

    /// Callback function ids currently preempting normal execution.
    pub fn callbacks_in_progress(&self) -> &[u32] {
        self.tracker.callbacks_in_progress()
    }

    pub fn get_current_context(&self) -> Arc<Context> {
        self.context.clone()
    }

    pub fn timeline(&self) -> &DebuggingTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut DebuggingTimeline {
        &mut self.timeline
    }

    /// Registers a listener; events arrive in emission order.
    pub fn subscribe(&mut self) -> Receiver<BackendEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: BackendEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn connect(&mut self) -> Result<()> {
        self.vm.connect()?;
        info!("connected to target");
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.vm.disconnect()?;
        info!("disconnected from target");
        Ok(())
    }

    pub fn run(&mut self) -> Result<bool> {
        let running = self.vm.run()?;
        if running {
            self.running_state = RunningState::Running;
        }
        Ok(running)
    }

    /// Halts the target. Transient breakpoints of an operation in flight
    /// stay installed; the next step retires them, or call
    /// [`Self::clear_transient_breakpoints`] explicitly.
    pub fn pause(&mut self) -> Result<()> {
        self.vm.pause()?;
        self.running_state = RunningState::Paused;
        Ok(())
    }

    pub fn step(&mut self) -> Result<()> {
        self.do_step(StepKind::Into)
    }

    pub fn step_over(&mut self) -> Result<()> {
        self.do_step(StepKind::Over)
    }

    pub fn step_out(&mut self) -> Result<()> {
        self.do_step(StepKind::Out)
    }

    pub fn step_iteration(&mut self) -> Result<()> {
        self.do_step(StepKind::Iteration)
    }

    fn do_step(&mut self, kind: StepKind) -> Result<()> {
        let context = self.context.clone();
        self.engine.begin_step(
            kind,
            &context,
            self.model.as_ref(),
            &mut self.tracker,
            &mut self.registry,
            self.vm.as_mut(),
        )?;
        if self.engine.is_awaiting_hit() {
            self.running_state = RunningState::Running;
        }
        Ok(())
    }

    /// Breaks at every known callback entry from now on. Idempotent.
    pub fn break_on_interrupts(&mut self) -> Result<()> {
        self.engine.break_on_interrupts(
            &mut self.tracker,
            &mut self.registry,
            self.vm.as_mut(),
            self.model.as_ref(),
        )?;
        self.running_state = RunningState::Running;
        Ok(())
    }

    /// Snaps each requested location to the closest mapped column on its
    /// line, then reconciles the user breakpoints against the result.
    /// Returns `true` only if every location mapped and every target
    /// operation succeeded.
    pub fn set_breakpoints(&mut self, locations: &[SourceCodeLocation]) -> Result<bool> {
        let mut all_mapped = true;
        let mut corrected = Vec::with_capacity(locations.len());
        for location in locations {
            match self.correct_location(location) {
                Some(snapped) => corrected.push(snapped),
                None => {
                    warn!("no mapped position on line for {}", location);
                    all_mapped = false;
                }
            }
        }
        let reconciled = self.registry.reconcile(self.vm.as_mut(), &corrected)?;
        Ok(reconciled && all_mapped)
    }

    /// Nearest mapped column on the requested line, lowest address on ties.
    fn correct_location(&self, requested: &SourceCodeLocation) -> Option<SourceCodeLocation> {
        let mut candidates = self
            .model
            .locations_on_line(&requested.source, requested.linenr);
        candidates.retain(|c| c.address.is_some());
        let wanted = requested.colnr.unwrap_or(1);
        candidates
            .into_iter()
            .min_by_key(|c| (c.colnr.unwrap_or(1).abs_diff(wanted), c.address))
    }

    pub fn installed_user_breakpoints(&self) -> Vec<SourceCodeLocation> {
        self.registry
            .user_breakpoints()
            .iter()
            .map(|bp| bp.location.clone())
            .collect()
    }

    pub fn clear_transient_breakpoints(&mut self) -> Result<()> {
        self.registry.clear_transient(self.vm.as_mut())
    }

    /// Requests a fresh snapshot and replaces the current context.
    pub fn refresh_state(&mut self) -> Result<()> {
        let context = self.rebuild_context()?;
        self.emit(BackendEvent::StateUpdated(context));
        Ok(())
    }

    fn rebuild_context(&mut self) -> Result<Arc<Context>> {
        let response = self.vm.send_request(&StateRequest::full_snapshot())?;
        let context = Arc::new(Context::build(&response, self.model.as_ref())?);
        self.context = context.clone();
        self.timeline.append(context.clone());
        Ok(context)
    }

    /// Dequeues one pending event on targets that expose external event
    /// handling.
    pub fn handle_event(&mut self, index: usize) -> Result<()> {
        if !self.vm.supports_external_events() {
            return Err(DebuggerError::UnsupportedOperation(
                "external event handling",
            ));
        }
        let event = self
            .context
            .events()
            .get(index)
            .cloned()
            .ok_or(DebuggerError::EventNotHandled { index })?;
        if !self.vm.handle_event(index)? {
            return Err(DebuggerError::EventNotHandled { index });
        }
        let response = self.vm.send_request(&StateRequest::new().include_events())?;
        let remaining: Vec<EventItem> = response
            .events
            .unwrap_or_default()
            .into_iter()
            .map(EventItem::from)
            .collect();
        self.emit(BackendEvent::EventHandled { event, remaining });
        Ok(())
    }

    /// Drains the target's push queue in arrival order. Call between
    /// operations; never while one is being issued.
    pub fn process_notifications(&mut self) -> Result<()> {
        while let Some(notification) = self.vm.poll_notification() {
            match notification {
                VmNotification::BreakpointHit { pc } => self.on_breakpoint_hit(pc)?,
                VmNotification::NewEvent(ev) => {
                    let event = EventItem::from(ev);
                    debug!("event arrived on topic {}", event.topic);
                    self.emit(BackendEvent::NewEventArrived { event });
                }
                VmNotification::Interrupt { pin } => self.tracker.on_interrupt_signal(pin),
            }
        }
        Ok(())
    }

    /// One breakpoint hit: retire the in-flight operation's transient
    /// breakpoints, rebuild the snapshot, update the callback bookkeeping
    /// and notify.
    fn on_breakpoint_hit(&mut self, pc: u32) -> Result<()> {
        debug!("breakpoint hit at {:#x}", pc);
        let kinds = self.registry.kinds_at(pc);

        self.engine
            .finish_hit(&mut self.registry, self.vm.as_mut())?;
        self.running_state = RunningState::Paused;
        let context = self.rebuild_context()?;

        if kinds.contains(&BreakpointKind::CallbackEntry) {
            self.on_callback_entered(pc, &context)?;
        }
        if kinds.contains(&BreakpointKind::ReturnAddress) {
            self.on_callback_completed(pc)?;
        }

        let location = self
            .model
            .nodes_from_address(context.pc())
            .into_iter()
            .next()
            .map(|n| n.location().clone());
        self.emit(BackendEvent::StateUpdated(context.clone()));
        self.emit(BackendEvent::BreakpointReached { context, location });
        Ok(())
    }

    /// A callback-entry breakpoint fired: execution was preempted into a
    /// callback from an arbitrary call stack. Completion is detected by a
    /// breakpoint on the first resolvable return address of that stack.
    fn on_callback_entered(&mut self, pc: u32, context: &Arc<Context>) -> Result<()> {
        let ids = self.tracker.callback_ids_at_entry(pc, self.model.as_ref());
        if ids.is_empty() {
            return Ok(());
        }
        let (node, return_address) = self
            .tracker
            .return_path_target(context, self.model.as_ref())?;
        if !self.registry.covers(return_address) {
            let location = node.location().clone().with_address(return_address);
            if !self.registry.install(
                self.vm.as_mut(),
                location.clone(),
                BreakpointKind::ReturnAddress,
            )? {
                return Err(DebuggerError::BreakpointOperationFailed {
                    failures: vec![location],
                });
            }
        }
        self.tracker.begin_callback(ids, return_address);
        Ok(())
    }

    /// A return-address breakpoint fired: the callback burst returned to
    /// the preempted stack. A queued interrupt keeps the burst going;
    /// otherwise the target stays paused here.
    fn on_callback_completed(&mut self, pc: u32) -> Result<()> {
        self.registry
            .remove_at(self.vm.as_mut(), pc, BreakpointKind::ReturnAddress)?;
        let targets = self
            .tracker
            .end_current_callback(self.vm.as_mut(), self.model.as_ref())?;

        if self.tracker.return_address().is_some() {
            // nested interrupt: arm the next callback's entries and keep
            // the target moving
            for (node, address) in &targets {
                if self.registry.covers(*address) {
                    continue;
                }
                let location = node.location().clone().with_address(*address);
                if !self.registry.install(
                    self.vm.as_mut(),
                    location.clone(),
                    BreakpointKind::CallbackEntry,
                )? {
                    return Err(DebuggerError::BreakpointOperationFailed {
                        failures: vec![location],
                    });
                }
            }
            if self.vm.run()? {
                self.running_state = RunningState::Running;
            }
        }
        Ok(())
    }
}
