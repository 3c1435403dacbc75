//! Reconstruction of one inspection response into a navigable snapshot.

use crate::error::{DebuggerError, Result};
use crate::model::{SourceCodeLocation, SourceModel};
use crate::wire::{WireEvent, WireFrame, WireState, WireValue};

/// One slot of the operand stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackValue {
    pub index: u32,
    pub value_type: String,
    pub value: String,
}

/// A module global resolved against the source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalValue {
    pub index: u32,
    pub name: String,
    pub value_type: String,
    pub mutable: bool,
    pub value: String,
}

/// A named local or argument slot of a function frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub index: u32,
    pub name: String,
    pub value_type: String,
    pub mutable: bool,
    pub value: String,
}

/// An event pending in the device's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventItem {
    pub topic: String,
    pub payload: String,
}

impl From<WireEvent> for EventItem {
    fn from(ev: WireEvent) -> Self {
        EventItem {
            topic: ev.topic,
            payload: ev.payload,
        }
    }
}

/// A trap reported by the target alongside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub pc: u32,
    pub message: String,
}

/// One source-level call frame, derived from the VM's raw frame stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackFrame {
    pub frame_index: u32,
    pub function_id: Option<u32>,
    pub function_name: Option<String>,
    pub return_address: u32,
    pub source_location: Option<SourceCodeLocation>,
    pub locals: Vec<Variable>,
    pub arguments: Vec<Variable>,
}

/// Immutable snapshot of the remote machine's execution state. A fresh
/// `Context` replaces the previous one on every refresh; nothing is patched
/// in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pc: u32,
    callstack: Vec<CallstackFrame>,
    stack: Vec<StackValue>,
    globals: Vec<GlobalValue>,
    events: Vec<EventItem>,
    exception: Option<ExceptionInfo>,
}

impl Context {
    /// Snapshot used before the first refresh of a session.
    pub fn empty() -> Context {
        Context::default()
    }

    /// Builds a snapshot from a wire response. Pure: no VM traffic, no
    /// mutation of the model. Fields the response did not carry become
    /// empty containers. A function or global id the model does not know
    /// is a stale source map and fails loudly.
    pub fn build(state: &WireState, model: &dyn SourceModel) -> Result<Context> {
        let mut pc = state.pc.unwrap_or(0);

        let exception = match (state.pcerror, &state.exception_msg) {
            (Some(pcerror), Some(msg)) if !msg.is_empty() => {
                // show the faulting instruction rather than where the
                // trap handler left the pc
                pc = pcerror;
                Some(ExceptionInfo {
                    pc: pcerror,
                    message: msg.clone(),
                })
            }
            _ => None,
        };

        let mut stack: Vec<StackValue> = state
            .stack
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|v| StackValue {
                index: v.idx,
                value_type: v.value_type.clone(),
                value: v.value_text(),
            })
            .collect();
        stack.sort_by_key(|v| v.index);

        let globals = build_globals(state.globals.as_deref().unwrap_or(&[]), model)?;

        let events: Vec<EventItem> = state
            .events
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .cloned()
            .map(EventItem::from)
            .collect();

        let callstack =
            build_callstack(state.callstack.as_deref().unwrap_or(&[]), pc, &stack, model)?;

        Ok(Context {
            pc,
            callstack,
            stack,
            globals,
            events,
            exception,
        })
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Function frames, ordered outer to inner by frame index.
    pub fn callstack(&self) -> &[CallstackFrame] {
        &self.callstack
    }

    pub fn stack(&self) -> &[StackValue] {
        &self.stack
    }

    pub fn globals(&self) -> &[GlobalValue] {
        &self.globals
    }

    pub fn events(&self) -> &[EventItem] {
        &self.events
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn current_frame(&self) -> Option<&CallstackFrame> {
        self.callstack.last()
    }
}

fn build_globals(raw: &[WireValue], model: &dyn SourceModel) -> Result<Vec<GlobalValue>> {
    raw.iter()
        .map(|v| {
            let info = model.global(v.idx).ok_or_else(|| {
                DebuggerError::ModelInconsistency(format!(
                    "global {} is not present in the source map",
                    v.idx
                ))
            })?;
            Ok(GlobalValue {
                index: v.idx,
                name: info.name,
                value_type: info.value_type,
                mutable: info.mutable,
                value: v.value_text(),
            })
        })
        .collect()
}

/// Derives source-level function frames from the VM's raw frame stack.
///
/// The raw stack interleaves function frames with block/loop/if frames and
/// callback/proxy guards. Block frames carry the precise position inside
/// their enclosing function, so the innermost block position since the last
/// function frame is propagated onto that function frame's effective
/// address. Guard frames never contribute a position.
fn build_callstack(
    raw: &[WireFrame],
    pc: u32,
    stack: &[StackValue],
    model: &dyn SourceModel,
) -> Result<Vec<CallstackFrame>> {
    let mut frames: Vec<&WireFrame> = raw.iter().collect();
    frames.sort_by_key(|f| f.idx);

    // effective address per raw frame: pc for the innermost, the inner
    // neighbour's return address for everyone below
    let mut addresses = vec![0u32; frames.len()];
    let mut carried = pc;
    for (slot, frame) in addresses.iter_mut().zip(frames.iter()).rev() {
        *slot = carried;
        carried = frame.ra;
    }

    let mut derived: Vec<CallstackFrame> = Vec::new();
    let mut latched: Option<u32> = None;
    for (&frame, &address) in frames.iter().zip(addresses.iter()).rev() {
        let frame_type = frame.frame_type().ok_or_else(|| {
            DebuggerError::ModelInconsistency(format!(
                "unknown frame type {} in frame {}",
                frame.type_code, frame.idx
            ))
        })?;

        if frame_type.is_function() {
            let effective = match latched.take() {
                Some(block_address) => model
                    .nodes_from_address(block_address)
                    .into_iter()
                    .next()
                    .map(|n| n.last_instruction_address())
                    .unwrap_or(block_address),
                None => address,
            };
            derived.push(build_function_frame(frame, effective, stack, model)?);
        } else if !frame_type.is_guard() && latched.is_none() {
            latched = Some(address);
        }
    }

    derived.reverse();
    Ok(derived)
}

fn build_function_frame(
    frame: &WireFrame,
    effective_address: u32,
    stack: &[StackValue],
    model: &dyn SourceModel,
) -> Result<CallstackFrame> {
    let fidx = frame.fidx.ok_or_else(|| {
        DebuggerError::ModelInconsistency(format!(
            "function frame {} carries no function id",
            frame.idx
        ))
    })?;
    let function = model.function(fidx).ok_or_else(|| {
        DebuggerError::ModelInconsistency(format!(
            "function {} is not present in the source map",
            fidx
        ))
    })?;

    let source_location = model
        .nodes_from_address(effective_address)
        .into_iter()
        .next()
        .map(|n| n.location().clone());

    // locals live on the operand stack starting right above the saved
    // stack pointer; arguments occupy the first nr_args slots of that range
    let fp = frame.sp + 1;
    let slot = |index: u32| -> Option<&StackValue> {
        usize::try_from(fp + i64::from(index))
            .ok()
            .and_then(|i| stack.get(i))
    };

    let mut arguments = Vec::new();
    let mut locals = Vec::new();
    for local in &function.locals {
        let Some(value) = slot(local.index) else {
            continue;
        };
        let variable = Variable {
            index: local.index,
            name: local.name.clone(),
            value_type: local.value_type.clone(),
            mutable: local.mutable,
            value: value.value.clone(),
        };
        if local.index < function.nr_args {
            arguments.push(variable);
        } else {
            locals.push(variable);
        }
    }

    Ok(CallstackFrame {
        frame_index: frame.idx,
        function_id: Some(fidx),
        function_name: Some(function.name),
        return_address: frame.ra,
        source_location,
        locals,
        arguments,
    })
}
