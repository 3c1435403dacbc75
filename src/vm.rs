//! Contract with the remote virtual machine.
//!
//! The transport behind it (serial port, socket, subprocess emulator) is a
//! strict request/response channel: implementations must not be handed a
//! second request before the first resolved, which the engine guarantees by
//! taking `&mut self` everywhere. Breakpoint hits and device events arrive
//! out-of-band and are buffered until [`TargetVm::poll_notification`] drains
//! them in arrival order.

use crate::error::Result;
use crate::wire::{StateRequest, WireEvent, WireState};

/// An asynchronous push from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmNotification {
    /// Execution halted on an installed breakpoint.
    BreakpointHit { pc: u32 },
    /// A new event was queued on the device.
    NewEvent(WireEvent),
    /// An external interrupt fired for the given pin.
    Interrupt { pin: u32 },
}

/// The remote execution target.
///
/// Capabilities are flags rather than subtypes, so callers never need to
/// know which concrete VM flavour they talk to.
pub trait TargetVm {
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// Resume execution. `false` means the target refused to resume.
    fn run(&mut self) -> Result<bool>;

    fn pause(&mut self) -> Result<()>;

    /// One inspection round-trip carrying exactly the requested subsets.
    fn send_request(&mut self, request: &StateRequest) -> Result<WireState>;

    /// Install a breakpoint at a bytecode offset. `false` on rejection.
    fn add_breakpoint(&mut self, address: u32) -> Result<bool>;

    /// Remove a breakpoint at a bytecode offset. `false` on rejection.
    fn remove_breakpoint(&mut self, address: u32) -> Result<bool>;

    /// Next buffered push, strictly in arrival order.
    fn poll_notification(&mut self) -> Option<VmNotification>;

    /// Dequeue a pending event for handling. Only meaningful when
    /// [`TargetVm::supports_external_events`] holds.
    fn handle_event(&mut self, index: usize) -> Result<bool> {
        let _ = index;
        Ok(false)
    }

    fn supports_external_events(&self) -> bool {
        false
    }

    fn supports_proxying(&self) -> bool {
        false
    }
}
