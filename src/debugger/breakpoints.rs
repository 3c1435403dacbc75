//! Bookkeeping of breakpoints installed on the remote machine.
//!
//! The registry is the single owner of the installed set. The stepping
//! engine and the interrupt tracker go through it; neither ever talks to
//! the target's breakpoint interface directly.

use log::{debug, warn};

use crate::error::{DebuggerError, Result};
use crate::model::SourceCodeLocation;
use crate::vm::TargetVm;

/// Why a breakpoint exists. Kinds live in separate buckets so retiring one
/// operation's breakpoints can never delete a user's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Set by the user, persists across stepping operations.
    User,
    /// Installed for one stepping operation and retired on its hit.
    Transient,
    /// Marks a callback function's entry while breaking on interrupts.
    CallbackEntry,
    /// Detects completion of a callback via a frame's return address.
    ReturnAddress,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub location: SourceCodeLocation,
    pub address: u32,
    pub kind: BreakpointKind,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    user: Vec<Breakpoint>,
    transient: Vec<Breakpoint>,
    callback_entry: Vec<Breakpoint>,
    return_address: Vec<Breakpoint>,
}

impl BreakpointRegistry {
    pub fn new() -> BreakpointRegistry {
        BreakpointRegistry::default()
    }

    fn bucket(&self, kind: BreakpointKind) -> &Vec<Breakpoint> {
        match kind {
            BreakpointKind::User => &self.user,
            BreakpointKind::Transient => &self.transient,
            BreakpointKind::CallbackEntry => &self.callback_entry,
            BreakpointKind::ReturnAddress => &self.return_address,
        }
    }

    fn bucket_mut(&mut self, kind: BreakpointKind) -> &mut Vec<Breakpoint> {
        match kind {
            BreakpointKind::User => &mut self.user,
            BreakpointKind::Transient => &mut self.transient,
            BreakpointKind::CallbackEntry => &mut self.callback_entry,
            BreakpointKind::ReturnAddress => &mut self.return_address,
        }
    }

    fn buckets(&self) -> [&Vec<Breakpoint>; 4] {
        [
            &self.user,
            &self.transient,
            &self.callback_entry,
            &self.return_address,
        ]
    }

    pub fn user_breakpoints(&self) -> &[Breakpoint] {
        &self.user
    }

    pub fn breakpoints_of_kind(&self, kind: BreakpointKind) -> &[Breakpoint] {
        self.bucket(kind)
    }

    /// Whether any installed breakpoint, of any kind, sits at `address`.
    pub fn covers(&self, address: u32) -> bool {
        self.buckets()
            .iter()
            .any(|bucket| bucket.iter().any(|bp| bp.address == address))
    }

    /// All kinds installed at `address`, used to classify an incoming hit.
    pub fn kinds_at(&self, address: u32) -> Vec<BreakpointKind> {
        self.buckets()
            .iter()
            .flat_map(|bucket| bucket.iter())
            .filter(|bp| bp.address == address)
            .map(|bp| bp.kind)
            .collect()
    }

    /// Installs a breakpoint on the target. Appends to the registry only
    /// when the target accepted it; a rejection returns `Ok(false)`.
    pub fn install(
        &mut self,
        vm: &mut dyn TargetVm,
        location: SourceCodeLocation,
        kind: BreakpointKind,
    ) -> Result<bool> {
        let address = location.address.ok_or_else(|| {
            DebuggerError::ModelInconsistency(format!(
                "breakpoint location {} resolved to no address",
                location
            ))
        })?;
        if !vm.add_breakpoint(address)? {
            warn!("target rejected breakpoint at {}", location);
            return Ok(false);
        }
        debug!("installed {:?} breakpoint at {}", kind, location);
        self.bucket_mut(kind).push(Breakpoint {
            location,
            address,
            kind,
        });
        Ok(true)
    }

    /// Removes a user breakpoint by strict-equal lookup. Absence is a
    /// no-op success.
    pub fn remove(&mut self, vm: &mut dyn TargetVm, location: &SourceCodeLocation) -> Result<bool> {
        let Some(position) = self
            .user
            .iter()
            .position(|bp| bp.location.strict_eq(location))
        else {
            return Ok(true);
        };
        let address = self.user[position].address;
        if !vm.remove_breakpoint(address)? {
            warn!("target refused to remove breakpoint at {}", location);
            return Ok(false);
        }
        debug!("removed user breakpoint at {}", location);
        self.user.remove(position);
        Ok(true)
    }

    /// Removes one breakpoint of `kind` at `address`, if present.
    pub fn remove_at(
        &mut self,
        vm: &mut dyn TargetVm,
        address: u32,
        kind: BreakpointKind,
    ) -> Result<bool> {
        let bucket = self.bucket_mut(kind);
        let Some(position) = bucket.iter().position(|bp| bp.address == address) else {
            return Ok(true);
        };
        if !vm.remove_breakpoint(address)? {
            return Ok(false);
        }
        self.bucket_mut(kind).remove(position);
        Ok(true)
    }

    /// Retires every breakpoint of `kind`. Failures are collected; the
    /// entries the target refused to drop stay in the registry.
    pub fn clear_kind(&mut self, vm: &mut dyn TargetVm, kind: BreakpointKind) -> Result<()> {
        let bucket = std::mem::take(self.bucket_mut(kind));
        let mut failures = Vec::new();
        for bp in bucket {
            if !vm.remove_breakpoint(bp.address)? {
                failures.push(bp.location.clone());
                self.bucket_mut(kind).push(bp);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DebuggerError::BreakpointOperationFailed { failures })
        }
    }

    pub fn clear_transient(&mut self, vm: &mut dyn TargetVm) -> Result<()> {
        if !self.transient.is_empty() {
            debug!("retiring {} transient breakpoint(s)", self.transient.len());
        }
        self.clear_kind(vm, BreakpointKind::Transient)
    }

    /// Brings the installed *user* breakpoints in line with `desired` by
    /// removing the stale ones and installing the missing ones. Returns
    /// `true` only if every individual operation succeeded; on partial
    /// failure the successfully applied changes stay in place.
    pub fn reconcile(
        &mut self,
        vm: &mut dyn TargetVm,
        desired: &[SourceCodeLocation],
    ) -> Result<bool> {
        let mut all_ok = true;

        let stale: Vec<SourceCodeLocation> = self
            .user
            .iter()
            .filter(|bp| !desired.iter().any(|loc| bp.location.strict_eq(loc)))
            .map(|bp| bp.location.clone())
            .collect();
        for location in &stale {
            if !self.remove(vm, location)? {
                warn!("reconcile: could not remove breakpoint at {}", location);
                all_ok = false;
            }
        }

        let missing: Vec<SourceCodeLocation> = desired
            .iter()
            .filter(|loc| !self.user.iter().any(|bp| bp.location.strict_eq(loc)))
            .cloned()
            .collect();
        for location in missing {
            if !self.install(vm, location.clone(), BreakpointKind::User)? {
                warn!("reconcile: could not install breakpoint at {}", location);
                all_ok = false;
            }
        }

        Ok(all_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{StateRequest, WireState};

    /// Target that accepts everything and records the traffic.
    #[derive(Default)]
    struct RecordingVm {
        installed: Vec<u32>,
        removed: Vec<u32>,
        reject: Vec<u32>,
    }

    impl TargetVm for RecordingVm {
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
        fn send_request(&mut self, _: &StateRequest) -> Result<WireState> {
            Ok(WireState::default())
        }
        fn add_breakpoint(&mut self, address: u32) -> Result<bool> {
            if self.reject.contains(&address) {
                return Ok(false);
            }
            self.installed.push(address);
            Ok(true)
        }
        fn remove_breakpoint(&mut self, address: u32) -> Result<bool> {
            self.removed.push(address);
            Ok(true)
        }
        fn poll_notification(&mut self) -> Option<crate::vm::VmNotification> {
            None
        }
    }

    fn loc(line: u32, addr: u32) -> SourceCodeLocation {
        SourceCodeLocation::new("main.ts", line).with_address(addr)
    }

    #[test]
    fn install_appends_only_on_success() {
        let mut vm = RecordingVm {
            reject: vec![0x30],
            ..Default::default()
        };
        let mut registry = BreakpointRegistry::new();

        assert!(registry
            .install(&mut vm, loc(1, 0x10), BreakpointKind::User)
            .unwrap());
        assert!(!registry
            .install(&mut vm, loc(3, 0x30), BreakpointKind::User)
            .unwrap());
        assert_eq!(registry.user_breakpoints().len(), 1);
        assert!(registry.covers(0x10));
        assert!(!registry.covers(0x30));
    }

    #[test]
    fn install_without_address_is_a_model_error() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        let bare = SourceCodeLocation::new("main.ts", 1);
        assert!(matches!(
            registry.install(&mut vm, bare, BreakpointKind::User),
            Err(DebuggerError::ModelInconsistency(_))
        ));
    }

    #[test]
    fn remove_of_absent_breakpoint_is_a_noop_success() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        assert!(registry.remove(&mut vm, &loc(1, 0x10)).unwrap());
        assert!(vm.removed.is_empty());
    }

    #[test]
    fn buckets_are_isolated() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        registry
            .install(&mut vm, loc(1, 0x10), BreakpointKind::User)
            .unwrap();
        registry
            .install(&mut vm, loc(2, 0x20), BreakpointKind::Transient)
            .unwrap();

        registry.clear_transient(&mut vm).unwrap();
        assert_eq!(registry.user_breakpoints().len(), 1);
        assert!(registry.covers(0x10));
        assert!(!registry.covers(0x20));
        assert_eq!(vm.removed, vec![0x20]);
    }

    #[test]
    fn kinds_at_reports_every_bucket() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        registry
            .install(&mut vm, loc(1, 0x10), BreakpointKind::User)
            .unwrap();
        registry
            .install(&mut vm, loc(1, 0x10), BreakpointKind::ReturnAddress)
            .unwrap();
        let kinds = registry.kinds_at(0x10);
        assert!(kinds.contains(&BreakpointKind::User));
        assert!(kinds.contains(&BreakpointKind::ReturnAddress));
    }

    #[test]
    fn reconcile_applies_the_symmetric_difference() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        registry
            .install(&mut vm, loc(1, 0x10), BreakpointKind::User)
            .unwrap();
        registry
            .install(&mut vm, loc(2, 0x20), BreakpointKind::User)
            .unwrap();
        vm.installed.clear();
        vm.removed.clear();

        // keep line 1, drop line 2, add line 3
        let desired = vec![loc(1, 0x10), loc(3, 0x30)];
        assert!(registry.reconcile(&mut vm, &desired).unwrap());
        assert_eq!(vm.removed, vec![0x20]);
        assert_eq!(vm.installed, vec![0x30]);
        assert_eq!(registry.user_breakpoints().len(), 2);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut vm = RecordingVm::default();
        let mut registry = BreakpointRegistry::new();
        let desired = vec![loc(1, 0x10)];
        assert!(registry.reconcile(&mut vm, &desired).unwrap());
        vm.installed.clear();
        vm.removed.clear();

        assert!(registry.reconcile(&mut vm, &desired).unwrap());
        assert!(vm.installed.is_empty());
        assert!(vm.removed.is_empty());
    }

    #[test]
    fn reconcile_reports_partial_failure_but_keeps_applied_changes() {
        let mut vm = RecordingVm {
            reject: vec![0x30],
            ..Default::default()
        };
        let mut registry = BreakpointRegistry::new();
        let desired = vec![loc(1, 0x10), loc(3, 0x30)];
        assert!(!registry.reconcile(&mut vm, &desired).unwrap());
        // the accepted install stays
        assert_eq!(registry.user_breakpoints().len(), 1);
        assert!(registry.covers(0x10));
    }

    #[test]
    fn transient_clear_failure_keeps_the_refused_entry() {
        struct StickyVm(RecordingVm);
        impl TargetVm for StickyVm {
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
            fn send_request(&mut self, _: &StateRequest) -> Result<WireState> {
                Ok(WireState::default())
            }
            fn add_breakpoint(&mut self, address: u32) -> Result<bool> {
                self.0.add_breakpoint(address)
            }
            fn remove_breakpoint(&mut self, _: u32) -> Result<bool> {
                Ok(false)
            }
            fn poll_notification(&mut self) -> Option<crate::vm::VmNotification> {
                None
            }
        }

        let mut vm = StickyVm(RecordingVm::default());
        let mut registry = BreakpointRegistry::new();
        registry
            .install(&mut vm, loc(2, 0x20), BreakpointKind::Transient)
            .unwrap();
        let err = registry.clear_transient(&mut vm).unwrap_err();
        assert!(matches!(
            err,
            DebuggerError::BreakpointOperationFailed { ref failures } if failures.len() == 1
        ));
        assert!(registry.covers(0x20));
    }
}
