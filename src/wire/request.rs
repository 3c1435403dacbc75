use serde::Serialize;

/// Selects the state subsets one inspection round-trip should carry.
///
/// Each request names exactly the pieces the caller needs, keeping the
/// serial channel cheap on constrained targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateRequest {
    pub pc: bool,
    pub stack: bool,
    pub callstack: bool,
    pub globals: bool,
    pub events: bool,
    pub callback_mappings: bool,
    pub table: bool,
}

impl StateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_pc(mut self) -> Self {
        self.pc = true;
        self
    }

    pub fn include_stack(mut self) -> Self {
        self.stack = true;
        self
    }

    pub fn include_callstack(mut self) -> Self {
        self.callstack = true;
        self
    }

    pub fn include_globals(mut self) -> Self {
        self.globals = true;
        self
    }

    pub fn include_events(mut self) -> Self {
        self.events = true;
        self
    }

    pub fn include_callback_mappings(mut self) -> Self {
        self.callback_mappings = true;
        self
    }

    pub fn include_table(mut self) -> Self {
        self.table = true;
        self
    }

    /// Everything a state refresh displays.
    pub fn full_snapshot() -> Self {
        Self::new()
            .include_pc()
            .include_stack()
            .include_callstack()
            .include_globals()
            .include_events()
    }

    /// The interrupt-to-callback mapping and the indirect-call table.
    pub fn callback_tables() -> Self {
        Self::new().include_callback_mappings().include_table()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_fields() {
        let req = StateRequest::new().include_pc().include_events();
        assert!(req.pc);
        assert!(req.events);
        assert!(!req.stack);
        assert!(!req.is_empty());
    }

    #[test]
    fn full_snapshot_leaves_out_callback_tables() {
        let req = StateRequest::full_snapshot();
        assert!(req.pc && req.stack && req.callstack && req.globals && req.events);
        assert!(!req.callback_mappings && !req.table);
    }
}
