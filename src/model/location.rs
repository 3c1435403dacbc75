use serde::{Deserialize, Serialize};

/// A position in the debugged program's source, optionally pinned to the
/// bytecode offset it compiles to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCodeLocation {
    pub source: String,
    pub linenr: u32,
    pub colnr: Option<u32>,
    pub address: Option<u32>,
}

impl SourceCodeLocation {
    pub fn new(source: impl Into<String>, linenr: u32) -> Self {
        Self {
            source: source.into(),
            linenr,
            colnr: None,
            address: None,
        }
    }

    pub fn with_column(mut self, colnr: u32) -> Self {
        self.colnr = Some(colnr);
        self
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = Some(address);
        self
    }

    /// User-facing match: same file and line, and same column when both
    /// sides carry one.
    pub fn loose_eq(&self, other: &SourceCodeLocation) -> bool {
        if self.source != other.source || self.linenr != other.linenr {
            return false;
        }
        match (self.colnr, other.colnr) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Address-exact match, used to deduplicate breakpoints while stepping.
    pub fn strict_eq(&self, other: &SourceCodeLocation) -> bool {
        self.loose_eq(other) && self.address == other.address
    }
}

impl std::fmt::Display for SourceCodeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.linenr)?;
        if let Some(col) = self.colnr {
            write!(f, ":{}", col)?;
        }
        if let Some(addr) = self.address {
            write!(f, " @ {:#x}", addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_ignores_missing_column() {
        let a = SourceCodeLocation::new("main.ts", 4);
        let b = SourceCodeLocation::new("main.ts", 4).with_column(12);
        assert!(a.loose_eq(&b));
        assert!(b.loose_eq(&a));
    }

    #[test]
    fn loose_compares_column_when_both_present() {
        let a = SourceCodeLocation::new("main.ts", 4).with_column(2);
        let b = SourceCodeLocation::new("main.ts", 4).with_column(12);
        assert!(!a.loose_eq(&b));
    }

    #[test]
    fn strict_requires_matching_address() {
        let a = SourceCodeLocation::new("main.ts", 4).with_address(0x20);
        let b = SourceCodeLocation::new("main.ts", 4).with_address(0x24);
        let c = SourceCodeLocation::new("main.ts", 4).with_address(0x20);
        assert!(a.loose_eq(&b));
        assert!(!a.strict_eq(&b));
        assert!(a.strict_eq(&c));
    }

    #[test]
    fn different_files_never_match() {
        let a = SourceCodeLocation::new("main.ts", 4);
        let b = SourceCodeLocation::new("util.ts", 4);
        assert!(!a.loose_eq(&b));
    }
}
