//! Source-level view of the compiled module: locations, control-flow-graph
//! nodes and the adaptor trait the engine queries them through.
//!
//! The engine never builds this data itself. A language adaptor derived from
//! the compiled module implements [`SourceModel`]; the engine only consumes
//! nodes as opaque keys with location and address accessors.

mod location;

pub use location::SourceCodeLocation;

use crate::error::{DebuggerError, Result};

/// One steppable unit of source code together with its bytecode address
/// range. Produced and owned by the [`SourceModel`]; never mutated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCfgNode {
    id: u64,
    location: SourceCodeLocation,
    first_address: u32,
    last_instruction_address: u32,
}

impl SourceCfgNode {
    pub fn new(
        id: u64,
        location: SourceCodeLocation,
        first_address: u32,
        last_instruction_address: u32,
    ) -> Self {
        Self {
            id,
            location,
            first_address,
            last_instruction_address,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &SourceCodeLocation {
        &self.location
    }

    pub fn first_address(&self) -> u32 {
        self.first_address
    }

    /// Start address of the last instruction belonging to this node.
    pub fn last_instruction_address(&self) -> u32 {
        self.last_instruction_address
    }

    pub fn contains_address(&self, address: u32) -> bool {
        self.first_address <= address && address <= self.last_instruction_address
    }
}

/// Declared layout of one local slot (arguments occupy the low indices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInfo {
    pub index: u32,
    pub name: String,
    pub value_type: String,
    pub mutable: bool,
}

/// Static description of one function in the compiled module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub fidx: u32,
    pub name: String,
    pub nr_args: u32,
    pub locals: Vec<LocalInfo>,
    pub entry_address: u32,
}

/// Static description of one global in the compiled module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub index: u32,
    pub name: String,
    pub value_type: String,
    pub mutable: bool,
}

/// Queryable source map + control-flow graph of the module on the target.
///
/// Step queries take a start node and return destination nodes paired with
/// the concrete address a breakpoint must be placed at to land there.
pub trait SourceModel {
    /// All nodes whose address range covers `address`.
    fn nodes_from_address(&self, address: u32) -> Vec<SourceCfgNode>;

    /// Nodes reachable from a raw address that itself has no direct mapping.
    fn next_reachable_nodes_from_address(&self, address: u32) -> Vec<(SourceCfgNode, u32)>;

    fn step_into_targets(&self, node: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)>;

    fn step_over_targets(&self, node: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)>;

    fn step_out_targets(&self, node: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)>;

    /// Successors across one loop back-edge, staying inside the loop.
    fn step_iteration_targets(&self, node: &SourceCfgNode) -> Vec<(SourceCfgNode, u32)>;

    fn function(&self, fidx: u32) -> Option<FunctionInfo>;

    fn global(&self, index: u32) -> Option<GlobalInfo>;

    /// Every mapped location on one source line, used to snap a requested
    /// breakpoint position to the closest real column.
    fn locations_on_line(&self, source: &str, linenr: u32) -> Vec<SourceCodeLocation>;
}

/// Resolves `address` to exactly one node. More than one simultaneous match
/// is an ambiguous mapping and is never guessed away.
pub fn single_node_from_address(
    model: &dyn SourceModel,
    address: u32,
) -> Result<Option<SourceCfgNode>> {
    let mut nodes = model.nodes_from_address(address);
    match nodes.len() {
        0 => Ok(None),
        1 => Ok(Some(nodes.remove(0))),
        count => Err(DebuggerError::AmbiguousLocation { address, count }),
    }
}
