//! Operation records and the per-kind capability registry.
//!
//! Operations hold uniform operand/result lists; the meaning of each slot is
//! fixed per [`OpKind`]. Variadic operand groups (awaits, captured operands,
//! size lists) are described by `segments`, a list of group lengths laid out
//! in operand order.

use crate::arena::Handle;
use crate::attr::{Affinity, Attr};
use crate::module::{Block, Region, Value};

/// An opaque source location.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Loc(pub u32);

impl Loc {
    pub const UNKNOWN: Loc = Loc(0);
}

/// The kind tag of an operation.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum OpKind {
    /// `const` — literal constant (attr payload).
    Constant,
    /// `add` — index addition, used when folding offsets.
    Add,
    ResourceSubview,
    ResourceLoad,
    ResourceStore,
    ResourceSize,
    ResourcePack,
    TensorConstant,
    TensorSplat,
    TensorClone,
    AsyncConstant,
    AsyncSplat,
    AsyncClone,
    AsyncSlice,
    AsyncFill,
    AsyncUpdate,
    AsyncCopy,
    AsyncTransfer,
    AsyncDispatch,
    AsyncExecute,
    CmdFlush,
    CmdInvalidate,
    CmdDiscard,
    CmdFill,
    CmdCopy,
    CmdDispatch,
    CmdExecute,
    CmdSerial,
    CmdConcurrent,
    TimepointImmediate,
    TimepointJoin,
    TimepointAwait,
    /// Region terminator.
    Yield,
    /// Branch to one or more successor blocks. Which successor is taken is
    /// a runtime matter; canonicalization only needs the CFG edges.
    Branch,
    /// Body terminator; operands are the live-out values.
    Return,
}

impl OpKind {
    /// Every kind, in registration order.
    pub const ALL: [OpKind; 35] = [
        OpKind::Constant,
        OpKind::Add,
        OpKind::ResourceSubview,
        OpKind::ResourceLoad,
        OpKind::ResourceStore,
        OpKind::ResourceSize,
        OpKind::ResourcePack,
        OpKind::TensorConstant,
        OpKind::TensorSplat,
        OpKind::TensorClone,
        OpKind::AsyncConstant,
        OpKind::AsyncSplat,
        OpKind::AsyncClone,
        OpKind::AsyncSlice,
        OpKind::AsyncFill,
        OpKind::AsyncUpdate,
        OpKind::AsyncCopy,
        OpKind::AsyncTransfer,
        OpKind::AsyncDispatch,
        OpKind::AsyncExecute,
        OpKind::CmdFlush,
        OpKind::CmdInvalidate,
        OpKind::CmdDiscard,
        OpKind::CmdFill,
        OpKind::CmdCopy,
        OpKind::CmdDispatch,
        OpKind::CmdExecute,
        OpKind::CmdSerial,
        OpKind::CmdConcurrent,
        OpKind::TimepointImmediate,
        OpKind::TimepointJoin,
        OpKind::TimepointAwait,
        OpKind::Yield,
        OpKind::Branch,
        OpKind::Return,
    ];

    /// Dialect-style printable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Constant => "const",
            Self::Add => "add",
            Self::ResourceSubview => "resource.subview",
            Self::ResourceLoad => "resource.load",
            Self::ResourceStore => "resource.store",
            Self::ResourceSize => "resource.size",
            Self::ResourcePack => "resource.pack",
            Self::TensorConstant => "tensor.constant",
            Self::TensorSplat => "tensor.splat",
            Self::TensorClone => "tensor.clone",
            Self::AsyncConstant => "async.constant",
            Self::AsyncSplat => "async.splat",
            Self::AsyncClone => "async.clone",
            Self::AsyncSlice => "async.slice",
            Self::AsyncFill => "async.fill",
            Self::AsyncUpdate => "async.update",
            Self::AsyncCopy => "async.copy",
            Self::AsyncTransfer => "async.transfer",
            Self::AsyncDispatch => "async.dispatch",
            Self::AsyncExecute => "async.execute",
            Self::CmdFlush => "cmd.flush",
            Self::CmdInvalidate => "cmd.invalidate",
            Self::CmdDiscard => "cmd.discard",
            Self::CmdFill => "cmd.fill",
            Self::CmdCopy => "cmd.copy",
            Self::CmdDispatch => "cmd.dispatch",
            Self::CmdExecute => "cmd.execute",
            Self::CmdSerial => "cmd.serial",
            Self::CmdConcurrent => "cmd.concurrent",
            Self::TimepointImmediate => "timepoint.immediate",
            Self::TimepointJoin => "timepoint.join",
            Self::TimepointAwait => "timepoint.await",
            Self::Yield => "yield",
            Self::Branch => "br",
            Self::Return => "return",
        }
    }

    /// Terminators are last in their block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Yield | Self::Branch | Self::Return)
    }

    /// Constant-like ops provide an attribute to operand folding.
    pub fn is_constant_like(self) -> bool {
        matches!(self, Self::Constant | Self::TimepointImmediate)
    }

    /// Ops the driver may erase outright once all results are unused.
    ///
    /// These are logically pure but intentionally not CSE-mergeable: every
    /// use needs its own physical resource, so deduplication is left to the
    /// dedicated patterns.
    pub fn elide_when_unused(self) -> bool {
        matches!(
            self,
            Self::Constant
                | Self::Add
                | Self::ResourceSubview
                | Self::ResourceLoad
                | Self::ResourceStore
                | Self::ResourceSize
                | Self::TensorSplat
                | Self::AsyncConstant
                | Self::AsyncSplat
                | Self::AsyncClone
                | Self::AsyncSlice
                | Self::AsyncFill
                | Self::AsyncUpdate
                | Self::AsyncCopy
                | Self::AsyncTransfer
                | Self::AsyncDispatch
                | Self::AsyncExecute
                | Self::CmdExecute
                | Self::TimepointImmediate
                | Self::TimepointAwait
        )
    }

    /// Streamable interface: producers that are cheaper to re-run next to
    /// each consumer than to keep live across one.
    pub fn prefers_clone_to_consumers(self) -> bool {
        matches!(self, Self::AsyncSplat | Self::AsyncConstant)
    }

    /// Number of nested regions the kind carries.
    pub fn num_regions(self) -> usize {
        match self {
            Self::AsyncExecute | Self::CmdExecute | Self::CmdSerial | Self::CmdConcurrent => 1,
            _ => 0,
        }
    }
}

/// An operation: a node in the IR graph.
#[derive(Clone, Debug)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<Handle<Value>>,
    pub results: Vec<Handle<Value>>,
    /// Kind-specific payload (constant value, dense elements, symbol).
    pub attr: Option<Attr>,
    /// Placement of the op (for transfers: the result side).
    pub affinity: Option<Affinity>,
    /// Source placement, transfers only.
    pub source_affinity: Option<Affinity>,
    /// Per-result tie: the operand a result overwrites.
    ///
    /// For `async.execute`/`cmd.execute` entries are captured-operand
    /// indices (relative to the operand group after the awaits); for all
    /// other kinds they are absolute operand indices.
    pub tied: Vec<Option<u32>>,
    /// Variadic operand group lengths, in operand order.
    pub segments: Vec<u32>,
    /// Successor blocks of a CFG terminator.
    pub successors: Vec<Handle<Block>>,
    pub regions: Vec<Handle<Region>>,
    /// Containing block; `None` only while detached during construction.
    pub block: Option<Handle<Block>>,
    pub loc: Loc,
}

impl Operation {
    /// Creates a detached operation record with no operands or results.
    pub fn new(kind: OpKind, loc: Loc) -> Self {
        Self {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            attr: None,
            affinity: None,
            source_affinity: None,
            tied: Vec::new(),
            segments: Vec::new(),
            successors: Vec::new(),
            regions: Vec::new(),
            block: None,
            loc,
        }
    }

    pub fn operand(&self, index: usize) -> Handle<Value> {
        self.operands[index]
    }

    pub fn result(&self, index: usize) -> Handle<Value> {
        self.results[index]
    }

    /// Returns the slot range of variadic operand group `group`.
    pub fn segment_range(&self, group: usize) -> std::ops::Range<usize> {
        let start: usize = self.segments[..group].iter().map(|&n| n as usize).sum();
        start..start + self.segments[group] as usize
    }

    /// Returns the operands of variadic group `group`.
    pub fn segment(&self, group: usize) -> &[Handle<Value>] {
        &self.operands[self.segment_range(group)]
    }

    /// Await timepoints of an execution region op.
    pub fn await_timepoints(&self) -> &[Handle<Value>] {
        debug_assert!(matches!(self.kind, OpKind::AsyncExecute | OpKind::CmdExecute));
        self.segment(0)
    }

    /// Captured operands of an execution region op.
    pub fn captured_operands(&self) -> &[Handle<Value>] {
        debug_assert!(matches!(self.kind, OpKind::AsyncExecute | OpKind::CmdExecute));
        self.segment(1)
    }

    /// Sizes of the captured operands of an execution region op.
    pub fn captured_operand_sizes(&self) -> &[Handle<Value>] {
        debug_assert!(matches!(self.kind, OpKind::AsyncExecute | OpKind::CmdExecute));
        self.segment(2)
    }

    /// The timepoint produced by an execution region op.
    pub fn result_timepoint(&self) -> Handle<Value> {
        debug_assert!(matches!(self.kind, OpKind::AsyncExecute | OpKind::CmdExecute));
        *self.results.last().expect("execute op has a timepoint result")
    }

    /// Resources gated by a `timepoint.await`.
    pub fn awaited_resources(&self) -> &[Handle<Value>] {
        debug_assert_eq!(self.kind, OpKind::TimepointAwait);
        self.segment(1)
    }

    /// Sizes of the resources gated by a `timepoint.await`.
    pub fn awaited_resource_sizes(&self) -> &[Handle<Value>] {
        debug_assert_eq!(self.kind, OpKind::TimepointAwait);
        self.segment(2)
    }

    /// Tied-operand interface: the operand index result `index` overwrites.
    pub fn tied_operand_index(&self, index: usize) -> Option<usize> {
        match self.kind {
            OpKind::TimepointAwait => Some(1 + index),
            OpKind::AsyncExecute | OpKind::CmdExecute => {
                let captured = self.tied.get(index).copied().flatten()?;
                Some(self.segment_range(1).start + captured as usize)
            }
            _ => self.tied.get(index).copied().flatten().map(|i| i as usize),
        }
    }

    /// Tied-operand interface: `true` if some result overwrites operand
    /// `index`.
    pub fn is_operand_tied(&self, index: usize) -> bool {
        (0..self.results.len().max(self.tied.len()))
            .any(|r| self.tied_operand_index(r) == Some(index))
    }

    /// Declares that result `index` overwrites operand `operand` (for
    /// execute ops: captured-operand index).
    pub fn set_tied_result(&mut self, index: usize, operand: Option<u32>) {
        if self.tied.len() <= index {
            self.tied.resize(index + 1, None);
        }
        self.tied[index] = operand;
    }
}

/// Static result→operand ties established at construction time.
pub(crate) fn default_ties(kind: OpKind) -> Vec<Option<u32>> {
    match kind {
        OpKind::ResourceStore
        | OpKind::AsyncFill
        | OpKind::AsyncUpdate
        | OpKind::AsyncCopy => vec![Some(0)],
        _ => Vec::new(),
    }
}

/// Size-aware interface: the operand bounding result `index`, if the kind
/// carries one directly.
///
/// Execute/dispatch/await results are resolved through their size segments;
/// everything else is a fixed slot.
pub(crate) fn result_size_slot(op: &Operation, index: usize) -> Option<Handle<Value>> {
    let slot = match op.kind {
        OpKind::ResourceSubview => 3,
        OpKind::ResourceStore => 1,
        OpKind::TensorConstant | OpKind::AsyncConstant => 0,
        OpKind::TensorSplat | OpKind::AsyncSplat => 1,
        OpKind::TensorClone => 1,
        OpKind::AsyncClone => 2,
        OpKind::AsyncSlice => 4,
        OpKind::AsyncFill | OpKind::AsyncUpdate | OpKind::AsyncCopy => 1,
        OpKind::AsyncTransfer => 1,
        OpKind::AsyncDispatch => return op.segment(2).get(index).copied(),
        OpKind::AsyncExecute => return op.segment(3).get(index).copied(),
        OpKind::TimepointAwait => return op.awaited_resource_sizes().get(index).copied(),
        _ => return None,
    };
    debug_assert_eq!(index, 0);
    op.operands.get(slot).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(OpKind::Yield.is_terminator());
        assert!(OpKind::Branch.is_terminator());
        assert!(!OpKind::AsyncSplat.is_terminator());
        assert!(OpKind::Constant.is_constant_like());
        assert!(OpKind::TimepointImmediate.is_constant_like());
        assert!(OpKind::AsyncSplat.prefers_clone_to_consumers());
        assert!(!OpKind::AsyncClone.prefers_clone_to_consumers());
        assert_eq!(OpKind::AsyncExecute.num_regions(), 1);
        assert_eq!(OpKind::AsyncSplat.num_regions(), 0);
    }

    #[test]
    fn segment_ranges() {
        let mut op = Operation::new(OpKind::AsyncExecute, Loc::UNKNOWN);
        op.segments = vec![2, 3, 3, 1];
        assert_eq!(op.segment_range(0), 0..2);
        assert_eq!(op.segment_range(1), 2..5);
        assert_eq!(op.segment_range(2), 5..8);
        assert_eq!(op.segment_range(3), 8..9);
    }

    #[test]
    fn execute_ties_are_capture_relative() {
        let mut op = Operation::new(OpKind::AsyncExecute, Loc::UNKNOWN);
        op.segments = vec![2, 2, 2, 1];
        op.tied = vec![Some(1)];
        // Result 0 ties the second captured operand: slot 2 (awaits) + 1.
        assert_eq!(op.tied_operand_index(0), Some(3));
        assert!(op.is_operand_tied(3));
        assert!(!op.is_operand_tied(2));
    }

    #[test]
    fn await_results_tie_their_resources() {
        let mut op = Operation::new(OpKind::TimepointAwait, Loc::UNKNOWN);
        op.segments = vec![1, 2, 2];
        assert_eq!(op.tied_operand_index(0), Some(1));
        assert_eq!(op.tied_operand_index(1), Some(2));
        assert!(op.is_operand_tied(1));
        assert!(!op.is_operand_tied(0));
    }
}
