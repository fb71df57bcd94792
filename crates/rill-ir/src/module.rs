//! Module storage: regions, blocks, values, and the mutation API.
//!
//! All operand rewiring goes through [`Module`] methods so value use-chains
//! stay consistent. Handles into the arenas remain stable across erasure.

use crate::arena::{Arena, Handle};
use crate::op::{self, OpKind, Operation};
use crate::types::Type;

/// How a value came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueDef {
    OpResult { op: Handle<Operation>, index: u32 },
    BlockArg { block: Handle<Block>, index: u32 },
}

/// An operand slot on an operation; one entry in a value's use list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpOperand {
    pub op: Handle<Operation>,
    pub index: usize,
}

/// An SSA value: an operation result or a block argument.
#[derive(Clone, Debug)]
pub struct Value {
    pub ty: Type,
    pub def: ValueDef,
    pub uses: Vec<OpOperand>,
}

/// An ordered sequence of operations ending in a terminator.
#[derive(Clone, Debug)]
pub struct Block {
    pub args: Vec<Handle<Value>>,
    pub ops: Vec<Handle<Operation>>,
    pub region: Handle<Region>,
}

/// A list of blocks owned by an operation (or by the module body).
#[derive(Clone, Debug)]
pub struct Region {
    pub blocks: Vec<Handle<Block>>,
    pub parent: Option<Handle<Operation>>,
}

/// A position between two operations in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertPoint {
    pub block: Handle<Block>,
    pub index: usize,
}

/// A full IR module: arena storage plus a body region.
#[derive(Clone, Debug)]
pub struct Module {
    pub ops: Arena<Operation>,
    pub values: Arena<Value>,
    pub blocks: Arena<Block>,
    pub regions: Arena<Region>,
    /// The top-level region; its first block is the entry block.
    pub body: Handle<Region>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    /// Creates a module with an empty entry block.
    pub fn new() -> Self {
        let mut regions = Arena::new();
        let mut blocks = Arena::new();
        let body = regions.append(Region {
            blocks: Vec::new(),
            parent: None,
        });
        let entry = blocks.append(Block {
            args: Vec::new(),
            ops: Vec::new(),
            region: body,
        });
        regions[body].blocks.push(entry);
        Self {
            ops: Arena::new(),
            values: Arena::new(),
            blocks,
            regions,
            body,
        }
    }

    /// The entry block of the module body.
    pub fn entry_block(&self) -> Handle<Block> {
        self.regions[self.body].blocks[0]
    }

    /// Appends a fresh region owned by `parent`.
    pub fn new_region(&mut self, parent: Option<Handle<Operation>>) -> Handle<Region> {
        self.regions.append(Region {
            blocks: Vec::new(),
            parent,
        })
    }

    /// Appends a fresh empty block to `region`.
    pub fn new_block(&mut self, region: Handle<Region>) -> Handle<Block> {
        let block = self.blocks.append(Block {
            args: Vec::new(),
            ops: Vec::new(),
            region,
        });
        self.regions[region].blocks.push(block);
        block
    }

    /// Appends a typed argument to `block`.
    pub fn add_block_arg(&mut self, block: Handle<Block>, ty: Type) -> Handle<Value> {
        let index = self.blocks[block].args.len() as u32;
        let value = self.values.append(Value {
            ty,
            def: ValueDef::BlockArg { block, index },
            uses: Vec::new(),
        });
        self.blocks[block].args.push(value);
        value
    }

    // -- insertion points -------------------------------------------------

    pub fn ip_before(&self, op: Handle<Operation>) -> InsertPoint {
        let (block, index) = self.position(op);
        InsertPoint { block, index }
    }

    pub fn ip_after(&self, op: Handle<Operation>) -> InsertPoint {
        let (block, index) = self.position(op);
        InsertPoint {
            block,
            index: index + 1,
        }
    }

    pub fn ip_start(&self, block: Handle<Block>) -> InsertPoint {
        InsertPoint { block, index: 0 }
    }

    pub fn ip_end(&self, block: Handle<Block>) -> InsertPoint {
        InsertPoint {
            block,
            index: self.blocks[block].ops.len(),
        }
    }

    // -- operation lifecycle ----------------------------------------------

    /// Installs a detached operation record at `ip`, creating its result
    /// values and linking operand uses.
    pub fn insert_op(
        &mut self,
        mut data: Operation,
        result_tys: &[Type],
        ip: InsertPoint,
    ) -> Handle<Operation> {
        if data.tied.is_empty() {
            data.tied = op::default_ties(data.kind);
        }
        debug_assert!(data.results.is_empty());
        let operands = data.operands.clone();
        let handle = self.ops.append(data);
        for (i, &ty) in result_tys.iter().enumerate() {
            let value = self.values.append(Value {
                ty,
                def: ValueDef::OpResult {
                    op: handle,
                    index: i as u32,
                },
                uses: Vec::new(),
            });
            self.ops[handle].results.push(value);
        }
        for (i, &v) in operands.iter().enumerate() {
            self.values[v].uses.push(OpOperand {
                op: handle,
                index: i,
            });
        }
        self.blocks[ip.block].ops.insert(ip.index, handle);
        self.ops[handle].block = Some(ip.block);
        handle
    }

    /// Erases an operation. All result uses must already be rerouted;
    /// nested regions are erased recursively.
    pub fn erase_op(&mut self, op: Handle<Operation>) {
        for &result in &self.ops[op].results {
            assert!(
                self.values[result].uses.is_empty(),
                "erasing {} with live uses",
                self.ops[op].kind.name()
            );
        }
        for region in self.ops[op].regions.clone() {
            self.erase_region(region);
        }
        for (i, v) in self.ops[op].operands.clone().into_iter().enumerate() {
            self.unlink_use(v, op, i);
        }
        for result in self.ops[op].results.clone() {
            self.values.remove(result);
        }
        if let Some(block) = self.ops[op].block {
            self.blocks[block].ops.retain(|&o| o != op);
        }
        self.ops.remove(op);
    }

    fn erase_region(&mut self, region: Handle<Region>) {
        for block in self.regions[region].blocks.clone() {
            // Reverse order: an op's results are only used by later ops.
            for op in self.blocks[block].ops.clone().into_iter().rev() {
                self.erase_op(op);
            }
            for arg in self.blocks[block].args.clone() {
                assert!(self.values[arg].uses.is_empty());
                self.values.remove(arg);
            }
            self.blocks.remove(block);
        }
        self.regions.remove(region);
    }

    /// Shallow-clones a region-less operation at `ip`, reusing its operands.
    pub fn clone_op(&mut self, op: Handle<Operation>, ip: InsertPoint) -> Handle<Operation> {
        let source = &self.ops[op];
        debug_assert!(source.regions.is_empty(), "clone_op is shallow");
        let result_tys: Vec<Type> = source
            .results
            .iter()
            .map(|&r| self.values[r].ty)
            .collect();
        let mut data = source.clone();
        data.results.clear();
        data.block = None;
        self.insert_op(data, &result_tys, ip)
    }

    // -- use-chain maintenance --------------------------------------------

    fn unlink_use(&mut self, value: Handle<Value>, op: Handle<Operation>, index: usize) {
        let uses = &mut self.values[value].uses;
        let pos = uses
            .iter()
            .position(|u| u.op == op && u.index == index)
            .expect("use-chain out of sync");
        uses.swap_remove(pos);
    }

    /// Reassigns operand `index` of `op` to `value`.
    pub fn set_operand(&mut self, op: Handle<Operation>, index: usize, value: Handle<Value>) {
        let old = self.ops[op].operands[index];
        if old == value {
            return;
        }
        self.unlink_use(old, op, index);
        self.ops[op].operands[index] = value;
        self.values[value].uses.push(OpOperand { op, index });
    }

    /// Removes operand `index` of `op`, shifting later slots down.
    ///
    /// The caller is responsible for updating `segments`.
    pub fn remove_operand(&mut self, op: Handle<Operation>, index: usize) {
        let value = self.ops[op].operands[index];
        self.unlink_use(value, op, index);
        self.ops[op].operands.remove(index);
        for (i, v) in self.ops[op].operands.clone().into_iter().enumerate().skip(index) {
            let uses = &mut self.values[v].uses;
            let u = uses
                .iter_mut()
                .find(|u| u.op == op && u.index == i + 1)
                .expect("use-chain out of sync");
            u.index = i;
        }
    }

    /// Inserts `value` as operand `index` of `op`, shifting later slots up.
    ///
    /// The caller is responsible for updating `segments`.
    pub fn insert_operand(&mut self, op: Handle<Operation>, index: usize, value: Handle<Value>) {
        for (i, v) in self.ops[op].operands.clone().into_iter().enumerate().skip(index) {
            let uses = &mut self.values[v].uses;
            let u = uses
                .iter_mut()
                .find(|u| u.op == op && u.index == i)
                .expect("use-chain out of sync");
            u.index = i + 1;
        }
        self.ops[op].operands.insert(index, value);
        self.values[value].uses.push(OpOperand { op, index });
    }

    /// Replaces the whole operand list of `op`, relinking use-chains.
    pub fn set_operands(&mut self, op: Handle<Operation>, operands: Vec<Handle<Value>>) {
        for (i, v) in self.ops[op].operands.clone().into_iter().enumerate() {
            self.unlink_use(v, op, i);
        }
        for (i, &v) in operands.iter().enumerate() {
            self.values[v].uses.push(OpOperand { op, index: i });
        }
        self.ops[op].operands = operands;
    }

    /// Redirects every use of `old` to `new`. Total and atomic over the use
    /// set.
    pub fn replace_all_uses_with(&mut self, old: Handle<Value>, new: Handle<Value>) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.values[old].uses);
        for u in &uses {
            self.ops[u.op].operands[u.index] = new;
        }
        self.values[new].uses.extend(uses);
    }

    /// Redirects uses of `old` to `new`, leaving uses by `except` in place.
    pub fn replace_all_uses_except(
        &mut self,
        old: Handle<Value>,
        new: Handle<Value>,
        except: &[Handle<Operation>],
    ) {
        if old == new {
            return;
        }
        let all = std::mem::take(&mut self.values[old].uses);
        let (kept, moved): (Vec<_>, Vec<_>) = all.into_iter().partition(|u| except.contains(&u.op));
        for u in &moved {
            self.ops[u.op].operands[u.index] = new;
        }
        self.values[old].uses = kept;
        self.values[new].uses.extend(moved);
    }

    /// Drops result `index` of `op`. The result must be unused.
    pub fn erase_result(&mut self, op: Handle<Operation>, index: usize) {
        let value = self.ops[op].results[index];
        assert!(self.values[value].uses.is_empty());
        self.values.remove(value);
        self.ops[op].results.remove(index);
        for (i, r) in self.ops[op].results.clone().into_iter().enumerate().skip(index) {
            self.values[r].def = ValueDef::OpResult {
                op,
                index: i as u32,
            };
        }
        if self.ops[op].tied.len() > index {
            self.ops[op].tied.remove(index);
        }
    }

    /// Drops argument `index` of `block`. The argument must be unused.
    pub fn erase_block_arg(&mut self, block: Handle<Block>, index: usize) {
        let value = self.blocks[block].args[index];
        assert!(self.values[value].uses.is_empty());
        self.values.remove(value);
        self.blocks[block].args.remove(index);
        for (i, a) in self.blocks[block].args.clone().into_iter().enumerate().skip(index) {
            self.values[a].def = ValueDef::BlockArg {
                block,
                index: i as u32,
            };
        }
    }

    // -- movement and position --------------------------------------------

    fn position(&self, op: Handle<Operation>) -> (Handle<Block>, usize) {
        let block = self.ops[op].block.expect("op is detached");
        let index = self.blocks[block]
            .ops
            .iter()
            .position(|&o| o == op)
            .expect("op not in its block");
        (block, index)
    }

    /// Moves `op` immediately before `target` (possibly across blocks).
    pub fn move_before(&mut self, op: Handle<Operation>, target: Handle<Operation>) {
        let ip = self.ip_before(target);
        self.move_to(op, ip);
    }

    /// Moves `op` to `ip`.
    pub fn move_to(&mut self, op: Handle<Operation>, ip: InsertPoint) {
        let (from_block, from_index) = self.position(op);
        self.blocks[from_block].ops.remove(from_index);
        let mut index = ip.index;
        if from_block == ip.block && from_index < index {
            index -= 1;
        }
        self.blocks[ip.block].ops.insert(index, op);
        self.ops[op].block = Some(ip.block);
    }

    /// Returns `true` if `a` precedes `b` within their (shared) block.
    pub fn is_before_in_block(&self, a: Handle<Operation>, b: Handle<Operation>) -> bool {
        let (block_a, index_a) = self.position(a);
        let (block_b, index_b) = self.position(b);
        debug_assert_eq!(block_a, block_b);
        index_a < index_b
    }

    /// The terminator of `block`, if the block is non-empty and terminated.
    pub fn terminator(&self, block: Handle<Block>) -> Option<Handle<Operation>> {
        let &last = self.blocks[block].ops.last()?;
        self.ops[last].kind.is_terminator().then_some(last)
    }

    // -- navigation --------------------------------------------------------

    /// The operation that owns the region `op`'s block belongs to.
    pub fn parent_op(&self, op: Handle<Operation>) -> Option<Handle<Operation>> {
        let block = self.ops[op].block?;
        self.regions[self.blocks[block].region].parent
    }

    /// The nearest enclosing execution region op, if any.
    pub fn parent_execute_op(&self, op: Handle<Operation>) -> Option<Handle<Operation>> {
        let mut current = self.parent_op(op);
        while let Some(parent) = current {
            if matches!(
                self.ops[parent].kind,
                OpKind::AsyncExecute | OpKind::CmdExecute
            ) {
                return Some(parent);
            }
            current = self.parent_op(parent);
        }
        None
    }

    /// The op defining `value`, when it is an op result.
    pub fn defining_op(&self, value: Handle<Value>) -> Option<Handle<Operation>> {
        match self.values[value].def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// The kind of the op defining `value`, when it is an op result.
    pub fn defining_kind(&self, value: Handle<Value>) -> Option<OpKind> {
        self.defining_op(value).map(|op| self.ops[op].kind)
    }

    pub fn value_ty(&self, value: Handle<Value>) -> Type {
        self.values[value].ty
    }

    pub fn has_uses(&self, value: Handle<Value>) -> bool {
        !self.values[value].uses.is_empty()
    }

    pub fn uses(&self, value: Handle<Value>) -> &[OpOperand] {
        &self.values[value].uses
    }

    /// Unique user operations of `value`, in deterministic (position) order.
    pub fn users(&self, value: Handle<Value>) -> Vec<Handle<Operation>> {
        let mut users: Vec<Handle<Operation>> = Vec::new();
        for u in &self.values[value].uses {
            if !users.contains(&u.op) {
                users.push(u.op);
            }
        }
        users.sort_by_key(|&op| self.position(op));
        users
    }

    /// `true` if no result of `op` has uses.
    pub fn all_results_unused(&self, op: Handle<Operation>) -> bool {
        self.ops[op]
            .results
            .iter()
            .all(|&r| self.values[r].uses.is_empty())
    }

    // -- size-aware interface ---------------------------------------------

    /// The size operand bounding result `index` of `op`.
    pub fn result_size(&self, op: Handle<Operation>, index: usize) -> Option<Handle<Value>> {
        op::result_size_slot(&self.ops[op], index)
    }

    /// Resolves the size value associated with a resource-typed `value`.
    ///
    /// Looks through the defining op's size-aware interface, through
    /// execution-region captures for block arguments, and finally through a
    /// `resource.size` user of the value.
    pub fn find_size_value(&self, value: Handle<Value>) -> Option<Handle<Value>> {
        let direct = match self.values[value].def {
            ValueDef::OpResult { op, index } => self.result_size(op, index as usize),
            ValueDef::BlockArg { block, index } => {
                let parent = self.regions[self.blocks[block].region].parent;
                parent.and_then(|parent| {
                    let parent = &self.ops[parent];
                    match parent.kind {
                        OpKind::AsyncExecute | OpKind::CmdExecute => {
                            parent.captured_operand_sizes().get(index as usize).copied()
                        }
                        _ => None,
                    }
                })
            }
        };
        direct.or_else(|| {
            self.values[value]
                .uses
                .iter()
                .find(|u| self.ops[u.op].kind == OpKind::ResourceSize)
                .map(|u| self.ops[u.op].results[0])
        })
    }

    // -- traversal ---------------------------------------------------------

    /// Collects every op in `region` (nested regions included), parents
    /// before children, block order preserved.
    pub fn collect_ops(&self, region: Handle<Region>, out: &mut Vec<Handle<Operation>>) {
        for &block in &self.regions[region].blocks {
            for &op in &self.blocks[block].ops {
                out.push(op);
                for &nested in &self.ops[op].regions {
                    self.collect_ops(nested, out);
                }
            }
        }
    }
}
