//! Transactional mutation API handed to rewrite patterns.
//!
//! Every mutation is recorded so the driver can re-enqueue affected
//! operations. Multi-step in-place edits are bracketed by
//! `start_root_update`/`finalize_root_update`, with `cancel_root_update`
//! restoring the operation record (including use-chains) on abort.

use rill_ir::{
    Affinity, Attr, Block, Builder, Handle, InsertPoint, Lifetime, Literal, Module, OpKind,
    Operation, Value,
};

/// A pattern declined to rewrite. Expected; drives the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchFailure;

/// Two-valued status returned by `match_and_rewrite`.
pub type RewriteResult = Result<(), MatchFailure>;

struct Snapshot {
    op: Handle<Operation>,
    operands: Vec<Handle<Value>>,
    tied: Vec<Option<u32>>,
    segments: Vec<u32>,
    attr: Option<Attr>,
    affinity: Option<Affinity>,
    source_affinity: Option<Affinity>,
}

/// Mutation notes handed back to the driver after a pattern commits.
#[derive(Default)]
pub(crate) struct RewriteNotes {
    /// Created or mutated ops.
    pub touched: Vec<Handle<Operation>>,
    /// Defining ops of operands of erased ops (may now be dead).
    pub orphaned: Vec<Handle<Operation>>,
}

/// The mutation API available to patterns.
pub struct Rewriter<'m> {
    module: &'m mut Module,
    ip: InsertPoint,
    notes: RewriteNotes,
    snapshot: Option<Snapshot>,
}

impl<'m> Rewriter<'m> {
    pub(crate) fn new(module: &'m mut Module, root: Handle<Operation>) -> Self {
        let ip = module.ip_before(root);
        Self {
            module,
            ip,
            notes: RewriteNotes::default(),
            snapshot: None,
        }
    }

    pub(crate) fn into_notes(self) -> RewriteNotes {
        debug_assert!(self.snapshot.is_none(), "unfinished root update");
        self.notes
    }

    /// Read-only view of the module under rewrite.
    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn op(&self, op: Handle<Operation>) -> &Operation {
        &self.module.ops[op]
    }

    /// Declines a match with a reason for trace logs.
    pub fn notify_match_failure(&self, op: Handle<Operation>, reason: &str) -> MatchFailure {
        log::trace!("match failure on {}: {reason}", self.module.ops[op].kind.name());
        MatchFailure
    }

    // -- insertion points --------------------------------------------------

    pub fn set_insertion_point_before(&mut self, op: Handle<Operation>) {
        self.ip = self.module.ip_before(op);
    }

    pub fn set_insertion_point_after(&mut self, op: Handle<Operation>) {
        self.ip = self.module.ip_after(op);
    }

    pub fn set_insertion_point_to_start(&mut self, block: Handle<Block>) {
        self.ip = self.module.ip_start(block);
    }

    /// Points immediately before the enclosing execution region op, where
    /// new index arithmetic must live to satisfy regional capture rules.
    pub fn set_insertion_point_to_parent_execution_scope(&mut self, op: Handle<Operation>) {
        let parent = self
            .module
            .parent_execute_op(op)
            .expect("op must be nested within an execution region");
        self.ip = self.module.ip_before(parent);
    }

    // -- op creation -------------------------------------------------------

    fn note_new(&mut self, value: Handle<Value>) -> Handle<Value> {
        let op = self.module.defining_op(value).expect("fresh op result");
        self.notes.touched.push(op);
        value
    }

    pub fn const_index(&mut self, value: i64) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.const_index(value);
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn const_literal(&mut self, literal: Literal) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.const_literal(literal);
        self.ip = b.ip();
        self.note_new(v)
    }

    fn const_of(&self, value: Handle<Value>) -> Option<i64> {
        let op = self.module.defining_op(value)?;
        let data = &self.module.ops[op];
        if data.kind != OpKind::Constant {
            return None;
        }
        data.attr.as_ref()?.as_literal()?.as_index()
    }

    /// Create-or-fold index addition: constant operands collapse into one
    /// constant instead of an `add` op.
    pub fn add_index(&mut self, lhs: Handle<Value>, rhs: Handle<Value>) -> Handle<Value> {
        if self.const_of(lhs) == Some(0) {
            return rhs;
        }
        if self.const_of(rhs) == Some(0) {
            return lhs;
        }
        if let (Some(a), Some(b)) = (self.const_of(lhs), self.const_of(rhs)) {
            return self.const_index(a + b);
        }
        let mut b = Builder::new(self.module, self.ip);
        let v = b.add(lhs, rhs);
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn subview(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        result_size: Handle<Value>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.subview(source, source_size, source_offset, result_size);
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn tensor_splat(
        &mut self,
        value: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.tensor_splat(value, result_size, lifetime);
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn async_transfer(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        result_lifetime: Lifetime,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_transfer(source, source_size, result_lifetime);
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn async_splat(
        &mut self,
        value: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_splat(value, result_size, lifetime);
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    pub fn async_clone(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_clone(source, source_size, result_size, lifetime);
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    pub fn async_slice(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        source_end: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_slice(source, source_size, source_offset, source_end, result_size, lifetime);
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    pub fn async_fill(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
        value: Handle<Value>,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_fill(target, target_size, target_offset, target_length, value);
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    pub fn async_update(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_end: Handle<Value>,
        update: Handle<Value>,
        update_size: Handle<Value>,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_update(target, target_size, target_offset, target_end, update, update_size);
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    #[allow(clippy::too_many_arguments)]
    pub fn async_copy(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_end: Handle<Value>,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        source_end: Handle<Value>,
        length: Handle<Value>,
        affinity: Option<Affinity>,
    ) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.async_copy(
            target,
            target_size,
            target_offset,
            target_end,
            source,
            source_size,
            source_offset,
            source_end,
            length,
        );
        self.ip = b.ip();
        let v = self.note_new(v);
        self.set_affinity_of_def(v, affinity);
        v
    }

    pub fn timepoint_immediate(&mut self) -> Handle<Value> {
        let mut b = Builder::new(self.module, self.ip);
        let v = b.timepoint_immediate();
        self.ip = b.ip();
        self.note_new(v)
    }

    pub fn timepoint_await(
        &mut self,
        timepoint: Handle<Value>,
        resources: &[Handle<Value>],
        sizes: &[Handle<Value>],
        affinity: Option<Affinity>,
    ) -> Handle<Operation> {
        let mut b = Builder::new(self.module, self.ip);
        let op = b.timepoint_await(timepoint, resources, sizes);
        self.ip = b.ip();
        self.module.ops[op].affinity = affinity;
        self.notes.touched.push(op);
        op
    }

    pub fn pack(
        &mut self,
        slice_sizes: &[Handle<Value>],
        offset: Option<Handle<Value>>,
        intervals: &[(i64, i64)],
    ) -> Handle<Operation> {
        let mut b = Builder::new(self.module, self.ip);
        let op = b.pack(slice_sizes, offset, intervals);
        self.ip = b.ip();
        self.notes.touched.push(op);
        op
    }

    fn set_affinity_of_def(&mut self, value: Handle<Value>, affinity: Option<Affinity>) {
        if let Some(op) = self.module.defining_op(value) {
            self.module.ops[op].affinity = affinity;
        }
    }

    /// Size-aware query: resolves the size of `value`, creating a
    /// `resource.size` op at the insertion point when none is discoverable.
    pub fn query_value_size(&mut self, value: Handle<Value>) -> Handle<Value> {
        if let Some(size) = self.module.find_size_value(value) {
            return size;
        }
        let mut b = Builder::new(self.module, self.ip);
        let v = b.resource_size(value);
        self.ip = b.ip();
        self.note_new(v)
    }

    /// Shallow-clones `source` immediately before `target`.
    pub fn clone_op_before(
        &mut self,
        source: Handle<Operation>,
        target: Handle<Operation>,
    ) -> Handle<Operation> {
        let ip = self.module.ip_before(target);
        let cloned = self.module.clone_op(source, ip);
        self.notes.touched.push(cloned);
        cloned
    }

    // -- replacement and erasure -------------------------------------------

    /// Atomically replaces all results of `op` and erases it.
    pub fn replace_op(&mut self, op: Handle<Operation>, new_values: &[Handle<Value>]) {
        let results = self.module.ops[op].results.clone();
        debug_assert_eq!(results.len(), new_values.len());
        for (&result, &new) in results.iter().zip(new_values) {
            for u in self.module.uses(result) {
                self.notes.touched.push(u.op);
            }
            self.module.replace_all_uses_with(result, new);
        }
        self.erase_op(op);
    }

    /// Erases `op`; all result uses must already be rerouted.
    pub fn erase_op(&mut self, op: Handle<Operation>) {
        for &operand in &self.module.ops[op].operands {
            if let Some(def) = self.module.defining_op(operand) {
                self.notes.orphaned.push(def);
            }
        }
        self.module.erase_op(op);
        self.notes.touched.retain(|&t| t != op);
        self.notes.orphaned.retain(|&t| t != op);
    }

    pub fn replace_all_uses_with(&mut self, old: Handle<Value>, new: Handle<Value>) {
        for u in self.module.uses(old) {
            self.notes.touched.push(u.op);
        }
        self.module.replace_all_uses_with(old, new);
    }

    pub fn replace_all_uses_except(
        &mut self,
        old: Handle<Value>,
        new: Handle<Value>,
        except: &[Handle<Operation>],
    ) {
        for u in self.module.uses(old) {
            if !except.contains(&u.op) {
                self.notes.touched.push(u.op);
            }
        }
        self.module.replace_all_uses_except(old, new, except);
    }

    // -- in-place mutation -------------------------------------------------

    /// Runs a closure of mutations against `op` and records it as changed.
    pub fn update_in_place(&mut self, op: Handle<Operation>, f: impl FnOnce(&mut Self)) {
        f(self);
        self.notes.touched.push(op);
    }

    /// Begins a multi-step in-place mutation of `op`.
    pub fn start_root_update(&mut self, op: Handle<Operation>) {
        debug_assert!(self.snapshot.is_none(), "nested root update");
        let data = &self.module.ops[op];
        self.snapshot = Some(Snapshot {
            op,
            operands: data.operands.clone(),
            tied: data.tied.clone(),
            segments: data.segments.clone(),
            attr: data.attr.clone(),
            affinity: data.affinity,
            source_affinity: data.source_affinity,
        });
    }

    /// Commits the pending root update.
    pub fn finalize_root_update(&mut self, op: Handle<Operation>) {
        let snapshot = self.snapshot.take().expect("no root update in progress");
        debug_assert_eq!(snapshot.op, op);
        self.notes.touched.push(op);
    }

    /// Rolls the pending root update back.
    pub fn cancel_root_update(&mut self, op: Handle<Operation>) {
        let snapshot = self.snapshot.take().expect("no root update in progress");
        debug_assert_eq!(snapshot.op, op);
        self.module.set_operands(op, snapshot.operands);
        let data = &mut self.module.ops[op];
        data.tied = snapshot.tied;
        data.segments = snapshot.segments;
        data.attr = snapshot.attr;
        data.affinity = snapshot.affinity;
        data.source_affinity = snapshot.source_affinity;
    }

    pub fn set_operand(&mut self, op: Handle<Operation>, index: usize, value: Handle<Value>) {
        self.module.set_operand(op, index, value);
        self.notes.touched.push(op);
    }

    pub fn remove_operand(&mut self, op: Handle<Operation>, index: usize) {
        self.module.remove_operand(op, index);
        self.notes.touched.push(op);
    }

    pub fn insert_operand(&mut self, op: Handle<Operation>, index: usize, value: Handle<Value>) {
        self.module.insert_operand(op, index, value);
        self.notes.touched.push(op);
    }

    pub fn set_segments(&mut self, op: Handle<Operation>, segments: Vec<u32>) {
        self.module.ops[op].segments = segments;
        self.notes.touched.push(op);
    }

    pub fn set_tied_result(&mut self, op: Handle<Operation>, index: usize, operand: Option<u32>) {
        self.module.ops[op].set_tied_result(index, operand);
        self.notes.touched.push(op);
    }

    pub fn set_affinity(&mut self, op: Handle<Operation>, affinity: Option<Affinity>) {
        self.module.ops[op].affinity = affinity;
        self.notes.touched.push(op);
    }

    /// Drops result `index` of `op` (must be unused).
    pub fn erase_result(&mut self, op: Handle<Operation>, index: usize) {
        self.module.erase_result(op, index);
        self.notes.touched.push(op);
    }

    /// Drops argument `index` of `block` (must be unused).
    pub fn erase_block_arg(&mut self, block: Handle<Block>, index: usize) {
        self.module.erase_block_arg(block, index);
    }

    // -- movement ----------------------------------------------------------

    pub fn move_before(&mut self, op: Handle<Operation>, target: Handle<Operation>) {
        self.module.move_before(op, target);
        self.notes.touched.push(op);
    }
}
