//! Insertion-point builder with typed per-kind constructors.

use crate::arena::Handle;
use crate::attr::Attr;
use crate::module::{Block, InsertPoint, Module, Value};
use crate::op::{Loc, OpKind, Operation};
use crate::types::{Lifetime, Literal, Type};

/// Builds operations at a movable insertion point.
pub struct Builder<'m> {
    module: &'m mut Module,
    ip: InsertPoint,
    loc: Loc,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module, ip: InsertPoint) -> Self {
        Self {
            module,
            ip,
            loc: Loc::UNKNOWN,
        }
    }

    pub fn at_end(module: &'m mut Module, block: Handle<Block>) -> Self {
        let ip = module.ip_end(block);
        Self::new(module, ip)
    }

    pub fn at_start(module: &'m mut Module, block: Handle<Block>) -> Self {
        let ip = module.ip_start(block);
        Self::new(module, ip)
    }

    pub fn before(module: &'m mut Module, op: Handle<Operation>) -> Self {
        let ip = module.ip_before(op);
        Self::new(module, ip)
    }

    /// The insertion point after everything built so far.
    pub fn ip(&self) -> InsertPoint {
        self.ip
    }

    pub fn set_loc(&mut self, loc: Loc) {
        self.loc = loc;
    }

    fn push(&mut self, data: Operation, result_tys: &[Type]) -> Handle<Operation> {
        let op = self.module.insert_op(data, result_tys, self.ip);
        self.ip.index += 1;
        op
    }

    fn simple(
        &mut self,
        kind: OpKind,
        operands: &[Handle<Value>],
        result_tys: &[Type],
    ) -> Handle<Operation> {
        let mut data = Operation::new(kind, self.loc);
        data.operands = operands.to_vec();
        self.push(data, result_tys)
    }

    fn result0(&self, op: Handle<Operation>) -> Handle<Value> {
        self.module.ops[op].results[0]
    }

    /// Result `index` of a previously built multi-result op.
    pub fn result(&self, op: Handle<Operation>, index: usize) -> Handle<Value> {
        self.module.ops[op].results[index]
    }

    // -- constants and arithmetic -----------------------------------------

    pub fn const_literal(&mut self, literal: Literal) -> Handle<Value> {
        let mut data = Operation::new(OpKind::Constant, self.loc);
        data.attr = Some(Attr::Literal(literal));
        let op = self.push(data, &[literal.ty()]);
        self.result0(op)
    }

    pub fn const_index(&mut self, value: i64) -> Handle<Value> {
        self.const_literal(Literal::Index(value))
    }

    pub fn const_f32(&mut self, value: f32) -> Handle<Value> {
        self.const_literal(Literal::F32(value))
    }

    pub fn add(&mut self, lhs: Handle<Value>, rhs: Handle<Value>) -> Handle<Value> {
        let op = self.simple(OpKind::Add, &[lhs, rhs], &[Type::Index]);
        self.result0(op)
    }

    // -- resource ops ------------------------------------------------------

    pub fn subview(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        result_size: Handle<Value>,
    ) -> Handle<Value> {
        let ty = self.module.value_ty(source);
        let op = self.simple(
            OpKind::ResourceSubview,
            &[source, source_size, source_offset, result_size],
            &[ty],
        );
        self.result0(op)
    }

    pub fn load(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        result_ty: Type,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::ResourceLoad,
            &[source, source_size, source_offset],
            &[result_ty],
        );
        self.result0(op)
    }

    pub fn store(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        value: Handle<Value>,
    ) -> Handle<Value> {
        let ty = self.module.value_ty(target);
        let op = self.simple(
            OpKind::ResourceStore,
            &[target, target_size, target_offset, value],
            &[ty],
        );
        self.result0(op)
    }

    pub fn resource_size(&mut self, resource: Handle<Value>) -> Handle<Value> {
        let op = self.simple(OpKind::ResourceSize, &[resource], &[Type::Index]);
        self.result0(op)
    }

    /// `resource.pack`: results are `[total_length, offsets...]`; the
    /// lifetime intervals attribute holds `[start, end]` pairs per slice.
    pub fn pack(
        &mut self,
        slice_sizes: &[Handle<Value>],
        offset: Option<Handle<Value>>,
        intervals: &[(i64, i64)],
    ) -> Handle<Operation> {
        debug_assert_eq!(slice_sizes.len(), intervals.len());
        let mut data = Operation::new(OpKind::ResourcePack, self.loc);
        data.operands = slice_sizes.to_vec();
        data.operands.extend(offset);
        data.segments = vec![slice_sizes.len() as u32, offset.is_some() as u32];
        data.attr = Some(Attr::Dense(
            intervals
                .iter()
                .flat_map(|&(start, end)| [Literal::Index(start), Literal::Index(end)])
                .collect(),
        ));
        let result_tys = vec![Type::Index; 1 + slice_sizes.len()];
        self.push(data, &result_tys)
    }

    // -- tensor ops --------------------------------------------------------

    pub fn tensor_constant(
        &mut self,
        elements: Attr,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let mut data = Operation::new(OpKind::TensorConstant, self.loc);
        data.operands = vec![result_size];
        data.attr = Some(elements);
        let op = self.push(data, &[Type::Resource(lifetime)]);
        self.result0(op)
    }

    pub fn tensor_splat(
        &mut self,
        value: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::TensorSplat,
            &[value, result_size],
            &[Type::Resource(lifetime)],
        );
        self.result0(op)
    }

    pub fn tensor_clone(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
    ) -> Handle<Value> {
        let ty = self.module.value_ty(source);
        let op = self.simple(OpKind::TensorClone, &[source, source_size], &[ty]);
        self.result0(op)
    }

    // -- async ops ---------------------------------------------------------

    pub fn async_constant(
        &mut self,
        elements: Attr,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let mut data = Operation::new(OpKind::AsyncConstant, self.loc);
        data.operands = vec![result_size];
        data.attr = Some(elements);
        let op = self.push(data, &[Type::Resource(lifetime)]);
        self.result0(op)
    }

    pub fn async_splat(
        &mut self,
        value: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::AsyncSplat,
            &[value, result_size],
            &[Type::Resource(lifetime)],
        );
        self.result0(op)
    }

    pub fn async_clone(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::AsyncClone,
            &[source, source_size, result_size],
            &[Type::Resource(lifetime)],
        );
        self.result0(op)
    }

    pub fn async_slice(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        source_end: Handle<Value>,
        result_size: Handle<Value>,
        lifetime: Lifetime,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::AsyncSlice,
            &[source, source_size, source_offset, source_end, result_size],
            &[Type::Resource(lifetime)],
        );
        self.result0(op)
    }

    pub fn async_fill(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
        value: Handle<Value>,
    ) -> Handle<Value> {
        let ty = self.module.value_ty(target);
        let op = self.simple(
            OpKind::AsyncFill,
            &[target, target_size, target_offset, target_length, value],
            &[ty],
        );
        self.result0(op)
    }

    pub fn async_update(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_end: Handle<Value>,
        update: Handle<Value>,
        update_size: Handle<Value>,
    ) -> Handle<Value> {
        let ty = self.module.value_ty(target);
        let op = self.simple(
            OpKind::AsyncUpdate,
            &[target, target_size, target_offset, target_end, update, update_size],
            &[ty],
        );
        self.result0(op)
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
    ) -> Handle<Value> {
        let ty = self.module.value_ty(target);
        let op = self.simple(
            OpKind::AsyncCopy,
            &[
                target,
                target_size,
                target_offset,
                target_end,
                source,
                source_size,
                source_offset,
                source_end,
                length,
            ],
            &[ty],
        );
        self.result0(op)
    }

    pub fn async_transfer(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        result_lifetime: Lifetime,
    ) -> Handle<Value> {
        let op = self.simple(
            OpKind::AsyncTransfer,
            &[source, source_size],
            &[Type::Resource(result_lifetime)],
        );
        self.result0(op)
    }

    /// `async.dispatch`: `args` may mix resources and scalars; `arg_sizes`
    /// bound the resource-typed args in order.
    pub fn async_dispatch(
        &mut self,
        entry_point: &str,
        args: &[Handle<Value>],
        arg_sizes: &[Handle<Value>],
        result_sizes: &[Handle<Value>],
        result_lifetimes: &[Lifetime],
    ) -> Handle<Operation> {
        debug_assert_eq!(result_sizes.len(), result_lifetimes.len());
        let mut data = Operation::new(OpKind::AsyncDispatch, self.loc);
        data.operands = args.to_vec();
        data.operands.extend_from_slice(arg_sizes);
        data.operands.extend_from_slice(result_sizes);
        data.segments = vec![
            args.len() as u32,
            arg_sizes.len() as u32,
            result_sizes.len() as u32,
        ];
        data.attr = Some(Attr::Symbol(entry_point.to_string()));
        let result_tys: Vec<Type> = result_lifetimes
            .iter()
            .map(|&l| Type::Resource(l))
            .collect();
        self.push(data, &result_tys)
    }

    /// `async.execute`: creates the op and a single-block body whose
    /// arguments mirror the captured operands. The caller populates the body
    /// and must terminate it with a `yield` matching the resource results.
    pub fn async_execute(
        &mut self,
        awaits: &[Handle<Value>],
        operands: &[Handle<Value>],
        operand_sizes: &[Handle<Value>],
        result_lifetimes: &[Lifetime],
        result_sizes: &[Handle<Value>],
    ) -> Handle<Operation> {
        debug_assert_eq!(operands.len(), operand_sizes.len());
        debug_assert_eq!(result_lifetimes.len(), result_sizes.len());
        let mut data = Operation::new(OpKind::AsyncExecute, self.loc);
        data.operands = awaits.to_vec();
        data.operands.extend_from_slice(operands);
        data.operands.extend_from_slice(operand_sizes);
        data.operands.extend_from_slice(result_sizes);
        data.segments = vec![
            awaits.len() as u32,
            operands.len() as u32,
            operand_sizes.len() as u32,
            result_sizes.len() as u32,
        ];
        let mut result_tys: Vec<Type> = result_lifetimes
            .iter()
            .map(|&l| Type::Resource(l))
            .collect();
        result_tys.push(Type::Timepoint);
        let op = self.push(data, &result_tys);
        self.attach_body(op, operands);
        op
    }

    /// `cmd.execute`: single timepoint result; body mutates captures.
    pub fn cmd_execute(
        &mut self,
        awaits: &[Handle<Value>],
        operands: &[Handle<Value>],
        operand_sizes: &[Handle<Value>],
    ) -> Handle<Operation> {
        debug_assert_eq!(operands.len(), operand_sizes.len());
        let mut data = Operation::new(OpKind::CmdExecute, self.loc);
        data.operands = awaits.to_vec();
        data.operands.extend_from_slice(operands);
        data.operands.extend_from_slice(operand_sizes);
        data.segments = vec![
            awaits.len() as u32,
            operands.len() as u32,
            operand_sizes.len() as u32,
        ];
        let op = self.push(data, &[Type::Timepoint]);
        self.attach_body(op, operands);
        op
    }

    fn attach_body(&mut self, op: Handle<Operation>, operands: &[Handle<Value>]) {
        let region = self.module.new_region(Some(op));
        let block = self.module.new_block(region);
        for &operand in operands {
            let ty = self.module.value_ty(operand);
            self.module.add_block_arg(block, ty);
        }
        self.module.ops[op].regions.push(region);
    }

    /// Entry block of a region-carrying op's body.
    pub fn body_block(module: &Module, op: Handle<Operation>) -> Handle<Block> {
        module.regions[module.ops[op].regions[0]].blocks[0]
    }

    // -- cmd ops -----------------------------------------------------------

    pub fn cmd_flush(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
    ) -> Handle<Operation> {
        self.simple(
            OpKind::CmdFlush,
            &[target, target_size, target_offset, target_length],
            &[],
        )
    }

    pub fn cmd_invalidate(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
    ) -> Handle<Operation> {
        self.simple(
            OpKind::CmdInvalidate,
            &[target, target_size, target_offset, target_length],
            &[],
        )
    }

    pub fn cmd_discard(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
    ) -> Handle<Operation> {
        self.simple(
            OpKind::CmdDiscard,
            &[target, target_size, target_offset, target_length],
            &[],
        )
    }

    pub fn cmd_fill(
        &mut self,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        target_length: Handle<Value>,
        value: Handle<Value>,
    ) -> Handle<Operation> {
        self.simple(
            OpKind::CmdFill,
            &[target, target_size, target_offset, target_length, value],
            &[],
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cmd_copy(
        &mut self,
        source: Handle<Value>,
        source_size: Handle<Value>,
        source_offset: Handle<Value>,
        target: Handle<Value>,
        target_size: Handle<Value>,
        target_offset: Handle<Value>,
        length: Handle<Value>,
    ) -> Handle<Operation> {
        self.simple(
            OpKind::CmdCopy,
            &[
                source,
                source_size,
                source_offset,
                target,
                target_size,
                target_offset,
                length,
            ],
            &[],
        )
    }

    pub fn cmd_dispatch(
        &mut self,
        entry_point: &str,
        resources: &[Handle<Value>],
        sizes: &[Handle<Value>],
        offsets: &[Handle<Value>],
        lengths: &[Handle<Value>],
    ) -> Handle<Operation> {
        debug_assert_eq!(resources.len(), sizes.len());
        debug_assert_eq!(resources.len(), offsets.len());
        debug_assert_eq!(resources.len(), lengths.len());
        let mut data = Operation::new(OpKind::CmdDispatch, self.loc);
        data.operands = resources.to_vec();
        data.operands.extend_from_slice(sizes);
        data.operands.extend_from_slice(offsets);
        data.operands.extend_from_slice(lengths);
        let n = resources.len() as u32;
        data.segments = vec![n, n, n, n];
        data.attr = Some(Attr::Symbol(entry_point.to_string()));
        self.push(data, &[])
    }

    pub fn cmd_serial(&mut self) -> Handle<Operation> {
        let data = Operation::new(OpKind::CmdSerial, self.loc);
        let op = self.push(data, &[]);
        self.attach_body(op, &[]);
        op
    }

    pub fn cmd_concurrent(&mut self) -> Handle<Operation> {
        let data = Operation::new(OpKind::CmdConcurrent, self.loc);
        let op = self.push(data, &[]);
        self.attach_body(op, &[]);
        op
    }

    // -- timepoints --------------------------------------------------------

    pub fn timepoint_immediate(&mut self) -> Handle<Value> {
        let op = self.simple(OpKind::TimepointImmediate, &[], &[Type::Timepoint]);
        self.result0(op)
    }

    pub fn timepoint_join(&mut self, timepoints: &[Handle<Value>]) -> Handle<Value> {
        let op = self.simple(OpKind::TimepointJoin, timepoints, &[Type::Timepoint]);
        self.result0(op)
    }

    pub fn timepoint_await(
        &mut self,
        timepoint: Handle<Value>,
        resources: &[Handle<Value>],
        sizes: &[Handle<Value>],
    ) -> Handle<Operation> {
        debug_assert_eq!(resources.len(), sizes.len());
        let mut data = Operation::new(OpKind::TimepointAwait, self.loc);
        data.operands = vec![timepoint];
        data.operands.extend_from_slice(resources);
        data.operands.extend_from_slice(sizes);
        data.segments = vec![1, resources.len() as u32, sizes.len() as u32];
        let result_tys: Vec<Type> = resources
            .iter()
            .map(|&r| self.module.value_ty(r))
            .collect();
        self.push(data, &result_tys)
    }

    // -- terminators -------------------------------------------------------

    pub fn yield_(&mut self, values: &[Handle<Value>]) -> Handle<Operation> {
        self.simple(OpKind::Yield, values, &[])
    }

    pub fn branch(&mut self, dest: Handle<Block>) -> Handle<Operation> {
        self.branch_many(&[dest])
    }

    pub fn branch_many(&mut self, dests: &[Handle<Block>]) -> Handle<Operation> {
        let mut data = Operation::new(OpKind::Branch, self.loc);
        data.successors = dests.to_vec();
        self.push(data, &[])
    }

    pub fn ret(&mut self, values: &[Handle<Value>]) -> Handle<Operation> {
        self.simple(OpKind::Return, values, &[])
    }
}
