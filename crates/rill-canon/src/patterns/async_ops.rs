//! Canonicalizations for `async.*` data movement ops.

use rill_ir::{Handle, OpKind, Operation};

use crate::fold::sizes_equal;
use crate::patterns::RewritePattern;
use crate::patterns::helpers::{first_user_in_common_dominator, has_any_tied_uses, sink_op};
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Sinks splats down to their consumers so a splatted value is not kept
/// live (or copy-on-write cloned) across unrelated work.
pub(crate) struct SinkSplatsToConsumers;

impl RewritePattern for SinkSplatsToConsumers {
    fn name(&self) -> &'static str {
        "sink-splats-to-consumers"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let users = module.users(module.ops[op].result(0));
        if users.is_empty() {
            return Err(MatchFailure);
        }

        // Single user: sink straight to it.
        if users.len() == 1 {
            return sink_op(rewriter, op, users[0]);
        }

        // All users in our block: the earliest one bounds every use.
        let own_block = module.ops[op].block;
        if users.iter().all(|&u| module.ops[u].block == own_block) {
            let earliest = users[0];
            return sink_op(rewriter, op, earliest);
        }

        // Users span blocks: sink to the first user within the nearest
        // common dominator (or its terminator if no user lives there).
        let block = own_block.expect("attached op");
        let region = module.blocks[block].region;
        let target = first_user_in_common_dominator(module, region, &users).ok_or(MatchFailure)?;
        sink_op(rewriter, op, target)
    }
}

/// Re-materializes clonable producers (splats, constants) in front of each
/// consumer of a clone instead of keeping the cloned copy live.
pub(crate) struct PropagateClonableOps;

impl RewritePattern for PropagateClonableOps {
    fn name(&self) -> &'static str {
        "propagate-clonable-ops"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let result = module.ops[op].result(0);
        if !module.has_uses(result) {
            return Err(MatchFailure);
        }
        let source = module.ops[op].operand(0);
        let source_op = module.defining_op(source).ok_or(MatchFailure)?;
        if !module.ops[source_op].kind.prefers_clone_to_consumers() {
            return Err(MatchFailure);
        }
        // A constant may never be overwritten: re-materializing one into a
        // tied use would just get cloned again by COW materialization.
        let immutable_source =
            module.value_ty(source).lifetime() == Some(rill_ir::Lifetime::Constant);

        let mut propagated = false;
        for use_ in module.uses(result).to_vec() {
            if immutable_source && rewriter.module().ops[use_.op].is_operand_tied(use_.index) {
                continue;
            }
            let cloned = rewriter.clone_op_before(source_op, use_.op);
            let replacement = rewriter.module().ops[cloned].result(0);
            rewriter.set_operand(use_.op, use_.index, replacement);
            propagated = true;
        }
        if !propagated {
            return Err(MatchFailure);
        }
        if !rewriter.module().has_uses(rewriter.module().ops[op].result(0)) {
            rewriter.erase_op(op);
        }
        Ok(())
    }
}

/// clone(slice(x)) -> slice(x): go straight to the origin rather than
/// keeping the intermediate slice alive through a copy.
pub(crate) struct PropagateClonedSlices;

impl RewritePattern for PropagateClonedSlices {
    fn name(&self) -> &'static str {
        "propagate-cloned-slices"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let slice = module.defining_op(module.ops[op].operand(0)).ok_or(MatchFailure)?;
        if module.ops[slice].kind != OpKind::AsyncSlice {
            return Err(MatchFailure);
        }
        let s = &module.ops[slice];
        let (source, source_size, offset, end, result_size) =
            (s.operand(0), s.operand(1), s.operand(2), s.operand(3), s.operand(4));
        let lifetime = module
            .value_ty(module.ops[op].result(0))
            .lifetime()
            .ok_or(MatchFailure)?;
        let affinity = module.ops[op].affinity;

        rewriter.set_insertion_point_before(op);
        let new_slice =
            rewriter.async_slice(source, source_size, offset, end, result_size, lifetime, affinity);
        rewriter.replace_op(op, &[new_slice]);
        Ok(())
    }
}

/// Removes clones with no tie on either endpoint: nobody overwrites the
/// clone or its source, so the copy observes nothing.
pub(crate) struct ElideUnneededAsyncClones;

impl RewritePattern for ElideUnneededAsyncClones {
    fn name(&self) -> &'static str {
        "elide-unneeded-async-clones"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        if has_any_tied_uses(module, data.result(0)) || has_any_tied_uses(module, data.operand(0)) {
            return Err(MatchFailure);
        }
        let source = data.operand(0);
        rewriter.replace_op(op, &[source]);
        Ok(())
    }
}

/// slice(clone(x)) -> slice(x): avoids cloning a large resource only to cut
/// a small piece out of the copy.
pub(crate) struct PropagateSliceClones;

impl RewritePattern for PropagateSliceClones {
    fn name(&self) -> &'static str {
        "propagate-slice-clones"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let clone = module.defining_op(module.ops[op].operand(0)).ok_or(MatchFailure)?;
        if module.ops[clone].kind != OpKind::AsyncClone {
            return Err(MatchFailure);
        }
        let clone_source = module.ops[clone].operand(0);
        let clone_source_size = module.ops[clone].operand(1);
        rewriter.update_in_place(op, |rw| {
            rw.set_operand(op, 0, clone_source);
            rw.set_operand(op, 1, clone_source_size);
        });
        Ok(())
    }
}

/// slice(splat(v)) -> splat(v, slice_size): a slice of a splat is just a
/// smaller splat.
pub(crate) struct PropagateSplatsThroughSlices;

impl RewritePattern for PropagateSplatsThroughSlices {
    fn name(&self) -> &'static str {
        "propagate-splats-through-slices"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let splat = module.defining_op(module.ops[op].operand(0)).ok_or(MatchFailure)?;
        if module.ops[splat].kind != OpKind::AsyncSplat {
            return Err(MatchFailure);
        }
        let value = module.ops[splat].operand(0);
        let result_size = module.ops[op].operand(4);
        let lifetime = module
            .value_ty(module.ops[op].result(0))
            .lifetime()
            .ok_or(MatchFailure)?;
        let affinity = module.ops[op].affinity;

        rewriter.set_insertion_point_before(op);
        let smaller = rewriter.async_splat(value, result_size, lifetime, affinity);
        rewriter.replace_op(op, &[smaller]);
        Ok(())
    }
}

/// A fill covering the entire target is a discard-then-write: a splat.
pub(crate) struct FlattenFullFillToSplat;

impl RewritePattern for FlattenFullFillToSplat {
    fn name(&self) -> &'static str {
        "flatten-full-fill-to-splat"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        // target_length == target_size
        if !sizes_equal(module, data.operand(3), data.operand(1)) {
            return Err(MatchFailure);
        }
        let value = data.operand(4);
        let target_size = data.operand(1);
        let lifetime = module
            .value_ty(data.result(0))
            .lifetime()
            .ok_or(MatchFailure)?;
        let affinity = data.affinity;

        rewriter.set_insertion_point_before(op);
        let splat = rewriter.async_splat(value, target_size, lifetime, affinity);
        rewriter.replace_op(op, &[splat]);
        Ok(())
    }
}

/// update-from-splat -> fill with the splatted scalar.
pub(crate) struct CombineSplatUpdateFromToFill;

impl RewritePattern for CombineSplatUpdateFromToFill {
    fn name(&self) -> &'static str {
        "combine-splat-update-from-to-fill"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let splat = module.defining_op(data.operand(4)).ok_or(MatchFailure)?;
        if module.ops[splat].kind != OpKind::AsyncSplat {
            return Err(MatchFailure);
        }
        let value = module.ops[splat].operand(0);
        let (target, target_size, target_offset) =
            (data.operand(0), data.operand(1), data.operand(2));
        let update_size = data.operand(5);
        let affinity = data.affinity;

        rewriter.set_insertion_point_before(op);
        let fill = rewriter.async_fill(target, target_size, target_offset, update_size, value, affinity);
        rewriter.replace_op(op, &[fill]);
        Ok(())
    }
}

/// update-from-slice -> copy straight out of the slice source.
///
/// Only fires when the slice sits in the same block and after the target's
/// producer: otherwise the rewrite would extend the liveness of the slice
/// source (e.g. hoisting it into a loop body) and block in-place placement
/// of the target.
pub(crate) struct CombineSliceUpdateFromToCopy;

impl RewritePattern for CombineSliceUpdateFromToCopy {
    fn name(&self) -> &'static str {
        "combine-slice-update-from-to-copy"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let slice = module.defining_op(data.operand(4)).ok_or(MatchFailure)?;
        if module.ops[slice].kind != OpKind::AsyncSlice
            || module.ops[slice].block != data.block
        {
            return Err(MatchFailure);
        }
        let Some(target_def) = module.defining_op(data.operand(0)) else {
            return Err(MatchFailure);
        };
        if module.ops[target_def].block != module.ops[slice].block
            || module.is_before_in_block(slice, target_def)
        {
            return Err(MatchFailure);
        }

        let s = &module.ops[slice];
        let (source, source_size, source_offset, source_end, slice_size) =
            (s.operand(0), s.operand(1), s.operand(2), s.operand(3), s.operand(4));
        let (target, target_size, target_offset, target_end) =
            (data.operand(0), data.operand(1), data.operand(2), data.operand(3));
        let affinity = data.affinity;

        rewriter.set_insertion_point_before(op);
        let copy = rewriter.async_copy(
            target,
            target_size,
            target_offset,
            target_end,
            source,
            source_size,
            source_offset,
            source_end,
            slice_size,
            affinity,
        );
        rewriter.replace_op(op, &[copy]);
        Ok(())
    }
}

/// A copy of the entire source is an update: the allocator can then place
/// the producer directly in the target.
pub(crate) struct AsyncCopyFullSourceToUpdate;

impl RewritePattern for AsyncCopyFullSourceToUpdate {
    fn name(&self) -> &'static str {
        "async-copy-full-source-to-update"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        // source_end == source_size
        if !sizes_equal(module, data.operand(7), data.operand(5)) {
            return Err(MatchFailure);
        }
        let (target, target_size, target_offset, target_end) =
            (data.operand(0), data.operand(1), data.operand(2), data.operand(3));
        let (source, source_size) = (data.operand(4), data.operand(5));
        let affinity = data.affinity;

        rewriter.set_insertion_point_before(op);
        let update = rewriter.async_update(
            target,
            target_size,
            target_offset,
            target_end,
            source,
            source_size,
            affinity,
        );
        rewriter.replace_op(op, &[update]);
        Ok(())
    }
}

/// Removes transfers that change neither type nor placement.
pub(crate) struct RedundantTransferElision;

impl RewritePattern for RedundantTransferElision {
    fn name(&self) -> &'static str {
        "redundant-transfer-elision"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let source = data.operand(0);
        if data.source_affinity != data.affinity
            || module.value_ty(source) != module.value_ty(data.result(0))
        {
            return Err(MatchFailure);
        }
        rewriter.replace_op(op, &[source]);
        Ok(())
    }
}
