//! Canonicalizations for `cmd.*` command ops inside execution regions.
//!
//! All of these fold subviews into the command's own offset/size operands.
//! New offset arithmetic is emitted outside the enclosing execution region:
//! regions capture SSA values but cannot grow new index computations inline
//! without breaking capture rules.

use rill_ir::{Handle, Operation};

use crate::patterns::RewritePattern;
use crate::patterns::helpers::find_subview_op;
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Folds a subview into the target range of `cmd.flush`, `cmd.invalidate`,
/// `cmd.discard`, and `cmd.fill`.
pub(crate) struct FoldSubviewsIntoCmdTarget;

impl RewritePattern for FoldSubviewsIntoCmdTarget {
    fn name(&self) -> &'static str {
        "fold-subviews-into-cmd-target"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let subview = find_subview_op(module, module.ops[op].operand(0)).ok_or(MatchFailure)?;
        let sub = &module.ops[subview];
        let (source, source_size, source_offset) = (sub.operand(0), sub.operand(1), sub.operand(2));
        let own_offset = module.ops[op].operand(2);

        rewriter.set_insertion_point_to_parent_execution_scope(op);
        let new_offset = rewriter.add_index(source_offset, own_offset);
        rewriter.update_in_place(op, |rw| {
            rw.set_operand(op, 0, source);
            rw.set_operand(op, 1, source_size);
            rw.set_operand(op, 2, new_offset);
        });
        Ok(())
    }
}

/// Folds subviews into either side of `cmd.copy`.
pub(crate) struct FoldSubviewsIntoCmdCopy;

impl RewritePattern for FoldSubviewsIntoCmdCopy {
    fn name(&self) -> &'static str {
        "fold-subviews-into-cmd-copy"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let source_subview = find_subview_op(module, module.ops[op].operand(0));
        let target_subview = find_subview_op(module, module.ops[op].operand(3));
        if source_subview.is_none() && target_subview.is_none() {
            return Err(MatchFailure);
        }

        if let Some(subview) = source_subview {
            let sub = &rewriter.module().ops[subview];
            let (source, source_size, source_offset) =
                (sub.operand(0), sub.operand(1), sub.operand(2));
            let own_offset = rewriter.module().ops[op].operand(2);
            rewriter.set_insertion_point_to_parent_execution_scope(op);
            let new_offset = rewriter.add_index(source_offset, own_offset);
            rewriter.update_in_place(op, |rw| {
                rw.set_operand(op, 0, source);
                rw.set_operand(op, 1, source_size);
                rw.set_operand(op, 2, new_offset);
            });
        }
        if let Some(subview) = target_subview {
            let sub = &rewriter.module().ops[subview];
            let (source, source_size, source_offset) =
                (sub.operand(0), sub.operand(1), sub.operand(2));
            let own_offset = rewriter.module().ops[op].operand(5);
            rewriter.set_insertion_point_to_parent_execution_scope(op);
            let new_offset = rewriter.add_index(source_offset, own_offset);
            rewriter.update_in_place(op, |rw| {
                rw.set_operand(op, 3, source);
                rw.set_operand(op, 4, source_size);
                rw.set_operand(op, 5, new_offset);
            });
        }
        Ok(())
    }
}

/// Folds subviews into each resource binding of `cmd.dispatch`.
pub(crate) struct FoldSubviewsIntoCmdDispatch;

impl RewritePattern for FoldSubviewsIntoCmdDispatch {
    fn name(&self) -> &'static str {
        "fold-subviews-into-cmd-dispatch"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let count = data.segments[0] as usize;
        let mut subviews = Vec::new();
        for i in 0..count {
            subviews.push(find_subview_op(module, data.operand(i)));
        }
        if subviews.iter().all(Option::is_none) {
            return Err(MatchFailure);
        }

        rewriter.start_root_update(op);
        rewriter.set_insertion_point_to_parent_execution_scope(op);
        for (i, subview) in subviews.into_iter().enumerate() {
            let Some(subview) = subview else { continue };
            let sub = &rewriter.module().ops[subview];
            let (source, source_size, source_offset) =
                (sub.operand(0), sub.operand(1), sub.operand(2));
            let own_offset = rewriter.module().ops[op].operand(2 * count + i);
            let new_offset = rewriter.add_index(source_offset, own_offset);
            rewriter.set_operand(op, i, source);
            rewriter.set_operand(op, count + i, source_size);
            rewriter.set_operand(op, 2 * count + i, new_offset);
        }
        rewriter.finalize_root_update(op);
        Ok(())
    }
}
