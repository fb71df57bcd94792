//! Canonicalizations for execution regions (`async.execute`, `cmd.execute`)
//! and the nested `cmd.serial`/`cmd.concurrent` groups.

use rill_ir::{Builder, Handle, OpKind, Operation, ValueDef};

use crate::patterns::RewritePattern;
use crate::patterns::helpers::{find_subview_op, find_tied_base_value};
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Drops await-list entries that are already satisfied.
pub(crate) struct ElideImmediateExecuteWaits;

impl RewritePattern for ElideImmediateExecuteWaits {
    fn name(&self) -> &'static str {
        "elide-immediate-execute-waits"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let elided: Vec<usize> = data
            .await_timepoints()
            .iter()
            .enumerate()
            .filter(|&(_, &tp)| module.defining_kind(tp) == Some(OpKind::TimepointImmediate))
            .map(|(i, _)| i)
            .collect();
        if elided.is_empty() {
            return Err(MatchFailure);
        }
        let mut segments = data.segments.clone();
        segments[0] -= elided.len() as u32;
        rewriter.update_in_place(op, |rw| {
            for &index in elided.iter().rev() {
                rw.remove_operand(op, index);
            }
            rw.set_segments(op, segments);
        });
        Ok(())
    }
}

/// Collapses duplicate await-list entries, order-preserving.
pub(crate) struct ElideDuplicateExecuteWaits;

impl RewritePattern for ElideDuplicateExecuteWaits {
    fn name(&self) -> &'static str {
        "elide-duplicate-execute-waits"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let awaits = rewriter.module().ops[op].await_timepoints().to_vec();
        let duplicates: Vec<usize> = (0..awaits.len())
            .filter(|&i| awaits[..i].contains(&awaits[i]))
            .collect();
        if duplicates.is_empty() {
            return Err(MatchFailure);
        }
        let mut segments = rewriter.module().ops[op].segments.clone();
        segments[0] -= duplicates.len() as u32;
        rewriter.update_in_place(op, |rw| {
            for &index in duplicates.iter().rev() {
                rw.remove_operand(op, index);
            }
            rw.set_segments(op, segments);
        });
        Ok(())
    }
}

/// Rewrites captured operands sourced from `timepoint.await` to the
/// pre-await resources, hoisting the awaited timepoint into the region's
/// await list.
pub(crate) struct ChainExecuteWaits;

impl RewritePattern for ChainExecuteWaits {
    fn name(&self) -> &'static str {
        "chain-execute-waits"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let awaits_len = data.segments[0] as usize;
        let awaits = data.await_timepoints().to_vec();

        let mut replacements = Vec::new();
        let mut chained_timepoints = Vec::new();
        for (i, &operand) in data.captured_operands().iter().enumerate() {
            let Some(await_op) = module.defining_op(operand) else {
                continue;
            };
            if module.ops[await_op].kind != OpKind::TimepointAwait {
                continue;
            }
            let ValueDef::OpResult { index, .. } = module.values[operand].def else {
                continue;
            };
            let source = module.ops[await_op].operand(1 + index as usize);
            let timepoint = module.ops[await_op].operand(0);
            replacements.push((awaits_len + i, source));
            if !awaits.contains(&timepoint) && !chained_timepoints.contains(&timepoint) {
                chained_timepoints.push(timepoint);
            }
        }
        if replacements.is_empty() {
            return Err(MatchFailure);
        }

        let mut segments = rewriter.module().ops[op].segments.clone();
        segments[0] += chained_timepoints.len() as u32;
        rewriter.update_in_place(op, |rw| {
            for (index, source) in replacements {
                rw.set_operand(op, index, source);
            }
            // Append after existing awaits so capture slots shift as a group.
            for (offset, timepoint) in chained_timepoints.into_iter().enumerate() {
                rw.insert_operand(op, awaits_len + offset, timepoint);
            }
            rw.set_segments(op, segments);
        });
        Ok(())
    }
}

/// Rewrites captures sourced from subviews to capture the underlying
/// resource, re-creating the subview inside the region so interior ops keep
/// their sliced view. This migrates subview folding opportunities into the
/// region.
pub(crate) struct CloneCapturedExecuteSubviews;

impl RewritePattern for CloneCapturedExecuteSubviews {
    fn name(&self) -> &'static str {
        "clone-captured-execute-subviews"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let awaits_len = data.segments[0] as usize;
        let operand_count = data.segments[1] as usize;

        struct Capture {
            index: usize,
            source: Handle<rill_ir::Value>,
            source_size: Handle<rill_ir::Value>,
            source_offset: Handle<rill_ir::Value>,
            result_size: Handle<rill_ir::Value>,
        }
        let mut captures = Vec::new();
        for (i, &operand) in data.captured_operands().iter().enumerate() {
            let Some(subview) = find_subview_op(module, operand) else {
                continue;
            };
            let sub = &module.ops[subview];
            captures.push(Capture {
                index: i,
                source: sub.operand(0),
                source_size: sub.operand(1),
                source_offset: sub.operand(2),
                result_size: sub.operand(3),
            });
        }
        if captures.is_empty() {
            return Err(MatchFailure);
        }

        let entry = Builder::body_block(module, op);
        rewriter.start_root_update(op);
        for capture in captures {
            rewriter.set_operand(op, awaits_len + capture.index, capture.source);
            rewriter.set_operand(
                op,
                awaits_len + operand_count + capture.index,
                capture.source_size,
            );

            // Rebuild the view on the block argument for interior users.
            let arg = rewriter.module().blocks[entry].args[capture.index];
            rewriter.set_insertion_point_to_start(entry);
            let view = rewriter.subview(
                arg,
                capture.source_size,
                capture.source_offset,
                capture.result_size,
            );
            let view_op = rewriter.module().defining_op(view).expect("fresh subview");
            rewriter.replace_all_uses_except(arg, view, &[view_op]);
        }
        rewriter.finalize_root_update(op);
        Ok(())
    }
}

/// Replaces an execution region with no work by an immediate timepoint.
pub(crate) struct ElideNoOpExecute;

impl RewritePattern for ElideNoOpExecute {
    fn name(&self) -> &'static str {
        "elide-no-op-execute"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        // Only the timepoint result can be replaced; declared resource
        // results with an empty yield are malformed and left to the
        // verifier.
        if module.ops[op].results.len() != 1 {
            return Err(MatchFailure);
        }
        let entry = Builder::body_block(module, op);
        if module.blocks[entry].ops.len() != 1 {
            // Has non-yield ops.
            return Err(MatchFailure);
        }
        let terminator = module.terminator(entry).ok_or(MatchFailure)?;
        if !module.ops[terminator].operands.is_empty() {
            return Err(rewriter.notify_match_failure(
                op,
                "no ops in execute region but still passing through operands",
            ));
        }
        let timepoint = module.ops[op].result_timepoint();
        rewriter.set_insertion_point_before(op);
        let immediate = rewriter.timepoint_immediate();
        rewriter.replace_all_uses_with(timepoint, immediate);
        rewriter.erase_op(op);
        Ok(())
    }
}

/// Marks region results as tied to the captured operand their yielded value
/// aliases, converting semantic in-place producers into syntactic ties.
pub(crate) struct TieExecuteRegionResults;

impl RewritePattern for TieExecuteRegionResults {
    fn name(&self) -> &'static str {
        "tie-execute-region-results"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let entry = Builder::body_block(module, op);
        let terminator = module.terminator(entry).ok_or(MatchFailure)?;
        let yielded = module.ops[terminator].operands.clone();

        let mut ties = Vec::new();
        for (i, &value) in yielded.iter().enumerate() {
            if module.ops[op].tied.get(i).copied().flatten().is_some() {
                continue;
            }
            let base = find_tied_base_value(module, value);
            if let ValueDef::BlockArg { block, index } = module.values[base].def
                && block == entry
            {
                ties.push((i, index));
            }
        }
        if ties.is_empty() {
            return Err(MatchFailure);
        }
        rewriter.update_in_place(op, |rw| {
            for (result, capture) in ties {
                rw.set_tied_result(op, result, Some(capture));
            }
        });
        Ok(())
    }
}

/// Closure optimization: prunes captured operands whose block argument is
/// unused and (for `async.execute`) results nobody reads.
pub(crate) struct ElideUnusedExecuteCaptures;

impl RewritePattern for ElideUnusedExecuteCaptures {
    fn name(&self) -> &'static str {
        "elide-unused-execute-captures"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let is_async = data.kind == OpKind::AsyncExecute;
        let entry = Builder::body_block(module, op);
        let terminator = module.terminator(entry).ok_or(MatchFailure)?;

        let dead_args: Vec<usize> = module.blocks[entry]
            .args
            .iter()
            .enumerate()
            .filter(|&(_, &arg)| !module.has_uses(arg))
            .map(|(i, _)| i)
            .collect();
        let dead_results: Vec<usize> = if is_async {
            data.results
                .iter()
                .enumerate()
                .filter(|&(_, &r)| {
                    module.value_ty(r).is_resource() && !module.has_uses(r)
                })
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };
        if dead_args.is_empty() && dead_results.is_empty() {
            return Err(MatchFailure);
        }

        let mut segments = data.segments.clone();
        let awaits_len = segments[0] as usize;
        let operand_count = segments[1] as usize;

        rewriter.update_in_place(op, |rw| {
            for &result in dead_results.iter().rev() {
                // Yield operand, result-size operand, then the result itself.
                rw.remove_operand(terminator, result);
                let size_slot: usize =
                    segments[..3].iter().map(|&n| n as usize).sum::<usize>() + result;
                rw.remove_operand(op, size_slot);
                segments[3] -= 1;
                rw.erase_result(op, result);
            }
            for &arg in dead_args.iter().rev() {
                rw.erase_block_arg(entry, arg);
                rw.remove_operand(op, awaits_len + operand_count + arg);
                rw.remove_operand(op, awaits_len + arg);
                segments[1] -= 1;
                segments[2] -= 1;
                // Capture-relative ties above the removed slot shift down.
                let tied = rw.module().ops[op].tied.clone();
                for (result, entry_tie) in tied.into_iter().enumerate() {
                    if let Some(capture) = entry_tie
                        && capture as usize > arg
                    {
                        rw.set_tied_result(op, result, Some(capture - 1));
                    }
                }
            }
            rw.set_segments(op, segments);
        });
        Ok(())
    }
}

/// Erases nested grouping regions that contain no work.
pub(crate) struct ElideEmptyRegion;

impl RewritePattern for ElideEmptyRegion {
    fn name(&self) -> &'static str {
        "elide-empty-region"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let entry = Builder::body_block(module, op);
        if module.blocks[entry].ops.len() != 1 {
            return Err(MatchFailure);
        }
        let terminator = module.terminator(entry).ok_or(MatchFailure)?;
        if !module.ops[terminator].operands.is_empty() {
            return Err(rewriter.notify_match_failure(
                op,
                "no ops in execution region but still passing through operands",
            ));
        }
        rewriter.erase_op(op);
        Ok(())
    }
}
