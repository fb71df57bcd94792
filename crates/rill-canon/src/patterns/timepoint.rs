//! Canonicalizations for `timepoint.*` ops.

use rill_ir::{Affinity, Handle, OpKind, Operation, dominance};

use crate::patterns::RewritePattern;
use crate::patterns::helpers::{find_insertion_point_before, find_subview_op, first_user_in_common_dominator};
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Drops join operands that are already satisfied; a join of nothing but
/// immediates is itself immediate.
pub(crate) struct ElideImmediateJoinOperands;

impl RewritePattern for ElideImmediateJoinOperands {
    fn name(&self) -> &'static str {
        "elide-immediate-join-operands"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let immediate: Vec<usize> = data
            .operands
            .iter()
            .enumerate()
            .filter(|&(_, &tp)| module.defining_kind(tp) == Some(OpKind::TimepointImmediate))
            .map(|(i, _)| i)
            .collect();
        if immediate.is_empty() {
            return Err(MatchFailure);
        }
        if immediate.len() == data.operands.len() {
            rewriter.set_insertion_point_before(op);
            let resolved = rewriter.timepoint_immediate();
            rewriter.replace_op(op, &[resolved]);
            return Ok(());
        }
        rewriter.update_in_place(op, |rw| {
            for &index in immediate.iter().rev() {
                rw.remove_operand(op, index);
            }
        });
        Ok(())
    }
}

/// Deduplicates join operands, order-preserving.
pub(crate) struct FoldDuplicateJoinOperands;

impl RewritePattern for FoldDuplicateJoinOperands {
    fn name(&self) -> &'static str {
        "fold-duplicate-join-operands"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let operands = rewriter.module().ops[op].operands.clone();
        let duplicates: Vec<usize> = (0..operands.len())
            .filter(|&i| operands[..i].contains(&operands[i]))
            .collect();
        if duplicates.is_empty() {
            return Err(MatchFailure);
        }
        rewriter.update_in_place(op, |rw| {
            for &index in duplicates.iter().rev() {
                rw.remove_operand(op, index);
            }
        });
        Ok(())
    }
}

/// An await on an immediate timepoint releases its operands unchanged.
pub(crate) struct ElideImmediateAwaits;

impl RewritePattern for ElideImmediateAwaits {
    fn name(&self) -> &'static str {
        "elide-immediate-awaits"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        if module.defining_kind(data.operand(0)) != Some(OpKind::TimepointImmediate) {
            return Err(MatchFailure);
        }
        let resources = data.awaited_resources().to_vec();
        rewriter.replace_op(op, &resources);
        Ok(())
    }
}

/// Sinks an await down to the first consumer of any of its resources, so
/// waits happen as late as the data allows.
pub(crate) struct SinkAwaitToFirstConsumer;

impl RewritePattern for SinkAwaitToFirstConsumer {
    fn name(&self) -> &'static str {
        "sink-await-to-first-consumer"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let mut users = Vec::new();
        for &result in &module.ops[op].results {
            for user in module.users(result) {
                if !users.contains(&user) {
                    users.push(user);
                }
            }
        }
        if users.is_empty() {
            return Err(MatchFailure);
        }
        let block = module.ops[op].block.expect("attached op");
        let region = module.blocks[block].region;
        let target = first_user_in_common_dominator(module, region, &users).ok_or(MatchFailure)?;
        let before = find_insertion_point_before(module, op, target);
        if before == op {
            return Err(MatchFailure);
        }
        rewriter.move_before(op, before);
        Ok(())
    }
}

/// Rewrites awaited subviews to await the underlying resource, reapplying
/// the subview on the released result so later consumers can fold the
/// range.
pub(crate) struct SinkSubviewsAcrossAwaits;

impl RewritePattern for SinkSubviewsAcrossAwaits {
    fn name(&self) -> &'static str {
        "sink-subviews-across-awaits"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let count = module.ops[op].segments[1] as usize;

        struct Sunk {
            index: usize,
            source: Handle<rill_ir::Value>,
            source_size: Handle<rill_ir::Value>,
            source_offset: Handle<rill_ir::Value>,
            result_size: Handle<rill_ir::Value>,
        }
        let mut sunk = Vec::new();
        for i in 0..count {
            let operand = module.ops[op].operand(1 + i);
            let Some(subview) = find_subview_op(module, operand) else {
                continue;
            };
            let sub = &module.ops[subview];
            sunk.push(Sunk {
                index: i,
                source: sub.operand(0),
                source_size: sub.operand(1),
                source_offset: sub.operand(2),
                result_size: sub.operand(3),
            });
        }
        if sunk.is_empty() {
            return Err(MatchFailure);
        }

        rewriter.start_root_update(op);
        for s in sunk {
            let result = rewriter.module().ops[op].result(s.index);
            rewriter.set_insertion_point_after(op);
            let view = rewriter.subview(result, s.source_size, s.source_offset, s.result_size);
            let view_op = rewriter.module().defining_op(view).expect("fresh subview");
            rewriter.replace_all_uses_except(result, view, &[view_op]);
            rewriter.set_operand(op, 1 + s.index, s.source);
            rewriter.set_operand(op, 1 + count + s.index, s.source_size);
        }
        rewriter.finalize_root_update(op);
        Ok(())
    }
}

/// Merges later awaits on the same timepoint (same block, compatible
/// affinity) into one multi-result await.
pub(crate) struct GroupAwaitsByTimepoint;

impl RewritePattern for GroupAwaitsByTimepoint {
    fn name(&self) -> &'static str {
        "group-awaits-by-timepoint"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let timepoint = data.operand(0);
        // An unresolved block-argument timepoint: leave the await as-is.
        if module.defining_op(timepoint).is_none() {
            return Err(MatchFailure);
        }
        let affinity = data.affinity;

        let mut covered = Vec::new();
        for use_ in module.uses(timepoint) {
            if use_.op == op || use_.index != 0 {
                continue;
            }
            let candidate = &module.ops[use_.op];
            if candidate.kind != OpKind::TimepointAwait
                || candidate.block != data.block
                || module.is_before_in_block(use_.op, op)
                || !Affinity::are_compatible(affinity, candidate.affinity)
            {
                continue;
            }
            // Merging moves the candidate's operands up to this op; they all
            // must already be available here.
            let movable = candidate
                .operands
                .iter()
                .skip(1)
                .all(|&v| dominance::value_dominates(module, v, op));
            if movable && !covered.contains(&use_.op) {
                covered.push(use_.op);
            }
        }
        if covered.is_empty() {
            return Err(MatchFailure);
        }

        let mut resources = data.awaited_resources().to_vec();
        let mut sizes = data.awaited_resource_sizes().to_vec();
        let mut replaced: Vec<Handle<rill_ir::Value>> = data.results.clone();
        for &covered_op in &covered {
            let c = &module.ops[covered_op];
            resources.extend_from_slice(c.awaited_resources());
            sizes.extend_from_slice(c.awaited_resource_sizes());
            replaced.extend_from_slice(&c.results);
        }

        rewriter.set_insertion_point_before(op);
        let merged = rewriter.timepoint_await(timepoint, &resources, &sizes, affinity);
        let merged_results = rewriter.module().ops[merged].results.clone();
        for (old, new) in replaced.into_iter().zip(merged_results) {
            rewriter.replace_all_uses_with(old, new);
        }
        for covered_op in covered {
            rewriter.erase_op(covered_op);
        }
        rewriter.erase_op(op);
        Ok(())
    }
}

/// Collapses duplicate resources passing through one await, routing all
/// duplicate results to a single shared result.
pub(crate) struct FoldDuplicateAwaitResources;

impl RewritePattern for FoldDuplicateAwaitResources {
    fn name(&self) -> &'static str {
        "fold-duplicate-await-resources"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let timepoint = data.operand(0);
        // An unresolved block-argument timepoint: leave the await as-is.
        if module.defining_op(timepoint).is_none() {
            return Err(MatchFailure);
        }
        let affinity = data.affinity;
        let resources = data.awaited_resources().to_vec();
        let sizes = data.awaited_resource_sizes().to_vec();
        let results = data.results.clone();

        let mut unique = Vec::new();
        let mut unique_sizes = Vec::new();
        let mut mapping = Vec::with_capacity(resources.len());
        for (&resource, &size) in resources.iter().zip(&sizes) {
            match unique.iter().position(|&u| u == resource) {
                Some(existing) => mapping.push(existing),
                None => {
                    mapping.push(unique.len());
                    unique.push(resource);
                    unique_sizes.push(size);
                }
            }
        }
        if unique.len() == resources.len() {
            return Err(MatchFailure);
        }

        rewriter.set_insertion_point_before(op);
        let merged = rewriter.timepoint_await(timepoint, &unique, &unique_sizes, affinity);
        let merged_results = rewriter.module().ops[merged].results.clone();
        for (old, &slot) in results.into_iter().zip(&mapping) {
            rewriter.replace_all_uses_with(old, merged_results[slot]);
        }
        rewriter.erase_op(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::{Builder, Lifetime, Module, Type};

    /// A non-immediate timepoint: an empty execute region's result.
    fn pending_timepoint(module: &mut Module) -> Handle<rill_ir::Value> {
        let entry = module.entry_block();
        let mut b = Builder::at_end(module, entry);
        let exec = b.async_execute(&[], &[], &[], &[], &[]);
        let body = Builder::body_block(module, exec);
        let mut bb = Builder::at_end(module, body);
        bb.yield_(&[]);
        module.ops[exec].result_timepoint()
    }

    #[test]
    fn join_drops_immediate_operands() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let imm = b.timepoint_immediate();
        let join = b.timepoint_join(&[imm, pending]);
        b.ret(&[join]);
        let join_op = module.defining_op(join).unwrap();

        let mut rw = Rewriter::new(&mut module, join_op);
        ElideImmediateJoinOperands
            .match_and_rewrite(join_op, &mut rw)
            .expect("drops");
        let _ = rw.into_notes();
        assert_eq!(module.ops[join_op].operands, vec![pending]);
    }

    #[test]
    fn join_of_only_immediates_is_immediate() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let i0 = b.timepoint_immediate();
        let i1 = b.timepoint_immediate();
        let join = b.timepoint_join(&[i0, i1]);
        b.ret(&[join]);
        let join_op = module.defining_op(join).unwrap();

        let mut rw = Rewriter::new(&mut module, join_op);
        ElideImmediateJoinOperands
            .match_and_rewrite(join_op, &mut rw)
            .expect("replaces");
        let _ = rw.into_notes();

        let ret = module.terminator(entry).unwrap();
        let out = module.ops[ret].operand(0);
        assert_eq!(module.defining_kind(out), Some(OpKind::TimepointImmediate));
    }

    #[test]
    fn duplicate_join_operands_collapse() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let join = b.timepoint_join(&[pending, pending]);
        b.ret(&[join]);
        let join_op = module.defining_op(join).unwrap();

        let mut rw = Rewriter::new(&mut module, join_op);
        FoldDuplicateJoinOperands
            .match_and_rewrite(join_op, &mut rw)
            .expect("dedups");
        let _ = rw.into_notes();
        assert_eq!(module.ops[join_op].operands, vec![pending]);
    }

    #[test]
    fn adjacent_awaits_on_one_timepoint_merge() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let a = b.async_splat(v, size, Lifetime::External);
        let bb_res = b.async_splat(v, size, Lifetime::External);
        let await_a = b.timepoint_await(pending, &[a], &[size]);
        let await_b = b.timepoint_await(pending, &[bb_res], &[size]);
        let ra = b.result(await_a, 0);
        let rb = b.result(await_b, 0);
        let ta = b.async_transfer(ra, size, Lifetime::Staging);
        let tb = b.async_transfer(rb, size, Lifetime::Staging);
        b.ret(&[ta, tb]);

        let mut rw = Rewriter::new(&mut module, await_a);
        GroupAwaitsByTimepoint
            .match_and_rewrite(await_a, &mut rw)
            .expect("merges");
        let _ = rw.into_notes();
        assert!(!module.ops.contains(await_a));
        assert!(!module.ops.contains(await_b));

        // A single await with two results now feeds both transfers.
        let ta_op = module.defining_op(ta).unwrap();
        let tb_op = module.defining_op(tb).unwrap();
        let merged_a = module.defining_op(module.ops[ta_op].operand(0)).unwrap();
        let merged_b = module.defining_op(module.ops[tb_op].operand(0)).unwrap();
        assert_eq!(merged_a, merged_b);
        assert_eq!(module.ops[merged_a].kind, OpKind::TimepointAwait);
        assert_eq!(module.ops[merged_a].awaited_resources(), &[a, bb_res]);
    }

    #[test]
    fn incompatible_affinity_blocks_grouping() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let a = b.async_splat(v, size, Lifetime::External);
        let c = b.async_splat(v, size, Lifetime::External);
        let await_a = b.timepoint_await(pending, &[a], &[size]);
        let await_b = b.timepoint_await(pending, &[c], &[size]);
        let ra = b.result(await_a, 0);
        let rb = b.result(await_b, 0);
        b.ret(&[ra, rb]);
        module.ops[await_b].affinity = Some(Affinity(1));

        let mut rw = Rewriter::new(&mut module, await_a);
        assert!(
            GroupAwaitsByTimepoint
                .match_and_rewrite(await_a, &mut rw)
                .is_err()
        );
        let _ = rw.into_notes();
    }

    #[test]
    fn duplicate_await_resources_share_one_result() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let a = b.async_splat(v, size, Lifetime::External);
        let await_op = b.timepoint_await(pending, &[a, a], &[size, size]);
        let r0 = b.result(await_op, 0);
        let r1 = b.result(await_op, 1);
        b.ret(&[r0, r1]);

        let mut rw = Rewriter::new(&mut module, await_op);
        FoldDuplicateAwaitResources
            .match_and_rewrite(await_op, &mut rw)
            .expect("dedups");
        let _ = rw.into_notes();

        let ret = module.terminator(entry).unwrap();
        let outs = module.ops[ret].operands.clone();
        assert_eq!(outs[0], outs[1]);
        let merged = module.defining_op(outs[0]).unwrap();
        assert_eq!(module.ops[merged].awaited_resources(), &[a]);
    }

    #[test]
    fn await_sinks_to_first_consumer() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let a = b.async_splat(v, size, Lifetime::External);
        let await_op = b.timepoint_await(pending, &[a], &[size]);
        let r = b.result(await_op, 0);
        let _unrelated0 = b.const_index(1);
        let _unrelated1 = b.const_index(2);
        let t = b.async_transfer(r, size, Lifetime::Staging);
        b.ret(&[t]);

        let mut rw = Rewriter::new(&mut module, await_op);
        SinkAwaitToFirstConsumer
            .match_and_rewrite(await_op, &mut rw)
            .expect("sinks");
        let _ = rw.into_notes();

        let t_op = module.defining_op(t).unwrap();
        let ops = &module.blocks[entry].ops;
        let await_pos = ops.iter().position(|&o| o == await_op).unwrap();
        let t_pos = ops.iter().position(|&o| o == t_op).unwrap();
        assert_eq!(await_pos + 1, t_pos);
    }

    #[test]
    fn subviews_sink_across_awaits() {
        let mut module = Module::new();
        let pending = pending_timepoint(&mut module);
        let entry = module.entry_block();
        let arg = module.add_block_arg(entry, Type::Resource(Lifetime::External));
        let mut b = Builder::at_end(&mut module, entry);
        let src_size = b.resource_size(arg);
        let eight = b.const_index(8);
        let sixteen = b.const_index(16);
        let view = b.subview(arg, src_size, eight, sixteen);
        let await_op = b.timepoint_await(pending, &[view], &[sixteen]);
        let r = b.result(await_op, 0);
        let zero = b.const_index(0);
        let loaded = b.load(r, sixteen, zero, Type::Scalar(rill_ir::Scalar::F32));
        b.ret(&[loaded]);

        let mut rw = Rewriter::new(&mut module, await_op);
        SinkSubviewsAcrossAwaits
            .match_and_rewrite(await_op, &mut rw)
            .expect("sinks");
        let _ = rw.into_notes();

        // The await now gates the raw resource at its full size; the load
        // reads through a rebuilt subview of the released result.
        assert_eq!(module.ops[await_op].awaited_resources(), &[arg]);
        assert_eq!(module.ops[await_op].awaited_resource_sizes(), &[src_size]);
        let load_op = module.defining_op(loaded).unwrap();
        let load_src = module.defining_op(module.ops[load_op].operand(0)).unwrap();
        assert_eq!(module.ops[load_src].kind, OpKind::ResourceSubview);
        assert_eq!(module.ops[load_src].operand(0), module.ops[await_op].result(0));
    }
}
