//! Canonicalizations for `resource.*` ops.

use rill_ir::{Attr, Handle, Operation};

use crate::fold::constant_attr;
use crate::patterns::RewritePattern;
use crate::patterns::helpers::find_subview_op;
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Folds a subview feeding `resource.load` into the load's own range.
pub(crate) struct FoldSubviewIntoLoad;

impl RewritePattern for FoldSubviewIntoLoad {
    fn name(&self) -> &'static str {
        "fold-subview-into-load"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        fold_subview_into_range(op, rewriter, 0)
    }
}

/// Folds a subview feeding `resource.store` into the store's own range.
pub(crate) struct FoldSubviewIntoStore;

impl RewritePattern for FoldSubviewIntoStore {
    fn name(&self) -> &'static str {
        "fold-subview-into-store"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        fold_subview_into_range(op, rewriter, 0)
    }
}

/// Shared body: operand layout is `[resource, size, offset, ...]` for both
/// load and store.
fn fold_subview_into_range(
    op: Handle<Operation>,
    rewriter: &mut Rewriter<'_>,
    resource_slot: usize,
) -> RewriteResult {
    let module = rewriter.module();
    let subview =
        find_subview_op(module, module.ops[op].operand(resource_slot)).ok_or(MatchFailure)?;
    let sub = &module.ops[subview];
    let (source, source_size, source_offset) = (sub.operand(0), sub.operand(1), sub.operand(2));
    let own_offset = module.ops[op].operand(resource_slot + 2);

    rewriter.set_insertion_point_before(op);
    let new_offset = rewriter.add_index(source_offset, own_offset);
    rewriter.update_in_place(op, |rw| {
        rw.set_operand(op, resource_slot, source);
        rw.set_operand(op, resource_slot + 1, source_size);
        rw.set_operand(op, resource_slot + 2, new_offset);
    });
    Ok(())
}

/// Collapses `subview(subview(r))` into a single view of `r`.
pub(crate) struct FoldChainedSubviews;

impl RewritePattern for FoldChainedSubviews {
    fn name(&self) -> &'static str {
        "fold-chained-subviews"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let parent = find_subview_op(module, module.ops[op].operand(0)).ok_or(MatchFailure)?;
        let p = &module.ops[parent];
        let (source, source_size, parent_offset) = (p.operand(0), p.operand(1), p.operand(2));
        let own_offset = module.ops[op].operand(2);
        let result_size = module.ops[op].operand(3);

        rewriter.set_insertion_point_before(op);
        let new_offset = rewriter.add_index(parent_offset, own_offset);
        let flattened = rewriter.subview(source, source_size, new_offset, result_size);
        rewriter.replace_op(op, &[flattened]);
        Ok(())
    }
}

/// Strips the optional base offset off `resource.pack`, adding it to every
/// returned slice offset instead. The stripped form folds better once
/// packing has completed.
pub(crate) struct PropagatePackBaseOffset;

impl RewritePattern for PropagatePackBaseOffset {
    fn name(&self) -> &'static str {
        "propagate-pack-base-offset"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        if data.segments[1] == 0 {
            return Err(MatchFailure);
        }
        let offset_slot = data.segment_range(1).start;
        let base_offset = data.operand(offset_slot);
        let offset_results: Vec<_> = data.results[1..].to_vec();
        let is_zero = constant_attr(module, base_offset)
            .and_then(|a| a.as_literal()?.as_index())
            == Some(0);

        let mut segments = data.segments.clone();
        segments[1] = 0;
        rewriter.remove_operand(op, offset_slot);
        rewriter.set_segments(op, segments);

        // A zero base distributes to nothing.
        if is_zero {
            return Ok(());
        }

        rewriter.set_insertion_point_after(op);
        for result in offset_results {
            let sum = rewriter.add_index(base_offset, result);
            let sum_op = rewriter.module().defining_op(sum).expect("fresh add");
            rewriter.replace_all_uses_except(result, sum, &[sum_op]);
        }
        Ok(())
    }
}

/// Sorts pack slices into ascending lifetime-interval order so the packed IR
/// is deterministic and overlaps are easy to read.
pub(crate) struct CanonicalizePackIntervals;

impl RewritePattern for CanonicalizePackIntervals {
    fn name(&self) -> &'static str {
        "canonicalize-pack-intervals"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let Some(Attr::Dense(elements)) = &data.attr else {
            return Err(MatchFailure);
        };
        let sizes = data.segment(0).to_vec();
        let intervals: Vec<(i64, i64)> = elements
            .chunks(2)
            .map(|pair| {
                (
                    pair[0].as_index().unwrap_or(0),
                    pair.get(1).and_then(|l| l.as_index()).unwrap_or(0),
                )
            })
            .collect();
        let offset = data
            .segments
            .get(1)
            .filter(|&&n| n > 0)
            .map(|_| data.operand(data.segment_range(1).start));
        let results = data.results.clone();

        let mut order: Vec<usize> = (0..sizes.len()).collect();
        order.sort_by_key(|&i| intervals[i]);
        if order.iter().enumerate().all(|(i, &o)| i == o) {
            return Err(MatchFailure);
        }

        let sorted_sizes: Vec<_> = order.iter().map(|&i| sizes[i]).collect();
        let sorted_intervals: Vec<_> = order.iter().map(|&i| intervals[i]).collect();
        rewriter.set_insertion_point_before(op);
        let new_op = rewriter.pack(&sorted_sizes, offset, &sorted_intervals);

        // total_length, then each slice offset remapped through the sort.
        let new_results = rewriter.module().ops[new_op].results.clone();
        rewriter.replace_all_uses_with(results[0], new_results[0]);
        for (new_index, &old_index) in order.iter().enumerate() {
            rewriter.replace_all_uses_with(results[1 + old_index], new_results[1 + new_index]);
        }
        rewriter.erase_op(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::{Builder, Lifetime, Module, OpKind, Type};

    fn rewriter_for(module: &mut Module, op: Handle<Operation>) -> Rewriter<'_> {
        Rewriter::new(module, op)
    }

    #[test]
    fn load_through_subview_uses_original_resource() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let arg = module.add_block_arg(entry, Type::Resource(Lifetime::Staging));
        let mut b = Builder::at_end(&mut module, entry);
        let src_size = b.resource_size(arg);
        let eight = b.const_index(8);
        let sixteen = b.const_index(16);
        let view = b.subview(arg, src_size, eight, sixteen);
        let zero = b.const_index(0);
        let loaded = b.load(view, sixteen, zero, Type::Scalar(rill_ir::Scalar::F32));
        let load_op = module.defining_op(loaded).unwrap();

        let mut rw = rewriter_for(&mut module, load_op);
        FoldSubviewIntoLoad
            .match_and_rewrite(load_op, &mut rw)
            .expect("matches");
        let _ = rw.into_notes();

        let data = &module.ops[load_op];
        assert_eq!(data.operand(0), arg);
        assert_eq!(data.operand(1), src_size);
        // offset folded to 8 + 0 = 8
        assert_eq!(
            constant_attr(&module, data.operand(2)).and_then(|a| a.as_literal()?.as_index()),
            Some(8)
        );
    }

    #[test]
    fn chained_subviews_collapse() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let arg = module.add_block_arg(entry, Type::Resource(Lifetime::Staging));
        let mut b = Builder::at_end(&mut module, entry);
        let src_size = b.resource_size(arg);
        let four = b.const_index(4);
        let eight = b.const_index(8);
        let thirty_two = b.const_index(32);
        let sixteen = b.const_index(16);
        let outer = b.subview(arg, src_size, eight, thirty_two);
        let inner = b.subview(outer, thirty_two, four, sixteen);
        let inner_op = module.defining_op(inner).unwrap();

        let mut rw = rewriter_for(&mut module, inner_op);
        FoldChainedSubviews
            .match_and_rewrite(inner_op, &mut rw)
            .expect("matches");
        let _ = rw.into_notes();
        assert!(!module.ops.contains(inner_op));

        // One subview of arg at offset 12 remains reachable.
        let mut found = false;
        let mut ops = Vec::new();
        module.collect_ops(module.body, &mut ops);
        for op in ops {
            let data = &module.ops[op];
            if data.kind == OpKind::ResourceSubview && data.operand(0) == arg {
                let offset =
                    constant_attr(&module, data.operand(2)).and_then(|a| a.as_literal()?.as_index());
                if offset == Some(12) {
                    found = true;
                }
            }
        }
        assert!(found);
    }

    #[test]
    fn pack_base_offset_distributes() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let s0 = b.const_index(128);
        let s1 = b.const_index(256);
        let base = b.const_index(4096);
        let pack = b.pack(&[s0, s1], Some(base), &[(0, 1), (1, 2)]);
        let off0 = module.ops[pack].results[1];
        let off1 = module.ops[pack].results[2];
        // Anchor the offsets with users.
        let mut b = Builder::at_end(&mut module, entry);
        b.ret(&[off0, off1]);

        let mut rw = rewriter_for(&mut module, pack);
        PropagatePackBaseOffset
            .match_and_rewrite(pack, &mut rw)
            .expect("matches");
        let _ = rw.into_notes();

        // Offset stripped from the op; users now see base + offset adds.
        assert_eq!(module.ops[pack].segments[1], 0);
        let ret = module.terminator(entry).unwrap();
        for &v in &module.ops[ret].operands.clone() {
            let def = module.defining_op(v).unwrap();
            assert_eq!(module.ops[def].kind, OpKind::Add);
        }
        // Second application declines.
        let mut rw = rewriter_for(&mut module, pack);
        assert!(PropagatePackBaseOffset.match_and_rewrite(pack, &mut rw).is_err());
        let _ = rw.into_notes();
    }

    #[test]
    fn pack_intervals_sort_deterministically() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let s0 = b.const_index(128);
        let s1 = b.const_index(256);
        let pack = b.pack(&[s0, s1], None, &[(5, 9), (1, 2)]);
        let off0 = module.ops[pack].results[1];
        let off1 = module.ops[pack].results[2];
        let mut b = Builder::at_end(&mut module, entry);
        b.ret(&[off0, off1]);

        let mut rw = rewriter_for(&mut module, pack);
        CanonicalizePackIntervals
            .match_and_rewrite(pack, &mut rw)
            .expect("matches");
        let _ = rw.into_notes();
        assert!(!module.ops.contains(pack));

        // The replacement pack lists the (1,2) slice first, and the old
        // results are remapped so `ret` still sees (off for s0, off for s1).
        let mut ops = Vec::new();
        module.collect_ops(module.body, &mut ops);
        let new_pack = ops
            .into_iter()
            .find(|&o| module.ops[o].kind == OpKind::ResourcePack)
            .expect("replacement pack");
        assert_eq!(module.ops[new_pack].segment(0), &[s1, s0]);
        let ret = module.terminator(entry).unwrap();
        let ret_operands = module.ops[ret].operands.clone();
        assert_eq!(ret_operands[0], module.ops[new_pack].results[2]);
        assert_eq!(ret_operands[1], module.ops[new_pack].results[1]);
    }
}
