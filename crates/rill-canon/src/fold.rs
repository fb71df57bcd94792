//! Per-kind fold rules.
//!
//! A fold is an in-place simplification: it may return existing SSA values
//! or attributes but never creates operations itself. Attribute results are
//! materialized as constant ops by the driver.

use rill_ir::{Attr, Handle, Literal, Module, OpKind, Operation, Value};

/// One replacement per result.
pub(crate) enum FoldOut {
    Value(Handle<Value>),
    Attr(Attr),
}

/// The attribute a value folds to when its defining op is constant-like.
pub(crate) fn constant_attr(module: &Module, value: Handle<Value>) -> Option<Attr> {
    let op = module.defining_op(value)?;
    let data = &module.ops[op];
    match data.kind {
        OpKind::Constant => data.attr.clone(),
        OpKind::TimepointImmediate => Some(Attr::Timepoint),
        _ => None,
    }
}

fn const_index_of(module: &Module, value: Handle<Value>) -> Option<i64> {
    constant_attr(module, value)?.as_literal()?.as_index()
}

/// Size equality: SSA identity or equal index constants. No range analysis.
pub(crate) fn sizes_equal(module: &Module, a: Handle<Value>, b: Handle<Value>) -> bool {
    if a == b {
        return true;
    }
    match (const_index_of(module, a), const_index_of(module, b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Attempts to fold `op`; `None` means no simplification applies.
pub(crate) fn fold_op(module: &Module, op: Handle<Operation>) -> Option<Vec<FoldOut>> {
    let data = &module.ops[op];
    match data.kind {
        OpKind::Add => {
            let lhs = const_index_of(module, data.operand(0))?;
            let rhs = const_index_of(module, data.operand(1))?;
            Some(vec![FoldOut::Attr(Attr::Literal(Literal::Index(lhs + rhs)))])
        }

        OpKind::ResourceSize => {
            let found = module.find_size_value(data.operand(0))?;
            // The op may itself be the only size definition in scope.
            (found != data.result(0)).then(|| vec![FoldOut::Value(found)])
        }

        // A view covering the whole resource is the resource.
        OpKind::ResourceSubview => {
            sizes_equal(module, data.operand(1), data.operand(3))
                .then(|| vec![FoldOut::Value(data.operand(0))])
        }

        OpKind::ResourcePack => fold_pack(data),

        // A clone consumed exactly once is a rename. Copy-on-write holes this
        // may open are patched by COW materialization afterwards.
        OpKind::TensorClone => {
            (module.users(data.result(0)).len() == 1)
                .then(|| vec![FoldOut::Value(data.operand(0))])
        }

        // Slicing the entire source reroutes to the source.
        OpKind::AsyncSlice => {
            sizes_equal(module, data.operand(1), data.operand(4))
                .then(|| vec![FoldOut::Value(data.operand(0))])
        }

        // An update covering the whole target replaces it.
        OpKind::AsyncUpdate => {
            sizes_equal(module, data.operand(5), data.operand(1))
                .then(|| vec![FoldOut::Value(data.operand(4))])
        }

        // transfer(transfer(x)) -> x when the outer result restores the
        // original type and placement.
        OpKind::AsyncTransfer => {
            let inner = module.defining_op(data.operand(0))?;
            let inner_data = &module.ops[inner];
            if inner_data.kind != OpKind::AsyncTransfer {
                return None;
            }
            let original = inner_data.operand(0);
            (module.value_ty(original) == module.value_ty(data.result(0))
                && inner_data.source_affinity == data.affinity)
                .then(|| vec![FoldOut::Value(original)])
        }

        OpKind::TimepointJoin => {
            let timepoints = &data.operands;
            if timepoints
                .iter()
                .all(|&tp| constant_attr(module, tp).is_some_and(|a| a.is_timepoint()))
            {
                return Some(vec![FoldOut::Attr(Attr::Timepoint)]);
            }
            (timepoints.len() == 1).then(|| vec![FoldOut::Value(timepoints[0])])
        }

        // An immediate wait releases its resources untouched.
        OpKind::TimepointAwait => {
            constant_attr(module, data.operand(0))?
                .is_timepoint()
                .then(|| {
                    data.awaited_resources()
                        .iter()
                        .map(|&r| FoldOut::Value(r))
                        .collect()
                })
        }

        _ => None,
    }
}

fn fold_pack(data: &Operation) -> Option<Vec<FoldOut>> {
    let slices = data.segment_range(0).len();
    match slices {
        // No slices: a zero-length slab.
        0 => Some(vec![FoldOut::Attr(Attr::Literal(Literal::Index(0)))]),
        // A single slice needs no packing: total length is the slice size and
        // the offset is the base offset (or zero).
        1 => {
            let total = data.segment(0)[0];
            let offset = data
                .segment(1)
                .first()
                .map(|&o| FoldOut::Value(o))
                .unwrap_or(FoldOut::Attr(Attr::Literal(Literal::Index(0))));
            Some(vec![FoldOut::Value(total), offset])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::{Builder, Lifetime};

    #[test]
    fn subview_full_range_folds_to_source() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(64);
        let v = b.const_f32(0.0);
        let src = b.async_splat(v, size, Lifetime::Staging);
        let zero = b.const_index(0);
        let view = b.subview(src, size, zero, size);
        let view_op = module.defining_op(view).unwrap();

        let outs = fold_op(&module, view_op).expect("folds");
        assert!(matches!(outs[0], FoldOut::Value(value) if value == src));
    }

    #[test]
    fn subview_partial_range_does_not_fold() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(64);
        let half = b.const_index(32);
        let v = b.const_f32(0.0);
        let src = b.async_splat(v, size, Lifetime::Staging);
        let zero = b.const_index(0);
        let view = b.subview(src, size, zero, half);
        let view_op = module.defining_op(view).unwrap();
        assert!(fold_op(&module, view_op).is_none());
    }

    #[test]
    fn sizes_equal_through_constants() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let a = b.const_index(16);
        let bb = b.const_index(16);
        let c = b.const_index(32);
        assert!(sizes_equal(&module, a, bb));
        assert!(!sizes_equal(&module, a, c));
    }

    #[test]
    fn full_update_folds_to_update_value() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let target = b.async_splat(v, size, Lifetime::Transient);
        let update = b.async_splat(v, size, Lifetime::Transient);
        let zero = b.const_index(0);
        let updated = b.async_update(target, size, zero, size, update, size);
        let update_op = module.defining_op(updated).unwrap();

        let outs = fold_op(&module, update_op).expect("folds");
        assert!(matches!(outs[0], FoldOut::Value(value) if value == update));
    }

    #[test]
    fn transfer_chain_folds_to_origin() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let origin = b.async_splat(v, size, Lifetime::External);
        let staged = b.async_transfer(origin, size, Lifetime::Staging);
        let back = b.async_transfer(staged, size, Lifetime::External);
        let back_op = module.defining_op(back).unwrap();

        let outs = fold_op(&module, back_op).expect("folds");
        assert!(matches!(outs[0], FoldOut::Value(value) if value == origin));

        // The inner transfer changes type and does not fold.
        let staged_op = module.defining_op(staged).unwrap();
        assert!(fold_op(&module, staged_op).is_none());
    }

    #[test]
    fn await_of_immediate_folds_to_operands() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let r = b.async_splat(v, size, Lifetime::External);
        let tp = b.timepoint_immediate();
        let await_op = b.timepoint_await(tp, &[r], &[size]);

        let outs = fold_op(&module, await_op).expect("folds");
        assert_eq!(outs.len(), 1);
        assert!(matches!(outs[0], FoldOut::Value(value) if value == r));
    }

    #[test]
    fn join_folds() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let t0 = b.timepoint_immediate();
        let t1 = b.timepoint_immediate();
        let all_immediate = b.timepoint_join(&[t0, t1]);
        drop(b);
        let op = module.defining_op(all_immediate).unwrap();
        assert!(matches!(
            fold_op(&module, op).expect("folds")[0],
            FoldOut::Attr(Attr::Timepoint)
        ));

        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(4);
        let v = b.const_f32(0.0);
        let r = b.async_splat(v, size, Lifetime::Transient);
        let exec = b.async_execute(&[], &[r], &[size], &[], &[]);
        let real_tp = module.ops[exec].result_timepoint();
        let mut b = Builder::at_end(&mut module, entry);
        let single = b.timepoint_join(&[real_tp]);
        let op = module.defining_op(single).unwrap();
        assert!(matches!(
            fold_op(&module, op).expect("folds")[0],
            FoldOut::Value(value) if value == real_tp
        ));
    }

    #[test]
    fn pack_folds_empty_and_single() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let empty = b.pack(&[], None, &[]);
        drop(b);
        let outs = fold_op(&module, empty).expect("folds");
        assert!(matches!(
            outs[0],
            FoldOut::Attr(Attr::Literal(Literal::Index(0)))
        ));

        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(128);
        let base = b.const_index(64);
        let single = b.pack(&[size], Some(base), &[(0, 4)]);
        let outs = fold_op(&module, single).expect("folds");
        assert!(matches!(outs[0], FoldOut::Value(v) if v == size));
        assert!(matches!(outs[1], FoldOut::Value(v) if v == base));
    }
}
