//! Utilities shared across patterns.

use rill_ir::dominance::ancestor_block_in_region;
use rill_ir::{DominanceInfo, Handle, Module, OpKind, Operation, Region, Value, ValueDef};

use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Finds the op to insert before when sinking `op` down to `target`, such
/// that the move cannot oscillate with another movement pattern.
///
/// If every op strictly between `op` and `target` produces an operand of
/// `target`, sinking would immediately invite the reverse move (two splats
/// feeding one consumer take turns hopping over each other), so `op` stays
/// put.
pub(crate) fn find_insertion_point_before(
    module: &Module,
    op: Handle<Operation>,
    target: Handle<Operation>,
) -> Handle<Operation> {
    if module.ops[op].block == module.ops[target].block {
        let producers: Vec<Handle<Operation>> = module.ops[target]
            .operands
            .iter()
            .filter_map(|&v| module.defining_op(v))
            .collect();
        let block = module.ops[op].block.expect("attached op");
        let ops = &module.blocks[block].ops;
        let from = ops.iter().position(|&o| o == op).expect("op in block");
        let to = ops.iter().position(|&o| o == target).expect("target in block");
        if from >= to {
            // Target precedes the op; there is nothing to sink past.
            return op;
        }
        let all_used = ops[from + 1..to].iter().all(|o| producers.contains(o));
        if all_used {
            return op;
        }
    }
    target
}

/// Sinks `op` immediately before `target` unless the anti-oscillation guard
/// says the move is a no-op.
pub(crate) fn sink_op(
    rewriter: &mut Rewriter<'_>,
    op: Handle<Operation>,
    target: Handle<Operation>,
) -> RewriteResult {
    let before = find_insertion_point_before(rewriter.module(), op, target);
    if before == op {
        return Err(MatchFailure);
    }
    rewriter.move_before(op, before);
    Ok(())
}

/// The subview op defining `value`, if any.
pub(crate) fn find_subview_op(
    module: &Module,
    value: Handle<Value>,
) -> Option<Handle<Operation>> {
    let op = module.defining_op(value)?;
    (module.ops[op].kind == OpKind::ResourceSubview).then_some(op)
}

/// `true` if any consumer marks a use of `value` as a tied (in-place)
/// operand.
pub(crate) fn has_any_tied_uses(module: &Module, value: Handle<Value>) -> bool {
    module
        .uses(value)
        .iter()
        .any(|u| module.ops[u.op].is_operand_tied(u.index))
}

/// The first user inside the nearest common dominator block of all users,
/// falling back to that block's terminator. Users nested in regions are
/// hoisted to their ancestor in `region` first.
pub(crate) fn first_user_in_common_dominator(
    module: &Module,
    region: Handle<Region>,
    users: &[Handle<Operation>],
) -> Option<Handle<Operation>> {
    let user_block = |u: Handle<Operation>| {
        module.ops[u]
            .block
            .and_then(|b| ancestor_block_in_region(module, b, region))
    };
    let dom = DominanceInfo::new(module, region);
    let mut common = user_block(users[0])?;
    for &user in &users[1..] {
        common = dom.nearest_common_dominator(common, user_block(user)?);
    }
    let mut target = module.terminator(common)?;
    for &user in users {
        if module.ops[user].block == Some(common) && module.is_before_in_block(user, target) {
            target = user;
        }
    }
    Some(target)
}

/// Walks result→tied-operand links back to the storage a value aliases.
pub(crate) fn find_tied_base_value(module: &Module, value: Handle<Value>) -> Handle<Value> {
    let mut current = value;
    loop {
        let ValueDef::OpResult { op, index } = module.values[current].def else {
            return current;
        };
        let Some(operand) = module.ops[op].tied_operand_index(index as usize) else {
            return current;
        };
        current = module.ops[op].operand(operand);
    }
}
