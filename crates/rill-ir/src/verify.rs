//! IR structural verification.
//!
//! Checks the invariants every rewrite must preserve and collects
//! diagnostics. Verification never modifies the module.

use crate::arena::Handle;
use crate::dominance::value_dominates;
use crate::error::Diagnostic;
use crate::module::{Module, ValueDef};
use crate::op::{Loc, OpKind, Operation};
use crate::types::Lifetime;

/// Collects all structural diagnostics for a module.
pub fn verify(module: &Module) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let mut ops = Vec::new();
    module.collect_ops(module.body, &mut ops);

    for &op in &ops {
        verify_operands(module, op, &mut diags);
        verify_ties(module, op, &mut diags);
        verify_regions(module, op, &mut diags);
        verify_sizes(module, op, &mut diags);
    }
    verify_terminators(module, &mut diags);
    diags
}

fn verify_operands(module: &Module, op: Handle<Operation>, diags: &mut Vec<Diagnostic>) {
    let data = &module.ops[op];
    for (i, &operand) in data.operands.iter().enumerate() {
        if !module.values.contains(operand) {
            diags.push(Diagnostic::new(
                format!("{} operand {i} references an erased value", data.kind.name()),
                data.loc,
            ));
            continue;
        }
        if !value_dominates(module, operand, op) {
            diags.push(Diagnostic::new(
                format!(
                    "{} operand {i} is not dominated by its definition",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
    }
}

fn verify_ties(module: &Module, op: Handle<Operation>, diags: &mut Vec<Diagnostic>) {
    let data = &module.ops[op];
    for (i, &result) in data.results.iter().enumerate() {
        let Some(operand_index) = data.tied_operand_index(i) else {
            continue;
        };
        let Some(&operand) = data.operands.get(operand_index) else {
            diags.push(Diagnostic::new(
                format!(
                    "{} result {i} tied to out-of-range operand {operand_index}",
                    data.kind.name()
                ),
                data.loc,
            ));
            continue;
        };
        let operand_ty = module.value_ty(operand);
        let result_ty = module.value_ty(result);
        if !result_ty.tie_compatible(operand_ty) {
            diags.push(Diagnostic::new(
                format!(
                    "{} result {i} ({result_ty}) tied to incompatible operand {operand_index} \
                     ({operand_ty})",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
        if operand_ty.lifetime() == Some(Lifetime::Constant) {
            diags.push(Diagnostic::new(
                format!(
                    "{} result {i} ties a constant-lifetime operand; constants are immutable",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
    }
}

fn verify_regions(module: &Module, op: Handle<Operation>, diags: &mut Vec<Diagnostic>) {
    let data = &module.ops[op];
    if data.kind.num_regions() == 0 {
        return;
    }
    if data.regions.len() != 1 {
        diags.push(Diagnostic::new(
            format!("{} must carry exactly one region", data.kind.name()),
            data.loc,
        ));
        return;
    }
    let region = data.regions[0];
    let blocks = &module.regions[region].blocks;
    if blocks.len() != 1 {
        diags.push(Diagnostic::new(
            format!(
                "{} region must have exactly one block, found {}",
                data.kind.name(),
                blocks.len()
            ),
            data.loc,
        ));
        return;
    }
    let Some(terminator) = module.terminator(blocks[0]) else {
        diags.push(Diagnostic::new(
            format!("{} region block is not terminated", data.kind.name()),
            data.loc,
        ));
        return;
    };
    if module.ops[terminator].kind != OpKind::Yield {
        diags.push(Diagnostic::new(
            format!("{} region must end in a yield", data.kind.name()),
            data.loc,
        ));
        return;
    }

    // Yielded values line up with the op's resource results.
    let resource_results: Vec<_> = data
        .results
        .iter()
        .filter(|&&r| module.value_ty(r).is_resource())
        .copied()
        .collect();
    let yielded = module.ops[terminator].operands.clone();
    if yielded.len() != resource_results.len() {
        diags.push(Diagnostic::new(
            format!(
                "{} yields {} values but has {} resource results",
                data.kind.name(),
                yielded.len(),
                resource_results.len()
            ),
            data.loc,
        ));
        return;
    }
    for (i, (&y, &r)) in yielded.iter().zip(resource_results.iter()).enumerate() {
        let yielded_ty = module.value_ty(y);
        let result_ty = module.value_ty(r);
        if !result_ty.tie_compatible(yielded_ty) {
            diags.push(Diagnostic::new(
                format!(
                    "{} yield {i} type {yielded_ty} does not match result type {result_ty}",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
    }
}

fn verify_sizes(module: &Module, op: Handle<Operation>, diags: &mut Vec<Diagnostic>) {
    let data = &module.ops[op];
    for (i, &result) in data.results.iter().enumerate() {
        if !module.value_ty(result).is_resource() {
            continue;
        }
        if module.find_size_value(result).is_none() {
            diags.push(Diagnostic::new(
                format!(
                    "{} result {i} is a resource with no discoverable size",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
    }
    // A size-less value measured twice would be ambiguous.
    for (i, &result) in data.results.iter().enumerate() {
        if module.result_size(op, i).is_some() || !module.value_ty(result).is_resource() {
            continue;
        }
        let sizers = module
            .uses(result)
            .iter()
            .filter(|u| module.ops[u.op].kind == OpKind::ResourceSize)
            .count();
        if sizers > 1 {
            diags.push(Diagnostic::new(
                format!(
                    "{} result {i} has {sizers} competing resource.size definitions",
                    data.kind.name()
                ),
                data.loc,
            ));
        }
    }
}

fn verify_terminators(module: &Module, diags: &mut Vec<Diagnostic>) {
    let mut regions = vec![module.body];
    let mut ops = Vec::new();
    module.collect_ops(module.body, &mut ops);
    for op in ops {
        regions.extend(module.ops[op].regions.iter().copied());
    }
    for region in regions {
        for &block in &module.regions[region].blocks {
            let block_ops = &module.blocks[block].ops;
            for (i, &op) in block_ops.iter().enumerate() {
                let is_last = i + 1 == block_ops.len();
                let data = &module.ops[op];
                if data.kind.is_terminator() && !is_last {
                    diags.push(Diagnostic::new(
                        format!("{} is not last in its block", data.kind.name()),
                        data.loc,
                    ));
                }
                if is_last && !data.kind.is_terminator() {
                    diags.push(Diagnostic::new(
                        format!("block ends in non-terminator {}", data.kind.name()),
                        data.loc,
                    ));
                }
            }
        }
    }
    // Block arguments of erased blocks would dangle; check defs resolve.
    for (value, data) in module.values.iter() {
        match data.def {
            ValueDef::OpResult { op, index } => {
                if module.ops.try_get(op).is_none_or(|o| {
                    o.results.get(index as usize) != Some(&value)
                }) {
                    diags.push(Diagnostic::new(
                        "value definition out of sync with its operation".to_string(),
                        Loc::UNKNOWN,
                    ));
                }
            }
            ValueDef::BlockArg { block, index } => {
                if module.blocks.try_get(block).is_none_or(|b| {
                    b.args.get(index as usize) != Some(&value)
                }) {
                    diags.push(Diagnostic::new(
                        "block argument out of sync with its block".to_string(),
                        Loc::UNKNOWN,
                    ));
                }
            }
        }
    }
}
