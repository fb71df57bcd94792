//! Worklist-based fixed-point driver.
//!
//! Deterministic for a fixed input: ops are seeded in walk order and popped
//! LIFO (innermost/latest first) with duplicate suppression, patterns run in
//! registration order per kind, and every mutation re-enqueues the affected
//! operations. A hard step cap turns rewrite cycles into errors instead of
//! hangs.

use std::collections::HashSet;

use rill_ir::{Builder, Handle, Module, Operation, verify};

use crate::fold::{self, FoldOut};
use crate::patterns::PatternSet;
use crate::rewriter::Rewriter;
use crate::{CanonError, CanonicalizeOptions};

struct Worklist {
    stack: Vec<Handle<Operation>>,
    pending: HashSet<Handle<Operation>>,
}

impl Worklist {
    fn seed(module: &Module) -> Self {
        let mut stack = Vec::new();
        module.collect_ops(module.body, &mut stack);
        let pending = stack.iter().copied().collect();
        Self { stack, pending }
    }

    fn push(&mut self, op: Handle<Operation>) {
        if self.pending.insert(op) {
            self.stack.push(op);
        }
    }

    fn pop(&mut self) -> Option<Handle<Operation>> {
        let op = self.stack.pop()?;
        self.pending.remove(&op);
        Some(op)
    }
}

/// Tracks recently rewritten kinds for divergence diagnostics.
struct StepMeter {
    steps: usize,
    cap: usize,
    recent: Vec<&'static str>,
}

impl StepMeter {
    const RECENT: usize = 8;

    fn new(cap: usize) -> Self {
        Self {
            steps: 0,
            cap,
            recent: Vec::new(),
        }
    }

    fn note(&mut self, kind_name: &'static str) -> Result<(), CanonError> {
        self.steps += 1;
        if self.recent.len() == Self::RECENT {
            self.recent.remove(0);
        }
        self.recent.push(kind_name);
        if self.steps > self.cap {
            Err(CanonError::Diverged {
                steps: self.steps,
                recent: self.recent.clone(),
            })
        } else {
            Ok(())
        }
    }
}

pub(crate) fn run(
    module: &mut Module,
    patterns: &PatternSet,
    options: &CanonicalizeOptions,
) -> Result<(), CanonError> {
    let mut worklist = Worklist::seed(module);
    let edges: usize = worklist
        .stack
        .iter()
        .map(|&op| module.ops[op].operands.len())
        .sum();
    let cap = options.iteration_factor * (worklist.stack.len() + edges).max(1);
    let mut meter = StepMeter::new(cap);

    while let Some(op) = worklist.pop() {
        if !module.ops.contains(op) {
            continue;
        }
        let kind = module.ops[op].kind;

        // Trivially dead ops marked dead-eliminable go first.
        if kind.elide_when_unused()
            && !module.ops[op].results.is_empty()
            && module.all_results_unused(op)
        {
            let orphaned: Vec<_> = module.ops[op]
                .operands
                .iter()
                .filter_map(|&v| module.defining_op(v))
                .collect();
            module.erase_op(op);
            log::trace!("erased dead {}", kind.name());
            meter.note(kind.name())?;
            for o in orphaned {
                worklist.push(o);
            }
            continue;
        }

        // Fold before patterns.
        if let Some(outs) = fold::fold_op(module, op) {
            apply_fold(module, op, outs, &mut worklist);
            log::trace!("folded {}", kind.name());
            meter.note(kind.name())?;
            continue;
        }

        for pattern in patterns.for_kind(kind) {
            let mut rewriter = Rewriter::new(module, op);
            if pattern.match_and_rewrite(op, &mut rewriter).is_err() {
                continue;
            }
            let notes = rewriter.into_notes();
            log::trace!("applied {} on {}", pattern.name(), kind.name());
            meter.note(kind.name())?;
            if module.ops.contains(op) {
                worklist.push(op);
            }
            for touched in notes.touched {
                if !module.ops.contains(touched) {
                    continue;
                }
                worklist.push(touched);
                for &result in &module.ops[touched].results {
                    for u in module.uses(result) {
                        worklist.push(u.op);
                    }
                }
            }
            for orphan in notes.orphaned {
                if module.ops.contains(orphan) {
                    worklist.push(orphan);
                }
            }
            break;
        }
    }

    let diagnostics = verify(module);
    if !diagnostics.is_empty() {
        log::warn!(
            "canonicalization left invalid IR: {}",
            diagnostics[0].message
        );
        return Err(CanonError::VerifyFailed { diagnostics });
    }
    Ok(())
}

fn apply_fold(
    module: &mut Module,
    op: Handle<Operation>,
    outs: Vec<FoldOut>,
    worklist: &mut Worklist,
) {
    let results = module.ops[op].results.clone();
    debug_assert_eq!(results.len(), outs.len());
    let orphaned: Vec<_> = module.ops[op]
        .operands
        .iter()
        .filter_map(|&v| module.defining_op(v))
        .collect();

    for (&result, out) in results.iter().zip(outs) {
        let replacement = match out {
            FoldOut::Value(value) => value,
            FoldOut::Attr(attr) => materialize(module, op, attr),
        };
        for u in module.uses(result).to_vec() {
            worklist.push(u.op);
        }
        module.replace_all_uses_with(result, replacement);
        if let Some(def) = module.defining_op(replacement) {
            worklist.push(def);
        }
    }
    module.erase_op(op);
    for o in orphaned {
        if module.ops.contains(o) {
            worklist.push(o);
        }
    }
}

/// Materializes a fold-produced attribute as a constant-like op before `op`.
fn materialize(
    module: &mut Module,
    op: Handle<Operation>,
    attr: rill_ir::Attr,
) -> Handle<rill_ir::Value> {
    let ip = module.ip_before(op);
    let mut b = Builder::new(module, ip);
    match attr {
        rill_ir::Attr::Literal(literal) => b.const_literal(literal),
        rill_ir::Attr::Timepoint => b.timepoint_immediate(),
        other => unreachable!("folds only materialize scalars and timepoints, got {other:?}"),
    }
}
