//! Shared helpers for canonicalization integration tests.

use rill_canon::canonicalize;
use rill_ir::{Builder, Handle, Lifetime, Module, OpKind, Operation, dump_module};

/// Canonicalizes and panics with a module dump on failure.
#[allow(dead_code)]
pub fn canonicalize_ok(module: &mut Module) {
    let _ = env_logger::builder().is_test(true).try_init();
    if let Err(err) = canonicalize(module) {
        panic!("canonicalization failed: {err}\n{}", dump_module(module));
    }
}

/// Every op in the module, nested regions included.
#[allow(dead_code)]
pub fn all_ops(module: &Module) -> Vec<Handle<Operation>> {
    let mut ops = Vec::new();
    module.collect_ops(module.body, &mut ops);
    ops
}

#[allow(dead_code)]
pub fn count_kind(module: &Module, kind: OpKind) -> usize {
    all_ops(module)
        .into_iter()
        .filter(|&op| module.ops[op].kind == kind)
        .count()
}

#[allow(dead_code)]
pub fn find_kind(module: &Module, kind: OpKind) -> Option<Handle<Operation>> {
    all_ops(module)
        .into_iter()
        .find(|&op| module.ops[op].kind == kind)
}

/// An execution region with real work inside, so its timepoint stays
/// pending: captures a splat, dispatches on it, yields the result.
#[allow(dead_code)]
pub fn pending_producer(module: &mut Module) -> Handle<Operation> {
    let entry = module.entry_block();
    let mut b = Builder::at_end(module, entry);
    let size = b.const_index(64);
    let v = b.const_f32(0.5);
    let splat = b.async_splat(v, size, Lifetime::Transient);
    let exec = b.async_execute(&[], &[splat], &[size], &[Lifetime::Transient], &[size]);
    let body = Builder::body_block(module, exec);
    let arg = module.blocks[body].args[0];
    let mut bb = Builder::at_end(module, body);
    let d = bb.async_dispatch("producer", &[arg], &[size], &[size], &[Lifetime::Transient]);
    let out = bb.result(d, 0);
    bb.yield_(&[out]);
    exec
}
