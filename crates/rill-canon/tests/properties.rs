//! Property-based tests over randomly generated resource pipelines.
//!
//! Uses `proptest` to build arbitrary chains of splat/clone/slice/fill/
//! update/transfer ops and verify the canonicalizer's laws: it never fails
//! on valid IR, the result verifies, and a second run changes nothing.

use proptest::prelude::*;
use rill_canon::canonicalize;
use rill_ir::{Builder, Handle, Lifetime, Module, Value, dump_module, verify};

#[derive(Clone, Copy, Debug)]
enum Step {
    Clone,
    SliceHalf,
    FillFull,
    FillHalf,
    TransferStaging,
    TransferSame,
    UpdateFull,
    /// Two fills off the same base, forcing copy-on-write.
    ForkFill,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Clone),
        Just(Step::SliceHalf),
        Just(Step::FillFull),
        Just(Step::FillHalf),
        Just(Step::TransferStaging),
        Just(Step::TransferSame),
        Just(Step::UpdateFull),
        Just(Step::ForkFill),
    ]
}

/// Builds a straight-line pipeline from the steps; every intermediate that
/// forks stays live through the final return.
fn build_pipeline(steps: &[Step]) -> Module {
    let mut module = Module::new();
    let entry = module.entry_block();
    let mut b = Builder::at_end(&mut module, entry);

    let mut len: i64 = 64;
    let mut size = b.const_index(len);
    let v = b.const_f32(1.0);
    let mut current = b.async_splat(v, size, Lifetime::Transient);
    let mut live: Vec<Handle<Value>> = Vec::new();

    for step in steps {
        match step {
            Step::Clone => {
                current = b.async_clone(current, size, size, Lifetime::Transient);
            }
            Step::SliceHalf if len >= 2 => {
                len /= 2;
                let zero = b.const_index(0);
                let half = b.const_index(len);
                current = b.async_slice(current, size, zero, half, half, Lifetime::Transient);
                size = half;
            }
            Step::SliceHalf => {}
            Step::FillFull => {
                let zero = b.const_index(0);
                current = b.async_fill(current, size, zero, size, v);
            }
            Step::FillHalf if len >= 2 => {
                let zero = b.const_index(0);
                let half = b.const_index(len / 2);
                current = b.async_fill(current, size, zero, half, v);
            }
            Step::FillHalf => {}
            Step::TransferStaging => {
                current = b.async_transfer(current, size, Lifetime::Staging);
                current = b.async_transfer(current, size, Lifetime::Transient);
            }
            Step::TransferSame => {
                current = b.async_transfer(current, size, Lifetime::Transient);
            }
            Step::UpdateFull => {
                let zero = b.const_index(0);
                let patch = b.async_splat(v, size, Lifetime::Transient);
                current = b.async_update(current, size, zero, size, patch, size);
            }
            Step::ForkFill => {
                let zero = b.const_index(0);
                let other = b.async_fill(current, size, zero, size, v);
                live.push(other);
                current = b.async_fill(current, size, zero, size, v);
            }
        }
    }

    live.push(current);
    b.ret(&live);
    module
}

proptest! {
    #[test]
    fn random_pipelines_canonicalize(steps in proptest::collection::vec(step_strategy(), 0..16)) {
        let mut module = build_pipeline(&steps);
        prop_assert!(verify(&module).is_empty(), "generator produced invalid IR");

        canonicalize(&mut module).expect("canonicalization succeeds");
        prop_assert!(verify(&module).is_empty());

        // Idempotence: a second run reaches the same tree.
        let first = dump_module(&module);
        canonicalize(&mut module).expect("second run succeeds");
        prop_assert_eq!(first, dump_module(&module));
    }

    #[test]
    fn pipelines_never_lose_the_returned_value(steps in proptest::collection::vec(step_strategy(), 1..12)) {
        let mut module = build_pipeline(&steps);
        canonicalize(&mut module).expect("canonicalization succeeds");
        let entry = module.entry_block();
        let ret = module.terminator(entry).expect("terminated");
        prop_assert!(!module.ops[ret].operands.is_empty());
        for &out in &module.ops[ret].operands {
            prop_assert!(module.value_ty(out).is_resource());
        }
    }
}
