#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rill_canon::canonicalize;
use rill_ir::{Builder, Lifetime, Module, verify};

#[derive(Arbitrary, Debug, Clone, Copy)]
enum Step {
    Clone,
    SliceHalf,
    FillFull,
    FillHalf,
    TransferStaging,
    UpdateFull,
    ForkFill,
}

fuzz_target!(|steps: Vec<Step>| {
    if steps.len() > 32 {
        return;
    }

    let mut module = Module::new();
    let entry = module.entry_block();
    let mut b = Builder::at_end(&mut module, entry);

    let mut len: i64 = 64;
    let mut size = b.const_index(len);
    let v = b.const_f32(1.0);
    let mut current = b.async_splat(v, size, Lifetime::Transient);
    let mut live = Vec::new();

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

    // Valid input IR must canonicalize without error and stay valid.
    assert!(verify(&module).is_empty());
    canonicalize(&mut module).expect("canonicalization must converge");
    assert!(verify(&module).is_empty());
});
