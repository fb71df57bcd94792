//! Static copy-on-write materialization.

use rill_ir::{Lifetime, Handle, OpKind, Operation};

use crate::patterns::RewritePattern;
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Materializes copy-on-write clones where the use-def chain shows a value
/// being overwritten more than once.
///
/// What a runtime does dynamically with copy-on-write is reconstructed here
/// statically: each tied (in-place) consumer beyond the first gets a private
/// clone inserted right before it, and constant-lifetime values are cloned
/// for every tied consumer since constants may never be overwritten. Untied
/// consumers keep observing the original value.
pub(crate) struct MaterializeCow;

impl RewritePattern for MaterializeCow {
    fn name(&self) -> &'static str {
        "materialize-cow"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let mut changed = false;
        let results = rewriter.module().ops[op].results.clone();
        let source_affinity = rewriter.module().ops[op].affinity;

        for result in results {
            let module = rewriter.module();
            let Some(lifetime) = module.value_ty(result).lifetime() else {
                continue;
            };
            // A constant result may never be the storage side of a tie.
            let force_clone = lifetime == Lifetime::Constant;

            // Classify per use: one consumer may use the result several
            // times, some tied and some not, and every tied use needs its
            // own clone.
            let mut tied_uses = Vec::new();
            let mut untied_uses = 0usize;
            for use_ in module.uses(result) {
                let user = &module.ops[use_.op];
                if user.kind == OpKind::TimepointAwait {
                    continue;
                }
                if user.is_operand_tied(use_.index) {
                    tied_uses.push(*use_);
                } else {
                    untied_uses += 1;
                }
            }
            if tied_uses.is_empty() {
                // All uses are plain capturing reads.
                continue;
            }
            if tied_uses.len() == 1 && untied_uses == 0 && !force_clone {
                // The single tied consumer owns the storage already.
                continue;
            }
            changed = true;

            for tied in tied_uses {
                rewriter.set_insertion_point_before(tied.op);
                let size = rewriter.query_value_size(result);
                let target_affinity = rewriter.module().ops[tied.op].affinity.or(source_affinity);
                let clone =
                    rewriter.async_clone(result, size, size, Lifetime::Unknown, target_affinity);
                rewriter.set_operand(tied.op, tied.index, clone);
            }
        }

        if changed { Ok(()) } else { Err(MatchFailure) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_ir::{Attr, Builder, Literal, Module};

    #[test]
    fn constant_with_tied_consumers_gets_private_clones() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let c = b.async_constant(
            Attr::Splat {
                value: Literal::F32(1.0),
                count: 4,
            },
            size,
            Lifetime::Constant,
        );
        let zero = b.const_index(0);
        let v = b.const_f32(2.0);
        let f0 = b.async_fill(c, size, zero, size, v);
        let f1 = b.async_fill(c, size, zero, size, v);
        let untied = b.async_clone(c, size, size, Lifetime::Transient);
        b.ret(&[f0, f1, untied]);
        let const_op = module.defining_op(c).unwrap();
        let fill0 = module.defining_op(f0).unwrap();
        let fill1 = module.defining_op(f1).unwrap();

        let mut rw = Rewriter::new(&mut module, const_op);
        MaterializeCow
            .match_and_rewrite(const_op, &mut rw)
            .expect("materializes");
        let _ = rw.into_notes();

        // Each fill now targets its own clone of the constant.
        let t0 = module.ops[fill0].operand(0);
        let t1 = module.ops[fill1].operand(0);
        assert_ne!(t0, c);
        assert_ne!(t1, c);
        assert_ne!(t0, t1);
        assert_eq!(module.defining_kind(t0), Some(OpKind::AsyncClone));
        assert_eq!(module.defining_kind(t1), Some(OpKind::AsyncClone));
        // The untied use keeps observing the constant directly.
        let untied_op = module.defining_op(untied).unwrap();
        assert_eq!(module.ops[untied_op].operand(0), c);
        // Applying again finds all ties satisfied by the fresh clones.
        let mut rw = Rewriter::new(&mut module, const_op);
        assert!(MaterializeCow.match_and_rewrite(const_op, &mut rw).is_err());
        let _ = rw.into_notes();
    }

    #[test]
    fn single_tied_use_is_left_alone() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let base = b.async_splat(v, size, Lifetime::Transient);
        let zero = b.const_index(0);
        let filled = b.async_fill(base, size, zero, size, v);
        b.ret(&[filled]);
        let splat_op = module.defining_op(base).unwrap();

        let mut rw = Rewriter::new(&mut module, splat_op);
        assert!(MaterializeCow.match_and_rewrite(splat_op, &mut rw).is_err());
        let _ = rw.into_notes();
    }

    #[test]
    fn mixed_tied_and_untied_clones_only_the_tie() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(0.0);
        let base = b.async_splat(v, size, Lifetime::Transient);
        let zero = b.const_index(0);
        let filled = b.async_fill(base, size, zero, size, v);
        let reader = b.async_transfer(base, size, Lifetime::Staging);
        b.ret(&[filled, reader]);
        let splat_op = module.defining_op(base).unwrap();
        let fill_op = module.defining_op(filled).unwrap();
        let transfer_op = module.defining_op(reader).unwrap();

        let mut rw = Rewriter::new(&mut module, splat_op);
        MaterializeCow
            .match_and_rewrite(splat_op, &mut rw)
            .expect("materializes");
        let _ = rw.into_notes();

        assert_eq!(
            module.defining_kind(module.ops[fill_op].operand(0)),
            Some(OpKind::AsyncClone)
        );
        assert_eq!(module.ops[transfer_op].operand(0), base);
    }
}
