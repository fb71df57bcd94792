//! Canonicalizations for `tensor.*` ops.

use rill_ir::{Handle, Lifetime, Operation};

use crate::patterns::RewritePattern;
use crate::patterns::helpers::has_any_tied_uses;
use crate::rewriter::{MatchFailure, RewriteResult, Rewriter};

/// Expands a splat-valued `tensor.constant` into scalar constant + splat +
/// transfer into the target lifetime, exposing the scalar for later fusion
/// with fills.
pub(crate) struct TensorConstantToSplat;

impl RewritePattern for TensorConstantToSplat {
    fn name(&self) -> &'static str {
        "tensor-constant-to-splat"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        let Some(splat_value) = data.attr.as_ref().and_then(|a| a.splat_value()) else {
            return Err(rewriter
                .notify_match_failure(op, "only splat element attrs convert to splat ops"));
        };
        let result_size = data.operand(0);
        let result_lifetime = module
            .value_ty(data.result(0))
            .lifetime()
            .ok_or(MatchFailure)?;

        rewriter.set_insertion_point_before(op);
        let scalar = rewriter.const_literal(splat_value);
        let splat = rewriter.tensor_splat(scalar, result_size, Lifetime::Unknown);
        let transferred = rewriter.async_transfer(splat, result_size, result_lifetime);
        rewriter.replace_op(op, &[transferred]);
        Ok(())
    }
}

/// Removes clones that set up no tie: nobody overwrites the result, so the
/// source can flow through directly.
pub(crate) struct ElideUnneededTensorClones;

impl RewritePattern for ElideUnneededTensorClones {
    fn name(&self) -> &'static str {
        "elide-unneeded-tensor-clones"
    }

    fn match_and_rewrite(
        &self,
        op: Handle<Operation>,
        rewriter: &mut Rewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let data = &module.ops[op];
        if has_any_tied_uses(module, data.result(0)) {
            return Err(MatchFailure);
        }
        let source = data.operand(0);
        rewriter.replace_op(op, &[source]);
        Ok(())
    }
}
