//! The stream rewrite pattern library.
//!
//! Patterns are local: each examines one operation and its immediate
//! defs/uses. Directional rewrites (sinks, propagations, form conversions)
//! have no registered inverse, and movement patterns share the
//! anti-oscillation guard in [`helpers`].

use std::collections::HashMap;

use rill_ir::{Handle, OpKind, Operation};

use crate::rewriter::{RewriteResult, Rewriter};

mod async_ops;
mod cmd;
mod cow;
mod execute;
mod helpers;
mod resource;
mod tensor;
mod timepoint;

/// A local rewrite rooted at one operation kind.
pub trait RewritePattern {
    /// Name used in trace logs.
    fn name(&self) -> &'static str;

    /// Matches `op` and applies the rewrite through `rewriter`, or declines.
    fn match_and_rewrite(&self, op: Handle<Operation>, rewriter: &mut Rewriter<'_>)
    -> RewriteResult;
}

/// Registered patterns, ordered per kind by insertion.
#[derive(Default)]
pub struct PatternSet {
    patterns: HashMap<OpKind, Vec<Box<dyn RewritePattern>>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: OpKind, pattern: Box<dyn RewritePattern>) {
        self.patterns.entry(kind).or_default().push(pattern);
    }

    pub fn for_kind(&self, kind: OpKind) -> &[Box<dyn RewritePattern>] {
        self.patterns.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Total number of registered patterns.
    pub fn len(&self) -> usize {
        self.patterns.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registers the canonicalization patterns for one operation kind.
pub fn populate_canonicalization_patterns(kind: OpKind, set: &mut PatternSet) {
    match kind {
        OpKind::ResourceSubview => {
            set.insert(kind, Box::new(resource::FoldChainedSubviews));
        }
        OpKind::ResourceLoad => {
            set.insert(kind, Box::new(resource::FoldSubviewIntoLoad));
        }
        OpKind::ResourceStore => {
            set.insert(kind, Box::new(resource::FoldSubviewIntoStore));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::ResourcePack => {
            set.insert(kind, Box::new(resource::PropagatePackBaseOffset));
            set.insert(kind, Box::new(resource::CanonicalizePackIntervals));
        }
        OpKind::TensorConstant => {
            set.insert(kind, Box::new(tensor::TensorConstantToSplat));
        }
        OpKind::TensorClone => {
            set.insert(kind, Box::new(tensor::ElideUnneededTensorClones));
        }
        OpKind::AsyncConstant => {
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncSplat => {
            set.insert(kind, Box::new(async_ops::SinkSplatsToConsumers));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncClone => {
            set.insert(kind, Box::new(async_ops::PropagateClonableOps));
            set.insert(kind, Box::new(async_ops::PropagateClonedSlices));
            set.insert(kind, Box::new(async_ops::ElideUnneededAsyncClones));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncSlice => {
            set.insert(kind, Box::new(async_ops::PropagateSliceClones));
            set.insert(kind, Box::new(async_ops::PropagateSplatsThroughSlices));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncFill => {
            set.insert(kind, Box::new(async_ops::FlattenFullFillToSplat));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncUpdate => {
            set.insert(kind, Box::new(async_ops::CombineSplatUpdateFromToFill));
            set.insert(kind, Box::new(async_ops::CombineSliceUpdateFromToCopy));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncCopy => {
            set.insert(kind, Box::new(async_ops::AsyncCopyFullSourceToUpdate));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncTransfer => {
            set.insert(kind, Box::new(async_ops::RedundantTransferElision));
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncDispatch => {
            set.insert(kind, Box::new(cow::MaterializeCow));
        }
        OpKind::AsyncExecute | OpKind::CmdExecute => {
            set.insert(kind, Box::new(execute::ElideImmediateExecuteWaits));
            set.insert(kind, Box::new(execute::ElideDuplicateExecuteWaits));
            set.insert(kind, Box::new(execute::ChainExecuteWaits));
            set.insert(kind, Box::new(execute::CloneCapturedExecuteSubviews));
            set.insert(kind, Box::new(execute::ElideNoOpExecute));
            set.insert(kind, Box::new(execute::ElideUnusedExecuteCaptures));
            if kind == OpKind::AsyncExecute {
                set.insert(kind, Box::new(execute::TieExecuteRegionResults));
                set.insert(kind, Box::new(cow::MaterializeCow));
            }
        }
        OpKind::CmdFlush | OpKind::CmdInvalidate | OpKind::CmdDiscard | OpKind::CmdFill => {
            set.insert(kind, Box::new(cmd::FoldSubviewsIntoCmdTarget));
        }
        OpKind::CmdCopy => {
            set.insert(kind, Box::new(cmd::FoldSubviewsIntoCmdCopy));
        }
        OpKind::CmdDispatch => {
            set.insert(kind, Box::new(cmd::FoldSubviewsIntoCmdDispatch));
        }
        OpKind::CmdSerial | OpKind::CmdConcurrent => {
            set.insert(kind, Box::new(execute::ElideEmptyRegion));
        }
        OpKind::TimepointJoin => {
            set.insert(kind, Box::new(timepoint::ElideImmediateJoinOperands));
            set.insert(kind, Box::new(timepoint::FoldDuplicateJoinOperands));
        }
        OpKind::TimepointAwait => {
            set.insert(kind, Box::new(timepoint::ElideImmediateAwaits));
            set.insert(kind, Box::new(timepoint::SinkAwaitToFirstConsumer));
            set.insert(kind, Box::new(timepoint::SinkSubviewsAcrossAwaits));
            set.insert(kind, Box::new(timepoint::GroupAwaitsByTimepoint));
            set.insert(kind, Box::new(timepoint::FoldDuplicateAwaitResources));
        }
        _ => {}
    }
}

/// Registers the full library.
pub fn populate_all_patterns(set: &mut PatternSet) {
    for kind in OpKind::ALL {
        populate_canonicalization_patterns(kind, set);
    }
}
