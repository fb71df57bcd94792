//! Dominance queries over region CFGs.
//!
//! Blocks form a CFG through terminator successors. The dominator tree is
//! computed with the iterative algorithm over reverse postorder; op-level
//! queries hoist nested operations to the ancestor in the queried region.

use std::collections::HashMap;

use crate::arena::Handle;
use crate::module::{Block, Module, Region, ValueDef, Value};
use crate::op::Operation;

/// Dominator tree for one region.
pub struct DominanceInfo {
    entry: Handle<Block>,
    rpo_index: HashMap<Handle<Block>, usize>,
    idom: HashMap<Handle<Block>, Handle<Block>>,
}

impl DominanceInfo {
    pub fn new(module: &Module, region: Handle<Region>) -> Self {
        let entry = module.regions[region].blocks[0];

        // Reverse postorder over successor edges.
        let mut postorder = Vec::new();
        let mut visited = Vec::new();
        let mut stack = vec![(entry, 0usize)];
        visited.push(entry);
        while let Some(&(block, next)) = stack.last() {
            let succs = successors(module, block);
            if next < succs.len() {
                stack.last_mut().expect("non-empty stack").1 += 1;
                let succ = succs[next];
                if !visited.contains(&succ) {
                    visited.push(succ);
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }
        postorder.reverse();
        let rpo_index: HashMap<_, _> = postorder
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i))
            .collect();

        let mut preds: HashMap<Handle<Block>, Vec<Handle<Block>>> = HashMap::new();
        for &block in &postorder {
            for succ in successors(module, block) {
                preds.entry(succ).or_default().push(block);
            }
        }

        let mut idom: HashMap<Handle<Block>, Handle<Block>> = HashMap::new();
        idom.insert(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().skip(1) {
                let mut new_idom = None;
                for &pred in preds.get(&block).map_or(&[][..], Vec::as_slice) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(other) => intersect(&idom, &rpo_index, pred, other),
                    });
                }
                if let Some(new_idom) = new_idom
                    && idom.get(&block) != Some(&new_idom)
                {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        Self {
            entry,
            rpo_index,
            idom,
        }
    }

    /// `true` if `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: Handle<Block>, b: Handle<Block>) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == self.entry {
                return false;
            }
            match self.idom.get(&current) {
                Some(&next) if next != current => current = next,
                _ => return false,
            }
        }
    }

    /// The nearest block dominating both `a` and `b`.
    pub fn nearest_common_dominator(&self, a: Handle<Block>, b: Handle<Block>) -> Handle<Block> {
        let (mut a, mut b) = (a, b);
        loop {
            if a == b {
                return a;
            }
            let (Some(&ia), Some(&ib)) = (self.rpo_index.get(&a), self.rpo_index.get(&b)) else {
                return self.entry;
            };
            if ia > ib {
                a = self.idom[&a];
            } else {
                b = self.idom[&b];
            }
        }
    }
}

fn successors(module: &Module, block: Handle<Block>) -> Vec<Handle<Block>> {
    module
        .terminator(block)
        .map(|t| module.ops[t].successors.clone())
        .unwrap_or_default()
}

fn intersect(
    idom: &HashMap<Handle<Block>, Handle<Block>>,
    rpo_index: &HashMap<Handle<Block>, usize>,
    a: Handle<Block>,
    b: Handle<Block>,
) -> Handle<Block> {
    let (mut a, mut b) = (a, b);
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

/// Hoists `block` to its ancestor block lying directly in `region`.
pub fn ancestor_block_in_region(
    module: &Module,
    block: Handle<Block>,
    region: Handle<Region>,
) -> Option<Handle<Block>> {
    let mut current = block;
    loop {
        let current_region = module.blocks[current].region;
        if current_region == region {
            return Some(current);
        }
        let parent = module.regions[current_region].parent?;
        current = module.ops[parent].block?;
    }
}

/// Hoists `op` to its ancestor operation lying directly in `region`.
pub fn ancestor_op_in_region(
    module: &Module,
    op: Handle<Operation>,
    region: Handle<Region>,
) -> Option<Handle<Operation>> {
    let mut current = op;
    loop {
        let block = module.ops[current].block?;
        if module.blocks[block].region == region {
            return Some(current);
        }
        current = module.regions[module.blocks[block].region].parent?;
    }
}

/// `true` if the definition of `value` dominates `user` per SSA rules,
/// hoisting `user` across region boundaries as needed.
pub fn value_dominates(module: &Module, value: Handle<Value>, user: Handle<Operation>) -> bool {
    match module.values[value].def {
        ValueDef::BlockArg { block, .. } => {
            let region = module.blocks[block].region;
            let Some(user_block) = module.ops[user]
                .block
                .and_then(|b| ancestor_block_in_region(module, b, region))
            else {
                return false;
            };
            if user_block == block {
                return true;
            }
            DominanceInfo::new(module, region).dominates(block, user_block)
        }
        ValueDef::OpResult { op: def_op, .. } => {
            let Some(def_block) = module.ops[def_op].block else {
                return false;
            };
            let region = module.blocks[def_block].region;
            let Some(user_ancestor) = ancestor_op_in_region(module, user, region) else {
                return false;
            };
            if user_ancestor == def_op {
                // A nested op may not use results of its enclosing op.
                return false;
            }
            let user_block = module.ops[user_ancestor].block.expect("attached op");
            if user_block == def_block {
                module.is_before_in_block(def_op, user_ancestor)
            } else {
                DominanceInfo::new(module, region).dominates(def_block, user_block)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::types::Lifetime;

    /// entry → {left, right} → merge
    fn diamond(module: &mut Module) -> [Handle<Block>; 4] {
        let entry = module.entry_block();
        let left = module.new_block(module.body);
        let right = module.new_block(module.body);
        let merge = module.new_block(module.body);
        let mut b = Builder::at_end(module, entry);
        b.branch_many(&[left, right]);
        let mut b = Builder::at_end(module, left);
        b.branch(merge);
        let mut b = Builder::at_end(module, right);
        b.branch(merge);
        let mut b = Builder::at_end(module, merge);
        b.ret(&[]);
        [entry, left, right, merge]
    }

    #[test]
    fn diamond_dominators() {
        let mut module = Module::new();
        let [entry, left, right, merge] = diamond(&mut module);
        let dom = DominanceInfo::new(&module, module.body);
        assert!(dom.dominates(entry, merge));
        assert!(dom.dominates(entry, left));
        assert!(!dom.dominates(left, merge));
        assert!(!dom.dominates(left, right));
        assert!(dom.dominates(merge, merge));
        assert_eq!(dom.nearest_common_dominator(left, right), entry);
        assert_eq!(dom.nearest_common_dominator(left, merge), entry);
        assert_eq!(dom.nearest_common_dominator(merge, merge), merge);
    }

    #[test]
    fn op_result_dominance_in_block() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(4);
        let v = b.const_f32(0.0);
        let splat = b.async_splat(v, size, Lifetime::Transient);
        let clone = b.async_clone(splat, size, size, Lifetime::Transient);
        let clone_op = module.defining_op(clone).unwrap();
        let splat_op = module.defining_op(splat).unwrap();
        assert!(value_dominates(&module, splat, clone_op));
        assert!(!value_dominates(&module, clone, splat_op));
    }

    #[test]
    fn region_values_dominate_nested_ops() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(4);
        let v = b.const_f32(0.0);
        let splat = b.async_splat(v, size, Lifetime::Transient);
        let exec = b.async_execute(&[], &[splat], &[size], &[], &[]);
        let body = Builder::body_block(&module, exec);
        let arg = module.blocks[body].args[0];
        let mut b = Builder::at_end(&mut module, body);
        let offset = b.const_index(0);
        let len = b.const_index(2);
        let flush = b.cmd_flush(arg, size, offset, len);
        b.yield_(&[]);

        // The outer size const dominates the nested flush; the block arg
        // dominates it too; nothing inside dominates ops after the region.
        assert!(value_dominates(&module, size, flush));
        assert!(value_dominates(&module, arg, flush));
        assert!(module.all_results_unused(exec));
    }
}
