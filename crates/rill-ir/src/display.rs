//! Display implementations and text dump for debugging.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::arena::Handle;
use crate::attr::Attr;
use crate::module::{Module, Region, Value};
use crate::types::{Lifetime, Literal, Scalar, ScalarKind, Type};

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Staging => write!(f, "staging"),
            Self::Transient => write!(f, "transient"),
            Self::Constant => write!(f, "constant"),
            Self::Unknown => write!(f, "*"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(lifetime) => write!(f, "resource<{lifetime}>"),
            Self::Timepoint => write!(f, "timepoint"),
            Self::Index => write!(f, "index"),
            Self::Scalar(scalar) => write!(f, "{scalar}"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}i"),
            Self::Index(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Splat { value, count } => write!(f, "splat<{value} x {count}>"),
            Self::Dense(elements) => {
                write!(f, "dense<")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ">")
            }
            Self::Timepoint => write!(f, "immediate"),
            Self::Symbol(name) => write!(f, "@{name}"),
        }
    }
}

/// Renders a module as text for logging and test failure output.
pub fn dump_module(module: &Module) -> String {
    let mut printer = Printer {
        module,
        names: HashMap::new(),
        next_value: 0,
        next_block: 0,
        out: String::new(),
    };
    printer.region(module.body, 0);
    printer.out
}

struct Printer<'m> {
    module: &'m Module,
    names: HashMap<Handle<Value>, usize>,
    next_value: usize,
    next_block: usize,
    out: String,
}

impl Printer<'_> {
    fn name(&mut self, value: Handle<Value>) -> String {
        let next = &mut self.next_value;
        let id = *self.names.entry(value).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        });
        format!("%{id}")
    }

    fn region(&mut self, region: Handle<Region>, indent: usize) {
        for &block in &self.module.regions[region].blocks.clone() {
            let id = self.next_block;
            self.next_block += 1;
            let pad = "  ".repeat(indent);
            let mut header = format!("{pad}^bb{id}(");
            for (i, &arg) in self.module.blocks[block].args.clone().iter().enumerate() {
                if i > 0 {
                    header.push_str(", ");
                }
                let name = self.name(arg);
                let ty = self.module.value_ty(arg);
                let _ = write!(header, "{name}: {ty}");
            }
            header.push_str("):");
            self.out.push_str(&header);
            self.out.push('\n');
            for &op in &self.module.blocks[block].ops.clone() {
                self.op(op, indent + 1);
            }
        }
    }

    fn op(&mut self, op: Handle<crate::op::Operation>, indent: usize) {
        let pad = "  ".repeat(indent);
        let data = self.module.ops[op].clone();
        let mut line = pad.clone();
        for (i, &r) in data.results.iter().enumerate() {
            if i > 0 {
                line.push_str(", ");
            }
            let name = self.name(r);
            line.push_str(&name);
        }
        if !data.results.is_empty() {
            line.push_str(" = ");
        }
        line.push_str(data.kind.name());
        for (i, &o) in data.operands.iter().enumerate() {
            line.push_str(if i == 0 { " " } else { ", " });
            let name = self.name(o);
            line.push_str(&name);
        }
        if let Some(attr) = &data.attr {
            let _ = write!(line, " {attr}");
        }
        if let Some(affinity) = data.affinity {
            let _ = write!(line, " on(#{})", affinity.0);
        }
        if !data.results.is_empty() {
            line.push_str(" : ");
            for (i, &r) in data.results.iter().enumerate() {
                if i > 0 {
                    line.push_str(", ");
                }
                let _ = write!(line, "{}", self.module.value_ty(r));
            }
        }
        self.out.push_str(&line);
        if data.regions.is_empty() {
            self.out.push('\n');
        } else {
            self.out.push_str(" {\n");
            for &region in &data.regions {
                self.region(region, indent + 1);
            }
            self.out.push_str(&pad);
            self.out.push_str("}\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::types::Lifetime;

    #[test]
    fn dump_names_values_in_order() {
        let mut module = Module::new();
        let entry = module.entry_block();
        let mut b = Builder::at_end(&mut module, entry);
        let size = b.const_index(16);
        let v = b.const_f32(7.0);
        let splat = b.async_splat(v, size, Lifetime::Transient);
        let _ = splat;
        b.ret(&[]);

        let text = dump_module(&module);
        assert!(text.contains("const 16 : index"));
        assert!(text.contains("async.splat"));
        assert!(text.contains("resource<transient>"));
        assert!(text.contains("return"));
    }
}
