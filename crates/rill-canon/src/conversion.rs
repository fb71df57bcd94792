//! Registration shape for adjacent dialect-conversion passes.
//!
//! Canonicalization patterns never change types; conversion passes do. The
//! types here give external dialects a place to hang their legality rules,
//! conversion patterns, and type mappings, matching the registration shape
//! the surrounding pipeline consumes.

use std::collections::HashSet;

use rill_ir::{OpKind, Type};

use crate::patterns::PatternSet;

/// Which operations a conversion pass accepts in its output.
#[derive(Default)]
pub struct ConversionTarget {
    legal: HashSet<OpKind>,
    illegal: HashSet<OpKind>,
}

impl ConversionTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_legal(&mut self, kind: OpKind) {
        self.illegal.remove(&kind);
        self.legal.insert(kind);
    }

    pub fn add_illegal(&mut self, kind: OpKind) {
        self.legal.remove(&kind);
        self.illegal.insert(kind);
    }

    /// Unlisted kinds are legal by default.
    pub fn is_legal(&self, kind: OpKind) -> bool {
        !self.illegal.contains(&kind)
    }
}

type ConversionFn = Box<dyn Fn(Type) -> Option<Type>>;

/// Ordered type conversions; the first rule that returns `Some` wins.
#[derive(Default)]
pub struct TypeConverter {
    conversions: Vec<ConversionFn>,
}

impl TypeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversion(&mut self, conversion: impl Fn(Type) -> Option<Type> + 'static) {
        self.conversions.push(Box::new(conversion));
    }

    /// Converts `ty`, falling back to identity when no rule matches.
    pub fn convert_type(&self, ty: Type) -> Type {
        self.conversions
            .iter()
            .find_map(|c| c(ty))
            .unwrap_or(ty)
    }
}

/// Capability through which external dialects contribute conversion rules
/// and patterns to a pass.
pub trait ConversionDialectInterface {
    fn setup_conversion_target(
        &self,
        target: &mut ConversionTarget,
        patterns: &mut PatternSet,
        type_converter: &TypeConverter,
    );
}
