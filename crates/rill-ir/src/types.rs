//! Type system for the stream IR.

/// Lifetime classification of a resource.
///
/// Determines how the eventual allocator may place and mutate the backing
/// storage. `Constant` resources are immutable; writing to one requires a
/// clone first.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Lifetime {
    /// Owned by the caller; visible outside the program.
    External,
    /// Host-visible staging memory for uploads/downloads.
    Staging,
    /// Short-lived device memory.
    Transient,
    /// Immutable program constant.
    Constant,
    /// Not yet placed.
    Unknown,
}

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Signed integer.
    Sint,
    /// Floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: u8,
}

impl Scalar {
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
}

/// The type of an SSA value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Type {
    /// An opaque byte buffer with a lifetime classification.
    Resource(Lifetime),
    /// A future completion event.
    Timepoint,
    /// A size/offset in bytes.
    Index,
    /// A scalar element value.
    Scalar(Scalar),
}

impl Type {
    /// Returns `true` for resource-typed values.
    pub fn is_resource(self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Returns the resource lifetime, if this is a resource type.
    pub fn lifetime(self) -> Option<Lifetime> {
        match self {
            Self::Resource(lifetime) => Some(lifetime),
            _ => None,
        }
    }

    /// Returns `true` if a tied result of this type may overwrite an operand
    /// of type `other`: both resources, with lifetimes equal or unplaced.
    pub fn tie_compatible(self, other: Type) -> bool {
        match (self, other) {
            (Self::Resource(a), Self::Resource(b)) => {
                a == b || a == Lifetime::Unknown || b == Lifetime::Unknown
            }
            _ => false,
        }
    }
}

/// A compile-time scalar constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    F32(f32),
    I32(i32),
    /// A byte size or offset.
    Index(i64),
}

impl Literal {
    /// Returns the index payload, if any.
    pub fn as_index(self) -> Option<i64> {
        match self {
            Self::Index(v) => Some(v),
            _ => None,
        }
    }

    /// The type a constant of this literal has.
    pub fn ty(self) -> Type {
        match self {
            Self::F32(_) => Type::Scalar(Scalar::F32),
            Self::I32(_) => Type::Scalar(Scalar::I32),
            Self::Index(_) => Type::Index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_compatibility() {
        let t = Type::Resource(Lifetime::Transient);
        let u = Type::Resource(Lifetime::Unknown);
        let e = Type::Resource(Lifetime::External);
        assert!(t.tie_compatible(t));
        assert!(u.tie_compatible(e));
        assert!(e.tie_compatible(u));
        assert!(!t.tie_compatible(e));
        assert!(!t.tie_compatible(Type::Index));
    }

    #[test]
    fn literal_types() {
        assert_eq!(Literal::Index(8).ty(), Type::Index);
        assert_eq!(Literal::F32(1.0).ty(), Type::Scalar(Scalar::F32));
        assert_eq!(Literal::Index(8).as_index(), Some(8));
        assert_eq!(Literal::F32(1.0).as_index(), None);
    }
}
