//! Operation attributes and placement affinities.

use crate::types::Literal;

/// Logical placement of an operation (device/queue ordinal).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Affinity(pub u32);

impl Affinity {
    /// Two affinities are compatible iff both are absent or equal.
    pub fn are_compatible(lhs: Option<Affinity>, rhs: Option<Affinity>) -> bool {
        lhs == rhs
    }
}

/// A typed compile-time attribute attached to an operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    /// A scalar constant.
    Literal(Literal),
    /// Dense elements that all share one value.
    Splat { value: Literal, count: u64 },
    /// Dense elements, one literal per element.
    Dense(Vec<Literal>),
    /// An immediately-resolved timepoint.
    Timepoint,
    /// A symbol reference (dispatch entry point).
    Symbol(String),
}

impl Attr {
    /// Returns the literal payload of a scalar constant.
    pub fn as_literal(&self) -> Option<Literal> {
        match self {
            Self::Literal(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` for the resolved-timepoint attribute.
    pub fn is_timepoint(&self) -> bool {
        matches!(self, Self::Timepoint)
    }

    /// If the attribute is a single-value element splat, returns that value.
    pub fn splat_value(&self) -> Option<Literal> {
        match self {
            Self::Splat { value, .. } => Some(*value),
            Self::Dense(elements) => {
                let first = *elements.first()?;
                elements.iter().all(|e| *e == first).then_some(first)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_compatibility() {
        assert!(Affinity::are_compatible(None, None));
        assert!(Affinity::are_compatible(Some(Affinity(1)), Some(Affinity(1))));
        assert!(!Affinity::are_compatible(Some(Affinity(1)), Some(Affinity(2))));
        assert!(!Affinity::are_compatible(Some(Affinity(1)), None));
    }

    #[test]
    fn splat_detection() {
        let splat = Attr::Splat {
            value: Literal::F32(4.0),
            count: 4,
        };
        assert_eq!(splat.splat_value(), Some(Literal::F32(4.0)));

        let uniform = Attr::Dense(vec![Literal::I32(2); 3]);
        assert_eq!(uniform.splat_value(), Some(Literal::I32(2)));

        let mixed = Attr::Dense(vec![Literal::I32(2), Literal::I32(3)]);
        assert_eq!(mixed.splat_value(), None);

        assert_eq!(Attr::Dense(vec![]).splat_value(), None);
        assert_eq!(Attr::Timepoint.splat_value(), None);
    }
}
