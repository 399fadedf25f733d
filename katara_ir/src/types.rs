//! The IR type lattice: a tagged enum with a `Display` impl.
//!
//! Atomic types carry no heap data, so "interning" falls out of deriving
//! `Copy`/`PartialEq` directly — two `Type` values compare equal iff their
//! tag and parameters match, which is exactly what an interning table would
//! give a caller, without needing one.
//!
//! `SharedPointer` is the one non-atomic type: it exists only in the
//! high-level IR and must be eliminated by the lowering pass before liveness
//! analysis; every other variant survives into the low-level IR that
//! liveness/interference and the x86-64 translator operate on.

use std::fmt;

use katara_common::atomics::IntType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Type {
    Bool,
    Int(IntType),
    /// `weak` distinguishes the source language's strong/weak pointer
    /// discriminator; it has no effect on register-allocation width (both
    /// are 8 bytes) but is preserved for shared-pointer lowering's
    /// weak/strong refcount dispatch.
    Pointer { weak: bool },
    Func,
    /// Non-atomic: a handle to a heap-allocated, refcounted payload.
    /// Eliminated by `katara_passes::shared_ptr` before liveness analysis.
    SharedPointer { weak: bool },
}

impl Type {
    /// Size in bytes a value of this type occupies in a register or spill
    /// slot. Pointers and funcs are always 8 bytes regardless of pointee.
    pub fn size_bytes(self) -> u8 {
        match self {
            Type::Bool => 1,
            Type::Int(int_ty) => (int_ty.bit_size() / 8) as u8,
            Type::Pointer { .. } | Type::Func | Type::SharedPointer { .. } => 8,
        }
    }

    pub fn is_atomic(self) -> bool {
        !matches!(self, Type::SharedPointer { .. })
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn is_int(self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_func(self) -> bool {
        matches!(self, Type::Func)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int(int_ty) => write!(f, "{int_ty}"),
            Type::Pointer { weak: false } => write!(f, "ptr"),
            Type::Pointer { weak: true } => write!(f, "wptr"),
            Type::Func => write!(f, "func"),
            Type::SharedPointer { weak: false } => write!(f, "shared_ptr"),
            Type::SharedPointer { weak: true } => write!(f, "weak_ptr"),
        }
    }
}

impl std::str::FromStr for Type {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(Type::Bool),
            "ptr" => Ok(Type::Pointer { weak: false }),
            "wptr" => Ok(Type::Pointer { weak: true }),
            "func" => Ok(Type::Func),
            "shared_ptr" => Ok(Type::SharedPointer { weak: false }),
            "weak_ptr" => Ok(Type::SharedPointer { weak: true }),
            other => IntType::from_str(other)
                .map(Type::Int)
                .ok_or_else(|| format!("unknown type `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_equality_is_structural() {
        assert_eq!(Type::Int(IntType::I32), Type::Int(IntType::I32));
        assert_ne!(Type::Int(IntType::I32), Type::Int(IntType::I64));
        assert_ne!(Type::Pointer { weak: false }, Type::Pointer { weak: true });
    }

    #[test]
    fn display_round_trips_through_parse() {
        for ty in [
            Type::Bool,
            Type::Int(IntType::U8),
            Type::Pointer { weak: false },
            Type::Pointer { weak: true },
            Type::Func,
            Type::SharedPointer { weak: false },
            Type::SharedPointer { weak: true },
        ] {
            let printed = ty.to_string();
            let parsed: Type = printed.parse().unwrap();
            assert_eq!(ty, parsed);
        }
    }

    #[test]
    fn sizes_match_width() {
        assert_eq!(Type::Bool.size_bytes(), 1);
        assert_eq!(Type::Int(IntType::I64).size_bytes(), 8);
        assert_eq!(Type::Int(IntType::I16).size_bytes(), 2);
        assert_eq!(Type::Pointer { weak: false }.size_bytes(), 8);
    }
}
