//! Values: constants, computed SSA values, and phi-only inherited values.
//! A tagged enum narrowed to an atomic/shared-pointer type set (no
//! struct/array/string runtime values survive past the front-end in this IR).

use std::fmt;

use katara_common::atomics::Int;

use crate::types::Type;

/// A value known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Const {
    Bool(bool),
    Int(Int),
    NilPointer,
    /// Reference to a func by its program-assigned number.
    Func(i64),
}

impl Const {
    pub fn get_type(self) -> Type {
        match self {
            Const::Bool(_) => Type::Bool,
            Const::Int(i) => Type::Int(i.ty()),
            Const::NilPointer => Type::Pointer { weak: false },
            Const::Func(_) => Type::Func,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Bool(b) => write!(f, "#{b}"),
            Const::Int(i) => write!(f, "#{i}"),
            Const::NilPointer => write!(f, "0x0"),
            Const::Func(n) => write!(f, "@{n}"),
        }
    }
}

/// A value as it appears in an instruction's argument list.
///
/// `InheritedValue` is legal only as a `Phi` argument: it names the value a
/// block would receive control from a specific predecessor block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Constant(Const),
    Computed { ty: Type, number: i64 },
    InheritedValue {
        value: Box<Value>,
        origin_block: i64,
    },
}

impl Value {
    pub fn computed(ty: Type, number: i64) -> Self {
        Value::Computed { ty, number }
    }

    pub fn constant(c: Const) -> Self {
        Value::Constant(c)
    }

    pub fn inherited(value: Value, origin_block: i64) -> Self {
        Value::InheritedValue {
            value: Box::new(value),
            origin_block,
        }
    }

    pub fn get_type(&self) -> Type {
        match self {
            Value::Constant(c) => c.get_type(),
            Value::Computed { ty, .. } => *ty,
            Value::InheritedValue { value, .. } => value.get_type(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Value::Computed { .. })
    }

    pub fn is_inherited(&self) -> bool {
        matches!(self, Value::InheritedValue { .. })
    }

    /// The computed value number this value ultimately refers to, peeling
    /// through an `InheritedValue` wrapper if present. `None` for constants.
    pub fn number(&self) -> Option<i64> {
        match self {
            Value::Constant(_) => None,
            Value::Computed { number, .. } => Some(*number),
            Value::InheritedValue { value, .. } => value.number(),
        }
    }

    /// The predecessor block this value is inherited from, if it is an
    /// `InheritedValue`.
    pub fn origin_block(&self) -> Option<i64> {
        match self {
            Value::InheritedValue { origin_block, .. } => Some(*origin_block),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(c) => write!(f, "{c}"),
            Value::Computed { number, .. } => write!(f, "%{number}"),
            Value::InheritedValue { value, origin_block } => {
                write!(f, "{value}@{{{origin_block}}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_common::atomics::IntType;

    #[test]
    fn computed_value_type_round_trips() {
        let v = Value::computed(Type::Int(IntType::I32), 7);
        assert_eq!(v.get_type(), Type::Int(IntType::I32));
        assert_eq!(v.number(), Some(7));
        assert_eq!(v.to_string(), "%7");
    }

    #[test]
    fn inherited_value_carries_origin_block() {
        let inner = Value::computed(Type::Bool, 3);
        let v = Value::inherited(inner, 2);
        assert_eq!(v.origin_block(), Some(2));
        assert_eq!(v.number(), Some(3));
        assert!(v.is_inherited());
    }

    #[test]
    fn constant_display() {
        assert_eq!(Value::constant(Const::NilPointer).to_string(), "0x0");
        assert_eq!(Value::constant(Const::Func(4)).to_string(), "@4");
    }
}
