//! Typed fixed-width integer and boolean values with overflow-checked operations.
//!
//! Mirrors the contract of the original Katara `common::atomics` module:
//! every `Int` carries its own width/signedness tag, operations require both
//! operands to agree on that tag (except shifts, which permit a differently
//! typed count), and conversions fail rather than silently truncate.

use std::fmt;
use thiserror::Error;

/// The eight fixed-width integer kinds the IR operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntType {
    pub const ALL: [IntType; 8] = [
        IntType::I8,
        IntType::I16,
        IntType::I32,
        IntType::I64,
        IntType::U8,
        IntType::U16,
        IntType::U32,
        IntType::U64,
    ];

    pub fn bit_size(self) -> u8 {
        match self {
            IntType::I8 | IntType::U8 => 8,
            IntType::I16 | IntType::U16 => 16,
            IntType::I32 | IntType::U32 => 32,
            IntType::I64 | IntType::U64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
    }

    pub fn is_unsigned(self) -> bool {
        !self.is_signed()
    }

    pub fn to_signed(self) -> IntType {
        match self {
            IntType::I8 | IntType::U8 => IntType::I8,
            IntType::I16 | IntType::U16 => IntType::I16,
            IntType::I32 | IntType::U32 => IntType::I32,
            IntType::I64 | IntType::U64 => IntType::I64,
        }
    }

    pub fn to_unsigned(self) -> IntType {
        match self {
            IntType::I8 | IntType::U8 => IntType::U8,
            IntType::I16 | IntType::U16 => IntType::U16,
            IntType::I32 | IntType::U32 => IntType::U32,
            IntType::I64 | IntType::U64 => IntType::U64,
        }
    }

    pub fn from_str(s: &str) -> Option<IntType> {
        match s {
            "i8" => Some(IntType::I8),
            "i16" => Some(IntType::I16),
            "i32" => Some(IntType::I32),
            "i64" => Some(IntType::I64),
            "u8" => Some(IntType::U8),
            "u16" => Some(IntType::U16),
            "u32" => Some(IntType::U32),
            "u64" => Some(IntType::U64),
            _ => None,
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntType::I8 => "i8",
            IntType::I16 => "i16",
            IntType::I32 => "i32",
            IntType::I64 => "i64",
            IntType::U8 => "u8",
            IntType::U16 => "u16",
            IntType::U32 => "u32",
            IntType::U64 => "u64",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by atomic operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AtomicsError {
    #[error("value does not fit in target type {0}")]
    ConversionOverflow(IntType),
    #[error("cannot negate the minimum value of a signed type")]
    MinNegation,
    #[error("operands have mismatched types: {0} vs {1}")]
    MismatchedTypes(IntType, IntType),
    #[error("division or remainder by zero")]
    DivisionByZero,
    #[error("input could not be parsed as an integer: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, AtomicsError>;

/// A boolean atomic value together with its binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BoolBinaryOp {
    Eq,
    Neq,
    And,
    Or,
}

impl fmt::Display for BoolBinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoolBinaryOp::Eq => "eq",
            BoolBinaryOp::Neq => "neq",
            BoolBinaryOp::And => "and",
            BoolBinaryOp::Or => "or",
        };
        write!(f, "{s}")
    }
}

impl Bool {
    pub fn compute(a: bool, op: BoolBinaryOp, b: bool) -> bool {
        match op {
            BoolBinaryOp::Eq => a == b,
            BoolBinaryOp::Neq => a != b,
            BoolBinaryOp::And => a && b,
            BoolBinaryOp::Or => a || b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IntUnaryOp {
    Neg,
    Not,
}

impl fmt::Display for IntUnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntUnaryOp::Neg => "neg",
            IntUnaryOp::Not => "not",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IntCompareOp {
    Eq,
    Neq,
    Lss,
    Leq,
    Geq,
    Gtr,
}

impl fmt::Display for IntCompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntCompareOp::Eq => "eq",
            IntCompareOp::Neq => "neq",
            IntCompareOp::Lss => "lss",
            IntCompareOp::Leq => "leq",
            IntCompareOp::Geq => "geq",
            IntCompareOp::Gtr => "gtr",
        };
        write!(f, "{s}")
    }
}

impl IntCompareOp {
    /// The operator that holds when its operands are swapped (`a op b == b flipped(op) a`).
    pub fn flipped(self) -> IntCompareOp {
        match self {
            IntCompareOp::Eq => IntCompareOp::Eq,
            IntCompareOp::Neq => IntCompareOp::Neq,
            IntCompareOp::Lss => IntCompareOp::Gtr,
            IntCompareOp::Leq => IntCompareOp::Geq,
            IntCompareOp::Geq => IntCompareOp::Leq,
            IntCompareOp::Gtr => IntCompareOp::Lss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IntBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
}

impl fmt::Display for IntBinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntBinaryOp::Add => "add",
            IntBinaryOp::Sub => "sub",
            IntBinaryOp::Mul => "mul",
            IntBinaryOp::Div => "div",
            IntBinaryOp::Rem => "rem",
            IntBinaryOp::And => "and",
            IntBinaryOp::Or => "or",
            IntBinaryOp::Xor => "xor",
            IntBinaryOp::AndNot => "andnot",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IntShiftOp {
    Left,
    Right,
}

impl fmt::Display for IntShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntShiftOp::Left => "shl",
            IntShiftOp::Right => "shr",
        };
        write!(f, "{s}")
    }
}

/// A typed, fixed-width integer value.
///
/// Internally stored as a 64-bit slot plus a type tag rather than a true
/// variant-per-width union (`std::variant` in the original); all arithmetic
/// masks/sign-extends back to the tagged width after every operation so the
/// in-memory representation always matches what the tag promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Int {
    ty: IntType,
    bits: u64,
}

impl Int {
    fn normalize(ty: IntType, bits: u64) -> Int {
        let masked = match ty.bit_size() {
            8 => bits & 0xFF,
            16 => bits & 0xFFFF,
            32 => bits & 0xFFFF_FFFF,
            64 => bits,
            _ => unreachable!(),
        };
        Int { ty, bits: masked }
    }

    pub fn from_i64(ty: IntType, value: i64) -> Int {
        Int::normalize(ty, value as u64)
    }

    pub fn from_u64(ty: IntType, value: u64) -> Int {
        Int::normalize(ty, value)
    }

    pub fn ty(self) -> IntType {
        self.ty
    }

    /// Sign-extends (for signed types) or zero-extends (for unsigned types)
    /// the stored bits out to a full 64-bit signed value.
    pub fn as_i64(self) -> i64 {
        if self.ty.is_unsigned() {
            return self.bits as i64;
        }
        match self.ty.bit_size() {
            8 => self.bits as u8 as i8 as i64,
            16 => self.bits as u16 as i16 as i64,
            32 => self.bits as u32 as i32 as i64,
            64 => self.bits as i64,
            _ => unreachable!(),
        }
    }

    pub fn as_u64(self) -> u64 {
        self.bits
    }

    pub fn is_zero(self) -> bool {
        self.bits == 0
    }

    pub fn is_negative(self) -> bool {
        self.ty.is_signed() && self.as_i64() < 0
    }

    pub fn is_min(self) -> bool {
        if self.ty.is_unsigned() {
            return self.bits == 0;
        }
        match self.ty.bit_size() {
            8 => self.as_i64() == i8::MIN as i64,
            16 => self.as_i64() == i16::MIN as i64,
            32 => self.as_i64() == i32::MIN as i64,
            64 => self.as_i64() == i64::MIN,
            _ => unreachable!(),
        }
    }

    pub fn is_max(self) -> bool {
        match (self.ty.is_signed(), self.ty.bit_size()) {
            (true, 8) => self.as_i64() == i8::MAX as i64,
            (true, 16) => self.as_i64() == i16::MAX as i64,
            (true, 32) => self.as_i64() == i32::MAX as i64,
            (true, 64) => self.as_i64() == i64::MAX,
            (false, 8) => self.bits == u8::MAX as u64,
            (false, 16) => self.bits == u16::MAX as u64,
            (false, 32) => self.bits == u32::MAX as u64,
            (false, 64) => self.bits == u64::MAX,
            _ => unreachable!(),
        }
    }

    fn require_same_type(a: Int, b: Int) -> Result<()> {
        if a.ty != b.ty {
            return Err(AtomicsError::MismatchedTypes(a.ty, b.ty));
        }
        Ok(())
    }

    pub fn checked_unary(op: IntUnaryOp, a: Int) -> Result<Int> {
        match op {
            IntUnaryOp::Not => Ok(Int::normalize(a.ty, !a.bits)),
            IntUnaryOp::Neg => {
                if a.ty.is_unsigned() || a.is_min() {
                    return Err(AtomicsError::MinNegation);
                }
                Ok(Int::normalize(a.ty, (a.as_i64().wrapping_neg()) as u64))
            }
        }
    }

    pub fn compare(a: Int, op: IntCompareOp, b: Int) -> Result<bool> {
        Int::require_same_type(a, b)?;
        let ord = if a.ty.is_signed() {
            a.as_i64().cmp(&b.as_i64())
        } else {
            a.as_u64().cmp(&b.as_u64())
        };
        Ok(match op {
            IntCompareOp::Eq => ord.is_eq(),
            IntCompareOp::Neq => ord.is_ne(),
            IntCompareOp::Lss => ord.is_lt(),
            IntCompareOp::Leq => ord.is_le(),
            IntCompareOp::Geq => ord.is_ge(),
            IntCompareOp::Gtr => ord.is_gt(),
        })
    }

    pub fn checked_binary(a: Int, op: IntBinaryOp, b: Int) -> Result<Int> {
        Int::require_same_type(a, b)?;
        if matches!(op, IntBinaryOp::Div | IntBinaryOp::Rem) && b.is_zero() {
            return Err(AtomicsError::DivisionByZero);
        }
        let ty = a.ty;
        let result_bits = if ty.is_signed() {
            let (x, y) = (a.as_i64(), b.as_i64());
            match op {
                IntBinaryOp::Add => x.wrapping_add(y) as u64,
                IntBinaryOp::Sub => x.wrapping_sub(y) as u64,
                IntBinaryOp::Mul => x.wrapping_mul(y) as u64,
                IntBinaryOp::Div => x.wrapping_div(y) as u64,
                IntBinaryOp::Rem => x.wrapping_rem(y) as u64,
                IntBinaryOp::And => (x & y) as u64,
                IntBinaryOp::Or => (x | y) as u64,
                IntBinaryOp::Xor => (x ^ y) as u64,
                IntBinaryOp::AndNot => (x & !y) as u64,
            }
        } else {
            let (x, y) = (a.as_u64(), b.as_u64());
            match op {
                IntBinaryOp::Add => x.wrapping_add(y),
                IntBinaryOp::Sub => x.wrapping_sub(y),
                IntBinaryOp::Mul => x.wrapping_mul(y),
                IntBinaryOp::Div => x.wrapping_div(y),
                IntBinaryOp::Rem => x.wrapping_rem(y),
                IntBinaryOp::And => x & y,
                IntBinaryOp::Or => x | y,
                IntBinaryOp::Xor => x ^ y,
                IntBinaryOp::AndNot => x & !y,
            }
        };
        Ok(Int::normalize(ty, result_bits))
    }

    /// Shifts permit the count to be a differently-typed `Int`; only its
    /// magnitude, truncated to the shifted value's bit width, is used.
    pub fn shift(a: Int, op: IntShiftOp, count: Int) -> Int {
        let amount = (count.as_u64() % a.ty.bit_size() as u64) as u32;
        let bits = match op {
            IntShiftOp::Left => a.bits.wrapping_shl(amount),
            IntShiftOp::Right => {
                if a.ty.is_signed() {
                    (a.as_i64() >> amount.min(63)) as u64
                } else {
                    a.bits.wrapping_shr(amount)
                }
            }
        };
        Int::normalize(a.ty, bits)
    }

    pub fn can_convert_to(self, target: IntType) -> bool {
        if self.is_negative() && target.is_unsigned() {
            return false;
        }
        let v = self.as_i64() as i128;
        match target {
            IntType::I8 => v >= i8::MIN as i128 && v <= i8::MAX as i128,
            IntType::I16 => v >= i16::MIN as i128 && v <= i16::MAX as i128,
            IntType::I32 => v >= i32::MIN as i128 && v <= i32::MAX as i128,
            IntType::I64 => true,
            IntType::U8 => (self.as_u64() as i128) <= u8::MAX as i128,
            IntType::U16 => (self.as_u64() as i128) <= u16::MAX as i128,
            IntType::U32 => (self.as_u64() as i128) <= u32::MAX as i128,
            IntType::U64 => true,
        }
    }

    pub fn convert_to(self, target: IntType) -> Result<Int> {
        if !self.can_convert_to(target) {
            return Err(AtomicsError::ConversionOverflow(target));
        }
        Ok(Int::normalize(target, self.bits))
    }

    pub fn to_bool(self) -> bool {
        !self.is_zero()
    }

    pub fn from_bool(ty: IntType, value: bool) -> Int {
        Int::from_i64(ty, value as i64)
    }

    /// Parses a decimal literal (optionally `-` prefixed for signed types)
    /// into the given target type, rejecting empty input, surrounding
    /// whitespace, and values that overflow the target width.
    pub fn parse_decimal(ty: IntType, s: &str) -> Result<Int> {
        if s.is_empty() || s.trim() != s {
            return Err(AtomicsError::ParseError(s.to_string()));
        }
        if ty.is_signed() {
            let v: i64 = s
                .parse()
                .map_err(|_| AtomicsError::ParseError(s.to_string()))?;
            Int::from_i64(IntType::I64, v).convert_to(ty)
        } else {
            if s.starts_with('-') {
                return Err(AtomicsError::ParseError(s.to_string()));
            }
            let v: u64 = s
                .parse()
                .map_err(|_| AtomicsError::ParseError(s.to_string()))?;
            Int::from_u64(IntType::U64, v).convert_to(ty)
        }
    }

    /// Parses a `0x`-prefixed hexadecimal literal.
    pub fn parse_hex(ty: IntType, s: &str) -> Result<Int> {
        let rest = s
            .strip_prefix("0x")
            .ok_or_else(|| AtomicsError::ParseError(s.to_string()))?;
        if rest.is_empty() || rest.trim() != rest {
            return Err(AtomicsError::ParseError(s.to_string()));
        }
        let v = u64::from_str_radix(rest, 16).map_err(|_| AtomicsError::ParseError(s.to_string()))?;
        Int::from_u64(IntType::U64, v).convert_to(ty)
    }

    pub fn to_decimal_string(self) -> String {
        if self.ty.is_signed() {
            self.as_i64().to_string()
        } else {
            self.as_u64().to_string()
        }
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.to_decimal_string(), self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps_within_width() {
        let a = Int::from_i64(IntType::I8, 120);
        let b = Int::from_i64(IntType::I8, 10);
        let r = Int::checked_binary(a, IntBinaryOp::Add, b).unwrap();
        assert_eq!(r.as_i64(), (120i8).wrapping_add(10) as i64);
    }

    #[test]
    fn neg_of_min_fails() {
        let min = Int::from_i64(IntType::I32, i32::MIN as i64);
        assert_eq!(
            Int::checked_unary(IntUnaryOp::Neg, min),
            Err(AtomicsError::MinNegation)
        );
    }

    #[test]
    fn div_by_zero_rejected() {
        let a = Int::from_i64(IntType::I64, 42);
        let zero = Int::from_i64(IntType::I64, 0);
        assert_eq!(
            Int::checked_binary(a, IntBinaryOp::Div, zero),
            Err(AtomicsError::DivisionByZero)
        );
        assert_eq!(
            Int::checked_binary(a, IntBinaryOp::Rem, zero),
            Err(AtomicsError::DivisionByZero)
        );
    }

    #[test]
    fn mismatched_types_rejected() {
        let a = Int::from_i64(IntType::I32, 1);
        let b = Int::from_i64(IntType::I64, 1);
        assert_eq!(
            Int::checked_binary(a, IntBinaryOp::Add, b),
            Err(AtomicsError::MismatchedTypes(IntType::I32, IntType::I64))
        );
    }

    #[test]
    fn conversion_overflow_detected() {
        let big = Int::from_i64(IntType::I32, 1000);
        assert!(!big.can_convert_to(IntType::I8));
        assert!(big.convert_to(IntType::I8).is_err());
        let small = Int::from_i64(IntType::I32, 100);
        assert_eq!(small.convert_to(IntType::I8).unwrap().as_i64(), 100);
    }

    #[test]
    fn negative_cannot_become_unsigned() {
        let neg = Int::from_i64(IntType::I32, -1);
        assert!(!neg.can_convert_to(IntType::U32));
    }

    #[test]
    fn decimal_round_trip() {
        for ty in IntType::ALL {
            let v = Int::from_i64(ty, 42);
            let s = v.to_decimal_string();
            let parsed = Int::parse_decimal(ty, &s).unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn decimal_parser_rejects_garbage() {
        assert!(Int::parse_decimal(IntType::I64, "").is_err());
        assert!(Int::parse_decimal(IntType::I64, " 1").is_err());
        assert!(Int::parse_decimal(IntType::U64, "-1").is_err());
        assert!(Int::parse_decimal(IntType::I8, "999999999999").is_err());
    }

    #[test]
    fn hex_parser_rejects_missing_prefix() {
        assert!(Int::parse_hex(IntType::I64, "ff").is_err());
        assert_eq!(Int::parse_hex(IntType::I64, "0xff").unwrap().as_i64(), 255);
    }

    #[test]
    fn compare_flip_is_involutive() {
        for op in [
            IntCompareOp::Eq,
            IntCompareOp::Neq,
            IntCompareOp::Lss,
            IntCompareOp::Leq,
            IntCompareOp::Geq,
            IntCompareOp::Gtr,
        ] {
            assert_eq!(op.flipped().flipped(), op);
        }
    }

    #[test]
    fn shift_count_can_differ_in_type() {
        let a = Int::from_i64(IntType::I32, 1);
        let count = Int::from_i64(IntType::I8, 4);
        let shifted = Int::shift(a, IntShiftOp::Left, count);
        assert_eq!(shifted.as_i64(), 16);
    }

    #[test]
    fn bool_ops() {
        assert!(Bool::compute(true, BoolBinaryOp::And, true));
        assert!(!Bool::compute(true, BoolBinaryOp::And, false));
        assert!(Bool::compute(false, BoolBinaryOp::Or, true));
        assert!(Bool::compute(true, BoolBinaryOp::Eq, true));
        assert!(Bool::compute(true, BoolBinaryOp::Neq, false));
    }
}
