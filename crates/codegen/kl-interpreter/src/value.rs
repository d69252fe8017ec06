//! Runtime value representation

use kl_ir::GlobalId;
use std::fmt;

/// Storage region a pointer refers into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// A global slot
    Global(GlobalId),
    /// An `alloca` slot, by index in the interpreter's stack
    Stack(usize),
}

/// A pointer to one double inside a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub region: Region,
    pub offset: i64,
}

/// Runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    Float(f64),
    Bool(bool),
    Int(i64),
    Ptr(Address),
    /// The value of an `if` without `else`, a loop, or anything derived from them
    Undef,
}

impl RtValue {
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ptr(&self) -> Option<Address> {
        match self {
            Self::Ptr(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Self::Undef)
    }

    /// Name of the value's kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "double",
            Self::Bool(_) => "i1",
            Self::Int(_) => "i64",
            Self::Ptr(_) => "ptr",
            Self::Undef => "undef",
        }
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Ptr(addr) => write!(f, "{:?}+{}", addr.region, addr.offset),
            Self::Undef => write!(f, "undef"),
        }
    }
}
