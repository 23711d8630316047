//! The three-address intermediate representation and its
//! construction from typed method bodies.
//!
//! Values are constants, temporaries from an unbounded pool, memory
//! operands, and label addresses; statements are moves, jumps, conditional
//! jumps, calls, and returns. Short-circuit operators become explicit
//! `CJump` graphs.

pub mod layout;
pub mod lower;

use itertools::Itertools;

pub use layout::Layout;
pub use lower::{ProgramIr, UnitIr};

/// A temporary from the per-function pool `t0, t1, …`.
///
/// The first temporaries of a function hold its incoming parameters (the
/// receiver first for instance functions), followed by the local variable
/// slots, followed by scratch values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display, derive_more::From,
)]
#[display("t{_0}")]
#[repr(transparent)]
pub struct Temp(pub u32);

/// An assembly-level label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{_0}")]
pub struct Label(pub String);

impl Label {
    /// Creates a label from its text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Whether the label is local to its enclosing function (NASM `.L…`).
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with('.')
    }
}

/// A memory operand: a base value plus a byte offset.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("[{base} + {offset}]")]
pub struct Addr {
    /// The base address.
    pub base: Value,
    /// The byte offset.
    pub offset: i32,
}

/// An IR value.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Value {
    /// A 32-bit constant.
    #[display("{_0}")]
    Const(i32),
    /// A temporary.
    #[display("{_0}")]
    Temp(Temp),
    /// The address of a label, used for static data and string literals.
    #[display("&{_0}")]
    Name(Label),
    /// A memory operand.
    #[display("{_0}")]
    Mem(Box<Addr>),
}

impl Value {
    /// Creates a memory operand.
    #[must_use]
    pub fn mem(base: Value, offset: i32) -> Value {
        Value::Mem(Box::new(Addr { base, offset }))
    }
}

impl From<Temp> for Value {
    fn from(value: Temp) -> Self {
        Value::Temp(value)
    }
}

/// A binary ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum BinOp {
    /// Addition.
    #[display("+")]
    Add,
    /// Subtraction.
    #[display("-")]
    Sub,
    /// Multiplication.
    #[display("*")]
    Mul,
    /// Signed division.
    #[display("/")]
    Div,
    /// Signed remainder.
    #[display("%")]
    Rem,
    /// Bitwise and (used for eager boolean `&`).
    #[display("&")]
    And,
    /// Bitwise or (used for eager boolean `|`).
    #[display("|")]
    Or,
}

/// A unary operation; the extension ops implement narrowing casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum UnOp {
    /// Arithmetic negation.
    #[display("neg")]
    Neg,
    /// Sign-extend from 8 bits (cast to `byte`).
    #[display("sxt8")]
    SignExtendByte,
    /// Sign-extend from 16 bits (cast to `short`).
    #[display("sxt16")]
    SignExtendShort,
    /// Zero-extend from 16 bits (cast to `char`).
    #[display("zxt16")]
    ZeroExtendChar,
}

/// A comparison for conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RelOp {
    /// `==`
    #[display("==")]
    Eq,
    /// `!=`
    #[display("!=")]
    Ne,
    /// `<`
    #[display("<")]
    Lt,
    /// `<=`
    #[display("<=")]
    Le,
    /// `>`
    #[display(">")]
    Gt,
    /// `>=`
    #[display(">=")]
    Ge,
}

impl RelOp {
    /// The comparison testing the opposite outcome.
    #[must_use]
    pub const fn negated(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ge => RelOp::Lt,
        }
    }
}

/// An IR statement.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Instr {
    /// A jump target.
    #[display("{_0}:")]
    Label(Label),
    /// `dst = src`; the destination is a temporary or a memory operand.
    #[display("{dst} = {src}")]
    Move {
        /// The destination place.
        dst: Value,
        /// The source value.
        src: Value,
    },
    /// `dst = lhs op rhs`.
    #[display("{dst} = {lhs} {op} {rhs}")]
    Bin {
        /// The destination temporary.
        dst: Temp,
        /// The operation.
        op: BinOp,
        /// The left operand.
        lhs: Value,
        /// The right operand.
        rhs: Value,
    },
    /// `dst = op src`.
    #[display("{dst} = {op} {src}")]
    Un {
        /// The destination temporary.
        dst: Temp,
        /// The operation.
        op: UnOp,
        /// The operand.
        src: Value,
    },
    /// An unconditional jump.
    #[display("goto {_0}")]
    Jump(Label),
    /// A conditional jump; control falls through when the comparison fails.
    #[display("if {lhs} {op} {rhs} goto {if_true}")]
    CJump {
        /// The comparison.
        op: RelOp,
        /// The left operand.
        lhs: Value,
        /// The right operand.
        rhs: Value,
        /// The target taken when the comparison holds.
        if_true: Label,
    },
    /// A call with evaluated arguments, pushed right-to-left by the tiler.
    #[display("{}call {target}({})", dst.map(|d| format!("{d} = ")).unwrap_or_default(), args.iter().map(ToString::to_string).join(", "))]
    Call {
        /// Where the result lands, if the callee returns a value.
        dst: Option<Temp>,
        /// The callee: a label for direct calls, a temporary holding a
        /// code address for dispatched calls.
        target: Value,
        /// The evaluated arguments, receiver first for instance calls.
        args: Vec<Value>,
    },
    /// Returns from the function.
    #[display("return{}", _0.as_ref().map(|v| format!(" {v}")).unwrap_or_default())]
    Return(Option<Value>),
}

/// One lowered function.
#[derive(Debug)]
pub struct Function {
    /// The function's entry label.
    pub label: Label,
    /// The number of incoming stack parameters (receiver included).
    pub params: u32,
    /// The total number of temporaries, parameters included.
    pub temps: u32,
    /// The statements, in order.
    pub body: Vec<Instr>,
}

/// A word in an emitted data block.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DataValue {
    /// A literal word.
    #[display("{_0}")]
    Int(i32),
    /// The address of a label.
    #[display("{_0}")]
    Label(Label),
}

/// A labeled block of words in the data section.
#[derive(Debug, Clone)]
pub struct DataItem {
    /// The block's label.
    pub label: Label,
    /// The words, in order.
    pub words: Vec<DataValue>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_reads_like_three_address_code() {
        let instr = Instr::Bin {
            dst: Temp(4),
            op: BinOp::Add,
            lhs: Value::Temp(Temp(2)),
            rhs: Value::Const(8),
        };
        assert_eq!(instr.to_string(), "t4 = t2 + 8");

        let call = Instr::Call {
            dst: Some(Temp(9)),
            target: Value::Name(Label::new("__malloc")),
            args: vec![Value::Const(12)],
        };
        assert_eq!(call.to_string(), "t9 = call &__malloc(12)");
    }

    #[test]
    fn relop_negation_is_involutive() {
        for op in [RelOp::Eq, RelOp::Ne, RelOp::Lt, RelOp::Le, RelOp::Gt, RelOp::Ge] {
            assert_eq!(op.negated().negated(), op);
        }
    }
}
