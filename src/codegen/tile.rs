//! Instruction selection: maximal-munch matching of IR statements onto a
//! virtual x86 instruction set whose operands are still temporaries.
//! Register allocation decides where each temporary lives; emission
//! materializes the spill traffic.

use crate::{
    diagnostics::{InternalError, internal_error},
    ir::{BinOp, Function, Instr, Label, RelOp, Temp, UnOp, Value},
};

/// A condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Cc {
    /// Equal.
    #[display("e")]
    E,
    /// Not equal.
    #[display("ne")]
    Ne,
    /// Signed less.
    #[display("l")]
    L,
    /// Signed less-or-equal.
    #[display("le")]
    Le,
    /// Signed greater.
    #[display("g")]
    G,
    /// Signed greater-or-equal.
    #[display("ge")]
    Ge,
}

impl From<RelOp> for Cc {
    fn from(op: RelOp) -> Self {
        match op {
            RelOp::Eq => Cc::E,
            RelOp::Ne => Cc::Ne,
            RelOp::Lt => Cc::L,
            RelOp::Le => Cc::Le,
            RelOp::Gt => Cc::G,
            RelOp::Ge => Cc::Ge,
        }
    }
}

/// A source operand of a virtual instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VSrc {
    /// A temporary.
    Temp(Temp),
    /// An immediate.
    Imm(i32),
    /// The address of a label.
    Lab(String),
}

/// The base of a memory operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VBase {
    /// A temporary holding the address.
    Temp(Temp),
    /// A data label.
    Lab(String),
}

/// A two-operand ALU operation (`dst op= src`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum VBinOp {
    /// `add`
    #[display("add")]
    Add,
    /// `sub`
    #[display("sub")]
    Sub,
    /// `imul`
    #[display("imul")]
    Imul,
    /// `and`
    #[display("and")]
    And,
    /// `or`
    #[display("or")]
    Or,
}

/// A virtual x86 instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VInstr {
    /// A jump target.
    Label(String),
    /// `mov dst, src`.
    Mov {
        /// Destination temporary.
        dst: Temp,
        /// Source operand.
        src: VSrc,
    },
    /// `mov dst, [base + offset]`.
    Load {
        /// Destination temporary.
        dst: Temp,
        /// Address base.
        base: VBase,
        /// Byte offset.
        offset: i32,
    },
    /// `mov [base + offset], src`.
    Store {
        /// Address base.
        base: VBase,
        /// Byte offset.
        offset: i32,
        /// Stored operand.
        src: VSrc,
    },
    /// `op dst, src`.
    Bin {
        /// The operation.
        op: VBinOp,
        /// Destination (and left operand).
        dst: Temp,
        /// Right operand.
        src: VSrc,
    },
    /// Signed division or remainder; `dst` holds the dividend on entry
    /// and the result on exit.
    Div {
        /// Dividend in, result out.
        dst: Temp,
        /// The divisor.
        divisor: Temp,
        /// Take the remainder instead of the quotient.
        remainder: bool,
    },
    /// `neg dst`.
    Neg {
        /// The negated temporary.
        dst: Temp,
    },
    /// Sign-extend the low 8 or 16 bits of `dst` into the full register.
    SignExt {
        /// The extended temporary.
        dst: Temp,
        /// 8 or 16.
        bits: u8,
    },
    /// Zero-extend the low 16 bits of `dst`.
    ZeroExt16 {
        /// The extended temporary.
        dst: Temp,
    },
    /// `cmp lhs, src`.
    Cmp {
        /// Left operand.
        lhs: Temp,
        /// Right operand.
        rhs: VSrc,
    },
    /// `jcc target`.
    Jcc {
        /// The condition.
        cc: Cc,
        /// The target label.
        target: String,
    },
    /// `jmp target`.
    Jmp {
        /// The target label.
        target: String,
    },
    /// `push src` (cdecl argument).
    Push {
        /// The pushed operand.
        src: VSrc,
    },
    /// A direct call; the caller cleans `pop_bytes` bytes of arguments.
    CallLabel {
        /// The callee label.
        target: String,
        /// Where the return value (eax) lands, if any.
        ret: Option<Temp>,
        /// Bytes of pushed arguments to clean.
        pop_bytes: i32,
    },
    /// An indirect call through a temporary.
    CallTemp {
        /// The temporary holding the code address.
        target: Temp,
        /// Where the return value lands, if any.
        ret: Option<Temp>,
        /// Bytes of pushed arguments to clean.
        pop_bytes: i32,
    },
    /// Function return with an optional value.
    Ret {
        /// The returned operand, moved to eax.
        value: Option<VSrc>,
    },
}

/// One tiled function.
#[derive(Debug)]
pub struct VFunction {
    /// The entry label.
    pub label: Label,
    /// Incoming stack parameters.
    pub params: u32,
    /// Total temporaries, including those the tiler introduced.
    pub temps: u32,
    /// The instructions.
    pub instrs: Vec<VInstr>,
}

/// Tiles one IR function.
///
/// # Errors
///
/// Internal if the IR contains shapes the lowering never produces.
pub fn tile(function: &Function) -> Result<VFunction, InternalError> {
    let mut tiler = Tiler {
        instrs: Vec::new(),
        next_temp: function.temps,
    };
    for instr in &function.body {
        tiler.instr(instr)?;
    }
    Ok(VFunction {
        label: function.label.clone(),
        params: function.params,
        temps: tiler.next_temp,
        instrs: tiler.instrs,
    })
}

struct Tiler {
    instrs: Vec<VInstr>,
    next_temp: u32,
}

impl Tiler {
    fn fresh(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    fn emit(&mut self, instr: VInstr) {
        self.instrs.push(instr);
    }

    /// Any value as a source operand, loading memory operands into a
    /// fresh temporary.
    fn src(&mut self, value: &Value) -> Result<VSrc, InternalError> {
        Ok(match value {
            Value::Const(v) => VSrc::Imm(*v),
            Value::Temp(t) => VSrc::Temp(*t),
            Value::Name(label) => VSrc::Lab(label.0.clone()),
            Value::Mem(_) => VSrc::Temp(self.value_to_temp(value)?),
        })
    }

    /// Any value into a temporary.
    fn value_to_temp(&mut self, value: &Value) -> Result<Temp, InternalError> {
        match value {
            Value::Temp(t) => Ok(*t),
            Value::Const(v) => {
                let t = self.fresh();
                self.emit(VInstr::Mov {
                    dst: t,
                    src: VSrc::Imm(*v),
                });
                Ok(t)
            }
            Value::Name(label) => {
                let t = self.fresh();
                self.emit(VInstr::Mov {
                    dst: t,
                    src: VSrc::Lab(label.0.clone()),
                });
                Ok(t)
            }
            Value::Mem(addr) => {
                let base = self.base(&addr.base)?;
                let t = self.fresh();
                self.emit(VInstr::Load {
                    dst: t,
                    base,
                    offset: addr.offset,
                });
                Ok(t)
            }
        }
    }

    fn base(&mut self, value: &Value) -> Result<VBase, InternalError> {
        Ok(match value {
            Value::Name(label) => VBase::Lab(label.0.clone()),
            Value::Temp(t) => VBase::Temp(*t),
            other => VBase::Temp(self.value_to_temp(other)?),
        })
    }

    fn instr(&mut self, instr: &Instr) -> Result<(), InternalError> {
        match instr {
            Instr::Label(label) => self.emit(VInstr::Label(label.0.clone())),
            Instr::Jump(label) => self.emit(VInstr::Jmp {
                target: label.0.clone(),
            }),
            Instr::Move { dst, src } => match dst {
                Value::Temp(t) => match src {
                    Value::Mem(addr) => {
                        let base = self.base(&addr.base)?;
                        self.emit(VInstr::Load {
                            dst: *t,
                            base,
                            offset: addr.offset,
                        });
                    }
                    other => {
                        let src = self.src(other)?;
                        self.emit(VInstr::Mov { dst: *t, src });
                    }
                },
                Value::Mem(addr) => {
                    let src = self.src(src)?;
                    let base = self.base(&addr.base)?;
                    self.emit(VInstr::Store {
                        base,
                        offset: addr.offset,
                        src,
                    });
                }
                other => internal_error!("move into non-place {other}"),
            },
            Instr::Bin { dst, op, lhs, rhs } => {
                match op {
                    BinOp::Div | BinOp::Rem => {
                        let dividend = self.src(lhs)?;
                        self.emit(VInstr::Mov {
                            dst: *dst,
                            src: dividend,
                        });
                        let divisor = self.value_to_temp(rhs)?;
                        self.emit(VInstr::Div {
                            dst: *dst,
                            divisor,
                            remainder: *op == BinOp::Rem,
                        });
                    }
                    _ => {
                        // dst may appear in rhs; keep the right operand
                        // somewhere stable before overwriting dst.
                        let rhs_src = match self.src(rhs)? {
                            VSrc::Temp(t) if t == *dst => {
                                let copy = self.fresh();
                                self.emit(VInstr::Mov {
                                    dst: copy,
                                    src: VSrc::Temp(t),
                                });
                                VSrc::Temp(copy)
                            }
                            other => other,
                        };
                        let lhs_src = self.src(lhs)?;
                        self.emit(VInstr::Mov {
                            dst: *dst,
                            src: lhs_src,
                        });
                        let vop = match op {
                            BinOp::Add => VBinOp::Add,
                            BinOp::Sub => VBinOp::Sub,
                            BinOp::Mul => VBinOp::Imul,
                            BinOp::And => VBinOp::And,
                            BinOp::Or => VBinOp::Or,
                            BinOp::Div | BinOp::Rem => unreachable!(),
                        };
                        self.emit(VInstr::Bin {
                            op: vop,
                            dst: *dst,
                            src: rhs_src,
                        });
                    }
                }
            }
            Instr::Un { dst, op, src } => {
                let src = self.src(src)?;
                self.emit(VInstr::Mov { dst: *dst, src });
                match op {
                    UnOp::Neg => self.emit(VInstr::Neg { dst: *dst }),
                    UnOp::SignExtendByte => self.emit(VInstr::SignExt { dst: *dst, bits: 8 }),
                    UnOp::SignExtendShort => self.emit(VInstr::SignExt { dst: *dst, bits: 16 }),
                    UnOp::ZeroExtendChar => self.emit(VInstr::ZeroExt16 { dst: *dst }),
                }
            }
            Instr::CJump {
                op,
                lhs,
                rhs,
                if_true,
            } => {
                let lhs = self.value_to_temp(lhs)?;
                let rhs = self.src(rhs)?;
                self.emit(VInstr::Cmp { lhs, rhs });
                self.emit(VInstr::Jcc {
                    cc: (*op).into(),
                    target: if_true.0.clone(),
                });
            }
            Instr::Call { dst, target, args } => {
                // cdecl: arguments pushed right-to-left, caller cleans.
                for arg in args.iter().rev() {
                    let src = self.src(arg)?;
                    self.emit(VInstr::Push { src });
                }
                let pop_bytes = 4 * i32::try_from(args.len()).unwrap_or(i32::MAX);
                match target {
                    Value::Name(label) => self.emit(VInstr::CallLabel {
                        target: label.0.clone(),
                        ret: *dst,
                        pop_bytes,
                    }),
                    other => {
                        let target = self.value_to_temp(other)?;
                        self.emit(VInstr::CallTemp {
                            target,
                            ret: *dst,
                            pop_bytes,
                        });
                    }
                }
            }
            Instr::Return(value) => {
                let value = match value {
                    Some(v) => Some(self.src(v)?),
                    None => None,
                };
                self.emit(VInstr::Ret { value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{Addr, Value};

    fn tile_body(body: Vec<Instr>, temps: u32) -> Vec<VInstr> {
        let function = Function {
            label: Label::new("f"),
            params: 0,
            temps,
            body,
        };
        tile(&function).expect("tile").instrs
    }

    #[test]
    fn memory_to_memory_moves_go_through_a_temp() {
        let instrs = tile_body(
            vec![Instr::Move {
                dst: Value::mem(Value::Temp(Temp(0)), 4),
                src: Value::Mem(Box::new(Addr {
                    base: Value::Temp(Temp(1)),
                    offset: 8,
                })),
            }],
            2,
        );
        assert!(matches!(instrs[0], VInstr::Load { dst: Temp(2), .. }));
        assert!(matches!(
            instrs[1],
            VInstr::Store {
                src: VSrc::Temp(Temp(2)),
                ..
            }
        ));
    }

    #[test]
    fn division_routes_through_the_div_tile() {
        let instrs = tile_body(
            vec![Instr::Bin {
                dst: Temp(2),
                op: BinOp::Div,
                lhs: Value::Temp(Temp(0)),
                rhs: Value::Temp(Temp(1)),
            }],
            3,
        );
        assert!(matches!(
            instrs.as_slice(),
            [
                VInstr::Mov { dst: Temp(2), .. },
                VInstr::Div {
                    dst: Temp(2),
                    divisor: Temp(1),
                    remainder: false
                }
            ]
        ));
    }

    #[test]
    fn calls_push_arguments_right_to_left() {
        let instrs = tile_body(
            vec![Instr::Call {
                dst: Some(Temp(0)),
                target: Value::Name(Label::new("callee")),
                args: vec![Value::Const(1), Value::Const(2)],
            }],
            1,
        );
        assert_eq!(
            instrs,
            vec![
                VInstr::Push { src: VSrc::Imm(2) },
                VInstr::Push { src: VSrc::Imm(1) },
                VInstr::CallLabel {
                    target: "callee".into(),
                    ret: Some(Temp(0)),
                    pop_bytes: 8
                },
            ]
        );
    }
}
