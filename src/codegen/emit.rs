//! Textual NASM emission.
//!
//! Each virtual instruction is printed against the allocation: register
//! operands print directly, stack operands reload through the scratch
//! registers (eax, then ecx, then edx). A scratch that currently carries a
//! register-allocated temporary is preserved with push/pop; `ebp`-relative
//! operands are unaffected by the moving stack pointer.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::{
    codegen::{
        AllocatorKind,
        regalloc::{self, Allocation, Loc, Reg},
        tile::{VBase, VFunction, VInstr, VSrc},
    },
    diagnostics::InternalError,
    ir::{DataItem, DataValue, Temp},
};

/// Renders one compilation unit's file.
///
/// # Errors
///
/// Internal errors only.
pub fn unit_text(
    functions: &[VFunction],
    data: &[DataItem],
    allocator: AllocatorKind,
) -> Result<String, InternalError> {
    assemble(functions, data, allocator, None)
}

/// Renders `start.s`, whose entry label is `_start`.
///
/// # Errors
///
/// Internal errors only.
pub fn start_text(
    start: &VFunction,
    data: &[DataItem],
    allocator: AllocatorKind,
) -> Result<String, InternalError> {
    assemble(std::slice::from_ref(start), data, allocator, Some("_start"))
}

fn assemble(
    functions: &[VFunction],
    data: &[DataItem],
    allocator: AllocatorKind,
    entry: Option<&str>,
) -> Result<String, InternalError> {
    let mut defined: BTreeSet<String> = BTreeSet::new();
    for function in functions {
        defined.insert(function.label.0.clone());
    }
    for item in data {
        defined.insert(item.label.0.clone());
    }

    fn reference_src(referenced: &mut BTreeSet<String>, src: &VSrc) {
        if let VSrc::Lab(l) = src {
            referenced.insert(l.clone());
        }
    }
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    for function in functions {
        for instr in &function.instrs {
            match instr {
                VInstr::Mov { src, .. }
                | VInstr::Push { src }
                | VInstr::Store { src, .. }
                | VInstr::Bin { src, .. } => reference_src(&mut referenced, src),
                VInstr::Cmp { rhs, .. } => reference_src(&mut referenced, rhs),
                VInstr::Ret { value: Some(src) } => reference_src(&mut referenced, src),
                VInstr::CallLabel { target, .. } => {
                    referenced.insert(target.clone());
                }
                _ => {}
            }
            if let VInstr::Load { base, .. } | VInstr::Store { base, .. } = instr {
                if let VBase::Lab(l) = base {
                    referenced.insert(l.clone());
                }
            }
        }
    }
    for item in data {
        for word in &item.words {
            if let DataValue::Label(l) = word {
                referenced.insert(l.0.clone());
            }
        }
    }

    let mut out = String::new();
    if let Some(entry) = entry {
        out.push_str(&format!("global {entry}\n"));
    }
    for label in &defined {
        if Some(label.as_str()) != entry {
            out.push_str(&format!("global {label}\n"));
        }
    }
    for label in &referenced {
        if !defined.contains(label) && !label.starts_with('.') {
            out.push_str(&format!("extern {label}\n"));
        }
    }

    out.push_str("\nsection .text\n");
    for function in functions {
        emit_function(&mut out, function, allocator);
    }

    if !data.is_empty() {
        out.push_str("\nsection .data\n");
        for item in data {
            let words = item.words.iter().map(ToString::to_string).join(", ");
            out.push_str(&format!("{}:\n    dd {words}\n", item.label));
        }
    }
    Ok(out)
}

/// The scratch registers, in preference order.
const SCRATCH: [Reg; 3] = [Reg::Eax, Reg::Ecx, Reg::Edx];

fn emit_function(out: &mut String, function: &VFunction, allocator: AllocatorKind) {
    let allocation = regalloc::allocate(function, allocator);
    let mut emitter = Emitter {
        out,
        allocation: &allocation,
        pos: 0,
    };
    emitter.raw(&format!("{}:", function.label));
    emitter.line("push ebp");
    emitter.line("mov ebp, esp");
    let frame = 4 * allocation.frame_words();
    if frame > 0 {
        emitter.line(&format!("sub esp, {frame}"));
    }
    for (pos, instr) in function.instrs.iter().enumerate() {
        emitter.pos = pos;
        emitter.instr(instr);
    }
    emitter.raw("");
}

struct Emitter<'a> {
    out: &'a mut String,
    allocation: &'a Allocation,
    pos: usize,
}

impl Emitter<'_> {
    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn line(&mut self, text: &str) {
        self.out.push_str("    ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn loc(&self, temp: Temp) -> Loc {
        self.allocation.loc(temp)
    }

    /// The printable operand of a temporary's home.
    fn home(&self, temp: Temp) -> String {
        match self.loc(temp) {
            Loc::Reg(r) => r.to_string(),
            Loc::Slot(k) => format!("dword [ebp - {}]", 4 * (k + 1)),
            Loc::Param(i) => format!("dword [ebp + {}]", 8 + 4 * i),
        }
    }

    fn in_reg(&self, temp: Temp) -> Option<Reg> {
        match self.loc(temp) {
            Loc::Reg(r) => Some(r),
            Loc::Slot(_) | Loc::Param(_) => None,
        }
    }

    /// Picks a scratch register avoiding `exclude`; the caller wraps its
    /// use with [`preserve`](Self::preserve) when the pick is live.
    fn scratch(&self, exclude: &[Reg]) -> Reg {
        SCRATCH
            .into_iter()
            .find(|r| !exclude.contains(r))
            .unwrap_or(Reg::Eax)
    }

    /// Whether the register carries a live allocated temporary here.
    fn is_live(&self, reg: Reg) -> bool {
        self.allocation.regs_live_at(self.pos).contains(&reg)
    }

    /// Emits `push reg` when the register must survive, returning whether
    /// a matching `pop` is owed.
    fn preserve(&mut self, reg: Reg, defined_here: Option<Temp>) -> bool {
        let defines_it = defined_here.is_some_and(|t| self.in_reg(t) == Some(reg));
        if self.is_live(reg) && !defines_it {
            self.line(&format!("push {reg}"));
            true
        } else {
            false
        }
    }

    fn restore(&mut self, reg: Reg, pushed: bool) {
        if pushed {
            self.line(&format!("pop {reg}"));
        }
    }

    /// The printable form of a source operand; spilled temporaries print
    /// as their frame homes.
    fn src_op(&mut self, src: &VSrc) -> String {
        match src {
            VSrc::Temp(t) => self.home(*t),
            VSrc::Imm(v) => v.to_string(),
            VSrc::Lab(l) => l.clone(),
        }
    }

    fn is_mem(&self, src: &VSrc) -> bool {
        matches!(src, VSrc::Temp(t) if self.in_reg(*t).is_none())
    }

    fn instr(&mut self, instr: &VInstr) {
        match instr {
            VInstr::Label(name) => self.raw(&format!("{name}:")),
            VInstr::Jmp { target } => self.line(&format!("jmp {target}")),
            VInstr::Jcc { cc, target } => self.line(&format!("j{cc} {target}")),
            VInstr::Mov { dst, src } => self.mov(*dst, src),
            VInstr::Load { dst, base, offset } => self.load(*dst, base, *offset),
            VInstr::Store { base, offset, src } => self.store(base, *offset, src),
            VInstr::Bin { op, dst, src } => self.bin(*op, *dst, src),
            VInstr::Div {
                dst,
                divisor,
                remainder,
            } => self.div(*dst, *divisor, *remainder),
            VInstr::Neg { dst } => {
                let home = self.home(*dst);
                self.line(&format!("neg {home}"));
            }
            VInstr::SignExt { dst, bits } => self.extend(*dst, "movsx", *bits),
            VInstr::ZeroExt16 { dst } => self.extend(*dst, "movzx", 16),
            VInstr::Cmp { lhs, rhs } => self.cmp(*lhs, rhs),
            VInstr::Push { src } => match src {
                VSrc::Temp(t) => match self.in_reg(*t) {
                    Some(r) => self.line(&format!("push {r}")),
                    None => {
                        let home = self.home(*t);
                        self.line(&format!("push {home}"));
                    }
                },
                VSrc::Imm(v) => self.line(&format!("push dword {v}")),
                VSrc::Lab(l) => self.line(&format!("push dword {l}")),
            },
            VInstr::CallLabel {
                target,
                ret,
                pop_bytes,
            } => {
                self.line(&format!("call {target}"));
                self.call_epilogue(*ret, *pop_bytes);
            }
            VInstr::CallTemp {
                target,
                ret,
                pop_bytes,
            } => {
                let callee = self.home(*target);
                self.line(&format!("call {callee}"));
                self.call_epilogue(*ret, *pop_bytes);
            }
            VInstr::Ret { value } => {
                if let Some(value) = value {
                    let op = self.src_op(value);
                    if op != "eax" {
                        self.line(&format!("mov eax, {op}"));
                    }
                }
                self.line("mov esp, ebp");
                self.line("pop ebp");
                self.line("ret");
            }
        }
    }

    fn call_epilogue(&mut self, ret: Option<Temp>, pop_bytes: i32) {
        if pop_bytes > 0 {
            self.line(&format!("add esp, {pop_bytes}"));
        }
        if let Some(dst) = ret {
            let home = self.home(dst);
            if home != "eax" {
                self.line(&format!("mov {home}, eax"));
            }
        }
    }

    fn mov(&mut self, dst: Temp, src: &VSrc) {
        let dst_home = self.home(dst);
        if self.in_reg(dst).is_some() || !self.is_mem(src) {
            let src_op = self.src_op(src);
            if src_op != dst_home {
                self.line(&format!("mov {dst_home}, {src_op}"));
            }
            return;
        }
        // Memory-to-memory: route through a scratch.
        let scratch = self.scratch(&[]);
        let pushed = self.preserve(scratch, Some(dst));
        let src_op = self.src_op(src);
        self.line(&format!("mov {scratch}, {src_op}"));
        self.line(&format!("mov {dst_home}, {scratch}"));
        self.restore(scratch, pushed);
    }

    /// The printable `[base + offset]` operand, loading a spilled base
    /// into `prefer` first when needed.
    fn addr(&mut self, base: &VBase, offset: i32, prefer: Reg) -> (String, Option<(Reg, bool)>) {
        let inner = match base {
            VBase::Lab(l) => l.clone(),
            VBase::Temp(t) => match self.in_reg(*t) {
                Some(r) => r.to_string(),
                None => {
                    let pushed = self.preserve(prefer, None);
                    let home = self.home(*t);
                    self.line(&format!("mov {prefer}, {home}"));
                    return (
                        format!("[{prefer} {}]", offset_term(offset)),
                        Some((prefer, pushed)),
                    );
                }
            },
        };
        (format!("[{inner} {}]", offset_term(offset)), None)
    }

    fn load(&mut self, dst: Temp, base: &VBase, offset: i32) {
        match self.in_reg(dst) {
            Some(dreg) => {
                // The destination register doubles as the base scratch.
                let (addr, _) = self.addr_with(base, offset, dreg);
                self.line(&format!("mov {dreg}, dword {addr}"));
            }
            None => {
                let scratch = self.scratch(&[]);
                let pushed = self.preserve(scratch, Some(dst));
                let (addr, _) = self.addr_with(base, offset, scratch);
                self.line(&format!("mov {scratch}, dword {addr}"));
                let home = self.home(dst);
                self.line(&format!("mov {home}, {scratch}"));
                self.restore(scratch, pushed);
            }
        }
    }

    /// Like [`addr`](Self::addr), but the caller guarantees the preferred
    /// register may be clobbered (it is the destination or a preserved
    /// scratch), so no push is emitted here.
    fn addr_with(&mut self, base: &VBase, offset: i32, prefer: Reg) -> (String, ()) {
        let inner = match base {
            VBase::Lab(l) => l.clone(),
            VBase::Temp(t) => match self.in_reg(*t) {
                Some(r) => r.to_string(),
                None => {
                    let home = self.home(*t);
                    self.line(&format!("mov {prefer}, {home}"));
                    prefer.to_string()
                }
            },
        };
        (format!("[{inner} {}]", offset_term(offset)), ())
    }

    fn store(&mut self, base: &VBase, offset: i32, src: &VSrc) {
        let src_reg = match src {
            VSrc::Temp(t) => self.in_reg(*t),
            _ => None,
        };
        let base_scratch = self.scratch(&src_reg.map_or(vec![], |r| vec![r]));
        let (addr, held) = self.addr(base, offset, base_scratch);
        match src {
            VSrc::Imm(v) => self.line(&format!("mov dword {addr}, {v}")),
            VSrc::Lab(l) => self.line(&format!("mov dword {addr}, {l}")),
            VSrc::Temp(t) => match self.in_reg(*t) {
                Some(r) => self.line(&format!("mov dword {addr}, {r}")),
                None => {
                    let exclude: Vec<Reg> = held.iter().map(|(r, _)| *r).collect();
                    let scratch = self.scratch(&exclude);
                    let pushed = self.preserve(scratch, None);
                    let home = self.home(*t);
                    self.line(&format!("mov {scratch}, {home}"));
                    self.line(&format!("mov dword {addr}, {scratch}"));
                    self.restore(scratch, pushed);
                }
            },
        }
        if let Some((reg, pushed)) = held {
            self.restore(reg, pushed);
        }
    }

    fn bin(&mut self, op: super::tile::VBinOp, dst: Temp, src: &VSrc) {
        use super::tile::VBinOp;
        let both_mem = self.in_reg(dst).is_none() && self.is_mem(src);
        let needs_reg_dst = op == VBinOp::Imul && self.in_reg(dst).is_none();
        if needs_reg_dst {
            // `imul` cannot write to memory; compute in a scratch.
            let scratch = self.scratch(&[]);
            let pushed = self.preserve(scratch, Some(dst));
            let home = self.home(dst);
            self.line(&format!("mov {scratch}, {home}"));
            let src_op = self.src_op(src);
            self.line(&format!("imul {scratch}, {src_op}"));
            self.line(&format!("mov {home}, {scratch}"));
            self.restore(scratch, pushed);
            return;
        }
        if both_mem {
            let scratch = self.scratch(&[]);
            let pushed = self.preserve(scratch, None);
            let src_home = self.src_op(src);
            self.line(&format!("mov {scratch}, {src_home}"));
            let dst_home = self.home(dst);
            self.line(&format!("{op} {dst_home}, {scratch}"));
            self.restore(scratch, pushed);
            return;
        }
        let src_op = self.src_op(src);
        let dst_home = self.home(dst);
        self.line(&format!("{op} {dst_home}, {src_op}"));
    }

    fn div(&mut self, dst: Temp, divisor: Temp, remainder: bool) {
        let dst_reg = self.in_reg(dst);
        // Preserve eax/edx unless the result lands in them.
        let push_eax = dst_reg != Some(Reg::Eax) && self.preserve(Reg::Eax, Some(dst));
        let push_edx = dst_reg != Some(Reg::Edx) && {
            let live = self.is_live(Reg::Edx);
            if live {
                self.line("push edx");
            }
            live
        };

        // The divisor must not sit in eax or edx when idiv runs; a spilled
        // divisor is a memory operand idiv accepts directly.
        let mut pop_ecx = false;
        let divisor_op = match self.in_reg(divisor) {
            Some(Reg::Eax | Reg::Edx) => {
                pop_ecx = self.is_live(Reg::Ecx);
                if pop_ecx {
                    self.line("push ecx");
                }
                let home = self.home(divisor);
                self.line(&format!("mov ecx, {home}"));
                "ecx".to_string()
            }
            Some(r) => r.to_string(),
            None => self.home(divisor),
        };

        let dividend = self.home(dst);
        if dividend != "eax" {
            self.line(&format!("mov eax, {dividend}"));
        }
        self.line("cdq");
        self.line(&format!("idiv {divisor_op}"));
        let result = if remainder { "edx" } else { "eax" };
        let home = self.home(dst);
        if home != result {
            self.line(&format!("mov {home}, {result}"));
        }
        if pop_ecx {
            self.line("pop ecx");
        }
        if push_edx {
            self.line("pop edx");
        }
        self.restore(Reg::Eax, push_eax);
    }

    fn extend(&mut self, dst: Temp, mnemonic: &str, bits: u8) {
        let part = if bits == 8 { "al" } else { "ax" };
        match self.in_reg(dst) {
            // eax/ebx/ecx/edx have addressable low parts.
            Some(r @ (Reg::Eax | Reg::Ebx | Reg::Ecx | Reg::Edx)) => {
                let low = match (r, bits) {
                    (Reg::Eax, 8) => "al",
                    (Reg::Eax, _) => "ax",
                    (Reg::Ebx, 8) => "bl",
                    (Reg::Ebx, _) => "bx",
                    (Reg::Ecx, 8) => "cl",
                    (Reg::Ecx, _) => "cx",
                    (Reg::Edx, 8) => "dl",
                    (Reg::Edx, _) => "dx",
                    _ => unreachable!(),
                };
                self.line(&format!("{mnemonic} {r}, {low}"));
            }
            _ => {
                let pushed = self.preserve(Reg::Eax, Some(dst));
                let home = self.home(dst);
                if home != "eax" {
                    self.line(&format!("mov eax, {home}"));
                }
                self.line(&format!("{mnemonic} eax, {part}"));
                if home != "eax" {
                    self.line(&format!("mov {home}, eax"));
                }
                self.restore(Reg::Eax, pushed);
            }
        }
    }

    fn cmp(&mut self, lhs: Temp, rhs: &VSrc) {
        let both_mem = self.in_reg(lhs).is_none() && self.is_mem(rhs);
        if both_mem {
            let scratch = self.scratch(&[]);
            let pushed = self.preserve(scratch, None);
            let rhs_home = self.src_op(rhs);
            self.line(&format!("mov {scratch}, {rhs_home}"));
            let lhs_home = self.home(lhs);
            self.line(&format!("cmp {lhs_home}, {scratch}"));
            self.restore(scratch, pushed);
            return;
        }
        let lhs_home = self.home(lhs);
        let rhs_op = self.src_op(rhs);
        self.line(&format!("cmp {lhs_home}, {rhs_op}"));
    }
}

fn offset_term(offset: i32) -> String {
    if offset < 0 {
        format!("- {}", -i64::from(offset))
    } else {
        format!("+ {offset}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::Label;

    fn text_of(instrs: Vec<VInstr>, params: u32, temps: u32) -> String {
        let function = VFunction {
            label: Label::new("f"),
            params,
            temps,
            instrs,
        };
        unit_text(&[function], &[], AllocatorKind::Trivial).expect("emit")
    }

    #[test]
    fn prologue_reserves_the_frame_up_front() {
        let text = text_of(
            vec![VInstr::Mov {
                dst: Temp(1),
                src: VSrc::Imm(5),
            }],
            1,
            2,
        );
        assert!(text.contains("f:\n    push ebp\n    mov ebp, esp\n    sub esp, 4"));
        assert!(text.contains("mov dword [ebp - 4], 5"));
    }

    #[test]
    fn parameters_read_above_the_saved_frame_pointer() {
        let text = text_of(
            vec![VInstr::Ret {
                value: Some(VSrc::Temp(Temp(0))),
            }],
            1,
            1,
        );
        assert!(text.contains("mov eax, dword [ebp + 8]"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn memory_to_memory_moves_use_a_scratch() {
        let text = text_of(
            vec![VInstr::Mov {
                dst: Temp(1),
                src: VSrc::Temp(Temp(2)),
            }],
            0,
            3,
        );
        assert!(text.contains("mov eax, dword [ebp - 12]"), "{text}");
        assert!(text.contains("mov dword [ebp - 8], eax"), "{text}");
    }

    #[test]
    fn externs_are_declared_for_undefined_labels() {
        let text = text_of(
            vec![VInstr::CallLabel {
                target: "__malloc".into(),
                ret: Some(Temp(0)),
                pop_bytes: 4,
            }],
            0,
            1,
        );
        assert!(text.contains("extern __malloc"));
        assert!(text.contains("global f"));
        assert!(text.contains("call __malloc"));
        assert!(text.contains("add esp, 4"));
    }

    #[test]
    fn division_uses_cdq_and_idiv() {
        let text = text_of(
            vec![
                VInstr::Mov {
                    dst: Temp(0),
                    src: VSrc::Imm(42),
                },
                VInstr::Mov {
                    dst: Temp(1),
                    src: VSrc::Imm(7),
                },
                VInstr::Div {
                    dst: Temp(0),
                    divisor: Temp(1),
                    remainder: false,
                },
            ],
            0,
            2,
        );
        assert!(text.contains("cdq"));
        assert!(text.contains("idiv dword [ebp - 8]"));
    }
}
