//! Register allocation over tiled functions.
//!
//! The trivial allocator gives every temporary a stack slot, reloading on
//! each use. The linear-scan allocator computes live intervals from block
//! liveness (a fixed-point dataflow) and walks the intervals in start
//! order, assigning from the six-register pool and spilling the
//! longest-lived conflicting interval. Intervals crossing a call (or a
//! division, which clobbers eax/edx) are spilled up front, which is how
//! the caller-save convention is honored.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
};

use crate::{
    analysis::fixed_point::{self, DataflowProblem, JoinSemiLattice},
    codegen::tile::{VFunction, VInstr, VSrc},
    ir::Temp,
};

use super::{AllocatorKind, tile::VBase};

/// An allocatable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Reg {
    /// `eax`
    #[display("eax")]
    Eax,
    /// `ebx`
    #[display("ebx")]
    Ebx,
    /// `ecx`
    #[display("ecx")]
    Ecx,
    /// `edx`
    #[display("edx")]
    Edx,
    /// `esi`
    #[display("esi")]
    Esi,
    /// `edi`
    #[display("edi")]
    Edi,
}

/// The allocatable pool, in assignment preference order.
pub const POOL: [Reg; 6] = [Reg::Ebx, Reg::Esi, Reg::Edi, Reg::Ecx, Reg::Edx, Reg::Eax];

/// Where a temporary lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    /// A register.
    Reg(Reg),
    /// The k-th spill/local slot, at `[ebp - 4*(k+1)]`.
    Slot(u32),
    /// The i-th incoming parameter, at `[ebp + 8 + 4*i]`.
    Param(u32),
}

/// The allocation result for one function.
#[derive(Debug)]
pub struct Allocation {
    locs: HashMap<Temp, Loc>,
    frame_words: u32,
    intervals: HashMap<Temp, (usize, usize)>,
}

impl Allocation {
    /// The location of a temporary.
    #[must_use]
    pub fn loc(&self, temp: Temp) -> Loc {
        self.locs.get(&temp).copied().unwrap_or(Loc::Slot(0))
    }

    /// The number of stack words the frame reserves.
    #[must_use]
    pub fn frame_words(&self) -> u32 {
        self.frame_words
    }

    /// The registers holding temporaries live at the given instruction
    /// index; emission must preserve them around scratch use.
    #[must_use]
    pub fn regs_live_at(&self, pos: usize) -> Vec<Reg> {
        self.intervals
            .iter()
            .filter(|(_, (start, end))| *start <= pos && pos <= *end)
            .filter_map(|(temp, _)| match self.locs.get(temp) {
                Some(Loc::Reg(r)) => Some(*r),
                _ => None,
            })
            .collect()
    }
}

/// Runs the selected allocator.
#[must_use]
pub fn allocate(function: &VFunction, kind: AllocatorKind) -> Allocation {
    match kind {
        AllocatorKind::Trivial => trivial(function),
        AllocatorKind::LinearScan => linear_scan(function),
    }
}

fn trivial(function: &VFunction) -> Allocation {
    let mut locs = HashMap::new();
    let mut slots = 0;
    for t in 0..function.temps {
        let temp = Temp(t);
        if t < function.params {
            locs.insert(temp, Loc::Param(t));
        } else {
            locs.insert(temp, Loc::Slot(slots));
            slots += 1;
        }
    }
    Allocation {
        locs,
        frame_words: slots,
        intervals: HashMap::new(),
    }
}

// ----------------------------------------------------------------------
// Liveness
// ----------------------------------------------------------------------

/// A powerset-of-temporaries lattice ordered by inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LiveSet(BTreeSet<Temp>);

impl PartialOrd for LiveSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0 == other.0 {
            Some(Ordering::Equal)
        } else if self.0.is_subset(&other.0) {
            Some(Ordering::Less)
        } else if other.0.is_subset(&self.0) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl JoinSemiLattice for LiveSet {
    fn join(mut self, other: Self) -> Self {
        self.0.extend(other.0);
        self
    }
}

#[derive(Debug)]
struct Block {
    start: usize,
    end: usize,
    successors: Vec<usize>,
    live_gen: BTreeSet<Temp>,
    live_kill: BTreeSet<Temp>,
}

/// Backward liveness: facts are block live-in sets, propagated to
/// predecessors.
struct Liveness<'a> {
    blocks: &'a [Block],
    predecessors: Vec<Vec<usize>>,
}

impl DataflowProblem for Liveness<'_> {
    type Location = usize;
    type Fact = LiveSet;

    fn seeds(&self) -> Vec<(usize, LiveSet)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (i, LiveSet(b.live_gen.clone())))
            .collect()
    }

    fn flow(&self, location: &usize, fact: &LiveSet) -> Vec<(usize, LiveSet)> {
        self.predecessors[*location]
            .iter()
            .map(|&p| {
                let block = &self.blocks[p];
                let mut incoming: BTreeSet<Temp> = fact
                    .0
                    .iter()
                    .copied()
                    .filter(|t| !block.live_kill.contains(t))
                    .collect();
                incoming.extend(block.live_gen.iter().copied());
                (p, LiveSet(incoming))
            })
            .collect()
    }
}

fn uses(instr: &VInstr) -> Vec<Temp> {
    fn push_src(out: &mut Vec<Temp>, s: &VSrc) {
        if let VSrc::Temp(t) = s {
            out.push(*t);
        }
    }
    let mut out = Vec::new();
    match instr {
        VInstr::Mov { src: s, .. } | VInstr::Push { src: s } | VInstr::Store { src: s, .. } => {
            push_src(&mut out, s);
        }
        VInstr::Bin { dst, src: s, .. } => {
            out.push(*dst);
            push_src(&mut out, s);
        }
        VInstr::Cmp { lhs, rhs } => {
            out.push(*lhs);
            push_src(&mut out, rhs);
        }
        VInstr::Div { dst, divisor, .. } => {
            out.push(*dst);
            out.push(*divisor);
        }
        VInstr::Neg { dst } | VInstr::SignExt { dst, .. } | VInstr::ZeroExt16 { dst } => {
            out.push(*dst);
        }
        VInstr::CallTemp { target, .. } => out.push(*target),
        VInstr::Ret { value: Some(s) } => push_src(&mut out, s),
        VInstr::Label(_)
        | VInstr::Jcc { .. }
        | VInstr::Jmp { .. }
        | VInstr::CallLabel { .. }
        | VInstr::Ret { value: None }
        | VInstr::Load { .. } => {}
    }
    if let VInstr::Load { base, .. } | VInstr::Store { base, .. } = instr {
        if let VBase::Temp(t) = base {
            out.push(*t);
        }
    }
    out
}

fn defs(instr: &VInstr) -> Option<Temp> {
    match instr {
        VInstr::Mov { dst, .. }
        | VInstr::Load { dst, .. }
        | VInstr::Bin { dst, .. }
        | VInstr::Div { dst, .. }
        | VInstr::Neg { dst }
        | VInstr::SignExt { dst, .. }
        | VInstr::ZeroExt16 { dst } => Some(*dst),
        VInstr::CallLabel { ret, .. } | VInstr::CallTemp { ret, .. } => *ret,
        _ => None,
    }
}

fn build_blocks(function: &VFunction) -> (Vec<Block>, HashMap<String, usize>) {
    let instrs = &function.instrs;
    let mut starts = vec![0];
    for (i, instr) in instrs.iter().enumerate() {
        match instr {
            VInstr::Label(_) if i != 0 => starts.push(i),
            VInstr::Jmp { .. } | VInstr::Jcc { .. } | VInstr::Ret { .. } if i + 1 < instrs.len() => {
                starts.push(i + 1);
            }
            _ => {}
        }
    }
    starts.sort_unstable();
    starts.dedup();

    let mut label_block = HashMap::new();
    let mut blocks = Vec::new();
    for (bi, &start) in starts.iter().enumerate() {
        let end = starts.get(bi + 1).copied().unwrap_or(instrs.len());
        if let Some(VInstr::Label(name)) = instrs.get(start) {
            label_block.insert(name.clone(), bi);
        }
        blocks.push(Block {
            start,
            end,
            successors: Vec::new(),
            live_gen: BTreeSet::new(),
            live_kill: BTreeSet::new(),
        });
    }

    for bi in 0..blocks.len() {
        let (start, end) = (blocks[bi].start, blocks[bi].end);
        let mut successors = Vec::new();
        let mut falls_through = true;
        if end > start {
            match &instrs[end - 1] {
                VInstr::Jmp { target } => {
                    falls_through = false;
                    if let Some(&b) = label_block.get(target) {
                        successors.push(b);
                    }
                }
                VInstr::Jcc { target, .. } => {
                    if let Some(&b) = label_block.get(target) {
                        successors.push(b);
                    }
                }
                VInstr::Ret { .. } => falls_through = false,
                _ => {}
            }
        }
        if falls_through && bi + 1 < blocks.len() {
            successors.push(bi + 1);
        }
        blocks[bi].successors = successors;

        // Backward gen/kill within the block.
        let mut live_gen = BTreeSet::new();
        let mut live_kill = BTreeSet::new();
        for instr in instrs[start..end].iter().rev() {
            if let Some(d) = defs(instr) {
                live_gen.remove(&d);
                live_kill.insert(d);
            }
            for u in uses(instr) {
                live_gen.insert(u);
            }
        }
        blocks[bi].live_gen = live_gen;
        blocks[bi].live_kill = live_kill;
    }

    (blocks, label_block)
}

fn linear_scan(function: &VFunction) -> Allocation {
    let (blocks, _) = build_blocks(function);
    let predecessors = {
        let mut preds = vec![Vec::new(); blocks.len()];
        for (bi, block) in blocks.iter().enumerate() {
            for &s in &block.successors {
                preds[s].push(bi);
            }
        }
        preds
    };
    let live_in = fixed_point::solve(&Liveness {
        blocks: &blocks,
        predecessors,
    });

    // Live intervals from a backward scan of each block.
    let mut intervals: HashMap<Temp, (usize, usize)> = HashMap::new();
    let mut touch = |t: Temp, pos: usize, intervals: &mut HashMap<Temp, (usize, usize)>| {
        intervals
            .entry(t)
            .and_modify(|(s, e)| {
                *s = (*s).min(pos);
                *e = (*e).max(pos);
            })
            .or_insert((pos, pos));
    };
    for (bi, block) in blocks.iter().enumerate() {
        let mut live: BTreeSet<Temp> = block
            .successors
            .iter()
            .filter_map(|s| live_in.get(s))
            .flat_map(|l| l.0.iter().copied())
            .collect();
        for pos in (block.start..block.end).rev() {
            let instr = &function.instrs[pos];
            for t in &live {
                touch(*t, pos, &mut intervals);
            }
            if let Some(d) = defs(instr) {
                touch(d, pos, &mut intervals);
                live.remove(&d);
            }
            for u in uses(instr) {
                touch(u, pos, &mut intervals);
                live.insert(u);
            }
        }
        let _ = bi;
    }

    // Positions whose instruction clobbers registers.
    let clobbers: Vec<usize> = function
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| {
            matches!(
                i,
                VInstr::CallLabel { .. } | VInstr::CallTemp { .. } | VInstr::Div { .. }
            )
        })
        .map(|(p, _)| p)
        .collect();

    let mut locs: HashMap<Temp, Loc> = HashMap::new();
    let mut slots: u32 = 0;
    let mut fresh_slot = || {
        let s = slots;
        slots += 1;
        s
    };

    // Parameters keep their caller-provided homes.
    for p in 0..function.params {
        locs.insert(Temp(p), Loc::Param(p));
    }

    let mut candidates: Vec<(Temp, (usize, usize))> = intervals
        .iter()
        .filter(|(t, _)| t.0 >= function.params)
        .map(|(t, iv)| (*t, *iv))
        .collect();
    candidates.sort_by_key(|(t, (start, _))| (*start, t.0));

    // Intervals crossing a clobbering instruction are spilled up front.
    let mut pool_candidates = Vec::new();
    for (t, (start, end)) in candidates {
        let crosses = clobbers.iter().any(|&p| start < p && p < end);
        if crosses {
            locs.insert(t, Loc::Slot(fresh_slot()));
        } else {
            pool_candidates.push((t, (start, end)));
        }
    }

    // The scan proper. The pool is popped from the back, so the scratch
    // registers eax/edx/ecx are handed out last.
    let mut active: Vec<(Temp, (usize, usize), Reg)> = Vec::new();
    let mut free: Vec<Reg> = POOL.iter().rev().copied().collect();
    for (t, (start, end)) in pool_candidates {
        active.retain(|(_, (_, active_end), reg)| {
            if *active_end < start {
                free.push(*reg);
                false
            } else {
                true
            }
        });
        if let Some(reg) = free.pop() {
            locs.insert(t, Loc::Reg(reg));
            active.push((t, (start, end), reg));
        } else {
            // Spill the longest-lived conflicting interval.
            let victim = active
                .iter()
                .enumerate()
                .max_by_key(|(_, (_, (_, e), _))| *e)
                .map(|(i, _)| i);
            match victim {
                Some(i) if active[i].1.1 > end => {
                    let (victim_temp, _, reg) = active.remove(i);
                    locs.insert(victim_temp, Loc::Slot(fresh_slot()));
                    locs.insert(t, Loc::Reg(reg));
                    active.push((t, (start, end), reg));
                }
                _ => {
                    locs.insert(t, Loc::Slot(fresh_slot()));
                }
            }
        }
    }

    // Temporaries the liveness never saw (dead defs) still need a home.
    for t in function.params..function.temps {
        locs.entry(Temp(t)).or_insert_with(|| Loc::Slot(fresh_slot()));
    }

    Allocation {
        locs,
        frame_words: slots,
        intervals,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::Label;

    fn function(instrs: Vec<VInstr>, params: u32, temps: u32) -> VFunction {
        VFunction {
            label: Label::new("f"),
            params,
            temps,
            instrs,
        }
    }

    #[test]
    fn trivial_gives_every_temp_a_slot() {
        let f = function(vec![], 1, 4);
        let allocation = allocate(&f, AllocatorKind::Trivial);
        assert_eq!(allocation.loc(Temp(0)), Loc::Param(0));
        assert_eq!(allocation.loc(Temp(1)), Loc::Slot(0));
        assert_eq!(allocation.loc(Temp(3)), Loc::Slot(2));
        assert_eq!(allocation.frame_words(), 3);
    }

    #[test]
    fn linear_scan_keeps_short_intervals_in_registers() {
        // t0 = 1; t1 = t0 + 2; ret t1 — both intervals are call-free.
        let f = function(
            vec![
                VInstr::Mov {
                    dst: Temp(0),
                    src: VSrc::Imm(1),
                },
                VInstr::Mov {
                    dst: Temp(1),
                    src: VSrc::Temp(Temp(0)),
                },
                VInstr::Bin {
                    op: super::super::tile::VBinOp::Add,
                    dst: Temp(1),
                    src: VSrc::Imm(2),
                },
                VInstr::Ret {
                    value: Some(VSrc::Temp(Temp(1))),
                },
            ],
            0,
            2,
        );
        let allocation = allocate(&f, AllocatorKind::LinearScan);
        assert!(matches!(allocation.loc(Temp(0)), Loc::Reg(_)));
        assert!(matches!(allocation.loc(Temp(1)), Loc::Reg(_)));
        assert_eq!(allocation.frame_words(), 0);
    }

    #[test]
    fn intervals_crossing_calls_are_spilled() {
        let f = function(
            vec![
                VInstr::Mov {
                    dst: Temp(0),
                    src: VSrc::Imm(7),
                },
                VInstr::CallLabel {
                    target: "g".into(),
                    ret: None,
                    pop_bytes: 0,
                },
                VInstr::Ret {
                    value: Some(VSrc::Temp(Temp(0))),
                },
            ],
            0,
            1,
        );
        let allocation = allocate(&f, AllocatorKind::LinearScan);
        assert!(matches!(allocation.loc(Temp(0)), Loc::Slot(_)));
    }
}
