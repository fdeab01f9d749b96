// This module lowers one IR basic block at a time into abstract AMD64
// instructions over virtual registers. A BlockSelector walks the statement
// list; expression evaluators return registers (integers in gp64 vregs with
// unspecified upper bits for narrow widths, 128-bit values as a register
// pair, scalar floats in the low lane of a vec128 vreg) and are mutually
// recursive with the operand-form selectors, which hand back the cheapest
// legal immediate/memory/register encoding, and with the condition-code
// synthesizer, which returns a flags condition plus already-emitted compare
// instructions. Guest state is addressed off RBP; helper calls marshal
// through the System V argument registers. Every returned register is
// virtual and class-checked; returned registers are never mutated, so a
// derived value always gets a fresh vreg and a copy. Any expression shape
// with no rule is a hard error that abandons the whole block.

//! Block lowering: IR statements to abstract AMD64 instructions.
//!
//! # Key Components
//!
//! - [`select_block`]: entry point, lowers a [`Block`] into a [`LoweredBlock`].
//! - `BlockSelector`: per-block state (temp-to-vreg maps, instruction list,
//!   vreg counter) plus the evaluator family.
//! - Evaluators by result class: integer, 128-bit pair, float, double,
//!   vector; operand forms (reg/mem/imm, reg/imm, reg/mem, address mode);
//!   condition codes.
//!
//! Temps are pre-allocated one vreg each (two for 128-bit temps) before any
//! statement is lowered, so reads and writes of a temp always agree on its
//! home register.

use bumpalo::collections::Vec as BumpVec;

use crate::core::{SelectError, SelectResult, TranslationSession};
use crate::ir::{
    Binop, Block, Const, Expr, GuestArray, Helper, IntWidth, IrType, JumpKind, Stmt, TempId,
    TypeEnv, Unop,
};
use crate::x64::calling_convention::{
    check_arg_count, choose_plan, guard_is_always_true, MarshalPlan, ARG_REGS,
};
use crate::x64::instructions::{
    fits_in_32bits, mov_reg, mov_vec, AMode, AluOp, CondCode, Insn, Reg, RegClass, RegImm, RegMem,
    RegMemImm, ShiftOp, SseOp, RAX, RBP, RCX, RDX, RSP,
};

/// Power-on MXCSR: round to nearest, all exceptions masked.
const MXCSR_DEFAULT: u32 = 0x1F80;

fn cannot_reduce(kind: &'static str, e: &Expr) -> SelectError {
    SelectError::CannotReduce {
        kind,
        expr: e.to_string(),
    }
}

fn add_to_rsp(bytes: u32) -> Insn {
    Insn::Alu64R {
        op: AluOp::Add,
        src: RegMemImm::Imm(bytes),
        dst: RSP,
    }
}

fn sub_from_rsp(bytes: u32) -> Insn {
    Insn::Alu64R {
        op: AluOp::Sub,
        src: RegMemImm::Imm(bytes),
        dst: RSP,
    }
}

/// The result of lowering one block: the instruction list and how many
/// virtual registers it uses (0..count, both classes).
#[derive(Debug)]
pub struct LoweredBlock<'arena> {
    insns: BumpVec<'arena, Insn>,
    vreg_count: u32,
}

impl<'arena> LoweredBlock<'arena> {
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn vreg_count(&self) -> u32 {
        self.vreg_count
    }
}

/// Lower `block` to AMD64 instructions, recording counters on `session`.
pub fn select_block<'arena>(
    session: &TranslationSession<'arena>,
    block: &Block,
) -> SelectResult<LoweredBlock<'arena>> {
    let mut sel = BlockSelector::new(session, &block.env);
    for st in &block.stmts {
        log::trace!("-- {st}");
        sel.stmt(st)?;
    }
    sel.lower_next(&block.next, block.jump_kind)?;

    let lowered = LoweredBlock {
        insns: sel.insns,
        vreg_count: sel.next_vreg,
    };
    session.record_block(block.stmts.len(), lowered.insns.len(), lowered.vreg_count);
    log::debug!(
        "lowered {} statements into {} instructions ({} vregs)",
        block.stmts.len(),
        lowered.insns.len(),
        lowered.vreg_count
    );
    Ok(lowered)
}

struct BlockSelector<'a, 'arena> {
    env: &'a TypeEnv,
    insns: BumpVec<'arena, Insn>,
    /// Home vreg per temp; for I128 temps this is the low half.
    temp_regs: Vec<Reg>,
    /// High-half vreg for I128 temps, `None` for every other type.
    temp_regs_hi: Vec<Option<Reg>>,
    next_vreg: u32,
    session: &'a TranslationSession<'arena>,
}

impl<'a, 'arena> BlockSelector<'a, 'arena> {
    fn new(session: &'a TranslationSession<'arena>, env: &'a TypeEnv) -> Self {
        let mut sel = BlockSelector {
            env,
            insns: BumpVec::new_in(session.arena()),
            temp_regs: Vec::with_capacity(env.temp_count() as usize),
            temp_regs_hi: Vec::with_capacity(env.temp_count() as usize),
            next_vreg: 0,
            session,
        };
        for (_t, ty) in env.temps() {
            match ty {
                IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64 => {
                    let r = sel.new_vreg_gp();
                    sel.temp_regs.push(r);
                    sel.temp_regs_hi.push(None);
                }
                IrType::I128 => {
                    let lo = sel.new_vreg_gp();
                    let hi = sel.new_vreg_gp();
                    sel.temp_regs.push(lo);
                    sel.temp_regs_hi.push(Some(hi));
                }
                IrType::F32 | IrType::F64 | IrType::V128 => {
                    let r = sel.new_vreg_vec();
                    sel.temp_regs.push(r);
                    sel.temp_regs_hi.push(None);
                }
            }
        }
        sel
    }

    fn new_vreg_gp(&mut self) -> Reg {
        let r = Reg::virt_gp(self.next_vreg);
        self.next_vreg += 1;
        r
    }

    fn new_vreg_vec(&mut self) -> Reg {
        let r = Reg::virt_vec(self.next_vreg);
        self.next_vreg += 1;
        r
    }

    fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    fn temp_reg(&self, t: TempId) -> SelectResult<Reg> {
        self.temp_regs
            .get(t.0 as usize)
            .copied()
            .ok_or(SelectError::UnknownTemp { index: t.0 })
    }

    /// (high, low) home registers of an I128 temp.
    fn temp_pair_regs(&self, t: TempId) -> SelectResult<(Reg, Reg)> {
        let lo = self.temp_reg(t)?;
        match self.temp_regs_hi.get(t.0 as usize) {
            Some(Some(hi)) => Ok((*hi, lo)),
            _ => Err(SelectError::TypeMismatch {
                context: "128-bit temp read",
                expected: IrType::I128,
                found: self.env.type_of(t).unwrap_or(IrType::I64),
            }),
        }
    }

    fn expr_type(&self, e: &Expr) -> SelectResult<IrType> {
        self.env.type_of_expr(e)
    }

    /* ------------------ postconditions ------------------ */

    /// Shared postcondition check: every register an evaluator hands back
    /// must be virtual and of the expected class.
    fn verify_reg(&self, what: &'static str, class: RegClass, reg: Reg) -> SelectResult<Reg> {
        if !reg.is_virtual || reg.class != class {
            return Err(SelectError::RegisterInvariant {
                reason: format!("{what} evaluator returned {reg}"),
            });
        }
        Ok(reg)
    }

    fn verify_amode(&self, am: AMode) -> SelectResult<AMode> {
        if !am.is_sane() {
            return Err(SelectError::AddressInvariant {
                reason: format!("synthesized {am}"),
            });
        }
        Ok(am)
    }

    /* ------------------ checked entry points ------------------ */

    fn int_expr(&mut self, e: &Expr) -> SelectResult<Reg> {
        let r = self.int_expr_wrk(e)?;
        self.verify_reg("integer", RegClass::Gp64, r)
    }

    fn pair_expr(&mut self, e: &Expr) -> SelectResult<(Reg, Reg)> {
        let (hi, lo) = self.pair_expr_wrk(e)?;
        self.verify_reg("128-bit", RegClass::Gp64, hi)?;
        self.verify_reg("128-bit", RegClass::Gp64, lo)?;
        Ok((hi, lo))
    }

    fn float_expr(&mut self, e: &Expr) -> SelectResult<Reg> {
        let r = self.float_expr_wrk(e)?;
        self.verify_reg("float", RegClass::Vec128, r)
    }

    fn double_expr(&mut self, e: &Expr) -> SelectResult<Reg> {
        let r = self.double_expr_wrk(e)?;
        self.verify_reg("double", RegClass::Vec128, r)
    }

    fn vector_expr(&mut self, e: &Expr) -> SelectResult<Reg> {
        let r = self.vector_expr_wrk(e)?;
        self.verify_reg("vector", RegClass::Vec128, r)
    }

    fn amode(&mut self, e: &Expr) -> SelectResult<AMode> {
        let am = self.amode_wrk(e)?;
        self.verify_amode(am)
    }

    fn rmi(&mut self, e: &Expr) -> SelectResult<RegMemImm> {
        let rmi = self.rmi_wrk(e)?;
        match rmi {
            RegMemImm::Imm(_) => Ok(rmi),
            RegMemImm::Reg(r) => {
                self.verify_reg("operand", RegClass::Gp64, r)?;
                Ok(rmi)
            }
            RegMemImm::Mem(am) => {
                self.verify_amode(am)?;
                Ok(rmi)
            }
        }
    }

    fn ri(&mut self, e: &Expr) -> SelectResult<RegImm> {
        let ri = self.ri_wrk(e)?;
        if let RegImm::Reg(r) = ri {
            self.verify_reg("operand", RegClass::Gp64, r)?;
        }
        Ok(ri)
    }

    fn rm(&mut self, e: &Expr) -> SelectResult<RegMem> {
        let rm = self.rm_wrk(e)?;
        match rm {
            RegMem::Reg(r) => {
                self.verify_reg("operand", RegClass::Gp64, r)?;
                Ok(rm)
            }
            RegMem::Mem(am) => {
                self.verify_amode(am)?;
                Ok(rm)
            }
        }
    }

    fn cond_code(&mut self, e: &Expr) -> SelectResult<CondCode> {
        // nothing to check on a plain condition code
        self.cond_code_wrk(e)
    }

    /* ------------------ integer expressions ------------------ */

    fn int_expr_wrk(&mut self, e: &Expr) -> SelectResult<Reg> {
        match e {
            Expr::Temp(t) => self.temp_reg(*t),

            Expr::Load { ty, addr } => {
                let dst = self.new_vreg_gp();
                let am = self.amode(addr)?;
                match ty {
                    IrType::I64 => self.emit(Insn::Alu64R {
                        op: AluOp::Mov,
                        src: RegMemImm::Mem(am),
                        dst,
                    }),
                    IrType::I32 => self.emit(Insn::LoadZx { size: 4, addr: am, dst }),
                    IrType::I16 => self.emit(Insn::LoadZx { size: 2, addr: am, dst }),
                    IrType::I8 => self.emit(Insn::LoadZx { size: 1, addr: am, dst }),
                    _ => return Err(cannot_reduce("integer", e)),
                }
                Ok(dst)
            }

            Expr::Const(c) => {
                let imm = match c {
                    Const::U64(v) if !fits_in_32bits(*v) => {
                        let dst = self.new_vreg_gp();
                        self.emit(Insn::Imm64 { imm: *v, dst });
                        return Ok(dst);
                    }
                    Const::U64(v) => *v as u32,
                    Const::U32(v) => *v,
                    Const::U16(v) => u32::from(*v),
                    Const::U8(v) => u32::from(*v),
                    _ => return Err(cannot_reduce("integer", e)),
                };
                let dst = self.new_vreg_gp();
                self.emit(Insn::Alu64R {
                    op: AluOp::Mov,
                    src: RegMemImm::Imm(imm),
                    dst,
                });
                Ok(dst)
            }

            Expr::Get { offset, ty } => {
                let dst = self.new_vreg_gp();
                let am = AMode::base_disp(*offset, RBP);
                match ty {
                    IrType::I64 => self.emit(Insn::Alu64R {
                        op: AluOp::Mov,
                        src: RegMemImm::Mem(am),
                        dst,
                    }),
                    IrType::I32 => self.emit(Insn::LoadZx { size: 4, addr: am, dst }),
                    IrType::I16 => self.emit(Insn::LoadZx { size: 2, addr: am, dst }),
                    IrType::I8 => self.emit(Insn::LoadZx { size: 1, addr: am, dst }),
                    _ => return Err(cannot_reduce("integer", e)),
                }
                Ok(dst)
            }

            Expr::GetI { descr, index, bias } => {
                let am = self.guest_array_amode(descr, index, *bias)?;
                let dst = self.new_vreg_gp();
                match descr.elem_ty {
                    IrType::I8 => self.emit(Insn::LoadZx { size: 1, addr: am, dst }),
                    IrType::I64 => self.emit(Insn::Alu64R {
                        op: AluOp::Mov,
                        src: RegMemImm::Mem(am),
                        dst,
                    }),
                    _ => return Err(cannot_reduce("integer", e)),
                }
                Ok(dst)
            }

            Expr::Binop { op, lhs, rhs } => self.int_binop(*op, lhs, rhs, e),
            Expr::Unop { op, arg } => self.int_unop(*op, arg, e),

            Expr::Mux {
                cond,
                if_false,
                if_true,
            } => {
                // else arm settles into the destination first; one
                // conditional move keyed on bit 0 of the condition picks
                // the then arm
                let r_false = self.int_expr(if_false)?;
                let dst = self.new_vreg_gp();
                self.emit(mov_reg(r_false, dst));
                let rm_true = self.rm(if_true)?;
                let r_cond = self.int_expr(cond)?;
                self.emit(Insn::Test64 {
                    imm: 1,
                    dst: RegMem::Reg(r_cond),
                });
                self.emit(Insn::CMov64 {
                    cond: CondCode::NZ,
                    src: rm_true,
                    dst,
                });
                Ok(dst)
            }

            Expr::Call {
                helper,
                ret_ty,
                args,
            } => {
                if *ret_ty != IrType::I64 {
                    return Err(cannot_reduce("integer", e));
                }
                let dst = self.new_vreg_gp();
                self.helper_call(None, helper, args, false)?;
                self.emit(mov_reg(RAX, dst));
                Ok(dst)
            }
        }
    }

    fn int_binop(&mut self, op: Binop, lhs: &Expr, rhs: &Expr, whole: &Expr) -> SelectResult<Reg> {
        let alu = match op {
            Binop::Add(_) => Some(AluOp::Add),
            Binop::Sub(_) => Some(AluOp::Sub),
            Binop::And(_) => Some(AluOp::And),
            Binop::Or(_) => Some(AluOp::Or),
            Binop::Xor(_) => Some(AluOp::Xor),
            Binop::Mul(_) => Some(AluOp::Mul),
            _ => None,
        };
        if let Some(alu) = alu {
            let dst = self.new_vreg_gp();
            let reg = self.int_expr(lhs)?;
            let rmi = self.rmi(rhs)?;
            self.emit(mov_reg(reg, dst));
            self.emit(Insn::Alu64R { op: alu, src: rmi, dst });
            return Ok(dst);
        }

        let shift = match op {
            Binop::Shl(w) => Some((ShiftOp::Shl, w)),
            Binop::Shr(w) => Some((ShiftOp::Shr, w)),
            Binop::Sar(w) => Some((ShiftOp::Sar, w)),
            _ => None,
        };
        if let Some((sh, w)) = shift {
            let dst = self.new_vreg_gp();
            let reg = self.int_expr(lhs)?;
            self.emit(mov_reg(reg, dst));
            // the register physically holds 64 bits; narrow right shifts
            // must see well-defined upper bits
            match (sh, w) {
                (_, IntWidth::W64) | (ShiftOp::Shl, _) => {}
                (ShiftOp::Shr, IntWidth::W8) => self.emit(Insn::Alu64R {
                    op: AluOp::And,
                    src: RegMemImm::Imm(0xFF),
                    dst,
                }),
                (ShiftOp::Shr, IntWidth::W16) => self.emit(Insn::Alu64R {
                    op: AluOp::And,
                    src: RegMemImm::Imm(0xFFFF),
                    dst,
                }),
                (ShiftOp::Shr, IntWidth::W32) => self.emit(Insn::MovZlq { src: dst, dst }),
                (ShiftOp::Sar, IntWidth::W32) => {
                    self.emit(Insn::Shift64 {
                        op: ShiftOp::Shl,
                        amount: 32,
                        dst,
                    });
                    self.emit(Insn::Shift64 {
                        op: ShiftOp::Sar,
                        amount: 32,
                        dst,
                    });
                }
                (ShiftOp::Sar, _) => {
                    return Err(SelectError::UnsupportedWidth {
                        operation: op.name(),
                        width: w.bits(),
                    })
                }
            }
            match rhs {
                Expr::Const(Const::U8(n)) => {
                    if *n > 0 {
                        self.emit(Insn::Shift64 {
                            op: sh,
                            amount: *n,
                            dst,
                        });
                    }
                }
                _ => {
                    let amount = self.int_expr(rhs)?;
                    self.emit(mov_reg(amount, RCX));
                    self.emit(Insn::Shift64 { op: sh, amount: 0, dst });
                }
            }
            return Ok(dst);
        }

        match op {
            // widening multiply of narrow values, via a full 64-bit multiply
            // of explicitly re-extended operands
            Binop::MullS(w) | Binop::MullU(w) if w != IntWidth::W64 => {
                let signed = matches!(op, Binop::MullS(_));
                let amount: u8 = match w {
                    IntWidth::W32 => 32,
                    IntWidth::W16 => 48,
                    _ => 56,
                };
                let shr = if signed { ShiftOp::Sar } else { ShiftOp::Shr };
                let a = self.new_vreg_gp();
                let b = self.new_vreg_gp();
                let src_l = self.int_expr(lhs)?;
                let src_r = self.int_expr(rhs)?;
                self.emit(mov_reg(src_l, a));
                self.emit(mov_reg(src_r, b));
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shl,
                    amount,
                    dst: a,
                });
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shl,
                    amount,
                    dst: b,
                });
                self.emit(Insn::Shift64 {
                    op: shr,
                    amount,
                    dst: a,
                });
                self.emit(Insn::Shift64 {
                    op: shr,
                    amount,
                    dst: b,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Mul,
                    src: RegMemImm::Reg(a),
                    dst: b,
                });
                Ok(b)
            }

            // EDX:EAX divide; remainder lands in the high 32 bits of the
            // result, quotient in the low 32
            Binop::DivModS64To32 | Binop::DivModU64To32 => {
                let signed = matches!(op, Binop::DivModS64To32);
                let dst = self.new_vreg_gp();
                let rm_right = self.rm(rhs)?;
                let left64 = self.int_expr(lhs)?;
                self.emit(mov_reg(left64, RDX));
                self.emit(mov_reg(left64, RAX));
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shr,
                    amount: 32,
                    dst: RDX,
                });
                self.emit(Insn::Div {
                    signed,
                    size: 4,
                    src: rm_right,
                });
                self.emit(Insn::MovZlq { src: RDX, dst: RDX });
                self.emit(Insn::MovZlq { src: RAX, dst: RAX });
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shl,
                    amount: 32,
                    dst: RDX,
                });
                self.emit(mov_reg(RAX, dst));
                self.emit(Insn::Alu64R {
                    op: AluOp::Or,
                    src: RegMemImm::Reg(RDX),
                    dst,
                });
                Ok(dst)
            }

            Binop::Join16HLTo32 | Binop::Join32HLTo64 => {
                let half: u8 = if matches!(op, Binop::Join16HLTo32) { 16 } else { 32 };
                let dst = self.new_vreg_gp();
                let tmp = self.new_vreg_gp();
                let hi = self.int_expr(lhs)?;
                let lo = self.int_expr(rhs)?;
                self.emit(mov_reg(hi, dst));
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shl,
                    amount: half,
                    dst,
                });
                self.emit(mov_reg(lo, tmp));
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shl,
                    amount: 64 - half,
                    dst: tmp,
                });
                self.emit(Insn::Shift64 {
                    op: ShiftOp::Shr,
                    amount: 64 - half,
                    dst: tmp,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Or,
                    src: RegMemImm::Reg(tmp),
                    dst,
                });
                Ok(dst)
            }

            // unordered compare; keep only the C, P and Z flag images
            Binop::CmpF64 => {
                let dst = self.new_vreg_gp();
                let src_l = self.double_expr(lhs)?;
                let src_r = self.double_expr(rhs)?;
                self.emit(Insn::SseUComIs {
                    size: 8,
                    lhs: src_l,
                    rhs: src_r,
                    dst,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::And,
                    src: RegMemImm::Imm(0x45),
                    dst,
                });
                Ok(dst)
            }

            Binop::F64ToI32S | Binop::F64ToI64S => {
                let dst_size: u8 = if matches!(op, Binop::F64ToI32S) { 4 } else { 8 };
                let src = self.double_expr(rhs)?;
                let dst = self.new_vreg_gp();
                self.set_rounding_mode(lhs)?;
                self.emit(Insn::SseSF2SI {
                    src_size: 8,
                    dst_size,
                    src,
                    dst,
                });
                self.set_rounding_default();
                Ok(dst)
            }

            _ => Err(cannot_reduce("integer", whole)),
        }
    }

    fn int_unop(&mut self, op: Unop, arg: &Expr, whole: &Expr) -> SelectResult<Reg> {
        match op {
            Unop::ZeroExt32To64 => {
                // a widen of an already-widened narrow value collapses to
                // one shift-out/shift-in pair on the original
                if let Expr::Unop {
                    op: inner,
                    arg: narrow,
                } = arg
                {
                    let strip: Option<u8> = match inner {
                        Unop::ZeroExt16To32 => Some(48),
                        Unop::ZeroExt8To32 => Some(56),
                        _ => None,
                    };
                    if let Some(amount) = strip {
                        let src = self.int_expr(narrow)?;
                        let dst = self.new_vreg_gp();
                        self.emit(mov_reg(src, dst));
                        self.emit(Insn::Shift64 {
                            op: ShiftOp::Shl,
                            amount,
                            dst,
                        });
                        self.emit(Insn::Shift64 {
                            op: ShiftOp::Shr,
                            amount,
                            dst,
                        });
                        return Ok(dst);
                    }
                }
                let src = self.int_expr(arg)?;
                let dst = self.new_vreg_gp();
                self.emit(Insn::MovZlq { src, dst });
                Ok(dst)
            }

            Unop::ZeroExt8To16 | Unop::ZeroExt8To32 => self.mask_low(arg, 0xFF),
            Unop::ZeroExt16To32 => self.mask_low(arg, 0xFFFF),

            Unop::SignExt8To16 | Unop::SignExt8To32 => self.sign_fill(arg, 56),
            Unop::SignExt16To32 => self.sign_fill(arg, 48),
            Unop::SignExt32To64 => self.sign_fill(arg, 32),

            // low-part truncation is free: same register, narrower view
            Unop::Narrow16To8 | Unop::Narrow32To8 | Unop::Narrow32To16 | Unop::Narrow64To32 => {
                self.int_expr(arg)
            }

            Unop::High32To16 => self.shift_down(arg, 16),
            Unop::High64To32 => self.shift_down(arg, 32),

            Unop::Not8 | Unop::Not16 | Unop::Not32 | Unop::Not64 => {
                let src = self.int_expr(arg)?;
                let dst = self.new_vreg_gp();
                self.emit(mov_reg(src, dst));
                self.emit(Insn::Not64 { dst });
                Ok(dst)
            }

            Unop::Ctz64 => {
                let src = self.int_expr(arg)?;
                let dst = self.new_vreg_gp();
                self.emit(Insn::Bsfr64 {
                    forwards: true,
                    src,
                    dst,
                });
                Ok(dst)
            }

            // count leading zeroes as 63 - index-of-highest-set-bit
            Unop::Clz64 => {
                let tmp = self.new_vreg_gp();
                let dst = self.new_vreg_gp();
                let src = self.int_expr(arg)?;
                self.emit(Insn::Bsfr64 {
                    forwards: false,
                    src,
                    dst: tmp,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Mov,
                    src: RegMemImm::Imm(63),
                    dst,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Sub,
                    src: RegMemImm::Reg(tmp),
                    dst,
                });
                Ok(dst)
            }

            Unop::BoolTo8 => {
                // a truncate-to-1-bit chain under the widen is just a
                // low-bit mask of the wide value
                if let Expr::Unop {
                    op: Unop::Narrow32To1,
                    arg: a1,
                } = arg
                {
                    if let Expr::Unop {
                        op: Unop::Narrow64To32,
                        arg: a2,
                    } = a1.as_ref()
                    {
                        let src = self.int_expr(a2)?;
                        let dst = self.new_vreg_gp();
                        self.emit(mov_reg(src, dst));
                        self.emit(Insn::Alu64R {
                            op: AluOp::And,
                            src: RegMemImm::Imm(1),
                            dst,
                        });
                        return Ok(dst);
                    }
                }
                let cond = self.cond_code(arg)?;
                let dst = self.new_vreg_gp();
                self.emit(Insn::Set64 { cond, dst });
                Ok(dst)
            }

            Unop::Low64Of128 => {
                let (_hi, lo) = self.pair_expr(arg)?;
                Ok(lo)
            }
            Unop::High64Of128 => {
                let (hi, _lo) = self.pair_expr(arg)?;
                Ok(hi)
            }

            Unop::Low64OfV128 | Unop::High64OfV128 => {
                let off = if matches!(op, Unop::High64OfV128) { 8 } else { 0 };
                let dst = self.new_vreg_gp();
                let vec = self.vector_expr(arg)?;
                self.emit(sub_from_rsp(16));
                self.emit(Insn::SseLdSt {
                    is_load: false,
                    size: 16,
                    reg: vec,
                    addr: AMode::base_disp(0, RSP),
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Mov,
                    src: RegMemImm::Mem(AMode::base_disp(off, RSP)),
                    dst,
                });
                self.emit(add_to_rsp(16));
                Ok(dst)
            }

            // bounce through the red zone
            Unop::ReinterpF64AsI64 => {
                let dst = self.new_vreg_gp();
                let src = self.double_expr(arg)?;
                let m8 = AMode::base_disp(-8, RSP);
                self.emit(Insn::SseLdSt {
                    is_load: false,
                    size: 8,
                    reg: src,
                    addr: m8,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Mov,
                    src: RegMemImm::Mem(m8),
                    dst,
                });
                Ok(dst)
            }

            _ => Err(cannot_reduce("integer", whole)),
        }
    }

    fn mask_low(&mut self, arg: &Expr, mask: u32) -> SelectResult<Reg> {
        let src = self.int_expr(arg)?;
        let dst = self.new_vreg_gp();
        self.emit(mov_reg(src, dst));
        self.emit(Insn::Alu64R {
            op: AluOp::And,
            src: RegMemImm::Imm(mask),
            dst,
        });
        Ok(dst)
    }

    fn sign_fill(&mut self, arg: &Expr, amount: u8) -> SelectResult<Reg> {
        let src = self.int_expr(arg)?;
        let dst = self.new_vreg_gp();
        self.emit(mov_reg(src, dst));
        self.emit(Insn::Shift64 {
            op: ShiftOp::Shl,
            amount,
            dst,
        });
        self.emit(Insn::Shift64 {
            op: ShiftOp::Sar,
            amount,
            dst,
        });
        Ok(dst)
    }

    fn shift_down(&mut self, arg: &Expr, amount: u8) -> SelectResult<Reg> {
        let src = self.int_expr(arg)?;
        let dst = self.new_vreg_gp();
        self.emit(mov_reg(src, dst));
        self.emit(Insn::Shift64 {
            op: ShiftOp::Shr,
            amount,
            dst,
        });
        Ok(dst)
    }

    /* ------------------ 128-bit pairs ------------------ */

    /// Returned as (high, low). As with single registers, the pair must not
    /// be written by the caller.
    fn pair_expr_wrk(&mut self, e: &Expr) -> SelectResult<(Reg, Reg)> {
        match e {
            Expr::Temp(t) => self.temp_pair_regs(*t),

            Expr::Binop { op, lhs, rhs } => match op {
                Binop::MullU(IntWidth::W64) | Binop::MullS(IntWidth::W64) => {
                    let signed = matches!(op, Binop::MullS(_));
                    let t_lo = self.new_vreg_gp();
                    let t_hi = self.new_vreg_gp();
                    let rm_left = self.rm(lhs)?;
                    let r_right = self.int_expr(rhs)?;
                    self.emit(mov_reg(r_right, RAX));
                    self.emit(Insn::MulL {
                        signed,
                        src: rm_left,
                    });
                    // result is in RDX:RAX
                    self.emit(mov_reg(RDX, t_hi));
                    self.emit(mov_reg(RAX, t_lo));
                    Ok((t_hi, t_lo))
                }

                Binop::DivModS128To64 | Binop::DivModU128To64 => {
                    let signed = matches!(op, Binop::DivModS128To64);
                    let rm_right = self.rm(rhs)?;
                    let (s_hi, s_lo) = self.pair_expr(lhs)?;
                    let t_lo = self.new_vreg_gp();
                    let t_hi = self.new_vreg_gp();
                    self.emit(mov_reg(s_hi, RDX));
                    self.emit(mov_reg(s_lo, RAX));
                    self.emit(Insn::Div {
                        signed,
                        size: 8,
                        src: rm_right,
                    });
                    // remainder in RDX, quotient in RAX
                    self.emit(mov_reg(RDX, t_hi));
                    self.emit(mov_reg(RAX, t_lo));
                    Ok((t_hi, t_lo))
                }

                Binop::Join64HLTo128 => {
                    let hi = self.int_expr(lhs)?;
                    let lo = self.int_expr(rhs)?;
                    Ok((hi, lo))
                }

                _ => Err(cannot_reduce("128-bit integer", e)),
            },

            _ => Err(cannot_reduce("128-bit integer", e)),
        }
    }

    /* ------------------ vector expressions ------------------ */

    fn vector_expr_wrk(&mut self, e: &Expr) -> SelectResult<Reg> {
        match e {
            Expr::Temp(t) => self.temp_reg(*t),

            Expr::Const(Const::V128(mask)) => {
                let dst = self.new_vreg_vec();
                match mask {
                    0x0000 => self.emit(Insn::SseReRg {
                        op: SseOp::Xor,
                        src: dst,
                        dst,
                    }),
                    // low quadword all-ones: a pushed 32-bit immediate
                    // sign-extends to 64 bits
                    0x00FF => {
                        self.emit(Insn::Push {
                            src: RegMemImm::Imm(0),
                        });
                        self.emit(Insn::Push {
                            src: RegMemImm::Imm(0xFFFF_FFFF),
                        });
                        self.emit(Insn::SseLdSt {
                            is_load: true,
                            size: 16,
                            reg: dst,
                            addr: AMode::base_disp(0, RSP),
                        });
                        self.emit(add_to_rsp(16));
                    }
                    // low doubleword all-ones needs the exact 64-bit image
                    0x000F => {
                        let tmp = self.new_vreg_gp();
                        self.emit(Insn::Imm64 {
                            imm: 0xFFFF_FFFF,
                            dst: tmp,
                        });
                        self.emit(Insn::Push {
                            src: RegMemImm::Imm(0),
                        });
                        self.emit(Insn::Push {
                            src: RegMemImm::Reg(tmp),
                        });
                        self.emit(Insn::SseLdSt {
                            is_load: true,
                            size: 16,
                            reg: dst,
                            addr: AMode::base_disp(0, RSP),
                        });
                        self.emit(add_to_rsp(16));
                    }
                    _ => return Err(cannot_reduce("vector", e)),
                }
                Ok(dst)
            }

            Expr::Load {
                ty: IrType::V128,
                addr,
            } => {
                let dst = self.new_vreg_vec();
                let am = self.amode(addr)?;
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 16,
                    reg: dst,
                    addr: am,
                });
                Ok(dst)
            }

            Expr::Get {
                offset,
                ty: IrType::V128,
            } => {
                let dst = self.new_vreg_vec();
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 16,
                    reg: dst,
                    addr: AMode::base_disp(*offset, RBP),
                });
                Ok(dst)
            }

            Expr::Unop { op, arg } => match op {
                // zero, compare-equal against itself for all-ones, xor in
                // the operand
                Unop::NotV128 => {
                    let src = self.vector_expr(arg)?;
                    let dst = self.new_vreg_vec();
                    self.emit(Insn::SseReRg {
                        op: SseOp::Xor,
                        src: dst,
                        dst,
                    });
                    self.emit(Insn::Sse32Fx4 {
                        op: SseOp::CmpEqF,
                        src: dst,
                        dst,
                    });
                    self.emit(Insn::SseReRg {
                        op: SseOp::Xor,
                        src,
                        dst,
                    });
                    Ok(dst)
                }

                Unop::ZeroExt32ToV128 => {
                    let dst = self.new_vreg_vec();
                    let m32 = AMode::base_disp(-32, RSP);
                    let ri = self.ri(arg)?;
                    self.emit(Insn::Alu64M {
                        op: AluOp::Mov,
                        src: ri,
                        addr: m32,
                    });
                    self.emit(Insn::SseLdzLo {
                        size: 4,
                        addr: m32,
                        dst,
                    });
                    Ok(dst)
                }

                Unop::ZeroExt64ToV128 => {
                    let dst = self.new_vreg_vec();
                    let rmi = self.rmi(arg)?;
                    self.emit(Insn::Push { src: rmi });
                    self.emit(Insn::SseLdzLo {
                        size: 8,
                        addr: AMode::base_disp(0, RSP),
                        dst,
                    });
                    self.emit(add_to_rsp(8));
                    Ok(dst)
                }

                Unop::Sqrt64F0x2 => {
                    let src = self.vector_expr(arg)?;
                    let dst = self.new_vreg_vec();
                    self.emit(mov_vec(src, dst));
                    self.emit(Insn::Sse64FLo {
                        op: SseOp::SqrtF,
                        src,
                        dst,
                    });
                    Ok(dst)
                }

                _ => Err(cannot_reduce("vector", e)),
            },

            Expr::Binop { op, lhs, rhs } => {
                let rerg = match op {
                    Binop::AndV128 => Some(SseOp::And),
                    Binop::OrV128 => Some(SseOp::Or),
                    Binop::XorV128 => Some(SseOp::Xor),
                    _ => None,
                };
                if let Some(sse) = rerg {
                    return self.vec_bitwise(sse, lhs, rhs);
                }

                let lane64 = match op {
                    Binop::Add64F0x2 => Some(SseOp::AddF),
                    Binop::Sub64F0x2 => Some(SseOp::SubF),
                    Binop::Mul64F0x2 => Some(SseOp::MulF),
                    Binop::Div64F0x2 => Some(SseOp::DivF),
                    Binop::Min64F0x2 => Some(SseOp::MinF),
                    Binop::Max64F0x2 => Some(SseOp::MaxF),
                    Binop::CmpEq64F0x2 => Some(SseOp::CmpEqF),
                    Binop::CmpLt64F0x2 => Some(SseOp::CmpLtF),
                    Binop::CmpLe64F0x2 => Some(SseOp::CmpLeF),
                    _ => None,
                };
                if let Some(sse) = lane64 {
                    return self.vec_lane64(sse, lhs, rhs);
                }

                let lane32 = match op {
                    Binop::Add32F0x4 => Some(SseOp::AddF),
                    Binop::Sub32F0x4 => Some(SseOp::SubF),
                    Binop::Mul32F0x4 => Some(SseOp::MulF),
                    Binop::Div32F0x4 => Some(SseOp::DivF),
                    Binop::Min32F0x4 => Some(SseOp::MinF),
                    Binop::Max32F0x4 => Some(SseOp::MaxF),
                    Binop::CmpLt32F0x4 => Some(SseOp::CmpLtF),
                    _ => None,
                };
                if let Some(sse) = lane32 {
                    return self.vec_lane32(sse, lhs, rhs);
                }

                match op {
                    Binop::CmpEq32F0x4 | Binop::CmpLe32F0x4 => {
                        Err(SelectError::UnsupportedWidth {
                            operation: op.name(),
                            width: 32,
                        })
                    }

                    // splice an integer into the low quadword through the
                    // stack
                    Binop::SetV128Lo64 => {
                        let src_v = self.vector_expr(lhs)?;
                        let src_i = self.int_expr(rhs)?;
                        let dst = self.new_vreg_vec();
                        let rsp0 = AMode::base_disp(0, RSP);
                        self.emit(sub_from_rsp(16));
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 16,
                            reg: src_v,
                            addr: rsp0,
                        });
                        self.emit(Insn::Alu64M {
                            op: AluOp::Mov,
                            src: RegImm::Reg(src_i),
                            addr: rsp0,
                        });
                        self.emit(Insn::SseLdSt {
                            is_load: true,
                            size: 16,
                            reg: dst,
                            addr: rsp0,
                        });
                        self.emit(add_to_rsp(16));
                        Ok(dst)
                    }

                    Binop::Join64HLToV128 => {
                        let rmi_hi = self.rmi(lhs)?;
                        self.emit(Insn::Push { src: rmi_hi });
                        let rmi_lo = self.rmi(rhs)?;
                        self.emit(Insn::Push { src: rmi_lo });
                        let dst = self.new_vreg_vec();
                        self.emit(Insn::SseLdSt {
                            is_load: true,
                            size: 16,
                            reg: dst,
                            addr: AMode::base_disp(0, RSP),
                        });
                        self.emit(add_to_rsp(16));
                        Ok(dst)
                    }

                    _ => Err(cannot_reduce("vector", e)),
                }
            }

            _ => Err(cannot_reduce("vector", e)),
        }
    }

    fn vec_bitwise(&mut self, op: SseOp, lhs: &Expr, rhs: &Expr) -> SelectResult<Reg> {
        let r_l = self.vector_expr(lhs)?;
        let r_r = self.vector_expr(rhs)?;
        let dst = self.new_vreg_vec();
        self.emit(mov_vec(r_l, dst));
        self.emit(Insn::SseReRg { op, src: r_r, dst });
        Ok(dst)
    }

    fn vec_lane64(&mut self, op: SseOp, lhs: &Expr, rhs: &Expr) -> SelectResult<Reg> {
        let r_l = self.vector_expr(lhs)?;
        let r_r = self.vector_expr(rhs)?;
        let dst = self.new_vreg_vec();
        self.emit(mov_vec(r_l, dst));
        self.emit(Insn::Sse64FLo { op, src: r_r, dst });
        Ok(dst)
    }

    fn vec_lane32(&mut self, op: SseOp, lhs: &Expr, rhs: &Expr) -> SelectResult<Reg> {
        let r_l = self.vector_expr(lhs)?;
        let r_r = self.vector_expr(rhs)?;
        let dst = self.new_vreg_vec();
        self.emit(mov_vec(r_l, dst));
        self.emit(Insn::Sse32FLo { op, src: r_r, dst });
        Ok(dst)
    }

    /* ------------------ scalar float expressions ------------------ */

    fn float_expr_wrk(&mut self, e: &Expr) -> SelectResult<Reg> {
        match e {
            Expr::Temp(t) => self.temp_reg(*t),

            Expr::Load {
                ty: IrType::F32,
                addr,
            } => {
                let dst = self.new_vreg_vec();
                let am = self.amode(addr)?;
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 4,
                    reg: dst,
                    addr: am,
                });
                Ok(dst)
            }

            Expr::Get {
                offset,
                ty: IrType::F32,
            } => {
                let dst = self.new_vreg_vec();
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 4,
                    reg: dst,
                    addr: AMode::base_disp(*offset, RBP),
                });
                Ok(dst)
            }

            Expr::Binop {
                op: Binop::F64ToF32,
                lhs,
                rhs,
            } => {
                let dst = self.new_vreg_vec();
                let src = self.double_expr(rhs)?;
                self.set_rounding_mode(lhs)?;
                self.emit(Insn::SseSDSS {
                    narrow: true,
                    src,
                    dst,
                });
                self.set_rounding_default();
                Ok(dst)
            }

            Expr::Mux {
                cond,
                if_false,
                if_true,
            } => self.mux_lanes(cond, if_false, if_true, false),

            _ => Err(cannot_reduce("float", e)),
        }
    }

    /* ------------------ scalar double expressions ------------------ */

    fn double_expr_wrk(&mut self, e: &Expr) -> SelectResult<Reg> {
        match e {
            Expr::Temp(t) => self.temp_reg(*t),

            Expr::Const(Const::F64Bits(bits)) => {
                let tmp = self.new_vreg_gp();
                let dst = self.new_vreg_vec();
                self.emit(Insn::Imm64 {
                    imm: *bits,
                    dst: tmp,
                });
                self.emit(Insn::Push {
                    src: RegMemImm::Reg(tmp),
                });
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 8,
                    reg: dst,
                    addr: AMode::base_disp(0, RSP),
                });
                self.emit(add_to_rsp(8));
                Ok(dst)
            }

            Expr::Load {
                ty: IrType::F64,
                addr,
            } => {
                let dst = self.new_vreg_vec();
                let am = self.amode(addr)?;
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 8,
                    reg: dst,
                    addr: am,
                });
                Ok(dst)
            }

            Expr::Get {
                offset,
                ty: IrType::F64,
            } => {
                let dst = self.new_vreg_vec();
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 8,
                    reg: dst,
                    addr: AMode::base_disp(*offset, RBP),
                });
                Ok(dst)
            }

            Expr::GetI { descr, index, bias } => {
                let am = self.guest_array_amode(descr, index, *bias)?;
                let dst = self.new_vreg_vec();
                self.emit(Insn::SseLdSt {
                    is_load: true,
                    size: 8,
                    reg: dst,
                    addr: am,
                });
                Ok(dst)
            }

            Expr::Binop { op, lhs, rhs } => {
                let arith = match op {
                    Binop::AddF64 => Some(SseOp::AddF),
                    Binop::SubF64 => Some(SseOp::SubF),
                    Binop::MulF64 => Some(SseOp::MulF),
                    Binop::DivF64 => Some(SseOp::DivF),
                    _ => None,
                };
                if let Some(sse) = arith {
                    let src_l = self.double_expr(lhs)?;
                    let src_r = self.double_expr(rhs)?;
                    let dst = self.new_vreg_vec();
                    self.emit(mov_vec(src_l, dst));
                    self.emit(Insn::Sse64FLo {
                        op: sse,
                        src: src_r,
                        dst,
                    });
                    return Ok(dst);
                }

                if matches!(op, Binop::I64ToF64) {
                    let dst = self.new_vreg_vec();
                    let src = self.int_expr(rhs)?;
                    self.set_rounding_mode(lhs)?;
                    self.emit(Insn::SseSI2SF {
                        src_size: 8,
                        dst_size: 8,
                        src,
                        dst,
                    });
                    self.set_rounding_default();
                    return Ok(dst);
                }

                Err(cannot_reduce("double", e))
            }

            Expr::Unop { op, arg } => match op {
                Unop::NegF64 => self.f64_sign_op(arg, true),
                Unop::AbsF64 => self.f64_sign_op(arg, false),

                // exact in every rounding mode
                Unop::F32ToF64 => {
                    let src = self.float_expr(arg)?;
                    let dst = self.new_vreg_vec();
                    self.emit(Insn::SseSDSS {
                        narrow: false,
                        src,
                        dst,
                    });
                    Ok(dst)
                }

                Unop::I32ToF64 => {
                    let dst = self.new_vreg_vec();
                    let src = self.int_expr(arg)?;
                    self.set_rounding_default();
                    self.emit(Insn::SseSI2SF {
                        src_size: 4,
                        dst_size: 8,
                        src,
                        dst,
                    });
                    Ok(dst)
                }

                // bounce through the red zone
                Unop::ReinterpI64AsF64 => {
                    let src = self.int_expr(arg)?;
                    let dst = self.new_vreg_vec();
                    let m8 = AMode::base_disp(-8, RSP);
                    self.emit(Insn::Alu64M {
                        op: AluOp::Mov,
                        src: RegImm::Reg(src),
                        addr: m8,
                    });
                    self.emit(Insn::SseLdSt {
                        is_load: true,
                        size: 8,
                        reg: dst,
                        addr: m8,
                    });
                    Ok(dst)
                }

                _ => Err(cannot_reduce("double", e)),
            },

            Expr::Mux {
                cond,
                if_false,
                if_true,
            } => self.mux_lanes(cond, if_false, if_true, true),

            _ => Err(cannot_reduce("double", e)),
        }
    }

    /// Flip or clear the sign bit of a double via a stack-built mask:
    /// xor for negate, andnot for absolute value.
    fn f64_sign_op(&mut self, arg: &Expr, negate: bool) -> SelectResult<Reg> {
        let mask_reg = self.new_vreg_gp();
        let dst = self.new_vreg_vec();
        let tmp = self.new_vreg_vec();
        let src = self.double_expr(arg)?;
        self.emit(mov_vec(src, tmp));
        self.emit(Insn::Push {
            src: RegMemImm::Imm(0),
        });
        self.emit(Insn::Imm64 {
            imm: 1u64 << 63,
            dst: mask_reg,
        });
        self.emit(Insn::Push {
            src: RegMemImm::Reg(mask_reg),
        });
        self.emit(Insn::SseLdSt {
            is_load: true,
            size: 16,
            reg: dst,
            addr: AMode::base_disp(0, RSP),
        });
        let op = if negate { SseOp::Xor } else { SseOp::AndN };
        self.emit(Insn::SseReRg { op, src: tmp, dst });
        self.emit(add_to_rsp(16));
        Ok(dst)
    }

    /// Multiplexer over vector-class values, else arm first.
    fn mux_lanes(
        &mut self,
        cond: &Expr,
        if_false: &Expr,
        if_true: &Expr,
        double: bool,
    ) -> SelectResult<Reg> {
        let r_false = if double {
            self.double_expr(if_false)?
        } else {
            self.float_expr(if_false)?
        };
        let dst = self.new_vreg_vec();
        self.emit(mov_vec(r_false, dst));
        let r_true = if double {
            self.double_expr(if_true)?
        } else {
            self.float_expr(if_true)?
        };
        let r_cond = self.int_expr(cond)?;
        self.emit(Insn::Test64 {
            imm: 1,
            dst: RegMem::Reg(r_cond),
        });
        self.emit(Insn::SseCMov {
            cond: CondCode::NZ,
            src: r_true,
            dst,
        });
        Ok(dst)
    }

    /* ------------------ addressing modes ------------------ */

    fn amode_wrk(&mut self, e: &Expr) -> SelectResult<AMode> {
        if let Expr::Binop {
            op: Binop::Add(IntWidth::W64),
            lhs,
            rhs,
        } = e
        {
            // expr + 32-bit displacement, with the expr possibly
            // base + (index << shift)
            if let Expr::Const(Const::U64(disp)) = rhs.as_ref() {
                if fits_in_32bits(*disp) {
                    if let Expr::Binop {
                        op: Binop::Add(IntWidth::W64),
                        lhs: base_e,
                        rhs: scaled,
                    } = lhs.as_ref()
                    {
                        if let Expr::Binop {
                            op: Binop::Shl(IntWidth::W64),
                            lhs: index_e,
                            rhs: sh,
                        } = scaled.as_ref()
                        {
                            if let Expr::Const(Const::U8(shift)) = sh.as_ref() {
                                if *shift <= 3 {
                                    let base = self.int_expr(base_e)?;
                                    let index = self.int_expr(index_e)?;
                                    return Ok(AMode::base_index_disp(
                                        *disp as u32 as i32,
                                        base,
                                        index,
                                        *shift,
                                    ));
                                }
                            }
                        }
                    }
                    let base = self.int_expr(lhs)?;
                    return Ok(AMode::base_disp(*disp as u32 as i32, base));
                }
            }

            // base + (index << shift) with no displacement
            if let Expr::Binop {
                op: Binop::Shl(IntWidth::W64),
                lhs: index_e,
                rhs: sh,
            } = rhs.as_ref()
            {
                if let Expr::Const(Const::U8(shift)) = sh.as_ref() {
                    if (1..=3).contains(shift) {
                        let base = self.int_expr(lhs)?;
                        let index = self.int_expr(index_e)?;
                        return Ok(AMode::base_index_disp(0, base, index, *shift));
                    }
                }
            }
        }

        let base = self.int_expr(e)?;
        Ok(AMode::base_disp(0, base))
    }

    /* ------------------ operand forms ------------------ */

    fn rmi_wrk(&mut self, e: &Expr) -> SelectResult<RegMemImm> {
        if let Expr::Const(c) = e {
            match c {
                Const::U64(v) if fits_in_32bits(*v) => return Ok(RegMemImm::Imm(*v as u32)),
                Const::U32(v) => return Ok(RegMemImm::Imm(*v)),
                Const::U16(v) => return Ok(RegMemImm::Imm(u32::from(*v))),
                Const::U8(v) => return Ok(RegMemImm::Imm(u32::from(*v))),
                _ => {}
            }
        }
        if let Expr::Get {
            offset,
            ty: IrType::I64,
        } = e
        {
            return Ok(RegMemImm::Mem(AMode::base_disp(*offset, RBP)));
        }
        if let Expr::Load {
            ty: IrType::I64,
            addr,
        } = e
        {
            let am = self.amode(addr)?;
            return Ok(RegMemImm::Mem(am));
        }
        let r = self.int_expr(e)?;
        Ok(RegMemImm::Reg(r))
    }

    fn ri_wrk(&mut self, e: &Expr) -> SelectResult<RegImm> {
        if let Expr::Const(c) = e {
            match c {
                Const::U64(v) if fits_in_32bits(*v) => return Ok(RegImm::Imm(*v as u32)),
                Const::U32(v) => return Ok(RegImm::Imm(*v)),
                Const::U16(v) => return Ok(RegImm::Imm(u32::from(*v))),
                Const::U8(v) => return Ok(RegImm::Imm(u32::from(*v))),
                _ => {}
            }
        }
        let r = self.int_expr(e)?;
        Ok(RegImm::Reg(r))
    }

    fn rm_wrk(&mut self, e: &Expr) -> SelectResult<RegMem> {
        if let Expr::Get {
            offset,
            ty: IrType::I64,
        } = e
        {
            return Ok(RegMem::Mem(AMode::base_disp(*offset, RBP)));
        }
        let r = self.int_expr(e)?;
        Ok(RegMem::Reg(r))
    }

    /* ------------------ condition codes ------------------ */

    fn cond_code_wrk(&mut self, e: &Expr) -> SelectResult<CondCode> {
        match e {
            // xor sets ZF, so Z reads as true and NZ as false
            Expr::Const(Const::U1(b)) => {
                let r = self.new_vreg_gp();
                self.emit(Insn::Alu64R {
                    op: AluOp::Mov,
                    src: RegMemImm::Imm(0),
                    dst: r,
                });
                self.emit(Insn::Alu64R {
                    op: AluOp::Xor,
                    src: RegMemImm::Reg(r),
                    dst: r,
                });
                Ok(if *b { CondCode::Z } else { CondCode::NZ })
            }

            Expr::Unop {
                op: Unop::Not1,
                arg,
            } => Ok(self.cond_code(arg)?.invert()),

            Expr::Unop {
                op: Unop::Narrow64To1,
                arg,
            } => {
                let rm = self.rm(arg)?;
                self.emit(Insn::Test64 { imm: 1, dst: rm });
                Ok(CondCode::NZ)
            }

            // a 64-to-32 narrow under the 1-bit narrow changes nothing the
            // bit test can see
            Expr::Unop {
                op: Unop::Narrow32To1,
                arg,
            } => {
                let wide = match arg.as_ref() {
                    Expr::Unop {
                        op: Unop::Narrow64To32,
                        arg: inner,
                    } => inner.as_ref(),
                    other => other,
                };
                let rm = self.rm(wide)?;
                self.emit(Insn::Test64 { imm: 1, dst: rm });
                Ok(CondCode::NZ)
            }

            Expr::Temp(t) => {
                let r64 = self.temp_reg(*t)?;
                let dst = self.new_vreg_gp();
                self.emit(mov_reg(r64, dst));
                self.emit(Insn::Alu64R {
                    op: AluOp::And,
                    src: RegMemImm::Imm(1),
                    dst,
                });
                Ok(CondCode::NZ)
            }

            Expr::Binop { op, lhs, rhs } => match op {
                Binop::CmpEq(w) | Binop::CmpNe(w) => {
                    let is_eq = matches!(op, Binop::CmpEq(_));
                    match w {
                        IntWidth::W64 => {
                            let r1 = self.int_expr(lhs)?;
                            let rmi2 = self.rmi(rhs)?;
                            self.emit(Insn::Alu64R {
                                op: AluOp::Cmp,
                                src: rmi2,
                                dst: r1,
                            });
                        }
                        IntWidth::W32 => {
                            let r1 = self.int_expr(lhs)?;
                            let r2 = self.int_expr(rhs)?;
                            let t1 = self.new_vreg_gp();
                            let t2 = self.new_vreg_gp();
                            self.emit(Insn::MovZlq { src: r1, dst: t1 });
                            self.emit(Insn::MovZlq { src: r2, dst: t2 });
                            self.emit(Insn::Alu64R {
                                op: AluOp::Cmp,
                                src: RegMemImm::Reg(t2),
                                dst: t1,
                            });
                        }
                        IntWidth::W8 | IntWidth::W16 => {
                            let mask = if *w == IntWidth::W8 { 0xFF } else { 0xFFFF };
                            let r1 = self.int_expr(lhs)?;
                            let rmi2 = self.rmi(rhs)?;
                            let r = self.new_vreg_gp();
                            self.emit(mov_reg(r1, r));
                            self.emit(Insn::Alu64R {
                                op: AluOp::Xor,
                                src: rmi2,
                                dst: r,
                            });
                            self.emit(Insn::Alu64R {
                                op: AluOp::And,
                                src: RegMemImm::Imm(mask),
                                dst: r,
                            });
                        }
                    }
                    Ok(if is_eq { CondCode::Z } else { CondCode::NZ })
                }

                Binop::CmpLtS(w) | Binop::CmpLtU(w) | Binop::CmpLeS(w) | Binop::CmpLeU(w) => {
                    if *w != IntWidth::W64 {
                        return Err(SelectError::UnsupportedWidth {
                            operation: op.name(),
                            width: w.bits(),
                        });
                    }
                    let r1 = self.int_expr(lhs)?;
                    let rmi2 = self.rmi(rhs)?;
                    self.emit(Insn::Alu64R {
                        op: AluOp::Cmp,
                        src: rmi2,
                        dst: r1,
                    });
                    Ok(match op {
                        Binop::CmpLtS(_) => CondCode::L,
                        Binop::CmpLtU(_) => CondCode::B,
                        Binop::CmpLeS(_) => CondCode::LE,
                        _ => CondCode::BE,
                    })
                }

                _ => Err(cannot_reduce("condition", e)),
            },

            _ => Err(cannot_reduce("condition", e)),
        }
    }

    /* ------------------ rounding control ------------------ */

    /// Build an MXCSR image with the rounding-control field taken from the
    /// low two bits of `mode` and load it. Only works because the default
    /// image has both rounding bits clear.
    fn set_rounding_mode(&mut self, mode: &Expr) -> SelectResult<()> {
        let reg = self.new_vreg_gp();
        self.emit(Insn::Alu64R {
            op: AluOp::Mov,
            src: RegMemImm::Imm(3),
            dst: reg,
        });
        let rmi = self.rmi(mode)?;
        self.emit(Insn::Alu64R {
            op: AluOp::And,
            src: rmi,
            dst: reg,
        });
        self.emit(Insn::Shift64 {
            op: ShiftOp::Shl,
            amount: 13,
            dst: reg,
        });
        self.emit(Insn::Alu64R {
            op: AluOp::Or,
            src: RegMemImm::Imm(MXCSR_DEFAULT),
            dst: reg,
        });
        self.emit(Insn::Push {
            src: RegMemImm::Reg(reg),
        });
        self.emit(Insn::LdMxcsr {
            addr: AMode::base_disp(0, RSP),
        });
        self.emit(add_to_rsp(8));
        Ok(())
    }

    fn set_rounding_default(&mut self) {
        self.emit(Insn::Push {
            src: RegMemImm::Imm(MXCSR_DEFAULT),
        });
        self.emit(Insn::LdMxcsr {
            addr: AMode::base_disp(0, RSP),
        });
        self.emit(add_to_rsp(8));
    }

    /* ------------------ guest-state arrays ------------------ */

    /// Address of an element of a circular guest-state array: index plus
    /// bias, wrapped modulo the element count. Only the 8-element arrays
    /// with 1- or 8-byte elements that guest fronts actually produce are
    /// handled.
    fn guest_array_amode(
        &mut self,
        descr: &GuestArray,
        index: &Expr,
        bias: i32,
    ) -> SelectResult<AMode> {
        let elem_size = descr.elem_ty.size_bytes();
        if descr.count != 8 || (elem_size != 1 && elem_size != 8) {
            return Err(SelectError::CannotReduce {
                kind: "guest-state array",
                expr: descr.to_string(),
            });
        }
        if bias.unsigned_abs() >= 10000 {
            return Err(SelectError::CannotReduce {
                kind: "guest-state array bias",
                expr: bias.to_string(),
            });
        }
        let tmp = self.new_vreg_gp();
        let roff = self.int_expr(index)?;
        self.emit(mov_reg(roff, tmp));
        if bias != 0 {
            self.emit(Insn::Alu64R {
                op: AluOp::Add,
                src: RegMemImm::Imm(bias as u32),
                dst: tmp,
            });
        }
        self.emit(Insn::Alu64R {
            op: AluOp::And,
            src: RegMemImm::Imm(7),
            dst: tmp,
        });
        Ok(AMode::base_index_disp(
            descr.base,
            RBP,
            tmp,
            if elem_size == 8 { 3 } else { 0 },
        ))
    }

    /* ------------------ helper calls ------------------ */

    /// Marshal and emit a call to a helper. Arguments must all be I64.
    /// With `needs_state_ptr`, RBP is passed as a hidden first argument.
    fn helper_call(
        &mut self,
        guard: Option<&Expr>,
        helper: &Helper,
        args: &[Expr],
        needs_state_ptr: bool,
    ) -> SelectResult<()> {
        let total = check_arg_count(args.len(), needs_state_ptr)?;
        for a in args {
            let ty = self.expr_type(a)?;
            if ty != IrType::I64 {
                return Err(SelectError::TypeMismatch {
                    context: "helper-call argument",
                    expected: IrType::I64,
                    found: ty,
                });
            }
        }

        let cc = match choose_plan(guard, args) {
            MarshalPlan::Direct => {
                let mut argreg = 0;
                if needs_state_ptr {
                    self.emit(mov_reg(RBP, ARG_REGS[argreg]));
                    argreg += 1;
                }
                for a in args {
                    let rmi = self.rmi(a)?;
                    self.emit(Insn::Alu64R {
                        op: AluOp::Mov,
                        src: rmi,
                        dst: ARG_REGS[argreg],
                    });
                    argreg += 1;
                }
                CondCode::Always
            }

            MarshalPlan::Staged => {
                let mut staged = BumpVec::with_capacity_in(ARG_REGS.len(), self.session.arena());
                if needs_state_ptr {
                    let t = self.new_vreg_gp();
                    self.emit(mov_reg(RBP, t));
                    staged.push(t);
                }
                for a in args {
                    staged.push(self.int_expr(a)?);
                }
                // the guard comes last: argument evaluation is free to
                // trash the flags
                let mut cc = CondCode::Always;
                if let Some(g) = guard {
                    if !guard_is_always_true(g) {
                        cc = self.cond_code(g)?;
                    }
                }
                // nothing below may alter the flags
                for (i, r) in staged.iter().enumerate() {
                    self.emit(mov_reg(*r, ARG_REGS[i]));
                }
                cc
            }
        };

        self.emit(Insn::Call {
            cond: cc,
            target: helper.address,
            name: helper.name,
            num_args: total,
        });
        Ok(())
    }

    /* ------------------ statements ------------------ */

    fn stmt(&mut self, st: &Stmt) -> SelectResult<()> {
        match st {
            Stmt::NoOp | Stmt::IMark { .. } => Ok(()),

            Stmt::Store { addr, data } => {
                let addr_ty = self.expr_type(addr)?;
                if addr_ty != IrType::I64 {
                    return Err(SelectError::TypeMismatch {
                        context: "store address",
                        expected: IrType::I64,
                        found: addr_ty,
                    });
                }
                match self.expr_type(data)? {
                    IrType::I64 => {
                        let am = self.amode(addr)?;
                        let ri = self.ri(data)?;
                        self.emit(Insn::Alu64M {
                            op: AluOp::Mov,
                            src: ri,
                            addr: am,
                        });
                        Ok(())
                    }
                    ty @ (IrType::I8 | IrType::I16 | IrType::I32) => {
                        let am = self.amode(addr)?;
                        let r = self.int_expr(data)?;
                        self.emit(Insn::Store {
                            size: ty.size_bytes() as u8,
                            src: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::F64 => {
                        let am = self.amode(addr)?;
                        let r = self.double_expr(data)?;
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 8,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::F32 => {
                        let am = self.amode(addr)?;
                        let r = self.float_expr(data)?;
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 4,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::V128 => {
                        let am = self.amode(addr)?;
                        let r = self.vector_expr(data)?;
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 16,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    _ => Err(cannot_reduce("store", data)),
                }
            }

            Stmt::Put { offset, data } => {
                let am = AMode::base_disp(*offset, RBP);
                match self.expr_type(data)? {
                    IrType::I64 => {
                        let ri = self.ri(data)?;
                        self.emit(Insn::Alu64M {
                            op: AluOp::Mov,
                            src: ri,
                            addr: am,
                        });
                        Ok(())
                    }
                    ty @ (IrType::I8 | IrType::I16 | IrType::I32) => {
                        let r = self.int_expr(data)?;
                        self.emit(Insn::Store {
                            size: ty.size_bytes() as u8,
                            src: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::F32 => {
                        let r = self.float_expr(data)?;
                        self.set_rounding_default();
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 4,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::F64 => {
                        let r = self.double_expr(data)?;
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 8,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    IrType::V128 => {
                        let r = self.vector_expr(data)?;
                        self.emit(Insn::SseLdSt {
                            is_load: false,
                            size: 16,
                            reg: r,
                            addr: am,
                        });
                        Ok(())
                    }
                    _ => Err(cannot_reduce("state write", data)),
                }
            }

            Stmt::PutI {
                descr,
                index,
                bias,
                data,
            } => match self.expr_type(data)? {
                IrType::F64 => {
                    let am = self.guest_array_amode(descr, index, *bias)?;
                    let r = self.double_expr(data)?;
                    self.emit(Insn::SseLdSt {
                        is_load: false,
                        size: 8,
                        reg: r,
                        addr: am,
                    });
                    Ok(())
                }
                IrType::I8 => {
                    let am = self.guest_array_amode(descr, index, *bias)?;
                    let r = self.int_expr(data)?;
                    self.emit(Insn::Store {
                        size: 1,
                        src: r,
                        addr: am,
                    });
                    Ok(())
                }
                IrType::I64 => {
                    let am = self.guest_array_amode(descr, index, *bias)?;
                    let ri = self.ri(data)?;
                    self.emit(Insn::Alu64M {
                        op: AluOp::Mov,
                        src: ri,
                        addr: am,
                    });
                    Ok(())
                }
                _ => Err(cannot_reduce("indexed state write", data)),
            },

            Stmt::WrTmp { tmp, data } => {
                let ty = self
                    .env
                    .type_of(*tmp)
                    .ok_or(SelectError::UnknownTemp { index: tmp.0 })?;
                let data_ty = self.expr_type(data)?;
                if data_ty != ty {
                    return Err(SelectError::TypeMismatch {
                        context: "temp assignment",
                        expected: ty,
                        found: data_ty,
                    });
                }
                match ty {
                    IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64 => {
                        let rmi = self.rmi(data)?;
                        let dst = self.temp_reg(*tmp)?;
                        self.emit(Insn::Alu64R {
                            op: AluOp::Mov,
                            src: rmi,
                            dst,
                        });
                        Ok(())
                    }
                    IrType::I128 => {
                        let (hi, lo) = self.pair_expr(data)?;
                        let (dst_hi, dst_lo) = self.temp_pair_regs(*tmp)?;
                        self.emit(mov_reg(hi, dst_hi));
                        self.emit(mov_reg(lo, dst_lo));
                        Ok(())
                    }
                    IrType::I1 => {
                        let cond = self.cond_code(data)?;
                        let dst = self.temp_reg(*tmp)?;
                        self.emit(Insn::Set64 { cond, dst });
                        Ok(())
                    }
                    IrType::F64 => {
                        let src = self.double_expr(data)?;
                        let dst = self.temp_reg(*tmp)?;
                        self.emit(mov_vec(src, dst));
                        Ok(())
                    }
                    IrType::F32 => {
                        let src = self.float_expr(data)?;
                        let dst = self.temp_reg(*tmp)?;
                        self.emit(mov_vec(src, dst));
                        Ok(())
                    }
                    IrType::V128 => {
                        let src = self.vector_expr(data)?;
                        let dst = self.temp_reg(*tmp)?;
                        self.emit(mov_vec(src, dst));
                        Ok(())
                    }
                }
            }

            Stmt::Dirty(d) => {
                self.helper_call(Some(&d.guard), &d.helper, &d.args, d.needs_state_ptr)?;
                if let Some(t) = d.dst {
                    let ty = self
                        .env
                        .type_of(t)
                        .ok_or(SelectError::UnknownTemp { index: t.0 })?;
                    if ty != IrType::I64 {
                        return Err(SelectError::TypeMismatch {
                            context: "dirty-call return",
                            expected: IrType::I64,
                            found: ty,
                        });
                    }
                    let dst = self.temp_reg(t)?;
                    self.emit(mov_reg(RAX, dst));
                }
                Ok(())
            }

            Stmt::MFence => {
                self.emit(Insn::MFence);
                Ok(())
            }

            Stmt::Exit {
                guard,
                target,
                kind,
            } => {
                let target_expr = Expr::Const(Const::U64(*target));
                let ri = self.ri(&target_expr)?;
                let cc = self.cond_code(guard)?;
                self.emit(Insn::Goto {
                    kind: *kind,
                    cond: cc,
                    dst: ri,
                });
                Ok(())
            }
        }
    }

    fn lower_next(&mut self, next: &Expr, kind: JumpKind) -> SelectResult<()> {
        let ri = self.ri(next)?;
        self.emit(Insn::Goto {
            kind,
            cond: CondCode::Always,
            dst: ri,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, DirtyCall, TypeEnv};
    use bumpalo::Bump;

    fn lower(block: &Block) -> Vec<String> {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);
        let lowered = select_block(&session, block).unwrap();
        lowered.insns().iter().map(|i| i.to_string()).collect()
    }

    fn lower_err(block: &Block) -> SelectError {
        let arena = Bump::new();
        let session = TranslationSession::new(&arena);
        select_block(&session, block).unwrap_err()
    }

    fn boring_block(env: TypeEnv, next: u64) -> Block {
        Block::new(env, Expr::const_u64(next), JumpKind::Boring)
    }

    #[test]
    fn test_narrow_shift_widens_value_first() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I32);
        let t1 = env.new_temp(IrType::I32);
        let mut block = boring_block(env, 0x1000);
        block.stmts.push(Stmt::WrTmp {
            tmp: t1,
            data: Expr::binop(
                Binop::Shr(IntWidth::W32),
                Expr::temp(t0),
                Expr::const_u8(2),
            ),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr0,%vr2",
                "movzlq %vr2,%vr2",
                "shrq $2,%vr2",
                "movq %vr2,%vr1",
                "goto {Boring} $0x1000",
            ]
        );
    }

    #[test]
    fn test_narrow_arithmetic_shift_is_rejected() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I8);
        let t1 = env.new_temp(IrType::I8);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: t1,
            data: Expr::binop(
                Binop::Sar(IntWidth::W8),
                Expr::temp(t0),
                Expr::const_u8(1),
            ),
        });

        assert!(matches!(
            lower_err(&block),
            SelectError::UnsupportedWidth {
                operation: "Sar8",
                width: 8
            }
        ));
    }

    #[test]
    fn test_mux_lowers_else_arm_into_destination_first() {
        let mut env = TypeEnv::new();
        let cond = env.new_temp(IrType::I8);
        let if_false = env.new_temp(IrType::I64);
        let if_true = env.new_temp(IrType::I64);
        let out = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0x1000);
        block.stmts.push(Stmt::WrTmp {
            tmp: out,
            data: Expr::mux(Expr::temp(cond), Expr::temp(if_false), Expr::temp(if_true)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr1,%vr4",
                "testq $0x1,%vr0",
                "cmovnzq %vr2,%vr4",
                "movq %vr4,%vr3",
                "goto {Boring} $0x1000",
            ]
        );
    }

    #[test]
    fn test_double_mux_uses_vector_conditional_move() {
        let mut env = TypeEnv::new();
        let cond = env.new_temp(IrType::I8);
        let if_false = env.new_temp(IrType::F64);
        let if_true = env.new_temp(IrType::F64);
        let out = env.new_temp(IrType::F64);
        let mut block = boring_block(env, 0x1000);
        block.stmts.push(Stmt::WrTmp {
            tmp: out,
            data: Expr::mux(Expr::temp(cond), Expr::temp(if_false), Expr::temp(if_true)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movaps %vx1,%vx4",
                "testq $0x1,%vr0",
                "if (nz) movaps %vx2,%vx4",
                "movaps %vx4,%vx3",
                "goto {Boring} $0x1000",
            ]
        );
    }

    #[test]
    fn test_address_mode_patterns() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let t1 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0);
        // base + index*8 + disp
        block.stmts.push(Stmt::Store {
            addr: Expr::binop(
                Binop::Add(IntWidth::W64),
                Expr::binop(
                    Binop::Add(IntWidth::W64),
                    Expr::temp(t0),
                    Expr::binop(Binop::Shl(IntWidth::W64), Expr::temp(t1), Expr::const_u8(3)),
                ),
                Expr::const_u64(0x40),
            ),
            data: Expr::const_u64(7),
        });
        // base + disp
        block.stmts.push(Stmt::Store {
            addr: Expr::binop(Binop::Add(IntWidth::W64), Expr::temp(t0), Expr::const_u64(0x20)),
            data: Expr::const_u64(8),
        });
        // bare register
        block.stmts.push(Stmt::Store {
            addr: Expr::temp(t0),
            data: Expr::const_u64(9),
        });
        // base + index*4, no displacement
        block.stmts.push(Stmt::Store {
            addr: Expr::binop(
                Binop::Add(IntWidth::W64),
                Expr::temp(t0),
                Expr::binop(Binop::Shl(IntWidth::W64), Expr::temp(t1), Expr::const_u8(2)),
            ),
            data: Expr::const_u64(10),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq $0x7,64(%vr0,%vr1,8)",
                "movq $0x8,32(%vr0)",
                "movq $0x9,0(%vr0)",
                "movq $0xa,0(%vr0,%vr1,4)",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_divmod_packs_remainder_and_quotient() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let t1 = env.new_temp(IrType::I32);
        let t2 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: t2,
            data: Expr::binop(Binop::DivModS64To32, Expr::temp(t0), Expr::temp(t1)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr0,%rdx",
                "movq %vr0,%rax",
                "shrq $32,%rdx",
                "idivl %vr1",
                "movzlq %rdx,%rdx",
                "movzlq %rax,%rax",
                "shlq $32,%rdx",
                "movq %rax,%vr3",
                "orq %rdx,%vr3",
                "movq %vr3,%vr2",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_wide_multiply_through_fixed_registers() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let t1 = env.new_temp(IrType::I64);
        let t2 = env.new_temp(IrType::I128);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: t2,
            data: Expr::binop(Binop::MullU(IntWidth::W64), Expr::temp(t0), Expr::temp(t1)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr1,%rax",
                "mulq %vr0",
                "movq %rdx,%vr5",
                "movq %rax,%vr4",
                "movq %vr5,%vr3",
                "movq %vr4,%vr2",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_ordered_compare_supported_only_at_64_bits() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I32);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::Exit {
            guard: Expr::binop(
                Binop::CmpLtS(IntWidth::W32),
                Expr::temp(t0),
                Expr::const_u32(5),
            ),
            target: 0x2000,
            kind: JumpKind::Boring,
        });
        assert!(matches!(
            lower_err(&block),
            SelectError::UnsupportedWidth { width: 32, .. }
        ));

        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0x3000);
        block.stmts.push(Stmt::Exit {
            guard: Expr::binop(
                Binop::CmpLtS(IntWidth::W64),
                Expr::temp(t0),
                Expr::const_u64(5),
            ),
            target: 0x2000,
            kind: JumpKind::Boring,
        });
        assert_eq!(
            lower(&block),
            vec![
                "cmpq $0x5,%vr0",
                "if (l) goto {Boring} $0x2000",
                "goto {Boring} $0x3000",
            ]
        );
    }

    #[test]
    fn test_byte_equality_via_xor_and_mask() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I8);
        let mut block = boring_block(env, 0x4000);
        block.stmts.push(Stmt::Exit {
            guard: Expr::binop(
                Binop::CmpEq(IntWidth::W8),
                Expr::temp(t0),
                Expr::const_u8(0x7F),
            ),
            target: 0x3000,
            kind: JumpKind::Boring,
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr0,%vr1",
                "xorq $0x7f,%vr1",
                "andq $0xff,%vr1",
                "if (z) goto {Boring} $0x3000",
                "goto {Boring} $0x4000",
            ]
        );
    }

    #[test]
    fn test_negated_condition_flips_code_without_instructions() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0x4000);
        block.stmts.push(Stmt::Exit {
            guard: Expr::unop(
                Unop::Not1,
                Expr::binop(Binop::CmpEq(IntWidth::W64), Expr::temp(t0), Expr::const_u64(0)),
            ),
            target: 0x3000,
            kind: JumpKind::Boring,
        });

        assert_eq!(
            lower(&block),
            vec![
                "cmpq $0x0,%vr0",
                "if (nz) goto {Boring} $0x3000",
                "goto {Boring} $0x4000",
            ]
        );
    }

    #[test]
    fn test_unconditional_simple_call_marshals_directly() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::Dirty(DirtyCall {
            helper: Helper {
                name: "helper_fn",
                address: 0x1234,
            },
            guard: Expr::Const(Const::U1(true)),
            args: vec![Expr::temp(t0), Expr::get(16, IrType::I64)],
            dst: None,
            needs_state_ptr: true,
        }));

        assert_eq!(
            lower(&block),
            vec![
                "movq %rbp,%rdi",
                "movq %vr0,%rsi",
                "movq 16(%rbp),%rdx",
                "call 0x1234 (helper_fn, 3 args)",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_guarded_call_stages_arguments_before_the_guard() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let t1 = env.new_temp(IrType::I1);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::Dirty(DirtyCall {
            helper: Helper {
                name: "helper_fn",
                address: 0x1234,
            },
            guard: Expr::temp(t1),
            args: vec![Expr::temp(t0)],
            dst: None,
            needs_state_ptr: false,
        }));

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr1,%vr2",
                "andq $0x1,%vr2",
                "movq %vr0,%rdi",
                "if (nz) call 0x1234 (helper_fn, 1 args)",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_call_argument_budget_is_enforced() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::Dirty(DirtyCall {
            helper: Helper {
                name: "helper_fn",
                address: 0x1234,
            },
            guard: Expr::Const(Const::U1(true)),
            args: vec![Expr::temp(t0); 6],
            dst: None,
            needs_state_ptr: true,
        }));

        assert!(matches!(
            lower_err(&block),
            SelectError::TooManyCallArgs { count: 7, limit: 6 }
        ));
    }

    #[test]
    fn test_float_to_int_brackets_the_rounding_mode() {
        let mut env = TypeEnv::new();
        let src = env.new_temp(IrType::F64);
        let out = env.new_temp(IrType::I64);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: out,
            data: Expr::binop(Binop::F64ToI64S, Expr::const_u32(3), Expr::temp(src)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq $0x3,%vr3",
                "andq $0x3,%vr3",
                "shlq $13,%vr3",
                "orq $0x1f80,%vr3",
                "pushq %vr3",
                "ldmxcsr 0(%rsp)",
                "addq $0x8,%rsp",
                "cvtsd2siq %vx0,%vr2",
                "pushq $0x1f80",
                "ldmxcsr 0(%rsp)",
                "addq $0x8,%rsp",
                "movq %vr2,%vr1",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_vector_not_builds_all_ones_then_xors() {
        let mut env = TypeEnv::new();
        let v0 = env.new_temp(IrType::V128);
        let v1 = env.new_temp(IrType::V128);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: v1,
            data: Expr::unop(Unop::NotV128, Expr::temp(v0)),
        });

        assert_eq!(
            lower(&block),
            vec![
                "pxor %vx2,%vx2",
                "cmpeqps %vx2,%vx2",
                "pxor %vx0,%vx2",
                "movaps %vx2,%vx1",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_state_write_of_float_restores_default_rounding() {
        let mut env = TypeEnv::new();
        let f = env.new_temp(IrType::F32);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::Put {
            offset: 72,
            data: Expr::temp(f),
        });

        assert_eq!(
            lower(&block),
            vec![
                "pushq $0x1f80",
                "ldmxcsr 0(%rsp)",
                "addq $0x8,%rsp",
                "movss %vx0,72(%rbp)",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_session_counters_accumulate() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I32);
        let t1 = env.new_temp(IrType::I32);
        let mut block = boring_block(env, 0x1000);
        block.stmts.push(Stmt::WrTmp {
            tmp: t1,
            data: Expr::binop(
                Binop::Shr(IntWidth::W32),
                Expr::temp(t0),
                Expr::const_u8(2),
            ),
        });

        let arena = Bump::new();
        let session = TranslationSession::new(&arena);
        let lowered = select_block(&session, &block).unwrap();
        assert_eq!(lowered.insns().len(), 5);
        assert_eq!(lowered.vreg_count(), 3);

        let stats = session.stats();
        assert_eq!(stats.blocks_lowered, 1);
        assert_eq!(stats.statements_lowered, 1);
        assert_eq!(stats.instructions_emitted, 5);
        assert_eq!(stats.vregs_allocated, 3);
    }

    #[test]
    fn test_guest_array_index_is_wrapped_and_biased() {
        let mut env = TypeEnv::new();
        let ix = env.new_temp(IrType::I64);
        let out = env.new_temp(IrType::F64);
        let descr = GuestArray {
            base: 0x130,
            elem_ty: IrType::F64,
            count: 8,
        };
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: out,
            data: Expr::GetI {
                descr,
                index: Box::new(Expr::temp(ix)),
                bias: 2,
            },
        });

        assert_eq!(
            lower(&block),
            vec![
                "movq %vr0,%vr2",
                "addq $0x2,%vr2",
                "andq $0x7,%vr2",
                "movsd 304(%rbp,%vr2,8),%vx3",
                "movaps %vx3,%vx1",
                "goto {Boring} $0x0",
            ]
        );
    }

    #[test]
    fn test_i1_temp_write_uses_set_on_condition() {
        let mut env = TypeEnv::new();
        let t0 = env.new_temp(IrType::I64);
        let flag = env.new_temp(IrType::I1);
        let mut block = boring_block(env, 0);
        block.stmts.push(Stmt::WrTmp {
            tmp: flag,
            data: Expr::binop(Binop::CmpEq(IntWidth::W64), Expr::temp(t0), Expr::const_u64(1)),
        });

        assert_eq!(
            lower(&block),
            vec!["cmpq $0x1,%vr0", "setz %vr1", "goto {Boring} $0x0"]
        );
    }
}
