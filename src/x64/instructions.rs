// This module defines the abstract AMD64 instruction set that block lowering
// emits: virtual-register operands, the two addressing-mode shapes the
// selector synthesizes, the reg/mem/imm operand forms, condition codes, and
// the instruction variants themselves. Instructions stay abstract (no
// encoding); the downstream register allocator and encoder consume the list.
// Narrow operations exist only where lowering needs them (sized stores,
// zero-extending loads, 4-byte divides); everything else is 64-bit or SSE
// width. Display renders AT&T-style text used by trace logging and tests.

//! Abstract AMD64 instructions over virtual registers.

use crate::ir::JumpKind;
use std::fmt;

/// Register classes: 64-bit integer or 128-bit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Gp64,
    Vec128,
}

/// A register operand, virtual until allocation. Fixed machine registers
/// (RBP for guest state, RCX for shift counts, RDX:RAX for widening
/// arithmetic, the argument registers) appear as real registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub class: RegClass,
    pub index: u32,
    pub is_virtual: bool,
}

impl Reg {
    pub const fn real_gp(index: u32) -> Reg {
        Reg {
            class: RegClass::Gp64,
            index,
            is_virtual: false,
        }
    }

    pub const fn virt_gp(index: u32) -> Reg {
        Reg {
            class: RegClass::Gp64,
            index,
            is_virtual: true,
        }
    }

    pub const fn virt_vec(index: u32) -> Reg {
        Reg {
            class: RegClass::Vec128,
            index,
            is_virtual: true,
        }
    }

    pub fn is_virtual_gp(self) -> bool {
        self.is_virtual && self.class == RegClass::Gp64
    }
}

pub const RAX: Reg = Reg::real_gp(0);
pub const RCX: Reg = Reg::real_gp(1);
pub const RDX: Reg = Reg::real_gp(2);
pub const RSP: Reg = Reg::real_gp(4);
pub const RBP: Reg = Reg::real_gp(5);
pub const RSI: Reg = Reg::real_gp(6);
pub const RDI: Reg = Reg::real_gp(7);
pub const R8: Reg = Reg::real_gp(8);
pub const R9: Reg = Reg::real_gp(9);

const GP_NAMES: [&str; 16] = [
    "%rax", "%rcx", "%rdx", "%rbx", "%rsp", "%rbp", "%rsi", "%rdi", "%r8", "%r9", "%r10", "%r11",
    "%r12", "%r13", "%r14", "%r15",
];

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class, self.is_virtual) {
            (RegClass::Gp64, true) => write!(f, "%vr{}", self.index),
            (RegClass::Vec128, true) => write!(f, "%vx{}", self.index),
            (RegClass::Gp64, false) => match GP_NAMES.get(self.index as usize) {
                Some(name) => f.write_str(name),
                None => write!(f, "%r?{}", self.index),
            },
            (RegClass::Vec128, false) => write!(f, "%xmm{}", self.index),
        }
    }
}

/// True when `v`, interpreted as a bit pattern, survives a truncate to 32
/// bits followed by a sign extension back to 64.
pub fn fits_in_32bits(v: u64) -> bool {
    let chopped = ((v << 32) as i64) >> 32;
    chopped as u64 == v
}

/// Addressing modes: base+displacement, or base+index<<shift+displacement
/// with shift 0 to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AMode {
    BaseDisp { disp: i32, base: Reg },
    BaseIndexDisp {
        disp: i32,
        base: Reg,
        index: Reg,
        shift: u8,
    },
}

impl AMode {
    pub fn base_disp(disp: i32, base: Reg) -> AMode {
        AMode::BaseDisp { disp, base }
    }

    pub fn base_index_disp(disp: i32, base: Reg, index: Reg, shift: u8) -> AMode {
        AMode::BaseIndexDisp {
            disp,
            base,
            index,
            shift,
        }
    }

    /// Well-formedness: the base is a virtual integer register or the fixed
    /// guest-state pointer, the index (if any) a virtual integer register,
    /// and the shift in range.
    pub fn is_sane(&self) -> bool {
        let base_ok = |base: &Reg| base.is_virtual_gp() || *base == RBP;
        match self {
            AMode::BaseDisp { base, .. } => base_ok(base),
            AMode::BaseIndexDisp {
                base, index, shift, ..
            } => base_ok(base) && index.is_virtual_gp() && *shift <= 3,
        }
    }
}

impl fmt::Display for AMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AMode::BaseDisp { disp, base } => write!(f, "{disp}({base})"),
            AMode::BaseIndexDisp {
                disp,
                base,
                index,
                shift,
            } => write!(f, "{disp}({base},{index},{})", 1u32 << shift),
        }
    }
}

/// Operand that may be a register, memory, or 32-bit immediate
/// (sign-extended to 64 bits by the instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegMemImm {
    Imm(u32),
    Reg(Reg),
    Mem(AMode),
}

impl fmt::Display for RegMemImm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegMemImm::Imm(v) => write!(f, "$0x{v:x}"),
            RegMemImm::Reg(r) => write!(f, "{r}"),
            RegMemImm::Mem(am) => write!(f, "{am}"),
        }
    }
}

/// Operand that may be a register or 32-bit immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegImm {
    Imm(u32),
    Reg(Reg),
}

impl fmt::Display for RegImm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegImm::Imm(v) => write!(f, "$0x{v:x}"),
            RegImm::Reg(r) => write!(f, "{r}"),
        }
    }
}

/// Operand that may be a register or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegMem {
    Reg(Reg),
    Mem(AMode),
}

impl fmt::Display for RegMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegMem::Reg(r) => write!(f, "{r}"),
            RegMem::Mem(am) => write!(f, "{am}"),
        }
    }
}

/// AMD64 condition codes, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    O = 0,
    NO = 1,
    B = 2,
    NB = 3,
    Z = 4,
    NZ = 5,
    BE = 6,
    NBE = 7,
    S = 8,
    NS = 9,
    P = 10,
    NP = 11,
    L = 12,
    NL = 13,
    LE = 14,
    NLE = 15,
    Always = 16,
}

impl CondCode {
    /// The complementary condition. `Always` has no complement and is
    /// returned unchanged.
    pub fn invert(self) -> CondCode {
        match self {
            CondCode::O => CondCode::NO,
            CondCode::NO => CondCode::O,
            CondCode::B => CondCode::NB,
            CondCode::NB => CondCode::B,
            CondCode::Z => CondCode::NZ,
            CondCode::NZ => CondCode::Z,
            CondCode::BE => CondCode::NBE,
            CondCode::NBE => CondCode::BE,
            CondCode::S => CondCode::NS,
            CondCode::NS => CondCode::S,
            CondCode::P => CondCode::NP,
            CondCode::NP => CondCode::P,
            CondCode::L => CondCode::NL,
            CondCode::NL => CondCode::L,
            CondCode::LE => CondCode::NLE,
            CondCode::NLE => CondCode::LE,
            CondCode::Always => CondCode::Always,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            CondCode::O => "o",
            CondCode::NO => "no",
            CondCode::B => "b",
            CondCode::NB => "nb",
            CondCode::Z => "z",
            CondCode::NZ => "nz",
            CondCode::BE => "be",
            CondCode::NBE => "nbe",
            CondCode::S => "s",
            CondCode::NS => "ns",
            CondCode::P => "p",
            CondCode::NP => "np",
            CondCode::L => "l",
            CondCode::NL => "nl",
            CondCode::LE => "le",
            CondCode::NLE => "nle",
            CondCode::Always => "always",
        }
    }
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Two-operand 64-bit ALU operations for [`Insn::Alu64R`] / [`Insn::Alu64M`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Mov,
    Cmp,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Mul,
}

impl AluOp {
    fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Mov => "movq",
            AluOp::Cmp => "cmpq",
            AluOp::Add => "addq",
            AluOp::Sub => "subq",
            AluOp::And => "andq",
            AluOp::Or => "orq",
            AluOp::Xor => "xorq",
            AluOp::Mul => "imulq",
        }
    }
}

/// 64-bit shift operations. The amount is an immediate, or CL when zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

impl ShiftOp {
    fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Shl => "shlq",
            ShiftOp::Shr => "shrq",
            ShiftOp::Sar => "sarq",
        }
    }
}

/// SSE operations shared by the whole-register, 4-lane, and lane-0 forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseOp {
    Mov,
    And,
    Or,
    Xor,
    AndN,
    AddF,
    SubF,
    MulF,
    DivF,
    MinF,
    MaxF,
    CmpEqF,
    CmpLtF,
    CmpLeF,
    SqrtF,
}

impl SseOp {
    fn stem(self) -> &'static str {
        match self {
            SseOp::Mov => "mov",
            SseOp::And => "and",
            SseOp::Or => "or",
            SseOp::Xor => "xor",
            SseOp::AndN => "andn",
            SseOp::AddF => "add",
            SseOp::SubF => "sub",
            SseOp::MulF => "mul",
            SseOp::DivF => "div",
            SseOp::MinF => "min",
            SseOp::MaxF => "max",
            SseOp::CmpEqF => "cmpeq",
            SseOp::CmpLtF => "cmplt",
            SseOp::CmpLeF => "cmple",
            SseOp::SqrtF => "sqrt",
        }
    }

    fn rerg_mnemonic(self) -> &'static str {
        match self {
            SseOp::Mov => "movaps",
            SseOp::And => "pand",
            SseOp::Or => "por",
            SseOp::Xor => "pxor",
            SseOp::AndN => "pandn",
            _ => "p?",
        }
    }
}

/// One abstract AMD64 instruction.
///
/// For the two-operand forms the convention is AT&T order: the `src`
/// combines into `dst`. Narrow loads zero-extend; narrow stores write the
/// low bytes of the source register.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Load of a full 64-bit immediate.
    Imm64 { imm: u64, dst: Reg },
    /// dst := dst <op> src, 64-bit; Mov overwrites, Cmp only sets flags.
    Alu64R {
        op: AluOp,
        src: RegMemImm,
        dst: Reg,
    },
    /// mem := mem <op> src, 64-bit. Only Mov is generated.
    Alu64M {
        op: AluOp,
        src: RegImm,
        addr: AMode,
    },
    /// 64-bit shift by immediate, or by CL when `amount` is zero.
    Shift64 {
        op: ShiftOp,
        amount: u8,
        dst: Reg,
    },
    /// Flags := dst AND imm.
    Test64 { imm: u32, dst: RegMem },
    /// dst := !dst, bitwise.
    Not64 { dst: Reg },
    /// dst := zero-extended low 32 bits of src.
    MovZlq { src: Reg, dst: Reg },
    /// Zero-extending narrow load, size 1, 2 or 4 bytes.
    LoadZx { size: u8, addr: AMode, dst: Reg },
    /// Narrow store of the low `size` bytes, size 1, 2 or 4.
    Store { size: u8, src: Reg, addr: AMode },
    /// dst := cond ? 1 : 0, 64-bit.
    Set64 { cond: CondCode, dst: Reg },
    /// dst := src when cond holds.
    CMov64 {
        cond: CondCode,
        src: RegMem,
        dst: Reg,
    },
    /// dst := src when cond holds, vector registers.
    SseCMov { cond: CondCode, src: Reg, dst: Reg },
    /// RDX:RAX := RAX * src, signed or unsigned.
    MulL { signed: bool, src: RegMem },
    /// Divide RDX:RAX (8-byte) or EDX:EAX (4-byte) by src; quotient to
    /// RAX, remainder to RDX.
    Div {
        signed: bool,
        size: u8,
        src: RegMem,
    },
    Push { src: RegMemImm },
    /// Call to a helper at a fixed address, possibly conditional. Records
    /// how many argument registers are live at the call.
    Call {
        cond: CondCode,
        target: u64,
        name: &'static str,
        num_args: u32,
    },
    /// Transfer to the dispatcher: jump to the guest address in `dst` with
    /// the given kind, when cond holds.
    Goto {
        kind: JumpKind,
        cond: CondCode,
        dst: RegImm,
    },
    /// Bit scan forward (lowest set bit) or reverse (highest set bit).
    Bsfr64 {
        forwards: bool,
        src: Reg,
        dst: Reg,
    },
    MFence,
    /// Vector load or store of 4, 8, or 16 bytes.
    SseLdSt {
        is_load: bool,
        size: u8,
        reg: Reg,
        addr: AMode,
    },
    /// Load 4 or 8 bytes into lane 0, zeroing the rest of the register.
    SseLdzLo { size: u8, addr: AMode, dst: Reg },
    /// Whole-register SSE operation, dst := dst <op> src.
    SseReRg { op: SseOp, src: Reg, dst: Reg },
    /// Four-lane single-precision operation, dst := dst <op> src.
    Sse32Fx4 { op: SseOp, src: Reg, dst: Reg },
    /// Lane-0 single-precision operation, upper lanes of dst unchanged.
    Sse32FLo { op: SseOp, src: Reg, dst: Reg },
    /// Lane-0 double-precision operation, upper lane of dst unchanged.
    Sse64FLo { op: SseOp, src: Reg, dst: Reg },
    /// Integer to float conversion, cvtsi2sd with 4- or 8-byte source.
    SseSI2SF {
        src_size: u8,
        dst_size: u8,
        src: Reg,
        dst: Reg,
    },
    /// Float to integer conversion under the current rounding mode,
    /// cvtsd2si with 4- or 8-byte destination.
    SseSF2SI {
        src_size: u8,
        dst_size: u8,
        src: Reg,
        dst: Reg,
    },
    /// Scalar float width change: F64 to F32 when `narrow`, else F32 to F64.
    SseSDSS { narrow: bool, src: Reg, dst: Reg },
    /// Unordered scalar compare; materializes RFLAGS into dst.
    SseUComIs {
        size: u8,
        lhs: Reg,
        rhs: Reg,
        dst: Reg,
    },
    /// Load the SSE control word from memory.
    LdMxcsr { addr: AMode },
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Imm64 { imm, dst } => write!(f, "movabsq $0x{imm:x},{dst}"),
            Insn::Alu64R { op, src, dst } => {
                write!(f, "{} {src},{dst}", op.mnemonic())
            }
            Insn::Alu64M { op, src, addr } => {
                write!(f, "{} {src},{addr}", op.mnemonic())
            }
            Insn::Shift64 { op, amount, dst } => {
                if *amount == 0 {
                    write!(f, "{} %cl,{dst}", op.mnemonic())
                } else {
                    write!(f, "{} ${amount},{dst}", op.mnemonic())
                }
            }
            Insn::Test64 { imm, dst } => write!(f, "testq $0x{imm:x},{dst}"),
            Insn::Not64 { dst } => write!(f, "notq {dst}"),
            Insn::MovZlq { src, dst } => write!(f, "movzlq {src},{dst}"),
            Insn::LoadZx { size, addr, dst } => {
                let m = match size {
                    1 => "movzbq",
                    2 => "movzwq",
                    _ => "movzlq",
                };
                write!(f, "{m} {addr},{dst}")
            }
            Insn::Store { size, src, addr } => {
                let m = match size {
                    1 => "movb",
                    2 => "movw",
                    _ => "movl",
                };
                write!(f, "{m} {src},{addr}")
            }
            Insn::Set64 { cond, dst } => write!(f, "set{cond} {dst}"),
            Insn::CMov64 { cond, src, dst } => write!(f, "cmov{cond}q {src},{dst}"),
            Insn::SseCMov { cond, src, dst } => write!(f, "if ({cond}) movaps {src},{dst}"),
            Insn::MulL { signed, src } => {
                write!(f, "{} {src}", if *signed { "imulq" } else { "mulq" })
            }
            Insn::Div { signed, size, src } => {
                let m = match (signed, size) {
                    (true, 4) => "idivl",
                    (false, 4) => "divl",
                    (true, _) => "idivq",
                    (false, _) => "divq",
                };
                write!(f, "{m} {src}")
            }
            Insn::Push { src } => write!(f, "pushq {src}"),
            Insn::Call {
                cond,
                target,
                name,
                num_args,
            } => {
                if *cond == CondCode::Always {
                    write!(f, "call 0x{target:x} ({name}, {num_args} args)")
                } else {
                    write!(f, "if ({cond}) call 0x{target:x} ({name}, {num_args} args)")
                }
            }
            Insn::Goto { kind, cond, dst } => {
                if *cond == CondCode::Always {
                    write!(f, "goto {{{kind}}} {dst}")
                } else {
                    write!(f, "if ({cond}) goto {{{kind}}} {dst}")
                }
            }
            Insn::Bsfr64 { forwards, src, dst } => {
                write!(f, "{} {src},{dst}", if *forwards { "bsfq" } else { "bsrq" })
            }
            Insn::MFence => f.write_str("mfence"),
            Insn::SseLdSt {
                is_load,
                size,
                reg,
                addr,
            } => {
                let m = match size {
                    4 => "movss",
                    8 => "movsd",
                    _ => "movups",
                };
                if *is_load {
                    write!(f, "{m} {addr},{reg}")
                } else {
                    write!(f, "{m} {reg},{addr}")
                }
            }
            Insn::SseLdzLo { size, addr, dst } => {
                let m = if *size == 4 { "movss" } else { "movsd" };
                write!(f, "{m} {addr},{dst}")
            }
            Insn::SseReRg { op, src, dst } => {
                write!(f, "{} {src},{dst}", op.rerg_mnemonic())
            }
            Insn::Sse32Fx4 { op, src, dst } => write!(f, "{}ps {src},{dst}", op.stem()),
            Insn::Sse32FLo { op, src, dst } => write!(f, "{}ss {src},{dst}", op.stem()),
            Insn::Sse64FLo { op, src, dst } => write!(f, "{}sd {src},{dst}", op.stem()),
            Insn::SseSI2SF {
                src_size,
                dst_size,
                src,
                dst,
            } => {
                let m = match (src_size, dst_size) {
                    (4, _) => "cvtsi2sdl",
                    (_, _) => "cvtsi2sdq",
                };
                write!(f, "{m} {src},{dst}")
            }
            Insn::SseSF2SI {
                src_size: _,
                dst_size,
                src,
                dst,
            } => {
                let m = if *dst_size == 4 { "cvtsd2sil" } else { "cvtsd2siq" };
                write!(f, "{m} {src},{dst}")
            }
            Insn::SseSDSS { narrow, src, dst } => {
                let m = if *narrow { "cvtsd2ss" } else { "cvtss2sd" };
                write!(f, "{m} {src},{dst}")
            }
            Insn::SseUComIs {
                size,
                lhs,
                rhs,
                dst,
            } => {
                let m = if *size == 4 { "ucomiss" } else { "ucomisd" };
                write!(f, "{m} {rhs},{lhs} ; pushfq ; popq {dst}")
            }
            Insn::LdMxcsr { addr } => write!(f, "ldmxcsr {addr}"),
        }
    }
}

/// Helper for the common "copy one gp64 register" move.
pub fn mov_reg(src: Reg, dst: Reg) -> Insn {
    Insn::Alu64R {
        op: AluOp::Mov,
        src: RegMemImm::Reg(src),
        dst,
    }
}

/// Helper for the common "copy one vector register" move.
pub fn mov_vec(src: Reg, dst: Reg) -> Insn {
    Insn::SseReRg {
        op: SseOp::Mov,
        src,
        dst,
    }
}
