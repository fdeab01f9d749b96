// This module defines the machine-independent IR that the AMD64 instruction
// selector consumes: a typed basic block of statements over numbered temps,
// with expression trees for computation and a terminator with a jump kind.
// The shape mirrors what the translation frontend hands over per guest basic
// block. Types cover 1/8/16/32/64/128-bit integers, 32/64-bit scalar floats
// and a 128-bit vector. Expression and statement variants carry exactly the
// payloads the selector dispatches on, so every lowering site is an
// exhaustive match. Temps are typed through a per-block TypeEnv; the type of
// any expression is recomputable from the tree plus the env, which the
// selector uses to pick operand widths. Display implementations print the
// compact textual form used in trace logging and error diagnostics.

//! Typed basic-block IR for guest code translation.
//!
//! A [`Block`] holds a [`TypeEnv`] for its temps, a statement list, and a
//! terminator (`next` target expression plus [`JumpKind`]). Expressions are
//! trees: reads of guest state ([`Expr::Get`], [`Expr::GetI`]), memory
//! ([`Expr::Load`]), temps and constants, operator applications, a
//! multiplexer, and calls to helper functions. Statements write guest
//! state, memory, or temps, call dirty helpers, fence, or exit the block
//! sideways.

use crate::core::SelectResult;
use std::fmt;

/// IR value types. Narrow integers live in the low bits of a wider host
/// register; F32/F64 live in the low lane of a vector register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    F32,
    F64,
    V128,
}

impl IrType {
    /// Size in memory in bytes.
    pub fn size_bytes(self) -> u32 {
        match self {
            IrType::I1 | IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 => 8,
            IrType::I128 | IrType::V128 => 16,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrType::I1 => "I1",
            IrType::I8 => "I8",
            IrType::I16 => "I16",
            IrType::I32 => "I32",
            IrType::I64 => "I64",
            IrType::I128 => "I128",
            IrType::F32 => "F32",
            IrType::F64 => "F64",
            IrType::V128 => "V128",
        };
        f.write_str(s)
    }
}

/// Index of a temp in its block's [`TypeEnv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Width selector for the integer operator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    pub fn int_type(self) -> IrType {
        match self {
            IntWidth::W8 => IrType::I8,
            IntWidth::W16 => IrType::I16,
            IntWidth::W32 => IrType::I32,
            IntWidth::W64 => IrType::I64,
        }
    }

    /// Type of a full-width product of two values of this width.
    pub fn doubled_type(self) -> IrType {
        match self {
            IntWidth::W8 => IrType::I16,
            IntWidth::W16 => IrType::I32,
            IntWidth::W32 => IrType::I64,
            IntWidth::W64 => IrType::I128,
        }
    }
}

/// Typed constants. `F64Bits` carries the IEEE-754 bit image; `V128` is a
/// 16-bit pattern where each bit expands to one all-zeros or all-ones byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Const {
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64Bits(u64),
    V128(u16),
}

impl Const {
    pub fn ty(self) -> IrType {
        match self {
            Const::U1(_) => IrType::I1,
            Const::U8(_) => IrType::I8,
            Const::U16(_) => IrType::I16,
            Const::U32(_) => IrType::I32,
            Const::U64(_) => IrType::I64,
            Const::F64Bits(_) => IrType::F64,
            Const::V128(_) => IrType::V128,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::U1(b) => write!(f, "{}:I1", u8::from(*b)),
            Const::U8(v) => write!(f, "0x{v:x}:I8"),
            Const::U16(v) => write!(f, "0x{v:x}:I16"),
            Const::U32(v) => write!(f, "0x{v:x}:I32"),
            Const::U64(v) => write!(f, "0x{v:x}:I64"),
            Const::F64Bits(v) => write!(f, "F64{{0x{v:016x}}}"),
            Const::V128(v) => write!(f, "V128{{0x{v:04x}}}"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unop {
    // Integer widening.
    ZeroExt8To16,
    ZeroExt8To32,
    ZeroExt16To32,
    ZeroExt32To64,
    SignExt8To16,
    SignExt8To32,
    SignExt16To32,
    SignExt32To64,
    // Integer narrowing. The low-part narrows are representation no-ops.
    Narrow16To8,
    Narrow32To8,
    Narrow32To16,
    Narrow64To32,
    Narrow32To1,
    Narrow64To1,
    High32To16,
    High64To32,
    // Bitwise and bit scans.
    Not1,
    Not8,
    Not16,
    Not32,
    Not64,
    Ctz64,
    Clz64,
    BoolTo8,
    // 128-bit pair and vector halves.
    Low64Of128,
    High64Of128,
    Low64OfV128,
    High64OfV128,
    // Scalar float.
    NegF64,
    AbsF64,
    F32ToF64,
    I32ToF64,
    ReinterpF64AsI64,
    ReinterpI64AsF64,
    // Vector.
    NotV128,
    ZeroExt32ToV128,
    ZeroExt64ToV128,
    Sqrt64F0x2,
}

impl Unop {
    pub fn name(self) -> &'static str {
        match self {
            Unop::ZeroExt8To16 => "ZeroExt8To16",
            Unop::ZeroExt8To32 => "ZeroExt8To32",
            Unop::ZeroExt16To32 => "ZeroExt16To32",
            Unop::ZeroExt32To64 => "ZeroExt32To64",
            Unop::SignExt8To16 => "SignExt8To16",
            Unop::SignExt8To32 => "SignExt8To32",
            Unop::SignExt16To32 => "SignExt16To32",
            Unop::SignExt32To64 => "SignExt32To64",
            Unop::Narrow16To8 => "Narrow16To8",
            Unop::Narrow32To8 => "Narrow32To8",
            Unop::Narrow32To16 => "Narrow32To16",
            Unop::Narrow64To32 => "Narrow64To32",
            Unop::Narrow32To1 => "Narrow32To1",
            Unop::Narrow64To1 => "Narrow64To1",
            Unop::High32To16 => "High32To16",
            Unop::High64To32 => "High64To32",
            Unop::Not1 => "Not1",
            Unop::Not8 => "Not8",
            Unop::Not16 => "Not16",
            Unop::Not32 => "Not32",
            Unop::Not64 => "Not64",
            Unop::Ctz64 => "Ctz64",
            Unop::Clz64 => "Clz64",
            Unop::BoolTo8 => "BoolTo8",
            Unop::Low64Of128 => "Low64Of128",
            Unop::High64Of128 => "High64Of128",
            Unop::Low64OfV128 => "Low64OfV128",
            Unop::High64OfV128 => "High64OfV128",
            Unop::NegF64 => "NegF64",
            Unop::AbsF64 => "AbsF64",
            Unop::F32ToF64 => "F32ToF64",
            Unop::I32ToF64 => "I32ToF64",
            Unop::ReinterpF64AsI64 => "ReinterpF64AsI64",
            Unop::ReinterpI64AsF64 => "ReinterpI64AsF64",
            Unop::NotV128 => "NotV128",
            Unop::ZeroExt32ToV128 => "ZeroExt32ToV128",
            Unop::ZeroExt64ToV128 => "ZeroExt64ToV128",
            Unop::Sqrt64F0x2 => "Sqrt64F0x2",
        }
    }

    pub fn result_type(self) -> IrType {
        match self {
            Unop::ZeroExt8To16 | Unop::SignExt8To16 => IrType::I16,
            Unop::ZeroExt8To32 | Unop::ZeroExt16To32 => IrType::I32,
            Unop::SignExt8To32 | Unop::SignExt16To32 => IrType::I32,
            Unop::ZeroExt32To64 | Unop::SignExt32To64 => IrType::I64,
            Unop::Narrow16To8 | Unop::Narrow32To8 => IrType::I8,
            Unop::Narrow32To16 | Unop::High32To16 => IrType::I16,
            Unop::Narrow64To32 | Unop::High64To32 => IrType::I32,
            Unop::Narrow32To1 | Unop::Narrow64To1 | Unop::Not1 => IrType::I1,
            Unop::Not8 | Unop::BoolTo8 => IrType::I8,
            Unop::Not16 => IrType::I16,
            Unop::Not32 => IrType::I32,
            Unop::Not64 | Unop::Ctz64 | Unop::Clz64 => IrType::I64,
            Unop::Low64Of128 | Unop::High64Of128 => IrType::I64,
            Unop::Low64OfV128 | Unop::High64OfV128 => IrType::I64,
            Unop::ReinterpF64AsI64 => IrType::I64,
            Unop::NegF64 | Unop::AbsF64 => IrType::F64,
            Unop::F32ToF64 | Unop::I32ToF64 | Unop::ReinterpI64AsF64 => IrType::F64,
            Unop::NotV128 | Unop::ZeroExt32ToV128 | Unop::ZeroExt64ToV128 => IrType::V128,
            Unop::Sqrt64F0x2 => IrType::V128,
        }
    }
}

/// Binary operators. Rounding-sensitive float conversions take the rounding
/// mode (an I32 expression, 0 = nearest, 1 = -inf, 2 = +inf, 3 = zero) as
/// their left operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binop {
    // Integer ALU.
    Add(IntWidth),
    Sub(IntWidth),
    And(IntWidth),
    Or(IntWidth),
    Xor(IntWidth),
    Mul(IntWidth),
    // Shifts. The amount operand is an I8.
    Shl(IntWidth),
    Shr(IntWidth),
    Sar(IntWidth),
    // Comparisons, producing I1.
    CmpEq(IntWidth),
    CmpNe(IntWidth),
    CmpLtS(IntWidth),
    CmpLtU(IntWidth),
    CmpLeS(IntWidth),
    CmpLeU(IntWidth),
    // Widening multiplies, producing the doubled width.
    MullS(IntWidth),
    MullU(IntWidth),
    // Combined divide/modulo. The 64/32 forms take an I64 dividend and I32
    // divisor and pack remainder:quotient into an I64; the 128/64 forms take
    // an I128 dividend and I64 divisor and produce an I128 pair.
    DivModS64To32,
    DivModU64To32,
    DivModS128To64,
    DivModU128To64,
    // Half concatenation, high:low.
    Join16HLTo32,
    Join32HLTo64,
    Join64HLTo128,
    // Scalar double arithmetic and compare.
    AddF64,
    SubF64,
    MulF64,
    DivF64,
    CmpF64,
    // Rounding-mode-taking conversions.
    F64ToI32S,
    F64ToI64S,
    I64ToF64,
    F64ToF32,
    // Vector bitwise.
    AndV128,
    OrV128,
    XorV128,
    // Vector lane-0 double arithmetic.
    Add64F0x2,
    Sub64F0x2,
    Mul64F0x2,
    Div64F0x2,
    Min64F0x2,
    Max64F0x2,
    CmpEq64F0x2,
    CmpLt64F0x2,
    CmpLe64F0x2,
    // Vector lane-0 single arithmetic.
    Add32F0x4,
    Sub32F0x4,
    Mul32F0x4,
    Div32F0x4,
    Min32F0x4,
    Max32F0x4,
    CmpEq32F0x4,
    CmpLt32F0x4,
    CmpLe32F0x4,
    // Vector construction.
    SetV128Lo64,
    Join64HLToV128,
}

impl Binop {
    pub fn name(self) -> &'static str {
        match self {
            Binop::Add(w) => ["Add8", "Add16", "Add32", "Add64"][w as usize],
            Binop::Sub(w) => ["Sub8", "Sub16", "Sub32", "Sub64"][w as usize],
            Binop::And(w) => ["And8", "And16", "And32", "And64"][w as usize],
            Binop::Or(w) => ["Or8", "Or16", "Or32", "Or64"][w as usize],
            Binop::Xor(w) => ["Xor8", "Xor16", "Xor32", "Xor64"][w as usize],
            Binop::Mul(w) => ["Mul8", "Mul16", "Mul32", "Mul64"][w as usize],
            Binop::Shl(w) => ["Shl8", "Shl16", "Shl32", "Shl64"][w as usize],
            Binop::Shr(w) => ["Shr8", "Shr16", "Shr32", "Shr64"][w as usize],
            Binop::Sar(w) => ["Sar8", "Sar16", "Sar32", "Sar64"][w as usize],
            Binop::CmpEq(w) => ["CmpEq8", "CmpEq16", "CmpEq32", "CmpEq64"][w as usize],
            Binop::CmpNe(w) => ["CmpNe8", "CmpNe16", "CmpNe32", "CmpNe64"][w as usize],
            Binop::CmpLtS(w) => ["CmpLtS8", "CmpLtS16", "CmpLtS32", "CmpLtS64"][w as usize],
            Binop::CmpLtU(w) => ["CmpLtU8", "CmpLtU16", "CmpLtU32", "CmpLtU64"][w as usize],
            Binop::CmpLeS(w) => ["CmpLeS8", "CmpLeS16", "CmpLeS32", "CmpLeS64"][w as usize],
            Binop::CmpLeU(w) => ["CmpLeU8", "CmpLeU16", "CmpLeU32", "CmpLeU64"][w as usize],
            Binop::MullS(w) => ["MullS8", "MullS16", "MullS32", "MullS64"][w as usize],
            Binop::MullU(w) => ["MullU8", "MullU16", "MullU32", "MullU64"][w as usize],
            Binop::DivModS64To32 => "DivModS64To32",
            Binop::DivModU64To32 => "DivModU64To32",
            Binop::DivModS128To64 => "DivModS128To64",
            Binop::DivModU128To64 => "DivModU128To64",
            Binop::Join16HLTo32 => "Join16HLTo32",
            Binop::Join32HLTo64 => "Join32HLTo64",
            Binop::Join64HLTo128 => "Join64HLTo128",
            Binop::AddF64 => "AddF64",
            Binop::SubF64 => "SubF64",
            Binop::MulF64 => "MulF64",
            Binop::DivF64 => "DivF64",
            Binop::CmpF64 => "CmpF64",
            Binop::F64ToI32S => "F64ToI32S",
            Binop::F64ToI64S => "F64ToI64S",
            Binop::I64ToF64 => "I64ToF64",
            Binop::F64ToF32 => "F64ToF32",
            Binop::AndV128 => "AndV128",
            Binop::OrV128 => "OrV128",
            Binop::XorV128 => "XorV128",
            Binop::Add64F0x2 => "Add64F0x2",
            Binop::Sub64F0x2 => "Sub64F0x2",
            Binop::Mul64F0x2 => "Mul64F0x2",
            Binop::Div64F0x2 => "Div64F0x2",
            Binop::Min64F0x2 => "Min64F0x2",
            Binop::Max64F0x2 => "Max64F0x2",
            Binop::CmpEq64F0x2 => "CmpEq64F0x2",
            Binop::CmpLt64F0x2 => "CmpLt64F0x2",
            Binop::CmpLe64F0x2 => "CmpLe64F0x2",
            Binop::Add32F0x4 => "Add32F0x4",
            Binop::Sub32F0x4 => "Sub32F0x4",
            Binop::Mul32F0x4 => "Mul32F0x4",
            Binop::Div32F0x4 => "Div32F0x4",
            Binop::Min32F0x4 => "Min32F0x4",
            Binop::Max32F0x4 => "Max32F0x4",
            Binop::CmpEq32F0x4 => "CmpEq32F0x4",
            Binop::CmpLt32F0x4 => "CmpLt32F0x4",
            Binop::CmpLe32F0x4 => "CmpLe32F0x4",
            Binop::SetV128Lo64 => "SetV128Lo64",
            Binop::Join64HLToV128 => "Join64HLToV128",
        }
    }

    pub fn result_type(self) -> IrType {
        match self {
            Binop::Add(w) | Binop::Sub(w) | Binop::And(w) => w.int_type(),
            Binop::Or(w) | Binop::Xor(w) | Binop::Mul(w) => w.int_type(),
            Binop::Shl(w) | Binop::Shr(w) | Binop::Sar(w) => w.int_type(),
            Binop::CmpEq(_) | Binop::CmpNe(_) => IrType::I1,
            Binop::CmpLtS(_) | Binop::CmpLtU(_) => IrType::I1,
            Binop::CmpLeS(_) | Binop::CmpLeU(_) => IrType::I1,
            Binop::MullS(w) | Binop::MullU(w) => w.doubled_type(),
            Binop::DivModS64To32 | Binop::DivModU64To32 => IrType::I64,
            Binop::DivModS128To64 | Binop::DivModU128To64 => IrType::I128,
            Binop::Join16HLTo32 => IrType::I32,
            Binop::Join32HLTo64 => IrType::I64,
            Binop::Join64HLTo128 => IrType::I128,
            Binop::AddF64 | Binop::SubF64 | Binop::MulF64 | Binop::DivF64 => IrType::F64,
            Binop::CmpF64 => IrType::I32,
            Binop::F64ToI32S => IrType::I32,
            Binop::F64ToI64S => IrType::I64,
            Binop::I64ToF64 => IrType::F64,
            Binop::F64ToF32 => IrType::F32,
            Binop::AndV128 | Binop::OrV128 | Binop::XorV128 => IrType::V128,
            Binop::Add64F0x2 | Binop::Sub64F0x2 => IrType::V128,
            Binop::Mul64F0x2 | Binop::Div64F0x2 => IrType::V128,
            Binop::Min64F0x2 | Binop::Max64F0x2 => IrType::V128,
            Binop::CmpEq64F0x2 | Binop::CmpLt64F0x2 | Binop::CmpLe64F0x2 => IrType::V128,
            Binop::Add32F0x4 | Binop::Sub32F0x4 => IrType::V128,
            Binop::Mul32F0x4 | Binop::Div32F0x4 => IrType::V128,
            Binop::Min32F0x4 | Binop::Max32F0x4 => IrType::V128,
            Binop::CmpEq32F0x4 | Binop::CmpLt32F0x4 | Binop::CmpLe32F0x4 => IrType::V128,
            Binop::SetV128Lo64 | Binop::Join64HLToV128 => IrType::V128,
        }
    }
}

/// A circular guest-state array: `count` elements of `elem_ty` starting at
/// byte offset `base`. Indexed accesses wrap modulo `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestArray {
    pub base: i32,
    pub elem_ty: IrType,
    pub count: u32,
}

impl fmt::Display for GuestArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}x{}", self.base, self.count, self.elem_ty)
    }
}

/// A helper function callable from translated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Helper {
    pub name: &'static str,
    pub address: u64,
}

/// Expression trees.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Read of guest state at a fixed byte offset.
    Get { offset: i32, ty: IrType },
    /// Read of a guest-state array element, index wrapped modulo the count.
    GetI {
        descr: GuestArray,
        index: Box<Expr>,
        bias: i32,
    },
    Temp(TempId),
    Const(Const),
    /// Little-endian load.
    Load { ty: IrType, addr: Box<Expr> },
    Unop { op: Unop, arg: Box<Expr> },
    Binop {
        op: Binop,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Multiplexer: bit 0 of the I8 `cond` selects `if_true`, else `if_false`.
    Mux {
        cond: Box<Expr>,
        if_false: Box<Expr>,
        if_true: Box<Expr>,
    },
    /// Call to a clean helper. The return type must be I64.
    Call {
        helper: Helper,
        ret_ty: IrType,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn get(offset: i32, ty: IrType) -> Expr {
        Expr::Get { offset, ty }
    }

    pub fn temp(t: TempId) -> Expr {
        Expr::Temp(t)
    }

    pub fn const_u8(v: u8) -> Expr {
        Expr::Const(Const::U8(v))
    }

    pub fn const_u32(v: u32) -> Expr {
        Expr::Const(Const::U32(v))
    }

    pub fn const_u64(v: u64) -> Expr {
        Expr::Const(Const::U64(v))
    }

    pub fn load(ty: IrType, addr: Expr) -> Expr {
        Expr::Load {
            ty,
            addr: Box::new(addr),
        }
    }

    pub fn unop(op: Unop, arg: Expr) -> Expr {
        Expr::Unop {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn binop(op: Binop, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binop {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn mux(cond: Expr, if_false: Expr, if_true: Expr) -> Expr {
        Expr::Mux {
            cond: Box::new(cond),
            if_false: Box::new(if_false),
            if_true: Box::new(if_true),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Get { offset, ty } => write!(f, "GET:{ty}({offset})"),
            Expr::GetI { descr, index, bias } => {
                write!(f, "GETI({descr})[{index}+{bias}]")
            }
            Expr::Temp(t) => write!(f, "{t}"),
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Load { ty, addr } => write!(f, "LDle:{ty}({addr})"),
            Expr::Unop { op, arg } => write!(f, "{}({arg})", op.name()),
            Expr::Binop { op, lhs, rhs } => write!(f, "{}({lhs},{rhs})", op.name()),
            Expr::Mux { cond, if_false, if_true } => {
                write!(f, "Mux({cond},{if_false},{if_true})")
            }
            Expr::Call { helper, ret_ty, args } => {
                write!(f, "{}{{0x{:x}}}(", helper.name, helper.address)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "):{ret_ty}")
            }
        }
    }
}

/// A call to a dirty helper, allowed to read and write guest state.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyCall {
    pub helper: Helper,
    /// I1 guard; the call happens only when it is true.
    pub guard: Expr,
    pub args: Vec<Expr>,
    /// I64 return destination, if the helper returns a value.
    pub dst: Option<TempId>,
    /// Pass the guest-state pointer as a hidden first argument.
    pub needs_state_ptr: bool,
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    NoOp,
    /// Marks the start of a guest instruction. No code is generated.
    IMark { addr: u64, len: u32 },
    /// Little-endian store.
    Store { addr: Expr, data: Expr },
    /// Write of guest state at a fixed byte offset.
    Put { offset: i32, data: Expr },
    /// Write of a guest-state array element, index wrapped modulo the count.
    PutI {
        descr: GuestArray,
        index: Expr,
        bias: i32,
        data: Expr,
    },
    WrTmp { tmp: TempId, data: Expr },
    Dirty(DirtyCall),
    MFence,
    /// Guarded side exit to a known guest address.
    Exit {
        guard: Expr,
        target: u64,
        kind: JumpKind,
    },
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::NoOp => f.write_str("NoOp"),
            Stmt::IMark { addr, len } => {
                write!(f, "------ IMark(0x{addr:x}, {len}) ------")
            }
            Stmt::Store { addr, data } => write!(f, "STle({addr}) = {data}"),
            Stmt::Put { offset, data } => write!(f, "PUT({offset}) = {data}"),
            Stmt::PutI { descr, index, bias, data } => {
                write!(f, "PUTI({descr})[{index}+{bias}] = {data}")
            }
            Stmt::WrTmp { tmp, data } => write!(f, "{tmp} = {data}"),
            Stmt::Dirty(d) => {
                if let Some(dst) = d.dst {
                    write!(f, "{dst} = ")?;
                }
                write!(f, "DIRTY {} ::: {}(", d.guard, d.helper.name)?;
                for (i, a) in d.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Stmt::MFence => f.write_str("MFence"),
            Stmt::Exit { guard, target, kind } => {
                write!(f, "if ({guard}) goto {{{kind}}} 0x{target:x}")
            }
        }
    }
}

/// How control leaves a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Ordinary fallthrough or jump.
    Boring,
    Call,
    Ret,
    /// Trap back to the instrumentation client.
    ClientReq,
    Syscall,
    Yield,
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JumpKind::Boring => "Boring",
            JumpKind::Call => "Call",
            JumpKind::Ret => "Ret",
            JumpKind::ClientReq => "ClientReq",
            JumpKind::Syscall => "Syscall",
            JumpKind::Yield => "Yield",
        };
        f.write_str(s)
    }
}

/// Per-block table of temp types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeEnv {
    types: Vec<IrType>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Allocate a new temp of the given type.
    pub fn new_temp(&mut self, ty: IrType) -> TempId {
        let id = TempId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    pub fn temp_count(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn type_of(&self, t: TempId) -> Option<IrType> {
        self.types.get(t.0 as usize).copied()
    }

    pub fn temps(&self) -> impl Iterator<Item = (TempId, IrType)> + '_ {
        self.types
            .iter()
            .enumerate()
            .map(|(i, &ty)| (TempId(i as u32), ty))
    }

    /// Type of an expression under this environment. Fails on a temp the
    /// environment does not know.
    pub fn type_of_expr(&self, e: &Expr) -> SelectResult<IrType> {
        use crate::core::SelectError;
        match e {
            Expr::Get { ty, .. } => Ok(*ty),
            Expr::GetI { descr, .. } => Ok(descr.elem_ty),
            Expr::Temp(t) => self
                .type_of(*t)
                .ok_or(SelectError::UnknownTemp { index: t.0 }),
            Expr::Const(c) => Ok(c.ty()),
            Expr::Load { ty, .. } => Ok(*ty),
            Expr::Unop { op, .. } => Ok(op.result_type()),
            Expr::Binop { op, .. } => Ok(op.result_type()),
            Expr::Mux { if_false, .. } => self.type_of_expr(if_false),
            Expr::Call { ret_ty, .. } => Ok(*ret_ty),
        }
    }
}

/// One translated basic block: typed temps, statements, and a terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub env: TypeEnv,
    pub stmts: Vec<Stmt>,
    /// Where control goes when the block falls off the end; an I64 expression.
    pub next: Expr,
    pub jump_kind: JumpKind,
}

impl Block {
    pub fn new(env: TypeEnv, next: Expr, jump_kind: JumpKind) -> Self {
        Self {
            env,
            stmts: Vec::new(),
            next,
            jump_kind,
        }
    }
}
