//! End-to-end block lowering tests.
//!
//! Each test builds a small typed IR block the way a guest frontend would,
//! lowers it through a translation session, and checks the shape of the
//! emitted instruction list: marshaling order around helper calls, the
//! rounding-mode bracket around float conversions, conditional-move
//! polarity for multiplexers, and the terminating dispatcher jump.

use bumpalo::Bump;
use guestgen::core::{SelectError, TranslationSession};
use guestgen::ir::{
    Binop, Block, Const, DirtyCall, Expr, GuestArray, Helper, IntWidth, IrType, JumpKind, Stmt,
    TypeEnv, Unop,
};
use guestgen::x64::instructions::{
    AluOp, CondCode, Insn, Reg, RegImm, RegMemImm, RAX, RDI, RDX, RSI,
};
use guestgen::x64::{select_block, ARG_REGS};

const HELPER: Helper = Helper {
    name: "helper_probe",
    address: 0x4000_1000,
};

/// A block that falls through to guest address 0x1000.
fn boring_block(env: TypeEnv) -> Block {
    Block::new(env, Expr::const_u64(0x1000), JumpKind::Boring)
}

fn find(insns: &[Insn], pred: impl Fn(&Insn) -> bool) -> usize {
    insns
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("expected instruction not found"))
}

fn is_mov_into(insn: &Insn, target: Reg) -> bool {
    matches!(
        insn,
        Insn::Alu64R {
            op: AluOp::Mov,
            dst,
            ..
        } if *dst == target
    )
}

#[test]
fn test_arithmetic_block_ends_with_dispatcher_jump() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let t1 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    block.stmts.push(Stmt::IMark {
        addr: 0x1000,
        len: 4,
    });
    block.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::get(16, IrType::I64),
    });
    block.stmts.push(Stmt::WrTmp {
        tmp: t1,
        data: Expr::binop(
            Binop::Add(IntWidth::W64),
            Expr::temp(t0),
            Expr::const_u64(8),
        ),
    });
    block.stmts.push(Stmt::Put {
        offset: 16,
        data: Expr::temp(t1),
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();

    assert!(!lowered.insns().is_empty());
    assert!(lowered.vreg_count() > 0);
    match lowered.insns().last().unwrap() {
        Insn::Goto { kind, cond, dst } => {
            assert_eq!(*kind, JumpKind::Boring);
            assert_eq!(*cond, CondCode::Always);
            assert_eq!(*dst, RegImm::Imm(0x1000));
        }
        other => panic!("expected a final goto, found {other:?}"),
    }
}

#[test]
fn test_guarded_side_exit_emits_a_conditional_goto() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    block.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::get(0, IrType::I64),
    });
    block.stmts.push(Stmt::Exit {
        guard: Expr::binop(
            Binop::CmpEq(IntWidth::W64),
            Expr::temp(t0),
            Expr::const_u64(0),
        ),
        target: 0x2000,
        kind: JumpKind::Boring,
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();

    let gotos: Vec<&Insn> = lowered
        .insns()
        .iter()
        .filter(|i| matches!(i, Insn::Goto { .. }))
        .collect();
    assert_eq!(gotos.len(), 2);
    match gotos[0] {
        Insn::Goto { cond, dst, .. } => {
            assert_eq!(*cond, CondCode::Z);
            assert_eq!(*dst, RegImm::Imm(0x2000));
        }
        _ => unreachable!(),
    }
    match gotos[1] {
        Insn::Goto { cond, .. } => assert_eq!(*cond, CondCode::Always),
        _ => unreachable!(),
    }
}

#[test]
fn test_unconditional_call_with_simple_args_marshals_directly() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let t1 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    block.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::get(8, IrType::I64),
    });
    block.stmts.push(Stmt::WrTmp {
        tmp: t1,
        data: Expr::Call {
            helper: HELPER,
            ret_ty: IrType::I64,
            args: vec![
                Expr::temp(t0),
                Expr::const_u64(7),
                Expr::get(24, IrType::I64),
            ],
        },
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();
    let insns = lowered.insns();

    let call_at = find(insns, |i| matches!(i, Insn::Call { .. }));
    match &insns[call_at] {
        Insn::Call {
            cond,
            target,
            name,
            num_args,
        } => {
            assert_eq!(*cond, CondCode::Always);
            assert_eq!(*target, HELPER.address);
            assert_eq!(*name, "helper_probe");
            assert_eq!(*num_args, 3);
        }
        _ => unreachable!(),
    }
    // Direct marshaling: the three argument moves land in System V order
    // immediately before the call.
    assert!(is_mov_into(&insns[call_at - 3], RDI));
    assert!(is_mov_into(&insns[call_at - 2], RSI));
    assert!(is_mov_into(&insns[call_at - 1], RDX));
    // The return value comes back in RAX.
    match &insns[call_at + 1] {
        Insn::Alu64R {
            op: AluOp::Mov,
            src: RegMemImm::Reg(src),
            ..
        } => assert_eq!(*src, RAX),
        other => panic!("expected the return-value move, found {other:?}"),
    }
}

#[test]
fn test_guarded_dirty_call_stages_arguments_before_the_guard() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    block.stmts.push(Stmt::Dirty(DirtyCall {
        helper: HELPER,
        guard: Expr::binop(
            Binop::CmpEq(IntWidth::W64),
            Expr::get(0, IrType::I64),
            Expr::const_u64(1),
        ),
        args: vec![Expr::get(8, IrType::I64)],
        dst: Some(t0),
        needs_state_ptr: true,
    }));

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();
    let insns = lowered.insns();

    let call_at = find(insns, |i| matches!(i, Insn::Call { .. }));
    match &insns[call_at] {
        Insn::Call { cond, num_args, .. } => {
            // One explicit argument plus the hidden state pointer, and the
            // call itself is conditional on the guard.
            assert_eq!(*cond, CondCode::Z);
            assert_eq!(*num_args, 2);
        }
        _ => unreachable!(),
    }
    // Staged marshaling: the final shuffle into the argument registers
    // sits directly before the call, after the guard compare.
    assert!(is_mov_into(&insns[call_at - 2], ARG_REGS[0]));
    assert!(is_mov_into(&insns[call_at - 1], ARG_REGS[1]));
    match &insns[call_at - 1] {
        Insn::Alu64R {
            src: RegMemImm::Reg(src),
            ..
        } => assert!(src.is_virtual),
        other => panic!("expected a staged register move, found {other:?}"),
    }
}

#[test]
fn test_float_to_int_conversion_brackets_the_rounding_mode() {
    let _ = env_logger::builder().is_test(true).try_init();

    let env = TypeEnv::new();
    let mut block = boring_block(env);
    block.stmts.push(Stmt::Put {
        offset: 32,
        data: Expr::binop(
            Binop::F64ToI64S,
            Expr::const_u32(0),
            Expr::get(64, IrType::F64),
        ),
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();
    let insns = lowered.insns();

    let convert_at = find(insns, |i| matches!(i, Insn::SseSF2SI { .. }));
    let mxcsr_loads: Vec<usize> = insns
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i, Insn::LdMxcsr { .. }))
        .map(|(at, _)| at)
        .collect();
    // One load sets the guest rounding mode before the conversion, one
    // restores the default after it.
    assert_eq!(mxcsr_loads.len(), 2);
    assert!(mxcsr_loads[0] < convert_at);
    assert!(mxcsr_loads[1] > convert_at);
}

#[test]
fn test_integer_mux_settles_else_arm_then_conditionally_moves() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    block.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::mux(
            Expr::unop(
                Unop::BoolTo8,
                Expr::binop(
                    Binop::CmpEq(IntWidth::W64),
                    Expr::get(0, IrType::I64),
                    Expr::const_u64(0),
                ),
            ),
            Expr::const_u64(42),
            Expr::get(8, IrType::I64),
        ),
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();
    let insns = lowered.insns();

    let test_at = find(insns, |i| matches!(i, Insn::Test64 { imm: 1, .. }));
    match &insns[test_at + 1] {
        Insn::CMov64 { cond, .. } => assert_eq!(*cond, CondCode::NZ),
        other => panic!("expected a conditional move after the bit test, found {other:?}"),
    }
}

#[test]
fn test_double_mux_uses_a_vector_conditional_move() {
    let _ = env_logger::builder().is_test(true).try_init();

    let env = TypeEnv::new();
    let mut block = boring_block(env);
    block.stmts.push(Stmt::Put {
        offset: 128,
        data: Expr::mux(
            Expr::get(144, IrType::I8),
            Expr::Const(Const::F64Bits(0x3FF0_0000_0000_0000)),
            Expr::Const(Const::F64Bits(0x4000_0000_0000_0000)),
        ),
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let lowered = select_block(&session, &block).unwrap();
    let insns = lowered.insns();

    let test_at = find(insns, |i| matches!(i, Insn::Test64 { imm: 1, .. }));
    match &insns[test_at + 1] {
        Insn::SseCMov { cond, .. } => assert_eq!(*cond, CondCode::NZ),
        other => panic!("expected a vector conditional move, found {other:?}"),
    }
}

#[test]
fn test_session_stats_accumulate_across_blocks() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let mut first = boring_block(env);
    first.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::get(0, IrType::I64),
    });
    first.stmts.push(Stmt::Put {
        offset: 8,
        data: Expr::temp(t0),
    });

    let second = boring_block(TypeEnv::new());

    let a = select_block(&session, &first).unwrap();
    let b = select_block(&session, &second).unwrap();

    let stats = session.stats();
    assert_eq!(stats.blocks_lowered, 2);
    assert_eq!(stats.statements_lowered, 2);
    assert_eq!(stats.instructions_emitted, a.insns().len() + b.insns().len());
    assert_eq!(
        stats.vregs_allocated,
        (a.vreg_count() + b.vreg_count()) as usize
    );
}

#[test]
fn test_unhandled_expression_shape_abandons_the_block() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut env = TypeEnv::new();
    let t0 = env.new_temp(IrType::I64);
    let mut block = boring_block(env);
    // Only 8-element guest-state arrays have a lowering rule.
    block.stmts.push(Stmt::WrTmp {
        tmp: t0,
        data: Expr::GetI {
            descr: GuestArray {
                base: 0,
                elem_ty: IrType::I64,
                count: 4,
            },
            index: Box::new(Expr::const_u64(0)),
            bias: 0,
        },
    });

    let arena = Bump::new();
    let session = TranslationSession::new(&arena);
    let err = select_block(&session, &block).unwrap_err();
    assert!(matches!(
        err,
        SelectError::CannotReduce {
            kind: "guest-state array",
            ..
        }
    ));
    assert_eq!(session.stats().blocks_lowered, 0);
}
