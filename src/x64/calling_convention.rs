// Helper-call marshaling policy for the System V AMD64 convention. Lowered
// blocks call into the runtime through clean helper functions: up to six
// integer arguments in RDI, RSI, RDX, RCX, R8, R9 and never on the stack,
// with the return value in RAX. The policy half lives here (argument
// register order, the marshaling plan decision, the argument-count gate);
// block lowering drives it and emits the actual moves.
//
// Two marshaling schemes exist. The direct scheme moves each argument
// straight into its final register, which is only legal when no argument's
// evaluation can itself write an argument register and the call is
// unconditional. The staged scheme evaluates every argument into a scratch
// virtual register first, then synthesizes the guard condition, then moves
// the scratch registers into place, so a guarded call that is skipped at
// run time never sees a half-written argument register.

//! System V argument marshaling: plan selection and register budget.

use crate::core::{SelectError, SelectResult};
use crate::ir::{Const, Expr};
use crate::x64::instructions::{Reg, R8, R9, RCX, RDI, RDX, RSI};

/// Integer argument registers in System V order.
pub const ARG_REGS: [Reg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

/// How a helper call's arguments reach the argument registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalPlan {
    /// Evaluate each argument directly into its argument register.
    Direct,
    /// Evaluate arguments into scratch registers, then the guard, then
    /// shuffle into the argument registers.
    Staged,
}

/// True when evaluating `expr` might generate code that writes fixed
/// machine registers. Reads of a temporary, a constant, or a guest-state
/// slot cannot; anything deeper is assumed to.
pub fn may_clobber_arg_regs(expr: &Expr) -> bool {
    !matches!(expr, Expr::Temp(_) | Expr::Const(_) | Expr::Get { .. })
}

/// True when the guard is statically known to pass, making the call
/// effectively unconditional.
pub fn guard_is_always_true(guard: &Expr) -> bool {
    matches!(guard, Expr::Const(Const::U1(true)))
}

/// Pick the marshaling scheme. Direct requires an unconditional call and
/// arguments whose evaluation stays clear of the argument registers.
pub fn choose_plan(guard: Option<&Expr>, args: &[Expr]) -> MarshalPlan {
    if let Some(g) = guard {
        if !guard_is_always_true(g) {
            return MarshalPlan::Staged;
        }
    }
    if args.iter().any(may_clobber_arg_regs) {
        return MarshalPlan::Staged;
    }
    MarshalPlan::Direct
}

/// Check the register budget: explicit arguments plus the implicit
/// guest-state pointer must fit in [`ARG_REGS`]. Returns the total count.
pub fn check_arg_count(n_args: usize, needs_state_ptr: bool) -> SelectResult<u32> {
    let total = n_args + usize::from(needs_state_ptr);
    if total > ARG_REGS.len() {
        return Err(SelectError::TooManyCallArgs {
            count: total,
            limit: ARG_REGS.len(),
        });
    }
    Ok(total as u32)
}
