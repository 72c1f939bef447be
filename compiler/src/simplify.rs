// simplify.rs — Value-preserving algebraic simplifier
//
// Bottom-up rewriting used to normalize path conditions and merged bounds.
// Only identities that hold for every environment are applied, so two
// conditions that simplify to the same tree are equal as predicates.
//
// Preconditions: none.
// Postconditions: result evaluates to the same value as the input wherever
//   the input evaluates without error.
// Failure modes: none (division by a literal zero is left unfolded).
// Side effects: none.

use crate::ir::{contains_call, BinOp, Expr};

pub fn simplify(e: &Expr) -> Expr {
    match e {
        Expr::IntImm(_) | Expr::BoolImm(_) | Expr::StringImm(_) | Expr::Var(_) => e.clone(),
        Expr::Binary { op, a, b } => simplify_binary(*op, simplify(a), simplify(b)),
        Expr::Not(a) => simplify_not(simplify(a)),
        Expr::Select {
            cond,
            true_value,
            false_value,
        } => {
            let cond = simplify(cond);
            let t = simplify(true_value);
            let f = simplify(false_value);
            match cond {
                Expr::BoolImm(true) => t,
                Expr::BoolImm(false) => f,
                cond if t == f && !contains_call(&cond) => t,
                cond => Expr::select(cond, t, f),
            }
        }
        Expr::Call(call) => {
            let mut call = call.clone();
            call.args = call.args.iter().map(simplify).collect();
            Expr::Call(call)
        }
    }
}

fn simplify_binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    if let (Expr::IntImm(x), Expr::IntImm(y)) = (&a, &b) {
        if let Some(folded) = fold_int(op, *x, *y) {
            return folded;
        }
    }
    match op {
        BinOp::And => match (&a, &b) {
            (Expr::BoolImm(false), _) | (_, Expr::BoolImm(false)) => Expr::BoolImm(false),
            (Expr::BoolImm(true), _) => b,
            (_, Expr::BoolImm(true)) => a,
            _ if a == b => a,
            _ => Expr::binary(op, a, b),
        },
        BinOp::Or => match (&a, &b) {
            (Expr::BoolImm(true), _) | (_, Expr::BoolImm(true)) => Expr::BoolImm(true),
            (Expr::BoolImm(false), _) => b,
            (_, Expr::BoolImm(false)) => a,
            _ if a == b => a,
            _ => Expr::binary(op, a, b),
        },
        BinOp::Eq | BinOp::Le | BinOp::Ge if a == b && !contains_call(&a) => Expr::BoolImm(true),
        BinOp::Ne | BinOp::Lt | BinOp::Gt if a == b && !contains_call(&a) => {
            Expr::BoolImm(false)
        }
        BinOp::Eq | BinOp::Ne => match (&a, &b) {
            (Expr::BoolImm(x), Expr::BoolImm(y)) => Expr::BoolImm((x == y) == (op == BinOp::Eq)),
            _ => Expr::binary(op, a, b),
        },
        BinOp::Add => match (&a, &b) {
            (Expr::IntImm(0), _) => b,
            (_, Expr::IntImm(0)) => a,
            _ => Expr::binary(op, a, b),
        },
        BinOp::Sub => match &b {
            Expr::IntImm(0) => a,
            _ => Expr::binary(op, a, b),
        },
        BinOp::Mul => match (&a, &b) {
            (Expr::IntImm(1), _) => b,
            (_, Expr::IntImm(1)) => a,
            (Expr::IntImm(0), other) | (other, Expr::IntImm(0)) if !contains_call(other) => {
                Expr::IntImm(0)
            }
            _ => Expr::binary(op, a, b),
        },
        BinOp::Div => match &b {
            Expr::IntImm(1) => a,
            _ => Expr::binary(op, a, b),
        },
        BinOp::Min | BinOp::Max if a == b => a,
        _ => Expr::binary(op, a, b),
    }
}

fn fold_int(op: BinOp, x: i64, y: i64) -> Option<Expr> {
    let v = match op {
        BinOp::Add => Expr::IntImm(x.checked_add(y)?),
        BinOp::Sub => Expr::IntImm(x.checked_sub(y)?),
        BinOp::Mul => Expr::IntImm(x.checked_mul(y)?),
        // Euclidean, matching the interpreter.
        BinOp::Div if y != 0 => Expr::IntImm(x.checked_div_euclid(y)?),
        BinOp::Mod if y != 0 => Expr::IntImm(x.checked_rem_euclid(y)?),
        BinOp::Div | BinOp::Mod => return None,
        BinOp::Min => Expr::IntImm(x.min(y)),
        BinOp::Max => Expr::IntImm(x.max(y)),
        BinOp::Eq => Expr::BoolImm(x == y),
        BinOp::Ne => Expr::BoolImm(x != y),
        BinOp::Lt => Expr::BoolImm(x < y),
        BinOp::Le => Expr::BoolImm(x <= y),
        BinOp::Gt => Expr::BoolImm(x > y),
        BinOp::Ge => Expr::BoolImm(x >= y),
        BinOp::And | BinOp::Or => return None,
    };
    Some(v)
}

fn simplify_not(a: Expr) -> Expr {
    match a {
        Expr::BoolImm(v) => Expr::BoolImm(!v),
        Expr::Not(inner) => *inner,
        Expr::Binary { op, a, b } if op.is_comparison() => {
            let negated = match op {
                BinOp::Eq => BinOp::Ne,
                BinOp::Ne => BinOp::Eq,
                BinOp::Lt => BinOp::Ge,
                BinOp::Le => BinOp::Gt,
                BinOp::Gt => BinOp::Le,
                _ => BinOp::Lt,
            };
            Expr::Binary { op: negated, a, b }
        }
        other => Expr::not(other),
    }
}
