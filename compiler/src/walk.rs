// walk.rs — Shared traversal substrate for the channel analyses
//
// Walks a statement tree once and records every `read_channel` /
// `write_channel` call site together with the three pieces of context both
// analyses need: the path condition, the enclosing loop names and the
// innermost producer function. The context travels down the recursion in a
// `Scope` value; nothing is kept in pass-wide mutable state.
//
// Preconditions: none.
// Postconditions: `accesses` are in traversal (lexical) order; every
//   channel `Realize` seen contributes its bounds to `channel_bounds`.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ir::{
    is_channel_name, is_device_loop, Expr, Intrinsic, Region, Stmt, Type,
};
use crate::simplify::simplify;

/// One syntactic channel call site and the context reaching it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAccess {
    pub is_write: bool,
    /// Channel name exactly as written in the call.
    pub channel: String,
    /// Innermost enclosing producer function, if any.
    pub func: Option<String>,
    pub ty: Type,
    pub path_condition: Expr,
    /// Index arguments (channel name and written value excluded).
    pub args: Vec<Expr>,
    /// Enclosing loops, outermost first.
    pub loops: Vec<String>,
}

/// Result of a gathering walk.
#[derive(Debug, Clone, Default)]
pub struct AccessSummary {
    pub accesses: Vec<ChannelAccess>,
    pub channel_bounds: BTreeMap<String, Region>,
}

impl AccessSummary {
    pub fn writes(&self) -> impl Iterator<Item = &ChannelAccess> {
        self.accesses.iter().filter(|a| a.is_write)
    }

    pub fn reads(&self) -> impl Iterator<Item = &ChannelAccess> {
        self.accesses.iter().filter(|a| !a.is_write)
    }
}

/// Context of the node currently being visited.
#[derive(Debug, Clone)]
pub struct Scope {
    pub path_condition: Expr,
    pub loops: Vec<String>,
    pub func: Option<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Scope {
            path_condition: Expr::BoolImm(true),
            loops: Vec::new(),
            func: None,
        }
    }
}

impl Scope {
    /// Scope of a branch guarded by `cond` (already polarized by the caller).
    pub fn assuming(&self, cond: &Expr) -> Scope {
        Scope {
            path_condition: simplify(&Expr::and(self.path_condition.clone(), cond.clone())),
            loops: self.loops.clone(),
            func: self.func.clone(),
        }
    }

    pub fn assuming_not(&self, cond: &Expr) -> Scope {
        self.assuming(&Expr::not(cond.clone()))
    }

    /// Scope of a loop body. Device-entry markers are not real iterations.
    pub fn in_loop(&self, name: &str) -> Scope {
        let mut loops = self.loops.clone();
        if !is_device_loop(name) {
            loops.push(name.to_string());
        }
        Scope {
            path_condition: self.path_condition.clone(),
            loops,
            func: self.func.clone(),
        }
    }

    /// Scope of a produce body. Channel produce markers keep the current function.
    pub fn in_producer(&self, name: &str) -> Scope {
        let func = if is_channel_name(name) {
            self.func.clone()
        } else {
            Some(name.to_string())
        };
        Scope {
            path_condition: self.path_condition.clone(),
            loops: self.loops.clone(),
            func,
        }
    }
}

/// Gather all channel accesses and channel bounds of `stmt`.
pub fn collect_channel_accesses(stmt: &Stmt) -> AccessSummary {
    let mut summary = AccessSummary::default();
    gather_stmt(stmt, &Scope::default(), &mut summary);
    summary
}

fn gather_stmt(stmt: &Stmt, scope: &Scope, out: &mut AccessSummary) {
    match stmt {
        Stmt::For {
            name,
            min,
            extent,
            body,
            ..
        } => {
            gather_expr(min, scope, out);
            gather_expr(extent, scope, out);
            gather_stmt(body, &scope.in_loop(name), out);
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            gather_expr(cond, scope, out);
            gather_stmt(then_case, &scope.assuming(cond), out);
            if let Some(else_case) = else_case {
                gather_stmt(else_case, &scope.assuming_not(cond), out);
            }
        }
        Stmt::Realize {
            name, bounds, body, ..
        } => {
            if is_channel_name(name) {
                out.channel_bounds.insert(name.clone(), bounds.clone());
            }
            for r in bounds {
                gather_expr(&r.min, scope, out);
                gather_expr(&r.extent, scope, out);
            }
            gather_stmt(body, scope, out);
        }
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            if *is_producer {
                gather_stmt(body, &scope.in_producer(name), out);
            } else {
                gather_stmt(body, scope, out);
            }
        }
        Stmt::Provide { values, args, .. } => {
            for e in values.iter().chain(args) {
                gather_expr(e, scope, out);
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                gather_stmt(s, scope, out);
            }
        }
        Stmt::Evaluate(e) => gather_expr(e, scope, out),
    }
}

fn gather_expr(expr: &Expr, scope: &Scope, out: &mut AccessSummary) {
    match expr {
        Expr::IntImm(_) | Expr::BoolImm(_) | Expr::StringImm(_) | Expr::Var(_) => {}
        Expr::Binary { a, b, .. } => {
            gather_expr(a, scope, out);
            gather_expr(b, scope, out);
        }
        Expr::Not(a) => gather_expr(a, scope, out),
        Expr::Select {
            cond,
            true_value,
            false_value,
        } => {
            gather_expr(cond, scope, out);
            gather_expr(true_value, &scope.assuming(cond), out);
            gather_expr(false_value, &scope.assuming_not(cond), out);
        }
        Expr::Call(call) => {
            let is_write = call.is_intrinsic(Intrinsic::WriteChannel);
            if is_write || call.is_intrinsic(Intrinsic::ReadChannel) {
                if let Some(channel) = call.target_name() {
                    let skip = if is_write { 2 } else { 1 };
                    out.accesses.push(ChannelAccess {
                        is_write,
                        channel: channel.to_string(),
                        func: scope.func.clone(),
                        ty: call.ty.clone(),
                        path_condition: scope.path_condition.clone(),
                        args: call.args.iter().skip(skip).cloned().collect(),
                        loops: scope.loops.clone(),
                    });
                }
            }
            for arg in &call.args {
                gather_expr(arg, scope, out);
            }
        }
    }
}
