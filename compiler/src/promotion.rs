// promotion.rs — Channel promotion: hoist per-iteration channel traffic
//
// Decides, per channel, whether the per-element `write_channel` /
// `read_channel` calls inside a loop nest can be replaced by one bulk array
// transfer at a loop boundary, then rewrites the IR to do so. The per-element
// calls turn into `write_array`/`read_array` on a shadow `<channel>.array`.
//
// Preconditions: input IR uses `.channel`-suffixed names for channels.
// Postconditions: for every channel in the plan, both directions are promoted
//   (verified by `verify_promotion`, obligations P1-P3).
// Failure modes: one (channel, direction) hoisted at two different loops →
//   `ChannelError::ConflictingPromotionLoop`; a planned transfer whose loop is
//   missing at rewrite time → `ChannelError::UnplacedTransfer`. Unsafe or
//   unsupported accesses degrade to W01xx warnings.
// Side effects: `log::debug!` for every decision.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};

use crate::diag::{codes, log_diagnostic, DiagCode, Diagnostic};
use crate::error::ChannelError;
use crate::ir::{
    and_all, channel_base_name, conjuncts, contains_call, free_vars, is_channel_name,
    visit_stmt_exprs, visit_stmts, Call, CallKind, Expr, Intrinsic, Stmt, Type,
};
use crate::walk::{collect_channel_accesses, ChannelAccess};

/// Suffix of the shadow array that replaces a promoted channel's elements.
pub const ARRAY_SUFFIX: &str = ".array";

/// Suffix of the boolean "all elements written" flag of an unsafe write.
pub const FLAG_SUFFIX: &str = ".temp";

pub fn array_name(channel: &str) -> String {
    format!("{channel}{ARRAY_SUFFIX}")
}

pub fn flag_name(channel: &str) -> String {
    format!("{channel}{FLAG_SUFFIX}")
}

// ── Decision records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Write => "write",
            Direction::Read => "read",
        }
    }

    fn of(access: &ChannelAccess) -> Direction {
        if access.is_write {
            Direction::Write
        } else {
            Direction::Read
        }
    }
}

/// One promoted (channel, direction).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotedChannel {
    pub is_write: bool,
    /// False when the hoisted transfer must be guarded by the runtime flag.
    pub safe_promotion: bool,
    pub name: String,
    /// Producer function enclosing the access.
    pub func: Option<String>,
    /// Outermost loop hoisted over; the bulk transfer sits next to it.
    pub promotion_loop: String,
    pub args: Vec<Expr>,
    /// Residual, loop-invariant part of the path condition.
    pub guarding_cond: Expr,
}

impl PromotedChannel {
    pub fn direction(&self) -> Direction {
        if self.is_write {
            Direction::Write
        } else {
            Direction::Read
        }
    }
}

/// Immutable decision table consulted by the rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionPlan {
    records: BTreeMap<(String, Direction), PromotedChannel>,
}

impl PromotionPlan {
    pub fn get(&self, channel: &str, direction: Direction) -> Option<&PromotedChannel> {
        self.records.get(&(channel.to_string(), direction))
    }

    /// True if any direction of `channel` is promoted.
    pub fn is_promoted(&self, channel: &str) -> bool {
        self.get(channel, Direction::Write).is_some()
            || self.get(channel, Direction::Read).is_some()
    }

    pub fn records(&self) -> impl Iterator<Item = &PromotedChannel> {
        self.records.values()
    }

    /// Promoted channel names, each once.
    pub fn channels(&self) -> BTreeSet<&str> {
        self.records.keys().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose transfer attaches to loop `name` of function `func`.
    fn hoisted_at<'a>(
        &'a self,
        func: Option<&'a str>,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PromotedChannel> + 'a {
        self.records
            .values()
            .filter(move |r| r.promotion_loop == name && r.func.as_deref() == func)
    }
}

impl Serialize for PromotionPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records.values())
    }
}

#[derive(Debug, Clone)]
pub struct PromotionAnalysis {
    pub plan: PromotionPlan,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Safety check ────────────────────────────────────────────────────────────

/// Outcome of the safety check for a single access.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyVerdict {
    /// Outermost loop that can be hoisted over; `None` if none can.
    pub promotion_loop: Option<String>,
    pub safe_promotion: bool,
    /// False when the path condition selects part of the indexed array.
    pub covers_whole_array: bool,
    pub guarding_cond: Expr,
}

/// Variables an equality conjunct pins, or `None` if it is no such equality.
fn pinned_vars(conjunct: &Expr) -> Option<Vec<&str>> {
    let Expr::Binary {
        op: crate::ir::BinOp::Eq,
        a,
        b,
    } = conjunct
    else {
        return None;
    };
    match (a.as_ref(), b.as_ref()) {
        (Expr::Var(x), Expr::Var(y)) => Some(vec![x.as_str(), y.as_str()]),
        (Expr::Var(x), c) | (c, Expr::Var(x)) if c.is_const() => Some(vec![x.as_str()]),
        _ => None,
    }
}

/// Classify the path condition of `access` and find its promotion loop.
pub fn check_access(access: &ChannelAccess) -> SafetyVerdict {
    let index_vars: BTreeSet<&str> = access.args.iter().filter_map(Expr::as_var).collect();
    let arg_vars: BTreeSet<String> = access.args.iter().flat_map(free_vars).collect();

    let mut safe = true;
    let mut covers = true;
    let mut safe_loops: BTreeSet<String> = BTreeSet::new();
    let mut residual = Vec::new();

    for c in conjuncts(&access.path_condition) {
        match pinned_vars(&c) {
            Some(vars) => {
                let outside: Vec<&str> = vars
                    .into_iter()
                    .filter(|v| !index_vars.contains(v))
                    .collect();
                if outside.is_empty() {
                    safe = false;
                    covers = false;
                } else {
                    safe_loops.extend(outside.into_iter().map(str::to_string));
                }
            }
            None => {
                if !free_vars(&c).is_disjoint(&arg_vars) {
                    safe = false;
                    covers = false;
                } else if contains_call(&c) {
                    safe = false;
                } else {
                    residual.push(c);
                }
            }
        }
    }

    let mut promotion_loop = None;
    let mut hoisted: BTreeSet<&str> = BTreeSet::new();
    for l in access.loops.iter().rev() {
        if index_vars.contains(l.as_str()) || safe_loops.remove(l) {
            hoisted.insert(l);
            promotion_loop = Some(l.clone());
        } else {
            break;
        }
    }
    safe = safe && safe_loops.is_empty();
    if residual
        .iter()
        .any(|c| free_vars(c).iter().any(|v| hoisted.contains(v.as_str())))
    {
        safe = false;
    }

    SafetyVerdict {
        promotion_loop,
        safe_promotion: safe,
        covers_whole_array: covers,
        guarding_cond: and_all(residual),
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Decide which channels to promote. Never mutates `stmt`.
pub fn analyze_promotion(stmt: &Stmt) -> Result<PromotionAnalysis, ChannelError> {
    let summary = collect_channel_accesses(stmt);
    let mut builder = PlanBuilder::default();
    for access in &summary.accesses {
        builder.consider(access)?;
    }
    Ok(builder.finish())
}

#[derive(Default)]
struct PlanBuilder {
    records: BTreeMap<(String, Direction), PromotedChannel>,
    revoked: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl PlanBuilder {
    fn consider(&mut self, access: &ChannelAccess) -> Result<(), ChannelError> {
        let name = channel_base_name(&access.channel).to_string();
        if !is_channel_name(&name) || self.revoked.contains(&name) {
            return Ok(());
        }
        let direction = Direction::of(access);
        let verdict = check_access(access);
        log::debug!(
            "promotion: {} {} → loop {:?}, safe {}",
            direction.label(),
            name,
            verdict.promotion_loop,
            verdict.safe_promotion
        );

        if access.is_write && !verdict.covers_whole_array {
            self.revoke(
                &name,
                codes::W0102,
                "write is not promoted: its path condition restricts its own index",
                Some(format!("condition: {}", access.path_condition)),
            );
            return Ok(());
        }
        let Some(promotion_loop) = verdict.promotion_loop else {
            self.revoke(
                &name,
                codes::W0101,
                &format!(
                    "{} is not promoted: no enclosing loop can be hoisted over",
                    direction.label()
                ),
                None,
            );
            return Ok(());
        };
        if !access.is_write {
            if !self.records.contains_key(&(name.clone(), Direction::Write)) {
                self.revoke(
                    &name,
                    codes::W0103,
                    "read is not promoted: the channel has no promoted write before it",
                    None,
                );
                return Ok(());
            }
            if !verdict.safe_promotion {
                self.revoke(
                    &name,
                    codes::W0103,
                    "read is not promoted: its path condition is not loop-invariant",
                    Some(format!("condition: {}", access.path_condition)),
                );
                return Ok(());
            }
        }

        self.record(PromotedChannel {
            is_write: access.is_write,
            safe_promotion: verdict.safe_promotion,
            name,
            func: access.func.clone(),
            promotion_loop,
            args: access.args.clone(),
            guarding_cond: verdict.guarding_cond,
        })
    }

    fn record(&mut self, rec: PromotedChannel) -> Result<(), ChannelError> {
        let key = (rec.name.clone(), rec.direction());
        let Some(existing) = self.records.get_mut(&key) else {
            self.records.insert(key, rec);
            return Ok(());
        };
        if existing.func != rec.func || existing.promotion_loop != rec.promotion_loop {
            let direction = rec.direction().label();
            return Err(ChannelError::ConflictingPromotionLoop {
                channel: rec.name,
                direction,
                first: existing.promotion_loop.clone(),
                second: rec.promotion_loop,
            });
        }
        if rec.is_write && existing.guarding_cond != rec.guarding_cond {
            // One guard cannot cover writes made under different conditions;
            // the runtime flag decides whether the bulk write happens.
            log::debug!(
                "promotion: writes of {} differ in guard ({} vs {}), flagged",
                rec.name,
                existing.guarding_cond,
                rec.guarding_cond
            );
            existing.safe_promotion = false;
            return Ok(());
        }
        if !rec.is_write && existing.guarding_cond != rec.guarding_cond {
            let cause = format!("{} vs {}", existing.guarding_cond, rec.guarding_cond);
            self.revoke(
                &rec.name,
                codes::W0105,
                "reads are not promoted: they are guarded by different conditions",
                Some(cause),
            );
            return Ok(());
        }
        existing.safe_promotion &= rec.safe_promotion;
        Ok(())
    }

    fn revoke(&mut self, name: &str, code: DiagCode, message: &str, cause: Option<String>) {
        self.records.remove(&(name.to_string(), Direction::Write));
        self.records.remove(&(name.to_string(), Direction::Read));
        self.revoked.insert(name.to_string());
        let mut d = Diagnostic::warning(code, format!("channel '{name}': {message}"))
            .with_channel(name);
        if let Some(cause) = cause {
            d = d.with_cause(cause);
        }
        log_diagnostic(&d);
        self.diagnostics.push(d);
    }

    fn finish(mut self) -> PromotionAnalysis {
        let unpaired: Vec<String> = self
            .records
            .keys()
            .filter(|(name, dir)| {
                *dir == Direction::Write
                    && !self.records.contains_key(&(name.clone(), Direction::Read))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in unpaired {
            self.revoke(
                &name,
                codes::W0104,
                "write is not promoted: no read of the channel could be promoted",
                None,
            );
        }
        PromotionAnalysis {
            plan: PromotionPlan {
                records: self.records,
            },
            diagnostics: self.diagnostics,
        }
    }
}

// ── Rewrite ─────────────────────────────────────────────────────────────────

/// Rewrite `stmt` according to `plan`, producing a new tree.
pub fn promote_channels(stmt: &Stmt, plan: &PromotionPlan) -> Result<Stmt, ChannelError> {
    if plan.is_empty() {
        return Ok(stmt.clone());
    }
    let mut promotor = Promotor {
        plan,
        placed: BTreeSet::new(),
    };
    let out = promotor.mutate_stmt(stmt, None);
    if let Some(missing) = plan
        .records()
        .find(|r| !promotor.placed.contains(&(r.name.clone(), r.direction())))
    {
        return Err(ChannelError::UnplacedTransfer {
            channel: missing.name.clone(),
            loop_name: missing.promotion_loop.clone(),
        });
    }
    Ok(out)
}

struct Promotor<'a> {
    plan: &'a PromotionPlan,
    placed: BTreeSet<(String, Direction)>,
}

impl Promotor<'_> {
    fn mutate_stmt(&mut self, stmt: &Stmt, func: Option<&str>) -> Stmt {
        match stmt {
            Stmt::For {
                name,
                min,
                extent,
                kind,
                body,
            } => {
                let mut out = Stmt::For {
                    name: name.clone(),
                    min: self.mutate_expr(min),
                    extent: self.mutate_expr(extent),
                    kind: *kind,
                    body: Box::new(self.mutate_stmt(body, func)),
                };
                let hoisted: Vec<PromotedChannel> =
                    self.plan.hoisted_at(func, name).cloned().collect();
                for rec in hoisted {
                    out = if rec.is_write {
                        wrap_bulk_write(&rec, out)
                    } else {
                        wrap_bulk_read(&rec, out)
                    };
                    self.placed.insert((rec.name.clone(), rec.direction()));
                }
                out
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => Stmt::IfThenElse {
                cond: self.mutate_expr(cond),
                then_case: Box::new(self.mutate_stmt(then_case, func)),
                else_case: else_case
                    .as_ref()
                    .map(|e| Box::new(self.mutate_stmt(e, func))),
            },
            Stmt::Realize {
                name,
                types,
                bounds,
                body,
            } => {
                let name = if self.plan.is_promoted(name) {
                    array_name(name)
                } else {
                    name.clone()
                };
                Stmt::Realize {
                    name,
                    types: types.clone(),
                    bounds: bounds.clone(),
                    body: Box::new(self.mutate_stmt(body, func)),
                }
            }
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                let inner = if *is_producer && !is_channel_name(name) {
                    Some(name.as_str())
                } else {
                    func
                };
                Stmt::ProducerConsumer {
                    name: name.clone(),
                    is_producer: *is_producer,
                    body: Box::new(self.mutate_stmt(body, inner)),
                }
            }
            Stmt::Provide { name, values, args } => Stmt::Provide {
                name: name.clone(),
                values: values.iter().map(|v| self.mutate_expr(v)).collect(),
                args: args.iter().map(|a| self.mutate_expr(a)).collect(),
            },
            Stmt::Block(stmts) => {
                Stmt::block(stmts.iter().map(|s| self.mutate_stmt(s, func)).collect::<Vec<_>>())
            }
            Stmt::Evaluate(e) => {
                let e = self.mutate_expr(e);
                match self.flagged_write(&e) {
                    Some(channel) => Stmt::block([
                        Stmt::Evaluate(e),
                        Stmt::provide(flag_name(&channel), Expr::IntImm(1), vec![]),
                    ]),
                    None => Stmt::Evaluate(e),
                }
            }
        }
    }

    /// Channel of a per-element `write_array` whose promotion is unsafe.
    fn flagged_write(&self, e: &Expr) -> Option<String> {
        let call = e.as_call().filter(|c| c.is_intrinsic(Intrinsic::WriteArray))?;
        let channel = call.target_name()?.strip_suffix(ARRAY_SUFFIX)?;
        let rec = self.plan.get(channel, Direction::Write)?;
        (!rec.safe_promotion).then(|| rec.name.clone())
    }

    fn mutate_expr(&self, e: &Expr) -> Expr {
        match e {
            Expr::IntImm(_) | Expr::BoolImm(_) | Expr::StringImm(_) | Expr::Var(_) => e.clone(),
            Expr::Binary { op, a, b } => {
                Expr::binary(*op, self.mutate_expr(a), self.mutate_expr(b))
            }
            Expr::Not(a) => Expr::not(self.mutate_expr(a)),
            Expr::Select {
                cond,
                true_value,
                false_value,
            } => Expr::select(
                self.mutate_expr(cond),
                self.mutate_expr(true_value),
                self.mutate_expr(false_value),
            ),
            Expr::Call(call) => {
                let mut args: Vec<Expr> = call.args.iter().map(|a| self.mutate_expr(a)).collect();
                let direction = match call.intrinsic() {
                    Some(Intrinsic::WriteChannel) => Some(Direction::Write),
                    Some(Intrinsic::ReadChannel) => Some(Direction::Read),
                    _ => None,
                };
                let promoted = direction.zip(call.target_name()).and_then(|(dir, target)| {
                    self.plan.get(channel_base_name(target), dir)
                });
                match promoted {
                    Some(rec) => {
                        args[0] = Expr::string(array_name(&rec.name));
                        let which = if rec.is_write {
                            Intrinsic::WriteArray
                        } else {
                            Intrinsic::ReadArray
                        };
                        Expr::intrinsic(call.ty.clone(), which, args)
                    }
                    None => Expr::Call(Call {
                        args,
                        ..call.clone()
                    }),
                }
            }
        }
    }
}

fn flag_read(channel: &str) -> Expr {
    Expr::call(Type::Bool, flag_name(channel), vec![], CallKind::Halide)
}

/// `loop_stmt` followed by the bulk write of the whole shadow array.
fn wrap_bulk_write(rec: &PromotedChannel, loop_stmt: Stmt) -> Stmt {
    let bulk = Stmt::evaluate(Expr::intrinsic(
        Type::Handle,
        Intrinsic::WriteChannel,
        vec![
            Expr::string(&rec.name),
            Expr::intrinsic(
                Type::Handle,
                Intrinsic::ReadArray,
                vec![Expr::string(array_name(&rec.name))],
            ),
        ],
    ));
    if rec.safe_promotion {
        let bulk = if rec.guarding_cond.is_const_true() {
            bulk
        } else {
            Stmt::if_then(rec.guarding_cond.clone(), bulk)
        };
        return Stmt::block([loop_stmt, bulk]);
    }
    let flag = flag_name(&rec.name);
    let guarded = Stmt::if_then(Expr::eq(flag_read(&rec.name), Expr::IntImm(1)), bulk);
    Stmt::realize(
        flag.clone(),
        vec![Type::Bool],
        vec![],
        Stmt::block([Stmt::provide(flag, Expr::IntImm(0), vec![]), loop_stmt, guarded]),
    )
}

/// The bulk read of the whole channel into the shadow array, then `loop_stmt`.
fn wrap_bulk_read(rec: &PromotedChannel, loop_stmt: Stmt) -> Stmt {
    let bulk = Stmt::evaluate(Expr::intrinsic(
        Type::Handle,
        Intrinsic::WriteArray,
        vec![
            Expr::string(array_name(&rec.name)),
            Expr::intrinsic(
                Type::Handle,
                Intrinsic::ReadChannel,
                vec![Expr::string(&rec.name)],
            ),
        ],
    ));
    let bulk = if rec.guarding_cond.is_const_true() {
        bulk
    } else {
        Stmt::if_then(rec.guarding_cond.clone(), bulk)
    };
    Stmt::block([bulk, loop_stmt])
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the promotion postconditions (P1-P3).
#[derive(Debug, Clone)]
pub struct PromotionCert {
    /// P1: No per-element channel call of a promoted channel remains.
    pub p1_no_element_access: bool,
    /// P2: Every promoted channel has a bulk write and a bulk read.
    pub p2_symmetric: bool,
    /// P3: Every unsafe write has its flag realized.
    pub p3_flags_realized: bool,
}

impl crate::pass::StageCert for PromotionCert {
    fn all_pass(&self) -> bool {
        self.p1_no_element_access && self.p2_symmetric && self.p3_flags_realized
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_no_element_access", self.p1_no_element_access),
            ("P2_symmetric", self.p2_symmetric),
            ("P3_flags_realized", self.p3_flags_realized),
        ]
    }
}

fn is_bulk_write(call: &Call) -> bool {
    call.args.len() == 2
        && call.args[1]
            .as_call()
            .is_some_and(|c| c.is_intrinsic(Intrinsic::ReadArray))
}

/// Verify promotion postconditions on the rewritten tree.
pub fn verify_promotion(output: &Stmt, plan: &PromotionPlan) -> PromotionCert {
    let promoted = plan.channels();
    let mut element_access = false;
    let mut bulk_writes: BTreeSet<String> = BTreeSet::new();
    let mut bulk_reads: BTreeSet<String> = BTreeSet::new();

    visit_stmt_exprs(output, &mut |e| {
        let Some(call) = e.as_call() else { return };
        let Some(target) = call.target_name() else {
            return;
        };
        let channel = channel_base_name(target);
        if !promoted.contains(channel) {
            return;
        }
        match call.intrinsic() {
            Some(Intrinsic::WriteChannel) if is_bulk_write(call) => {
                bulk_writes.insert(channel.to_string());
            }
            Some(Intrinsic::ReadChannel) if call.args.len() == 1 => {
                bulk_reads.insert(channel.to_string());
            }
            Some(Intrinsic::WriteChannel | Intrinsic::ReadChannel) => element_access = true,
            _ => {}
        }
    });

    let p2 = promoted
        .iter()
        .all(|c| bulk_writes.contains(*c) && bulk_reads.contains(*c));

    let mut realized = BTreeSet::new();
    visit_stmts(output, &mut |s| {
        if let Stmt::Realize { name, .. } = s {
            realized.insert(name.clone());
        }
    });
    let p3 = plan
        .records()
        .filter(|r| r.is_write && !r.safe_promotion)
        .all(|r| realized.contains(&flag_name(&r.name)));

    PromotionCert {
        p1_no_element_access: !element_access,
        p2_symmetric: p2,
        p3_flags_realized: p3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, ForKind, Range};
    use crate::pass::StageCert;

    fn access(args: Vec<Expr>, cond: Expr, loops: &[&str]) -> ChannelAccess {
        ChannelAccess {
            is_write: true,
            channel: "a.channel".into(),
            func: Some("A".into()),
            ty: Type::int32(),
            path_condition: cond,
            args,
            loops: loops.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn write(ch: &str, value: Expr, idx: Vec<Expr>) -> Stmt {
        let mut args = vec![Expr::string(ch), value];
        args.extend(idx);
        Stmt::evaluate(Expr::intrinsic(Type::int32(), Intrinsic::WriteChannel, args))
    }

    fn read(ch: &str, idx: Vec<Expr>) -> Expr {
        let mut args = vec![Expr::string(ch)];
        args.extend(idx);
        Expr::intrinsic(Type::int32(), Intrinsic::ReadChannel, args)
    }

    /// produce A { for i { write(a, i, i) } } consume / produce B { for j { B(j) = read(a, j) } }
    fn simple_pair(write_cond: Option<Expr>) -> Stmt {
        let w = write("a.channel", Expr::var("i"), vec![Expr::var("i")]);
        let w = match write_cond {
            Some(c) => Stmt::if_then(c, w),
            None => w,
        };
        let producer = Stmt::produce("A", Stmt::for_loop("i", 0, 4, ForKind::Serial, w));
        let consumer = Stmt::produce(
            "B",
            Stmt::for_loop(
                "j",
                0,
                4,
                ForKind::Serial,
                Stmt::provide("B", read("a.channel", vec![Expr::var("j")]), vec![Expr::var("j")]),
            ),
        );
        Stmt::realize(
            "a.channel",
            vec![Type::int32()],
            vec![Range::new(0, 4)],
            Stmt::block([producer, consumer]),
        )
    }

    #[test]
    fn index_loop_is_hoisted() {
        let v = check_access(&access(vec![Expr::var("i")], Expr::BoolImm(true), &["k", "i"]));
        assert_eq!(v.promotion_loop.as_deref(), Some("i"));
        assert!(v.safe_promotion);
        assert!(v.covers_whole_array);
    }

    #[test]
    fn pinned_loop_is_hoisted_over() {
        let cond = Expr::eq(Expr::var("g"), Expr::var("i"));
        let v = check_access(&access(vec![Expr::var("i")], cond, &["g", "i"]));
        assert_eq!(v.promotion_loop.as_deref(), Some("g"));
        assert!(v.safe_promotion);
    }

    #[test]
    fn pinned_index_blocks_write() {
        let cond = Expr::eq(Expr::var("i"), Expr::IntImm(0));
        let v = check_access(&access(vec![Expr::var("i")], cond, &["i"]));
        assert!(!v.covers_whole_array);
        assert!(!v.safe_promotion);
    }

    #[test]
    fn residual_on_outer_loop_becomes_guard() {
        let cond = Expr::lt(Expr::var("k"), Expr::IntImm(2));
        let v = check_access(&access(vec![Expr::var("i")], cond.clone(), &["k", "i"]));
        assert_eq!(v.promotion_loop.as_deref(), Some("i"));
        assert!(v.safe_promotion);
        assert_eq!(v.guarding_cond, cond);
    }

    #[test]
    fn residual_on_hoisted_loop_is_unsafe() {
        let cond = Expr::and(
            Expr::eq(Expr::var("g"), Expr::var("i")),
            Expr::lt(Expr::var("g"), Expr::IntImm(2)),
        );
        let v = check_access(&access(vec![Expr::var("i")], cond, &["g", "i"]));
        assert_eq!(v.promotion_loop.as_deref(), Some("g"));
        assert!(!v.safe_promotion);
    }

    #[test]
    fn call_in_condition_is_unsafe() {
        let cond = Expr::binary(
            BinOp::Gt,
            Expr::call(Type::int32(), "f", vec![], CallKind::Halide),
            Expr::IntImm(0),
        );
        let v = check_access(&access(vec![Expr::var("i")], cond, &["i"]));
        assert!(!v.safe_promotion);
        assert!(v.covers_whole_array);
    }

    #[test]
    fn writes_with_different_guards_are_flagged() {
        let w = Stmt::IfThenElse {
            cond: Expr::lt(Expr::var("k"), Expr::IntImm(2)),
            then_case: Box::new(write("a.channel", Expr::IntImm(1), vec![Expr::var("i")])),
            else_case: Some(Box::new(write(
                "a.channel",
                Expr::IntImm(2),
                vec![Expr::var("i")],
            ))),
        };
        let nest = Stmt::for_loop(
            "k",
            0,
            4,
            ForKind::Serial,
            Stmt::for_loop("i", 0, 4, ForKind::Serial, w),
        );
        let consumer = Stmt::for_loop(
            "j",
            0,
            4,
            ForKind::Serial,
            Stmt::provide("B", read("a.channel", vec![Expr::var("j")]), vec![Expr::var("j")]),
        );
        let stmt = Stmt::realize(
            "a.channel",
            vec![Type::int32()],
            vec![Range::new(0, 4)],
            Stmt::block([Stmt::produce("A", nest), Stmt::produce("B", consumer)]),
        );
        let analysis = analyze_promotion(&stmt).unwrap();
        assert!(analysis.diagnostics.is_empty());
        let rec = analysis.plan.get("a.channel", Direction::Write).unwrap();
        assert_eq!(rec.promotion_loop, "i");
        assert!(!rec.safe_promotion);
    }

    #[test]
    fn unconstrained_pin_fails_conservatively() {
        // `q` is pinned but is no enclosing loop: the search never consumes it.
        let cond = Expr::eq(Expr::var("q"), Expr::IntImm(3));
        let v = check_access(&access(vec![Expr::var("i")], cond, &["i"]));
        assert_eq!(v.promotion_loop.as_deref(), Some("i"));
        assert!(!v.safe_promotion);
    }

    #[test]
    fn pair_is_promoted_and_rewritten() {
        let s = simple_pair(None);
        let analysis = analyze_promotion(&s).unwrap();
        assert!(analysis.diagnostics.is_empty());
        assert_eq!(analysis.plan.len(), 2);
        let w = analysis.plan.get("a.channel", Direction::Write).unwrap();
        assert_eq!(w.promotion_loop, "i");
        assert_eq!(w.func.as_deref(), Some("A"));

        let out = promote_channels(&s, &analysis.plan).unwrap();
        let text = out.to_string();
        assert!(text.contains("realize a.channel.array<int32>"));
        assert!(text.contains("write_array(\"a.channel.array\", i, i)"));
        assert!(text.contains(
            "write_channel<handle>(\"a.channel\", read_array<handle>(\"a.channel.array\"))"
        ));
        assert!(text.contains(
            "write_array<handle>(\"a.channel.array\", read_channel<handle>(\"a.channel\"))"
        ));
        assert!(verify_promotion(&out, &analysis.plan).all_pass());
    }

    #[test]
    fn partial_write_revokes_channel() {
        let s = simple_pair(Some(Expr::eq(Expr::var("i"), Expr::IntImm(0))));
        let analysis = analyze_promotion(&s).unwrap();
        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.diagnostics[0].code, Some(codes::W0102));
        assert_eq!(promote_channels(&s, &analysis.plan).unwrap(), s);
    }

    #[test]
    fn unsafe_write_gets_flag() {
        let cond = Expr::binary(
            BinOp::Gt,
            Expr::call(Type::int32(), "f", vec![], CallKind::Halide),
            Expr::IntImm(0),
        );
        let s = simple_pair(Some(cond));
        let analysis = analyze_promotion(&s).unwrap();
        let w = analysis.plan.get("a.channel", Direction::Write).unwrap();
        assert!(!w.safe_promotion);
        let out = promote_channels(&s, &analysis.plan).unwrap();
        let text = out.to_string();
        assert!(text.contains("realize a.channel.temp<bool>()"));
        assert!(text.contains("if (a.channel.temp<bool>() == 1)"));
        assert!(text.contains("a.channel.temp() = 1"));
        assert!(verify_promotion(&out, &analysis.plan).all_pass());
    }

    #[test]
    fn conflicting_loops_are_fatal() {
        let producer = Stmt::produce(
            "A",
            Stmt::block([
                Stmt::for_loop(
                    "i",
                    0,
                    4,
                    ForKind::Serial,
                    write("a.channel", Expr::IntImm(0), vec![Expr::var("i")]),
                ),
                Stmt::for_loop(
                    "j",
                    0,
                    4,
                    ForKind::Serial,
                    write("a.channel", Expr::IntImm(0), vec![Expr::var("j")]),
                ),
            ]),
        );
        let err = analyze_promotion(&producer).unwrap_err();
        assert!(matches!(err, ChannelError::ConflictingPromotionLoop { .. }));
    }

    #[test]
    fn unpaired_write_is_revoked() {
        let producer = Stmt::produce(
            "A",
            Stmt::for_loop(
                "i",
                0,
                4,
                ForKind::Serial,
                write("a.channel", Expr::IntImm(0), vec![Expr::var("i")]),
            ),
        );
        let analysis = analyze_promotion(&producer).unwrap();
        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.diagnostics[0].code, Some(codes::W0104));
    }
}
