// combine.rs — Channel combination: fuse channels that always travel together
//
// Two or more element-wise channels written by one producer under the same
// condition and indices, and read by one consumer under the same condition,
// indices and innermost loop, become a single struct-typed channel. Writes
// store into per-field one-element temporaries; the last field's write packs
// them with `make_struct`. The consumer reads the combined channel once into
// a temporary and extracts fields with `read_field`.
//
// Preconditions: every channel is written and read at one site each (others
//   are left alone with a W0208 warning).
// Postconditions: no member channel name survives in the output (C1); each
//   combined channel is realized once with its struct type (C2).
// Failure modes: member write absent from its group → MissingGroupMember;
//   member write nested in an expression → UnplacedWrite; struct limit
//   exhausted → TooManyStructs. Matching failures degrade to W02xx warnings.
// Side effects: allocates names in the given `NameAllocator`; registers
//   struct types in the given `StructRegistry`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::diag::{codes, log_diagnostic, DiagCode, Diagnostic};
use crate::error::ChannelError;
use crate::id::NameAllocator;
use crate::ir::{
    loop_base_name, visit_stmt_exprs, visit_stmts, BinOp, Call, CallKind, Expr, Intrinsic, Range,
    Region, Stmt, Type, CHANNEL_SUFFIX,
};
use crate::simplify::simplify;
use crate::struct_type::StructRegistry;
use crate::walk::{collect_channel_accesses, AccessSummary, ChannelAccess};

/// Suffix of the per-field and per-read one-element temporaries.
const TEMP_SUFFIX: &str = ".temp";

// ── Decision records ────────────────────────────────────────────────────────

/// One group of channels fused into `combined_channel`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedChannel {
    pub combined_channel: String,
    /// Member writes in field order (at least two).
    pub original_channel_writes: Vec<ChannelAccess>,
    pub producer: String,
    pub consumer: String,
    pub read_condition: Expr,
    pub temporary_for_read: String,
    /// One temporary per field, parallel to `original_channel_writes`.
    pub temporary_for_writes: Vec<String>,
    pub struct_type: Type,
    pub write_args: Vec<Expr>,
    pub read_args: Vec<Expr>,
    pub enclosing_write_loop: String,
    pub enclosing_read_loop: String,
    pub outermost_write_loop: String,
    pub outermost_read_loop: String,
    pub bounds: Region,
}

impl CombinedChannel {
    /// Field position of member `channel`.
    pub fn field_index(&self, channel: &str) -> Option<usize> {
        self.original_channel_writes
            .iter()
            .position(|w| w.channel == channel)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.original_channel_writes.iter().map(|w| w.channel.as_str())
    }

    fn first_member(&self) -> Option<&str> {
        self.members().next()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombinePlan {
    groups: Vec<CombinedChannel>,
    #[serde(skip)]
    member_to_group: BTreeMap<String, usize>,
}

impl CombinePlan {
    pub fn groups(&self) -> &[CombinedChannel] {
        &self.groups
    }

    /// The group `channel` is a member of.
    pub fn group_of(&self, channel: &str) -> Option<&CombinedChannel> {
        self.member_to_group
            .get(channel)
            .and_then(|&i| self.groups.get(i))
    }

    pub fn is_member(&self, channel: &str) -> bool {
        self.member_to_group.contains_key(channel)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn push(&mut self, group: CombinedChannel) {
        let index = self.groups.len();
        for member in group.members() {
            self.member_to_group.insert(member.to_string(), index);
        }
        self.groups.push(group);
    }
}

#[derive(Debug, Clone)]
pub struct CombineAnalysis {
    pub plan: CombinePlan,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Matching helpers ────────────────────────────────────────────────────────

/// Index lists agree: equal constants, or variables with the same bare loop
/// name (`A.s0.i` matches `B.s0.i`).
pub fn same_args(args1: &[Expr], args2: &[Expr]) -> bool {
    args1.len() == args2.len()
        && args1.iter().zip(args2).all(|(a, b)| match (a, b) {
            (a, b) if a.is_const() && b.is_const() => a == b,
            (Expr::Var(x), Expr::Var(y)) => loop_base_name(x) == loop_base_name(y),
            _ => false,
        })
}

/// Bounds agree in every dimension but the last (the depth).
pub fn same_channel_bounds(b1: &[Range], b2: &[Range]) -> bool {
    if b1.len() != b2.len() || b1.is_empty() {
        return false;
    }
    let outer = b1.len() - 1;
    b1[..outer] == b2[..outer]
}

/// `b1` with its depth widened to cover `b2`'s; `None` if the regions do not
/// agree outside the depth.
pub fn merge_channel_bounds(b1: &[Range], b2: &[Range]) -> Option<Region> {
    if !same_channel_bounds(b1, b2) {
        return None;
    }
    let mut merged = b1.to_vec();
    let last = merged.len() - 1;
    merged[last] = Range {
        min: simplify(&Expr::binary(BinOp::Min, b1[last].min.clone(), b2[last].min.clone())),
        extent: simplify(&Expr::binary(
            BinOp::Max,
            b1[last].extent.clone(),
            b2[last].extent.clone(),
        )),
    };
    Some(merged)
}

/// Everything matching needs about one candidate channel.
struct ChannelSites<'a> {
    write: &'a ChannelAccess,
    read: &'a ChannelAccess,
    bounds: &'a Region,
    producer: &'a str,
    consumer: &'a str,
}

/// The single write/read site pair of `channel`, or why it cannot be combined.
fn channel_sites<'a>(
    write: &'a ChannelAccess,
    summary: &'a AccessSummary,
) -> Result<ChannelSites<'a>, String> {
    let channel = write.channel.as_str();
    let writes = summary.writes().filter(|a| a.channel == channel).count();
    if writes != 1 {
        return Err(format!("written at {writes} sites"));
    }
    let mut reads = summary.reads().filter(|a| a.channel == channel);
    let read = match (reads.next(), reads.next()) {
        (Some(read), None) => read,
        (None, _) => return Err("never read".to_string()),
        (Some(_), Some(_)) => return Err("read at several sites".to_string()),
    };
    let bounds = summary
        .channel_bounds
        .get(channel)
        .ok_or_else(|| "no channel realization gives its bounds".to_string())?;
    let producer = write
        .func
        .as_deref()
        .ok_or_else(|| "written outside any producer".to_string())?;
    let consumer = read
        .func
        .as_deref()
        .ok_or_else(|| "read outside any producer".to_string())?;
    if write.loops.is_empty() || read.loops.is_empty() {
        return Err("accessed outside any loop".to_string());
    }
    Ok(ChannelSites {
        write,
        read,
        bounds,
        producer,
        consumer,
    })
}

fn refusal(
    code: DiagCode,
    s1: &ChannelSites,
    s2: &ChannelSites,
    what: &str,
    cause: String,
) -> Diagnostic {
    Diagnostic::warning(
        code,
        format!(
            "channels '{}' and '{}' in function '{}' are not combined: {what}",
            s1.write.channel, s2.write.channel, s1.producer
        ),
    )
    .with_channel(&s1.write.channel)
    .with_channel(&s2.write.channel)
    .with_cause(cause)
}

fn list(args: &[Expr]) -> String {
    args.iter().map(Expr::to_string).collect::<Vec<_>>().join(", ")
}

/// All pairing criteria; the first violated one is reported.
fn check_pair(s1: &ChannelSites, s2: &ChannelSites) -> Result<(), Diagnostic> {
    let (w1, w2, r1, r2) = (s1.write, s2.write, s1.read, s2.read);
    if w1.path_condition != w2.path_condition {
        return Err(refusal(
            codes::W0201,
            s1,
            s2,
            "path conditions differ",
            format!("{} vs {}", w1.path_condition, w2.path_condition),
        ));
    }
    if !same_args(&w1.args, &w2.args) {
        return Err(refusal(
            codes::W0202,
            s1,
            s2,
            "write arguments differ",
            format!("({}) vs ({})", list(&w1.args), list(&w2.args)),
        ));
    }
    if !same_channel_bounds(s1.bounds, s2.bounds) {
        return Err(refusal(
            codes::W0203,
            s1,
            s2,
            "bounds differ",
            format!("({}) vs ({})", list_ranges(s1.bounds), list_ranges(s2.bounds)),
        ));
    }
    if s1.consumer != s2.consumer {
        return Err(refusal(
            codes::W0204,
            s1,
            s2,
            "they are read in different functions",
            format!("{} and {}", s1.consumer, s2.consumer),
        )
        .with_hint("read both channels in the same consumer"));
    }
    if !same_args(&r1.args, &r2.args) {
        return Err(refusal(
            codes::W0205,
            s1,
            s2,
            "they are read with different arguments",
            format!("({}) vs ({})", list(&r1.args), list(&r2.args)),
        ));
    }
    if r1.loops.len() != r2.loops.len() || r1.loops.last() != r2.loops.last() {
        return Err(refusal(
            codes::W0206,
            s1,
            s2,
            "they are read in different loops",
            format!("({}) vs ({})", r1.loops.join(", "), r2.loops.join(", ")),
        ));
    }
    if r1.path_condition != r2.path_condition {
        return Err(refusal(
            codes::W0207,
            s1,
            s2,
            "they are read under different conditions",
            format!("{} vs {}", r1.path_condition, r2.path_condition),
        ));
    }
    Ok(())
}

fn list_ranges(bounds: &[Range]) -> String {
    bounds
        .iter()
        .map(Range::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Decide which channels to fuse. Never mutates `stmt`.
pub fn analyze_combination(
    stmt: &Stmt,
    names: &mut NameAllocator,
    structs: &mut StructRegistry,
) -> Result<CombineAnalysis, ChannelError> {
    let summary = collect_channel_accesses(stmt);
    let mut diagnostics = Vec::new();

    // Array-valued (promoted) channels are not element-wise; leave them out.
    let writes: Vec<&ChannelAccess> = summary.writes().filter(|w| w.ty != Type::Handle).collect();

    let mut seen = BTreeSet::new();
    let mut candidates = Vec::new();
    for &w in &writes {
        if !seen.insert(w.channel.as_str()) {
            continue;
        }
        match channel_sites(w, &summary) {
            Ok(sites) => candidates.push(sites),
            Err(reason) => {
                let has_sibling = writes
                    .iter()
                    .any(|o| o.channel != w.channel && o.func == w.func);
                if has_sibling {
                    let d = Diagnostic::warning(
                        codes::W0208,
                        format!("channel '{}' is not combined: {reason}", w.channel),
                    )
                    .with_channel(&w.channel);
                    log_diagnostic(&d);
                    diagnostics.push(d);
                }
            }
        }
    }

    let mut plan = CombinePlan::default();
    for (i, s1) in candidates.iter().enumerate() {
        if plan.is_member(&s1.write.channel) {
            continue;
        }
        let mut members = vec![s1];
        let mut bounds = s1.bounds.clone();
        for s2 in &candidates[i + 1..] {
            if plan.is_member(&s2.write.channel) || s1.producer != s2.producer {
                continue;
            }
            if let Err(d) = check_pair(s1, s2) {
                log_diagnostic(&d);
                diagnostics.push(d);
                continue;
            }
            let Some(merged) = merge_channel_bounds(&bounds, s2.bounds) else {
                continue;
            };
            bounds = merged;
            members.push(s2);
        }
        if members.len() < 2 {
            continue;
        }
        let group = build_group(&members, bounds, names, structs)?;
        log::debug!(
            "combination: {} → {}",
            group.members().collect::<Vec<_>>().join(", "),
            group.combined_channel
        );
        plan.push(group);
    }

    Ok(CombineAnalysis { plan, diagnostics })
}

fn build_group(
    members: &[&ChannelSites],
    bounds: Region,
    names: &mut NameAllocator,
    structs: &mut StructRegistry,
) -> Result<CombinedChannel, ChannelError> {
    let first = members[0];
    let combined_channel = format!("{}{CHANNEL_SUFFIX}", names.unique(first.producer));
    let temporary_for_read = format!("{}{TEMP_SUFFIX}", names.unique("t"));
    let temporary_for_writes = members
        .iter()
        .map(|_| format!("{}{TEMP_SUFFIX}", names.unique("t")))
        .collect();
    let field_types: Vec<Type> = members.iter().map(|m| m.write.ty.clone()).collect();
    let struct_type = structs.generate(&field_types, names)?;

    let (write_loops, read_loops) = (&first.write.loops, &first.read.loops);
    Ok(CombinedChannel {
        combined_channel,
        original_channel_writes: members.iter().map(|m| m.write.clone()).collect(),
        producer: first.producer.to_string(),
        consumer: first.consumer.to_string(),
        read_condition: first.read.path_condition.clone(),
        temporary_for_read,
        temporary_for_writes,
        struct_type,
        write_args: first.write.args.clone(),
        read_args: first.read.args.clone(),
        enclosing_write_loop: write_loops.last().cloned().unwrap_or_default(),
        enclosing_read_loop: read_loops.last().cloned().unwrap_or_default(),
        outermost_write_loop: write_loops.first().cloned().unwrap_or_default(),
        outermost_read_loop: read_loops.first().cloned().unwrap_or_default(),
        bounds,
    })
}

// ── Rewrite ─────────────────────────────────────────────────────────────────

/// Rewrite `stmt` according to `plan`, producing a new tree.
pub fn combine_channels(stmt: &Stmt, plan: &CombinePlan) -> Result<Stmt, ChannelError> {
    if plan.is_empty() {
        return Ok(stmt.clone());
    }
    Combiner { plan }.mutate_stmt(stmt, None)
}

struct Combiner<'a> {
    plan: &'a CombinePlan,
}

fn temp_read(name: &str, ty: &Type) -> Expr {
    Expr::call(ty.clone(), name, vec![Expr::IntImm(0)], CallKind::Halide)
}

impl Combiner<'_> {
    fn mutate_stmt(&self, stmt: &Stmt, func: Option<&str>) -> Result<Stmt, ChannelError> {
        Ok(match stmt {
            Stmt::For {
                name,
                min,
                extent,
                kind,
                body,
            } => {
                let mut new_body = self.mutate_stmt(body, func)?;
                for group in self.plan.groups() {
                    if func == Some(group.consumer.as_str()) && group.enclosing_read_loop == *name {
                        new_body = Stmt::block([self.read_combined(group), new_body]);
                    }
                }
                let mut s = Stmt::For {
                    name: name.clone(),
                    min: self.mutate_expr(min)?,
                    extent: self.mutate_expr(extent)?,
                    kind: *kind,
                    body: Box::new(new_body),
                };
                for group in self.plan.groups() {
                    if func == Some(group.producer.as_str())
                        && group.outermost_write_loop == *name
                    {
                        for (temp, write) in group
                            .temporary_for_writes
                            .iter()
                            .zip(&group.original_channel_writes)
                        {
                            s = Stmt::realize(
                                temp,
                                vec![write.ty.clone()],
                                vec![Range::new(0, 1)],
                                s,
                            );
                        }
                    }
                    if func == Some(group.consumer.as_str()) && group.outermost_read_loop == *name {
                        s = Stmt::realize(
                            &group.temporary_for_read,
                            vec![group.struct_type.clone()],
                            vec![Range::new(0, 1)],
                            s,
                        );
                    }
                }
                s
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => Stmt::IfThenElse {
                cond: self.mutate_expr(cond)?,
                then_case: Box::new(self.mutate_stmt(then_case, func)?),
                else_case: match else_case {
                    Some(e) => Some(Box::new(self.mutate_stmt(e, func)?)),
                    None => None,
                },
            },
            Stmt::Realize {
                name,
                types,
                bounds,
                body,
            } => {
                let body = self.mutate_stmt(body, func)?;
                match self.plan.group_of(name) {
                    Some(group) if group.first_member() == Some(name.as_str()) => Stmt::realize(
                        &group.combined_channel,
                        vec![group.struct_type.clone()],
                        group.bounds.clone(),
                        body,
                    ),
                    Some(_) => body,
                    None => Stmt::Realize {
                        name: name.clone(),
                        types: types.clone(),
                        bounds: bounds.clone(),
                        body: Box::new(body),
                    },
                }
            }
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                let inner = if *is_producer && !crate::ir::is_channel_name(name) {
                    Some(name.as_str())
                } else {
                    func
                };
                let body = self.mutate_stmt(body, inner)?;
                match self.plan.group_of(name) {
                    Some(group) if group.first_member() == Some(name.as_str()) => {
                        Stmt::ProducerConsumer {
                            name: group.combined_channel.clone(),
                            is_producer: *is_producer,
                            body: Box::new(body),
                        }
                    }
                    Some(_) => body,
                    None => Stmt::ProducerConsumer {
                        name: name.clone(),
                        is_producer: *is_producer,
                        body: Box::new(body),
                    },
                }
            }
            Stmt::Provide { name, values, args } => Stmt::Provide {
                name: name.clone(),
                values: self.mutate_exprs(values)?,
                args: self.mutate_exprs(args)?,
            },
            Stmt::Block(stmts) => Stmt::block(
                stmts
                    .iter()
                    .map(|s| self.mutate_stmt(s, func))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Stmt::Evaluate(e) => match self.member_write(e) {
                Some((call, group)) => self.write_field(call, group)?,
                None => Stmt::Evaluate(self.mutate_expr(e)?),
            },
        })
    }

    /// The `write_channel` call and group of a statement-level member write.
    fn member_write<'e>(&self, e: &'e Expr) -> Option<(&'e Call, &CombinedChannel)> {
        let call = e
            .as_call()
            .filter(|c| c.is_intrinsic(Intrinsic::WriteChannel))?;
        let group = self.plan.group_of(call.target_name()?)?;
        Some((call, group))
    }

    /// Store one field; the last field also writes the packed struct.
    fn write_field(&self, call: &Call, group: &CombinedChannel) -> Result<Stmt, ChannelError> {
        let channel = call.target_name().unwrap_or_default();
        let index = group
            .field_index(channel)
            .ok_or_else(|| ChannelError::MissingGroupMember {
                channel: channel.to_string(),
                combined: group.combined_channel.clone(),
            })?;
        let value = match call.args.get(1) {
            Some(v) => self.mutate_expr(v)?,
            None => {
                return Err(ChannelError::UnplacedWrite {
                    channel: channel.to_string(),
                })
            }
        };
        let store = Stmt::provide(
            &group.temporary_for_writes[index],
            value,
            vec![Expr::IntImm(0)],
        );
        if index + 1 < group.original_channel_writes.len() {
            return Ok(store);
        }

        let fields = group
            .temporary_for_writes
            .iter()
            .zip(&group.original_channel_writes)
            .map(|(temp, w)| temp_read(temp, &w.ty))
            .collect();
        let mut args = vec![
            Expr::string(&group.combined_channel),
            Expr::intrinsic(group.struct_type.clone(), Intrinsic::MakeStruct, fields),
        ];
        args.extend(group.write_args.iter().cloned());
        let write = Stmt::evaluate(Expr::intrinsic(
            group.struct_type.clone(),
            Intrinsic::WriteChannel,
            args,
        ));
        Ok(Stmt::block([store, write]))
    }

    /// One read of the combined channel into the read temporary.
    fn read_combined(&self, group: &CombinedChannel) -> Stmt {
        let mut args = vec![Expr::string(&group.combined_channel)];
        args.extend(group.read_args.iter().cloned());
        let read = Stmt::provide(
            &group.temporary_for_read,
            Expr::intrinsic(group.struct_type.clone(), Intrinsic::ReadChannel, args),
            vec![Expr::IntImm(0)],
        );
        if group.read_condition.is_const_true() {
            read
        } else {
            Stmt::if_then(group.read_condition.clone(), read)
        }
    }

    fn mutate_exprs(&self, es: &[Expr]) -> Result<Vec<Expr>, ChannelError> {
        es.iter().map(|e| self.mutate_expr(e)).collect()
    }

    fn mutate_expr(&self, e: &Expr) -> Result<Expr, ChannelError> {
        Ok(match e {
            Expr::IntImm(_) | Expr::BoolImm(_) | Expr::StringImm(_) | Expr::Var(_) => e.clone(),
            Expr::Binary { op, a, b } => {
                Expr::binary(*op, self.mutate_expr(a)?, self.mutate_expr(b)?)
            }
            Expr::Not(a) => Expr::not(self.mutate_expr(a)?),
            Expr::Select {
                cond,
                true_value,
                false_value,
            } => Expr::select(
                self.mutate_expr(cond)?,
                self.mutate_expr(true_value)?,
                self.mutate_expr(false_value)?,
            ),
            Expr::Call(call) => {
                let group = call.target_name().and_then(|t| self.plan.group_of(t));
                match (call.intrinsic(), group) {
                    (Some(Intrinsic::ReadChannel), Some(group)) => {
                        let channel = call.target_name().unwrap_or_default();
                        let index = group.field_index(channel).ok_or_else(|| {
                            ChannelError::MissingGroupMember {
                                channel: channel.to_string(),
                                combined: group.combined_channel.clone(),
                            }
                        })?;
                        Expr::intrinsic(
                            call.ty.clone(),
                            Intrinsic::ReadField,
                            vec![
                                temp_read(&group.temporary_for_read, &group.struct_type),
                                Expr::IntImm(index as i64),
                            ],
                        )
                    }
                    (Some(Intrinsic::WriteChannel), Some(_)) => {
                        return Err(ChannelError::UnplacedWrite {
                            channel: call.target_name().unwrap_or_default().to_string(),
                        })
                    }
                    _ => Expr::Call(Call {
                        args: self.mutate_exprs(&call.args)?,
                        ..call.clone()
                    }),
                }
            }
        })
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the combination postconditions (C1-C2).
#[derive(Debug, Clone)]
pub struct CombineCert {
    /// C1: No member channel name remains in the output.
    pub c1_members_removed: bool,
    /// C2: Every combined channel is realized exactly once with its struct type.
    pub c2_realized_once: bool,
}

impl crate::pass::StageCert for CombineCert {
    fn all_pass(&self) -> bool {
        self.c1_members_removed && self.c2_realized_once
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_members_removed", self.c1_members_removed),
            ("C2_realized_once", self.c2_realized_once),
        ]
    }
}

/// Verify combination postconditions on the rewritten tree.
pub fn verify_combination(output: &Stmt, plan: &CombinePlan) -> CombineCert {
    let members: BTreeSet<&str> = plan.groups().iter().flat_map(|g| g.members()).collect();

    let mut leaked = false;
    let mut realized: BTreeMap<String, Vec<Vec<Type>>> = BTreeMap::new();
    visit_stmts(output, &mut |s| match s {
        Stmt::Realize { name, types, .. } => {
            leaked |= members.contains(name.as_str());
            realized.entry(name.clone()).or_default().push(types.clone());
        }
        Stmt::ProducerConsumer { name, .. } | Stmt::Provide { name, .. } => {
            leaked |= members.contains(name.as_str());
        }
        _ => {}
    });
    visit_stmt_exprs(output, &mut |e| match e {
        Expr::StringImm(s) => leaked |= members.contains(s.as_str()),
        Expr::Call(call) => leaked |= members.contains(call.name.as_str()),
        _ => {}
    });

    let c2 = plan.groups().iter().all(|g| {
        realized
            .get(g.combined_channel.as_str())
            .is_some_and(|r| r.len() == 1 && r[0] == [g.struct_type.clone()])
    });

    CombineCert {
        c1_members_removed: !leaked,
        c2_realized_once: c2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ForKind;
    use crate::pass::StageCert;

    #[test]
    fn same_args_strips_prefixes() {
        assert!(same_args(
            &[Expr::var("A.s0.i"), Expr::IntImm(2)],
            &[Expr::var("B.s0.i"), Expr::IntImm(2)]
        ));
        assert!(!same_args(&[Expr::var("A.s0.i")], &[Expr::var("A.s0.j")]));
        assert!(!same_args(&[Expr::IntImm(1)], &[Expr::IntImm(2)]));
        assert!(!same_args(&[Expr::var("i")], &[]));
        assert!(!same_args(
            &[Expr::binary(BinOp::Add, Expr::var("i"), Expr::IntImm(1))],
            &[Expr::binary(BinOp::Add, Expr::var("i"), Expr::IntImm(1))]
        ));
    }

    #[test]
    fn merge_widens_depth_only() {
        let b1 = vec![Range::new(0, 4), Range::new(0, 8)];
        let b2 = vec![Range::new(0, 4), Range::new(0, 16)];
        assert_eq!(
            merge_channel_bounds(&b1, &b2),
            Some(vec![Range::new(0, 4), Range::new(0, 16)])
        );
        let b3 = vec![Range::new(0, 5), Range::new(0, 16)];
        assert_eq!(merge_channel_bounds(&b1, &b3), None);
        assert_eq!(merge_channel_bounds(&[], &[]), None);
    }

    fn write(ch: &str, value: Expr) -> Stmt {
        Stmt::evaluate(Expr::intrinsic(
            Type::int32(),
            Intrinsic::WriteChannel,
            vec![Expr::string(ch), value],
        ))
    }

    fn read(ch: &str, ty: Type) -> Expr {
        Expr::intrinsic(ty, Intrinsic::ReadChannel, vec![Expr::string(ch)])
    }

    /// A writes a.channel and b.channel in loop i; `b_reader` reads b.channel.
    fn two_channels(b_reader: &str) -> Stmt {
        let producer = Stmt::produce(
            "A",
            Stmt::for_loop(
                "A.s0.i",
                0,
                4,
                ForKind::Serial,
                Stmt::block([
                    write("a.channel", Expr::var("A.s0.i")),
                    write("b.channel", Expr::IntImm(7)),
                ]),
            ),
        );
        let reader = |func: &str, ch: &str| {
            Stmt::produce(
                func,
                Stmt::for_loop(
                    "B.s0.i",
                    0,
                    4,
                    ForKind::Serial,
                    Stmt::provide(func, read(ch, Type::int32()), vec![Expr::var("B.s0.i")]),
                ),
            )
        };
        let consumers = if b_reader == "B" {
            Stmt::produce(
                "B",
                Stmt::for_loop(
                    "B.s0.i",
                    0,
                    4,
                    ForKind::Serial,
                    Stmt::provide(
                        "B",
                        Expr::binary(
                            BinOp::Add,
                            read("a.channel", Type::int32()),
                            read("b.channel", Type::int32()),
                        ),
                        vec![Expr::var("B.s0.i")],
                    ),
                ),
            )
        } else {
            Stmt::block([reader("B", "a.channel"), reader(b_reader, "b.channel")])
        };
        Stmt::realize(
            "a.channel",
            vec![Type::int32()],
            vec![Range::new(0, 2)],
            Stmt::realize(
                "b.channel",
                vec![Type::int32()],
                vec![Range::new(0, 4)],
                Stmt::block([producer, consumers]),
            ),
        )
    }

    #[test]
    fn matching_pair_is_fused() {
        let s = two_channels("B");
        let mut names = NameAllocator::new();
        let mut structs = StructRegistry::new();
        let analysis = analyze_combination(&s, &mut names, &mut structs).unwrap();
        assert!(analysis.diagnostics.is_empty());
        let groups = analysis.plan.groups();
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.combined_channel, "A$0.channel");
        assert_eq!(g.temporary_for_read, "t$0.temp");
        assert_eq!(g.temporary_for_writes, vec!["t$1.temp", "t$2.temp"]);
        assert_eq!(g.bounds, vec![Range::new(0, 4)]);
        assert_eq!(g.struct_type, Type::Struct(vec![Type::int32(), Type::int32()]));
        assert_eq!(structs.len(), 1);

        let out = combine_channels(&s, &analysis.plan).unwrap();
        let text = out.to_string();
        assert!(text.contains("realize A$0.channel<{int32, int32}>([0, 4])"));
        assert!(text.contains("t$1.temp(0) = A.s0.i"));
        assert!(text.contains(
            "write_channel<{int32, int32}>(\"A$0.channel\", make_struct<{int32, int32}>(t$1.temp(0), t$2.temp(0)))"
        ));
        assert!(text.contains("t$0.temp(0) = read_channel<{int32, int32}>(\"A$0.channel\")"));
        assert!(text.contains("read_field(t$0.temp<{int32, int32}>(0), 1)"));
        assert!(verify_combination(&out, &analysis.plan).all_pass());
    }

    #[test]
    fn different_consumers_are_not_fused() {
        let s = two_channels("C");
        let mut names = NameAllocator::new();
        let mut structs = StructRegistry::new();
        let analysis = analyze_combination(&s, &mut names, &mut structs).unwrap();
        assert!(analysis.plan.is_empty());
        assert_eq!(analysis.diagnostics.len(), 1);
        assert_eq!(analysis.diagnostics[0].code, Some(codes::W0204));
        assert_eq!(combine_channels(&s, &analysis.plan).unwrap(), s);
        assert!(structs.is_empty());
    }
}
