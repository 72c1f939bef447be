// ir.rs — Loop-nest IR consumed and produced by the channel passes
//
// A closed statement/expression tree in the style of Halide's lowered IR:
// loops, conditionals, realizations, produce/consume markers, provides and
// calls. Channel traffic appears as the `read_channel`/`write_channel`
// intrinsics; the passes introduce `read_array`/`write_array`/`make_struct`/
// `read_field`.
//
// Preconditions: none (types only, plus pure helpers).
// Postconditions: `Display` output re-parses to a structurally equal tree.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

// ── Types ───────────────────────────────────────────────────────────────────

/// Scalar or compiler-generated struct type carried by calls and realizations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Int(u8),
    UInt(u8),
    Float(u8),
    Bool,
    Handle,
    /// Packed struct with ordered fields (see `struct_type`).
    Struct(Vec<Type>),
}

impl Type {
    pub fn int32() -> Self {
        Type::Int(32)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    /// Parse a scalar type keyword (`int32`, `bool`, ...).
    pub fn from_keyword(word: &str) -> Option<Type> {
        match word {
            "bool" => return Some(Type::Bool),
            "handle" => return Some(Type::Handle),
            _ => {}
        }
        let (ctor, digits): (fn(u8) -> Type, &str) = if let Some(d) = word.strip_prefix("uint") {
            (Type::UInt, d)
        } else if let Some(d) = word.strip_prefix("int") {
            (Type::Int, d)
        } else if let Some(d) = word.strip_prefix("float") {
            (Type::Float, d)
        } else {
            return None;
        };
        match digits.parse::<u8>() {
            Ok(bits @ (1 | 8 | 16 | 32 | 64)) => Some(ctor(bits)),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(bits) => write!(f, "int{bits}"),
            Type::UInt(bits) => write!(f, "uint{bits}"),
            Type::Float(bits) => write!(f, "float{bits}"),
            Type::Bool => write!(f, "bool"),
            Type::Handle => write!(f, "handle"),
            Type::Struct(fields) => {
                write!(f, "{{")?;
                write_list(f, fields)?;
                write!(f, "}}")
            }
        }
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// Binding strength used by the printer; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 5,
            BinOp::Min | BinOp::Max => 7,
        }
    }
}

/// The synthetic and channel intrinsics the passes read and produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    ReadChannel,
    WriteChannel,
    ReadArray,
    WriteArray,
    MakeStruct,
    ReadField,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 6] = [
        Intrinsic::ReadChannel,
        Intrinsic::WriteChannel,
        Intrinsic::ReadArray,
        Intrinsic::WriteArray,
        Intrinsic::MakeStruct,
        Intrinsic::ReadField,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::ReadChannel => "read_channel",
            Intrinsic::WriteChannel => "write_channel",
            Intrinsic::ReadArray => "read_array",
            Intrinsic::WriteArray => "write_array",
            Intrinsic::MakeStruct => "make_struct",
            Intrinsic::ReadField => "read_field",
        }
    }

    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Intrinsic::ALL.into_iter().find(|i| i.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// One of the `Intrinsic` operations.
    Intrinsic,
    /// Read of a realized buffer (a Func or a compiler temporary).
    Halide,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub ty: Type,
    pub name: String,
    pub args: Vec<Expr>,
    pub kind: CallKind,
}

impl Call {
    pub fn intrinsic(&self) -> Option<Intrinsic> {
        match self.kind {
            CallKind::Intrinsic => Intrinsic::from_name(&self.name),
            CallKind::Halide => None,
        }
    }

    pub fn is_intrinsic(&self, which: Intrinsic) -> bool {
        self.intrinsic() == Some(which)
    }

    /// The channel or array name carried as the first argument.
    pub fn target_name(&self) -> Option<&str> {
        match self.args.first() {
            Some(Expr::StringImm(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    IntImm(i64),
    BoolImm(bool),
    StringImm(String),
    Var(String),
    Binary {
        op: BinOp,
        a: Box<Expr>,
        b: Box<Expr>,
    },
    Not(Box<Expr>),
    Select {
        cond: Box<Expr>,
        true_value: Box<Expr>,
        false_value: Box<Expr>,
    },
    Call(Call),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn string(value: impl Into<String>) -> Expr {
        Expr::StringImm(value.into())
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
        Expr::Binary {
            op,
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn eq(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Eq, a, b)
    }

    pub fn lt(a: Expr, b: Expr) -> Expr {
        Expr::binary(BinOp::Lt, a, b)
    }

    /// Conjunction that absorbs a literal `true` on either side.
    pub fn and(a: Expr, b: Expr) -> Expr {
        if a.is_const_true() {
            return b;
        }
        if b.is_const_true() {
            return a;
        }
        Expr::binary(BinOp::And, a, b)
    }

    pub fn not(e: Expr) -> Expr {
        Expr::Not(Box::new(e))
    }

    pub fn select(cond: Expr, true_value: Expr, false_value: Expr) -> Expr {
        Expr::Select {
            cond: Box::new(cond),
            true_value: Box::new(true_value),
            false_value: Box::new(false_value),
        }
    }

    pub fn call(ty: Type, name: impl Into<String>, args: Vec<Expr>, kind: CallKind) -> Expr {
        Expr::Call(Call {
            ty,
            name: name.into(),
            args,
            kind,
        })
    }

    pub fn intrinsic(ty: Type, which: Intrinsic, args: Vec<Expr>) -> Expr {
        Expr::call(ty, which.name(), args, CallKind::Intrinsic)
    }

    pub fn is_const_true(&self) -> bool {
        matches!(self, Expr::BoolImm(true))
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::IntImm(_) | Expr::BoolImm(_))
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::IntImm(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::IntImm(i64::from(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::BoolImm(v)
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForKind {
    Serial,
    Unrolled,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

impl Range {
    pub fn new(min: impl Into<Expr>, extent: impl Into<Expr>) -> Self {
        Range {
            min: min.into(),
            extent: extent.into(),
        }
    }
}

/// Per-dimension bounds of a realization; the last dimension of a channel
/// is its depth.
pub type Region = Vec<Range>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    For {
        name: String,
        min: Expr,
        extent: Expr,
        kind: ForKind,
        body: Box<Stmt>,
    },
    IfThenElse {
        cond: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },
    Realize {
        name: String,
        types: Vec<Type>,
        bounds: Region,
        body: Box<Stmt>,
    },
    ProducerConsumer {
        name: String,
        is_producer: bool,
        body: Box<Stmt>,
    },
    Provide {
        name: String,
        values: Vec<Expr>,
        args: Vec<Expr>,
    },
    Block(Vec<Stmt>),
    Evaluate(Expr),
}

impl Stmt {
    pub fn for_loop(
        name: impl Into<String>,
        min: impl Into<Expr>,
        extent: impl Into<Expr>,
        kind: ForKind,
        body: Stmt,
    ) -> Stmt {
        Stmt::For {
            name: name.into(),
            min: min.into(),
            extent: extent.into(),
            kind,
            body: Box::new(body),
        }
    }

    pub fn if_then(cond: Expr, then_case: Stmt) -> Stmt {
        Stmt::IfThenElse {
            cond,
            then_case: Box::new(then_case),
            else_case: None,
        }
    }

    pub fn realize(name: impl Into<String>, types: Vec<Type>, bounds: Region, body: Stmt) -> Stmt {
        Stmt::Realize {
            name: name.into(),
            types,
            bounds,
            body: Box::new(body),
        }
    }

    pub fn produce(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::ProducerConsumer {
            name: name.into(),
            is_producer: true,
            body: Box::new(body),
        }
    }

    pub fn consume(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::ProducerConsumer {
            name: name.into(),
            is_producer: false,
            body: Box::new(body),
        }
    }

    pub fn provide(name: impl Into<String>, value: Expr, args: Vec<Expr>) -> Stmt {
        Stmt::Provide {
            name: name.into(),
            values: vec![value],
            args,
        }
    }

    pub fn evaluate(e: Expr) -> Stmt {
        Stmt::Evaluate(e)
    }

    /// Sequence statements, flattening nested blocks. A single statement is
    /// returned as-is; no statements yield an empty block.
    pub fn block(stmts: impl IntoIterator<Item = Stmt>) -> Stmt {
        let mut flat = Vec::new();
        for s in stmts {
            match s {
                Stmt::Block(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Stmt::Block(Vec::new()))
        } else {
            Stmt::Block(flat)
        }
    }

    pub fn is_empty_block(&self) -> bool {
        matches!(self, Stmt::Block(v) if v.is_empty())
    }
}

// ── Expression queries ──────────────────────────────────────────────────────

/// Split a condition into its `&&` conjuncts, dropping literal `true`.
pub fn conjuncts(e: &Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    collect_conjuncts(e, &mut out);
    out
}

fn collect_conjuncts(e: &Expr, out: &mut Vec<Expr>) {
    match e {
        Expr::Binary {
            op: BinOp::And,
            a,
            b,
        } => {
            collect_conjuncts(a, out);
            collect_conjuncts(b, out);
        }
        Expr::BoolImm(true) => {}
        other => out.push(other.clone()),
    }
}

/// Rebuild a left-nested conjunction; empty input is `true`.
pub fn and_all(parts: impl IntoIterator<Item = Expr>) -> Expr {
    parts
        .into_iter()
        .fold(Expr::BoolImm(true), Expr::and)
}

/// Names of all variables referenced by `e`.
pub fn free_vars(e: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    visit_expr(e, &mut |node| {
        if let Expr::Var(name) = node {
            out.insert(name.clone());
        }
    });
    out
}

/// True if any call (intrinsic or buffer read) occurs in `e`.
pub fn contains_call(e: &Expr) -> bool {
    let mut found = false;
    visit_expr(e, &mut |node| {
        if matches!(node, Expr::Call(_)) {
            found = true;
        }
    });
    found
}

/// Pre-order visit of every sub-expression.
pub fn visit_expr(e: &Expr, f: &mut impl FnMut(&Expr)) {
    f(e);
    match e {
        Expr::IntImm(_) | Expr::BoolImm(_) | Expr::StringImm(_) | Expr::Var(_) => {}
        Expr::Binary { a, b, .. } => {
            visit_expr(a, f);
            visit_expr(b, f);
        }
        Expr::Not(a) => visit_expr(a, f),
        Expr::Select {
            cond,
            true_value,
            false_value,
        } => {
            visit_expr(cond, f);
            visit_expr(true_value, f);
            visit_expr(false_value, f);
        }
        Expr::Call(call) => {
            for arg in &call.args {
                visit_expr(arg, f);
            }
        }
    }
}

/// Pre-order visit of every expression reachable from a statement.
pub fn visit_stmt_exprs(s: &Stmt, f: &mut impl FnMut(&Expr)) {
    match s {
        Stmt::For {
            min, extent, body, ..
        } => {
            visit_expr(min, f);
            visit_expr(extent, f);
            visit_stmt_exprs(body, f);
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            visit_expr(cond, f);
            visit_stmt_exprs(then_case, f);
            if let Some(e) = else_case {
                visit_stmt_exprs(e, f);
            }
        }
        Stmt::Realize { bounds, body, .. } => {
            for r in bounds {
                visit_expr(&r.min, f);
                visit_expr(&r.extent, f);
            }
            visit_stmt_exprs(body, f);
        }
        Stmt::ProducerConsumer { body, .. } => visit_stmt_exprs(body, f),
        Stmt::Provide { values, args, .. } => {
            for e in values.iter().chain(args) {
                visit_expr(e, f);
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                visit_stmt_exprs(s, f);
            }
        }
        Stmt::Evaluate(e) => visit_expr(e, f),
    }
}

/// Pre-order visit of every statement node.
pub fn visit_stmts(s: &Stmt, f: &mut impl FnMut(&Stmt)) {
    f(s);
    match s {
        Stmt::For { body, .. }
        | Stmt::Realize { body, .. }
        | Stmt::ProducerConsumer { body, .. } => visit_stmts(body, f),
        Stmt::IfThenElse {
            then_case,
            else_case,
            ..
        } => {
            visit_stmts(then_case, f);
            if let Some(e) = else_case {
                visit_stmts(e, f);
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                visit_stmts(s, f);
            }
        }
        Stmt::Provide { .. } | Stmt::Evaluate(_) => {}
    }
}

// ── Naming conventions ──────────────────────────────────────────────────────

/// Suffix that marks a realization or produce node as a channel.
pub const CHANNEL_SUFFIX: &str = ".channel";

/// Suffix of loops that only mark device entry; they do not iterate.
pub const DEVICE_LOOP_SUFFIX: &str = ".run_on_device";

pub fn is_channel_name(name: &str) -> bool {
    name.ends_with(CHANNEL_SUFFIX)
}

pub fn is_device_loop(name: &str) -> bool {
    name.ends_with(DEVICE_LOOP_SUFFIX)
}

/// Strip dotted components trailing the last `channel` component:
/// `A.channel.1.b` → `A.channel`. Names without a `channel` component are
/// returned unchanged.
pub fn channel_base_name(raw: &str) -> &str {
    let mut name = raw;
    loop {
        match name.rfind('.') {
            Some(dot) if &name[dot + 1..] == "channel" => return name,
            Some(dot) => name = &name[..dot],
            None => return raw,
        }
    }
}

/// The bare loop name with function/stage prefixes removed: `A.s0.iii` → `iii`.
pub fn loop_base_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

// ── Printing ────────────────────────────────────────────────────────────────

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl Expr {
    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, outer: u8) -> fmt::Result {
        match self {
            Expr::IntImm(v) => write!(f, "{v}"),
            Expr::BoolImm(v) => write!(f, "{v}"),
            Expr::StringImm(s) => write_string_literal(f, s),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Binary { op, a, b } if matches!(op, BinOp::Min | BinOp::Max) => {
                write!(f, "{}({a}, {b})", op.symbol())
            }
            Expr::Binary { op, a, b } => {
                let p = op.precedence();
                if p < outer {
                    write!(f, "(")?;
                }
                a.fmt_prec(f, p)?;
                write!(f, " {} ", op.symbol())?;
                // Right operand binds one level tighter: operators are left-associative.
                b.fmt_prec(f, p + 1)?;
                if p < outer {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Expr::Not(a) => {
                write!(f, "!")?;
                a.fmt_prec(f, 6)
            }
            Expr::Select {
                cond,
                true_value,
                false_value,
            } => write!(f, "select({cond}, {true_value}, {false_value})"),
            Expr::Call(call) => {
                write!(f, "{}", call.name)?;
                if call.ty != Type::int32() {
                    write!(f, "<{}>", call.ty)?;
                }
                write!(f, "(")?;
                write_list(f, &call.args)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.extent)
    }
}

impl Stmt {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Stmt::For {
                name,
                min,
                extent,
                kind,
                body,
            } => {
                let kw = match kind {
                    ForKind::Serial => "for",
                    ForKind::Unrolled => "unrolled",
                };
                writeln!(f, "{pad}{kw} ({name}, {min}, {extent}) {{")?;
                body.fmt_indented(f, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                writeln!(f, "{pad}if ({cond}) {{")?;
                then_case.fmt_indented(f, depth + 1)?;
                if let Some(else_case) = else_case {
                    writeln!(f, "{pad}}} else {{")?;
                    else_case.fmt_indented(f, depth + 1)?;
                }
                writeln!(f, "{pad}}}")
            }
            Stmt::Realize {
                name,
                types,
                bounds,
                body,
            } => {
                write!(f, "{pad}realize {name}<")?;
                write_list(f, types)?;
                write!(f, ">(")?;
                write_list(f, bounds)?;
                writeln!(f, ") {{")?;
                body.fmt_indented(f, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                let kw = if *is_producer { "produce" } else { "consume" };
                writeln!(f, "{pad}{kw} {name} {{")?;
                body.fmt_indented(f, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Stmt::Provide { name, values, args } => {
                write!(f, "{pad}{name}(")?;
                write_list(f, args)?;
                write!(f, ") = ")?;
                if values.len() == 1 {
                    writeln!(f, "{}", values[0])
                } else {
                    write!(f, "{{")?;
                    write_list(f, values)?;
                    writeln!(f, "}}")
                }
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    s.fmt_indented(f, depth)?;
                }
                Ok(())
            }
            Stmt::Evaluate(e) => writeln!(f, "{pad}{e}"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

// Decision tables are reported as JSON with expressions in textual form.

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
