// interp.rs — Sequential reference interpreter for the loop-nest IR
//
// Executes a statement tree directly: loops, conditionals, scoped
// realizations, provides and buffer calls, per-index FIFO channels, shadow
// arrays and struct packing. Every channel transaction is recorded so tests
// can compare what a consumer received before and after a rewrite.
//
// Preconditions: free variables other than loop indices are bound with
//   `Interpreter::bind` before `run`.
// Postconditions: `transactions()` lists channel operations in execution order.
// Failure modes: `InterpError` on empty-channel reads, unbound variables,
//   undefined buffer elements and ill-typed operands.
// Side effects: none outside the interpreter state.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::ir::{BinOp, Call, CallKind, Expr, Intrinsic, Stmt};

/// Runtime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    /// Whole shadow array, keyed by element index.
    Array(Buffer),
    Struct(Vec<Value>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_int(&self) -> Result<i64, InterpError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(InterpError::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, InterpError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(InterpError::TypeMismatch {
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    /// Scalars carried by this value, arrays flattened in index order.
    pub fn flatten(&self) -> Vec<Value> {
        match self {
            Value::Array(elems) => elems.values().flat_map(Value::flatten).collect(),
            other => vec![other.clone()],
        }
    }
}

/// Buffer contents keyed by element index.
pub type Buffer = BTreeMap<Vec<i64>, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("read from empty channel '{channel}' at {index:?}")]
    EmptyChannel { channel: String, index: Vec<i64> },

    #[error("unbound variable '{0}'")]
    UnboundVar(String),

    #[error("unknown buffer '{0}'")]
    UnknownBuffer(String),

    #[error("undefined element {index:?} of '{buffer}'")]
    UndefinedElement { buffer: String, index: Vec<i64> },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("field {index} out of range for a struct of {len} fields")]
    FieldOutOfRange { index: i64, len: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("malformed call to '{0}'")]
    MalformedCall(String),
}

/// One recorded channel operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub channel: String,
    pub index: Vec<i64>,
    pub is_write: bool,
    pub value: Value,
}

type ChannelKey = (String, Vec<i64>);

#[derive(Debug, Default)]
pub struct Interpreter {
    vars: HashMap<String, Value>,
    /// Realized buffers, innermost realization last.
    scoped: HashMap<String, Vec<Buffer>>,
    /// Buffers provided without an enclosing realization (pipeline outputs).
    outputs: BTreeMap<String, Buffer>,
    channels: HashMap<ChannelKey, VecDeque<Value>>,
    trace: Vec<Transaction>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a free variable (a pipeline parameter).
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn run(&mut self, stmt: &Stmt) -> Result<(), InterpError> {
        self.exec(stmt)
    }

    /// Contents of an unrealized (output) buffer.
    pub fn output(&self, name: &str) -> Option<&Buffer> {
        self.outputs.get(name)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.trace
    }

    /// Values received from `channel`, arrays flattened, in arrival order.
    pub fn received(&self, channel: &str) -> Vec<Value> {
        self.trace
            .iter()
            .filter(|t| !t.is_write && t.channel == channel)
            .flat_map(|t| t.value.flatten())
            .collect()
    }

    /// Values written but never read.
    pub fn pending(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }

    // ── Statements ──

    fn exec(&mut self, stmt: &Stmt) -> Result<(), InterpError> {
        match stmt {
            Stmt::For {
                name,
                min,
                extent,
                body,
                ..
            } => {
                let lo = self.eval(min)?.as_int()?;
                let n = self.eval(extent)?.as_int()?;
                let saved = self.vars.remove(name);
                let mut result = Ok(());
                for i in lo..lo + n {
                    self.vars.insert(name.clone(), Value::Int(i));
                    result = self.exec(body);
                    if result.is_err() {
                        break;
                    }
                }
                self.vars.remove(name);
                if let Some(v) = saved {
                    self.vars.insert(name.clone(), v);
                }
                result
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                if self.eval(cond)?.as_bool()? {
                    self.exec(then_case)
                } else if let Some(e) = else_case {
                    self.exec(e)
                } else {
                    Ok(())
                }
            }
            Stmt::Realize { name, body, .. } => {
                self.scoped.entry(name.clone()).or_default().push(Buffer::new());
                let result = self.exec(body);
                if let Some(stack) = self.scoped.get_mut(name) {
                    stack.pop();
                }
                result
            }
            Stmt::ProducerConsumer { body, .. } => self.exec(body),
            Stmt::Provide { name, values, args } => {
                let value = match values.as_slice() {
                    [single] => self.eval(single)?,
                    many => Value::Struct(
                        many.iter()
                            .map(|v| self.eval(v))
                            .collect::<Result<_, _>>()?,
                    ),
                };
                let index = self.eval_index(args)?;
                self.buffer_mut(name).insert(index, value);
                Ok(())
            }
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.exec(s)),
            Stmt::Evaluate(e) => self.eval(e).map(|_| ()),
        }
    }

    fn buffer_mut(&mut self, name: &str) -> &mut Buffer {
        match self.scoped.get_mut(name).and_then(|s| s.last_mut()) {
            Some(buf) => buf,
            None => self.outputs.entry(name.to_string()).or_default(),
        }
    }

    fn buffer(&self, name: &str) -> Result<&Buffer, InterpError> {
        self.scoped
            .get(name)
            .and_then(|s| s.last())
            .or_else(|| self.outputs.get(name))
            .ok_or_else(|| InterpError::UnknownBuffer(name.to_string()))
    }

    // ── Expressions ──

    /// Evaluate one expression in the current state.
    pub fn eval(&mut self, e: &Expr) -> Result<Value, InterpError> {
        match e {
            Expr::IntImm(v) => Ok(Value::Int(*v)),
            Expr::BoolImm(v) => Ok(Value::Bool(*v)),
            Expr::StringImm(s) => Ok(Value::Str(s.clone())),
            Expr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| InterpError::UnboundVar(name.clone())),
            Expr::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                a,
                b,
            } => {
                let lhs = self.eval(a)?.as_bool()?;
                match (op, lhs) {
                    (BinOp::And, false) => Ok(Value::Bool(false)),
                    (BinOp::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(self.eval(b)?.as_bool()?)),
                }
            }
            Expr::Binary { op, a, b } => {
                let lhs = self.eval(a)?;
                let rhs = self.eval(b)?;
                binary(*op, lhs, rhs)
            }
            Expr::Not(a) => Ok(Value::Bool(!self.eval(a)?.as_bool()?)),
            Expr::Select {
                cond,
                true_value,
                false_value,
            } => {
                if self.eval(cond)?.as_bool()? {
                    self.eval(true_value)
                } else {
                    self.eval(false_value)
                }
            }
            Expr::Call(call) => self.call(call),
        }
    }

    fn eval_index(&mut self, args: &[Expr]) -> Result<Vec<i64>, InterpError> {
        args.iter().map(|a| self.eval(a)?.as_int()).collect()
    }

    fn target(&self, call: &Call) -> Result<String, InterpError> {
        call.target_name()
            .map(str::to_string)
            .ok_or_else(|| InterpError::MalformedCall(call.name.clone()))
    }

    fn call(&mut self, call: &Call) -> Result<Value, InterpError> {
        let Some(which) = call.intrinsic() else {
            if call.kind == CallKind::Intrinsic {
                return Err(InterpError::MalformedCall(call.name.clone()));
            }
            let index = self.eval_index(&call.args)?;
            return self
                .buffer(&call.name)?
                .get(&index)
                .cloned()
                .ok_or(InterpError::UndefinedElement {
                    buffer: call.name.clone(),
                    index,
                });
        };
        match which {
            Intrinsic::WriteChannel => {
                let channel = self.target(call)?;
                let value = match call.args.get(1) {
                    Some(v) => self.eval(v)?,
                    None => return Err(InterpError::MalformedCall(call.name.clone())),
                };
                let index = self.eval_index(&call.args[2..])?;
                self.trace.push(Transaction {
                    channel: channel.clone(),
                    index: index.clone(),
                    is_write: true,
                    value: value.clone(),
                });
                self.channels
                    .entry((channel, index))
                    .or_default()
                    .push_back(value);
                Ok(Value::Int(0))
            }
            Intrinsic::ReadChannel => {
                let channel = self.target(call)?;
                let index = self.eval_index(&call.args[1..])?;
                let value = self
                    .channels
                    .get_mut(&(channel.clone(), index.clone()))
                    .and_then(VecDeque::pop_front)
                    .ok_or_else(|| InterpError::EmptyChannel {
                        channel: channel.clone(),
                        index: index.clone(),
                    })?;
                self.trace.push(Transaction {
                    channel,
                    index,
                    is_write: false,
                    value: value.clone(),
                });
                Ok(value)
            }
            Intrinsic::ReadArray => {
                let array = self.target(call)?;
                let index = self.eval_index(&call.args[1..])?;
                let buf = self.buffer(&array)?;
                if index.is_empty() {
                    return Ok(Value::Array(buf.clone()));
                }
                buf.get(&index)
                    .cloned()
                    .ok_or(InterpError::UndefinedElement {
                        buffer: array,
                        index,
                    })
            }
            Intrinsic::WriteArray => {
                let array = self.target(call)?;
                let value = match call.args.get(1) {
                    Some(v) => self.eval(v)?,
                    None => return Err(InterpError::MalformedCall(call.name.clone())),
                };
                let index = self.eval_index(&call.args[2..])?;
                if index.is_empty() {
                    match value {
                        Value::Array(elems) => *self.buffer_mut(&array) = elems,
                        other => {
                            return Err(InterpError::TypeMismatch {
                                expected: "array",
                                found: other.kind(),
                            })
                        }
                    }
                } else {
                    self.buffer_mut(&array).insert(index, value);
                }
                Ok(Value::Int(0))
            }
            Intrinsic::MakeStruct => Ok(Value::Struct(
                call.args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<_, _>>()?,
            )),
            Intrinsic::ReadField => {
                let [packed, field] = call.args.as_slice() else {
                    return Err(InterpError::MalformedCall(call.name.clone()));
                };
                let packed = self.eval(packed)?;
                let field = self.eval(field)?.as_int()?;
                let fields = match packed {
                    Value::Struct(fields) => fields,
                    other => {
                        return Err(InterpError::TypeMismatch {
                            expected: "struct",
                            found: other.kind(),
                        })
                    }
                };
                usize::try_from(field)
                    .ok()
                    .and_then(|i| fields.get(i).cloned())
                    .ok_or(InterpError::FieldOutOfRange {
                        index: field,
                        len: fields.len(),
                    })
            }
        }
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, InterpError> {
    let ints = || -> Result<(i64, i64), InterpError> { Ok((lhs.as_int()?, rhs.as_int()?)) };
    let bools = || -> Result<(bool, bool), InterpError> { Ok((lhs.as_bool()?, rhs.as_bool()?)) };
    Ok(match op {
        BinOp::Eq => Value::Bool(lhs == rhs),
        BinOp::Ne => Value::Bool(lhs != rhs),
        BinOp::And => {
            let (x, y) = bools()?;
            Value::Bool(x && y)
        }
        BinOp::Or => {
            let (x, y) = bools()?;
            Value::Bool(x || y)
        }
        BinOp::Add => {
            let (x, y) = ints()?;
            Value::Int(x.wrapping_add(y))
        }
        BinOp::Sub => {
            let (x, y) = ints()?;
            Value::Int(x.wrapping_sub(y))
        }
        BinOp::Mul => {
            let (x, y) = ints()?;
            Value::Int(x.wrapping_mul(y))
        }
        BinOp::Div | BinOp::Mod => {
            let (x, y) = ints()?;
            if y == 0 {
                return Err(InterpError::DivisionByZero);
            }
            if op == BinOp::Div {
                Value::Int(x.div_euclid(y))
            } else {
                Value::Int(x.rem_euclid(y))
            }
        }
        BinOp::Min => {
            let (x, y) = ints()?;
            Value::Int(x.min(y))
        }
        BinOp::Max => {
            let (x, y) = ints()?;
            Value::Int(x.max(y))
        }
        BinOp::Lt => {
            let (x, y) = ints()?;
            Value::Bool(x < y)
        }
        BinOp::Le => {
            let (x, y) = ints()?;
            Value::Bool(x <= y)
        }
        BinOp::Gt => {
            let (x, y) = ints()?;
            Value::Bool(x > y)
        }
        BinOp::Ge => {
            let (x, y) = ints()?;
            Value::Bool(x >= y)
        }
    })
}

/// Run `stmt` in a fresh interpreter.
pub fn execute(stmt: &Stmt) -> Result<Interpreter, InterpError> {
    let mut interp = Interpreter::new();
    interp.run(stmt)?;
    Ok(interp)
}
