//! Tree-walking interpreter for script modules.
//!
//! Globals are resolved at call time through the defining module's record,
//! which is what makes a reload visible to functions compiled earlier. While a
//! module is being (re)loaded its top level runs against a staging namespace
//! instead, so nothing is published before the load succeeds.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use super::ast::{BinaryOp, Block, Expr, FnDef, Literal, Place, Stmt, UnaryOp};
use crate::error::RuntimeError;
use crate::hotswap::{HotswapProxy, Implementation, PendingSwap};
use crate::registry::ModuleRecord;
use crate::value::{Class, ClassBinding, Function, Instance, Namespace, Value};

/// Maximum number of nested calls.
pub(crate) const MAX_CALL_DEPTH: usize = 128;

/// The not-yet-committed namespace of the module being loaded.
pub(crate) struct Staging<'a> {
    pub(crate) module: &'a Weak<ModuleRecord>,
    pub(crate) namespace: &'a Namespace,
    /// Proxies of the module's hotswap definitions, with the staged
    /// implementations they will receive on commit.
    pub(crate) pending: &'a [PendingSwap],
}

/// Non-local control flow, carried through `Err` so `?` unwinds it.
enum Flow {
    Break(Value),
    Continue,
    Return(Value),
    Error(RuntimeError),
}

impl Flow {
    /// Converts flow that escaped its construct into an error.
    fn into_error(self) -> RuntimeError {
        match self {
            Self::Error(err) => err,
            Self::Break(_) => RuntimeError::ControlFlow {
                keyword: "break",
                context: "a loop",
            },
            Self::Continue => RuntimeError::ControlFlow {
                keyword: "continue",
                context: "a loop",
            },
            Self::Return(_) => RuntimeError::ControlFlow {
                keyword: "return",
                context: "a function",
            },
        }
    }
}

impl From<RuntimeError> for Flow {
    fn from(err: RuntimeError) -> Self {
        Self::Error(err)
    }
}

type Eval<T = Value> = Result<T, Flow>;

/// Locals of one call, plus where its globals come from.
struct Frame<'f> {
    module: &'f Weak<ModuleRecord>,
    module_name: &'f str,
    locals: Vec<(String, Value)>,
}

impl<'f> Frame<'f> {
    const fn new(module: &'f Weak<ModuleRecord>, module_name: &'f str) -> Self {
        Self {
            module,
            module_name,
            locals: Vec::new(),
        }
    }

    fn local(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value)
    }

    fn local_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.locals
            .iter_mut()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value)
    }

    fn undefined(&self, name: &str) -> RuntimeError {
        RuntimeError::UndefinedName {
            name: name.to_string(),
            module: self.module_name.to_string(),
        }
    }
}

/// An assignable location after its base was evaluated.
enum Target<'p> {
    Local(&'p str),
    Field(Arc<Instance>, &'p str),
}

pub(crate) struct Interpreter<'a> {
    staging: Option<Staging<'a>>,
    depth: usize,
}

impl Interpreter<'static> {
    pub(crate) const fn new() -> Self {
        Self {
            staging: None,
            depth: 0,
        }
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) const fn staged(staging: Staging<'a>) -> Self {
        Self {
            staging: Some(staging),
            depth: 0,
        }
    }

    /// Evaluates a `const`/`static` initializer of `module`.
    pub(crate) fn eval_item(
        &mut self,
        module: &Weak<ModuleRecord>,
        module_name: &str,
        expr: &Expr,
    ) -> Result<Value, RuntimeError> {
        let mut frame = Frame::new(module, module_name);
        self.eval(&mut frame, expr).map_err(Flow::into_error)
    }

    /// Calls a function, a class (through `new`) or a proxy.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(f) => self.invoke(f.def(), f.module(), f.module_name(), None, args),
            Value::Class(class) => self.call_assoc(class, "new", args),
            Value::Proxy(proxy) => match &*self.dispatch(proxy)? {
                Implementation::Function(f) => {
                    self.invoke(f.def(), f.module(), f.module_name(), None, args)
                }
                Implementation::Class(class) => self.call_assoc(class, "new", args),
            },
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Calls an associated function (no receiver) of a class.
    pub(crate) fn call_assoc(
        &mut self,
        class: &Class,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let Some(def) = class.method(name).filter(|def| !def.receiver) else {
            return Err(RuntimeError::NoMethod {
                target: format!("struct `{}`", class.name()),
                method: name.to_string(),
            });
        };
        self.invoke(def, class.module(), class.module_name(), None, args)
    }

    /// Calls a method on an instance through its current class.
    pub(crate) fn call_method(
        &mut self,
        instance: &Arc<Instance>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let class = self.class_of(instance)?;
        let Some(def) = class.method(name).filter(|def| def.receiver) else {
            return Err(RuntimeError::NoMethod {
                target: format!("`{}` instance", class.name()),
                method: name.to_string(),
            });
        };
        let receiver = Value::Instance(Arc::clone(instance));
        self.invoke(def, class.module(), class.module_name(), Some(receiver), args)
    }

    fn invoke(
        &mut self,
        def: &FnDef,
        module: &Weak<ModuleRecord>,
        module_name: &str,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if args.len() != def.arity() {
            return Err(RuntimeError::Arity {
                function: def.name.clone(),
                expected: def.arity(),
                found: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::RecursionLimit {
                limit: MAX_CALL_DEPTH,
            });
        }

        let mut frame = Frame::new(module, module_name);
        if let Some(receiver) = receiver {
            frame.locals.push(("self".to_string(), receiver));
        }
        for (param, arg) in def.params.iter().zip(args) {
            if let Some(param) = param {
                frame.locals.push((param.clone(), arg));
            }
        }

        self.depth += 1;
        let result = self.eval_block(&mut frame, &def.body);
        self.depth -= 1;

        match result {
            Ok(value) | Err(Flow::Return(value)) => Ok(value),
            Err(flow) => Err(flow.into_error()),
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn eval(&mut self, frame: &mut Frame<'_>, expr: &Expr) -> Eval {
        match expr {
            Expr::Lit(lit) => Ok(literal(lit)),
            Expr::Name(name) => Ok(self.lookup(frame, name)?),
            Expr::Assoc(class, name) => Ok(self.assoc(frame, class, name)?),
            Expr::Unary(op, operand) => {
                let value = self.eval(frame, operand)?;
                Ok(unary(*op, &value)?)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                Ok(binary(*op, &left, &right)?)
            }
            Expr::And(left, right) => Ok(Value::Bool(
                self.condition(frame, left, "`&&` operand")?
                    && self.condition(frame, right, "`&&` operand")?,
            )),
            Expr::Or(left, right) => Ok(Value::Bool(
                self.condition(frame, left, "`||` operand")?
                    || self.condition(frame, right, "`||` operand")?,
            )),
            Expr::Assign(place, value) => {
                let target = self.place(frame, place)?;
                let value = self.eval(frame, value)?;
                store(frame, target, value)?;
                Ok(Value::Unit)
            }
            Expr::CompoundAssign(op, place, value) => {
                let target = self.place(frame, place)?;
                let current = load(frame, &target)?;
                let rhs = self.eval(frame, value)?;
                store(frame, target, binary(*op, &current, &rhs)?)?;
                Ok(Value::Unit)
            }
            Expr::Field(base, name) => {
                let base = self.eval(frame, base)?;
                Ok(field(&base, name)?)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(frame, callee)?;
                let args = self.eval_args(frame, args)?;
                Ok(self.call_value(&callee, args)?)
            }
            Expr::MethodCall(receiver, method, args) => {
                let receiver = self.eval(frame, receiver)?;
                let args = self.eval_args(frame, args)?;
                match &receiver {
                    Value::Instance(instance) => Ok(self.call_method(instance, method, args)?),
                    other => Err(RuntimeError::NoMethod {
                        target: other.type_name().to_string(),
                        method: method.clone(),
                    }
                    .into()),
                }
            }
            Expr::Construct(class, fields) => self.construct(frame, class, fields),
            Expr::If(cond, then, otherwise) => {
                if self.condition(frame, cond, "`if` condition")? {
                    self.eval_block(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(frame, otherwise)
                } else {
                    Ok(Value::Unit)
                }
            }
            Expr::While(cond, body) => self.while_loop(frame, cond, body),
            Expr::Loop(body) => self.loop_forever(frame, body),
            Expr::For {
                var,
                start,
                end,
                inclusive,
                body,
            } => self.for_range(frame, var.as_deref(), start, end, *inclusive, body),
            Expr::Block(block) => self.eval_block(frame, block),
            Expr::Break(value) => Err(Flow::Break(self.eval_opt(frame, value.as_deref())?)),
            Expr::Continue => Err(Flow::Continue),
            Expr::Return(value) => Err(Flow::Return(self.eval_opt(frame, value.as_deref())?)),
            Expr::Panic(message) => Err(RuntimeError::Panic {
                message: message.clone(),
            }
            .into()),
        }
    }

    fn eval_opt(&mut self, frame: &mut Frame<'_>, expr: Option<&Expr>) -> Eval {
        match expr {
            Some(expr) => self.eval(frame, expr),
            None => Ok(Value::Unit),
        }
    }

    fn eval_args(&mut self, frame: &mut Frame<'_>, args: &[Expr]) -> Eval<Vec<Value>> {
        args.iter().map(|arg| self.eval(frame, arg)).collect()
    }

    fn condition(&mut self, frame: &mut Frame<'_>, expr: &Expr, context: &'static str) -> Eval<bool> {
        let value = self.eval(frame, expr)?;
        value.as_bool().ok_or_else(|| {
            RuntimeError::TypeError {
                expected: "bool",
                found: value.type_name(),
                context,
            }
            .into()
        })
    }

    fn eval_block(&mut self, frame: &mut Frame<'_>, block: &Block) -> Eval {
        let mark = frame.locals.len();
        let result = self.run_block(frame, block);
        frame.locals.truncate(mark);
        result
    }

    fn run_block(&mut self, frame: &mut Frame<'_>, block: &Block) -> Eval {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Let { name, init } => {
                    let value = self.eval_opt(frame, init.as_ref())?;
                    if let Some(name) = name {
                        frame.locals.push((name.clone(), value));
                    }
                }
                Stmt::Expr(expr) => {
                    self.eval(frame, expr)?;
                }
            }
        }
        self.eval_opt(frame, block.tail.as_deref())
    }

    // ------------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------------

    fn while_loop(&mut self, frame: &mut Frame<'_>, cond: &Expr, body: &Block) -> Eval {
        while self.condition(frame, cond, "`while` condition")? {
            match self.eval_block(frame, body) {
                Ok(_) | Err(Flow::Continue) => {}
                Err(Flow::Break(_)) => break,
                Err(flow) => return Err(flow),
            }
        }
        Ok(Value::Unit)
    }

    fn loop_forever(&mut self, frame: &mut Frame<'_>, body: &Block) -> Eval {
        loop {
            match self.eval_block(frame, body) {
                Ok(_) | Err(Flow::Continue) => {}
                Err(Flow::Break(value)) => return Ok(value),
                Err(flow) => return Err(flow),
            }
        }
    }

    fn for_range(
        &mut self,
        frame: &mut Frame<'_>,
        var: Option<&str>,
        start: &Expr,
        end: &Expr,
        inclusive: bool,
        body: &Block,
    ) -> Eval {
        let mut current = self.range_bound(frame, start)?;
        let end = self.range_bound(frame, end)?;
        let mark = frame.locals.len();

        while if inclusive { current <= end } else { current < end } {
            if let Some(var) = var {
                frame.locals.push((var.to_string(), Value::Int(current)));
            }
            let result = self.eval_block(frame, body);
            frame.locals.truncate(mark);
            match result {
                Ok(_) | Err(Flow::Continue) => {}
                Err(Flow::Break(_)) => break,
                Err(flow) => return Err(flow),
            }
            match current.checked_add(1) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Value::Unit)
    }

    fn range_bound(&mut self, frame: &mut Frame<'_>, expr: &Expr) -> Eval<i64> {
        let value = self.eval(frame, expr)?;
        value.as_int().ok_or_else(|| {
            RuntimeError::TypeError {
                expected: "int",
                found: value.type_name(),
                context: "range bound",
            }
            .into()
        })
    }

    // ------------------------------------------------------------------------
    // Names, classes and places
    // ------------------------------------------------------------------------

    fn lookup(&self, frame: &Frame<'_>, name: &str) -> Result<Value, RuntimeError> {
        match frame.local(name) {
            Some(value) => Ok(value.clone()),
            None => self.global(frame, name),
        }
    }

    fn global(&self, frame: &Frame<'_>, name: &str) -> Result<Value, RuntimeError> {
        if let Some(staging) = &self.staging
            && Weak::ptr_eq(staging.module, frame.module)
        {
            return staging
                .namespace
                .get(name)
                .cloned()
                .ok_or_else(|| frame.undefined(name));
        }

        let module = frame
            .module
            .upgrade()
            .ok_or_else(|| RuntimeError::ModuleUnloaded {
                module: frame.module_name.to_string(),
            })?;
        module.get(name).ok_or_else(|| frame.undefined(name))
    }

    fn pending(&self, proxy: &Arc<HotswapProxy>) -> Option<&PendingSwap> {
        self.staging
            .as_ref()?
            .pending
            .iter()
            .find(|pending| Arc::ptr_eq(&pending.proxy, proxy))
    }

    /// What a call through `proxy` runs, staged implementations first.
    fn dispatch(&self, proxy: &Arc<HotswapProxy>) -> Result<Arc<Implementation>, RuntimeError> {
        match self.pending(proxy) {
            Some(pending) => Ok(Arc::clone(&pending.implementation)),
            None => proxy.checked(),
        }
    }

    fn class_of(&self, instance: &Instance) -> Result<Arc<Class>, RuntimeError> {
        if let Some(pending) = instance.proxy().and_then(|proxy| self.pending(proxy))
            && let Implementation::Class(class) = &*pending.implementation
        {
            return Ok(Arc::clone(class));
        }
        instance.class()
    }

    fn resolve_class(
        &self,
        frame: &Frame<'_>,
        name: &str,
    ) -> Result<(ClassBinding, Arc<Class>), RuntimeError> {
        let not_a_class = || RuntimeError::NotAClass {
            name: name.to_string(),
        };
        match self.global(frame, name)? {
            Value::Class(class) => Ok((ClassBinding::Plain(Arc::clone(&class)), class)),
            Value::Proxy(proxy) => match &*self.dispatch(&proxy)? {
                Implementation::Class(class) => {
                    Ok((ClassBinding::Proxy(Arc::clone(&proxy)), Arc::clone(class)))
                }
                Implementation::Function(_) => Err(not_a_class()),
            },
            _ => Err(not_a_class()),
        }
    }

    /// `Type::name` as a callable value.
    fn assoc(&self, frame: &Frame<'_>, class: &str, name: &str) -> Result<Value, RuntimeError> {
        let (_, class) = self.resolve_class(frame, class)?;
        let Some(def) = class.method(name).filter(|def| !def.receiver) else {
            return Err(RuntimeError::NoMethod {
                target: format!("struct `{}`", class.name()),
                method: name.to_string(),
            });
        };
        Ok(Value::Function(Arc::new(Function::new(
            Arc::clone(def),
            class.module().clone(),
            class.module_name(),
        ))))
    }

    fn construct(
        &mut self,
        frame: &mut Frame<'_>,
        class: &str,
        fields: &[(String, Expr)],
    ) -> Eval {
        let (binding, _) = self.resolve_class(frame, class)?;
        let mut values = BTreeMap::new();
        for (name, expr) in fields {
            let value = self.eval(frame, expr)?;
            values.insert(name.clone(), value);
        }
        let instance = Instance::new(binding, values);
        if let Some(pending) = instance.proxy().and_then(|proxy| self.pending(proxy)) {
            pending.track(&instance);
        }
        Ok(Value::Instance(instance))
    }

    fn place<'p>(&mut self, frame: &mut Frame<'_>, place: &'p Place) -> Eval<Target<'p>> {
        match place {
            Place::Local(name) => Ok(Target::Local(name)),
            Place::Field(base, name) => match self.eval(frame, base)? {
                Value::Instance(instance) => Ok(Target::Field(instance, name)),
                other => Err(RuntimeError::TypeError {
                    expected: "instance",
                    found: other.type_name(),
                    context: "field assignment",
                }
                .into()),
            },
        }
    }
}

fn load(frame: &Frame<'_>, target: &Target<'_>) -> Result<Value, RuntimeError> {
    match target {
        Target::Local(name) => frame.local(name).cloned().ok_or_else(|| frame.undefined(name)),
        Target::Field(instance, name) => field_of(instance, name),
    }
}

fn store(frame: &mut Frame<'_>, target: Target<'_>, value: Value) -> Result<(), RuntimeError> {
    match target {
        Target::Local(name) => match frame.local_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(frame.undefined(name)),
        },
        Target::Field(instance, name) => {
            instance.set_field(name, value);
            Ok(())
        }
    }
}

fn field(base: &Value, name: &str) -> Result<Value, RuntimeError> {
    match base {
        Value::Instance(instance) => field_of(instance, name),
        other => Err(RuntimeError::TypeError {
            expected: "instance",
            found: other.type_name(),
            context: "field access",
        }),
    }
}

fn field_of(instance: &Instance, name: &str) -> Result<Value, RuntimeError> {
    instance.field(name).ok_or_else(|| RuntimeError::NoField {
        class: instance.class_name(),
        field: name.to_string(),
    })
}

// ----------------------------------------------------------------------------
// Operators
// ----------------------------------------------------------------------------

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Unit => Value::Unit,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(x) => Value::Float(*x),
        Literal::Str(s) => Value::Str(Arc::clone(s)),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(RuntimeError::Overflow { op: "-" }),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Not, Value::Int(n)) => Ok(Value::Int(!n)),
        (UnaryOp::Neg, other) => Err(RuntimeError::TypeError {
            expected: "number",
            found: other.type_name(),
            context: "negation",
        }),
        (UnaryOp::Not, other) => Err(RuntimeError::TypeError {
            expected: "bool or int",
            found: other.type_name(),
            context: "`!` operand",
        }),
    }
}

#[allow(clippy::cast_precision_loss)]
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (op, left, right) {
        (BinaryOp::Eq, ..) => Ok(Value::Bool(left == right)),
        (BinaryOp::Ne, ..) => Ok(Value::Bool(left != right)),
        (_, Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
        (_, Value::Float(a), Value::Float(b)) => float_op(op, *a, *b),
        (_, Value::Int(a), Value::Float(b)) => float_op(op, *a as f64, *b),
        (_, Value::Float(a), Value::Int(b)) => float_op(op, *a, *b as f64),
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}").into())),
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Value::Str(a), Value::Str(b)) => {
            Ok(Value::Bool(compare(op, a.cmp(b))))
        }
        _ => Err(RuntimeError::TypeMismatch {
            op: op.symbol(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let overflow = || RuntimeError::Overflow { op: op.symbol() };
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(RuntimeError::DivisionByZero),
        BinaryOp::Div => a.checked_div(b).ok_or_else(overflow)?,
        BinaryOp::Rem => a.checked_rem(b).ok_or_else(overflow)?,
        _ => return Ok(Value::Bool(compare(op, a.cmp(&b)))),
    };
    Ok(Value::Int(result))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<Value, RuntimeError> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => {
            // NaN compares false with everything
            return Ok(Value::Bool(
                a.partial_cmp(&b).is_some_and(|ordering| compare(op, ordering)),
            ));
        }
    };
    Ok(Value::Float(result))
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        BinaryOp::Ne => ordering.is_ne(),
        _ => ordering.is_eq(),
    }
}
