//! Owned, thread-safe representation of a compiled script module.
//!
//! `syn` syntax trees are tied to the parsing thread, so compilation lowers
//! them into these types, which can be shared freely between the watcher
//! thread, execution contexts and application threads.

#![allow(missing_docs, reason = "node names follow the Rust syntax they lower from")]

use std::sync::Arc;

/// A compiled script module.
#[derive(Debug, Clone)]
pub struct ModuleAst {
    /// Top-level items in source order.
    pub items: Vec<Item>,

    /// Whether the module opted into auto-wrapping (`const HOTSWAP: bool = true;`).
    pub auto_wrap: bool,
}

impl ModuleAst {
    /// Names of all top-level definitions, in source order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(Item::name)
    }
}

/// A top-level definition.
#[derive(Debug, Clone)]
pub enum Item {
    /// A free function.
    Function(Arc<FnDef>),

    /// A `struct` together with the methods of its `impl` blocks.
    Class(Arc<ClassDecl>),

    /// A `const` or `static` evaluated at load time.
    Value {
        /// Binding name.
        name: String,
        /// Initializer expression.
        expr: Expr,
    },
}

impl Item {
    /// The name bound by this item.
    pub fn name(&self) -> &str {
        match self {
            Self::Function(def) => &def.name,
            Self::Class(decl) => &decl.name,
            Self::Value { name, .. } => name,
        }
    }
}

/// A function or method body.
#[derive(Debug, Clone)]
pub struct FnDef {
    pub name: String,

    /// Whether the function takes `self` (methods only).
    pub receiver: bool,

    /// Parameter names, excluding the receiver. `None` for `_` patterns.
    pub params: Vec<Option<String>>,

    pub body: Block,

    /// Marked with `#[hotswap]`.
    pub hotswap: bool,
}

impl FnDef {
    /// Number of arguments a caller has to supply.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A class: struct declaration plus methods.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<String>,
    pub methods: Vec<Arc<FnDef>>,
    pub hotswap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Trailing expression without a semicolon, the value of the block.
    pub tail: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        name: Option<String>,
        init: Option<Expr>,
    },
    Expr(Expr),
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Operator symbol, used in error messages.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Assignable locations.
#[derive(Debug, Clone)]
pub enum Place {
    Local(String),
    Field(Box<Expr>, String),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Lit(Literal),
    Name(String),
    /// `Type::name`, with `Self` already resolved to the enclosing class.
    Assoc(String, String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Assign(Place, Box<Expr>),
    CompoundAssign(BinaryOp, Place, Box<Expr>),
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    /// Struct literal: class name and field initializers.
    Construct(String, Vec<(String, Expr)>),
    If(Box<Expr>, Block, Option<Box<Expr>>),
    While(Box<Expr>, Block),
    Loop(Block),
    For {
        var: Option<String>,
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
        body: Block,
    },
    Block(Block),
    Break(Option<Box<Expr>>),
    Continue,
    Return(Option<Box<Expr>>),
    Panic(String),
}
