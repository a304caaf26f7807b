//! Runtime values of script modules.
//!
//! [`Value`] is what script code computes with and what the host sees when it
//! reads a module namespace. Scalars compare by value; functions, classes,
//! proxies and instances compare by identity.
//!
//! # Example
//!
//! ```rust,ignore
//! use hotreload::Value;
//!
//! let adder = registry.module("app::math").unwrap().get("adder").unwrap();
//! assert_eq!(adder.call(&[2.into(), 3.into()])?, Value::Int(5));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::RuntimeError;
use crate::hotswap::{HotswapProxy, Implementation};
use crate::registry::ModuleRecord;
use crate::script::ast::{ClassDecl, FnDef};
use crate::script::eval::Interpreter;

// ============================================================================
// Macros for reducing boilerplate
// ============================================================================

/// Generates `From<T>` implementations for scalar values
macro_rules! impl_from_scalar {
    ($($t:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

// ============================================================================
// Value
// ============================================================================

/// A script value.
///
/// | Variant | Script source |
/// |---------|---------------|
/// | `Unit` | `()`, blocks without a tail |
/// | `Bool` | `true`, comparisons |
/// | `Int` | integer literals (checked `i64` arithmetic) |
/// | `Float` | float literals, mixed arithmetic |
/// | `Str` | string literals, `+` concatenation |
/// | `Function` | `fn` items without hotswap marking |
/// | `Class` | `struct` items without hotswap marking |
/// | `Proxy` | hotswap-marked `fn` / `struct` items |
/// | `Instance` | struct literals |
#[derive(Clone)]
pub enum Value {
    /// The unit value `()`.
    Unit,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// A plain function.
    Function(Arc<Function>),
    /// A plain class.
    Class(Arc<Class>),
    /// A stable reference to a hot-swappable function or class.
    Proxy(Arc<HotswapProxy>),
    /// A class instance.
    Instance(Arc<Instance>),
}

impl_from_scalar! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    &str => Str,
    String => Str,
}

impl Value {
    /// Name of the value's type, as used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Unit => "()",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Function(_) => "fn",
            Self::Class(_) => "struct",
            Self::Proxy(_) => "hotswap proxy",
            Self::Instance(_) => "instance",
        }
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the number as a float. Integers are converted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the proxy, if this is a hotswap proxy.
    #[must_use]
    pub const fn as_proxy(&self) -> Option<&Arc<HotswapProxy>> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the instance, if this is one.
    #[must_use]
    pub const fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Whether calling this value is possible.
    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Class(_) | Self::Proxy(_))
    }

    /// Calls a function, or constructs an instance through a class's `new`.
    ///
    /// Proxies dispatch to their current implementation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the value is not callable or the call fails.
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        Interpreter::new().call_value(self, args.to_vec())
    }

    /// Calls an associated function of a class, like `Type::name(args)`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the value is not a class, the function is
    /// missing, or the call fails.
    pub fn class_call(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let class = match self {
            Self::Class(class) => Arc::clone(class),
            Self::Proxy(proxy) => match &*proxy.checked()? {
                Implementation::Class(class) => Arc::clone(class),
                Implementation::Function(f) => {
                    return Err(RuntimeError::NotAClass {
                        name: f.name().to_string(),
                    });
                }
            },
            other => {
                return Err(RuntimeError::NoMethod {
                    target: other.type_name().to_string(),
                    method: name.to_string(),
                });
            }
        };
        Interpreter::new().call_assoc(&class, name, args.to_vec())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Arc::ptr_eq(a, b),
            (Self::Proxy(a), Self::Proxy(b)) => Arc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Function(func) => write!(f, "<fn {}::{}>", func.module_name, func.name()),
            Self::Class(class) => write!(f, "<struct {}::{}>", class.module_name, class.name()),
            Self::Proxy(proxy) => write!(f, "<hotswap {}>", proxy.qualname()),
            Self::Instance(instance) => write!(f, "<{} instance>", instance.class_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Float(x) => write!(f, "{x}"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// The names a module's top level defines, and their values.
#[derive(Clone, Default, PartialEq)]
pub struct Namespace {
    entries: BTreeMap<String, Value>,
}

impl Namespace {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Whether the name is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Defined names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates over `(name, value)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of defined names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

// ============================================================================
// Functions and classes
// ============================================================================

/// A function defined by a script module.
///
/// Globals are resolved through the owning module's *current* namespace at
/// call time, so a function always sees the latest committed definitions.
pub struct Function {
    def: Arc<FnDef>,
    module: Weak<ModuleRecord>,
    module_name: String,
}

impl Function {
    pub(crate) fn new(def: Arc<FnDef>, module: Weak<ModuleRecord>, module_name: &str) -> Self {
        Self {
            def,
            module,
            module_name: module_name.to_string(),
        }
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Name of the module that defined it.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Number of parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.def.arity()
    }

    pub(crate) const fn def(&self) -> &Arc<FnDef> {
        &self.def
    }

    pub(crate) const fn module(&self) -> &Weak<ModuleRecord> {
        &self.module
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("module", &self.module_name)
            .field("name", &self.def.name)
            .field("arity", &self.def.arity())
            .finish()
    }
}

/// A class (a `struct` plus the methods of its `impl` blocks).
pub struct Class {
    decl: Arc<ClassDecl>,
    module: Weak<ModuleRecord>,
    module_name: String,
}

impl Class {
    pub(crate) fn new(decl: Arc<ClassDecl>, module: Weak<ModuleRecord>, module_name: &str) -> Self {
        Self {
            decl,
            module,
            module_name: module_name.to_string(),
        }
    }

    /// Class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Name of the module that defined it.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Declared field names.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.decl.fields
    }

    /// Whether a method or associated function with this name exists.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.method(name).is_some()
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Arc<FnDef>> {
        self.decl.methods.iter().find(|m| m.name == name)
    }

    pub(crate) const fn module(&self) -> &Weak<ModuleRecord> {
        &self.module
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("module", &self.module_name)
            .field("name", &self.decl.name)
            .field("fields", &self.decl.fields)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Instances
// ============================================================================

/// How an instance finds its class.
pub(crate) enum ClassBinding {
    /// Fixed class, never changes.
    Plain(Arc<Class>),
    /// The proxy's current class, so methods follow reloads.
    Proxy(Arc<HotswapProxy>),
}

/// An instance of a script class.
///
/// Field storage is shared: every clone of the [`Value::Instance`] sees the
/// same fields, and reloading the class keeps them.
pub struct Instance {
    binding: ClassBinding,
    fields: RwLock<BTreeMap<String, Value>>,
}

impl Instance {
    pub(crate) fn new(binding: ClassBinding, fields: BTreeMap<String, Value>) -> Arc<Self> {
        let instance = Arc::new(Self {
            binding,
            fields: RwLock::new(fields),
        });
        if let ClassBinding::Proxy(proxy) = &instance.binding {
            proxy.register_instance(&instance);
        }
        instance
    }

    /// The class methods currently dispatch to.
    ///
    /// For instances of a hotswapped class this is the proxy's latest class,
    /// even after the class was removed from its module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotAClass`] if the proxy now holds a function.
    pub fn class(&self) -> Result<Arc<Class>, RuntimeError> {
        match &self.binding {
            ClassBinding::Plain(class) => Ok(Arc::clone(class)),
            ClassBinding::Proxy(proxy) => match &*proxy.implementation() {
                Implementation::Class(class) => Ok(Arc::clone(class)),
                Implementation::Function(_) => Err(RuntimeError::NotAClass {
                    name: proxy.name().to_string(),
                }),
            },
        }
    }

    /// Name of the instance's class.
    #[must_use]
    pub fn class_name(&self) -> String {
        match &self.binding {
            ClassBinding::Plain(class) => class.name().to_string(),
            ClassBinding::Proxy(proxy) => proxy.name().to_string(),
        }
    }

    /// The proxy this instance dispatches through, if any.
    #[must_use]
    pub const fn proxy(&self) -> Option<&Arc<HotswapProxy>> {
        match &self.binding {
            ClassBinding::Proxy(proxy) => Some(proxy),
            ClassBinding::Plain(_) => None,
        }
    }

    /// Reads a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Writes a field, adding it if it does not exist.
    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.write().insert(name.to_string(), value);
    }

    /// Snapshot of all fields.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.fields.read().clone()
    }

    /// Calls a `&self` / `&mut self` method through the current class.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the method is missing or fails.
    pub fn call_method(
        self: &Arc<Self>,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        Interpreter::new().call_method(self, name, args.to_vec())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class_name())
            .field("fields", &*self.fields.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(String::from("x")), Value::Str("x".into()));
        assert_eq!(Value::Int(2).as_float(), Some(2.0));
        assert_eq!(Value::Bool(true).as_int(), None);
    }

    #[test]
    fn test_scalar_equality_is_by_value() {
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Unit, Value::Bool(false));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("text").to_string(), "text");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Unit.to_string(), "()");
        assert_eq!(format!("{:?}", Value::from("q")), "\"q\"");
    }

    #[test]
    fn test_namespace_basics() {
        let mut ns = Namespace::new();
        assert!(ns.is_empty());
        ns.insert("b", Value::Int(2));
        ns.insert("a", Value::Int(1));
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(ns.get("a"), Some(&Value::Int(1)));
        assert!(!ns.contains("c"));
        assert_eq!(ns.len(), 2);
    }

    #[test]
    fn test_calling_a_scalar_fails() {
        let err = Value::Int(1).call(&[]).unwrap_err();
        assert!(matches!(err, RuntimeError::NotCallable { type_name: "int" }));
    }
}
