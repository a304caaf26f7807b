//! Lowering from `syn` syntax trees to the script IR.

use std::collections::HashMap;
use std::sync::Arc;

use syn::spanned::Spanned;
use syn::{BinOp, FnArg, ImplItem, Lit, Member, Pat, RangeLimits, UnOp};

use super::ast::{
    BinaryOp, Block, ClassDecl, Expr, FnDef, Item, Literal, ModuleAst, Place, Stmt, UnaryOp,
};
use super::error::{CompileError, ErrorContext};

/// Name of the module-level auto-wrap flag.
pub const HOTSWAP_FLAG: &str = "HOTSWAP";

/// Attribute marking a single definition as hot-swappable.
pub const HOTSWAP_ATTR: &str = "hotswap";

type LowerResult<T> = Result<T, CompileError>;

/// Top-level item before `impl` blocks are merged into their structs.
enum Pending {
    Function(FnDef),
    Class(ClassDecl),
    Value { name: String, expr: Expr },
}

pub(crate) fn lower_file(file: &syn::File, errors: &ErrorContext<'_>) -> LowerResult<ModuleAst> {
    let mut lowerer = Lowerer {
        errors,
        self_class: None,
    };

    let mut pending: Vec<Pending> = Vec::with_capacity(file.items.len());
    let mut defined: HashMap<String, usize> = HashMap::new();
    let mut impls = Vec::new();
    let mut auto_wrap = false;

    for item in &file.items {
        let (name, span, lowered) = match item {
            syn::Item::Fn(item_fn) => {
                let def = lowerer.function(&item_fn.attrs, &item_fn.sig, &item_fn.block)?;
                (def.name.clone(), item_fn.sig.ident.span(), Pending::Function(def))
            }
            syn::Item::Struct(item_struct) => {
                let decl = lowerer.class(item_struct)?;
                (decl.name.clone(), item_struct.ident.span(), Pending::Class(decl))
            }
            syn::Item::Const(item_const) => {
                if item_const.ident == HOTSWAP_FLAG {
                    auto_wrap = is_true_literal(&item_const.expr);
                }
                let expr = lowerer.expr(&item_const.expr)?;
                let name = item_const.ident.to_string();
                (
                    name.clone(),
                    item_const.ident.span(),
                    Pending::Value { name, expr },
                )
            }
            syn::Item::Static(item_static) => {
                if item_static.ident == HOTSWAP_FLAG {
                    auto_wrap = is_true_literal(&item_static.expr);
                }
                let expr = lowerer.expr(&item_static.expr)?;
                let name = item_static.ident.to_string();
                (
                    name.clone(),
                    item_static.ident.span(),
                    Pending::Value { name, expr },
                )
            }
            syn::Item::Impl(item_impl) => {
                impls.push(item_impl);
                continue;
            }
            other => return Err(errors.unsupported(item_kind(other), other.span())),
        };

        if defined.insert(name.clone(), pending.len()).is_some() {
            return Err(errors.duplicate(name, span));
        }
        pending.push(lowered);
    }

    for item_impl in impls {
        let (class_name, methods) = lowerer.impl_block(item_impl)?;
        let decl = match defined.get(&class_name).map(|&index| &mut pending[index]) {
            Some(Pending::Class(decl)) => decl,
            _ => {
                return Err(errors.unsupported(
                    format!("impl for `{class_name}`, which is not a struct of this module"),
                    item_impl.self_ty.span(),
                ));
            }
        };
        if has_hotswap_attr(&item_impl.attrs) {
            decl.hotswap = true;
        }
        for (method, span) in methods {
            if decl.methods.iter().any(|m| m.name == method.name) {
                return Err(errors.duplicate(format!("{class_name}::{}", method.name), span));
            }
            decl.methods.push(Arc::new(method));
        }
    }

    let items = pending
        .into_iter()
        .map(|item| match item {
            Pending::Function(def) => Item::Function(Arc::new(def)),
            Pending::Class(decl) => Item::Class(Arc::new(decl)),
            Pending::Value { name, expr } => Item::Value { name, expr },
        })
        .collect();

    Ok(ModuleAst { items, auto_wrap })
}

fn is_true_literal(expr: &syn::Expr) -> bool {
    matches!(expr, syn::Expr::Lit(syn::ExprLit { lit: Lit::Bool(b), .. }) if b.value)
}

fn has_hotswap_attr(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(HOTSWAP_ATTR))
}

const fn item_kind(item: &syn::Item) -> &'static str {
    match item {
        syn::Item::Use(_) => "use declaration",
        syn::Item::Mod(_) => "module declaration",
        syn::Item::Enum(_) => "enum",
        syn::Item::Trait(_) | syn::Item::TraitAlias(_) => "trait",
        syn::Item::Type(_) => "type alias",
        syn::Item::Union(_) => "union",
        syn::Item::Macro(_) => "macro invocation at module level",
        syn::Item::ExternCrate(_) | syn::Item::ForeignMod(_) => "extern item",
        _ => "item",
    }
}

const fn expr_kind(expr: &syn::Expr) -> &'static str {
    match expr {
        syn::Expr::Array(_) | syn::Expr::Repeat(_) => "array",
        syn::Expr::Tuple(_) => "tuple",
        syn::Expr::Index(_) => "indexing",
        syn::Expr::Match(_) => "match expression",
        syn::Expr::Closure(_) => "closure",
        syn::Expr::Cast(_) => "cast",
        syn::Expr::Async(_) | syn::Expr::Await(_) => "async code",
        syn::Expr::Try(_) | syn::Expr::TryBlock(_) => "`?` operator",
        syn::Expr::Let(_) => "`let` condition",
        syn::Expr::Range(_) => "range outside of a for loop",
        syn::Expr::Unsafe(_) => "unsafe block",
        _ => "expression",
    }
}

struct Lowerer<'a> {
    errors: &'a ErrorContext<'a>,
    /// Class whose `impl` block is being lowered, for resolving `Self`.
    self_class: Option<String>,
}

impl Lowerer<'_> {
    fn unsupported<T: Spanned>(&self, construct: impl Into<String>, node: &T) -> CompileError {
        self.errors.unsupported(construct, node.span())
    }

    fn class(&self, item: &syn::ItemStruct) -> LowerResult<ClassDecl> {
        if !item.generics.params.is_empty() {
            return Err(self.unsupported("generic struct", &item.generics));
        }
        let fields = match &item.fields {
            syn::Fields::Named(named) => named
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref().map(ToString::to_string))
                .collect(),
            syn::Fields::Unit => Vec::new(),
            syn::Fields::Unnamed(unnamed) => {
                return Err(self.unsupported("tuple struct", unnamed));
            }
        };
        Ok(ClassDecl {
            name: item.ident.to_string(),
            fields,
            methods: Vec::new(),
            hotswap: has_hotswap_attr(&item.attrs),
        })
    }

    fn impl_block(
        &mut self,
        item: &syn::ItemImpl,
    ) -> LowerResult<(String, Vec<(FnDef, proc_macro2::Span)>)> {
        if let Some((_, path, _)) = &item.trait_ {
            return Err(self.unsupported("trait implementation", path));
        }
        if !item.generics.params.is_empty() {
            return Err(self.unsupported("generic impl", &item.generics));
        }
        let class_name = match &*item.self_ty {
            syn::Type::Path(type_path) if type_path.qself.is_none() => type_path
                .path
                .get_ident()
                .map(ToString::to_string)
                .ok_or_else(|| self.unsupported("impl target", &item.self_ty))?,
            other => return Err(self.unsupported("impl target", other)),
        };

        self.self_class = Some(class_name.clone());
        let mut methods = Vec::new();
        for impl_item in &item.items {
            match impl_item {
                ImplItem::Fn(method) => {
                    let def = self.function(&method.attrs, &method.sig, &method.block);
                    match def {
                        Ok(def) => methods.push((def, method.sig.ident.span())),
                        Err(err) => {
                            self.self_class = None;
                            return Err(err);
                        }
                    }
                }
                other => {
                    self.self_class = None;
                    return Err(self.unsupported("impl item other than a method", other));
                }
            }
        }
        self.self_class = None;
        Ok((class_name, methods))
    }

    fn function(
        &self,
        attrs: &[syn::Attribute],
        sig: &syn::Signature,
        block: &syn::Block,
    ) -> LowerResult<FnDef> {
        if !sig.generics.params.is_empty() {
            return Err(self.unsupported("generic function", &sig.generics));
        }
        if let Some(asyncness) = &sig.asyncness {
            return Err(self.unsupported("async function", asyncness));
        }

        let mut receiver = false;
        let mut params = Vec::with_capacity(sig.inputs.len());
        for input in &sig.inputs {
            match input {
                FnArg::Receiver(recv) => {
                    if self.self_class.is_none() {
                        return Err(self.unsupported("`self` parameter outside of an impl", recv));
                    }
                    receiver = true;
                }
                FnArg::Typed(pat_type) => params.push(self.binding(&pat_type.pat)?),
            }
        }

        Ok(FnDef {
            name: sig.ident.to_string(),
            receiver,
            params,
            body: self.block(block)?,
            hotswap: has_hotswap_attr(attrs),
        })
    }

    fn binding(&self, pat: &Pat) -> LowerResult<Option<String>> {
        match pat {
            Pat::Ident(ident) if ident.subpat.is_none() && ident.by_ref.is_none() => {
                Ok(Some(ident.ident.to_string()))
            }
            Pat::Wild(_) => Ok(None),
            Pat::Type(pat_type) => self.binding(&pat_type.pat),
            other => Err(self.unsupported("pattern", other)),
        }
    }

    fn block(&self, block: &syn::Block) -> LowerResult<Block> {
        let mut lowered = Block::default();
        let last = block.stmts.len().saturating_sub(1);

        for (index, stmt) in block.stmts.iter().enumerate() {
            let (expr, has_semi) = match stmt {
                syn::Stmt::Local(local) => {
                    let init = match &local.init {
                        Some(init) if init.diverge.is_some() => {
                            return Err(self.unsupported("let-else", local));
                        }
                        Some(init) => Some(self.expr(&init.expr)?),
                        None => None,
                    };
                    lowered.stmts.push(Stmt::Let {
                        name: self.binding(&local.pat)?,
                        init,
                    });
                    continue;
                }
                syn::Stmt::Expr(expr, semi) => (self.expr(expr)?, semi.is_some()),
                syn::Stmt::Macro(stmt_macro) => (
                    self.macro_call(&stmt_macro.mac)?,
                    stmt_macro.semi_token.is_some(),
                ),
                syn::Stmt::Item(item) => return Err(self.unsupported("nested item", item)),
            };

            if index == last && !has_semi {
                lowered.tail = Some(Box::new(expr));
            } else {
                lowered.stmts.push(Stmt::Expr(expr));
            }
        }

        Ok(lowered)
    }

    fn exprs<'e>(&self, exprs: impl IntoIterator<Item = &'e syn::Expr>) -> LowerResult<Vec<Expr>> {
        exprs.into_iter().map(|expr| self.expr(expr)).collect()
    }

    fn boxed(&self, expr: &syn::Expr) -> LowerResult<Box<Expr>> {
        self.expr(expr).map(Box::new)
    }

    fn expr(&self, expr: &syn::Expr) -> LowerResult<Expr> {
        match expr {
            syn::Expr::Lit(lit) => self.literal(&lit.lit).map(Expr::Lit),
            syn::Expr::Path(path) => self.path(path),
            syn::Expr::Paren(paren) => self.expr(&paren.expr),
            syn::Expr::Group(group) => self.expr(&group.expr),
            syn::Expr::Reference(reference) => self.expr(&reference.expr),
            syn::Expr::Tuple(tuple) if tuple.elems.is_empty() => Ok(Expr::Lit(Literal::Unit)),
            syn::Expr::Unary(unary) => {
                let op = match unary.op {
                    UnOp::Neg(_) => UnaryOp::Neg,
                    UnOp::Not(_) => UnaryOp::Not,
                    UnOp::Deref(_) => return self.expr(&unary.expr),
                    _ => return Err(self.unsupported("unary operator", &unary.op)),
                };
                Ok(Expr::Unary(op, self.boxed(&unary.expr)?))
            }
            syn::Expr::Binary(binary) => self.binary(binary),
            syn::Expr::Assign(assign) => Ok(Expr::Assign(
                self.place(&assign.left)?,
                self.boxed(&assign.right)?,
            )),
            syn::Expr::Field(field) => match &field.member {
                Member::Named(ident) => Ok(Expr::Field(self.boxed(&field.base)?, ident.to_string())),
                Member::Unnamed(index) => Err(self.unsupported("tuple field access", index)),
            },
            syn::Expr::Call(call) => Ok(Expr::Call(self.boxed(&call.func)?, self.exprs(&call.args)?)),
            syn::Expr::MethodCall(call) => {
                if let Some(turbofish) = &call.turbofish {
                    return Err(self.unsupported("generic method call", turbofish));
                }
                Ok(Expr::MethodCall(
                    self.boxed(&call.receiver)?,
                    call.method.to_string(),
                    self.exprs(&call.args)?,
                ))
            }
            syn::Expr::Struct(construct) => self.construct(construct),
            syn::Expr::If(expr_if) => {
                let otherwise = match &expr_if.else_branch {
                    Some((_, branch)) => Some(self.boxed(branch)?),
                    None => None,
                };
                Ok(Expr::If(
                    self.boxed(&expr_if.cond)?,
                    self.block(&expr_if.then_branch)?,
                    otherwise,
                ))
            }
            syn::Expr::While(expr_while) => {
                if let Some(label) = &expr_while.label {
                    return Err(self.unsupported("loop label", label));
                }
                Ok(Expr::While(
                    self.boxed(&expr_while.cond)?,
                    self.block(&expr_while.body)?,
                ))
            }
            syn::Expr::Loop(expr_loop) => {
                if let Some(label) = &expr_loop.label {
                    return Err(self.unsupported("loop label", label));
                }
                Ok(Expr::Loop(self.block(&expr_loop.body)?))
            }
            syn::Expr::ForLoop(expr_for) => self.for_loop(expr_for),
            syn::Expr::Block(expr_block) => {
                if let Some(label) = &expr_block.label {
                    return Err(self.unsupported("block label", label));
                }
                Ok(Expr::Block(self.block(&expr_block.block)?))
            }
            syn::Expr::Break(expr_break) => {
                if let Some(label) = &expr_break.label {
                    return Err(self.unsupported("labeled break", label));
                }
                let value = match &expr_break.expr {
                    Some(value) => Some(self.boxed(value)?),
                    None => None,
                };
                Ok(Expr::Break(value))
            }
            syn::Expr::Continue(expr_continue) => {
                if let Some(label) = &expr_continue.label {
                    return Err(self.unsupported("labeled continue", label));
                }
                Ok(Expr::Continue)
            }
            syn::Expr::Return(expr_return) => {
                let value = match &expr_return.expr {
                    Some(value) => Some(self.boxed(value)?),
                    None => None,
                };
                Ok(Expr::Return(value))
            }
            syn::Expr::Macro(expr_macro) => self.macro_call(&expr_macro.mac),
            other => Err(self.unsupported(expr_kind(other), other)),
        }
    }

    fn literal(&self, lit: &Lit) -> LowerResult<Literal> {
        match lit {
            Lit::Int(int) => int
                .base10_parse::<i64>()
                .map(Literal::Int)
                .map_err(|err| self.errors.syntax(&err)),
            Lit::Float(float) => float
                .base10_parse::<f64>()
                .map(Literal::Float)
                .map_err(|err| self.errors.syntax(&err)),
            Lit::Bool(b) => Ok(Literal::Bool(b.value)),
            Lit::Str(s) => Ok(Literal::Str(s.value().into())),
            Lit::Char(c) => Ok(Literal::Str(c.value().to_string().into())),
            other => Err(self.unsupported("literal", other)),
        }
    }

    fn resolve_self(&self, name: &str, node: &impl Spanned) -> LowerResult<String> {
        if name != "Self" {
            return Ok(name.to_string());
        }
        self.self_class
            .clone()
            .ok_or_else(|| self.unsupported("`Self` outside of an impl", node))
    }

    fn path_segments(&self, path: &syn::Path) -> LowerResult<Vec<String>> {
        path.segments
            .iter()
            .map(|segment| match segment.arguments {
                syn::PathArguments::None => Ok(segment.ident.to_string()),
                _ => Err(self.unsupported("generic arguments", &segment.arguments)),
            })
            .collect()
    }

    fn path(&self, path: &syn::ExprPath) -> LowerResult<Expr> {
        if let Some(qself) = &path.qself {
            return Err(self.unsupported("qualified path", &qself.ty));
        }
        match self.path_segments(&path.path)?.as_slice() {
            [name] => Ok(Expr::Name(self.resolve_self(name, path)?)),
            [class, assoc] => Ok(Expr::Assoc(self.resolve_self(class, path)?, assoc.clone())),
            _ => Err(self.unsupported("module path", path)),
        }
    }

    fn binary(&self, binary: &syn::ExprBinary) -> LowerResult<Expr> {
        let compound = match binary.op {
            BinOp::AddAssign(_) => Some(BinaryOp::Add),
            BinOp::SubAssign(_) => Some(BinaryOp::Sub),
            BinOp::MulAssign(_) => Some(BinaryOp::Mul),
            BinOp::DivAssign(_) => Some(BinaryOp::Div),
            BinOp::RemAssign(_) => Some(BinaryOp::Rem),
            _ => None,
        };
        if let Some(op) = compound {
            return Ok(Expr::CompoundAssign(
                op,
                self.place(&binary.left)?,
                self.boxed(&binary.right)?,
            ));
        }

        let left = self.boxed(&binary.left)?;
        let right = self.boxed(&binary.right)?;
        let op = match binary.op {
            BinOp::And(_) => return Ok(Expr::And(left, right)),
            BinOp::Or(_) => return Ok(Expr::Or(left, right)),
            BinOp::Add(_) => BinaryOp::Add,
            BinOp::Sub(_) => BinaryOp::Sub,
            BinOp::Mul(_) => BinaryOp::Mul,
            BinOp::Div(_) => BinaryOp::Div,
            BinOp::Rem(_) => BinaryOp::Rem,
            BinOp::Eq(_) => BinaryOp::Eq,
            BinOp::Ne(_) => BinaryOp::Ne,
            BinOp::Lt(_) => BinaryOp::Lt,
            BinOp::Le(_) => BinaryOp::Le,
            BinOp::Gt(_) => BinaryOp::Gt,
            BinOp::Ge(_) => BinaryOp::Ge,
            _ => return Err(self.unsupported("bitwise operator", &binary.op)),
        };
        Ok(Expr::Binary(op, left, right))
    }

    fn place(&self, expr: &syn::Expr) -> LowerResult<Place> {
        match expr {
            syn::Expr::Path(path) if path.qself.is_none() => match path.path.get_ident() {
                Some(ident) => Ok(Place::Local(ident.to_string())),
                None => Err(self.unsupported("assignment target", path)),
            },
            syn::Expr::Field(field) => match &field.member {
                Member::Named(ident) => Ok(Place::Field(self.boxed(&field.base)?, ident.to_string())),
                Member::Unnamed(index) => Err(self.unsupported("tuple field access", index)),
            },
            syn::Expr::Paren(paren) => self.place(&paren.expr),
            syn::Expr::Unary(unary) if matches!(unary.op, UnOp::Deref(_)) => self.place(&unary.expr),
            other => Err(self.unsupported("assignment target", other)),
        }
    }

    fn construct(&self, construct: &syn::ExprStruct) -> LowerResult<Expr> {
        if let Some(rest) = &construct.rest {
            return Err(self.unsupported("struct update syntax", rest));
        }
        if construct.qself.is_some() {
            return Err(self.unsupported("qualified path", &construct.path));
        }
        let class = match self.path_segments(&construct.path)?.as_slice() {
            [name] => self.resolve_self(name, &construct.path)?,
            _ => return Err(self.unsupported("module path", &construct.path)),
        };

        let mut fields = Vec::with_capacity(construct.fields.len());
        for field in &construct.fields {
            let name = match &field.member {
                Member::Named(ident) => ident.to_string(),
                Member::Unnamed(index) => return Err(self.unsupported("tuple field", index)),
            };
            fields.push((name, self.expr(&field.expr)?));
        }
        Ok(Expr::Construct(class, fields))
    }

    fn for_loop(&self, expr_for: &syn::ExprForLoop) -> LowerResult<Expr> {
        if let Some(label) = &expr_for.label {
            return Err(self.unsupported("loop label", label));
        }
        let mut iterable = &*expr_for.expr;
        while let syn::Expr::Paren(paren) = iterable {
            iterable = &paren.expr;
        }
        let syn::Expr::Range(range) = iterable else {
            return Err(self.unsupported("iteration over anything but a range", iterable));
        };
        let (Some(start), Some(end)) = (&range.start, &range.end) else {
            return Err(self.unsupported("open-ended range", range));
        };

        Ok(Expr::For {
            var: self.binding(&expr_for.pat)?,
            start: self.boxed(start)?,
            end: self.boxed(end)?,
            inclusive: matches!(range.limits, RangeLimits::Closed(_)),
            body: self.block(&expr_for.body)?,
        })
    }

    fn macro_call(&self, mac: &syn::Macro) -> LowerResult<Expr> {
        if !mac.path.is_ident("panic") {
            let name = mac
                .path
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect::<Vec<_>>()
                .join("::");
            return Err(self.unsupported(format!("macro `{name}!`"), mac));
        }
        if mac.tokens.is_empty() {
            return Ok(Expr::Panic("explicit panic".to_string()));
        }
        mac.parse_body::<syn::LitStr>()
            .map(|message| Expr::Panic(message.value()))
            .map_err(|_| self.unsupported("panic! arguments other than a string literal", mac))
    }
}
