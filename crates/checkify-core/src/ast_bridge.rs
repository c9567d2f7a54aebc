//! Lowering from the lang-c AST to the inference HIR.
//!
//! Sources are read and parsed as already-preprocessed text so every span
//! is a byte offset into the exact text the rewriter will splice. Shapes
//! the bridge does not model lower to `Opaque` nodes carrying the
//! identifiers they mention; only a failed parse of a whole file is fatal.

use crate::error::{CheckifyError, Result};
use crate::hir::{
    BinOp, CDecl, CExpr, CField, CFunction, CModule, CParam, CRecord, CStmt, CStmtKind, CType,
    CVarDecl, RewriteSite, SourceLoc, Span, UnaryOp,
};
use lang_c::ast;
use lang_c::driver::{parse_preprocessed, Config};
use lang_c::loc::get_location_for_offset;
use lang_c::span::Node;
use lang_c::visit::Visit;
use smallvec::SmallVec;
use std::path::Path;
use tracing::{debug, warn};

/// Parses translation units and lowers them to [`CModule`]s.
pub struct AstBridge {
    config: Config,
}

impl Default for AstBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl AstBridge {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Read and lower one file.
    pub fn lower_file(&self, path: &Path) -> Result<CModule> {
        let source = std::fs::read_to_string(path).map_err(|source| CheckifyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.lower_source(path, source)
    }

    /// Lower source text that is already preprocessed (or self-contained).
    ///
    /// Comments are blanked to spaces before parsing; the parser only
    /// accepts comment-free preprocessor output, and same-length blanking
    /// keeps every span valid for the original text.
    pub fn lower_source(&self, path: &Path, source: String) -> Result<CModule> {
        let stripped = strip_comments(&source);
        let parse = parse_preprocessed(&self.config, stripped).map_err(|e| CheckifyError::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let lowerer = Lowerer {
            file: path.display().to_string(),
            source: &parse.source,
        };
        let mut decls = Vec::new();
        for item in &parse.unit.0 {
            lowerer.lower_external(item, &mut decls);
        }
        debug!(file = %path.display(), decls = decls.len(), "lowered translation unit");
        Ok(CModule {
            file: path.to_path_buf(),
            source,
            decls,
        })
    }
}

/// Overwrite comments with spaces, byte for byte. Newlines inside block
/// comments survive so line numbers stay correct, and string and char
/// literals are skipped so their contents are never mistaken for comments.
fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = source[i + 2..]
                    .find("*/")
                    .map(|p| i + 4 + p)
                    .unwrap_or(bytes.len());
                for b in &mut out[i..end] {
                    if *b != b'\n' {
                        *b = b' ';
                    }
                }
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = source[i..].find('\n').map(|p| i + p).unwrap_or(bytes.len());
                for b in &mut out[i..end] {
                    *b = b' ';
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    // Only ASCII bytes were rewritten, so the result is still UTF-8.
    String::from_utf8_lossy(&out).into_owned()
}

struct Lowerer<'a> {
    file: String,
    source: &'a str,
}

impl<'a> Lowerer<'a> {
    fn loc(&self, offset: usize) -> SourceLoc {
        let (location, _) = get_location_for_offset(self.source, offset);
        let line_start = self.source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        SourceLoc::new(
            self.file.clone(),
            location.line as u32,
            (offset - line_start + 1) as u32,
        )
    }

    fn lower_external(&self, item: &Node<ast::ExternalDeclaration>, out: &mut Vec<CDecl>) {
        match &item.node {
            ast::ExternalDeclaration::Declaration(decl) => self.lower_declaration(decl, out),
            ast::ExternalDeclaration::FunctionDefinition(def) => {
                match self.lower_function_definition(def) {
                    Some(func) => out.push(CDecl::Function(func)),
                    None => out.push(self.opaque_decl(item)),
                }
            }
            ast::ExternalDeclaration::StaticAssert(_) => {}
        }
    }

    fn opaque_decl(&self, item: &Node<ast::ExternalDeclaration>) -> CDecl {
        let mut names = IdentCollector::default();
        names.visit_external_declaration(&item.node, &item.span);
        warn!(file = %self.file, "unmodeled top-level declaration");
        CDecl::Opaque { names: names.0 }
    }

    fn lower_declaration(&self, decl: &Node<ast::Declaration>, out: &mut Vec<CDecl>) {
        let mut spec = self.scan_specifiers(&decl.node.specifiers);
        if let Some(record) = spec.record.take() {
            out.push(CDecl::Record(record));
        }
        if spec.is_typedef {
            // Typedefs contribute no constraint variables; the named type
            // shows up as `CType::Named` wherever it is used.
            return;
        }
        let single = decl.node.declarators.len() == 1;
        for init_decl in &decl.node.declarators {
            let declarator = &init_decl.node.declarator;
            let (ty, name) = build_type(spec.base.clone(), declarator);
            let name = match name {
                Some(name) => name,
                None => continue,
            };
            if let CType::Function { ret, variadic, .. } = ty {
                out.push(CDecl::Function(self.function_prototype(
                    name, *ret, variadic, &spec, declarator,
                )));
                continue;
            }
            let site = if single && ty.is_pointer() {
                self.declaration_site(&spec, declarator, &name)
            } else {
                None
            };
            out.push(CDecl::Global(CVarDecl {
                name,
                ty,
                init: init_decl
                    .node
                    .initializer
                    .as_ref()
                    .and_then(|i| self.lower_initializer(i)),
                loc: self.loc(declarator.span.start),
                is_extern: spec.is_extern,
                is_static: spec.is_static,
                site,
            }));
        }
    }

    /// A declaration like `int *f(char *s);` with no body.
    fn function_prototype(
        &self,
        name: String,
        ret: CType,
        variadic: bool,
        spec: &ScannedSpecifiers,
        declarator: &Node<ast::Declarator>,
    ) -> CFunction {
        let params = self.lower_parameters(declarator);
        CFunction {
            name,
            ret,
            params,
            is_variadic: variadic,
            is_static: spec.is_static,
            is_definition: false,
            loc: self.loc(declarator.span.start),
            ret_site: None,
            body: None,
            body_span: None,
        }
    }

    fn lower_function_definition(&self, def: &Node<ast::FunctionDefinition>) -> Option<CFunction> {
        let spec = self.scan_specifiers(&def.node.specifiers);
        let declarator = &def.node.declarator;
        let (ty, name) = build_type(spec.base.clone(), declarator);
        let name = name?;
        let (ret, _fn_params, variadic) = match ty {
            CType::Function { ret, params, variadic } => (*ret, params, variadic),
            // K&R definitions and other shapes are not modeled.
            _ => return None,
        };
        let params = self.lower_parameters(declarator);
        let ret_site = if ret.is_pointer() {
            self.return_site(&spec, declarator, &name)
        } else {
            None
        };
        let body_span = Span::new(def.node.statement.span.start, def.node.statement.span.end);
        let body = match &def.node.statement.node {
            ast::Statement::Compound(items) => {
                let mut stmts = Vec::new();
                for item in items {
                    self.lower_block_item(item, &mut stmts);
                }
                stmts
            }
            other => vec![self.opaque_stmt_from(other, &def.node.statement.span)],
        };
        Some(CFunction {
            name,
            ret,
            params,
            is_variadic: variadic,
            is_static: spec.is_static,
            is_definition: true,
            loc: self.loc(def.span.start),
            ret_site,
            body: Some(body),
            body_span: Some(body_span),
        })
    }

    /// Parameters with names and rewrite sites, from the declarator's
    /// function suffix.
    fn lower_parameters(&self, declarator: &Node<ast::Declarator>) -> SmallVec<[CParam; 4]> {
        let mut out = SmallVec::new();
        for derived in &declarator.node.derived {
            let fd = match &derived.node {
                ast::DerivedDeclarator::Function(fd) => fd,
                _ => continue,
            };
            for param in &fd.node.parameters {
                let spec = self.scan_parameter_specifiers(&param.node.specifiers);
                let (ty, name) = match &param.node.declarator {
                    Some(d) => build_type(spec.base.clone(), d),
                    None => (spec.base.clone(), None),
                };
                // `void` parameter lists declare nothing.
                if matches!(ty, CType::Void) && name.is_none() {
                    continue;
                }
                let name = name.unwrap_or_else(|| format!("arg{}", out.len()));
                let site = param.node.declarator.as_ref().and_then(|d| {
                    if ty.is_pointer() {
                        self.parameter_site(param, d, &name)
                    } else {
                        None
                    }
                });
                out.push(CParam {
                    name,
                    ty,
                    loc: self.loc(param.span.start),
                    site,
                });
            }
            break;
        }
        out
    }

    fn lower_block_item(&self, item: &Node<ast::BlockItem>, out: &mut Vec<CStmt>) {
        match &item.node {
            ast::BlockItem::Declaration(decl) => self.lower_local_declaration(decl, out),
            ast::BlockItem::Statement(stmt) => out.push(self.lower_statement(stmt)),
            ast::BlockItem::StaticAssert(_) => {}
        }
    }

    fn lower_local_declaration(&self, decl: &Node<ast::Declaration>, out: &mut Vec<CStmt>) {
        let spec = self.scan_specifiers(&decl.node.specifiers);
        if spec.is_typedef {
            return;
        }
        let single = decl.node.declarators.len() == 1;
        for init_decl in &decl.node.declarators {
            let declarator = &init_decl.node.declarator;
            let (ty, name) = build_type(spec.base.clone(), declarator);
            let name = match name {
                Some(name) => name,
                None => continue,
            };
            let site = if single && ty.is_pointer() {
                self.declaration_site(&spec, declarator, &name)
            } else {
                None
            };
            let span = Span::new(decl.span.start, decl.span.end);
            out.push(CStmt {
                kind: CStmtKind::Decl(CVarDecl {
                    name,
                    ty,
                    init: init_decl
                        .node
                        .initializer
                        .as_ref()
                        .and_then(|i| self.lower_initializer(i)),
                    loc: self.loc(declarator.span.start),
                    is_extern: spec.is_extern,
                    is_static: spec.is_static,
                    site,
                }),
                span,
            });
        }
    }

    fn lower_initializer(&self, init: &Node<ast::Initializer>) -> Option<CExpr> {
        match &init.node {
            ast::Initializer::Expression(expr) => Some(self.lower_expression(expr)),
            // Aggregate initializers carry no single pointer value.
            ast::Initializer::List(items) => {
                let mut names = IdentCollector::default();
                for item in items {
                    names.visit_initializer_list_item(&item.node, &item.span);
                }
                Some(CExpr::Opaque {
                    names: names.0,
                    span: Span::new(init.span.start, init.span.end),
                })
            }
        }
    }

    fn lower_statement(&self, stmt: &Node<ast::Statement>) -> CStmt {
        let span = Span::new(stmt.span.start, stmt.span.end);
        let kind = match &stmt.node {
            ast::Statement::Compound(items) => {
                let mut stmts = Vec::new();
                for item in items {
                    self.lower_block_item(item, &mut stmts);
                }
                CStmtKind::Block(stmts)
            }
            ast::Statement::Expression(expr) => match expr {
                Some(expr) => CStmtKind::Expr(self.lower_expression(expr)),
                None => CStmtKind::Block(Vec::new()),
            },
            ast::Statement::If(if_stmt) => {
                let node = &if_stmt.node;
                CStmtKind::If {
                    cond: self.lower_expression(&node.condition),
                    then_body: vec![self.lower_statement(&node.then_statement)],
                    else_body: node
                        .else_statement
                        .as_ref()
                        .map(|s| vec![self.lower_statement(s)]),
                }
            }
            ast::Statement::While(while_stmt) => CStmtKind::While {
                cond: self.lower_expression(&while_stmt.node.expression),
                body: vec![self.lower_statement(&while_stmt.node.statement)],
            },
            ast::Statement::DoWhile(do_stmt) => CStmtKind::DoWhile {
                cond: self.lower_expression(&do_stmt.node.expression),
                body: vec![self.lower_statement(&do_stmt.node.statement)],
            },
            ast::Statement::For(for_stmt) => {
                let node = &for_stmt.node;
                let init = match &node.initializer.node {
                    ast::ForInitializer::Empty => None,
                    ast::ForInitializer::Expression(expr) => Some(Box::new(CStmt {
                        kind: CStmtKind::Expr(self.lower_expression(expr)),
                        span: Span::new(expr.span.start, expr.span.end),
                    })),
                    ast::ForInitializer::Declaration(decl) => {
                        let mut stmts = Vec::new();
                        self.lower_local_declaration(decl, &mut stmts);
                        stmts.into_iter().next().map(Box::new)
                    }
                    ast::ForInitializer::StaticAssert(_) => None,
                };
                CStmtKind::For {
                    init,
                    cond: node.condition.as_ref().map(|e| self.lower_expression(e)),
                    step: node.step.as_ref().map(|e| self.lower_expression(e)),
                    body: vec![self.lower_statement(&node.statement)],
                }
            }
            ast::Statement::Return(expr) => {
                CStmtKind::Return(expr.as_ref().map(|e| self.lower_expression(e)))
            }
            ast::Statement::Break => CStmtKind::Break,
            ast::Statement::Continue => CStmtKind::Continue,
            other => return self.opaque_stmt_from(other, &stmt.span),
        };
        CStmt { kind, span }
    }

    /// Switch, goto, labels, and asm lower to opaque statements.
    fn opaque_stmt_from(&self, stmt: &ast::Statement, span: &lang_c::span::Span) -> CStmt {
        let mut names = IdentCollector::default();
        names.visit_statement(stmt, span);
        CStmt {
            kind: CStmtKind::Opaque { names: names.0 },
            span: Span::new(span.start, span.end),
        }
    }

    fn lower_expression(&self, expr: &Node<ast::Expression>) -> CExpr {
        match &expr.node {
            ast::Expression::Identifier(id) => CExpr::Ident(id.node.name.clone()),
            ast::Expression::Constant(constant) => self.lower_constant(&constant.node),
            ast::Expression::StringLiteral(lit) => CExpr::StrLit(join_string_literal(&lit.node)),
            ast::Expression::Member(member) => CExpr::Member {
                base: Box::new(self.lower_expression(&member.node.expression)),
                field: member.node.identifier.node.name.clone(),
                arrow: matches!(member.node.operator.node, ast::MemberOperator::Indirect),
            },
            ast::Expression::Call(call) => CExpr::Call {
                callee: Box::new(self.lower_expression(&call.node.callee)),
                args: call
                    .node
                    .arguments
                    .iter()
                    .map(|a| self.lower_expression(a))
                    .collect(),
            },
            ast::Expression::UnaryOperator(unary) => {
                let op = match unary.node.operator.node {
                    ast::UnaryOperator::Indirection => UnaryOp::Deref,
                    ast::UnaryOperator::Address => UnaryOp::AddrOf,
                    ast::UnaryOperator::Minus => UnaryOp::Neg,
                    ast::UnaryOperator::Plus => {
                        return self.lower_expression(&unary.node.operand)
                    }
                    ast::UnaryOperator::Negate => UnaryOp::Not,
                    ast::UnaryOperator::Complement => UnaryOp::BitNot,
                    ast::UnaryOperator::PreIncrement => UnaryOp::PreInc,
                    ast::UnaryOperator::PostIncrement => UnaryOp::PostInc,
                    ast::UnaryOperator::PreDecrement => UnaryOp::PreDec,
                    ast::UnaryOperator::PostDecrement => UnaryOp::PostDec,
                };
                CExpr::Unary {
                    op,
                    expr: Box::new(self.lower_expression(&unary.node.operand)),
                }
            }
            ast::Expression::BinaryOperator(binary) => self.lower_binary(binary),
            ast::Expression::Cast(cast) => {
                let ty = self.lower_type_name(&cast.node.type_name);
                CExpr::Cast {
                    ty,
                    expr: Box::new(self.lower_expression(&cast.node.expression)),
                }
            }
            ast::Expression::Comma(exprs) => {
                CExpr::Comma(exprs.iter().map(|e| self.lower_expression(e)).collect())
            }
            // sizeof and alignof are compile-time scalars.
            ast::Expression::SizeOfTy(_)
            | ast::Expression::SizeOfVal(_)
            | ast::Expression::AlignOf(_) => CExpr::IntLit(1),
            other => {
                let mut names = IdentCollector::default();
                names.visit_expression(other, &expr.span);
                CExpr::Opaque {
                    names: names.0,
                    span: Span::new(expr.span.start, expr.span.end),
                }
            }
        }
    }

    fn lower_binary(&self, binary: &Node<ast::BinaryOperatorExpression>) -> CExpr {
        use ast::BinaryOperator as B;
        let node = &binary.node;
        let lhs = Box::new(self.lower_expression(&node.lhs));
        let rhs = Box::new(self.lower_expression(&node.rhs));
        let plain = |op: BinOp| CExpr::Binary {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        };
        match node.operator.node {
            B::Index => CExpr::Index {
                base: lhs,
                index: rhs,
            },
            B::Plus => plain(BinOp::Add),
            B::Minus => plain(BinOp::Sub),
            B::Multiply => plain(BinOp::Mul),
            B::Divide => plain(BinOp::Div),
            B::Modulo => plain(BinOp::Mod),
            B::Equals => plain(BinOp::Eq),
            B::NotEquals => plain(BinOp::NotEq),
            B::Less => plain(BinOp::Lt),
            B::LessOrEqual => plain(BinOp::LtEq),
            B::Greater => plain(BinOp::Gt),
            B::GreaterOrEqual => plain(BinOp::GtEq),
            B::LogicalAnd => plain(BinOp::And),
            B::LogicalOr => plain(BinOp::Or),
            B::BitwiseAnd => plain(BinOp::BitAnd),
            B::BitwiseOr => plain(BinOp::BitOr),
            B::BitwiseXor => plain(BinOp::BitXor),
            B::ShiftLeft => plain(BinOp::Shl),
            B::ShiftRight => plain(BinOp::Shr),
            B::Assign => CExpr::Assign {
                op: None,
                lhs,
                rhs,
            },
            B::AssignPlus => CExpr::Assign {
                op: Some(BinOp::Add),
                lhs,
                rhs,
            },
            B::AssignMinus => CExpr::Assign {
                op: Some(BinOp::Sub),
                lhs,
                rhs,
            },
            B::AssignMultiply => CExpr::Assign {
                op: Some(BinOp::Mul),
                lhs,
                rhs,
            },
            B::AssignDivide => CExpr::Assign {
                op: Some(BinOp::Div),
                lhs,
                rhs,
            },
            B::AssignModulo => CExpr::Assign {
                op: Some(BinOp::Mod),
                lhs,
                rhs,
            },
            B::AssignShiftLeft => CExpr::Assign {
                op: Some(BinOp::Shl),
                lhs,
                rhs,
            },
            B::AssignShiftRight => CExpr::Assign {
                op: Some(BinOp::Shr),
                lhs,
                rhs,
            },
            B::AssignBitwiseAnd => CExpr::Assign {
                op: Some(BinOp::BitAnd),
                lhs,
                rhs,
            },
            B::AssignBitwiseOr => CExpr::Assign {
                op: Some(BinOp::BitOr),
                lhs,
                rhs,
            },
            B::AssignBitwiseXor => CExpr::Assign {
                op: Some(BinOp::BitXor),
                lhs,
                rhs,
            },
        }
    }

    fn lower_constant(&self, constant: &ast::Constant) -> CExpr {
        match constant {
            ast::Constant::Integer(integer) => {
                let radix = match integer.base {
                    ast::IntegerBase::Decimal => 10,
                    ast::IntegerBase::Octal => 8,
                    ast::IntegerBase::Hexadecimal => 16,
                    ast::IntegerBase::Binary => 2,
                };
                CExpr::IntLit(i64::from_str_radix(&integer.number, radix).unwrap_or(1))
            }
            ast::Constant::Float(float) => {
                CExpr::FloatLit(float.number.parse().unwrap_or(0.0))
            }
            ast::Constant::Character(text) => {
                // Character constants arrive quoted, e.g. "'a'" or "'\\0'".
                let inner = text.trim_matches('\'');
                CExpr::CharLit(inner.chars().next().unwrap_or('\0'))
            }
        }
    }

    fn lower_type_name(&self, type_name: &Node<ast::TypeName>) -> CType {
        let base = self.base_from_specifier_qualifiers(&type_name.node.specifiers);
        match &type_name.node.declarator {
            Some(declarator) => build_type(base, declarator).0,
            None => base,
        }
    }

    /// Specifier scan for declarations: storage class, typedef-ness, base
    /// type, and any struct or union defined inline.
    fn scan_specifiers(&self, specifiers: &[Node<ast::DeclarationSpecifier>]) -> ScannedSpecifiers {
        let mut scanned = ScannedSpecifiers::default();
        let mut type_specs = Vec::new();
        for spec in specifiers {
            match &spec.node {
                ast::DeclarationSpecifier::StorageClass(sc) => match sc.node {
                    ast::StorageClassSpecifier::Typedef => scanned.is_typedef = true,
                    ast::StorageClassSpecifier::Extern => scanned.is_extern = true,
                    ast::StorageClassSpecifier::Static => scanned.is_static = true,
                    _ => {}
                },
                ast::DeclarationSpecifier::TypeSpecifier(ts) => {
                    scanned.note_type_span(spec.span.start, spec.span.end);
                    type_specs.push(&ts.node);
                }
                ast::DeclarationSpecifier::TypeQualifier(_) => {
                    scanned.note_type_span(spec.span.start, spec.span.end);
                }
                _ => {}
            }
        }
        scanned.base = self.combine_type_specifiers(&type_specs, &mut scanned.record);
        scanned
    }

    fn scan_parameter_specifiers(
        &self,
        specifiers: &[Node<ast::DeclarationSpecifier>],
    ) -> ScannedSpecifiers {
        self.scan_specifiers(specifiers)
    }

    fn base_from_specifier_qualifiers(&self, specifiers: &[Node<ast::SpecifierQualifier>]) -> CType {
        let mut type_specs = Vec::new();
        for spec in specifiers {
            if let ast::SpecifierQualifier::TypeSpecifier(ts) = &spec.node {
                type_specs.push(&ts.node);
            }
        }
        let mut record = None;
        self.combine_type_specifiers(&type_specs, &mut record)
    }

    fn combine_type_specifiers(
        &self,
        specs: &[&ast::TypeSpecifier],
        record_out: &mut Option<CRecord>,
    ) -> CType {
        use ast::TypeSpecifier as T;
        let mut unsigned = false;
        let mut long = false;
        let mut base: Option<CType> = None;
        for spec in specs {
            match spec {
                T::Void => base = Some(CType::Void),
                T::Bool => base = Some(CType::Bool),
                T::Char => base = Some(CType::Char),
                T::Short | T::Int => base = base.or(Some(CType::Int)),
                T::Long => long = true,
                T::Float => base = Some(CType::Float),
                T::Double => base = Some(CType::Double),
                T::Signed => {}
                T::Unsigned => unsigned = true,
                T::Struct(st) => {
                    base = Some(self.lower_struct_type(st, record_out));
                }
                T::Enum(_) => base = Some(CType::Int),
                T::TypedefName(id) => base = Some(CType::Named(id.node.name.clone())),
                _ => base = Some(CType::Named("<unsupported>".into())),
            }
        }
        match (base, long, unsigned) {
            (Some(CType::Int), true, false) | (None, true, false) => CType::Long,
            (Some(CType::Int), true, true) | (None, true, true) => CType::ULong,
            (Some(CType::Int), false, true) | (None, false, true) => CType::UInt,
            (Some(base), _, _) => base,
            (None, false, false) => CType::Int,
        }
    }

    fn lower_struct_type(
        &self,
        st: &Node<ast::StructType>,
        record_out: &mut Option<CRecord>,
    ) -> CType {
        let is_union = matches!(st.node.kind.node, ast::StructKind::Union);
        let name = st
            .node
            .identifier
            .as_ref()
            .map(|id| id.node.name.clone())
            .unwrap_or_else(|| "<anonymous>".into());
        if let Some(declarations) = &st.node.declarations {
            let mut fields = Vec::new();
            for decl in declarations {
                let field = match &decl.node {
                    ast::StructDeclaration::Field(field) => field,
                    ast::StructDeclaration::StaticAssert(_) => continue,
                };
                let base = self.base_from_specifier_qualifiers(&field.node.specifiers);
                let single = field.node.declarators.len() == 1;
                for sd in &field.node.declarators {
                    let declarator = match &sd.node.declarator {
                        Some(d) => d,
                        None => continue,
                    };
                    let (ty, field_name) = build_type(base.clone(), declarator);
                    let field_name = match field_name {
                        Some(n) => n,
                        None => continue,
                    };
                    let site = if single && ty.is_pointer() {
                        self.field_site(field, declarator, &field_name)
                    } else {
                        None
                    };
                    fields.push(CField {
                        name: field_name,
                        ty,
                        loc: self.loc(declarator.span.start),
                        site,
                    });
                }
            }
            *record_out = Some(CRecord {
                name: name.clone(),
                is_union,
                fields,
                loc: self.loc(st.span.start),
            });
        }
        CType::Record { name, is_union }
    }

    /// Site for a single-declarator pointer declaration: the span from the
    /// first type specifier through the declared name, plus the verbatim
    /// pointee spelling.
    fn declaration_site(
        &self,
        spec: &ScannedSpecifiers,
        declarator: &Node<ast::Declarator>,
        name: &str,
    ) -> Option<RewriteSite> {
        let (type_start, type_end) = spec.type_span?;
        let name_end = declarator.node.kind.span.end;
        if name_end <= type_start || name_end > self.source.len() {
            return None;
        }
        Some(RewriteSite {
            span: Span::new(type_start, name_end),
            pointee_text: self.source[type_start..type_end].trim().to_string(),
            name: name.to_string(),
        })
    }

    fn parameter_site(
        &self,
        param: &Node<ast::ParameterDeclaration>,
        declarator: &Node<ast::Declarator>,
        name: &str,
    ) -> Option<RewriteSite> {
        let spec = self.scan_parameter_specifiers(&param.node.specifiers);
        self.declaration_site(&spec, declarator, name)
    }

    fn field_site(
        &self,
        field: &Node<ast::StructField>,
        declarator: &Node<ast::Declarator>,
        name: &str,
    ) -> Option<RewriteSite> {
        let mut type_span: Option<(usize, usize)> = None;
        for spec in &field.node.specifiers {
            if matches!(
                spec.node,
                ast::SpecifierQualifier::TypeSpecifier(_) | ast::SpecifierQualifier::TypeQualifier(_)
            ) {
                type_span = Some(match type_span {
                    None => (spec.span.start, spec.span.end),
                    Some((s, e)) => (s.min(spec.span.start), e.max(spec.span.end)),
                });
            }
        }
        let (type_start, type_end) = type_span?;
        let name_end = declarator.node.kind.span.end;
        if name_end <= type_start {
            return None;
        }
        Some(RewriteSite {
            span: Span::new(type_start, name_end),
            pointee_text: self.source[type_start..type_end].trim().to_string(),
            name: name.to_string(),
        })
    }

    /// Site for a pointer-returning function definition: specifier start
    /// through the function name.
    fn return_site(
        &self,
        spec: &ScannedSpecifiers,
        declarator: &Node<ast::Declarator>,
        name: &str,
    ) -> Option<RewriteSite> {
        let (type_start, type_end) = spec.type_span?;
        let name_end = declarator.node.kind.span.end;
        if name_end <= type_start {
            return None;
        }
        Some(RewriteSite {
            span: Span::new(type_start, name_end),
            pointee_text: self.source[type_start..type_end].trim().to_string(),
            name: name.to_string(),
        })
    }
}

#[derive(Clone)]
struct ScannedSpecifiers {
    base: CType,
    is_typedef: bool,
    is_extern: bool,
    is_static: bool,
    record: Option<CRecord>,
    /// Byte span covering type specifiers and qualifiers only, so storage
    /// classes stay outside rewrite sites.
    type_span: Option<(usize, usize)>,
}

impl Default for ScannedSpecifiers {
    fn default() -> Self {
        Self {
            base: CType::Int,
            is_typedef: false,
            is_extern: false,
            is_static: false,
            record: None,
            type_span: None,
        }
    }
}

impl ScannedSpecifiers {
    fn note_type_span(&mut self, start: usize, end: usize) {
        self.type_span = Some(match self.type_span {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }
}

/// Builds the declared type by applying derived declarators in source
/// order, recursing through parenthesized declarators.
fn build_type(base: CType, declarator: &Node<ast::Declarator>) -> (CType, Option<String>) {
    let mut ty = base;
    for derived in &declarator.node.derived {
        ty = match &derived.node {
            ast::DerivedDeclarator::Pointer(_) => CType::Pointer(Box::new(ty)),
            ast::DerivedDeclarator::Array(array) => {
                let size = match &array.node.size {
                    ast::ArraySize::VariableExpression(expr) => match &expr.node {
                        ast::Expression::Constant(c) => match &c.node {
                            ast::Constant::Integer(i) => i.number.parse().ok(),
                            _ => None,
                        },
                        _ => None,
                    },
                    _ => None,
                };
                CType::Array(Box::new(ty), size)
            }
            ast::DerivedDeclarator::Function(fd) => {
                let params = fd
                    .node
                    .parameters
                    .iter()
                    .map(|_| CType::Int)
                    .collect();
                CType::Function {
                    ret: Box::new(ty),
                    params,
                    variadic: matches!(fd.node.ellipsis, ast::Ellipsis::Some),
                }
            }
            ast::DerivedDeclarator::KRFunction(_) => CType::Function {
                ret: Box::new(ty),
                params: Vec::new(),
                variadic: true,
            },
            _ => ty,
        };
    }
    match &declarator.node.kind.node {
        ast::DeclaratorKind::Identifier(id) => (ty, Some(id.node.name.clone())),
        ast::DeclaratorKind::Declarator(inner) => build_type(ty, inner),
        ast::DeclaratorKind::Abstract => (ty, None),
    }
}

/// Strip quotes from the adjacent pieces of a string literal and join them.
fn join_string_literal(pieces: &[String]) -> String {
    pieces
        .iter()
        .map(|p| p.trim_matches('"'))
        .collect::<Vec<_>>()
        .join("")
}

/// Collects every identifier under a node, for opaque lowering.
#[derive(Default)]
struct IdentCollector(Vec<String>);

impl<'ast> Visit<'ast> for IdentCollector {
    fn visit_identifier(&mut self, identifier: &'ast ast::Identifier, _: &'ast lang_c::span::Span) {
        if !self.0.contains(&identifier.name) {
            self.0.push(identifier.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::CDecl;
    use std::path::PathBuf;

    fn lower(source: &str) -> CModule {
        AstBridge::new()
            .lower_source(&PathBuf::from("test.c"), source.to_string())
            .expect("parse failure")
    }

    #[test]
    fn test_lowers_pointer_declaration_with_site() {
        let module = lower("int *p;\n");
        let global = match &module.decls[0] {
            CDecl::Global(g) => g,
            other => panic!("expected global, got {other:?}"),
        };
        assert_eq!(global.name, "p");
        assert!(global.ty.is_pointer());
        let site = global.site.as_ref().expect("rewrite site");
        assert_eq!(&module.source[site.span.start..site.span.end], "int *p");
        assert_eq!(site.pointee_text, "int");
    }

    #[test]
    fn test_multi_declarator_gets_no_site() {
        let module = lower("int *a, *b;\n");
        let names: Vec<_> = module
            .decls
            .iter()
            .filter_map(|d| match d {
                CDecl::Global(g) => Some((g.name.clone(), g.site.is_some())),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![("a".to_string(), false), ("b".to_string(), false)]
        );
    }

    #[test]
    fn test_function_definition_params_and_body() {
        let module = lower("void f(char *s, int n) { s[0] = 'x'; }\n");
        let func = module.functions().next().expect("function");
        assert_eq!(func.name, "f");
        assert_eq!(func.params.len(), 2);
        assert!(func.params[0].ty.is_pointer());
        assert!(func.params[0].site.is_some());
        assert!(func.params[1].site.is_none());
        assert!(func.is_definition);
        let body = func.body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_pointer_return_type() {
        let module = lower("char *dup(char *s) { return s; }\n");
        let func = module.functions().next().unwrap();
        assert!(func.ret.is_pointer());
        assert!(func.ret_site.is_some());
    }

    #[test]
    fn test_struct_fields_lowered() {
        let module = lower("struct node { struct node *next; int value; };\n");
        let record = module.records().next().expect("record");
        assert_eq!(record.name, "node");
        assert!(!record.is_union);
        assert_eq!(record.fields.len(), 2);
        assert!(record.fields[0].ty.is_pointer());
        assert!(record.fields[0].site.is_some());
    }

    #[test]
    fn test_union_flag_carried() {
        let module = lower("union blob { char *text; long bits; };\n");
        let record = module.records().next().unwrap();
        assert!(record.is_union);
    }

    #[test]
    fn test_function_pointer_type_shape() {
        let module = lower("void (*handler)(int);\n");
        let global = match &module.decls[0] {
            CDecl::Global(g) => g,
            other => panic!("expected global, got {other:?}"),
        };
        assert!(global.ty.is_function_pointer());
    }

    #[test]
    fn test_switch_lowers_to_opaque() {
        let module = lower("void f(int *p) { switch (*p) { default: break; } }\n");
        let func = module.functions().next().unwrap();
        let body = func.body.as_ref().unwrap();
        match &body[0].kind {
            CStmtKind::Opaque { names } => assert!(names.contains(&"p".to_string())),
            other => panic!("expected opaque statement, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let result = AstBridge::new()
            .lower_source(&PathBuf::from("bad.c"), "int (((;\n".to_string());
        assert!(matches!(result, Err(CheckifyError::Parse { .. })));
    }

    #[test]
    fn test_string_literal_concatenation() {
        let module = lower("void f(void) { const char *s = \"ab\" \"cd\"; }\n");
        let func = module.functions().next().unwrap();
        let body = func.body.as_ref().unwrap();
        match &body[0].kind {
            CStmtKind::Decl(decl) => {
                assert_eq!(decl.init, Some(CExpr::StrLit("abcd".into())));
            }
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn test_record_definition_with_declarator() {
        let module = lower("struct list { struct list *next; } *head;\n");
        let record = module.records().next().expect("record");
        assert_eq!(record.name, "list");
        let global = module
            .decls
            .iter()
            .find_map(|d| match d {
                CDecl::Global(g) => Some(g),
                _ => None,
            })
            .expect("global");
        assert_eq!(global.name, "head");
        assert!(global.ty.is_pointer());
    }

    #[test]
    fn test_comments_blanked_for_parsing_kept_in_source() {
        let module = lower("/* heap cell */\nint *p; // one per node\n");
        assert!(module.source.contains("/* heap cell */"));
        let global = match &module.decls[0] {
            CDecl::Global(g) => g,
            other => panic!("expected global, got {other:?}"),
        };
        let site = global.site.as_ref().expect("rewrite site");
        assert_eq!(&module.source[site.span.start..site.span.end], "int *p");
        assert_eq!(global.loc.line, 2);
    }

    #[test]
    fn test_strip_comments_preserves_offsets() {
        let src = "int a; /* c1 */ int *b; // tail\nchar *s = \"/* kept */\";\n";
        let stripped = strip_comments(src);
        assert_eq!(stripped.len(), src.len());
        assert_eq!(stripped.find("int *b"), src.find("int *b"));
        assert!(!stripped.contains("c1"));
        assert!(!stripped.contains("tail"));
        assert!(stripped.contains("\"/* kept */\""));
    }

    #[test]
    fn test_extern_and_static_flags() {
        let module = lower("extern int *shared; static int *private_ptr;\n");
        let flags: Vec<_> = module
            .decls
            .iter()
            .filter_map(|d| match d {
                CDecl::Global(g) => Some((g.is_extern, g.is_static)),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![(true, false), (false, true)]);
    }
}
