//! Constraint generation
//!
//! Walks each lowered translation unit and populates the global store:
//! one variable per pointer-typed site, plus equality, implication, floor,
//! and forced-Wild constraints derived from usage patterns. Generation
//! never aborts on an unmodeled shape; it taints the variables involved
//! and keeps going.

use crate::constraints::{Constraint, ConstraintStore, Qualifier, VarId, VarKind, WildReason};
use crate::hir::{
    BinOp, CDecl, CExpr, CFunction, CModule, CParam, CStmt, CStmtKind, CType, CVarDecl, SourceLoc,
    Span, UnaryOp,
};
use crate::interfaces::{match_format, FormatSlot, FunctionInterface, InterfacePolicy};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, trace};

/// What a pointer-valued expression denotes, from the generator's view.
#[derive(Debug, Clone, PartialEq)]
enum PtrVal {
    /// Not a pointer value.
    None,
    /// Tracked by a constraint variable.
    Var(VarId),
    /// `&x` of a non-array object; safe until indexed.
    AddrOfScalar,
    /// An array object or its decay; indexing is fine.
    AddrOfArray,
    /// A string literal.
    StringLit,
    /// Value produced by a modeled interface (allocator result etc.).
    Known,
    /// Produced by an unsound pattern; taints whatever it reaches.
    Tainted(WildReason),
}

/// Per-statement pointer references, recorded for checked-region insertion.
#[derive(Debug, Clone)]
pub struct StmtRefs {
    pub span: Span,
    pub vars: Vec<VarId>,
    /// True when the statement contains shapes the bridge could not model;
    /// such statements never join a checked region.
    pub opaque: bool,
}

/// Region-relevant shape of one function definition.
#[derive(Debug, Clone)]
pub struct FunctionRegions {
    pub name: String,
    pub body_span: Span,
    pub stmts: Vec<StmtRefs>,
}

/// Everything the rewriter needs about one translation unit beyond what
/// lives in the store itself.
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    pub file: PathBuf,
    pub functions: Vec<FunctionRegions>,
}

/// Known signature of a function declared in the program.
#[derive(Debug, Clone)]
struct FnVars {
    params: Vec<Option<VarId>>,
    param_count: usize,
    ret: Option<VarId>,
    is_variadic: bool,
}

/// The per-run generator. Lives for the whole run so cross-unit state
/// (interface variables, field variables) stays shared; per-unit scope
/// state is reset by [`ConstraintGenerator::generate`].
pub struct ConstraintGenerator<'a> {
    store: &'a mut ConstraintStore,
    policy: &'a InterfacePolicy,
    /// (record, field) -> variable, shared across units.
    field_vars: HashMap<(String, String), VarId>,
    /// (record, field) -> declared type, for member typing.
    field_types: HashMap<(String, String), CType>,
    /// Synthetic variables for profile-annotated interface slots.
    itf_vars: HashMap<(String, usize), VarId>,
    // Per-translation-unit state below.
    file: String,
    globals: HashMap<String, (VarId, CType)>,
    global_types: HashMap<String, CType>,
    functions: HashMap<String, FnVars>,
    scopes: Vec<HashMap<String, (Option<VarId>, CType)>>,
    current_ret: Option<VarId>,
    /// Vars assigned the address of a scalar; unsound if also indexed.
    addr_of_scalar: HashSet<VarId>,
    /// Vars with an Arr-or-higher usage demand.
    demanded_arr: HashSet<VarId>,
    /// Collector for the statement currently being walked.
    collect: Option<Vec<VarId>>,
    saw_opaque: bool,
}

impl<'a> ConstraintGenerator<'a> {
    pub fn new(store: &'a mut ConstraintStore, policy: &'a InterfacePolicy) -> Self {
        Self {
            store,
            policy,
            field_vars: HashMap::new(),
            field_types: HashMap::new(),
            itf_vars: HashMap::new(),
            file: String::new(),
            globals: HashMap::new(),
            global_types: HashMap::new(),
            functions: HashMap::new(),
            scopes: Vec::new(),
            current_ret: None,
            addr_of_scalar: HashSet::new(),
            demanded_arr: HashSet::new(),
            collect: None,
            saw_opaque: false,
        }
    }

    /// Generate constraints for one translation unit.
    pub fn generate(&mut self, module: &CModule) -> GeneratedModule {
        self.file = module.file.display().to_string();
        self.globals.clear();
        self.global_types.clear();
        self.functions.clear();
        self.scopes.clear();
        self.addr_of_scalar.clear();
        self.demanded_arr.clear();

        // Pass 1: declaration sites, so forward references resolve.
        for decl in &module.decls {
            match decl {
                CDecl::Record(record) => self.declare_record(record),
                CDecl::Global(global) => self.declare_global(global),
                CDecl::Function(func) => self.declare_function(func),
                CDecl::Opaque { names } => {
                    self.taint_names(names, "unmodeled top-level declaration")
                }
            }
        }

        // Pass 2: initializers and bodies.
        let mut functions = Vec::new();
        for decl in &module.decls {
            match decl {
                CDecl::Global(global) => self.walk_global_init(global),
                CDecl::Function(func) => {
                    if let Some(regions) = self.walk_function(func) {
                        functions.push(regions);
                    }
                }
                _ => {}
            }
        }

        // A variable may be both handed the address of a scalar and used
        // with array indexing; that combination cannot be made checked.
        let offenders: Vec<VarId> = self
            .addr_of_scalar
            .intersection(&self.demanded_arr)
            .copied()
            .collect();
        for v in offenders {
            self.store.constrain(Constraint::ForcedWild {
                v,
                reason: WildReason::AddressOfIndexed,
            });
        }

        debug!(
            file = %self.file,
            vars = self.store.len(),
            constraints = self.store.constraints().len(),
            "generated constraints"
        );
        GeneratedModule {
            file: module.file.clone(),
            functions,
        }
    }

    fn declare_record(&mut self, record: &crate::hir::CRecord) {
        for field in &record.fields {
            self.field_types
                .entry((record.name.clone(), field.name.clone()))
                .or_insert_with(|| field.ty.clone());
            if !field.ty.is_pointer() {
                continue;
            }
            let name = format!("{}.{}", record.name, field.name);
            let v = self
                .store
                .add_var(name.clone(), VarKind::Field, field.loc.clone());
            if let Some(site) = &field.site {
                self.store.var_mut(v).sites.push(site.clone());
            }
            // The same header shows up in many units; share one variable.
            let key = if record.is_union {
                format!("union {name}")
            } else {
                format!("struct {name}")
            };
            let v = self.store.bind_extern(key, v);
            self.field_vars
                .entry((record.name.clone(), field.name.clone()))
                .or_insert(v);
            if record.is_union {
                self.store.constrain(Constraint::ForcedWild {
                    v,
                    reason: WildReason::UnionMember,
                });
            }
            self.taint_for_shape(v, &field.ty);
        }
    }

    fn declare_global(&mut self, global: &CVarDecl) {
        self.global_types
            .insert(global.name.clone(), global.ty.clone());
        if !global.ty.is_pointer() {
            return;
        }
        let v = self
            .store
            .add_var(global.name.clone(), VarKind::Declaration, global.loc.clone());
        if let Some(site) = &global.site {
            self.store.var_mut(v).sites.push(site.clone());
        }
        let v = if global.is_static {
            v
        } else {
            self.store.var_mut(v).externally_visible = true;
            self.store.bind_extern(global.name.clone(), v)
        };
        self.taint_for_shape(v, &global.ty);
        self.globals.insert(global.name.clone(), (v, global.ty.clone()));
    }

    fn declare_function(&mut self, func: &CFunction) {
        let previous = self.functions.get(&func.name).cloned();
        let external = !func.is_static;
        let mut params = Vec::with_capacity(func.params.len());
        for (i, param) in func.params.iter().enumerate() {
            params.push(self.declare_param(func, i, param, external));
        }
        let ret = if func.ret.is_pointer() {
            let v = self.store.add_var(
                format!("{}.return", func.name),
                VarKind::Return,
                func.loc.clone(),
            );
            if let Some(site) = &func.ret_site {
                self.store.var_mut(v).sites.push(site.clone());
            }
            let v = if external {
                self.store.var_mut(v).externally_visible = true;
                self.store.bind_extern(format!("{}.return", func.name), v)
            } else {
                v
            };
            self.taint_for_shape(v, &func.ret);
            Some(v)
        } else {
            None
        };
        // A prototype and a definition of the same function each carry
        // their own spellings; every declaration keeps its rewrite sites
        // and the variables behind them are unified. External symbols are
        // already unified through their extern keys.
        if let Some(prev) = previous {
            for (old, new) in prev.params.iter().zip(params.iter()) {
                if let (Some(a), Some(b)) = (old, new) {
                    if a != b {
                        self.store.constrain(Constraint::Equality { a: *a, b: *b });
                    }
                }
            }
            if let (Some(a), Some(b)) = (prev.ret, ret) {
                if a != b {
                    self.store.constrain(Constraint::Equality { a, b });
                }
            }
        }
        self.functions.insert(
            func.name.clone(),
            FnVars {
                params,
                param_count: func.params.len(),
                ret,
                is_variadic: func.is_variadic,
            },
        );
    }

    fn declare_param(
        &mut self,
        func: &CFunction,
        index: usize,
        param: &CParam,
        external: bool,
    ) -> Option<VarId> {
        if !param.ty.is_pointer() {
            return None;
        }
        let v = self.store.add_var(
            format!("{}.{}", func.name, param.name),
            VarKind::Parameter,
            param.loc.clone(),
        );
        if let Some(site) = &param.site {
            self.store.var_mut(v).sites.push(site.clone());
        }
        let v = if external {
            self.store.var_mut(v).externally_visible = true;
            self.store
                .bind_extern(format!("{}.param{index}", func.name), v)
        } else {
            v
        };
        self.taint_for_shape(v, &param.ty);
        Some(v)
    }

    fn walk_global_init(&mut self, global: &CVarDecl) {
        if let Some(init) = &global.init {
            let rhs = self.walk_expr(init);
            if let Some(&(v, _)) = self.globals.get(&global.name) {
                self.assign_into(v, rhs);
            }
        }
    }

    fn walk_function(&mut self, func: &CFunction) -> Option<FunctionRegions> {
        let body = func.body.as_ref()?;
        let fn_vars = self.functions.get(&func.name).cloned();
        self.current_ret = fn_vars.as_ref().and_then(|f| f.ret);

        let mut scope = HashMap::new();
        for (i, param) in func.params.iter().enumerate() {
            let v = fn_vars.as_ref().and_then(|f| f.params.get(i).copied().flatten());
            scope.insert(param.name.clone(), (v, param.ty.clone()));
        }
        self.scopes.push(scope);

        let mut stmts = Vec::new();
        for stmt in body {
            self.collect = Some(Vec::new());
            self.saw_opaque = false;
            self.walk_stmt(stmt);
            let mut vars = self.collect.take().unwrap_or_default();
            vars.sort_unstable();
            vars.dedup();
            stmts.push(StmtRefs {
                span: stmt.span,
                vars,
                opaque: self.saw_opaque,
            });
        }

        self.scopes.pop();
        self.current_ret = None;
        func.body_span.map(|body_span| FunctionRegions {
            name: func.name.clone(),
            body_span,
            stmts,
        })
    }

    fn walk_stmt(&mut self, stmt: &CStmt) {
        match &stmt.kind {
            CStmtKind::Decl(decl) => self.walk_local_decl(decl),
            CStmtKind::Expr(expr) => {
                self.walk_expr(expr);
            }
            CStmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.walk_expr(cond);
                self.walk_block(then_body);
                if let Some(else_body) = else_body {
                    self.walk_block(else_body);
                }
            }
            CStmtKind::While { cond, body } | CStmtKind::DoWhile { cond, body } => {
                self.walk_expr(cond);
                self.walk_block(body);
            }
            CStmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.walk_stmt(init);
                }
                if let Some(cond) = cond {
                    self.walk_expr(cond);
                }
                if let Some(step) = step {
                    self.walk_expr(step);
                }
                for s in body {
                    self.walk_stmt(s);
                }
                self.scopes.pop();
            }
            CStmtKind::Return(expr) => {
                let val = expr.as_ref().map(|e| self.walk_expr(e));
                if let (Some(ret), Some(val)) = (self.current_ret, val) {
                    self.note_ref(ret);
                    match val {
                        PtrVal::Var(s) => {
                            self.store.constrain(Constraint::Equality { a: ret, b: s })
                        }
                        other => self.assign_into(ret, other),
                    }
                }
            }
            CStmtKind::Block(body) => self.walk_block(body),
            CStmtKind::Break | CStmtKind::Continue => {}
            CStmtKind::Opaque { names } => {
                self.taint_names(names, "unmodeled statement");
            }
        }
    }

    fn walk_block(&mut self, body: &[CStmt]) {
        self.scopes.push(HashMap::new());
        for stmt in body {
            self.walk_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn walk_local_decl(&mut self, decl: &CVarDecl) {
        let v = if decl.ty.is_pointer() {
            let v = self
                .store
                .add_var(decl.name.clone(), VarKind::Declaration, decl.loc.clone());
            if let Some(site) = &decl.site {
                self.store.var_mut(v).sites.push(site.clone());
            }
            self.taint_for_shape(v, &decl.ty);
            self.note_ref(v);
            Some(v)
        } else {
            None
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(decl.name.clone(), (v, decl.ty.clone()));
        }
        if let Some(init) = &decl.init {
            let rhs = self.walk_expr(init);
            if let Some(v) = v {
                self.assign_into(v, rhs);
            }
        }
    }

    /// Apply the effect of storing `val` into variable `v`.
    fn assign_into(&mut self, v: VarId, val: PtrVal) {
        match val {
            PtrVal::Var(s) => self.store.constrain(Constraint::Equality { a: v, b: s }),
            PtrVal::AddrOfScalar => {
                self.addr_of_scalar.insert(v);
            }
            PtrVal::AddrOfArray | PtrVal::Known => {}
            PtrVal::StringLit => self.floor(v, Qualifier::NtArr),
            PtrVal::Tainted(reason) => self.store.constrain(Constraint::ForcedWild { v, reason }),
            PtrVal::None => {}
        }
    }

    fn floor(&mut self, v: VarId, level: Qualifier) {
        if level >= Qualifier::Arr {
            self.demanded_arr.insert(v);
        }
        self.store.constrain(Constraint::Floor { v, level });
    }

    fn walk_expr(&mut self, expr: &CExpr) -> PtrVal {
        match expr {
            CExpr::Ident(name) => self.resolve_ident(name),
            CExpr::IntLit(_) | CExpr::FloatLit(_) | CExpr::CharLit(_) => PtrVal::None,
            CExpr::StrLit(_) => PtrVal::StringLit,
            CExpr::Unary { op, expr } => self.walk_unary(*op, expr),
            CExpr::Binary { op, lhs, rhs } => self.walk_binary(*op, lhs, rhs),
            CExpr::Assign { op, lhs, rhs } => self.walk_assign(*op, lhs, rhs),
            CExpr::Index { base, index } => {
                self.walk_expr(index);
                let base_val = self.walk_expr(base);
                self.walk_index(base_val)
            }
            CExpr::Call { callee, args } => self.walk_call(callee, args),
            CExpr::Member { base, field, arrow } => self.walk_member(base, field, *arrow),
            CExpr::Cast { ty, expr } => self.walk_cast(ty, expr),
            CExpr::Comma(exprs) => {
                let mut last = PtrVal::None;
                for e in exprs {
                    last = self.walk_expr(e);
                }
                last
            }
            CExpr::Opaque { names, .. } => {
                self.taint_names(names, "opaque expression");
                PtrVal::Tainted(WildReason::UnmodeledPattern {
                    what: "opaque expression".into(),
                })
            }
        }
    }

    fn walk_unary(&mut self, op: UnaryOp, expr: &CExpr) -> PtrVal {
        match op {
            UnaryOp::Deref => {
                // Scalar dereference is fine at every checked level.
                self.walk_expr(expr);
                PtrVal::None
            }
            UnaryOp::AddrOf => match expr {
                CExpr::Index { base, index } => {
                    // &p[i] points into the same object as p.
                    self.walk_expr(index);
                    let base_val = self.walk_expr(base);
                    self.walk_index(base_val.clone());
                    base_val
                }
                CExpr::Ident(name) => {
                    if self.is_array_typed(name) {
                        PtrVal::AddrOfArray
                    } else {
                        self.walk_expr(expr);
                        PtrVal::AddrOfScalar
                    }
                }
                other => {
                    self.walk_expr(other);
                    PtrVal::AddrOfScalar
                }
            },
            UnaryOp::PreInc | UnaryOp::PostInc | UnaryOp::PreDec | UnaryOp::PostDec => {
                let val = self.walk_expr(expr);
                if let PtrVal::Var(v) = &val {
                    // Walking a pointer is array-style usage.
                    self.floor(*v, Qualifier::Arr);
                }
                val
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                self.walk_expr(expr);
                PtrVal::None
            }
        }
    }

    fn walk_binary(&mut self, op: BinOp, lhs: &CExpr, rhs: &CExpr) -> PtrVal {
        let lv = self.walk_expr(lhs);
        let rv = self.walk_expr(rhs);
        match op {
            BinOp::Add | BinOp::Sub => {
                // Pointer arithmetic demands at least Arr of every pointer
                // operand; `hi - lo` is array evidence for both sides.
                for side in [&lv, &rv] {
                    if let PtrVal::Var(v) = side {
                        self.floor(*v, Qualifier::Arr);
                    }
                }
                match (&lv, &rv) {
                    (PtrVal::AddrOfScalar, _) | (PtrVal::None, PtrVal::AddrOfScalar) => {
                        PtrVal::Tainted(WildReason::AddressOfIndexed)
                    }
                    (PtrVal::None, _) => rv,
                    _ => lv,
                }
            }
            _ => PtrVal::None,
        }
    }

    fn walk_assign(&mut self, op: Option<BinOp>, lhs: &CExpr, rhs: &CExpr) -> PtrVal {
        let rv = self.walk_expr(rhs);
        let lv = self.walk_expr(lhs);
        if let Some(op) = op {
            // Compound assignment; `p += n` walks the pointer.
            if matches!(op, BinOp::Add | BinOp::Sub) {
                if let PtrVal::Var(v) = &lv {
                    self.floor(*v, Qualifier::Arr);
                }
            }
            return lv;
        }
        if let PtrVal::Var(d) = &lv {
            // NULL assignment carries no pointer evidence.
            if matches!(rhs, CExpr::IntLit(0)) {
                return lv;
            }
            // Legacy int-to-pointer traffic cannot be made checked.
            if matches!(rv, PtrVal::None)
                && matches!(rhs, CExpr::IntLit(_) | CExpr::FloatLit(_))
            {
                self.store.constrain(Constraint::ForcedWild {
                    v: *d,
                    reason: WildReason::UnmodeledPattern {
                        what: "integer stored into pointer".into(),
                    },
                });
                return lv;
            }
            self.assign_into(*d, rv);
        }
        lv
    }

    fn walk_index(&mut self, base: PtrVal) -> PtrVal {
        match base {
            PtrVal::Var(v) => {
                self.floor(v, Qualifier::Arr);
                PtrVal::None
            }
            PtrVal::AddrOfScalar => PtrVal::Tainted(WildReason::AddressOfIndexed),
            PtrVal::Tainted(reason) => PtrVal::Tainted(reason),
            _ => PtrVal::None,
        }
    }

    fn walk_member(&mut self, base: &CExpr, field: &str, _arrow: bool) -> PtrVal {
        let base_val = self.walk_expr(base);
        let record = match self.expr_record_name(base) {
            Some(name) => name,
            None => {
                if let PtrVal::Tainted(reason) = base_val {
                    return PtrVal::Tainted(reason);
                }
                return PtrVal::None;
            }
        };
        match self.field_vars.get(&(record, field.to_string())) {
            Some(&v) => {
                self.note_ref(v);
                PtrVal::Var(v)
            }
            None => PtrVal::None,
        }
    }

    fn walk_cast(&mut self, ty: &CType, expr: &CExpr) -> PtrVal {
        let val = self.walk_expr(expr);
        let src_ty = self.expr_ctype(expr);
        if !ty.is_pointer() {
            // Pointer narrowed to an integer: the provenance escapes.
            if let PtrVal::Var(v) = &val {
                self.store.constrain(Constraint::ForcedWild {
                    v: *v,
                    reason: WildReason::BadCast,
                });
            }
            return PtrVal::None;
        }
        let benign = match (&val, &src_ty) {
            (PtrVal::Known, _) | (PtrVal::None, _) => true,
            (PtrVal::StringLit, _) => ty.is_char_pointer(),
            (_, Some(src)) => cast_compatible(src, ty),
            (_, None) => false,
        };
        if benign {
            val
        } else {
            if let PtrVal::Var(v) = &val {
                self.store.constrain(Constraint::ForcedWild {
                    v: *v,
                    reason: WildReason::BadCast,
                });
            }
            PtrVal::Tainted(WildReason::BadCast)
        }
    }

    fn walk_call(&mut self, callee: &CExpr, args: &[CExpr]) -> PtrVal {
        let name = match callee {
            CExpr::Ident(name) => name.clone(),
            other => {
                // Call through an expression: the callee variable is
                // already Wild (function pointer); taint the arguments.
                self.walk_expr(other);
                for arg in args {
                    let val = self.walk_expr(arg);
                    if let PtrVal::Var(v) = val {
                        self.store.constrain(Constraint::ForcedWild {
                            v,
                            reason: WildReason::UnmodeledPattern {
                                what: "call through expression".into(),
                            },
                        });
                    }
                }
                return PtrVal::Tainted(WildReason::UnmodeledPattern {
                    what: "call through expression".into(),
                });
            }
        };

        let arg_vals: Vec<PtrVal> = args.iter().map(|a| self.walk_expr(a)).collect();

        if let Some(fn_vars) = self.functions.get(&name).cloned() {
            self.link_program_call(&name, &fn_vars, &arg_vals);
            return match fn_vars.ret {
                Some(ret) => {
                    self.note_ref(ret);
                    PtrVal::Var(ret)
                }
                None => PtrVal::None,
            };
        }

        if let Some(iface) = self.policy.known_interface(&name).cloned() {
            self.link_interface_call(&name, &iface, args, &arg_vals);
            return PtrVal::Known;
        }

        // Externally-unmodeled function: everything it touches is Wild.
        trace!(callee = %name, "unknown external call");
        for val in &arg_vals {
            if let PtrVal::Var(v) = val {
                self.store.constrain(Constraint::ForcedWild {
                    v: *v,
                    reason: WildReason::UnknownExternArg {
                        callee: name.clone(),
                    },
                });
            }
        }
        PtrVal::Tainted(WildReason::UnknownExternArg { callee: name })
    }

    /// Link a call to a function declared inside the program.
    fn link_program_call(&mut self, name: &str, fn_vars: &FnVars, arg_vals: &[PtrVal]) {
        for (i, val) in arg_vals.iter().enumerate() {
            if i >= fn_vars.param_count {
                // Variadic tail of a program-defined function: no static
                // signature to check against.
                if fn_vars.is_variadic {
                    if let PtrVal::Var(v) = val {
                        self.store.constrain(Constraint::ForcedWild {
                            v: *v,
                            reason: WildReason::VariadicArg {
                                callee: name.to_string(),
                            },
                        });
                    }
                }
                continue;
            }
            let param = fn_vars.params.get(i).copied().flatten();
            match (val, param) {
                (PtrVal::Var(a), Some(p)) => {
                    // Caller obligation and callee obligation both flow.
                    self.store.constrain(Constraint::Implication { from: *a, to: p });
                    self.store.constrain(Constraint::Implication { from: p, to: *a });
                }
                (PtrVal::StringLit, Some(p)) => self.floor(p, Qualifier::NtArr),
                (PtrVal::AddrOfScalar, Some(p)) => {
                    self.addr_of_scalar.insert(p);
                }
                (PtrVal::Tainted(reason), Some(p)) => {
                    self.store.constrain(Constraint::ForcedWild {
                        v: p,
                        reason: reason.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Link a call to a profile-annotated external function.
    fn link_interface_call(
        &mut self,
        name: &str,
        iface: &FunctionInterface,
        args: &[CExpr],
        arg_vals: &[PtrVal],
    ) {
        let fixed = iface.params.len();
        for (i, val) in arg_vals.iter().enumerate() {
            if i >= fixed {
                self.variadic_arg(name, iface, args, i, val);
                continue;
            }
            let floor = iface.params.get(i).copied().flatten();
            match (val, floor) {
                (PtrVal::Var(v), Some(level)) => {
                    self.floor(*v, level);
                    if self.policy.propagate_through_itypes {
                        let itf = self.interface_var(name, i, level);
                        self.store.constrain(Constraint::Implication { from: *v, to: itf });
                        self.store.constrain(Constraint::Implication { from: itf, to: *v });
                    }
                }
                (PtrVal::Var(v), None) => {
                    // A known interface with no annotation on this slot is
                    // a one-way boundary unless propagation is enabled.
                    if !self.policy.propagate_through_itypes {
                        self.store.constrain(Constraint::ForcedWild {
                            v: *v,
                            reason: WildReason::PolicyBoundary {
                                callee: name.to_string(),
                            },
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// One pointer argument in a variadic tail.
    fn variadic_arg(
        &mut self,
        name: &str,
        iface: &FunctionInterface,
        args: &[CExpr],
        index: usize,
        val: &PtrVal,
    ) {
        let v = match val {
            PtrVal::Var(v) => *v,
            _ => return,
        };
        if !self.policy.handle_varargs {
            self.store.constrain(Constraint::ForcedWild {
                v,
                reason: WildReason::VariadicArg {
                    callee: name.to_string(),
                },
            });
            return;
        }
        // Structural mode: pair the argument with its format directive.
        let format = iface
            .format_arg
            .and_then(|fi| args.get(fi))
            .and_then(|a| match a {
                CExpr::StrLit(s) => Some(s.clone()),
                _ => None,
            });
        let slot = format.as_deref().map(match_format).and_then(|slots| {
            let tail_index = index - iface.params.len();
            slots.get(tail_index).copied()
        });
        match slot {
            Some(FormatSlot::NtString) => self.floor(v, Qualifier::NtArr),
            Some(FormatSlot::AnyPointer) => {}
            Some(FormatSlot::Scalar) | Some(FormatSlot::Unsupported) | None => {
                self.store.constrain(Constraint::ForcedWild {
                    v,
                    reason: WildReason::VariadicArg {
                        callee: name.to_string(),
                    },
                });
            }
        }
    }

    /// Synthetic variable for an annotated interface slot, shared run-wide.
    fn interface_var(&mut self, name: &str, index: usize, floor: Qualifier) -> VarId {
        if let Some(&v) = self.itf_vars.get(&(name.to_string(), index)) {
            return v;
        }
        let v = self.store.add_var(
            format!("{name}.param{index}"),
            VarKind::Parameter,
            SourceLoc::new("<interface>", 0, 0),
        );
        self.store.var_mut(v).externally_visible = true;
        self.store.var_mut(v).annotation = Some(floor);
        self.store.constrain(Constraint::Floor { v, level: floor });
        self.itf_vars.insert((name.to_string(), index), v);
        v
    }

    fn resolve_ident(&mut self, name: &str) -> PtrVal {
        for scope in self.scopes.iter().rev() {
            if let Some((var, ty)) = scope.get(name) {
                if let Some(v) = var {
                    let v = *v;
                    self.note_ref(v);
                    return PtrVal::Var(v);
                }
                if matches!(ty, CType::Array(..)) {
                    return PtrVal::AddrOfArray;
                }
                return PtrVal::None;
            }
        }
        if let Some(&(v, _)) = self.globals.get(name) {
            self.note_ref(v);
            return PtrVal::Var(v);
        }
        if matches!(self.global_types.get(name), Some(CType::Array(..))) {
            return PtrVal::AddrOfArray;
        }
        PtrVal::None
    }

    fn is_array_typed(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if let Some((_, ty)) = scope.get(name) {
                return matches!(ty, CType::Array(..));
            }
        }
        matches!(self.global_types.get(name), Some(CType::Array(..)))
    }

    /// Best-effort C type of an expression, for cast and member checks.
    fn expr_ctype(&self, expr: &CExpr) -> Option<CType> {
        match expr {
            CExpr::Ident(name) => {
                for scope in self.scopes.iter().rev() {
                    if let Some((_, ty)) = scope.get(name) {
                        return Some(ty.clone());
                    }
                }
                self.global_types.get(name).cloned()
            }
            CExpr::Unary {
                op: UnaryOp::Deref,
                expr,
            } => self.expr_ctype(expr)?.pointee().cloned(),
            CExpr::Cast { ty, .. } => Some(ty.clone()),
            CExpr::Member { base, field, arrow } => {
                let base_ty = self.expr_ctype(base)?;
                let record = match (&base_ty, arrow) {
                    (CType::Pointer(inner), true) => match inner.as_ref() {
                        CType::Record { name, .. } => name.clone(),
                        _ => return None,
                    },
                    (CType::Record { name, .. }, false) => name.clone(),
                    _ => return None,
                };
                self.field_types.get(&(record, field.clone())).cloned()
            }
            _ => None,
        }
    }

    fn expr_record_name(&self, expr: &CExpr) -> Option<String> {
        let ty = self.expr_ctype(expr)?;
        match ty {
            CType::Record { name, .. } => Some(name),
            CType::Pointer(inner) => match *inner {
                CType::Record { name, .. } => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    fn taint_for_shape(&mut self, v: VarId, ty: &CType) {
        if ty.is_function_pointer() {
            self.store.constrain(Constraint::ForcedWild {
                v,
                reason: WildReason::FunctionPointer,
            });
        } else if ty.is_pointer_to_pointer() {
            self.store.constrain(Constraint::ForcedWild {
                v,
                reason: WildReason::PointerToPointer,
            });
        }
    }

    fn taint_names(&mut self, names: &[String], what: &str) {
        self.saw_opaque = true;
        for name in names {
            if let PtrVal::Var(v) = self.resolve_ident(name) {
                self.store.constrain(Constraint::ForcedWild {
                    v,
                    reason: WildReason::UnmodeledPattern { what: what.into() },
                });
            }
        }
    }

    fn note_ref(&mut self, v: VarId) {
        if let Some(collect) = &mut self.collect {
            collect.push(v);
        }
    }
}

/// Whether a pointer cast preserves enough structure to stay checked.
fn cast_compatible(src: &CType, dst: &CType) -> bool {
    match (src.pointee(), dst.pointee()) {
        (Some(a), Some(b)) => a == b || matches!(a, CType::Void) || matches!(b, CType::Void),
        // Array decay to a matching element pointer.
        (None, Some(b)) => match src {
            CType::Array(elem, _) => elem.as_ref() == b,
            _ => false,
        },
        _ => false,
    }
}
