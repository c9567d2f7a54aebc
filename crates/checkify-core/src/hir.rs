//! C HIR: the simplified translation-unit representation the constraint
//! generator walks.
//!
//! The HIR deliberately models only what qualifier inference needs: pointer
//! shapes in types, the usage patterns of pointer expressions, and enough
//! source-span bookkeeping to rewrite declarations in place. Anything the
//! AST bridge cannot classify lowers to an `Opaque` node carrying the
//! identifiers it mentions, so the generator can fail safely toward Wild
//! instead of aborting.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::path::PathBuf;

/// Byte range into the translation unit's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Human-readable source position, kept alongside spans for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A C type, flattened to the shapes qualifier inference distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CType {
    Void,
    Bool,
    Char,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    /// A typedef or otherwise unresolved named type.
    Named(String),
    Record {
        name: String,
        is_union: bool,
    },
    Pointer(Box<CType>),
    Array(Box<CType>, Option<u64>),
    Function {
        ret: Box<CType>,
        params: Vec<CType>,
        variadic: bool,
    },
}

impl CType {
    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }

    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Pointer whose pointee is itself a pointer.
    pub fn is_pointer_to_pointer(&self) -> bool {
        matches!(self.pointee(), Some(CType::Pointer(_)))
    }

    /// Pointer to a function type.
    pub fn is_function_pointer(&self) -> bool {
        matches!(self.pointee(), Some(CType::Function { .. }))
    }

    pub fn is_char_pointer(&self) -> bool {
        matches!(self.pointee(), Some(CType::Char))
    }

    /// Render a plain C spelling, used when a rewrite site did not capture
    /// the original pointee text.
    pub fn render(&self) -> String {
        match self {
            CType::Void => "void".into(),
            CType::Bool => "_Bool".into(),
            CType::Char => "char".into(),
            CType::Int => "int".into(),
            CType::UInt => "unsigned int".into(),
            CType::Long => "long".into(),
            CType::ULong => "unsigned long".into(),
            CType::Float => "float".into(),
            CType::Double => "double".into(),
            CType::Named(name) => name.clone(),
            CType::Record { name, is_union } => {
                if *is_union {
                    format!("union {name}")
                } else {
                    format!("struct {name}")
                }
            }
            CType::Pointer(inner) => format!("{} *", inner.render()),
            CType::Array(inner, Some(n)) => format!("{}[{n}]", inner.render()),
            CType::Array(inner, None) => format!("{}[]", inner.render()),
            CType::Function { ret, .. } => format!("{} (*)()", ret.render()),
        }
    }
}

/// Where and how a pointer declaration can be respelled.
///
/// `span` covers the original `base-type * name` text; `pointee_text` is the
/// verbatim spelling of the pointee so the rewrite preserves typedefs and
/// qualifiers the HIR flattens away. Declarations that share a specifier
/// with other declarators carry no site and are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSite {
    pub span: Span,
    pub pointee_text: String,
    pub name: String,
}

/// Unary operators the generator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Deref,
    AddrOf,
    Neg,
    Not,
    BitNot,
    PreInc,
    PostInc,
    PreDec,
    PostDec,
}

/// Binary operators. Only additive operators matter to inference (pointer
/// arithmetic); the rest are carried for completeness of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// A C expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    CharLit(char),
    StrLit(String),
    Unary {
        op: UnaryOp,
        expr: Box<CExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
    },
    /// Plain or compound assignment (`op` is the compound operator, if any).
    Assign {
        op: Option<BinOp>,
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
    },
    Index {
        base: Box<CExpr>,
        index: Box<CExpr>,
    },
    Call {
        callee: Box<CExpr>,
        args: Vec<CExpr>,
    },
    Member {
        base: Box<CExpr>,
        field: String,
        arrow: bool,
    },
    Cast {
        ty: CType,
        expr: Box<CExpr>,
    },
    Comma(Vec<CExpr>),
    /// An expression shape the bridge does not model. Carries every
    /// identifier mentioned inside so the generator can taint them.
    Opaque {
        names: Vec<String>,
        span: Span,
    },
}

impl CExpr {
    /// Collect every identifier mentioned in this expression.
    pub fn mentioned_names(&self, out: &mut Vec<String>) {
        match self {
            CExpr::Ident(name) => out.push(name.clone()),
            CExpr::Unary { expr, .. } | CExpr::Cast { expr, .. } => expr.mentioned_names(out),
            CExpr::Binary { lhs, rhs, .. } | CExpr::Assign { lhs, rhs, .. } => {
                lhs.mentioned_names(out);
                rhs.mentioned_names(out);
            }
            CExpr::Index { base, index } => {
                base.mentioned_names(out);
                index.mentioned_names(out);
            }
            CExpr::Call { callee, args } => {
                callee.mentioned_names(out);
                for arg in args {
                    arg.mentioned_names(out);
                }
            }
            CExpr::Member { base, .. } => base.mentioned_names(out),
            CExpr::Comma(exprs) => {
                for e in exprs {
                    e.mentioned_names(out);
                }
            }
            CExpr::Opaque { names, .. } => out.extend(names.iter().cloned()),
            CExpr::IntLit(_) | CExpr::FloatLit(_) | CExpr::CharLit(_) | CExpr::StrLit(_) => {}
        }
    }
}

/// A statement plus the span it occupies, kept for checked-region insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct CStmt {
    pub kind: CStmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CStmtKind {
    Decl(CVarDecl),
    Expr(CExpr),
    If {
        cond: CExpr,
        then_body: Vec<CStmt>,
        else_body: Option<Vec<CStmt>>,
    },
    While {
        cond: CExpr,
        body: Vec<CStmt>,
    },
    DoWhile {
        cond: CExpr,
        body: Vec<CStmt>,
    },
    For {
        init: Option<Box<CStmt>>,
        cond: Option<CExpr>,
        step: Option<CExpr>,
        body: Vec<CStmt>,
    },
    Return(Option<CExpr>),
    Block(Vec<CStmt>),
    Break,
    Continue,
    /// A statement shape the bridge does not model.
    Opaque { names: Vec<String> },
}

/// A variable declaration, local or global.
#[derive(Debug, Clone, PartialEq)]
pub struct CVarDecl {
    pub name: String,
    pub ty: CType,
    pub init: Option<CExpr>,
    pub loc: SourceLoc,
    pub is_extern: bool,
    pub is_static: bool,
    pub site: Option<RewriteSite>,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CParam {
    pub name: String,
    pub ty: CType,
    pub loc: SourceLoc,
    pub site: Option<RewriteSite>,
}

/// A function declaration or definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CFunction {
    pub name: String,
    pub ret: CType,
    pub params: SmallVec<[CParam; 4]>,
    pub is_variadic: bool,
    pub is_static: bool,
    pub is_definition: bool,
    pub loc: SourceLoc,
    pub ret_site: Option<RewriteSite>,
    pub body: Option<Vec<CStmt>>,
    /// Span of the body's compound statement, for region insertion.
    pub body_span: Option<Span>,
}

/// A struct or union field.
#[derive(Debug, Clone, PartialEq)]
pub struct CField {
    pub name: String,
    pub ty: CType,
    pub loc: SourceLoc,
    pub site: Option<RewriteSite>,
}

/// A struct or union definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CRecord {
    pub name: String,
    pub is_union: bool,
    pub fields: Vec<CField>,
    pub loc: SourceLoc,
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum CDecl {
    Function(CFunction),
    Global(CVarDecl),
    Record(CRecord),
    /// Unmodeled top-level shape; mentioned names are tainted.
    Opaque { names: Vec<String> },
}

/// One lowered translation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CModule {
    pub file: PathBuf,
    pub source: String,
    pub decls: Vec<CDecl>,
}

impl CModule {
    pub fn functions(&self) -> impl Iterator<Item = &CFunction> {
        self.decls.iter().filter_map(|d| match d {
            CDecl::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &CRecord> {
        self.decls.iter().filter_map(|d| match d {
            CDecl::Record(r) => Some(r),
            _ => None,
        })
    }
}
