//! AST for the restricted mapping-expression grammar

/// A parsed expression node.
///
/// The grammar is deliberately small: literals, list literals, identifier
/// lookup, member/index access, arithmetic, comparison, membership, boolean
/// logic, conditionals, and calls to allow-listed function names. There is
/// no assignment, no lambda, and no loop construct.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),

    // Identifier lookup against the evaluation bindings
    Ident(String),

    // Member access: `expr.field`
    Member { object: Box<Expr>, field: String },

    // Index access: `expr[index]`
    Index { object: Box<Expr>, index: Box<Expr> },

    // Call to a registered function, bare (`md5`) or namespaced
    // (`datetime.now`); the dotted name is joined at parse time.
    Call { function: String, args: Vec<Expr> },

    // Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },

    // Binary operation
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    // Conditional: `then_branch if condition else else_branch`
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    // Membership
    In,
    NotIn,

    // Logical
    And,
    Or,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::NotIn => "not in",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}
