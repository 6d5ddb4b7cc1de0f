// sage-core/src/domain/expr/ast.rs

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    List(Vec<Expr>),

    /// `df['col']`, or `df['logical_name']['col']` in package scope.
    Column {
        table: Option<String>,
        column: String,
    },

    /// `df.shape[0]`
    RowCount,

    /// `now()`, `today()`, `pd.Timestamp.now()` — the reference time
    /// supplied by the evaluation context, never the wall clock.
    Now,

    /// `to_datetime(x)` / `pd.to_datetime(x)`. Coerce semantics:
    /// unparseable values become NULL, never an error.
    ToDatetime(Box<Expr>),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Method {
        receiver: Box<Expr>,
        call: MethodCall,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `~`
    Not,
    /// unary `-`
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `&` — logical conjunction (see parser for the precedence rule)
    And,
    /// `|` — logical disjunction
    Or,
}

/// `duplicated(keep=...)`: which occurrences count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepPolicy {
    /// `keep=False`: every occurrence of a repeated value is marked.
    MarkAll,
    /// default / `keep='first'`: the first occurrence survives.
    KeepFirst,
}

impl Expr {
    /// Logical table names referenced by `df['name'][...]` accesses, in
    /// source order, first occurrence only. The Validator uses the
    /// first entry to attribute vector verdicts of a cross-rule to a
    /// catalog's rows.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Column {
                table: Some(name), ..
            } => {
                if !out.iter().any(|t| t == name) {
                    out.push(name.clone());
                }
            }
            Expr::Column { table: None, .. }
            | Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::RowCount
            | Expr::Now => {}
            Expr::List(items) => {
                for item in items {
                    item.collect_tables(out);
                }
            }
            Expr::ToDatetime(inner) => inner.collect_tables(out),
            Expr::Unary { operand, .. } => operand.collect_tables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_tables(out);
                rhs.collect_tables(out);
            }
            Expr::Method { receiver, call } => {
                receiver.collect_tables(out);
                if let MethodCall::IsIn(arg) = call {
                    arg.collect_tables(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    NotNull,
    IsNull,
    IsIn(Box<Expr>),
    Duplicated(KeepPolicy),
    StrContains(String),
    StrMatch(String),
    StrLen,
    NUnique,
    All,
    Any,
    Min,
    Max,
    Sum,
    Mean,
    Abs,
}
