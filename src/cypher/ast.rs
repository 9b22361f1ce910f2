//! Cypher AST (Abstract Syntax Tree)
//!
//! These types represent parsed Cypher queries. They are pure data —
//! no behavior beyond printing, no storage references, no execution logic.
//!
//! The `Display` impls render an AST back to Cypher text that re-parses to a
//! structurally equal tree (round-trip modulo formatting).

use std::fmt;

/// A complete Cypher query: an ordered sequence of clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

/// A single clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Create(CreateClause),
    Merge(MergeClause),
    Delete(DeleteClause),
    Set(SetClause),
    Remove(RemoveClause),
    With(WithClause),
    Unwind(UnwindClause),
    Where(Expr),
    Return(ReturnClause),
    Call(CallClause),
    /// UNION separator between two query parts.
    Union { all: bool },
}

/// MATCH / OPTIONAL MATCH with pattern(s) and optional WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expr>,
}

/// CREATE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
}

/// MERGE clause with ON CREATE / ON MATCH actions.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

/// DELETE / DETACH DELETE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub detach: bool,
    pub expressions: Vec<Expr>,
}

/// SET clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub items: Vec<SetItem>,
}

/// REMOVE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveClause {
    pub items: Vec<RemoveItem>,
}

/// WITH clause (projection pipeline boundary).
#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

/// UNWIND expr AS name.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindClause {
    pub expr: Expr,
    pub alias: String,
}

/// RETURN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

/// Single projection item in RETURN or WITH.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ReturnItem {
    /// Column key: the alias when given, otherwise the literal form of the
    /// expression (`n`, `n.name`, `count(n)`, …).
    pub fn key(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => self.expr.to_string(),
        }
    }
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// CALL procedure(args) YIELD items WHERE …
#[derive(Debug, Clone, PartialEq)]
pub struct CallClause {
    pub procedure: String,
    pub args: Vec<Expr>,
    pub yields: Vec<YieldItem>,
    pub where_clause: Option<Expr>,
}

/// YIELD item with optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct YieldItem {
    pub name: String,
    pub alias: Option<String>,
}

// ============================================================================
// Patterns
// ============================================================================

/// A pattern: (a:Person)-[:KNOWS]->(b:Person)
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub elements: Vec<PatternElement>,
}

impl Pattern {
    /// Variables introduced by this pattern, in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                PatternElement::Node(n) => n.variable.as_deref(),
                PatternElement::Relationship(r) => r.variable.as_deref(),
            })
            .collect()
    }
}

/// Element of a pattern — either a node or a relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    Node(NodePattern),
    Relationship(RelPattern),
}

/// Node pattern: (variable:Label1:Label2 {prop: value})
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    /// Inline property constraints, in source order.
    pub properties: Vec<(String, Expr)>,
}

/// Relationship pattern: -[variable:TYPE1|TYPE2 *min..max {props}]->
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub variable: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: Vec<(String, Expr)>,
    pub hops: Option<HopRange>,
}

/// Pattern direction, derived from the arrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// `<-[…]-`
    Left,
    /// `-[…]->`
    Right,
    /// `<-[…]->`
    Both,
    /// `-[…]-`
    None,
}

/// Variable-length hop range: `*`, `*N`, `*N..M`, `*..M`, `*N..`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

// ============================================================================
// SET / REMOVE items
// ============================================================================

/// Single SET item.
#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// SET n.prop = expr
    Property { variable: String, keys: Vec<String>, value: Expr },
    /// SET n:Label1:Label2
    Labels { variable: String, labels: Vec<String> },
    /// SET n = expr (replace the whole property map)
    Replace { variable: String, value: Expr },
    /// SET n += expr (shallow-merge into the property map)
    Merge { variable: String, value: Expr },
}

/// Single REMOVE item.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    /// REMOVE n.prop
    Property { variable: String, keys: Vec<String> },
    /// REMOVE n:Label1:Label2
    Labels { variable: String, labels: Vec<String> },
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression in Cypher.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// String literal
    Str(String),
    /// Boolean literal
    Bool(bool),
    /// NULL literal
    Null,
    /// Variable reference: `n`, `r`
    Variable(String),
    /// Property access: `n.name`
    Property { expr: Box<Expr>, key: String },
    /// Parameter: `$name`
    Parameter(String),
    /// List: `[1, 2, 3]`
    List(Vec<Expr>),
    /// Map: `{name: 'Ada', age: 3}` — entries in source order
    Map(Vec<(String, Expr)>),
    /// Binary operation: `a + b`, `a = b`, `a AND b`, `a IN b`
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    /// Unary operation: `NOT a`, `-a`, `a IS NULL`
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Function call: `count(n)`, `toUpper(s)`; empty args for `count(*)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    /// CASE expression, both simple and searched forms
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// Bare pattern used as a predicate: `(n)-[:KNOWS]->()`
    Pattern(Box<Pattern>),
    /// EXISTS((n)-[:KNOWS]->())
    Exists(Box<Pattern>),
    /// ALL/ANY/NONE/SINGLE (x IN list WHERE predicate)
    Quantified {
        quantifier: Quantifier,
        variable: String,
        list: Box<Expr>,
        predicate: Box<Expr>,
    },
    /// [x IN list WHERE predicate | projection]
    ListComprehension {
        variable: String,
        list: Box<Expr>,
        predicate: Option<Box<Expr>>,
        projection: Option<Box<Expr>>,
    },
    /// `*` in RETURN * / count(*)
    Star,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Pow,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
    // Membership / string
    In, StartsWith, EndsWith, Contains, RegexMatch,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
    IsNull,
    IsNotNull,
}

/// Quantifier for list predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
    None,
    Single,
}

// ============================================================================
// Printer
// ============================================================================

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 { write!(f, " ")?; }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Match(m) => {
                if m.optional { write!(f, "OPTIONAL ")?; }
                write!(f, "MATCH {}", join(&m.patterns, ", "))?;
                if let Some(w) = &m.where_clause {
                    write!(f, " WHERE {w}")?;
                }
                Ok(())
            }
            Clause::Create(c) => write!(f, "CREATE {}", join(&c.patterns, ", ")),
            Clause::Merge(m) => {
                write!(f, "MERGE {}", m.pattern)?;
                if !m.on_create.is_empty() {
                    write!(f, " ON CREATE SET {}", join(&m.on_create, ", "))?;
                }
                if !m.on_match.is_empty() {
                    write!(f, " ON MATCH SET {}", join(&m.on_match, ", "))?;
                }
                Ok(())
            }
            Clause::Delete(d) => {
                if d.detach { write!(f, "DETACH ")?; }
                write!(f, "DELETE {}", join(&d.expressions, ", "))
            }
            Clause::Set(s) => write!(f, "SET {}", join(&s.items, ", ")),
            Clause::Remove(r) => write!(f, "REMOVE {}", join(&r.items, ", ")),
            Clause::With(w) => {
                write!(f, "WITH ")?;
                if w.distinct { write!(f, "DISTINCT ")?; }
                write!(f, "{}", join(&w.items, ", "))?;
                write_tail(f, &w.order_by, &w.skip, &w.limit)?;
                if let Some(p) = &w.where_clause {
                    write!(f, " WHERE {p}")?;
                }
                Ok(())
            }
            Clause::Unwind(u) => write!(f, "UNWIND {} AS {}", u.expr, u.alias),
            Clause::Where(e) => write!(f, "WHERE {e}"),
            Clause::Return(r) => {
                write!(f, "RETURN ")?;
                if r.distinct { write!(f, "DISTINCT ")?; }
                write!(f, "{}", join(&r.items, ", "))?;
                write_tail(f, &r.order_by, &r.skip, &r.limit)
            }
            Clause::Call(c) => {
                write!(f, "CALL {}({})", c.procedure, join(&c.args, ", "))?;
                if !c.yields.is_empty() {
                    write!(f, " YIELD {}", join(&c.yields, ", "))?;
                }
                if let Some(w) = &c.where_clause {
                    write!(f, " WHERE {w}")?;
                }
                Ok(())
            }
            Clause::Union { all } => {
                if *all { write!(f, "UNION ALL") } else { write!(f, "UNION") }
            }
        }
    }
}

fn write_tail(
    f: &mut fmt::Formatter<'_>,
    order_by: &[OrderItem],
    skip: &Option<Expr>,
    limit: &Option<Expr>,
) -> fmt::Result {
    if !order_by.is_empty() {
        write!(f, " ORDER BY {}", join(order_by, ", "))?;
    }
    if let Some(s) = skip {
        write!(f, " SKIP {s}")?;
    }
    if let Some(l) = limit {
        write!(f, " LIMIT {l}")?;
    }
    Ok(())
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(sep)
}

/// Print a label/type name, backtick-escaping anything that would not lex
/// back as a plain identifier.
fn ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && super::lexer::keyword_or_ident(name) == super::lexer::TokenKind::Identifier;
    if plain {
        name.to_string()
    } else {
        format!("`{name}`")
    }
}

impl fmt::Display for ReturnItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(a) = &self.alias {
            write!(f, " AS {a}")?;
        }
        Ok(())
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if !self.ascending { write!(f, " DESC")?; }
        Ok(())
    }
}

impl fmt::Display for YieldItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(a) = &self.alias {
            write!(f, " AS {a}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.elements {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PatternElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternElement::Node(n) => write!(f, "{n}"),
            PatternElement::Relationship(r) => write!(f, "{r}"),
        }
    }
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        if let Some(v) = &self.variable {
            write!(f, "{v}")?;
        }
        for label in &self.labels {
            write!(f, ":{}", ident(label))?;
        }
        if !self.properties.is_empty() {
            if self.variable.is_some() || !self.labels.is_empty() {
                write!(f, " ")?;
            }
            write_map(f, &self.properties)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for RelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            PatternDirection::Left | PatternDirection::Both => write!(f, "<-")?,
            _ => write!(f, "-")?,
        }
        let has_detail = self.variable.is_some()
            || !self.rel_types.is_empty()
            || !self.properties.is_empty()
            || self.hops.is_some();
        if has_detail {
            write!(f, "[")?;
            if let Some(v) = &self.variable {
                write!(f, "{v}")?;
            }
            for (i, ty) in self.rel_types.iter().enumerate() {
                if i == 0 { write!(f, ":{}", ident(ty))?; } else { write!(f, "|{}", ident(ty))?; }
            }
            if let Some(hops) = &self.hops {
                write!(f, "*")?;
                match (hops.min, hops.max) {
                    (Some(n), Some(m)) if n == m => write!(f, "{n}")?,
                    (Some(n), Some(m)) => write!(f, "{n}..{m}")?,
                    (Some(n), None) => write!(f, "{n}..")?,
                    (None, Some(m)) => write!(f, "..{m}")?,
                    (None, None) => {}
                }
            }
            if !self.properties.is_empty() {
                write!(f, " ")?;
                write_map(f, &self.properties)?;
            }
            write!(f, "]")?;
        }
        match self.direction {
            PatternDirection::Right | PatternDirection::Both => write!(f, "->"),
            _ => write!(f, "-"),
        }
    }
}

fn write_map(f: &mut fmt::Formatter<'_>, entries: &[(String, Expr)]) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 { write!(f, ", ")?; }
        write!(f, "{k}: {v}")?;
    }
    write!(f, "}}")
}

impl fmt::Display for SetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetItem::Property { variable, keys, value } => {
                write!(f, "{variable}.{} = {value}", keys.join("."))
            }
            SetItem::Labels { variable, labels } => {
                write!(f, "{variable}")?;
                for label in labels {
                    write!(f, ":{}", ident(label))?;
                }
                Ok(())
            }
            SetItem::Replace { variable, value } => write!(f, "{variable} = {value}"),
            SetItem::Merge { variable, value } => write!(f, "{variable} += {value}"),
        }
    }
}

impl fmt::Display for RemoveItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveItem::Property { variable, keys } => {
                write!(f, "{variable}.{}", keys.join("."))
            }
            RemoveItem::Labels { variable, labels } => {
                write!(f, "{variable}")?;
                for label in labels {
                    write!(f, ":{}", ident(label))?;
                }
                Ok(())
            }
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::In => "IN",
            BinaryOp::StartsWith => "STARTS WITH",
            BinaryOp::EndsWith => "ENDS WITH",
            BinaryOp::Contains => "CONTAINS",
            BinaryOp::RegexMatch => "=~",
        }
    }
}

impl Quantifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Quantifier::All => "all",
            Quantifier::Any => "any",
            Quantifier::None => "none",
            Quantifier::Single => "single",
        }
    }
}

impl Expr {
    /// True when the printed form needs parentheses as an operand.
    fn is_compound(&self) -> bool {
        matches!(self, Expr::Binary { .. } | Expr::Unary { .. } | Expr::Case { .. })
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_compound() {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer(i) => write!(f, "{i}"),
            Expr::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Expr::Str(s) => {
                write!(f, "'")?;
                for c in s.chars() {
                    match c {
                        '\\' => write!(f, "\\\\")?,
                        '\'' => write!(f, "\\'")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "'")
            }
            Expr::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Expr::Null => write!(f, "null"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Property { expr, key } => {
                expr.fmt_operand(f)?;
                write!(f, ".{key}")
            }
            Expr::Parameter(name) => write!(f, "${name}"),
            Expr::List(items) => write!(f, "[{}]", join(items, ", ")),
            Expr::Map(entries) => write_map(f, entries),
            Expr::Binary { left, op, right } => {
                left.fmt_operand(f)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f)
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => {
                    write!(f, "NOT ")?;
                    expr.fmt_operand(f)
                }
                UnaryOp::Minus => {
                    write!(f, "-")?;
                    expr.fmt_operand(f)
                }
                UnaryOp::Plus => {
                    write!(f, "+")?;
                    expr.fmt_operand(f)
                }
                UnaryOp::IsNull => {
                    expr.fmt_operand(f)?;
                    write!(f, " IS NULL")
                }
                UnaryOp::IsNotNull => {
                    expr.fmt_operand(f)?;
                    write!(f, " IS NOT NULL")
                }
            },
            Expr::FunctionCall { name, args, distinct } => {
                // count(*) keeps its star; args are empty either way
                if args.is_empty() && name.eq_ignore_ascii_case("count") {
                    return write!(f, "{name}(*)");
                }
                write!(f, "{name}(")?;
                if *distinct { write!(f, "DISTINCT ")?; }
                write!(f, "{})", join(args, ", "))
            }
            Expr::Case { operand, whens, else_expr } => {
                write!(f, "CASE")?;
                if let Some(op) = operand {
                    write!(f, " {op}")?;
                }
                for (when, then) in whens {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                write!(f, " END")
            }
            Expr::Pattern(p) => write!(f, "{p}"),
            Expr::Exists(p) => write!(f, "exists({p})"),
            Expr::Quantified { quantifier, variable, list, predicate } => {
                write!(f, "{}({variable} IN {list} WHERE {predicate})", quantifier.keyword())
            }
            Expr::ListComprehension { variable, list, predicate, projection } => {
                write!(f, "[{variable} IN {list}")?;
                if let Some(p) = predicate {
                    write!(f, " WHERE {p}")?;
                }
                if let Some(m) = projection {
                    write!(f, " | {m}")?;
                }
                write!(f, "]")
            }
            Expr::Star => write!(f, "*"),
        }
    }
}
