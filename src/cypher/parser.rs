//! Cypher recursive descent parser.
//!
//! Parses token streams into a clause-sequence [`Query`]. Supports:
//! - MATCH / OPTIONAL MATCH with patterns and variable-length hops
//! - WHERE, RETURN, WITH, ORDER BY, SKIP, LIMIT, UNION
//! - CREATE, MERGE (ON CREATE / ON MATCH), DELETE / DETACH DELETE, SET, REMOVE
//! - UNWIND, CALL ... YIELD
//! - Full expression parsing with precedence climbing

use crate::{Error, Result};
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Parser state — wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!(
                "Expected {:?}, found {:?} '{}'",
                kind, tok.kind, tok.text
            )))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> Error {
        let tok = self.peek();
        Error::ParseError {
            line: tok.line,
            column: tok.column,
            message,
        }
    }

    /// Consume an identifier token and return its text.
    fn ident(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }
}

/// Parse a complete Cypher query from significant tokens.
pub fn parse_query(tokens: &[Token]) -> Result<Query> {
    let mut p = Parser::new(tokens);
    let mut clauses = Vec::new();

    loop {
        match p.peek_kind() {
            TokenKind::Match => {
                p.advance();
                clauses.push(Clause::Match(parse_match_body(&mut p, false)?));
            }
            TokenKind::Optional => {
                p.advance();
                p.expect(TokenKind::Match)?;
                clauses.push(Clause::Match(parse_match_body(&mut p, true)?));
            }
            TokenKind::Create => {
                p.advance();
                clauses.push(Clause::Create(CreateClause {
                    patterns: parse_pattern_list(&mut p)?,
                }));
            }
            TokenKind::Merge => {
                p.advance();
                clauses.push(Clause::Merge(parse_merge_body(&mut p)?));
            }
            TokenKind::Delete | TokenKind::Detach => {
                let detach = p.eat(TokenKind::Detach);
                p.expect(TokenKind::Delete)?;
                let mut expressions = vec![parse_expr(&mut p)?];
                while p.eat(TokenKind::Comma) {
                    expressions.push(parse_expr(&mut p)?);
                }
                clauses.push(Clause::Delete(DeleteClause { detach, expressions }));
            }
            TokenKind::Set => {
                p.advance();
                clauses.push(Clause::Set(SetClause {
                    items: parse_set_items(&mut p)?,
                }));
            }
            TokenKind::Remove => {
                p.advance();
                clauses.push(Clause::Remove(RemoveClause {
                    items: parse_remove_items(&mut p)?,
                }));
            }
            TokenKind::With => {
                p.advance();
                clauses.push(Clause::With(parse_with_body(&mut p)?));
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(&mut p)?;
                p.expect(TokenKind::As)?;
                let alias = p.ident()?;
                clauses.push(Clause::Unwind(UnwindClause { expr, alias }));
            }
            TokenKind::Where => {
                p.advance();
                clauses.push(Clause::Where(parse_expr(&mut p)?));
            }
            TokenKind::Return => {
                p.advance();
                clauses.push(Clause::Return(parse_return_body(&mut p)?));
            }
            TokenKind::Call => {
                p.advance();
                clauses.push(Clause::Call(parse_call_body(&mut p)?));
            }
            TokenKind::Union => {
                p.advance();
                let all = p.eat(TokenKind::All);
                clauses.push(Clause::Union { all });
            }
            TokenKind::Semicolon | TokenKind::Eof => break,
            kind => {
                return Err(p.error(format!(
                    "Unexpected token {:?} '{}' at start of clause",
                    kind,
                    p.peek().text
                )));
            }
        }
    }

    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!(
            "Unexpected token after query: {:?}",
            p.peek_kind()
        )));
    }
    if clauses.is_empty() {
        return Err(p.error("Empty query".into()));
    }

    Ok(Query { clauses })
}

// ============================================================================
// Clause bodies
// ============================================================================

fn parse_match_body(p: &mut Parser, optional: bool) -> Result<MatchClause> {
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(MatchClause { optional, patterns, where_clause })
}

fn parse_merge_body(p: &mut Parser) -> Result<MergeClause> {
    let pattern = parse_pattern(p)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.at(TokenKind::On) {
        p.advance();
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error(format!(
                "Expected CREATE or MATCH after ON, found '{}'",
                p.peek().text
            )));
        }
    }

    Ok(MergeClause { pattern, on_create, on_match })
}

fn parse_with_body(p: &mut Parser) -> Result<WithClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let items = parse_return_items(p)?;
    let (order_by, skip, limit) = parse_order_skip_limit(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(WithClause { distinct, items, where_clause, order_by, skip, limit })
}

fn parse_return_body(p: &mut Parser) -> Result<ReturnClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let items = parse_return_items(p)?;
    let (order_by, skip, limit) = parse_order_skip_limit(p)?;
    Ok(ReturnClause { distinct, items, order_by, skip, limit })
}

fn parse_return_items(p: &mut Parser) -> Result<Vec<ReturnItem>> {
    let mut items = Vec::new();
    loop {
        if p.at(TokenKind::Star) {
            p.advance();
            items.push(ReturnItem { expr: Expr::Star, alias: None });
        } else {
            let expr = parse_expr(p)?;
            let alias = if p.eat(TokenKind::As) {
                Some(p.ident()?)
            } else {
                None
            };
            items.push(ReturnItem { expr, alias });
        }
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(items)
}

fn parse_order_skip_limit(
    p: &mut Parser,
) -> Result<(Vec<OrderItem>, Option<Expr>, Option<Expr>)> {
    let mut order_by = Vec::new();
    if p.at(TokenKind::Order) {
        p.advance();
        p.expect(TokenKind::By)?;
        loop {
            let expr = parse_expr(p)?;
            let ascending = if p.eat(TokenKind::Desc) {
                false
            } else {
                p.eat(TokenKind::Asc);
                true
            };
            order_by.push(OrderItem { expr, ascending });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    let skip = if p.eat(TokenKind::Skip) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    let limit = if p.eat(TokenKind::Limit) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok((order_by, skip, limit))
}

fn parse_call_body(p: &mut Parser) -> Result<CallClause> {
    // CALL { ... } subqueries are out of scope.
    if p.at(TokenKind::LBrace) {
        return Err(p.error("CALL subqueries are not supported".into()));
    }

    let mut procedure = p.ident()?;
    while p.eat(TokenKind::Dot) {
        let part = p.ident()?;
        procedure = format!("{procedure}.{part}");
    }

    let mut args = Vec::new();
    p.expect(TokenKind::LParen)?;
    if !p.at(TokenKind::RParen) {
        args.push(parse_expr(p)?);
        while p.eat(TokenKind::Comma) {
            args.push(parse_expr(p)?);
        }
    }
    p.expect(TokenKind::RParen)?;

    let mut yields = Vec::new();
    if p.eat(TokenKind::Yield) {
        loop {
            let name = p.ident()?;
            let alias = if p.eat(TokenKind::As) {
                Some(p.ident()?)
            } else {
                None
            };
            yields.push(YieldItem { name, alias });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };

    Ok(CallClause { procedure, args, yields, where_clause })
}

// ============================================================================
// SET / REMOVE items
// ============================================================================

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();
    items.push(parse_set_item(p)?);
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetItem> {
    let variable = p.ident()?;

    if p.at(TokenKind::Dot) {
        // SET n.prop = expr
        let mut keys = Vec::new();
        while p.eat(TokenKind::Dot) {
            keys.push(p.ident()?);
        }
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::Property { variable, keys, value })
    } else if p.at(TokenKind::Colon) {
        // SET n:Label1:Label2
        let mut labels = Vec::new();
        while p.eat(TokenKind::Colon) {
            labels.push(p.ident()?);
        }
        Ok(SetItem::Labels { variable, labels })
    } else if p.eat(TokenKind::PlusEq) {
        // SET n += expr
        let value = parse_expr(p)?;
        Ok(SetItem::Merge { variable, value })
    } else if p.eat(TokenKind::Eq) {
        // SET n = expr
        let value = parse_expr(p)?;
        Ok(SetItem::Replace { variable, value })
    } else {
        Err(p.error("Expected '.', ':', '=', or '+=' after SET variable".into()))
    }
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = Vec::new();
    items.push(parse_remove_item(p)?);
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(items)
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.ident()?;

    if p.at(TokenKind::Dot) {
        let mut keys = Vec::new();
        while p.eat(TokenKind::Dot) {
            keys.push(p.ident()?);
        }
        Ok(RemoveItem::Property { variable, keys })
    } else if p.at(TokenKind::Colon) {
        let mut labels = Vec::new();
        while p.eat(TokenKind::Colon) {
            labels.push(p.ident()?);
        }
        Ok(RemoveItem::Labels { variable, labels })
    } else {
        Err(p.error("Expected '.' or ':' after REMOVE variable".into()))
    }
}

// ============================================================================
// Pattern parsing
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    patterns.push(parse_pattern(p)?);
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let mut elements = Vec::new();

    // A pattern starts with a node
    elements.push(PatternElement::Node(parse_node_pattern(p)?));

    // Then alternating: relationship, node, relationship, node, ...
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        elements.push(PatternElement::Relationship(parse_rel_pattern(p)?));
        elements.push(PatternElement::Node(parse_node_pattern(p)?));
    }

    Ok(Pattern { elements })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let mut variable = None;
    let mut labels = Vec::new();
    let mut properties = Vec::new();

    if p.at(TokenKind::Identifier) {
        variable = Some(p.advance().text.clone());
    }

    while p.eat(TokenKind::Colon) {
        labels.push(p.ident()?);
    }

    if p.at(TokenKind::LBrace) {
        properties = parse_map_entries(p)?;
    }

    p.expect(TokenKind::RParen)?;

    Ok(NodePattern { variable, labels, properties })
}

fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    // Leading arrow: <-[...] or -[...]
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut variable = None;
    let mut rel_types = Vec::new();
    let mut properties = Vec::new();
    let mut hops = None;

    if p.at(TokenKind::LBracket) {
        p.advance();

        if p.at(TokenKind::Identifier) {
            variable = Some(p.advance().text.clone());
        }

        // Types: :TYPE1|TYPE2 or :TYPE1|:TYPE2 (bare pipes accepted)
        if p.eat(TokenKind::Colon) {
            rel_types.push(p.ident()?);
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon);
                rel_types.push(p.ident()?);
            }
        }

        // Variable length: *, *N, *N..M, *..M, *N..
        if p.eat(TokenKind::Star) {
            let min = if p.at(TokenKind::Integer) {
                Some(parse_hop_count(p)?)
            } else {
                None
            };
            if p.eat(TokenKind::DotDot) {
                let max = if p.at(TokenKind::Integer) {
                    Some(parse_hop_count(p)?)
                } else {
                    None
                };
                hops = Some(HopRange { min, max });
            } else {
                hops = Some(match min {
                    Some(n) => HopRange { min: Some(n), max: Some(n) },
                    None => HopRange { min: None, max: None },
                });
            }
        }

        if p.at(TokenKind::LBrace) {
            properties = parse_map_entries(p)?;
        }

        p.expect(TokenKind::RBracket)?;
    }

    // Trailing arrow: ]-> or ]-
    let right_arrow = if p.eat(TokenKind::Arrow) {
        true
    } else {
        p.expect(TokenKind::Dash)?;
        false
    };

    let direction = match (left_arrow, right_arrow) {
        (true, true) => PatternDirection::Both,
        (true, false) => PatternDirection::Left,
        (false, true) => PatternDirection::Right,
        (false, false) => PatternDirection::None,
    };

    Ok(RelPattern { variable, rel_types, direction, properties, hops })
}

fn parse_hop_count(p: &mut Parser) -> Result<u32> {
    let tok = p.expect(TokenKind::Integer)?;
    let (line, column, text) = (tok.line, tok.column, tok.text.clone());
    text.parse::<u32>().map_err(|_| Error::ParseError {
        line,
        column,
        message: format!("Invalid hop count '{text}'"),
    })
}

fn parse_map_entries(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut entries = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.ident()?;
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            entries.push((key, value));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(entries)
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or_expr(p)
}

fn parse_or_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor_expr(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_xor_expr(p)?;
        left = binary(left, BinaryOp::Or, right);
    }
    Ok(left)
}

fn parse_xor_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::Xor) {
        let right = parse_and_expr(p)?;
        left = binary(left, BinaryOp::Xor, right);
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not_expr(p)?;
        left = binary(left, BinaryOp::And, right);
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not_expr(p)?;
        Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr) })
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_additive(p)?;

    loop {
        // IS NULL / IS NOT NULL — unary suffixes at comparison level
        if p.at(TokenKind::Is) {
            p.advance();
            let negated = p.eat(TokenKind::Not);
            p.expect(TokenKind::Null)?;
            let op = if negated { UnaryOp::IsNotNull } else { UnaryOp::IsNull };
            left = Expr::Unary { op, expr: Box::new(left) };
            continue;
        }

        // Membership / string operators
        if p.eat(TokenKind::In) {
            let right = parse_additive(p)?;
            left = binary(left, BinaryOp::In, right);
            continue;
        }
        if p.at(TokenKind::Starts) {
            p.advance();
            p.expect(TokenKind::With)?;
            let right = parse_additive(p)?;
            left = binary(left, BinaryOp::StartsWith, right);
            continue;
        }
        if p.at(TokenKind::Ends) {
            p.advance();
            p.expect(TokenKind::With)?;
            let right = parse_additive(p)?;
            left = binary(left, BinaryOp::EndsWith, right);
            continue;
        }
        if p.eat(TokenKind::Contains) {
            let right = parse_additive(p)?;
            left = binary(left, BinaryOp::Contains, right);
            continue;
        }

        let op = match p.peek_kind() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Neq => BinaryOp::Neq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Gte => BinaryOp::Gte,
            TokenKind::RegexMatch => BinaryOp::RegexMatch,
            _ => break,
        };
        p.advance();
        let right = parse_additive(p)?;
        left = binary(left, op, right);
    }

    Ok(left)
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplicative(p)?;
        left = binary(left, op, right);
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        let right = parse_unary(p)?;
        left = binary(left, op, right);
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_unary(p)?;
        Ok(Expr::Unary { op: UnaryOp::Minus, expr: Box::new(expr) })
    } else if p.eat(TokenKind::Plus) {
        let expr = parse_unary(p)?;
        Ok(Expr::Unary { op: UnaryOp::Plus, expr: Box::new(expr) })
    } else {
        parse_power(p)
    }
}

fn parse_power(p: &mut Parser) -> Result<Expr> {
    let left = parse_property_access(p)?;
    if p.eat(TokenKind::Caret) {
        // Right-associative
        let right = parse_power(p)?;
        Ok(binary(left, BinaryOp::Pow, right))
    } else {
        Ok(left)
    }
}

fn parse_property_access(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    while p.at(TokenKind::Dot) {
        p.advance();
        let key = p.ident()?;
        expr = Expr::Property { expr: Box::new(expr), key };
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let (line, column, text) = (tok.line, tok.column, tok.text.clone());
            let val = text.parse::<i64>().map_err(|_| Error::ParseError {
                line,
                column,
                message: format!("Invalid integer literal '{text}'"),
            })?;
            Ok(Expr::Integer(val))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let (line, column, text) = (tok.line, tok.column, tok.text.clone());
            let val = text.parse::<f64>().map_err(|_| Error::ParseError {
                line,
                column,
                message: format!("Invalid float literal '{text}'"),
            })?;
            Ok(Expr::Float(val))
        }
        TokenKind::StringLit => {
            let tok = p.advance();
            Ok(Expr::Str(tok.text.clone()))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expr::Bool(true))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Bool(false))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Null)
        }

        TokenKind::Parameter => {
            let tok = p.advance();
            Ok(Expr::Parameter(tok.text.clone()))
        }

        // Parenthesized expression or pattern expression
        TokenKind::LParen => parse_paren_or_pattern(p),

        // List literal or list comprehension
        TokenKind::LBracket => {
            // [x IN list ...] is a comprehension
            if p.peek_kind_at(1) == TokenKind::Identifier && p.peek_kind_at(2) == TokenKind::In {
                return parse_list_comprehension(p);
            }
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                items.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    items.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }

        // Map literal
        TokenKind::LBrace => {
            let entries = parse_map_entries(p)?;
            Ok(Expr::Map(entries))
        }

        // CASE expression
        TokenKind::Case => {
            p.advance();
            let operand = if !p.at(TokenKind::When) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let when_expr = parse_expr(p)?;
                p.expect(TokenKind::Then)?;
                let then_expr = parse_expr(p)?;
                whens.push((when_expr, then_expr));
            }
            if whens.is_empty() {
                return Err(p.error("CASE requires at least one WHEN branch".into()));
            }
            let else_expr = if p.eat(TokenKind::Else) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            p.expect(TokenKind::End)?;
            Ok(Expr::Case { operand, whens, else_expr })
        }

        // EXISTS(pattern)
        TokenKind::Exists => {
            p.advance();
            p.expect(TokenKind::LParen)?;
            let pattern = parse_pattern(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(Expr::Exists(Box::new(pattern)))
        }

        // Quantified predicates: all/any/none/single(x IN list WHERE pred)
        TokenKind::All | TokenKind::Any | TokenKind::None | TokenKind::Single
            if p.peek_kind_at(1) == TokenKind::LParen =>
        {
            let quantifier = match p.advance().kind {
                TokenKind::All => Quantifier::All,
                TokenKind::Any => Quantifier::Any,
                TokenKind::None => Quantifier::None,
                _ => Quantifier::Single,
            };
            p.expect(TokenKind::LParen)?;
            let variable = p.ident()?;
            p.expect(TokenKind::In)?;
            let list = parse_expr(p)?;
            p.expect(TokenKind::Where)?;
            let predicate = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(Expr::Quantified {
                quantifier,
                variable,
                list: Box::new(list),
                predicate: Box::new(predicate),
            })
        }

        // Identifier — variable or function call
        TokenKind::Identifier => {
            let tok = p.advance().clone();
            if p.at(TokenKind::LParen) {
                p.advance();
                let mut args = Vec::new();
                let distinct = p.eat(TokenKind::Distinct);

                if p.at(TokenKind::Star) {
                    // count(*) — no argument expressions
                    p.advance();
                } else if !p.at(TokenKind::RParen) {
                    args.push(parse_expr(p)?);
                    while p.eat(TokenKind::Comma) {
                        args.push(parse_expr(p)?);
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall { name: tok.text, args, distinct })
            } else {
                Ok(Expr::Variable(tok.text))
            }
        }

        _ => Err(p.error(format!(
            "Unexpected token in expression: {:?} '{}'",
            p.peek_kind(),
            p.peek().text
        ))),
    }
}

/// Disambiguate `(expr)` from a pattern expression `(a)-[:T]->(b)`.
fn parse_paren_or_pattern(p: &mut Parser) -> Result<Expr> {
    let saved = p.pos;

    // Attempt a pattern first. A bare `(x)` also parses as a pattern, so only
    // accept the pattern reading when a relationship follows.
    if let Ok(pattern) = parse_pattern(p) {
        if pattern.elements.len() > 1 {
            return Ok(Expr::Pattern(Box::new(pattern)));
        }
    }
    p.pos = saved;

    p.expect(TokenKind::LParen)?;
    let expr = parse_expr(p)?;
    p.expect(TokenKind::RParen)?;
    Ok(expr)
}

fn parse_list_comprehension(p: &mut Parser) -> Result<Expr> {
    p.expect(TokenKind::LBracket)?;
    let variable = p.ident()?;
    p.expect(TokenKind::In)?;
    let list = parse_expr(p)?;
    let predicate = if p.eat(TokenKind::Where) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };
    let projection = if p.eat(TokenKind::Pipe) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };
    p.expect(TokenKind::RBracket)?;
    Ok(Expr::ListComprehension {
        variable,
        list: Box::new(list),
        predicate,
        projection,
    })
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

// ============================================================================
// Tests
// ============================================================================
