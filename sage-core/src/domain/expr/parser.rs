// sage-core/src/domain/expr/parser.rs
//
// Pratt-style recursive descent. `&` and `|` bind BELOW comparisons
// (the reading every rule in the corpus intends). The one construct
// whose meaning would differ under bitwise precedence — a chained
// comparison like `a < b < c` — is rejected outright with a
// parenthesization hint instead of being silently reinterpreted.

use crate::domain::error::DomainError;
use crate::domain::expr::ast::{BinaryOp, Expr, KeepPolicy, MethodCall, UnaryOp};
use crate::domain::expr::lexer::{Spanned, Token};

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

/// Postfix chains pass through states that are not expressions yet
/// (`df`, `pd.Timestamp`, `col.str`, ...). Only `Done` may terminate.
enum Chain {
    Done(Expr),
    Df,
    Pd,
    PdTimestamp,
    DfShape,
    StrNamespace(Expr),
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Expr, DomainError> {
        let expr = self.parse_or()?;
        if let Some(t) = self.peek() {
            return Err(self.err_at(t.offset, "trailing input after expression"));
        }
        Ok(expr)
    }

    // --- PRECEDENCE LADDER ---

    fn parse_or(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::Amp) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, DomainError> {
        let lhs = self.parse_additive()?;

        let op = match self.peek_token() {
            Some(Token::EqEq) => Some(BinaryOp::Eq),
            Some(Token::NotEq) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };

        let Some(op) = op else { return Ok(lhs) };
        self.advance();
        let rhs = self.parse_additive()?;

        // Non-associative: a second comparator here is the ambiguous
        // construct; force the author to parenthesize.
        if matches!(
            self.peek_token(),
            Some(
                Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge
            )
        ) {
            let offset = self.peek().map(|t| t.offset).unwrap_or(0);
            return Err(self.err_at(
                offset,
                "chained comparisons are ambiguous; parenthesize each comparison \
                 and join them with & or |",
            ));
        }

        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, DomainError> {
        if self.eat(&Token::Tilde) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    // --- POSTFIX CHAINS (indexing, attributes, method calls) ---

    fn parse_postfix(&mut self) -> Result<Expr, DomainError> {
        let mut chain = self.parse_primary()?;

        loop {
            match self.peek_token() {
                Some(Token::LBracket) => {
                    self.advance();
                    chain = self.apply_index(chain)?;
                }
                Some(Token::Dot) => {
                    self.advance();
                    let name = self.expect_ident()?;
                    chain = self.apply_attribute(chain, &name)?;
                }
                _ => break,
            }
        }

        match chain {
            Chain::Done(expr) => Ok(expr),
            _ => Err(self.err_here("incomplete expression (dangling df/pd/str access)")),
        }
    }

    fn apply_index(&mut self, chain: Chain) -> Result<Chain, DomainError> {
        let result = match chain {
            Chain::Df => {
                let column = self.expect_string()?;
                Chain::Done(Expr::Column {
                    table: None,
                    column,
                })
            }
            Chain::Done(Expr::Column {
                table: None,
                column,
            }) => {
                // df['x']['y'] — the first index was a logical table name.
                let inner = self.expect_string()?;
                Chain::Done(Expr::Column {
                    table: Some(column),
                    column: inner,
                })
            }
            Chain::DfShape => {
                match self.peek_token() {
                    Some(Token::Number(n)) if *n == 0.0 => {
                        self.advance();
                    }
                    _ => return Err(self.err_here("only shape[0] (row count) is supported")),
                }
                Chain::Done(Expr::RowCount)
            }
            _ => return Err(self.err_here("this value cannot be indexed")),
        };
        self.expect(&Token::RBracket)?;
        Ok(result)
    }

    fn apply_attribute(&mut self, chain: Chain, name: &str) -> Result<Chain, DomainError> {
        match chain {
            Chain::Df => match name {
                "shape" => Ok(Chain::DfShape),
                _ => Err(self.err_here(&format!("unsupported frame attribute '{}'", name))),
            },
            Chain::Pd => match name {
                "to_datetime" => {
                    let (mut args, kwargs) = self.parse_call_args()?;
                    self.check_to_datetime_kwargs(&kwargs)?;
                    if args.len() != 1 {
                        return Err(self.err_here("to_datetime takes exactly one argument"));
                    }
                    Ok(Chain::Done(Expr::ToDatetime(Box::new(args.remove(0)))))
                }
                "Timestamp" => Ok(Chain::PdTimestamp),
                _ => Err(self.err_here(&format!("unsupported pd attribute '{}'", name))),
            },
            Chain::PdTimestamp => match name {
                "now" => {
                    self.expect_empty_call()?;
                    Ok(Chain::Done(Expr::Now))
                }
                _ => Err(self.err_here(&format!("unsupported Timestamp attribute '{}'", name))),
            },
            Chain::StrNamespace(receiver) => self.apply_str_method(receiver, name),
            Chain::Done(receiver) => self.apply_method(receiver, name),
            Chain::DfShape => Err(self.err_here("shape supports only [0] indexing")),
        }
    }

    fn apply_method(&mut self, receiver: Expr, name: &str) -> Result<Chain, DomainError> {
        if name == "str" {
            return Ok(Chain::StrNamespace(receiver));
        }

        let call = match name {
            "notnull" | "notna" => {
                self.expect_empty_call()?;
                MethodCall::NotNull
            }
            "isnull" | "isna" => {
                self.expect_empty_call()?;
                MethodCall::IsNull
            }
            "isin" => {
                let (mut args, _) = self.parse_call_args()?;
                if args.len() != 1 {
                    return Err(self.err_here("isin takes exactly one argument"));
                }
                MethodCall::IsIn(Box::new(args.remove(0)))
            }
            "duplicated" => {
                let (args, kwargs) = self.parse_call_args()?;
                if !args.is_empty() {
                    return Err(self.err_here("duplicated takes only the 'keep' keyword"));
                }
                MethodCall::Duplicated(self.keep_policy(&kwargs)?)
            }
            "nunique" => {
                self.expect_empty_call()?;
                MethodCall::NUnique
            }
            "all" => {
                self.expect_empty_call()?;
                MethodCall::All
            }
            "any" => {
                self.expect_empty_call()?;
                MethodCall::Any
            }
            "min" => {
                self.expect_empty_call()?;
                MethodCall::Min
            }
            "max" => {
                self.expect_empty_call()?;
                MethodCall::Max
            }
            "sum" => {
                self.expect_empty_call()?;
                MethodCall::Sum
            }
            "mean" => {
                self.expect_empty_call()?;
                MethodCall::Mean
            }
            "abs" => {
                self.expect_empty_call()?;
                MethodCall::Abs
            }
            _ => return Err(self.err_here(&format!("unsupported method '{}'", name))),
        };

        Ok(Chain::Done(Expr::Method {
            receiver: Box::new(receiver),
            call,
        }))
    }

    fn apply_str_method(&mut self, receiver: Expr, name: &str) -> Result<Chain, DomainError> {
        let call = match name {
            "contains" => {
                let (args, _) = self.parse_call_args()?;
                let pattern = self.single_string_arg(args, "str.contains")?;
                MethodCall::StrContains(pattern)
            }
            "match" => {
                let (args, _) = self.parse_call_args()?;
                let pattern = self.single_string_arg(args, "str.match")?;
                MethodCall::StrMatch(pattern)
            }
            "len" => {
                self.expect_empty_call()?;
                MethodCall::StrLen
            }
            _ => return Err(self.err_here(&format!("unsupported str method '{}'", name))),
        };

        Ok(Chain::Done(Expr::Method {
            receiver: Box::new(receiver),
            call,
        }))
    }

    // --- PRIMARIES ---

    fn parse_primary(&mut self) -> Result<Chain, DomainError> {
        let Some(spanned) = self.peek().cloned() else {
            return Err(self.err_here("unexpected end of expression"));
        };

        match spanned.token {
            Token::Number(n) => {
                self.advance();
                Ok(Chain::Done(Expr::Number(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Chain::Done(Expr::Str(s)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(Chain::Done(inner))
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RBracket)?;
                        break;
                    }
                }
                Ok(Chain::Done(Expr::List(items)))
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "df" => Ok(Chain::Df),
                    "pd" => Ok(Chain::Pd),
                    "True" => Ok(Chain::Done(Expr::Bool(true))),
                    "False" => Ok(Chain::Done(Expr::Bool(false))),
                    "None" => Ok(Chain::Done(Expr::Str(String::new()))),
                    "to_datetime" => {
                        let (mut args, kwargs) = self.parse_call_args()?;
                        self.check_to_datetime_kwargs(&kwargs)?;
                        if args.len() != 1 {
                            return Err(self.err_here("to_datetime takes exactly one argument"));
                        }
                        Ok(Chain::Done(Expr::ToDatetime(Box::new(args.remove(0)))))
                    }
                    "now" | "today" => {
                        self.expect_empty_call()?;
                        Ok(Chain::Done(Expr::Now))
                    }
                    _ => Err(self.err_at(
                        spanned.offset,
                        &format!("unknown identifier '{}'", name),
                    )),
                }
            }
            _ => Err(self.err_at(spanned.offset, "unexpected token")),
        }
    }

    // --- CALL ARGUMENT HELPERS ---

    #[allow(clippy::type_complexity)]
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), DomainError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        if self.eat(&Token::RParen) {
            return Ok((args, kwargs));
        }

        loop {
            // `ident =` introduces a keyword argument
            let is_kwarg = matches!(
                (self.peek_token(), self.peek_token_at(1)),
                (Some(Token::Ident(_)), Some(Token::Assign))
            );

            if is_kwarg {
                let key = self.expect_ident()?;
                self.expect(&Token::Assign)?;
                let value = self.parse_or()?;
                kwargs.push((key, value));
            } else {
                args.push(self.parse_or()?);
            }

            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }

        Ok((args, kwargs))
    }

    fn keep_policy(&self, kwargs: &[(String, Expr)]) -> Result<KeepPolicy, DomainError> {
        for (key, value) in kwargs {
            if key != "keep" {
                return Err(self.err_here(&format!("unknown keyword '{}' for duplicated", key)));
            }
            return match value {
                Expr::Bool(false) => Ok(KeepPolicy::MarkAll),
                Expr::Str(s) if s == "first" => Ok(KeepPolicy::KeepFirst),
                _ => Err(self.err_here("duplicated: keep must be False or 'first'")),
            };
        }
        Ok(KeepPolicy::KeepFirst)
    }

    fn check_to_datetime_kwargs(&self, kwargs: &[(String, Expr)]) -> Result<(), DomainError> {
        for (key, value) in kwargs {
            // errors='coerce' is the only (and default) behavior here
            let coerce = key == "errors" && matches!(value, Expr::Str(s) if s == "coerce");
            if !coerce {
                return Err(self.err_here(&format!(
                    "unsupported to_datetime keyword '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    fn single_string_arg(&self, args: Vec<Expr>, method: &str) -> Result<String, DomainError> {
        match args.as_slice() {
            [Expr::Str(s)] => Ok(s.clone()),
            _ => Err(self.err_here(&format!("{} takes exactly one string argument", method))),
        }
    }

    // --- TOKEN PLUMBING ---

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_token_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), DomainError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.err_here(&format!("expected {:?}", token)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, DomainError> {
        match self.peek_token().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.err_here("expected identifier")),
        }
    }

    fn expect_string(&mut self) -> Result<String, DomainError> {
        match self.peek_token().cloned() {
            Some(Token::Str(s)) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.err_here("expected string literal")),
        }
    }

    fn expect_empty_call(&mut self) -> Result<(), DomainError> {
        self.expect(&Token::LParen)?;
        self.expect(&Token::RParen)
    }

    fn err_here(&self, message: &str) -> DomainError {
        let offset = self.peek().map(|t| t.offset).unwrap_or(usize::MAX);
        self.err_at(offset, message)
    }

    fn err_at(&self, offset: usize, message: impl Into<String>) -> DomainError {
        DomainError::ExpressionParse {
            offset: if offset == usize::MAX { 0 } else { offset },
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::expr::parse;

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse("df['precio_lista'] > 0").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Gt,
                lhs: Box::new(Expr::Column {
                    table: None,
                    column: "precio_lista".into()
                }),
                rhs: Box::new(Expr::Number(0.0)),
            }
        );
    }

    #[test]
    fn test_parse_cross_table_isin() {
        let expr =
            parse("df['ventas']['customer_id'].isin(df['clientes']['customer_id'])").unwrap();
        match expr {
            Expr::Method { receiver, call } => {
                assert_eq!(
                    *receiver,
                    Expr::Column {
                        table: Some("ventas".into()),
                        column: "customer_id".into()
                    }
                );
                match call {
                    MethodCall::IsIn(arg) => assert_eq!(
                        *arg,
                        Expr::Column {
                            table: Some("clientes".into()),
                            column: "customer_id".into()
                        }
                    ),
                    other => panic!("expected isin, got {:?}", other),
                }
            }
            other => panic!("expected method call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_duplicated_keep_false() {
        let expr = parse("~df['codigo_producto'].duplicated(keep=False)").unwrap();
        match expr {
            Expr::Unary { op: UnaryOp::Not, operand } => match *operand {
                Expr::Method {
                    call: MethodCall::Duplicated(KeepPolicy::MarkAll),
                    ..
                } => {}
                other => panic!("expected duplicated(keep=False), got {:?}", other),
            },
            other => panic!("expected negation, got {:?}", other),
        }
    }

    #[test]
    fn test_amp_binds_below_comparisons() {
        // (a > 1) & (b < 2) must parse as a conjunction of comparisons
        let expr = parse("(df['a'] > 1) & (df['b'] < 2)").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::And, .. }));

        // ...and so must the unparenthesized form
        let expr = parse("df['a'] > 1 & df['b'] < 2").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn test_chained_comparison_rejected() {
        let err = parse("1 < df['a'] < 10").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("parenthesize"), "got: {}", rendered);
    }

    #[test]
    fn test_shape_row_count() {
        assert_eq!(parse("df.shape[0] > 0").unwrap(), Expr::Binary {
            op: BinaryOp::Gt,
            lhs: Box::new(Expr::RowCount),
            rhs: Box::new(Expr::Number(0.0)),
        });
    }

    #[test]
    fn test_to_datetime_spellings() {
        let plain = parse("to_datetime(df['fecha'])").unwrap();
        let pandas = parse("pd.to_datetime(df['fecha'], errors='coerce')").unwrap();
        assert_eq!(plain, pandas);
    }

    #[test]
    fn test_arithmetic_row_rule() {
        let expr = parse("df['total'] == df['cantidad'] * df['precio_unitario']").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Eq, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected ==, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_df_is_error() {
        assert!(parse("df").is_err());
        assert!(parse("df['a'].str").is_err());
    }

    #[test]
    fn test_isin_list_literal() {
        let expr = parse("df['estado'].isin(['Activo', 'Descontinuado'])").unwrap();
        match expr {
            Expr::Method { call: MethodCall::IsIn(arg), .. } => {
                assert!(matches!(*arg, Expr::List(ref items) if items.len() == 2));
            }
            other => panic!("expected isin, got {:?}", other),
        }
    }
}
