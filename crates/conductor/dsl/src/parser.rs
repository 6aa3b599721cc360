//! Parser: recursive descent parser for the pipeline DSL
//!
//! Consumes tokens from the lexer and produces an intermediate
//! representation (ParsedPipeline) that the compiler converts into a
//! WorkflowDefinition. Guard expressions are parsed directly into
//! GuardExpr data.

use crate::errors::{DslError, DslResult};
use crate::lexer::{Lexer, Token, TokenKind};
use conductor_types::{CmpOp, GuardExpr};
use serde_json::Value;

/// Parsed pipeline, the intermediate representation
#[derive(Clone, Debug)]
pub struct ParsedPipeline {
    /// Pipeline name
    pub name: String,
    /// Version number
    pub version: Option<u32>,
    /// Escalation budget per run
    pub max_escalations: Option<u32>,
    /// Declared stages
    pub stages: Vec<ParsedStage>,
    /// Entry stage id
    pub entry: Option<String>,
    /// Terminal stage ids
    pub terminals: Vec<String>,
    /// Declared edges
    pub edges: Vec<ParsedEdge>,
}

/// A parsed stage declaration
#[derive(Clone, Debug)]
pub struct ParsedStage {
    pub id: String,
    pub name: Option<String>,
    pub executor: Option<String>,
    pub timeout: Option<u64>,
    pub retry: Option<u32>,
    pub confidence: Option<f64>,
    pub escalate_to: Option<String>,
    pub mode: Option<String>,
}

/// A parsed edge declaration
///
/// Multiple sources are shorthand for one rule per source sharing the
/// same targets, guard and join policy.
#[derive(Clone, Debug)]
pub struct ParsedEdge {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub guard: Option<GuardExpr>,
    pub join: Option<ParsedJoin>,
}

/// A parsed join declaration
#[derive(Clone, Debug)]
pub struct ParsedJoin {
    pub policy: String,
    pub quorum: Option<u32>,
}

/// Parser for the pipeline DSL
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse DSL input text into a ParsedPipeline
    pub fn parse(input: &str) -> DslResult<ParsedPipeline> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        parser.parse_pipeline()
    }

    fn parse_pipeline(&mut self) -> DslResult<ParsedPipeline> {
        // PIPELINE "name" {
        self.expect(TokenKind::Pipeline)?;
        let name = self.expect(TokenKind::StringLiteral)?.text.clone();
        self.expect(TokenKind::OpenBrace)?;

        let mut pipeline = ParsedPipeline {
            name,
            version: None,
            max_escalations: None,
            stages: Vec::new(),
            entry: None,
            terminals: Vec::new(),
            edges: Vec::new(),
        };

        // Parse body until closing brace
        while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            match self.peek_kind() {
                TokenKind::Version => {
                    self.advance();
                    pipeline.version = Some(self.expect_number()? as u32);
                }
                TokenKind::MaxEscalations => {
                    self.advance();
                    pipeline.max_escalations = Some(self.expect_number()? as u32);
                }
                TokenKind::Stage => {
                    let stage = self.parse_stage()?;
                    pipeline.stages.push(stage);
                }
                TokenKind::Entry => {
                    self.advance();
                    pipeline.entry = Some(self.expect_identifier()?);
                }
                TokenKind::Terminal => {
                    self.advance();
                    pipeline.terminals.push(self.expect_identifier()?);
                }
                TokenKind::Edges => {
                    pipeline.edges = self.parse_edges_block()?;
                }
                _ => {
                    let tok = self.peek();
                    return Err(DslError::UnknownKeyword(tok.text.clone()));
                }
            }
        }

        self.expect(TokenKind::CloseBrace)?;
        Ok(pipeline)
    }

    fn parse_stage(&mut self) -> DslResult<ParsedStage> {
        self.expect(TokenKind::Stage)?;
        let id = self.expect_identifier()?;

        let mut stage = ParsedStage {
            id,
            name: None,
            executor: None,
            timeout: None,
            retry: None,
            confidence: None,
            escalate_to: None,
            mode: None,
        };

        // Optional body block
        if self.check(TokenKind::OpenBrace) {
            self.advance();
            while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
                match self.peek_kind() {
                    TokenKind::Name => {
                        self.advance();
                        stage.name = Some(self.expect(TokenKind::StringLiteral)?.text.clone());
                    }
                    TokenKind::Executor => {
                        self.advance();
                        stage.executor = Some(self.expect_identifier_or_string()?);
                    }
                    TokenKind::Timeout => {
                        self.advance();
                        stage.timeout = Some(self.expect_number()?);
                    }
                    TokenKind::Retry => {
                        self.advance();
                        stage.retry = Some(self.expect_number()? as u32);
                    }
                    TokenKind::Confidence => {
                        self.advance();
                        stage.confidence = Some(self.expect_float()?);
                    }
                    TokenKind::Escalate => {
                        self.advance();
                        stage.escalate_to = Some(self.expect_identifier()?);
                    }
                    TokenKind::Mode => {
                        self.advance();
                        stage.mode = Some(self.expect_identifier()?);
                    }
                    _ => {
                        let tok = self.peek();
                        return Err(DslError::ParseError {
                            line: tok.line,
                            col: tok.col,
                            message: format!("Unexpected token in stage body: '{}'", tok.text),
                        });
                    }
                }
            }
            self.expect(TokenKind::CloseBrace)?;
        }

        Ok(stage)
    }

    fn parse_edges_block(&mut self) -> DslResult<Vec<ParsedEdge>> {
        self.expect(TokenKind::Edges)?;
        self.expect(TokenKind::OpenBrace)?;

        let mut edges = Vec::new();
        while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            let sources = self.parse_id_list()?;
            self.expect(TokenKind::Arrow)?;
            let targets = self.parse_id_list()?;

            let mut edge = ParsedEdge {
                sources,
                targets,
                guard: None,
                join: None,
            };

            // Optional ON guard
            if self.check(TokenKind::On) {
                self.advance();
                edge.guard = Some(self.parse_guard()?);
            }

            // Optional JOIN policy
            if self.check(TokenKind::Join) {
                self.advance();
                let policy = self.expect_identifier()?;
                let quorum = if self.check(TokenKind::NumberLiteral) {
                    Some(self.expect_number()? as u32)
                } else {
                    None
                };
                edge.join = Some(ParsedJoin { policy, quorum });
            }

            edges.push(edge);
        }

        self.expect(TokenKind::CloseBrace)?;
        Ok(edges)
    }

    fn parse_id_list(&mut self) -> DslResult<Vec<String>> {
        let mut ids = vec![self.expect_identifier()?];
        while self.check(TokenKind::Comma) {
            self.advance();
            ids.push(self.expect_identifier()?);
        }
        Ok(ids)
    }

    // ── Guard expressions ────────────────────────────────────────────
    //
    // or := and ( '||' and )*
    // and := unary ( '&&' unary )*
    // unary := '!' unary | '(' or ')' | comparison
    // comparison := path op literal

    fn parse_guard(&mut self) -> DslResult<GuardExpr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> DslResult<GuardExpr> {
        let mut terms = vec![self.parse_and()?];
        while self.check(TokenKind::OrOr) {
            self.advance();
            terms.push(self.parse_and()?);
        }
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(GuardExpr::Any(terms))
        }
    }

    fn parse_and(&mut self) -> DslResult<GuardExpr> {
        let mut terms = vec![self.parse_unary()?];
        while self.check(TokenKind::AndAnd) {
            self.advance();
            terms.push(self.parse_unary()?);
        }
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(GuardExpr::All(terms))
        }
    }

    fn parse_unary(&mut self) -> DslResult<GuardExpr> {
        if self.check(TokenKind::Bang) {
            self.advance();
            return Ok(GuardExpr::Not(Box::new(self.parse_unary()?)));
        }
        if self.check(TokenKind::OpenParen) {
            self.advance();
            let inner = self.parse_or()?;
            self.expect(TokenKind::CloseParen)?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> DslResult<GuardExpr> {
        let path = self.parse_path()?;
        let op = self.parse_cmp_op()?;
        let value = self.parse_literal()?;
        Ok(GuardExpr::Compare { path, op, value })
    }

    fn parse_path(&mut self) -> DslResult<String> {
        let mut path = self.expect_identifier()?;
        while self.check(TokenKind::Dot) {
            self.advance();
            path.push('.');
            path.push_str(&self.expect_identifier()?);
        }
        Ok(path)
    }

    fn parse_cmp_op(&mut self) -> DslResult<CmpOp> {
        let op = match self.peek_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            _ => {
                let tok = self.peek();
                return Err(DslError::UnexpectedToken {
                    expected: "comparison operator".into(),
                    found: tok.text.clone(),
                });
            }
        };
        self.advance();
        Ok(op)
    }

    fn parse_literal(&mut self) -> DslResult<Value> {
        match self.peek_kind() {
            TokenKind::StringLiteral => {
                let text = self.advance().text.clone();
                Ok(Value::String(text))
            }
            TokenKind::NumberLiteral => {
                let text = self.advance().text.clone();
                if text.contains('.') {
                    let n = text.parse::<f64>().map_err(|_| DslError::InvalidValue {
                        field: "number".into(),
                        message: format!("'{}' is not a valid number", text),
                    })?;
                    Ok(serde_json::json!(n))
                } else {
                    let n = text.parse::<i64>().map_err(|_| DslError::InvalidValue {
                        field: "number".into(),
                        message: format!("'{}' is not a valid number", text),
                    })?;
                    Ok(serde_json::json!(n))
                }
            }
            TokenKind::True => {
                self.advance();
                Ok(Value::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Value::Bool(false))
            }
            _ => {
                let tok = self.peek();
                Err(DslError::UnexpectedToken {
                    expected: "literal".into(),
                    found: tok.text.clone(),
                })
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind.clone()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> DslResult<&Token> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(DslError::UnexpectedEof(format!("{}", kind)))
        } else {
            let tok = self.peek();
            Err(DslError::UnexpectedToken {
                expected: format!("{}", kind),
                found: tok.text.clone(),
            })
        }
    }

    fn expect_identifier(&mut self) -> DslResult<String> {
        let tok = self.expect(TokenKind::Identifier)?;
        Ok(tok.text.clone())
    }

    fn expect_identifier_or_string(&mut self) -> DslResult<String> {
        if self.check(TokenKind::StringLiteral) {
            Ok(self.advance().text.clone())
        } else {
            self.expect_identifier()
        }
    }

    fn expect_number(&mut self) -> DslResult<u64> {
        let tok = self.expect(TokenKind::NumberLiteral)?;
        tok.text.parse::<u64>().map_err(|_| DslError::InvalidValue {
            field: "number".into(),
            message: format!("'{}' is not a valid integer", tok.text),
        })
    }

    fn expect_float(&mut self) -> DslResult<f64> {
        let tok = self.expect(TokenKind::NumberLiteral)?;
        tok.text.parse::<f64>().map_err(|_| DslError::InvalidValue {
            field: "number".into(),
            message: format!("'{}' is not a valid number", tok.text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_pipeline() {
        let input = r#"
        PIPELINE "minimal" {
            STAGE start { EXECUTOR starter }
            STAGE finish { EXECUTOR finisher }
            ENTRY start
            TERMINAL finish
            EDGES {
                start -> finish
            }
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        assert_eq!(parsed.name, "minimal");
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.entry.as_deref(), Some("start"));
        assert_eq!(parsed.terminals, vec!["finish"]);
        assert_eq!(parsed.edges.len(), 1);
        assert!(parsed.edges[0].guard.is_none());
    }

    #[test]
    fn test_parse_stage_fields() {
        let input = r#"
        PIPELINE "p" {
            STAGE dev {
                NAME "Development"
                EXECUTOR dev_junior
                TIMEOUT 300
                RETRY 3
                CONFIDENCE 0.5
                ESCALATE dev_senior
                MODE parallel
            }
            ENTRY dev
            TERMINAL dev
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        let stage = &parsed.stages[0];
        assert_eq!(stage.id, "dev");
        assert_eq!(stage.name.as_deref(), Some("Development"));
        assert_eq!(stage.executor.as_deref(), Some("dev_junior"));
        assert_eq!(stage.timeout, Some(300));
        assert_eq!(stage.retry, Some(3));
        assert_eq!(stage.confidence, Some(0.5));
        assert_eq!(stage.escalate_to.as_deref(), Some("dev_senior"));
        assert_eq!(stage.mode.as_deref(), Some("parallel"));
    }

    #[test]
    fn test_parse_guarded_edge() {
        let input = r#"
        PIPELINE "p" {
            STAGE qa { EXECUTOR qa_agent }
            STAGE deploy { EXECUTOR deployer }
            ENTRY qa
            TERMINAL deploy
            EDGES {
                qa -> deploy ON qa.passed == true && qa.score >= 0.8
            }
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        let guard = parsed.edges[0].guard.as_ref().unwrap();
        match guard {
            GuardExpr::All(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(
                    &terms[0],
                    GuardExpr::Compare { path, op: CmpOp::Eq, value }
                        if path == "qa.passed" && value == &Value::Bool(true)
                ));
                assert!(matches!(
                    &terms[1],
                    GuardExpr::Compare { path, op: CmpOp::Ge, .. } if path == "qa.score"
                ));
            }
            other => panic!("expected All, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_negation_and_parens() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            STAGE b { EXECUTOR y }
            ENTRY a
            TERMINAL b
            EDGES {
                a -> b ON !(a.flag == true || a.count > 3)
            }
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        match parsed.edges[0].guard.as_ref().unwrap() {
            GuardExpr::Not(inner) => {
                assert!(matches!(**inner, GuardExpr::Any(_)));
            }
            other => panic!("expected Not, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fan_out_and_join() {
        let input = r#"
        PIPELINE "p" {
            STAGE arch { EXECUTOR architect }
            STAGE backend { EXECUTOR be }
            STAGE frontend { EXECUTOR fe }
            STAGE integration { EXECUTOR merge }
            ENTRY arch
            TERMINAL integration
            EDGES {
                arch -> backend, frontend
                backend, frontend -> integration JOIN all
            }
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        assert_eq!(parsed.edges[0].targets, vec!["backend", "frontend"]);
        let fan_in = &parsed.edges[1];
        assert_eq!(fan_in.sources, vec!["backend", "frontend"]);
        assert_eq!(fan_in.join.as_ref().unwrap().policy, "all");
    }

    #[test]
    fn test_parse_quorum_join() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            STAGE b { EXECUTOR x }
            STAGE c { EXECUTOR x }
            STAGE merge { EXECUTOR m }
            ENTRY a
            TERMINAL merge
            EDGES {
                a -> b, c
                b, c -> merge JOIN quorum 1
            }
        }
        "#;

        let parsed = Parser::parse(input).unwrap();
        let join = parsed.edges[1].join.as_ref().unwrap();
        assert_eq!(join.policy, "quorum");
        assert_eq!(join.quorum, Some(1));
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let input = r#"PIPELINE "p" { BANANA }"#;
        assert!(matches!(
            Parser::parse(input),
            Err(DslError::UnknownKeyword(_))
        ));
    }

    #[test]
    fn test_missing_brace_reports_eof() {
        let input = r#"PIPELINE "p" { STAGE a { EXECUTOR x }"#;
        assert!(matches!(
            Parser::parse(input),
            Err(DslError::UnexpectedEof(_))
        ));
    }
}
