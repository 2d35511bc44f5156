use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{BinaryOperator, Comparator, LogicalOperator, Program, Statement};
use crate::lexer::{LexError, Lexer};
use crate::runtime::{Class, Method};
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lexer(#[from] LexError),
    #[error("Expected {expected}, got {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Base class {base} not found for class {class}")]
    UnknownBaseClass { base: String, class: String },
    #[error("Class {name} already exists")]
    DuplicateClass { name: String },
    #[error("Mython doesn't support functions, only methods: {name}")]
    FreeFunctionCall { name: String },
    #[error("Function str takes exactly one argument")]
    StringifyArity,
    #[error("Unknown call to {name}()")]
    UnknownCall { name: String },
}

/// Recursive-descent parser over the pull lexer.
///
/// Owns the class registry: base-class clauses, constructor calls and the
/// built-in `str` are resolved against it during parsing, and the finished
/// registry travels on the returned `Program`.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    classes: HashMap<String, Rc<Class>>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            classes: HashMap::new(),
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !matches!(self.current_kind(), TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        Ok(Program {
            root: Statement::Compound(statements),
            classes: self.classes,
        })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current_kind() {
            TokenKind::Class => {
                self.advance()?;
                self.parse_class_definition()
            }
            TokenKind::If => self.parse_condition(),
            _ => {
                let statement = self.parse_simple_statement()?;
                self.expect_newline()?;
                Ok(statement)
            }
        }
    }

    fn parse_simple_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current_kind() {
            TokenKind::Return => {
                self.advance()?;
                Ok(Statement::Return(Box::new(self.parse_test()?)))
            }
            TokenKind::Print => {
                self.advance()?;
                let args = if matches!(self.current_kind(), TokenKind::Newline) {
                    Vec::new()
                } else {
                    self.parse_test_list()?
                };
                Ok(Statement::Print { args })
            }
            _ => self.parse_assignment_or_call(),
        }
    }

    /// `dotted-ids` followed by either `= test` or an argument list.
    ///
    /// A single name before `=` assigns a local; a longer path assigns a
    /// field of the object named by the prefix. A call needs a dotted
    /// receiver: bare `f(...)` has nothing to dispatch on.
    fn parse_assignment_or_call(&mut self) -> Result<Statement, ParseError> {
        let mut names = self.parse_dotted_ids()?;
        let Some(last) = names.pop() else {
            return Err(self.error("identifier"));
        };

        if self.current().is_char('=') {
            self.advance()?;
            let value = Box::new(self.parse_test()?);
            if names.is_empty() {
                return Ok(Statement::Assign { name: last, value });
            }
            return Ok(Statement::FieldAssign {
                object: Box::new(Statement::Variable { names }),
                field: last,
                value,
            });
        }

        self.expect_char('(')?;
        if names.is_empty() {
            return Err(ParseError::FreeFunctionCall { name: last });
        }
        let args = if self.current().is_char(')') {
            Vec::new()
        } else {
            self.parse_test_list()?
        };
        self.expect_char(')')?;
        Ok(Statement::MethodCall {
            object: Box::new(Statement::Variable { names }),
            method: last,
            args,
        })
    }

    fn parse_class_definition(&mut self) -> Result<Statement, ParseError> {
        let name = self.expect_id()?;

        let base = if self.current().is_char('(') {
            self.advance()?;
            let base_name = self.expect_id()?;
            self.expect_char(')')?;
            let Some(base) = self.classes.get(&base_name) else {
                return Err(ParseError::UnknownBaseClass {
                    base: base_name,
                    class: name,
                });
            };
            Some(Rc::clone(base))
        } else {
            None
        };

        self.expect_char(':')?;
        self.expect_newline()?;
        self.expect_indent()?;
        if !matches!(self.current_kind(), TokenKind::Def) {
            return Err(self.error("'def'"));
        }
        let methods = self.parse_methods()?;
        self.expect_dedent()?;

        let class = Rc::new(Class::new(name.clone(), methods, base));
        if self.classes.insert(name.clone(), Rc::clone(&class)).is_some() {
            return Err(ParseError::DuplicateClass { name });
        }
        Ok(Statement::ClassDef(class))
    }

    fn parse_methods(&mut self) -> Result<Vec<Method>, ParseError> {
        let mut methods = Vec::new();
        while matches!(self.current_kind(), TokenKind::Def) {
            self.advance()?;
            let name = self.expect_id()?;
            self.expect_char('(')?;
            let mut formal_params = Vec::new();
            if matches!(self.current_kind(), TokenKind::Id(_)) {
                formal_params.push(self.expect_id()?);
                while self.current().is_char(',') {
                    self.advance()?;
                    formal_params.push(self.expect_id()?);
                }
            }
            self.expect_char(')')?;
            self.expect_char(':')?;
            let body = Statement::MethodBody(Box::new(self.parse_suite()?));
            methods.push(Method {
                name,
                formal_params,
                body,
            });
        }
        Ok(methods)
    }

    fn parse_condition(&mut self) -> Result<Statement, ParseError> {
        self.advance()?;
        let condition = Box::new(self.parse_test()?);
        self.expect_char(':')?;
        let then_body = Box::new(self.parse_suite()?);
        let else_body = if matches!(self.current_kind(), TokenKind::Else) {
            self.advance()?;
            self.expect_char(':')?;
            Some(Box::new(self.parse_suite()?))
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_suite(&mut self) -> Result<Statement, ParseError> {
        self.expect_newline()?;
        self.expect_indent()?;
        let mut statements = Vec::new();
        while !matches!(self.current_kind(), TokenKind::Dedent) {
            statements.push(self.parse_statement()?);
        }
        self.expect_dedent()?;
        Ok(Statement::Compound(statements))
    }

    fn parse_test(&mut self) -> Result<Statement, ParseError> {
        let mut result = self.parse_and_test()?;
        while matches!(self.current_kind(), TokenKind::Or) {
            self.advance()?;
            result = Statement::Logical {
                op: LogicalOperator::Or,
                left: Box::new(result),
                right: Box::new(self.parse_and_test()?),
            };
        }
        Ok(result)
    }

    fn parse_and_test(&mut self) -> Result<Statement, ParseError> {
        let mut result = self.parse_not_test()?;
        while matches!(self.current_kind(), TokenKind::And) {
            self.advance()?;
            result = Statement::Logical {
                op: LogicalOperator::And,
                left: Box::new(result),
                right: Box::new(self.parse_not_test()?),
            };
        }
        Ok(result)
    }

    fn parse_not_test(&mut self) -> Result<Statement, ParseError> {
        if matches!(self.current_kind(), TokenKind::Not) {
            self.advance()?;
            return Ok(Statement::Not(Box::new(self.parse_not_test()?)));
        }
        self.parse_comparison()
    }

    /// At most one comparator per comparison.
    fn parse_comparison(&mut self) -> Result<Statement, ParseError> {
        let left = self.parse_expression()?;
        let op = match self.current_kind() {
            TokenKind::Char('<') => Comparator::LessThan,
            TokenKind::Char('>') => Comparator::GreaterThan,
            TokenKind::Eq => Comparator::Equal,
            TokenKind::NotEq => Comparator::NotEqual,
            TokenKind::LessOrEq => Comparator::LessOrEqual,
            TokenKind::GreaterOrEq => Comparator::GreaterOrEqual,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_expression()?;
        Ok(Statement::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_expression(&mut self) -> Result<Statement, ParseError> {
        let mut result = self.parse_adder()?;
        loop {
            let op = if self.current().is_char('+') {
                BinaryOperator::Add
            } else if self.current().is_char('-') {
                BinaryOperator::Sub
            } else {
                return Ok(result);
            };
            self.advance()?;
            result = Statement::BinaryOp {
                op,
                left: Box::new(result),
                right: Box::new(self.parse_adder()?),
            };
        }
    }

    fn parse_adder(&mut self) -> Result<Statement, ParseError> {
        let mut result = self.parse_mult()?;
        loop {
            let op = if self.current().is_char('*') {
                BinaryOperator::Mul
            } else if self.current().is_char('/') {
                BinaryOperator::Div
            } else {
                return Ok(result);
            };
            self.advance()?;
            result = Statement::BinaryOp {
                op,
                left: Box::new(result),
                right: Box::new(self.parse_mult()?),
            };
        }
    }

    fn parse_mult(&mut self) -> Result<Statement, ParseError> {
        match self.current_kind() {
            TokenKind::Char('(') => {
                self.advance()?;
                let inner = self.parse_test()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            TokenKind::Char('-') => {
                self.advance()?;
                // Unary minus compiles to multiplication by -1.
                Ok(Statement::BinaryOp {
                    op: BinaryOperator::Mul,
                    left: Box::new(self.parse_mult()?),
                    right: Box::new(Statement::Integer(-1)),
                })
            }
            TokenKind::Number(value) => {
                let value = *value;
                self.advance()?;
                Ok(Statement::Integer(value))
            }
            TokenKind::String(text) => {
                let text = text.clone();
                self.advance()?;
                Ok(Statement::String(text))
            }
            TokenKind::True => {
                self.advance()?;
                Ok(Statement::Boolean(true))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(Statement::Boolean(false))
            }
            TokenKind::None => {
                self.advance()?;
                Ok(Statement::None)
            }
            TokenKind::Id(_) => self.parse_dotted_expression(),
            _ => Err(self.error("expression")),
        }
    }

    /// Dotted identifiers in expression position: a variable read, a method
    /// call, a constructor call on a declared class, or the built-in `str`.
    /// A call result accepts further `.method(args)` suffixes, so
    /// `B().g()` dispatches on the fresh instance.
    fn parse_dotted_expression(&mut self) -> Result<Statement, ParseError> {
        let mut names = self.parse_dotted_ids()?;
        if !self.current().is_char('(') {
            return Ok(Statement::Variable { names });
        }

        self.advance()?;
        let args = if self.current().is_char(')') {
            Vec::new()
        } else {
            self.parse_test_list()?
        };
        self.expect_char(')')?;

        let Some(callee) = names.pop() else {
            return Err(self.error("identifier"));
        };
        let mut expr = if !names.is_empty() {
            Statement::MethodCall {
                object: Box::new(Statement::Variable { names }),
                method: callee,
                args,
            }
        } else if let Some(class) = self.classes.get(&callee) {
            Statement::NewInstance {
                class: Rc::clone(class),
                args,
            }
        } else if callee == "str" {
            if args.len() != 1 {
                return Err(ParseError::StringifyArity);
            }
            let Some(arg) = args.into_iter().next() else {
                return Err(ParseError::StringifyArity);
            };
            Statement::Stringify(Box::new(arg))
        } else {
            return Err(ParseError::UnknownCall { name: callee });
        };

        while self.current().is_char('.') {
            self.advance()?;
            let method = self.expect_id()?;
            self.expect_char('(')?;
            let args = if self.current().is_char(')') {
                Vec::new()
            } else {
                self.parse_test_list()?
            };
            self.expect_char(')')?;
            expr = Statement::MethodCall {
                object: Box::new(expr),
                method,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_dotted_ids(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.expect_id()?];
        while self.current().is_char('.') {
            self.advance()?;
            names.push(self.expect_id()?);
        }
        Ok(names)
    }

    fn parse_test_list(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut result = vec![self.parse_test()?];
        while self.current().is_char(',') {
            self.advance()?;
            result.push(self.parse_test()?);
        }
        Ok(result)
    }

    fn current(&self) -> &Token {
        self.lexer.current()
    }

    fn current_kind(&self) -> &TokenKind {
        self.lexer.current().kind()
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.lexer.next_token()?;
        Ok(())
    }

    fn expect_id(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Id(name) = self.current_kind() {
            let name = name.clone();
            self.advance()?;
            return Ok(name);
        }
        Err(self.error("identifier"))
    }

    fn expect_char(&mut self, c: char) -> Result<(), ParseError> {
        if self.current().is_char(c) {
            return self.advance();
        }
        Err(self.error(&format!("'{c}'")))
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if matches!(self.current_kind(), TokenKind::Newline) {
            return self.advance();
        }
        Err(self.error("newline"))
    }

    fn expect_indent(&mut self) -> Result<(), ParseError> {
        if matches!(self.current_kind(), TokenKind::Indent) {
            return self.advance();
        }
        Err(self.error("indent"))
    }

    fn expect_dedent(&mut self) -> Result<(), ParseError> {
        if matches!(self.current_kind(), TokenKind::Dedent) {
            return self.advance();
        }
        Err(self.error("dedent"))
    }

    fn error(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current_kind().to_string(),
        }
    }
}

/// Parses the token stream into a program tree plus its class registry.
pub fn parse(lexer: Lexer<'_>) -> Result<Program, ParseError> {
    Parser::new(lexer).parse_program()
}
