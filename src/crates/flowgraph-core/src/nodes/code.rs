//! Code node: evaluates a restricted expression against its input map.
//!
//! No arbitrary-code execution. The interpreter supports literals,
//! identifiers bound to the node's inputs, field/index access, arithmetic,
//! comparisons, boolean logic, and a small intrinsic library (`length`,
//! `concat`, `substring`, `lower`, `upper`, `json_parse`, `json_stringify`).

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use crate::template::coerce_to_string;
use async_trait::async_trait;
use serde_json::{Map, Number, Value};

pub struct CodeNode {
    id: String,
    expression: String,
}

impl CodeNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        Ok(Box::new(CodeNode {
            id: def.id.clone(),
            expression: def.config_str("expression").unwrap_or_default().to_string(),
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::Code,
            label: "Code",
            icon: "code",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("input", PortType::Any).optional()],
            outputs: vec![Port::new("result", PortType::Any)],
        }
    }
}

#[async_trait]
impl NodeHandler for CodeNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Code
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.expression.trim().is_empty() {
            return Err("code expression is empty".into());
        }
        // Parse eagerly so syntax errors fail validation, not the run.
        Parser::new(&self.expression)?.parse()?;
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let result = match evaluate(&self.expression, inputs) {
            Ok(value) => value,
            Err(e) => return NodeExecutionResult::failure("code_execution_failed", e),
        };
        let mut outputs = Map::new();
        outputs.insert("result".into(), result);
        NodeExecutionResult::success(outputs)
    }
}

/// Evaluate an expression with the given variable bindings.
pub fn evaluate(expression: &str, bindings: &Map<String, Value>) -> Result<Value, String> {
    let ast = Parser::new(expression)?.parse()?;
    eval(&ast, bindings)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Dot,
    Comma,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1 }
            '-' => { tokens.push(Token::Minus); i += 1 }
            '*' => { tokens.push(Token::Star); i += 1 }
            '/' => { tokens.push(Token::Slash); i += 1 }
            '%' => { tokens.push(Token::Percent); i += 1 }
            '.' => { tokens.push(Token::Dot); i += 1 }
            ',' => { tokens.push(Token::Comma); i += 1 }
            '(' => { tokens.push(Token::LParen); i += 1 }
            ')' => { tokens.push(Token::RParen); i += 1 }
            '=' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Eq); i += 2 }
            '!' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Ne); i += 2 }
            '!' => { tokens.push(Token::Not); i += 1 }
            '<' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Le); i += 2 }
            '<' => { tokens.push(Token::Lt); i += 1 }
            '>' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Ge); i += 2 }
            '>' => { tokens.push(Token::Gt); i += 1 }
            '&' if chars.get(i + 1) == Some(&'&') => { tokens.push(Token::And); i += 2 }
            '|' if chars.get(i + 1) == Some(&'|') => { tokens.push(Token::Or); i += 2 }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some(&ch) if ch == quote => { i += 1; break }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&esc) => s.push(esc),
                                None => return Err("dangling escape".into()),
                            }
                            i += 2;
                        }
                        Some(&ch) => { s.push(ch); i += 1 }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A dot followed by a non-digit is member access, not a decimal.
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| format!("bad number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Unary(Token, Box<Expr>),
    Binary(Token, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, String> {
        Ok(Self { tokens: tokenize(input)?, pos: 0 })
    }

    fn parse(mut self) -> Result<Expr, String> {
        let expr = self.or_expr()?;
        if self.pos != self.tokens.len() {
            return Err("trailing tokens after expression".into());
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary(Token::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Expr::Binary(Token::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Le) => Token::Le,
            Some(Token::Gt) => Token::Gt,
            Some(Token::Ge) => Token::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Token::Plus,
                Some(Token::Minus) => Token::Minus,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::Percent) => Token::Percent,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(Token::Minus, Box::new(self.unary()?)))
            }
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Unary(Token::Not, Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Dot) {
            match self.bump() {
                Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                Some(Token::Number(n)) if n.fract() == 0.0 => {
                    expr = Expr::Member(Box::new(expr), format!("{}", n as i64))
                }
                _ => return Err("expected field name after '.'".into()),
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing ')'".into());
                }
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.or_expr()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            if !self.eat(&Token::Comma) {
                                return Err("expected ',' or ')' in call".into());
                            }
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn numeric(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| "bad number".into()),
        Value::String(s) => s.trim().parse().map_err(|_| format!("'{s}' is not a number")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(format!("cannot use {other} as a number")),
    }
}

fn eval(expr: &Expr, bindings: &Map<String, Value>) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => Ok(bindings.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Member(base, field) => {
            let base = eval(base, bindings)?;
            Ok(match base {
                Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
                Value::Array(items) => field
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, bindings)?;
            match op {
                Token::Minus => Ok(number_value(-numeric(&value)?)),
                Token::Not => Ok(Value::Bool(!truthy(&value))),
                _ => Err("bad unary operator".into()),
            }
        }
        Expr::Binary(op, left, right) => {
            // Short-circuit the logical operators.
            if matches!(op, Token::And) {
                let l = eval(left, bindings)?;
                return if truthy(&l) { eval(right, bindings) } else { Ok(l) };
            }
            if matches!(op, Token::Or) {
                let l = eval(left, bindings)?;
                return if truthy(&l) { Ok(l) } else { eval(right, bindings) };
            }

            let l = eval(left, bindings)?;
            let r = eval(right, bindings)?;
            match op {
                Token::Plus => match (&l, &r) {
                    (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                        "{}{}",
                        coerce_to_string(&l),
                        coerce_to_string(&r)
                    ))),
                    _ => Ok(number_value(numeric(&l)? + numeric(&r)?)),
                },
                Token::Minus => Ok(number_value(numeric(&l)? - numeric(&r)?)),
                Token::Star => Ok(number_value(numeric(&l)? * numeric(&r)?)),
                Token::Slash => {
                    let divisor = numeric(&r)?;
                    if divisor == 0.0 {
                        return Err("division by zero".into());
                    }
                    Ok(number_value(numeric(&l)? / divisor))
                }
                Token::Percent => {
                    let divisor = numeric(&r)?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    Ok(number_value(numeric(&l)? % divisor))
                }
                Token::Eq => Ok(Value::Bool(l == r)),
                Token::Ne => Ok(Value::Bool(l != r)),
                Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                    let ordering = match (&l, &r) {
                        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                        _ => numeric(&l)?.partial_cmp(&numeric(&r)?),
                    }
                    .ok_or("values are not comparable")?;
                    Ok(Value::Bool(match op {
                        Token::Lt => ordering.is_lt(),
                        Token::Le => ordering.is_le(),
                        Token::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    }))
                }
                _ => Err("bad binary operator".into()),
            }
        }
        Expr::Call(name, args) => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| eval(a, bindings))
                .collect::<Result<_, _>>()?;
            call_intrinsic(name, &values)
        }
    }
}

fn call_intrinsic(name: &str, args: &[Value]) -> Result<Value, String> {
    let arg = |i: usize| -> Result<&Value, String> {
        args.get(i).ok_or_else(|| format!("{name}: missing argument {i}"))
    };

    match name {
        "length" => Ok(match arg(0)? {
            Value::String(s) => Value::Number(Number::from(s.chars().count() as i64)),
            Value::Array(items) => Value::Number(Number::from(items.len() as i64)),
            Value::Object(map) => Value::Number(Number::from(map.len() as i64)),
            Value::Null => Value::Number(Number::from(0)),
            _ => return Err("length: unsupported type".into()),
        }),
        "concat" => Ok(Value::String(
            args.iter().map(coerce_to_string).collect::<Vec<_>>().join(""),
        )),
        "substring" => {
            let s = coerce_to_string(arg(0)?);
            let start = numeric(arg(1)?)? as usize;
            let chars: Vec<char> = s.chars().collect();
            let end = match args.get(2) {
                Some(len) => (start + numeric(len)? as usize).min(chars.len()),
                None => chars.len(),
            };
            if start >= chars.len() {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "lower" => Ok(Value::String(coerce_to_string(arg(0)?).to_lowercase())),
        "upper" => Ok(Value::String(coerce_to_string(arg(0)?).to_uppercase())),
        "json_parse" => serde_json::from_str(&coerce_to_string(arg(0)?))
            .map_err(|e| format!("json_parse: {e}")),
        "json_stringify" => Ok(Value::String(
            serde_json::to_string(arg(0)?).map_err(|e| format!("json_stringify: {e}"))?,
        )),
        other => Err(format!("unknown function '{other}'")),
    }
}
