//! Condition expression evaluation
//!
//! Evaluates compiled expressions against live device state. Every operator
//! evaluates both of its operands before combining them: `&&` and `||` do
//! not short-circuit, so function operands on either side always run.
//!
//! Lookup failures never abort evaluation. A missing property or function
//! evaluates to 0 and is logged; string operands always evaluate to 0.

use panel_core::token::{Operand, Operator, Token};
use panel_core::{Error, Expr, ExprNode, Result};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Dependency-injection interface used by the evaluator
pub trait EvalContext {
    /// Current value of a named property
    fn property(&self, name: &str) -> Option<i64>;

    /// Invoke a named function; `None` if no such function exists
    fn call(&mut self, name: &str) -> Option<i64>;
}

/// Registered panel function
pub type PanelFn = Box<dyn FnMut() -> i64 + Send>;

/// Per-device property and function table
///
/// Constructed once per device and passed by reference to the evaluator and
/// the interpreter.
#[derive(Default)]
pub struct PropertyRegistry {
    properties: HashMap<String, i64>,
    functions: HashMap<String, PanelFn>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        PropertyRegistry::default()
    }

    /// Add a property (builder pattern)
    pub fn with_property(mut self, name: impl Into<String>, value: i64) -> Self {
        self.set(name, value);
        self
    }

    /// Add a function (builder pattern)
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        f: impl FnMut() -> i64 + Send + 'static,
    ) -> Self {
        self.register_function(name, f);
        self
    }

    /// Set a property, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: i64) -> Option<i64> {
        self.properties.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.properties.get(name).copied()
    }

    /// Like [`get`](Self::get) but a missing property is an error
    pub fn require(&self, name: &str) -> Result<i64> {
        self.get(name).ok_or_else(|| Error::PropertyNotFound(name.to_string()))
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        f: impl FnMut() -> i64 + Send + 'static,
    ) {
        self.functions.insert(name.into(), Box::new(f));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Property names in sorted order
    pub fn property_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        functions.sort_unstable();
        f.debug_struct("PropertyRegistry")
            .field("properties", &self.properties)
            .field("functions", &functions)
            .finish()
    }
}

impl EvalContext for PropertyRegistry {
    fn property(&self, name: &str) -> Option<i64> {
        self.get(name)
    }

    fn call(&mut self, name: &str) -> Option<i64> {
        self.functions.get_mut(name).map(|f| f())
    }
}

/// Evaluate a compiled expression tree.
///
/// Recursion depth is bounded by the compiler's tree depth limit.
pub fn eval_expression<C: EvalContext + ?Sized>(expr: &Expr, ctx: &mut C) -> i64 {
    eval_node(expr.root(), ctx)
}

fn eval_node<C: EvalContext + ?Sized>(node: &ExprNode, ctx: &mut C) -> i64 {
    match node {
        ExprNode::Leaf(operand) => eval_operand(operand, ctx),
        ExprNode::Unary { op, operand } => {
            let value = eval_node(operand, ctx);
            apply_unary(*op, value)
        }
        ExprNode::Binary { op, left, right } => {
            // Both sides, always, left first
            let lhs = eval_node(left, ctx);
            let rhs = eval_node(right, ctx);
            apply_binary(*op, lhs, rhs)
        }
    }
}

/// Evaluate a postfix token list with an explicit value stack.
///
/// Same semantics as [`eval_expression`]; malformed input (stack underflow,
/// grouping tokens, leftover values) is reported as `InvalidExpression`.
pub fn eval_postfix<C: EvalContext + ?Sized>(tokens: &[Token], ctx: &mut C) -> Result<i64> {
    let mut stack: Vec<i64> = Vec::with_capacity(tokens.len());
    let underflow = |index: usize, op: Operator| {
        Error::invalid_expression(index, format!("'{}' lacks operands", op))
    };

    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Operand(operand) => stack.push(eval_operand(operand, ctx)),
            Token::Operator(op) if op.is_group() => {
                return Err(Error::invalid_expression(
                    index,
                    "grouping token in postfix input",
                ));
            }
            Token::Operator(op) if op.is_unary() => {
                let value = stack.pop().ok_or_else(|| underflow(index, *op))?;
                stack.push(apply_unary(*op, value));
            }
            Token::Operator(op) => {
                let rhs = stack.pop().ok_or_else(|| underflow(index, *op))?;
                let lhs = stack.pop().ok_or_else(|| underflow(index, *op))?;
                stack.push(apply_binary(*op, lhs, rhs));
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(value), true) => Ok(value),
        (None, _) => Err(Error::invalid_expression(0, "empty postfix expression")),
        (Some(_), false) => Err(Error::invalid_expression(
            tokens.len().saturating_sub(1),
            format!("{} values left on the stack", stack.len() + 1),
        )),
    }
}

fn eval_operand<C: EvalContext + ?Sized>(operand: &Operand, ctx: &mut C) -> i64 {
    match operand {
        Operand::UInt(v) => i64::from(*v),
        Operand::Int(v) => i64::from(*v),
        Operand::Str(_) => 0,
        Operand::Property(name) => ctx.property(name).unwrap_or_else(|| {
            warn!(property = %name, "property not found, evaluating as 0");
            0
        }),
        Operand::Function(name) => ctx.call(name).unwrap_or_else(|| {
            warn!(function = %name, "function not registered, evaluating as 0");
            0
        }),
    }
}

fn apply_unary(op: Operator, value: i64) -> i64 {
    match op {
        Operator::Not => i64::from(value == 0),
        other => {
            warn!(operator = %other, "not a unary operator, evaluating as 0");
            0
        }
    }
}

fn apply_binary(op: Operator, lhs: i64, rhs: i64) -> i64 {
    match op {
        Operator::Mod => {
            if rhs == 0 {
                warn!(lhs, "modulo by zero, evaluating as 0");
                0
            } else {
                lhs.wrapping_rem(rhs)
            }
        }
        Operator::Lt => i64::from(lhs < rhs),
        Operator::Gt => i64::from(lhs > rhs),
        Operator::Le => i64::from(lhs <= rhs),
        Operator::Ge => i64::from(lhs >= rhs),
        Operator::Eq => i64::from(lhs == rhs),
        Operator::Ne => i64::from(lhs != rhs),
        Operator::BitAnd => lhs & rhs,
        Operator::BitOr => lhs | rhs,
        Operator::And => i64::from(lhs != 0 && rhs != 0),
        Operator::Or => i64::from(lhs != 0 || rhs != 0),
        Operator::Not | Operator::GroupOpen | Operator::GroupClose => {
            warn!(operator = %op, "not a binary operator, evaluating as 0");
            0
        }
    }
}
