//! Condition expression compiler
//!
//! Turns a flat, pre-classified infix token array into postfix order or into
//! an expression tree. There is no lexer; the only syntax checks are the
//! adjacency rules in [`validate`].
//!
//! # Usage
//!
//! ```ignore
//! let tokens = vec![Token::prop("state"), Token::op(Operator::Eq), Token::uint(1)];
//! let expr = compile_expression(&tokens)?;
//! ```
//!
//! # Implementation Details
//!
//! - **Algorithm**: a single shunting-yard pass drives both outputs. The pass
//!   reports operands and operators to a [`Sink`]; the postfix sink appends
//!   tokens, the tree sink combines nodes on an operand stack.
//! - **Precedence**: `!` 8, `%` 7, relational 6, equality 5, `&` 4, `|` 3,
//!   `&&` 2, `||` 1. Equal precedence associates left.
//! - **Depth**: trees deeper than [`MAX_EXPR_DEPTH`] are rejected so that
//!   recursive evaluation stays bounded.

use panel_core::token::{Operand, Operator, Token, TokenClass};
use panel_core::{Error, Expr, ExprNode, Result};

/// Deepest expression tree the compiler will build
pub const MAX_EXPR_DEPTH: usize = 64;

/// Check token adjacency and grouping.
///
/// On failure the error names the index of the offending token.
pub fn validate(tokens: &[Token]) -> Result<()> {
    let Some(first) = tokens.first() else {
        return Err(Error::invalid_expression(0, "empty expression"));
    };
    if first.class() == TokenClass::Binary {
        return Err(Error::invalid_expression(
            0,
            format!("expression starts with binary operator '{}'", first),
        ));
    }

    let last_index = tokens.len() - 1;
    let last = &tokens[last_index];
    if matches!(last.class(), TokenClass::Binary | TokenClass::Unary) {
        return Err(Error::invalid_expression(
            last_index,
            format!("expression ends with operator '{}'", last),
        ));
    }

    // Indices of currently unclosed '(' tokens
    let mut open_groups: Vec<usize> = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        let prev = index.checked_sub(1).map(|i| tokens[i].class());
        let next = tokens.get(index + 1).map(|t| t.class());
        let follows_value = matches!(prev, Some(TokenClass::Operand | TokenClass::Close));

        match token.class() {
            TokenClass::Operand => {
                if follows_value {
                    return Err(Error::invalid_expression(
                        index,
                        format!("operand '{}' directly follows a value", token),
                    ));
                }
            }
            TokenClass::Open => {
                if follows_value {
                    return Err(Error::invalid_expression(
                        index,
                        "'(' directly follows a value",
                    ));
                }
                open_groups.push(index);
            }
            TokenClass::Close => {
                if !follows_value {
                    return Err(Error::invalid_expression(
                        index,
                        "')' must follow an operand or ')'",
                    ));
                }
                if open_groups.pop().is_none() {
                    return Err(Error::invalid_expression(index, "unmatched ')'"));
                }
            }
            TokenClass::Unary => {
                if follows_value {
                    return Err(Error::invalid_expression(
                        index,
                        format!("unary '{}' directly follows a value", token),
                    ));
                }
                if !matches!(
                    next,
                    Some(TokenClass::Operand | TokenClass::Unary | TokenClass::Open)
                ) {
                    return Err(Error::invalid_expression(
                        index,
                        format!("unary '{}' must be followed by an operand, '!' or '('", token),
                    ));
                }
            }
            TokenClass::Binary => {
                if !follows_value {
                    return Err(Error::invalid_expression(
                        index,
                        format!("binary '{}' must follow an operand or ')'", token),
                    ));
                }
                if !matches!(
                    next,
                    Some(TokenClass::Operand | TokenClass::Unary | TokenClass::Open)
                ) {
                    return Err(Error::invalid_expression(
                        index,
                        format!("binary '{}' must be followed by an operand, '!' or '('", token),
                    ));
                }
            }
        }
    }

    if let Some(&unclosed) = open_groups.last() {
        return Err(Error::invalid_expression(unclosed, "unmatched '('"));
    }

    Ok(())
}

/// Boolean form of [`validate`]
pub fn is_valid(tokens: &[Token]) -> bool {
    validate(tokens).is_ok()
}

/// Convert infix tokens to postfix (evaluation) order.
///
/// The result contains every operand of the input and no grouping tokens.
pub fn infix_to_postfix(tokens: &[Token]) -> Result<Vec<Token>> {
    validate(tokens)?;
    let mut sink = PostfixSink {
        output: Vec::with_capacity(tokens.len()),
    };
    shunting_yard(tokens, &mut sink)?;
    Ok(sink.output)
}

/// Convert infix tokens to an expression tree.
///
/// Partially built nodes are dropped if any step fails.
pub fn infix_to_tree(tokens: &[Token]) -> Result<Expr> {
    validate(tokens)?;
    let mut sink = TreeSink {
        nodes: Vec::new(),
        postfix: Vec::with_capacity(tokens.len()),
    };
    shunting_yard(tokens, &mut sink)?;
    sink.finish()
}

/// Validate and compile a condition into an evaluable expression.
pub fn compile_expression(tokens: &[Token]) -> Result<Expr> {
    infix_to_tree(tokens)
}

/// Receiver for the shunting-yard output stream
trait Sink {
    fn operand(&mut self, operand: &Operand) -> Result<()>;
    /// `index` is the position of the operator in the infix input
    fn operator(&mut self, op: Operator, index: usize) -> Result<()>;
}

fn shunting_yard(tokens: &[Token], sink: &mut impl Sink) -> Result<()> {
    let mut ops: Vec<(Operator, usize)> = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Operand(operand) => sink.operand(operand)?,
            Token::Operator(Operator::GroupOpen) => ops.push((Operator::GroupOpen, index)),
            Token::Operator(Operator::GroupClose) => loop {
                match ops.pop() {
                    Some((Operator::GroupOpen, _)) => break,
                    Some((op, at)) => sink.operator(op, at)?,
                    None => return Err(Error::invalid_expression(index, "unmatched ')'")),
                }
            },
            Token::Operator(op) if op.is_unary() => ops.push((*op, index)),
            Token::Operator(op) => {
                // '(' has precedence 0, so it stops the loop
                while let Some(&(top, at)) = ops.last()
                    && top.precedence() >= op.precedence()
                {
                    ops.pop();
                    sink.operator(top, at)?;
                }
                ops.push((*op, index));
            }
        }
    }

    while let Some((op, at)) = ops.pop() {
        if op == Operator::GroupOpen {
            return Err(Error::invalid_expression(at, "unmatched '('"));
        }
        sink.operator(op, at)?;
    }

    Ok(())
}

struct PostfixSink {
    output: Vec<Token>,
}

impl Sink for PostfixSink {
    fn operand(&mut self, operand: &Operand) -> Result<()> {
        self.output.push(Token::Operand(operand.clone()));
        Ok(())
    }

    fn operator(&mut self, op: Operator, _index: usize) -> Result<()> {
        self.output.push(Token::Operator(op));
        Ok(())
    }
}

/// Builds the tree bottom-up; each stack entry carries its subtree depth
struct TreeSink {
    nodes: Vec<(ExprNode, usize)>,
    postfix: Vec<Token>,
}

impl TreeSink {
    fn pop(&mut self, op: Operator, index: usize) -> Result<(ExprNode, usize)> {
        self.nodes.pop().ok_or_else(|| {
            Error::invalid_expression(index, format!("operator '{}' is missing an operand", op))
        })
    }

    fn push_checked(&mut self, node: ExprNode, depth: usize) -> Result<()> {
        if depth > MAX_EXPR_DEPTH {
            return Err(Error::ExpressionTooDeep {
                limit: MAX_EXPR_DEPTH,
            });
        }
        self.nodes.push((node, depth));
        Ok(())
    }

    fn finish(mut self) -> Result<Expr> {
        let (root, depth) = match (self.nodes.pop(), self.nodes.is_empty()) {
            (Some(entry), true) => entry,
            (None, _) => return Err(Error::invalid_expression(0, "expression has no value")),
            (Some(_), false) => {
                return Err(Error::invalid_expression(
                    0,
                    format!("{} operands left without an operator", self.nodes.len() + 1),
                ));
            }
        };
        Ok(Expr::new(root, self.postfix, depth))
    }
}

impl Sink for TreeSink {
    fn operand(&mut self, operand: &Operand) -> Result<()> {
        self.postfix.push(Token::Operand(operand.clone()));
        self.push_checked(ExprNode::leaf(operand.clone()), 1)
    }

    fn operator(&mut self, op: Operator, index: usize) -> Result<()> {
        self.postfix.push(Token::Operator(op));
        if op.is_unary() {
            let (operand, depth) = self.pop(op, index)?;
            self.push_checked(ExprNode::unary(op, operand), depth + 1)
        } else {
            let (right, right_depth) = self.pop(op, index)?;
            let (left, left_depth) = self.pop(op, index)?;
            self.push_checked(
                ExprNode::binary(op, left, right),
                left_depth.max(right_depth) + 1,
            )
        }
    }
}
