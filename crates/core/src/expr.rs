//! Compiled condition expressions
//!
//! The compiler (`panelc::expr`) turns an infix token array into an [`Expr`]:
//! a binary tree plus the equivalent postfix token list. Both forms are kept
//! so the runtime can evaluate either one.

use crate::token::{Operand, Operator, Token, display_tokens};
use std::fmt;

/// Expression tree node
///
/// Every child is exclusively owned by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprNode {
    Leaf(Operand),
    Unary {
        op: Operator,
        operand: Box<ExprNode>,
    },
    Binary {
        op: Operator,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
}

impl ExprNode {
    pub fn leaf(operand: Operand) -> Self {
        ExprNode::Leaf(operand)
    }

    pub fn unary(op: Operator, operand: ExprNode) -> Self {
        ExprNode::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: Operator, left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Operator at this node, `None` for leaves
    pub fn operator(&self) -> Option<Operator> {
        match self {
            ExprNode::Leaf(_) => None,
            ExprNode::Unary { op, .. } | ExprNode::Binary { op, .. } => Some(*op),
        }
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Leaf(operand) => write!(f, "{}", operand),
            ExprNode::Unary { op, operand } => write!(f, "{}{}", op, operand),
            ExprNode::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}

/// A compiled, validated expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    root: ExprNode,
    postfix: Vec<Token>,
    depth: usize,
}

impl Expr {
    /// Assemble a compiled expression.
    ///
    /// `depth` is the number of nodes on the longest root-to-leaf path; the
    /// compiler computes it while building the tree.
    pub fn new(root: ExprNode, postfix: Vec<Token>, depth: usize) -> Self {
        Expr {
            root,
            postfix,
            depth,
        }
    }

    pub fn root(&self) -> &ExprNode {
        &self.root
    }

    pub fn postfix(&self) -> &[Token] {
        &self.postfix
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  [{}]", self.root, display_tokens(&self.postfix))
    }
}
