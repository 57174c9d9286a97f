//! Property tests for the condition compiler over generated valid expressions

use panel_core::token::{Operand, Operator, Token};
use panelc::{compile_expression, infix_to_postfix, is_valid};
use proptest::prelude::*;
use std::collections::HashMap;

const BINARY: [Operator; 11] = [
    Operator::Mod,
    Operator::Lt,
    Operator::Gt,
    Operator::Le,
    Operator::Ge,
    Operator::Eq,
    Operator::Ne,
    Operator::BitAnd,
    Operator::BitOr,
    Operator::And,
    Operator::Or,
];

fn operand() -> impl Strategy<Value = Token> {
    prop_oneof![
        any::<u32>().prop_map(Token::uint),
        any::<i32>().prop_map(Token::int),
        "[a-z]{1,6}".prop_map(Token::prop),
        "[a-z]{1,6}".prop_map(Token::func),
        "[a-z]{0,4}".prop_map(Token::string),
    ]
}

fn binary_op() -> impl Strategy<Value = Operator> {
    proptest::sample::select(BINARY.to_vec())
}

/// Valid infix token arrays built from operands, `!`, groups and binaries
fn valid_expr() -> impl Strategy<Value = Vec<Token>> {
    operand().prop_map(|t| vec![t]).prop_recursive(5, 48, 2, |inner| {
        prop_oneof![
            (inner.clone(), binary_op(), inner.clone()).prop_map(|(mut left, op, right)| {
                left.push(Token::op(op));
                left.extend(right);
                left
            }),
            inner.clone().prop_map(|body| {
                let mut tokens = vec![Token::op(Operator::GroupOpen)];
                tokens.extend(body);
                tokens.push(Token::op(Operator::GroupClose));
                tokens
            }),
            inner.prop_map(|body| {
                let mut tokens = vec![Token::op(Operator::Not)];
                tokens.extend(body);
                tokens
            }),
        ]
    })
}

fn operand_counts(tokens: &[Token]) -> HashMap<Operand, usize> {
    let mut counts = HashMap::new();
    for token in tokens {
        if let Token::Operand(operand) = token {
            *counts.entry(operand.clone()).or_insert(0) += 1;
        }
    }
    counts
}

proptest! {
    /// Postfix keeps exactly the operands and drops every grouping token.
    #[test]
    fn postfix_preserves_operands(tokens in valid_expr()) {
        prop_assert!(is_valid(&tokens));
        let postfix = infix_to_postfix(&tokens).unwrap();

        prop_assert_eq!(operand_counts(&postfix), operand_counts(&tokens));
        prop_assert!(postfix
            .iter()
            .all(|t| !matches!(t, Token::Operator(Operator::GroupOpen | Operator::GroupClose))));

        let groups = tokens
            .iter()
            .filter(|t| matches!(t, Token::Operator(op) if op.is_group()))
            .count();
        prop_assert_eq!(postfix.len(), tokens.len() - groups);
    }

    /// The tree builder records the same postfix order as the postfix pass.
    #[test]
    fn tree_and_postfix_agree(tokens in valid_expr()) {
        let expr = compile_expression(&tokens).unwrap();
        let postfix = infix_to_postfix(&tokens).unwrap();
        prop_assert_eq!(expr.postfix(), postfix.as_slice());
    }

    /// Any operand-operator-operand triple validates.
    #[test]
    fn simple_binary_valid(left in operand(), op in binary_op(), right in operand()) {
        prop_assert!(is_valid(&[left, Token::op(op), right]));
    }

    /// Leading or trailing binary operators always fail.
    #[test]
    fn dangling_binary_invalid(tokens in valid_expr(), op in binary_op()) {
        let mut leading = vec![Token::op(op)];
        leading.extend(tokens.iter().cloned());
        prop_assert!(!is_valid(&leading));

        let mut trailing = tokens;
        trailing.push(Token::op(op));
        prop_assert!(!is_valid(&trailing));
    }
}
