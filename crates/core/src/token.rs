//! Pre-classified expression tokens
//!
//! Conditions in a panel sequence arrive as flat infix token arrays. There is
//! no lexer: every token already knows whether it is an operand (literal,
//! property reference, function reference) or an operator.
//!
//! In a manifest a token is a single-key inline table:
//!
//! ```toml
//! cond = [{ prop = "panel_state" }, { op = "eq" }, { uint = 1 }]
//! ```

use serde::Deserialize;
use std::fmt;

/// Expression operators, including the grouping pseudo-operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "(")]
    GroupOpen,
    #[serde(alias = ")")]
    GroupClose,
    #[serde(alias = "!")]
    Not,
    #[serde(alias = "%")]
    Mod,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "&")]
    BitAnd,
    #[serde(alias = "|")]
    BitOr,
    #[serde(alias = "&&")]
    And,
    #[serde(alias = "||")]
    Or,
}

impl Operator {
    /// Binding strength used by the shunting-yard pass (higher binds tighter).
    ///
    /// Grouping tokens have no precedence of their own; they report 0 so an
    /// open parenthesis on the operator stack never gets popped by a binary
    /// operator.
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Not => 8,
            Operator::Mod => 7,
            Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => 6,
            Operator::Eq | Operator::Ne => 5,
            Operator::BitAnd => 4,
            Operator::BitOr => 3,
            Operator::And => 2,
            Operator::Or => 1,
            Operator::GroupOpen | Operator::GroupClose => 0,
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Not)
    }

    pub fn is_binary(self) -> bool {
        !self.is_unary() && !self.is_group()
    }

    pub fn is_group(self) -> bool {
        matches!(self, Operator::GroupOpen | Operator::GroupClose)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::GroupOpen => "(",
            Operator::GroupClose => ")",
            Operator::Not => "!",
            Operator::Mod => "%",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::And => "&&",
            Operator::Or => "||",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Expression operands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    UInt(u32),
    Int(i32),
    /// Accepted by the compiler, always evaluates to 0
    Str(String),
    /// Named property looked up in the evaluation context
    Property(String),
    /// Named function invoked (with side effects) at evaluation time
    Function(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::UInt(v) => write!(f, "{}", v),
            Operand::Int(v) => write!(f, "{}", v),
            Operand::Str(s) => write!(f, "{:?}", s),
            Operand::Property(name) => write!(f, "${}", name),
            Operand::Function(name) => write!(f, "{}()", name),
        }
    }
}

/// Coarse token classes the validator reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Operand,
    Open,
    Close,
    Unary,
    Binary,
}

/// A single expression token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "TokenRepr")]
pub enum Token {
    Operand(Operand),
    Operator(Operator),
}

impl Token {
    pub fn uint(v: u32) -> Self {
        Token::Operand(Operand::UInt(v))
    }

    pub fn int(v: i32) -> Self {
        Token::Operand(Operand::Int(v))
    }

    pub fn prop(name: impl Into<String>) -> Self {
        Token::Operand(Operand::Property(name.into()))
    }

    pub fn func(name: impl Into<String>) -> Self {
        Token::Operand(Operand::Function(name.into()))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Token::Operand(Operand::Str(s.into()))
    }

    pub fn op(op: Operator) -> Self {
        Token::Operator(op)
    }

    pub fn class(&self) -> TokenClass {
        match self {
            Token::Operand(_) => TokenClass::Operand,
            Token::Operator(Operator::GroupOpen) => TokenClass::Open,
            Token::Operator(Operator::GroupClose) => TokenClass::Close,
            Token::Operator(op) if op.is_unary() => TokenClass::Unary,
            Token::Operator(_) => TokenClass::Binary,
        }
    }

    pub fn is_operand(&self) -> bool {
        matches!(self, Token::Operand(_))
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match self {
            Token::Operator(op) => Some(*op),
            Token::Operand(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Operand(operand) => fmt::Display::fmt(operand, f),
            Token::Operator(op) => fmt::Display::fmt(op, f),
        }
    }
}

/// Render a token list as a space separated string (diagnostics only)
pub fn display_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Manifest representation: one key naming the kind, one value
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenRepr {
    Uint(u32),
    Int(i32),
    Str(String),
    Prop(String),
    Func(String),
    Op(Operator),
}

impl From<TokenRepr> for Token {
    fn from(repr: TokenRepr) -> Self {
        match repr {
            TokenRepr::Uint(v) => Token::uint(v),
            TokenRepr::Int(v) => Token::int(v),
            TokenRepr::Str(s) => Token::string(s),
            TokenRepr::Prop(name) => Token::prop(name),
            TokenRepr::Func(name) => Token::func(name),
            TokenRepr::Op(op) => Token::op(op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        cond: Vec<Token>,
    }

    #[test]
    fn test_precedence_ordering() {
        let order = [
            Operator::Not,
            Operator::Mod,
            Operator::Lt,
            Operator::Eq,
            Operator::BitAnd,
            Operator::BitOr,
            Operator::And,
            Operator::Or,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].precedence() > pair[1].precedence());
        }
        assert_eq!(Operator::Le.precedence(), Operator::Gt.precedence());
        assert_eq!(Operator::Ne.precedence(), Operator::Eq.precedence());
    }

    #[test]
    fn test_token_classes() {
        assert_eq!(Token::uint(1).class(), TokenClass::Operand);
        assert_eq!(Token::op(Operator::GroupOpen).class(), TokenClass::Open);
        assert_eq!(Token::op(Operator::GroupClose).class(), TokenClass::Close);
        assert_eq!(Token::op(Operator::Not).class(), TokenClass::Unary);
        assert_eq!(Token::op(Operator::Or).class(), TokenClass::Binary);
    }

    #[test]
    fn test_deserialize_tokens_from_toml() {
        let holder: Holder = toml::from_str(
            r#"cond = [{ prop = "state" }, { op = "eq" }, { uint = 1 }, { op = "&&" }, { func = "is_hbm" }]"#,
        )
        .unwrap();
        assert_eq!(
            holder.cond,
            vec![
                Token::prop("state"),
                Token::op(Operator::Eq),
                Token::uint(1),
                Token::op(Operator::And),
                Token::func("is_hbm"),
            ]
        );
    }

    #[test]
    fn test_display_tokens() {
        let tokens = vec![
            Token::op(Operator::Not),
            Token::op(Operator::GroupOpen),
            Token::prop("x"),
            Token::op(Operator::Mod),
            Token::int(-3),
            Token::op(Operator::GroupClose),
        ];
        assert_eq!(display_tokens(&tokens), "! ( $x % -3 )");
    }
}
