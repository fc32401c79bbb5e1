//! Typed directives and the annotation grammar
//!
//! ```text
//! <prefix>: [unsafe ]<kind>[/<qualifier>]
//! ```
//!
//! Kinds are `inline`, `unroll`, `deadcode`, `speed` and `size`. `unroll`
//! takes a numeric factor, `inline` takes `force`.

use crate::ast::{Node, NodeId, Transform};
use crate::source::{Position, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default annotation prefix
pub const DEFAULT_PREFIX: &str = "tool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirectiveId(pub u32);

impl fmt::Display for DirectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveKind {
    Inline,
    Unroll,
    Deadcode,
    FuncSpeed,
    FuncSize,
}

impl DirectiveKind {
    /// The word used in annotations
    pub fn keyword(&self) -> &'static str {
        match self {
            DirectiveKind::Inline => "inline",
            DirectiveKind::Unroll => "unroll",
            DirectiveKind::Deadcode => "deadcode",
            DirectiveKind::FuncSpeed => "speed",
            DirectiveKind::FuncSize => "size",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "inline" => Some(DirectiveKind::Inline),
            "unroll" => Some(DirectiveKind::Unroll),
            "deadcode" => Some(DirectiveKind::Deadcode),
            "speed" => Some(DirectiveKind::FuncSpeed),
            "size" => Some(DirectiveKind::FuncSize),
            _ => None,
        }
    }

    /// Whether a directive of this kind may target `node`
    pub fn accepts(&self, node: &Node) -> bool {
        match self {
            DirectiveKind::Inline => {
                matches!(node, Node::Call { .. } | Node::FunctionDecl { .. })
            }
            DirectiveKind::Unroll => matches!(node, Node::Loop { .. }),
            DirectiveKind::Deadcode => {
                !matches!(
                    node,
                    Node::Module { .. } | Node::Global { .. } | Node::FunctionDecl { .. }
                ) && (node.is_statement() || node.is_expression())
            }
            DirectiveKind::FuncSpeed | DirectiveKind::FuncSize => {
                matches!(node, Node::FunctionDecl { .. })
            }
        }
    }

    /// Mark left behind by the pass this directive maps to
    pub fn product_mark(&self) -> Option<Transform> {
        match self {
            DirectiveKind::Inline => Some(Transform::Inlined),
            DirectiveKind::Unroll => Some(Transform::Unrolled),
            DirectiveKind::Deadcode => Some(Transform::Eliminated),
            DirectiveKind::FuncSpeed | DirectiveKind::FuncSize => None,
        }
    }

    pub fn is_function_level(&self) -> bool {
        matches!(self, DirectiveKind::FuncSpeed | DirectiveKind::FuncSize)
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    /// `unroll/<factor>`
    Factor(u32),
    /// `inline/force`: do not consult the compiler oracle
    Force,
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Factor(n) => write!(f, "{}", n),
            Qualifier::Force => f.write_str("force"),
        }
    }
}

/// A parsed annotation bound to the node it targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: DirectiveId,
    pub kind: DirectiveKind,
    pub target: NodeId,
    pub is_unsafe: bool,
    pub qualifier: Option<Qualifier>,
    /// Range of the annotation itself
    pub span: Span,
    pub position: Position,
}

impl Directive {
    pub fn factor(&self) -> Option<u32> {
        match self.qualifier {
            Some(Qualifier::Factor(n)) => Some(n),
            _ => None,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.qualifier == Some(Qualifier::Force)
    }

    /// Source form, e.g. `unsafe unroll/4`
    pub fn describe(&self) -> String {
        let mut text = String::new();
        if self.is_unsafe && self.kind != DirectiveKind::Deadcode {
            text.push_str("unsafe ");
        }
        text.push_str(self.kind.keyword());
        if let Some(qualifier) = self.qualifier {
            text.push('/');
            text.push_str(&qualifier.to_string());
        }
        text
    }
}

/// Result of parsing one annotation, before binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAnnotation {
    pub kind: DirectiveKind,
    pub is_unsafe: bool,
    pub qualifier: Option<Qualifier>,
}

/// Parse an annotation text.
///
/// Returns `Ok(None)` for ordinary comments that do not carry `prefix`, and
/// `Err(message)` for malformed directives.
pub fn parse_annotation(
    text: &str,
    prefix: &str,
) -> std::result::Result<Option<ParsedAnnotation>, String> {
    let trimmed = text.trim();
    let rest = match trimmed.strip_prefix(prefix) {
        Some(rest) => rest.trim_start(),
        None => return Ok(None),
    };
    let body = match rest.strip_prefix(':') {
        Some(body) => body,
        None => return Ok(None),
    };

    let mut tokens = body.split_whitespace();
    let mut word = tokens
        .next()
        .ok_or_else(|| format!("missing directive kind after `{}:`", prefix))?;
    let mut is_unsafe = false;
    if word == "unsafe" {
        is_unsafe = true;
        word = tokens
            .next()
            .ok_or_else(|| "missing directive kind after `unsafe`".to_string())?;
    }
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected token `{}` after `{}`", extra, word));
    }

    let (keyword, qualifier_text) = match word.split_once('/') {
        Some((keyword, qualifier)) => (keyword, Some(qualifier)),
        None => (word, None),
    };
    let kind = DirectiveKind::from_keyword(keyword)
        .ok_or_else(|| format!("unknown directive `{}`", keyword))?;

    let qualifier = match (kind, qualifier_text) {
        (_, None) => None,
        (DirectiveKind::Unroll, Some(factor)) => {
            let factor: u32 = factor
                .parse()
                .map_err(|_| format!("unroll factor `{}` is not a number", factor))?;
            if factor < 2 {
                return Err(format!("unroll factor must be at least 2, got {}", factor));
            }
            Some(Qualifier::Factor(factor))
        }
        (DirectiveKind::Inline, Some("force")) => Some(Qualifier::Force),
        (DirectiveKind::Inline, Some(other)) => {
            return Err(format!("unknown inline qualifier `{}`", other));
        }
        (kind, Some(_)) => return Err(format!("`{}` takes no qualifier", kind)),
    };

    Ok(Some(ParsedAnnotation {
        kind,
        // Eliminating code is never semantics-preserving
        is_unsafe: is_unsafe || kind == DirectiveKind::Deadcode,
        qualifier,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> std::result::Result<Option<ParsedAnnotation>, String> {
        parse_annotation(text, DEFAULT_PREFIX)
    }

    #[test]
    fn test_plain_comments_are_ignored() {
        assert_eq!(parse("just a comment"), Ok(None));
        assert_eq!(parse("toolbox: inline"), Ok(None));
        assert_eq!(parse("tool inline"), Ok(None));
    }

    #[test]
    fn test_parse_kinds_and_qualifiers() {
        let unroll = parse("tool: unroll/4").unwrap().unwrap();
        assert_eq!(unroll.kind, DirectiveKind::Unroll);
        assert_eq!(unroll.qualifier, Some(Qualifier::Factor(4)));
        assert!(!unroll.is_unsafe);

        let inline = parse("  tool:inline/force ").unwrap().unwrap();
        assert_eq!(inline.qualifier, Some(Qualifier::Force));

        let speed = parse("tool: unsafe speed").unwrap().unwrap();
        assert_eq!(speed.kind, DirectiveKind::FuncSpeed);
        assert!(speed.is_unsafe);
    }

    #[test]
    fn test_deadcode_is_always_unsafe() {
        let parsed = parse("tool: deadcode").unwrap().unwrap();
        assert!(parsed.is_unsafe);
    }

    #[test]
    fn test_malformed_directives() {
        assert!(parse("tool:").is_err());
        assert!(parse("tool: unsafe").is_err());
        assert!(parse("tool: vectorize").is_err());
        assert!(parse("tool: unroll/1").is_err());
        assert!(parse("tool: unroll/many").is_err());
        assert!(parse("tool: unroll/").is_err());
        assert!(parse("tool: inline/always").is_err());
        assert!(parse("tool: size/2").is_err());
        assert!(parse("tool: inline now").is_err());
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(parse_annotation("tool: inline", "opt"), Ok(None));
        let parsed = parse_annotation("opt: size", "opt").unwrap().unwrap();
        assert_eq!(parsed.kind, DirectiveKind::FuncSize);
    }

    #[test]
    fn test_kind_targets() {
        assert!(DirectiveKind::Unroll.accepts(&Node::Loop {
            label: None,
            induction: "i".into(),
            start: NodeId::new(1).unwrap(),
            end: NodeId::new(2).unwrap(),
            step: NodeId::new(3).unwrap(),
            body: NodeId::new(4).unwrap(),
        }));
        assert!(!DirectiveKind::Unroll.accepts(&Node::Nop));
        assert!(DirectiveKind::Deadcode.accepts(&Node::Nop));
        assert!(DirectiveKind::Deadcode.accepts(&Node::int(1)));
        assert!(!DirectiveKind::FuncSpeed.accepts(&Node::int(1)));
    }
}
