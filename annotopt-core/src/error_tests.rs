#[cfg(test)]
mod tests {
    use crate::ast::{NodeId, NodeKind};
    use crate::directive::DirectiveKind;
    use crate::error::*;
    use crate::source::Position;

    fn at(line: u32, column: u32) -> Position {
        Position { line, column }
    }

    // ===== Error Creation Tests =====

    #[test]
    fn test_directive_syntax_error() {
        let err = Error::DirectiveSyntax {
            message: "unknown directive `vectorize`".to_string(),
            position: at(3, 8),
        };
        assert_eq!(
            err.to_string(),
            "Directive syntax error at 3:8: unknown directive `vectorize`"
        );
    }

    #[test]
    fn test_attachment_error() {
        let err = Error::DirectiveAttachment {
            kind: DirectiveKind::Unroll,
            found: NodeKind::Statement,
            position: at(2, 5),
        };
        assert_eq!(
            err.to_string(),
            "Directive attachment error at 2:5: `unroll` cannot attach to a statement"
        );
    }

    #[test]
    fn test_conflict_error() {
        let err = Error::DirectiveConflict {
            function: "hot".to_string(),
            position: at(1, 5),
        };
        assert!(err.to_string().contains("`speed` and `size`"));
        assert!(err.to_string().contains("`hot`"));
    }

    #[test]
    fn test_missing_node_error() {
        let err = Error::MissingNode(NodeId::new(7).unwrap());
        assert_eq!(err.to_string(), "Missing node: n7");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: Error = anyhow::anyhow!("custom failure").into();
        assert_eq!(err.to_string(), "custom failure");
    }

    // ===== Severity Tests =====

    #[test]
    fn test_severity_classes() {
        let warning = Error::TransformationInapplicable {
            pass: "inline".to_string(),
            reason: "callee is recursive".to_string(),
        };
        assert_eq!(warning.severity(), Severity::Warning);
        assert!(!warning.aborts_run());

        let syntax = Error::DirectiveSyntax {
            message: "missing kind".to_string(),
            position: at(1, 1),
        };
        assert_eq!(syntax.severity(), Severity::Fatal);
        assert!(!syntax.aborts_run());

        let invariant = Error::invariant("node reachable twice");
        assert_eq!(invariant.severity(), Severity::Fatal);
        assert!(invariant.aborts_run());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Fatal);
    }
}
