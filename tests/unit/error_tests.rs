//! Unit tests for `AppError` display format and classification.

use agent_steward::errors::ErrorClass;
use agent_steward::AppError;

#[test]
fn display_uses_lowercase_category_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("locked".into()), "db: locked"),
        (AppError::Vcs("no repo".into()), "vcs: no repo"),
        (AppError::UnknownAgent("agent-9".into()), "unknown agent: agent-9"),
        (AppError::Quarantined("agent-2".into()), "quarantined: agent-2"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let errors = [
        AppError::MalformedEdit("operation 1 on src/lib.rs: anchor `x` not found".into()),
        AppError::PayloadTooLarge { size: 10, limit: 5 },
        AppError::ConflictingTargets(vec!["a.rs".into(), "b.rs".into()]),
        AppError::StaleRevision {
            expected: "rev-1".into(),
            actual: "rev-2".into(),
        },
    ];
    for err in errors {
        let s = err.to_string();
        assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
    }
}

#[test]
fn payload_too_large_reports_size_and_limit() {
    let err = AppError::PayloadTooLarge {
        size: 300,
        limit: 256,
    };
    assert_eq!(
        err.to_string(),
        "payload too large: 300 bytes exceeds limit of 256"
    );
}

#[test]
fn conflicting_targets_lists_every_path() {
    let err = AppError::ConflictingTargets(vec!["src/a.rs".into(), "src/b.rs".into()]);
    assert_eq!(err.to_string(), "conflicting targets: src/a.rs, src/b.rs");
}

#[test]
fn transient_errors_are_retryable() {
    let transient = [
        AppError::StaleRevision {
            expected: "a".into(),
            actual: "b".into(),
        },
        AppError::ConflictingTargets(vec!["x".into()]),
        AppError::RestartInProgress("agent-1".into()),
    ];
    for err in transient {
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_transient());
    }
}

#[test]
fn structural_errors_are_never_retried() {
    let structural = [
        AppError::MalformedEdit("x".into()),
        AppError::UnknownAgent("x".into()),
        AppError::PayloadTooLarge { size: 2, limit: 1 },
        AppError::PathViolation("x".into()),
    ];
    for err in structural {
        assert_eq!(err.class(), ErrorClass::Structural);
        assert!(!err.is_transient());
    }
}

#[test]
fn quarantine_is_a_liveness_error() {
    assert_eq!(
        AppError::Quarantined("agent-1".into()).class(),
        ErrorClass::Liveness
    );
}

#[test]
fn lease_expiry_is_not_retried() {
    let err = AppError::LeaseExpired("validation exceeded 600s".into());
    assert_eq!(err.class(), ErrorClass::Infrastructure);
    assert_eq!(err.code(), "lease_expired");
}

#[test]
fn codes_are_snake_case_identifiers() {
    let err = AppError::MalformedEdit("x".into());
    assert_eq!(err.code(), "malformed_edit");
    assert!(err
        .code()
        .chars()
        .all(|c| c.is_ascii_lowercase() || c == '_'));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse: Result<toml::Value, _> = toml::from_str("not = [valid");
    let err: AppError = parse.unwrap_err().into();
    assert!(matches!(err, AppError::Config(_)));
}
