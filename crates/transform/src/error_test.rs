use super::*;

#[test]
fn test_invalid_pattern_display() {
    let source = regex::Regex::new("(open").unwrap_err();
    let err = TransformError::InvalidPattern {
        tag: "app.prod".into(),
        source,
    };
    assert!(err.to_string().starts_with("invalid pattern for tag 'app.prod'"));
}

#[test]
fn test_helpers() {
    assert_eq!(
        TransformError::config("max_len must be positive").to_string(),
        "invalid configuration: max_len must be positive"
    );
    assert_eq!(
        TransformError::unsupported("concat", "x").to_string(),
        "stage 'concat' does not support tag 'x'"
    );
}
