use hearth_license::{
    AuthorityError, ManageError, PushError, SignatureError, StoreError, TrustError,
};

#[test]
fn store_error_display() {
    assert!(format!("{}", StoreError::NotFound).contains("no license"));
    assert!(format!("{}", StoreError::Forbidden).contains("cannot be removed"));
    let msg = format!("{}", StoreError::Corrupt("bad tag".into()));
    assert!(msg.contains("corrupt"));
    assert!(msg.contains("bad tag"));
}

#[test]
fn store_error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: StoreError = io.into();
    assert!(matches!(err, StoreError::Io(_)));
    assert!(format!("{err}").contains("denied"));
}

#[test]
fn signature_error_display() {
    assert!(format!("{}", SignatureError::KeyUnavailable).contains("no verification key"));
    assert!(format!("{}", SignatureError::Mismatch).contains("does not match"));
    assert!(format!("{}", SignatureError::Timeout).contains("timed out"));
}

#[test]
fn trust_error_is_descriptive() {
    let msg = format!("{}", TrustError::BundledKeyMismatch);
    assert!(msg.contains("bundled public key"));
}

#[test]
fn authority_error_retryability() {
    assert!(AuthorityError::Unreachable("refused".into()).is_retryable());
    assert!(AuthorityError::Timeout.is_retryable());
    assert!(AuthorityError::Status(503).is_retryable());
    assert!(AuthorityError::Status(429).is_retryable());
    assert!(!AuthorityError::Status(404).is_retryable());
    assert!(!AuthorityError::NotConfigured.is_retryable());
    assert!(!AuthorityError::UnexpectedResponse("html".into()).is_retryable());
}

#[test]
fn push_error_status_codes() {
    assert_eq!(PushError::MalformedRequest("x".into()).status_code(), 400);
    assert_eq!(PushError::MalformedPayload("x".into()).status_code(), 400);
    assert_eq!(
        PushError::SignatureInvalid(SignatureError::Mismatch).status_code(),
        403
    );
    assert_eq!(
        PushError::SignatureInvalid(SignatureError::Timeout).status_code(),
        403
    );
    assert_eq!(
        PushError::SignatureInvalid(SignatureError::KeyUnavailable).status_code(),
        500
    );
    assert_eq!(
        PushError::DomainMismatch {
            licensed: "a".into(),
            current: "b".into()
        }
        .status_code(),
        403
    );
    assert_eq!(
        PushError::StorageFailure(StoreError::Forbidden).status_code(),
        500
    );
}

#[test]
fn push_error_keeps_source() {
    use std::error::Error;
    let err = PushError::SignatureInvalid(SignatureError::Mismatch);
    assert!(err.source().is_some());
}

#[test]
fn manage_error_splits_retryable_authority_errors() {
    let err: ManageError = AuthorityError::Timeout.into();
    assert!(matches!(err, ManageError::AuthorityUnavailable(_)));

    let err: ManageError = AuthorityError::Status(401).into();
    assert!(matches!(err, ManageError::Authority(AuthorityError::Status(401))));
}

#[test]
fn manage_error_from_store_and_signature() {
    let err: ManageError = StoreError::Forbidden.into();
    assert!(matches!(err, ManageError::Store(StoreError::Forbidden)));

    let err: ManageError = SignatureError::Mismatch.into();
    assert!(format!("{err}").contains("signature"));
}
