mod common;

use chrono::Duration as ChronoDuration;
use common::*;
use hearth_license::{
    AuthorityClient, AuthorityEndpoints, AuthorityError, LicenseData, LicenseManager,
    LicenseRecord, LicenseStatusView, LicenseStore, ManageError, SignatureError, TrustResolver,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(uri: &str, dir: &Path) -> (LicenseManager, Arc<LicenseStore>) {
    let store = temp_store(dir);
    let authority =
        AuthorityClient::new(uri, AuthorityEndpoints::default(), Duration::from_secs(2)).unwrap();
    let resolver = TrustResolver::new(Some(authority), Some(authority_public()));
    (
        LicenseManager::new(Arc::clone(&store), Arc::new(resolver), HOST),
        store,
    )
}

async fn answer_verify(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/verify"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn signed_verdict(key: &rsa::RsaPrivateKey) -> serde_json::Value {
    let data = json!({ "valid": true, "expires_at": "2027-01-01T00:00:00Z", "seats": 5 });
    let signature = sign(key, data.to_string().as_bytes());
    json!({ "data": data, "signature": signature })
}

// ── Status ──────────────────────────────────────────────────────

#[test]
fn status_reports_missing_installed_and_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager("http://127.0.0.1:1", dir.path());
    assert_eq!(mgr.status(), LicenseStatusView::Missing);
    assert!(matches!(mgr.check_local(), Err(ManageError::NotInstalled)));

    let record = valid_record(HOST, None);
    store.save(&record).unwrap();
    assert_eq!(mgr.status(), LicenseStatusView::Installed(record));
    mgr.check_local().unwrap();

    std::fs::write(store.path(), "junk").unwrap();
    assert!(matches!(mgr.status(), LicenseStatusView::Unreadable(_)));
    assert!(matches!(mgr.check_local(), Err(ManageError::Store(_))));
}

// ── Install ─────────────────────────────────────────────────────

#[tokio::test]
async fn install_with_attested_verdict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/verify"))
        .and(body_json(json!({ "license_key": "HEARTH-9", "domain": HOST })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": true, "message": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    let record = mgr.install("  HEARTH-9  ", now()).await.unwrap();

    assert_eq!(record.license_key, "HEARTH-9");
    assert_eq!(record.domain, HOST);
    assert!(record.data.valid);
    assert!(record.data.issued_by_manual_upload);
    assert_eq!(record.data.verified_at, Some(now()));
    assert_eq!(record.authority.as_deref(), Some(server.uri().as_str()));
    assert_eq!(store.load().unwrap(), record);
}

#[tokio::test]
async fn install_with_signed_verdict() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(200).set_body_json(signed_verdict(&authority_private()))).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    let record = mgr.install("HEARTH-9", now()).await.unwrap();
    assert!(record.data.valid);
    assert_eq!(record.data.extra.get("seats"), Some(&json!(5)));
}

#[tokio::test]
async fn install_rejects_badly_signed_verdict() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(200).set_body_json(signed_verdict(&rogue_private()))).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    let err = mgr.install("HEARTH-9", now()).await.unwrap_err();
    assert!(matches!(err, ManageError::Signature(SignatureError::Mismatch)));
    assert!(!store.exists());
}

#[tokio::test]
async fn install_pending_verdict_stores_pending_record() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(200).set_body_json(json!({ "status": "pending" }))).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    let record = mgr.install("HEARTH-9", now()).await.unwrap();
    assert!(record.data.pending);
    assert!(!record.data.valid);
}

#[tokio::test]
async fn install_reads_expires_alias() {
    let server = MockServer::start().await;
    answer_verify(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "valid": true, "expires": "2027-01-01T00:00:00Z" })),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    let record = mgr.install("HEARTH-9", now()).await.unwrap();
    assert_eq!(record.data.expires_at, Some("2027-01-01T00:00:00Z".parse().unwrap()));
}

#[tokio::test]
async fn install_rejects_unparseable_expiry() {
    for body in [
        json!({ "valid": true, "expires_at": "2020-01-01" }),
        json!({ "valid": true, "expires": "next year" }),
        json!({ "valid": true, "expires_at": 1767225600 }),
    ] {
        let server = MockServer::start().await;
        answer_verify(&server, ResponseTemplate::new(200).set_body_json(body)).await;

        let dir = tempfile::tempdir().unwrap();
        let (mgr, store) = manager(&server.uri(), dir.path());
        let err = mgr.install("HEARTH-9", now()).await.unwrap_err();
        assert!(matches!(
            err,
            ManageError::Authority(AuthorityError::UnexpectedResponse(_))
        ));
        assert!(!store.exists());
    }
}

#[tokio::test]
async fn install_refuses_to_replace_valid_license() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": false })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    let original = valid_record(HOST, None);
    store.save(&original).unwrap();

    assert!(matches!(
        mgr.install("BOGUS", now()).await,
        Err(ManageError::AlreadyLicensed)
    ));
    assert_eq!(store.load().unwrap(), original);
    assert!(matches!(
        mgr.remove(),
        Err(ManageError::Store(hearth_license::StoreError::Forbidden))
    ));
    assert!(store.exists());
}

#[tokio::test]
async fn install_replaces_inactive_license() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(200).set_body_json(json!({ "valid": true }))).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    store
        .save(&LicenseRecord::new("OLD", HOST, LicenseData::default(), now()))
        .unwrap();

    let record = mgr.install("HEARTH-9", now()).await.unwrap();
    assert_eq!(record.license_key, "HEARTH-9");
    assert_eq!(store.load().unwrap().license_key, "HEARTH-9");
}

#[tokio::test]
async fn install_empty_key_is_rejected_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    assert!(matches!(
        mgr.install("   ", now()).await,
        Err(ManageError::EmptyKey)
    ));
}

#[tokio::test]
async fn unreachable_authority_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager("http://127.0.0.1:1", dir.path());
    let err = mgr.install("HEARTH-9", now()).await.unwrap_err();
    assert!(matches!(err, ManageError::AuthorityUnavailable(_)));
    assert!(err.to_string().contains("retry"));
    assert!(!store.exists());
}

#[tokio::test]
async fn authority_server_error_is_retryable() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(502)).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    assert!(matches!(
        mgr.install("HEARTH-9", now()).await,
        Err(ManageError::AuthorityUnavailable(_))
    ));
}

#[tokio::test]
async fn authority_rejection_is_not_retryable() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(404)).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager(&server.uri(), dir.path());
    assert!(matches!(
        mgr.install("HEARTH-9", now()).await,
        Err(ManageError::Authority(AuthorityError::Status(404)))
    ));
}

#[tokio::test]
async fn install_without_authority_is_not_configured() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(dir.path());
    let mgr = LicenseManager::new(store, Arc::new(TrustResolver::new(None, None)), HOST);
    assert!(matches!(
        mgr.install("HEARTH-9", now()).await,
        Err(ManageError::Authority(AuthorityError::NotConfigured))
    ));
}

// ── Re-verify and remove ────────────────────────────────────────

#[tokio::test]
async fn reverify_updates_record_in_place() {
    let server = MockServer::start().await;
    answer_verify(&server, ResponseTemplate::new(200).set_body_json(json!({ "valid": false, "message": "revoked" }))).await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    let mut original = valid_record(HOST, None);
    original.data.issued_by_manual_upload = true;
    store.save(&original).unwrap();

    let later = now() + ChronoDuration::days(1);
    let record = mgr.reverify(later).await.unwrap();
    assert_eq!(record.license_key, original.license_key);
    assert!(!record.data.valid);
    assert_eq!(record.data.message.as_deref(), Some("revoked"));
    assert!(record.data.issued_by_manual_upload);
    assert_eq!(record.fetched_at, later);
    assert_eq!(record.data.verified_at, Some(later));
    assert_eq!(store.load().unwrap(), record);
}

#[tokio::test]
async fn reverify_does_not_overwrite_concurrent_push() {
    let server = MockServer::start().await;
    answer_verify(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "valid": false, "message": "revoked" }))
            .set_delay(Duration::from_millis(800)),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager(&server.uri(), dir.path());
    store
        .save(&LicenseRecord::new("OLD-KEY", HOST, LicenseData::default(), now()))
        .unwrap();

    let pushed = LicenseRecord::new("NEW-PUSHED-KEY", HOST, LicenseData::active(None), now());
    let (reverified, saved) = tokio::join!(mgr.reverify(now()), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        store.save(&pushed)
    });

    saved.unwrap();
    assert!(matches!(reverified, Err(ManageError::Conflict)));
    assert_eq!(store.load().unwrap(), pushed);
}

#[tokio::test]
async fn reverify_without_record_is_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, _) = manager("http://127.0.0.1:1", dir.path());
    assert!(matches!(
        mgr.reverify(now()).await,
        Err(ManageError::NotInstalled)
    ));
}

#[test]
fn remove_refuses_valid_license() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager("http://127.0.0.1:1", dir.path());
    store.save(&valid_record(HOST, None)).unwrap();
    assert!(matches!(
        mgr.remove(),
        Err(ManageError::Store(hearth_license::StoreError::Forbidden))
    ));
    assert!(store.exists());
}

#[test]
fn remove_inactive_license() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, store) = manager("http://127.0.0.1:1", dir.path());
    store
        .save(&LicenseRecord::new("K", HOST, LicenseData::default(), now()))
        .unwrap();
    mgr.remove().unwrap();
    assert_eq!(mgr.status(), LicenseStatusView::Missing);
    assert!(matches!(mgr.remove(), Err(ManageError::NotInstalled)));
}
