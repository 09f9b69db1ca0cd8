//! End-to-end credential lifecycle against the in-memory store.
//!
//! Covers creation, approval, revocation and the quota gate as a caller sees them,
//! without going through HTTP.

use std::sync::Arc;

use credgate::errors::{AppError, Rejection};
use credgate::models::credential::{CreateCredentialRequest, CredentialStatus, IssueOutcome};
use credgate::policy::{PolicyEngine, PolicyRules};
use credgate::service::CredentialService;
use credgate::store::MemoryStore;
use credgate::vault::SecretCipher;
use tokio_test::{assert_err, assert_ok};

fn service() -> CredentialService {
    CredentialService::new(
        Arc::new(MemoryStore::new()),
        PolicyEngine::new(PolicyRules::default()),
        Arc::new(SecretCipher::ephemeral()),
    )
}

fn request(principal: &str, scopes: &[&str]) -> CreateCredentialRequest {
    CreateCredentialRequest {
        principal: Some(principal.to_string()),
        scopes: Some(scopes.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    }
}

fn rejection(err: AppError) -> Rejection {
    err.rejection()
        .unwrap_or_else(|| panic!("expected a rejection, got {:?}", err))
}

// ═══════════════════════════════════════════════════════════════════
//  Direct issuance
// ═══════════════════════════════════════════════════════════════════

/// Read-only scopes are issued immediately with default length and ttl.
#[tokio::test]
async fn test_direct_issue_with_defaults() {
    let svc = service();
    let outcome = assert_ok!(svc.create_credential(request("svc-a", &["read:x"])).await);

    let IssueOutcome::Issued {
        id,
        secret,
        expires_at,
    } = outcome
    else {
        panic!("expected issued");
    };
    assert_eq!(secret.len(), 40);

    let summary = svc.get(id).await.unwrap();
    assert_eq!(summary.status, CredentialStatus::Active);
    assert_eq!(summary.kind, "api_key");
    assert_eq!(summary.expires_at, expires_at);
    assert_eq!((summary.expires_at - summary.created_at).num_seconds(), 3600);
}

/// Limits are checked in a fixed order and only the first failure is reported.
#[tokio::test]
async fn test_validation_order() {
    let svc = service();

    let req = CreateCredentialRequest {
        kind: Some("oauth".into()),
        length: Some(8),
        ttl_seconds: Some(999_999),
        ..request("svc-a", &[])
    };
    assert_eq!(
        rejection(svc.create_credential(req).await.unwrap_err()),
        Rejection::TypeNotAllowed
    );

    let req = CreateCredentialRequest {
        length: Some(8),
        ttl_seconds: Some(999_999),
        ..request("svc-a", &[])
    };
    assert_eq!(
        rejection(svc.create_credential(req).await.unwrap_err()),
        Rejection::LengthTooShort
    );

    let req = CreateCredentialRequest {
        ttl_seconds: Some(86_401),
        ..request("svc-a", &[])
    };
    assert_eq!(
        rejection(svc.create_credential(req).await.unwrap_err()),
        Rejection::TtlTooLong
    );

    // boundaries are inclusive
    let req = CreateCredentialRequest {
        length: Some(32),
        ttl_seconds: Some(86_400),
        ..request("svc-a", &[])
    };
    assert_ok!(svc.create_credential(req).await);
}

// ═══════════════════════════════════════════════════════════════════
//  Approval flow
// ═══════════════════════════════════════════════════════════════════

/// Prefix rule reason code carries the rule as declared.
#[tokio::test]
async fn test_write_scope_goes_pending_then_approved() {
    let svc = service();
    let outcome = svc
        .create_credential(request("svc-a", &["read:x", "write:db"]))
        .await
        .unwrap();

    let IssueOutcome::Pending { id, reason } = outcome else {
        panic!("expected pending");
    };
    assert_eq!(reason, "needs_approval_prefix_write:*");
    assert_eq!(svc.get(id).await.unwrap().status, CredentialStatus::Pending);

    let approved = svc.approve(id).await.unwrap();
    let IssueOutcome::Issued { id: issued_id, secret, .. } = approved else {
        panic!("expected issued");
    };
    assert_eq!(issued_id, id);
    assert_eq!(secret.len(), 40);
    assert_eq!(svc.get(id).await.unwrap().status, CredentialStatus::Active);
}

/// "admin" must match exactly; "administrator" is not sensitive.
#[tokio::test]
async fn test_exact_rule_does_not_match_longer_scope() {
    let svc = service();
    let outcome = svc
        .create_credential(request("svc-a", &["administrator"]))
        .await
        .unwrap();
    assert!(matches!(outcome, IssueOutcome::Issued { .. }));

    let outcome = svc.create_credential(request("svc-a", &["admin"])).await.unwrap();
    match outcome {
        IssueOutcome::Pending { reason, .. } => assert_eq!(reason, "needs_approval_exact_admin"),
        other => panic!("expected pending, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_approval_is_not_pending() {
    let svc = service();
    let id = svc
        .create_credential(request("svc-a", &["admin"]))
        .await
        .unwrap()
        .id();

    assert_ok!(svc.approve(id).await);
    let err = assert_err!(svc.approve(id).await);
    assert_eq!(rejection(err), Rejection::NotPending);
}

#[tokio::test]
async fn test_approving_active_or_revoked_fails() {
    let svc = service();
    let active = svc.create_credential(request("svc-a", &[])).await.unwrap().id();
    assert_eq!(
        rejection(svc.approve(active).await.unwrap_err()),
        Rejection::NotPending
    );

    let pending = svc
        .create_credential(request("svc-a", &["admin"]))
        .await
        .unwrap()
        .id();
    svc.revoke(pending).await.unwrap();
    assert_eq!(
        rejection(svc.approve(pending).await.unwrap_err()),
        Rejection::NotPending
    );
    assert_eq!(svc.get(pending).await.unwrap().status, CredentialStatus::Revoked);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let svc = service();
    let id = uuid::Uuid::new_v4();
    assert_eq!(rejection(svc.approve(id).await.unwrap_err()), Rejection::NotFound);
    assert_eq!(rejection(svc.revoke(id).await.unwrap_err()), Rejection::NotFound);
    assert_eq!(rejection(svc.get(id).await.unwrap_err()), Rejection::NotFound);
}

// ═══════════════════════════════════════════════════════════════════
//  Quota
// ═══════════════════════════════════════════════════════════════════

/// Sixth active credential is refused until one is revoked. Other principals are unaffected.
#[tokio::test]
async fn test_quota_per_principal() {
    let svc = service();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(svc.create_credential(request("svc-a", &[])).await.unwrap().id());
    }

    let err = svc.create_credential(request("svc-a", &[])).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::QuotaExceeded);
    assert_ok!(svc.create_credential(request("svc-b", &[])).await);

    // revoked records stay in the listing but free a slot
    svc.revoke(ids[2]).await.unwrap();
    assert_ok!(svc.create_credential(request("svc-a", &[])).await);
    assert_eq!(svc.list().await.unwrap().len(), 7);
}

/// Pending requests do not count toward the quota but are gated by it.
#[tokio::test]
async fn test_pending_requests_do_not_consume_quota() {
    let svc = service();
    for _ in 0..4 {
        svc.create_credential(request("svc-a", &["admin"])).await.unwrap();
    }
    for _ in 0..5 {
        assert_ok!(svc.create_credential(request("svc-a", &[])).await);
    }

    let err = svc
        .create_credential(request("svc-a", &["admin"]))
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::QuotaExceeded);
}

// ═══════════════════════════════════════════════════════════════════
//  Listing and secrecy
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_listing_never_exposes_secrets() {
    let svc = service();
    let outcome = svc.create_credential(request("svc-a", &[])).await.unwrap();
    let IssueOutcome::Issued { secret, .. } = outcome else {
        panic!("expected issued");
    };
    svc.create_credential(request("svc-b", &["admin"])).await.unwrap();

    let listing = svc.list().await.unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].principal, "svc-a");

    let json = serde_json::to_string(&listing).unwrap();
    assert!(!json.contains(secret.expose()));
    assert!(!json.contains("secret"));
}

#[tokio::test]
async fn test_revoked_secret_still_decrypts_for_debugging() {
    let svc = service();
    let outcome = svc.create_credential(request("svc-a", &[])).await.unwrap();
    let IssueOutcome::Issued { id, secret, .. } = outcome else {
        panic!("expected issued");
    };
    svc.revoke(id).await.unwrap();
    assert_eq!(svc.reveal_secret(id).await.unwrap().expose(), secret.expose());
}
