//! Integration tests for the security-token lifecycle: issuance, reissue
//! invalidation, read-only validation, expiry, and single-use consumption.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::{
    entities::{security_token, SecurityToken, TokenPurpose},
    errors::ServiceError,
};

#[tokio::test]
async fn issued_token_validates_and_consumes_once() {
    let app = TestApp::new().await;

    let issued = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    assert!(app
        .state
        .services
        .tokens
        .validate(&issued.token)
        .await
        .unwrap());

    // Validation is read-only: it can be repeated.
    assert!(app
        .state
        .services
        .tokens
        .validate(&issued.token)
        .await
        .unwrap());

    let consumed = app
        .state
        .services
        .tokens
        .consume(&issued.token)
        .await
        .unwrap();
    assert_eq!(consumed.email, "ana@example.com");
    assert_eq!(consumed.purpose, TokenPurpose::PasswordReset);

    // Consumption and deletion are one step.
    assert!(!app
        .state
        .services
        .tokens
        .validate(&issued.token)
        .await
        .unwrap());
    let err = app
        .state
        .services
        .tokens
        .consume(&issued.token)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::TokenInvalid);
}

#[tokio::test]
async fn reissue_invalidates_the_prior_token() {
    let app = TestApp::new().await;

    let first = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();
    let second = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    assert!(!app
        .state
        .services
        .tokens
        .validate(&first.token)
        .await
        .unwrap());
    assert!(app
        .state
        .services
        .tokens
        .validate(&second.token)
        .await
        .unwrap());

    let err = app
        .state
        .services
        .tokens
        .consume(&first.token)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::TokenInvalid);

    let consumed = app
        .state
        .services
        .tokens
        .consume(&second.token)
        .await
        .unwrap();
    assert_eq!(consumed.email, "ana@example.com");
}

#[tokio::test]
async fn purposes_are_independent() {
    let app = TestApp::new().await;

    let reset = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();
    let verify = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::EmailVerification)
        .await
        .unwrap();

    // A reset reissue must not touch the verification token.
    let reset2 = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    assert!(!app.state.services.tokens.validate(&reset.token).await.unwrap());
    assert!(app.state.services.tokens.validate(&verify.token).await.unwrap());
    assert!(app.state.services.tokens.validate(&reset2.token).await.unwrap());

    let consumed = app
        .state
        .services
        .tokens
        .consume(&verify.token)
        .await
        .unwrap();
    assert_eq!(consumed.purpose, TokenPurpose::EmailVerification);
}

#[tokio::test]
async fn expired_token_is_invalid_and_deleted_on_consumption() {
    let app = TestApp::new().await;

    let issued = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    // Push the expiry into the past.
    SecurityToken::update_many()
        .col_expr(
            security_token::Column::ExpiresAt,
            Expr::value(Utc::now() - Duration::minutes(5)),
        )
        .filter(security_token::Column::Email.eq("ana@example.com"))
        .exec(&*app.state.db)
        .await
        .unwrap();

    // Validation reports invalid but leaves the row alone.
    assert!(!app
        .state
        .services
        .tokens
        .validate(&issued.token)
        .await
        .unwrap());
    let remaining = SecurityToken::find()
        .filter(security_token::Column::Email.eq("ana@example.com"))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);

    // Consumption reports expiry and deletes the row as a side effect.
    let err = app
        .state
        .services
        .tokens
        .consume(&issued.token)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::TokenExpired);

    let remaining = SecurityToken::find()
        .filter(security_token::Column::Email.eq("ana@example.com"))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert!(remaining.is_empty());

    // Gone means invalid, not expired, from here on.
    let err = app
        .state
        .services
        .tokens
        .consume(&issued.token)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::TokenInvalid);
}

#[tokio::test]
async fn concurrent_consumption_has_exactly_one_winner() {
    let app = TestApp::new().await;

    let issued = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::EmailVerification)
        .await
        .unwrap();

    let tokens = app.state.services.tokens.clone();
    let (a, b) = tokio::join!(tokens.consume(&issued.token), tokens.consume(&issued.token));

    let results = [a, b];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let invalid = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::TokenInvalid)))
        .count();

    assert_eq!(successes, 1, "exactly one consumer may win");
    assert_eq!(invalid, 1, "the loser sees TokenInvalid");
}

#[tokio::test]
async fn issuing_sends_the_action_link() {
    let app = TestApp::new().await;

    let issued = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    let sent = app.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ana@example.com");
    assert!(sent[0].subject.contains("Reset"));
    assert!(sent[0].body.contains("/account/reset-password?token="));
    assert!(sent[0].body.contains(&issued.token));
}

#[tokio::test]
async fn issue_rejects_malformed_addresses() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .tokens
        .issue("not-an-email", TokenPurpose::PasswordReset)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Validation(_));

    assert!(app.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn purge_removes_only_expired_tokens() {
    let app = TestApp::new().await;

    let live = app
        .state
        .services
        .tokens
        .issue("ana@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();
    let _stale = app
        .state
        .services
        .tokens
        .issue("luis@example.com", TokenPurpose::PasswordReset)
        .await
        .unwrap();

    SecurityToken::update_many()
        .col_expr(
            security_token::Column::ExpiresAt,
            Expr::value(Utc::now() - Duration::minutes(1)),
        )
        .filter(security_token::Column::Email.eq("luis@example.com"))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let purged = app.state.services.tokens.purge_expired().await.unwrap();
    assert_eq!(purged, 1);

    assert!(app.state.services.tokens.validate(&live.token).await.unwrap());
}
