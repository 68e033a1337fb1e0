use crate::{
    config::AppConfig,
    entities::{security_token, SecurityToken, TokenPurpose},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::NotificationService,
};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TOKEN_LEN: usize = 48;

/// Issues, validates, and consumes single-use expiring tokens for password
/// reset and email verification links.
///
/// Issuing replaces any outstanding token for the same address and purpose,
/// so at most one valid link exists per identity. Consumption deletes the
/// row in the same conditional statement that checks it, which keeps two
/// racing consumers from both succeeding.
#[derive(Clone)]
pub struct TokenService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn NotificationService>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
}

impl TokenService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn NotificationService>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            notifier,
            config,
            event_sender,
        }
    }

    /// Issues a fresh token for the address, invalidating any prior token
    /// of the same purpose, and emails the action link. The raw token is
    /// returned exactly once; only its hash is stored.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        email: &str,
        purpose: TokenPurpose,
    ) -> Result<IssuedToken, ServiceError> {
        if !validator::validate_email(email) {
            return Err(ServiceError::Validation(format!(
                "invalid email address: {email}"
            )));
        }

        let token = generate_token();
        let token_hash = hash_token(&token);
        let expires_at = Utc::now() + self.ttl(purpose);

        let txn = self.db.begin().await?;

        SecurityToken::delete_many()
            .filter(security_token::Column::Email.eq(email))
            .filter(security_token::Column::Purpose.eq(purpose))
            .exec(&txn)
            .await?;

        let model = security_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            token_hash: Set(token_hash),
            purpose: Set(purpose),
            expires_at: Set(expires_at),
            created_at: Set(Utc::now()),
        };
        model.insert(&txn).await?;

        txn.commit().await?;

        self.send_link(email, purpose, &token).await;
        self.event_sender
            .send_or_log(Event::TokenIssued { purpose })
            .await;

        info!(?purpose, "issued security token");
        Ok(IssuedToken { token, expires_at })
    }

    /// Read-only validity check: the token exists and has not expired.
    /// Never consumes or deletes.
    pub async fn validate(&self, token: &str) -> Result<bool, ServiceError> {
        let found = SecurityToken::find()
            .filter(security_token::Column::TokenHash.eq(hash_token(token)))
            .one(&*self.db)
            .await?;

        Ok(found.is_some_and(|t| t.expires_at > Utc::now()))
    }

    /// Atomically checks validity and deletes the token, returning the
    /// associated email. Under concurrent consumption exactly one caller
    /// gets the email; the rest see `TokenInvalid`. Expired tokens found
    /// here are deleted as a side effect and reported as `TokenExpired`.
    #[instrument(skip_all)]
    pub async fn consume(&self, token: &str) -> Result<ConsumedToken, ServiceError> {
        let found = SecurityToken::find()
            .filter(security_token::Column::TokenHash.eq(hash_token(token)))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::TokenInvalid)?;

        if found.expires_at <= Utc::now() {
            // Lazy cleanup: expiry detection deletes the row.
            SecurityToken::delete_by_id(found.id).exec(&*self.db).await?;
            return Err(ServiceError::TokenExpired);
        }

        let deleted = SecurityToken::delete_by_id(found.id)
            .exec(&*self.db)
            .await?;
        if deleted.rows_affected == 0 {
            // A concurrent consumer claimed the token first.
            return Err(ServiceError::TokenInvalid);
        }

        self.event_sender
            .send_or_log(Event::TokenConsumed {
                purpose: found.purpose,
            })
            .await;

        info!(purpose = ?found.purpose, "consumed security token");
        Ok(ConsumedToken {
            email: found.email,
            purpose: found.purpose,
        })
    }

    /// Deletes every expired token. Lazy cleanup during consumption keeps
    /// the table correct without this; a periodic sweep keeps it small.
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let result = SecurityToken::delete_many()
            .filter(security_token::Column::ExpiresAt.lte(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::PasswordReset => {
                Duration::minutes(self.config.password_reset_ttl_minutes)
            }
            TokenPurpose::EmailVerification => {
                Duration::hours(self.config.email_verification_ttl_hours)
            }
        }
    }

    async fn send_link(&self, email: &str, purpose: TokenPurpose, token: &str) {
        let base = self.config.public_base_url.trim_end_matches('/');
        let (subject, body) = match purpose {
            TokenPurpose::PasswordReset => (
                "Reset your password",
                format!(
                    "Follow this link to choose a new password:\n{base}/account/reset-password?token={token}\n\nThe link can be used once and expires shortly."
                ),
            ),
            TokenPurpose::EmailVerification => (
                "Verify your email address",
                format!(
                    "Follow this link to verify your email address:\n{base}/account/verify-email?token={token}\n\nThe link can be used once and expires shortly."
                ),
            ),
        };

        // Fire-and-forget: a failed delivery never rolls back issuance.
        if let Err(e) = self.notifier.send(email, subject, &body).await {
            warn!(%email, ?purpose, "token email delivery failed: {e}");
        }
    }
}

/// Raw token handed back to the caller on issuance
#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of consuming a token
#[derive(Debug)]
pub struct ConsumedToken {
    pub email: String,
    pub purpose: TokenPurpose,
}

fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn hashing_is_deterministic_and_collision_free_for_distinct_input() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        // SHA-256 hex digest
        assert_eq!(hash_token("abc").len(), 64);
    }
}
