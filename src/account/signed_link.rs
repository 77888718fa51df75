/// Signed, time-limited email verification links
///
/// A link carries `id`, `hash`, `expires` and `signature`, where `hash` binds
/// the link to the account's email at the time it was minted and
/// `signature` is an HMAC over the other three under the server's app key.
use crate::{
    account::store::AccountStore,
    clock::Clock,
    crypto::{constant_time_eq, identifier_hash, sign, verify_signature},
    db::account::Account,
    error::{IdentityError, IdentityResult},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const VERIFY_ROUTE: &str = "verification.verify";

/// Link parameters as carried in the query string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLink {
    pub id: i64,
    pub hash: String,
    pub expires: i64,
    pub signature: String,
}

impl SignedLink {
    fn payload(id: i64, hash: &str, expires: i64) -> String {
        format!("{}|{}|{}|{}", VERIFY_ROUTE, id, hash, expires)
    }

    /// Render as a verification URL under `base_url`
    pub fn to_url(&self, base_url: &str) -> String {
        format!(
            "{}/auth/verify-email?id={}&hash={}&expires={}&signature={}",
            base_url.trim_end_matches('/'),
            self.id,
            urlencoding::encode(&self.hash),
            self.expires,
            urlencoding::encode(&self.signature),
        )
    }
}

/// Why a link was rejected; only ever logged, callers see `InvalidLink`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRejection {
    BadSignature,
    Expired,
    IdentifierMismatch,
}

impl LinkRejection {
    fn as_str(&self) -> &'static str {
        match self {
            LinkRejection::BadSignature => "bad_signature",
            LinkRejection::Expired => "expired",
            LinkRejection::IdentifierMismatch => "identifier_mismatch",
        }
    }
}

fn reject(account_id: i64, reason: LinkRejection) -> IdentityError {
    tracing::debug!(account_id, reason = reason.as_str(), "Verification link rejected");
    IdentityError::InvalidLink
}

/// Signed link verifier
#[derive(Clone)]
pub struct SignedLinkVerifier {
    accounts: AccountStore,
    clock: Arc<dyn Clock>,
    key: Arc<[u8]>,
    ttl: Duration,
}

impl SignedLinkVerifier {
    pub fn new(accounts: AccountStore, clock: Arc<dyn Clock>, app_key: &str, ttl: Duration) -> Self {
        Self {
            accounts,
            clock,
            key: Arc::from(app_key.as_bytes()),
            ttl,
        }
    }

    /// Mint link parameters; `ttl` defaults to the configured lifetime
    pub fn build_link(&self, account_id: i64, identifier_hash: &str, ttl: Option<Duration>) -> SignedLink {
        let expires = (self.clock.now() + ttl.unwrap_or(self.ttl)).timestamp();
        let signature = sign(&self.key, &SignedLink::payload(account_id, identifier_hash, expires));

        SignedLink {
            id: account_id,
            hash: identifier_hash.to_string(),
            expires,
            signature,
        }
    }

    /// Mint a link bound to the account's current email
    pub fn link_for(&self, account: &Account) -> IdentityResult<SignedLink> {
        let email = account
            .email
            .as_deref()
            .ok_or_else(|| IdentityError::field("email", "Account has no email address"))?;

        Ok(self.build_link(account.id, &identifier_hash(email), None))
    }

    /// Check link parameters and load the account they name
    ///
    /// Signature first, then expiry, then the account lookup, then the
    /// email binding. Unknown and suspended ids are `NotFound`; every other
    /// failure reports `InvalidLink`.
    pub async fn verify(
        &self,
        account_id: i64,
        hash: &str,
        expires: i64,
        signature: &str,
    ) -> IdentityResult<Account> {
        let payload = SignedLink::payload(account_id, hash, expires);
        if !verify_signature(&self.key, &payload, signature) {
            return Err(reject(account_id, LinkRejection::BadSignature));
        }

        if self.clock.now().timestamp() > expires {
            return Err(reject(account_id, LinkRejection::Expired));
        }

        let account = self
            .accounts
            .get_active(account_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("Account {} not found", account_id)))?;

        let bound = match account.email.as_deref() {
            Some(email) => constant_time_eq(identifier_hash(email).as_bytes(), hash.as_bytes()),
            None => false,
        };
        if !bound {
            return Err(reject(account_id, LinkRejection::IdentifierMismatch));
        }

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::{NewAccount, ProfileChanges};
    use crate::admin::roles::Role;
    use crate::clock::testing::FixedClock;
    use crate::db::connect_in_memory;
    use sqlx::SqlitePool;
    use std::collections::BTreeSet;

    const APP_KEY: &str = "test-app-key-for-testing-only-0123456789";

    async fn setup_with_pool() -> (SignedLinkVerifier, AccountStore, Arc<FixedClock>, SqlitePool) {
        let pool = connect_in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::default());
        let accounts = AccountStore::new(pool.clone(), clock.clone());
        let verifier =
            SignedLinkVerifier::new(accounts.clone(), clock.clone(), APP_KEY, Duration::minutes(60));
        (verifier, accounts, clock, pool)
    }

    async fn setup() -> (SignedLinkVerifier, AccountStore, Arc<FixedClock>) {
        let (verifier, accounts, clock, _) = setup_with_pool().await;
        (verifier, accounts, clock)
    }

    async fn create_account(accounts: &AccountStore, username: &str) -> Account {
        accounts
            .create(NewAccount {
                username: username.to_string(),
                name: username.to_string(),
                email: Some(format!("{}@example.com", username)),
                password_hash: "hash".to_string(),
                role: Role::User,
                permissions: BTreeSet::new(),
                email_verified: false,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_link_verifies() {
        let (verifier, accounts, _) = setup().await;
        let account = create_account(&accounts, "bob").await;

        let link = verifier.link_for(&account).unwrap();
        let verified = verifier
            .verify(link.id, &link.hash, link.expires, &link.signature)
            .await
            .unwrap();
        assert_eq!(verified.id, account.id);
    }

    #[tokio::test]
    async fn test_tampered_parameters_rejected() {
        let (verifier, accounts, _) = setup().await;
        let account = create_account(&accounts, "bob").await;
        let link = verifier.link_for(&account).unwrap();

        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires + 3600, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
        assert!(matches!(
            verifier
                .verify(link.id, "deadbeef", link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, "not-a-signature")
                .await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_changed_id_rejected() {
        let (verifier, accounts, _) = setup().await;
        let bob = create_account(&accounts, "bob").await;
        let carol = create_account(&accounts, "carol").await;
        let link = verifier.link_for(&bob).unwrap();

        // Signature covers the id, so pointing bob's link at carol fails
        assert!(matches!(
            verifier
                .verify(carol.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
        assert!(matches!(
            verifier
                .verify(4242, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_suspended_account_is_not_found() {
        let (verifier, accounts, _, pool) = setup_with_pool().await;
        let account = create_account(&accounts, "bob").await;
        let link = verifier.link_for(&account).unwrap();

        sqlx::query("UPDATE accounts SET deleted_at = ?1 WHERE id = ?2")
            .bind("2025-03-01T12:00:00Z")
            .bind(account.id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::NotFound(_))
        ));
        assert!(accounts.get(account.id).await.unwrap().unwrap().email_verified_at.is_none());
    }

    #[tokio::test]
    async fn test_link_cannot_be_replayed_on_other_account() {
        let (verifier, accounts, _) = setup().await;
        let alice = create_account(&accounts, "alice").await;
        let bob = create_account(&accounts, "bob").await;

        // Correctly signed for bob's id, but bound to alice's email
        let link = verifier.build_link(bob.id, &identifier_hash("alice@example.com"), None);
        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));

        let alice_link = verifier.link_for(&alice).unwrap();
        assert!(verifier
            .verify(alice_link.id, &alice_link.hash, alice_link.expires, &alice_link.signature)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_link_rejected() {
        let (verifier, accounts, clock) = setup().await;
        let account = create_account(&accounts, "bob").await;
        let link = verifier.link_for(&account).unwrap();

        clock.advance(Duration::minutes(61));
        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let (verifier, _, _) = setup().await;
        let link = verifier.build_link(4242, &identifier_hash("ghost@example.com"), None);

        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_email_change_invalidates_link() {
        let (verifier, accounts, _) = setup().await;
        let account = create_account(&accounts, "bob").await;
        let link = verifier.link_for(&account).unwrap();

        accounts
            .update_profile(
                account.id,
                ProfileChanges {
                    name: None,
                    email: Some("robert@example.com".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            verifier
                .verify(link.id, &link.hash, link.expires, &link.signature)
                .await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[test]
    fn test_to_url_encodes_parameters() {
        let link = SignedLink {
            id: 7,
            hash: "abc".to_string(),
            expires: 1_700_000_000,
            signature: "ff00".to_string(),
        };
        assert_eq!(
            link.to_url("https://gate.example.com/"),
            "https://gate.example.com/auth/verify-email?id=7&hash=abc&expires=1700000000&signature=ff00"
        );
    }
}
