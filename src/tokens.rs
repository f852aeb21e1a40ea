//! Vendor access-token lifecycle.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::Credentials;
use crate::storage::CredentialStore;
use crate::vendor::VendorApi;

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// `true` once `now` is within [`EXPIRY_BUFFER_SECS`] of expiry.
pub fn is_expired(credentials: &Credentials, now: DateTime<Utc>) -> bool {
    now >= credentials.expires_at - Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// Exchange the refresh token, persist the new access token and expiry, and
/// return the new access token. `credentials` is updated in place.
///
/// Vendor failures propagate unchanged; nothing is written in that case.
pub async fn refresh<V, S>(
    credentials: &mut Credentials,
    vendor: &V,
    store: &S,
    now: DateTime<Utc>,
) -> Result<String>
where
    V: VendorApi,
    S: CredentialStore,
{
    let grant = vendor.refresh_token(&credentials.refresh_token).await?;
    let expires_at = grant.expires_at(now)?;

    let stored = store
        .update_access_token(
            &credentials.user_id,
            &grant.access_token,
            grant.refresh_token.as_deref(),
            expires_at,
        )
        .await?;
    if !stored {
        log::warn!(
            "Refreshed token for user {} but no stored credentials were updated",
            credentials.user_id
        );
    }

    credentials.access_token = grant.access_token;
    credentials.expires_at = expires_at;
    if let Some(rotated) = grant.refresh_token {
        credentials.refresh_token = rotated;
    }
    log::info!("Token refreshed for user: {}", credentials.user_id);
    Ok(credentials.access_token.clone())
}

/// An access token that is valid for at least the expiry buffer, refreshing
/// first when needed.
pub async fn usable_access_token<V, S>(
    credentials: &mut Credentials,
    vendor: &V,
    store: &S,
    now: DateTime<Utc>,
) -> Result<String>
where
    V: VendorApi,
    S: CredentialStore,
{
    if is_expired(credentials, now) {
        log::info!("Token expired for user: {}, refreshing", credentials.user_id);
        refresh(credentials, vendor, store, now).await
    } else {
        Ok(credentials.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{repository, Database};
    use crate::vendor::{FetchWindow, TokenGrant};
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeVendor {
        rotate: bool,
        fail: bool,
        expires_in: i64,
        calls: AtomicUsize,
    }

    impl FakeVendor {
        fn new(rotate: bool, fail: bool) -> Self {
            Self {
                rotate,
                fail,
                expires_in: 7200,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl VendorApi for FakeVendor {
        async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Other("token endpoint returned 401".into()));
            }
            Ok(TokenGrant {
                access_token: format!("new-for-{refresh_token}"),
                expires_in: self.expires_in,
                refresh_token: self.rotate.then(|| "rotated".to_string()),
            })
        }

        async fn fetch_readings(&self, _: &str, _: &FetchWindow) -> Result<Vec<Value>> {
            Ok(vec![])
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 14, 10, 0, 0).unwrap()
    }

    fn creds(expires_at: DateTime<Utc>) -> Credentials {
        Credentials {
            user_id: "u1".into(),
            access_token: "old".into(),
            refresh_token: "r1".into(),
            expires_at,
        }
    }

    async fn db_with(c: &Credentials) -> Database {
        let db = Database::open_memory().await.unwrap();
        let c = c.clone();
        db.writer()
            .call(move |conn| repository::upsert_credentials(conn, &c))
            .await
            .unwrap();
        db
    }

    #[test]
    fn test_is_expired_boundary() {
        let expires_at = now() + Duration::seconds(EXPIRY_BUFFER_SECS);
        let c = creds(expires_at);
        assert!(!is_expired(&c, now() - Duration::seconds(1)));
        assert!(is_expired(&c, now()));
        assert!(is_expired(&c, now() + Duration::seconds(1)));
        assert!(is_expired(&c, expires_at + Duration::hours(1)));
    }

    #[test]
    fn test_is_expired_is_monotonic() {
        let c = creds(now());
        let mut seen_expired = false;
        for s in -900..=900 {
            let expired = is_expired(&c, now() + Duration::seconds(s));
            assert!(!(seen_expired && !expired), "flipped back at {s}s");
            seen_expired |= expired;
        }
        assert!(seen_expired);
    }

    #[tokio::test]
    async fn test_refresh_persists_token_and_expiry() {
        let mut c = creds(now());
        let db = db_with(&c).await;
        let vendor = FakeVendor::new(false, false);

        let token = refresh(&mut c, &vendor, &db, now()).await.unwrap();
        assert_eq!(token, "new-for-r1");
        assert_eq!(c.expires_at, now() + Duration::hours(2));

        let stored = db.get_credentials("u1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new-for-r1");
        assert_eq!(stored.refresh_token, "r1");
        assert_eq!(stored.expires_at, now() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let mut c = creds(now());
        let db = db_with(&c).await;

        refresh(&mut c, &FakeVendor::new(true, false), &db, now())
            .await
            .unwrap();
        assert_eq!(c.refresh_token, "rotated");
        let stored = db.get_credentials("u1").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, "rotated");
    }

    #[tokio::test]
    async fn test_vendor_failure_writes_nothing() {
        let mut c = creds(now());
        let db = db_with(&c).await;

        let err = refresh(&mut c, &FakeVendor::new(false, true), &db, now()).await;
        assert!(err.is_err());
        let stored = db.get_credentials("u1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "old");
        assert_eq!(c.access_token, "old");
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_without_writing() {
        let mut c = creds(now());
        let db = db_with(&c).await;
        let vendor = FakeVendor {
            expires_in: i64::MAX,
            ..FakeVendor::new(false, false)
        };

        let err = refresh(&mut c, &vendor, &db, now()).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        let stored = db.get_credentials("u1").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "old");
        assert_eq!(c.access_token, "old");
    }

    #[tokio::test]
    async fn test_usable_token_skips_refresh_when_fresh() {
        let mut c = creds(now() + Duration::hours(1));
        let db = db_with(&c).await;
        let vendor = FakeVendor::new(false, false);

        let token = usable_access_token(&mut c, &vendor, &db, now()).await.unwrap();
        assert_eq!(token, "old");
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);

        let mut stale = creds(now() + Duration::seconds(60));
        let token = usable_access_token(&mut stale, &vendor, &db, now()).await.unwrap();
        assert_eq!(token, "new-for-r1");
        assert_eq!(vendor.calls.load(Ordering::SeqCst), 1);
    }
}
