//! Admin gate and session management.
//!
//! The admin secret is hashed with bcrypt and stored in `local_settings` on
//! first init; the plaintext never touches the database or the logs. A
//! successful login issues a short-lived uuid session token which gates the
//! sensitive operations (ledger confirm, bulk clear, status transitions,
//! export). There is no lockout or throttling on failed attempts.

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::StoreError;

const SECRET_CATEGORY: &str = "security";
const SECRET_KEY: &str = "admin_secret_hash";

/// Session lifetime.
const SESSION_TTL_MINUTES: i64 = 30;

/// In-memory session table. Tokens do not survive a restart.
pub struct AuthState {
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Verify the admin secret and issue a session token.
    pub fn login(&self, db: &DbState, secret: &str) -> Result<String, StoreError> {
        let stored_hash = {
            let conn = db
                .conn
                .lock()
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            db::get_setting(&conn, SECRET_CATEGORY, SECRET_KEY)
        }
        .ok_or(StoreError::Unauthorized)?;

        let ok = verify(secret, &stored_hash).unwrap_or(false);
        if !ok {
            warn!("Admin login rejected");
            return Err(StoreError::Unauthorized);
        }

        let token = Uuid::new_v4().to_string();
        let expires = Utc::now() + Duration::minutes(SESSION_TTL_MINUTES);
        self.sessions
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .insert(token.clone(), expires);
        info!("Admin session issued");
        Ok(token)
    }

    /// Check a session token. Expired tokens are removed and rejected.
    pub fn validate(&self, token: &str) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        match sessions.get(token) {
            Some(expires) if *expires > Utc::now() => Ok(()),
            Some(_) => {
                sessions.remove(token);
                Err(StoreError::Unauthorized)
            }
            None => Err(StoreError::Unauthorized),
        }
    }

    pub fn logout(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token);
        }
    }

    #[cfg(test)]
    fn force_expire(&self, token: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(expires) = sessions.get_mut(token) {
            *expires = Utc::now() - Duration::minutes(1);
        }
    }
}

/// Hash the configured admin secret into `local_settings` if no hash exists
/// yet. An already-seeded hash is left alone, so rotating the secret means
/// clearing the stored hash first.
pub fn seed_admin_secret(db: &DbState, secret: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if db::get_setting(&conn, SECRET_CATEGORY, SECRET_KEY).is_some() {
        return Ok(());
    }
    let hashed = hash(secret, DEFAULT_COST).map_err(|e| format!("bcrypt: {e}"))?;
    db::set_setting(&conn, SECRET_CATEGORY, SECRET_KEY, &hashed)?;
    info!("Admin secret seeded");
    Ok(())
}
