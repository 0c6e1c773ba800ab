use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials submitted to the GeoNature login endpoint.
///
/// `Debug` never prints the password.
#[derive(Clone, Serialize)]
pub struct AuthLogin {
    pub login: String,
    pub password: String,
    #[serde(rename = "id_application")]
    pub application_id: i64,
}

impl AuthLogin {
    pub fn new(login: impl Into<String>, password: impl Into<String>, application_id: i64) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            application_id,
        }
    }
}

impl fmt::Debug for AuthLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthLogin")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .finish()
    }
}

/// Authenticated GeoNature user, as returned by `/api/auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(rename = "id_role")]
    pub id: i64,
    #[serde(rename = "identifiant")]
    pub login: String,
    #[serde(rename = "nom_role", default)]
    pub last_name: Option<String>,
    #[serde(rename = "prenom_role", default)]
    pub first_name: Option<String>,
    #[serde(rename = "id_organisme", default)]
    pub organism_id: Option<i64>,
    #[serde(rename = "id_application", default)]
    pub application_id: Option<i64>,
}

impl AuthUser {
    /// "First Last" when both parts are known, otherwise whatever is available.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self.login.clone(),
        }
    }
}

/// An authenticated session: the `token` cookie plus the user it belongs to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub cookie: String,
    pub user: AuthUser,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| expiry <= now).unwrap_or(false)
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        format!("token={}", self.cookie)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("cookie", &"[REDACTED]")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Login response body.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub user: AuthUser,
    #[serde(default)]
    pub expires: Option<String>,
}

/// Parses the `expires` field of a login response.
///
/// GeoNature sends naive ISO-8601 timestamps in UTC; RFC 3339 is accepted too.
pub(crate) fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
