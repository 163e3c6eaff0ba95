use hyper::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use tracing::debug;

/// Who is performing a request, as far as mount visibility is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub principal: Option<String>,
    pub is_admin: bool,
}

impl CallerIdentity {
    pub fn admin() -> Self {
        CallerIdentity {
            principal: None,
            is_admin: true,
        }
    }

    pub fn user(principal: &str) -> Self {
        CallerIdentity {
            principal: Some(principal.to_owned()),
            is_admin: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    /// Principal used for mount ownership, defaults to the username.
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

/// Maps HTTP Basic credentials to a caller identity.
///
/// Without configured users every request is treated as the administrator.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    users: Vec<UserConfig>,
}

impl Authenticator {
    pub fn new(users: Vec<UserConfig>) -> Self {
        Authenticator { users }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<CallerIdentity> {
        if self.users.is_empty() {
            return Some(CallerIdentity::admin());
        }

        let (username, password) = basic_credentials(headers)?;
        let user = self
            .users
            .iter()
            .find(|u| u.username == username && u.password == password);
        match user {
            Some(u) => Some(CallerIdentity {
                principal: Some(u.principal.clone().unwrap_or_else(|| u.username.clone())),
                is_admin: u.admin,
            }),
            None => {
                debug!(username = %username, "rejected credentials");
                None
            }
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = base64::decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.splitn(2, ':');
    let username = parts.next()?.to_owned();
    let password = parts.next()?.to_owned();
    Some((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn with_basic(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = base64::encode(format!("{}:{}", user, password));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn anonymous_is_admin_without_users() {
        let auth = Authenticator::default();
        assert_eq!(
            auth.authenticate(&HeaderMap::new()),
            Some(CallerIdentity::admin())
        );
    }

    #[test]
    fn checks_basic_credentials() {
        let auth = Authenticator::new(vec![UserConfig {
            username: "alice".into(),
            password: "secret".into(),
            principal: Some("team-a".into()),
            admin: false,
        }]);

        assert_eq!(
            auth.authenticate(&with_basic("alice", "secret")),
            Some(CallerIdentity::user("team-a"))
        );
        assert_eq!(auth.authenticate(&with_basic("alice", "wrong")), None);
        assert_eq!(auth.authenticate(&HeaderMap::new()), None);
    }
}
