//! HTTP basic-auth gate

use base64::{engine::general_purpose::STANDARD, Engine};
use devtun_core::{Error, Result};
use http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Realm advertised in the challenge
pub const DEFAULT_REALM: &str = "users";

const EVENT_CAPACITY: usize = 64;

type CredentialCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Notification emitted for every authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Credentials accepted
    Success {
        /// Authenticated user
        user: String,
    },
    /// Credentials rejected
    Fail {
        /// User that attempted to authenticate
        user: String,
    },
    /// Malformed `Authorization` header
    Error {
        /// What was wrong with it
        message: String,
    },
}

/// Result of checking a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Request may proceed
    Allowed {
        /// Authenticated user
        user: String,
    },
    /// Request must be answered with a challenge
    Denied,
}

impl AuthOutcome {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthOutcome::Allowed { .. })
    }
}

/// Basic-auth gate
#[derive(Clone)]
pub struct BasicAuthGate {
    realm: String,
    check: CredentialCheck,
    events: broadcast::Sender<AuthEvent>,
}

impl fmt::Debug for BasicAuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthGate")
            .field("realm", &self.realm)
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl BasicAuthGate {
    /// Create a gate around an arbitrary credential check
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            realm: DEFAULT_REALM.to_string(),
            check: Arc::new(check),
            events,
        }
    }

    /// Create a gate accepting exactly one user/password pair
    pub fn with_credentials(user: impl Into<String>, pass: impl Into<String>) -> Self {
        let user = user.into();
        let pass = pass.into();
        Self::new(move |u, p| u == user && p == pass)
    }

    /// Override the realm
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Subscribe to authentication notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Check the `Authorization` header of a request
    pub fn check(&self, headers: &HeaderMap) -> AuthOutcome {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            debug!("No credentials supplied");
            return AuthOutcome::Denied;
        };

        let (user, pass) = match parse_basic(value) {
            Ok(credentials) => credentials,
            Err(e) => {
                debug!(error = %e, "Malformed Authorization header");
                self.emit(AuthEvent::Error {
                    message: e.to_string(),
                });
                return AuthOutcome::Denied;
            }
        };

        if (self.check)(&user, &pass) {
            self.emit(AuthEvent::Success { user: user.clone() });
            AuthOutcome::Allowed { user }
        } else {
            self.emit(AuthEvent::Fail { user });
            AuthOutcome::Denied
        }
    }

    /// Build the `401` challenge response
    pub fn challenge<B>(&self, body: B) -> Response<B> {
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        let value = HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic realm=\"users\""));
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
        response
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn parse_basic(value: &HeaderValue) -> Result<(String, String)> {
    let value = value
        .to_str()
        .map_err(|_| invalid("Authorization header is not valid ASCII"))?;

    let (scheme, encoded) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| invalid("Authorization header has no credentials"))?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(invalid(format!("Unsupported authorization scheme: {scheme}")));
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(format!("Invalid base64 credentials: {e}")))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| invalid("Credentials are not valid UTF-8"))?;

    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| invalid("Credentials are missing a ':' separator"))?;
    Ok((user.to_string(), pass.to_string()))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Authentication(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn test_valid_credentials() {
        let gate = BasicAuthGate::with_credentials("user", "secret");
        let mut events = gate.subscribe();

        let outcome = gate.check(&headers_with(&basic("user", "secret")));
        assert_eq!(
            outcome,
            AuthOutcome::Allowed {
                user: "user".to_string()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::Success {
                user: "user".to_string()
            }
        );
    }

    #[test]
    fn test_wrong_password() {
        let gate = BasicAuthGate::with_credentials("user", "secret");
        let mut events = gate.subscribe();

        assert!(!gate.check(&headers_with(&basic("user", "nope"))).is_allowed());
        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::Fail {
                user: "user".to_string()
            }
        );
    }

    #[test]
    fn test_password_may_contain_colon() {
        let gate = BasicAuthGate::with_credentials("user", "a:b:c");
        assert!(gate.check(&headers_with(&basic("user", "a:b:c"))).is_allowed());
    }

    #[test]
    fn test_missing_header_is_denied_without_event() {
        let gate = BasicAuthGate::with_credentials("user", "secret");
        let mut events = gate.subscribe();

        assert_eq!(gate.check(&HeaderMap::new()), AuthOutcome::Denied);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_malformed_header_emits_error() {
        let gate = BasicAuthGate::with_credentials("user", "secret");
        let mut events = gate.subscribe();

        assert!(!gate.check(&headers_with("Basic !!!not-base64!!!")).is_allowed());
        assert!(matches!(
            events.try_recv().unwrap(),
            AuthEvent::Error { .. }
        ));

        assert!(!gate.check(&headers_with("Bearer abc")).is_allowed());
        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::Error {
                message: "Authentication failed: Unsupported authorization scheme: Bearer"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_parse_basic_errors_are_authentication_errors() {
        let err = parse_basic(&HeaderValue::from_static("Basic dXNlcg==")).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.to_status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            err.to_string(),
            "Authentication failed: Credentials are missing a ':' separator"
        );
    }

    #[test]
    fn test_checks_without_subscribers() {
        let gate = BasicAuthGate::new(|u, _| u == "anyone");
        assert!(gate.check(&headers_with(&basic("anyone", "x"))).is_allowed());
    }

    #[test]
    fn test_challenge() {
        let gate = BasicAuthGate::with_credentials("user", "secret");
        let response = gate.challenge("401 Unauthorized");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"users\""
        );
    }
}
