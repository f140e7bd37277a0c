//! Acting-user resolution.
//!
//! Not every internal trigger point has access to the original request, so
//! the acting user is resolved through an explicit fallback chain over the
//! facts the boundary could gather. The chain is attempted in order until one
//! source succeeds; the winning source is recorded on the entry so operators
//! can tell a gateway-attributed write from a session-derived one.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tourdesk_core::UserId;
use tourdesk_store::{Filter, RecordStore};

use crate::entry::RequestMeta;

/// Class name for session records consulted by the token fallback. Session
/// records are themselves excluded from auditing.
pub const SESSION_CLASS: &str = "Session";

/// Which fallback source produced the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorSource {
    PropagatedContext,
    TrustHeaders,
    AuthenticatedCaller,
    SessionToken,
    System,
    Anonymous,
}

/// The resolved acting user attached to every audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub username: String,
    pub source: ActorSource,
}

impl Actor {
    pub fn user(user_id: UserId, username: impl Into<String>, source: ActorSource) -> Self {
        Self {
            user_id: Some(user_id),
            username: username.into(),
            source,
        }
    }

    /// Elevated-privilege marker for calls made by the system itself.
    pub fn system() -> Self {
        Self {
            user_id: None,
            username: "system".to_string(),
            source: ActorSource::System,
        }
    }

    /// Explicit final fallback; never defaulted into silently.
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            username: "anonymous".to_string(),
            source: ActorSource::Anonymous,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.source, ActorSource::Anonymous)
    }
}

/// Identity carried by a request-scoped propagated context object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedIdentity {
    pub user_id: UserId,
    pub username: String,
    pub ip: Option<String>,
}

/// Identity asserted by trust headers from an upstream authentication gateway.
///
/// Header values are untyped strings; a malformed user id falls through to the
/// next source in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustHeaders {
    pub user_id: String,
    pub username: String,
}

/// Identity of the authenticated caller attached to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedCaller {
    pub user_id: UserId,
    pub username: String,
}

/// Everything the boundary could gather about the calling request.
///
/// User-context is an explicit parameter threaded through every internal
/// call; there is no ambient propagation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEnv {
    pub propagated: Option<PropagatedIdentity>,
    pub trust_headers: Option<TrustHeaders>,
    pub authenticated: Option<AuthenticatedCaller>,
    pub session_token: Option<String>,
    /// The call was made with elevated/system credentials.
    pub elevated: bool,
    pub ip: Option<String>,
    pub method: Option<String>,
}

impl RequestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_propagated(mut self, identity: PropagatedIdentity) -> Self {
        self.propagated = Some(identity);
        self
    }

    pub fn with_trust_headers(mut self, headers: TrustHeaders) -> Self {
        self.trust_headers = Some(headers);
        self
    }

    pub fn with_authenticated(mut self, caller: AuthenticatedCaller) -> Self {
        self.authenticated = Some(caller);
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn request_meta(&self) -> RequestMeta {
        RequestMeta {
            ip: self
                .ip
                .clone()
                .or_else(|| self.propagated.as_ref().and_then(|p| p.ip.clone())),
            method: self.method.clone(),
        }
    }
}

/// Resolve the acting user through the fallback chain.
///
/// Order: propagated context, trust headers, authenticated caller, session
/// token lookup, system marker, anonymous.
pub fn resolve_actor(env: &RequestEnv, store: &dyn RecordStore) -> Actor {
    if let Some(p) = &env.propagated {
        return Actor::user(p.user_id, p.username.clone(), ActorSource::PropagatedContext);
    }

    if let Some(h) = &env.trust_headers {
        match UserId::from_str(&h.user_id) {
            Ok(user_id) => {
                return Actor::user(user_id, h.username.clone(), ActorSource::TrustHeaders);
            }
            Err(_) => {
                debug!(user_id = %h.user_id, "malformed trust-header user id, trying next source");
            }
        }
    }

    if let Some(a) = &env.authenticated {
        return Actor::user(a.user_id, a.username.clone(), ActorSource::AuthenticatedCaller);
    }

    if let Some(token) = &env.session_token {
        if let Some(actor) = lookup_session(store, token) {
            return actor;
        }
    }

    if env.elevated {
        return Actor::system();
    }

    Actor::anonymous()
}

fn lookup_session(store: &dyn RecordStore, token: &str) -> Option<Actor> {
    let sessions = store
        .find(SESSION_CLASS, &Filter::field("session_token", token))
        .ok()?;

    // A token must identify exactly one session to be trusted.
    if sessions.len() != 1 {
        return None;
    }

    let session = &sessions[0];
    let user_id = UserId::from_str(session.get("user_id")?.as_str()?).ok()?;
    let username = session.get("username")?.as_str()?.to_string();

    Some(Actor::user(user_id, username, ActorSource::SessionToken))
}
