//! Bridge identity: the `(session, peer, label)` triple and the names derived
//! from it.
//!
//! A bridge is addressed by three strings handed to it by whoever set up the
//! data channel:
//!
//! - `session_id` – the signalling session the data channel belongs to.
//! - `peer_id`    – the remote peer inside that session.
//! - `label`      – the data channel label (one session/peer pair may open
//!   several channels).
//!
//! Two names are derived from the triple and must never collide for distinct
//! triples:
//!
//! ```text
//! topic name        [<namespace>/]session_<session>/peer_<peer>/data_<label>
//! liveness session  <session>_<label>_<peer>
//! ```
//!
//! The topic is unambiguous because every segment is prefixed and no id may
//! contain `/`.  The liveness session id is unambiguous because session and
//! peer ids may not contain `_`, so the first and last `_` always mark the
//! label boundaries.

use std::fmt;

use rand::RngCore;
use thiserror::Error;

/// Errors returned by [`BridgeIdentity::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// A component of the triple was the empty string.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// A component contained a character that would make derived names ambiguous.
    #[error("{field} {value:?} must not contain {forbidden:?}")]
    ForbiddenChar {
        field: &'static str,
        value: String,
        forbidden: char,
    },
}

/// Process-local identifier of one bridge instance.
///
/// Unique per bridge unless explicitly supplied.  The codec is bound to it so
/// that protocol state from different bridges in the same process never mixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Draws a fresh id from the operating system's CSPRNG.
    pub fn random() -> Self {
        Self(rand::rngs::OsRng.next_u64())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Immutable addressing triple of a bridge, plus the optional bus namespace
/// its topic lives under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BridgeIdentity {
    pub session_id: String,
    pub peer_id: String,
    pub label: String,
    /// Optional namespace qualifier prepended to the topic name.
    pub namespace: Option<String>,
}

impl BridgeIdentity {
    /// Creates an identity without a namespace.
    pub fn new(
        session_id: impl Into<String>,
        peer_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            peer_id: peer_id.into(),
            label: label.into(),
            namespace: None,
        }
    }

    /// Returns the same identity placed under `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Checks that the derived names are unambiguous for this identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for an empty component and
    /// [`IdentityError::ForbiddenChar`] when a component contains `/`, or when
    /// the session or peer id contains `_`.
    pub fn validate(&self) -> Result<(), IdentityError> {
        let fields: [(&'static str, &str, &[char]); 3] = [
            ("session_id", &self.session_id, &['/', '_']),
            ("peer_id", &self.peer_id, &['/', '_']),
            ("label", &self.label, &['/']),
        ];

        for (field, value, forbidden) in fields {
            if value.is_empty() {
                return Err(IdentityError::Empty { field });
            }
            if let Some(c) = value.chars().find(|c| forbidden.contains(c)) {
                return Err(IdentityError::ForbiddenChar {
                    field,
                    value: value.to_string(),
                    forbidden: c,
                });
            }
        }
        Ok(())
    }

    /// Name of the bus topic the bridge subscribes to for inbound traffic.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use channel_bridge_core::BridgeIdentity;
    ///
    /// let id = BridgeIdentity::new("s1", "p1", "chat").with_namespace("/webrtc/");
    /// assert_eq!(id.topic_name(), "/webrtc/session_s1/peer_p1/data_chat");
    /// ```
    pub fn topic_name(&self) -> String {
        let mut segments: Vec<String> = Vec::with_capacity(4);
        if let Some(ns) = self.namespace.as_deref() {
            // An all-slash namespace is the root: the empty segment keeps the
            // leading `/` after the join.
            if !ns.is_empty() {
                segments.push(ns.trim_end_matches('/').to_string());
            }
        }
        segments.push(format!("session_{}", self.session_id));
        segments.push(format!("peer_{}", self.peer_id));
        segments.push(format!("data_{}", self.label));
        segments.join("/")
    }

    /// Id of the liveness (heartbeat bond) session for this channel.
    pub fn liveness_session_id(&self) -> String {
        format!("{}_{}_{}", self.session_id, self.label, self.peer_id)
    }
}

impl fmt::Display for BridgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session={} peer={} label={}",
            self.session_id, self.peer_id, self.label
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
