//! Branded id newtypes.
//!
//! A [`LinkId`] names one physical connection and changes on every
//! reconnect. A [`SessionIdentity`] is minted once by the initiator and stays
//! stable across reconnects. Keeping them as distinct types prevents looking
//! a session up in the wrong registry index.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alphabet used for initiator-generated session identities.
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated [`SessionIdentity`].
pub const SESSION_IDENTITY_LEN: usize = 8;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identity of one physical link. Transient: replaced on every reconnect.
    LinkId
}

branded_id! {
    /// Stable token identifying a logical session across reconnects.
    SessionIdentity
}

impl LinkId {
    /// Create a new random link id (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdentity {
    /// Generate a fresh identity of [`SESSION_IDENTITY_LEN`] base-36 characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let token = (0..SESSION_IDENTITY_LEN)
            .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
            .collect();
        Self(token)
    }
}

/// Per-session channel number assigned by the initiator at open time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelNumber(pub u32);

impl ChannelNumber {
    /// The raw number.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// The number after this one, saturating at `u32::MAX`.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelNumber {
    fn from(n: u32) -> Self {
        Self(n)
    }
}
