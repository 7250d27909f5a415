//! Error kinds for the bridge, per the error handling design.
//!
//! Each kind maps to a concrete enum variant; crossing a component boundary
//! (bus <-> pump, pump <-> supervisor) is done through [`rama_error::BoxError`]
//! plus [`rama_error::ErrorExt`]/[`rama_error::ErrorContext`], the same way
//! `rama-core` itself threads errors through its service stack.

use rama_error::BoxError;
use std::fmt;

/// Top level error for everything `cloudpin-core` can fail with.
#[derive(Debug)]
pub enum CloudPinError {
    /// A `ServiceConfig` value failed validation before any IO was attempted.
    Config(ConfigError),
    /// The local ZeroMQ bus (ROUTER/DEALER) reported a failure.
    Bus(BusError),
    /// The peer rejected or never supplied required authentication material.
    Auth(AuthError),
    /// A network condition that the supervisor should retry past.
    Transient(TransientNetworkError),
    /// A frame or message was dropped because of a full bounded queue.
    Backpressure(BackpressureDrop),
    /// A frame could not be decoded from the wire.
    MalformedFrame(MalformedFrameError),
    /// Anything else, already boxed by a lower layer.
    Other(BoxError),
}

impl fmt::Display for CloudPinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Auth(e) => write!(f, "auth error: {e}"),
            Self::Transient(e) => write!(f, "transient network error: {e}"),
            Self::Backpressure(e) => write!(f, "backpressure drop: {e}"),
            Self::MalformedFrame(e) => write!(f, "malformed frame: {e}"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CloudPinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Bus(e) => Some(e),
            Self::Auth(e) => Some(e),
            Self::Transient(e) => Some(e),
            Self::Backpressure(e) => Some(e),
            Self::MalformedFrame(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<BoxError> for CloudPinError {
    fn from(err: BoxError) -> Self {
        Self::Other(err)
    }
}

macro_rules! leaf_error {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug)]
        pub struct $name {
            message: String,
        }

        impl $name {
            /// Build a new error value from any displayable message.
            pub fn new(message: impl Into<String>) -> Self {
                Self {
                    message: message.into(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.message)
            }
        }

        impl std::error::Error for $name {}
    };
}

leaf_error!(
    ConfigError,
    "A `ServiceConfig` field failed validation (bad URL scheme, missing cert material, ...)."
);
leaf_error!(
    BusError,
    "The local ZeroMQ ROUTER/DEALER socket reported a failure starting, sending or receiving."
);
leaf_error!(
    AuthError,
    "The `x-api-key` handshake header was missing, wrong, or TLS client-cert verification failed."
);
leaf_error!(
    TransientNetworkError,
    "A connect/read/write failure the supervisor should retry past (refused, reset, timed out)."
);
leaf_error!(
    BackpressureDrop,
    "A message was dropped because a bounded queue was full."
);
leaf_error!(
    MalformedFrameError,
    "A frame's header was internally inconsistent or exceeded `max_frame_size`."
);

impl CloudPinError {
    /// `true` for kinds the supervisor should treat as worth retrying
    /// (reconnect after `reconnect_timeout`), per the error handling table.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_transient() {
        assert!(CloudPinError::Transient(TransientNetworkError::new("reset")).is_transient());
        assert!(!CloudPinError::Config(ConfigError::new("bad url")).is_transient());
        assert!(!CloudPinError::Bus(BusError::new("socket down")).is_transient());
        assert!(!CloudPinError::Auth(AuthError::new("bad key")).is_transient());
        assert!(!CloudPinError::Backpressure(BackpressureDrop::new("queue full")).is_transient());
        assert!(!CloudPinError::MalformedFrame(MalformedFrameError::new("truncated")).is_transient());
    }

    #[test]
    fn display_wraps_the_leaf_message_with_its_kind() {
        let err = CloudPinError::Auth(AuthError::new("missing x-api-key header"));
        assert_eq!(err.to_string(), "auth error: missing x-api-key header");
    }

    #[test]
    fn other_display_passes_through_without_a_kind_prefix() {
        let leaf: BoxError = Box::new(ConfigError::new("wrapped"));
        let err = CloudPinError::from(leaf);
        assert_eq!(err.to_string(), "wrapped");
    }

    #[test]
    fn source_is_populated_for_every_leaf_variant_but_other() {
        use std::error::Error as _;
        let err = CloudPinError::Bus(BusError::new("send failed"));
        assert!(err.source().is_some());
        let err = CloudPinError::Other(Box::new(BusError::new("send failed")));
        assert!(err.source().is_none());
    }
}
