use std::string::FromUtf8Error;

/// All error types that can occur when interacting with Aqara gateways.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize data to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// A network socket operation failed while communicating with a gateway.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// An inbound datagram contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(FromUtf8Error),

    /// The specified gateway is not in the registry.
    #[error("gateway {0} not found")]
    GatewayNotFound(String),

    /// The specified device is not in the registry.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// The device has not been claimed by any known gateway's id list.
    #[error("device {0} is not attached to a known gateway")]
    DeviceNotMapped(String),

    /// The gateway's network address has not been learned from discovery yet.
    #[error("gateway {0} has no known address; waiting for an iam reply")]
    AddressNotLearned(String),

    /// A write was attempted before the gateway announced a token.
    ///
    /// Tokens arrive via heartbeat and command replies; until one is seen
    /// there is no way to derive a valid write key.
    #[error("gateway {0} has not announced a token yet")]
    TokenNotLearned(String),

    /// The gateway has no password configured, so writes cannot be signed.
    #[error("gateway {0} has no password configured")]
    PasswordNotSet(String),

    /// Gateway credentials supplied at construction were malformed.
    #[error("invalid gateway credentials: {0}")]
    InvalidCredentials(String),

    /// The payload of a write command must be a JSON object.
    #[error("write payload must be a json object")]
    InvalidWritePayload,
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
