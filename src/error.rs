use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("gateway is not connected")]
    NotConnected,
    #[error("gateway error {code} for request {request_id}: {message}")]
    Gateway {
        request_id: i64,
        code: i32,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unparseable order status '{0}'")]
    UnknownOrderStatus(String),
    #[error("no live approval token for trade {0}")]
    ApprovalMissing(i64),
    #[error("risk check rejected trade {0}")]
    ApprovalRefused(i64),
    #[error("bracket registration failed: {0}")]
    BracketRegistration(String),
}

impl serde::Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
