use std::fmt;

/// Errors in the content of an inbound command. Always recovered locally:
/// the peer gets a human-readable notification and the worker moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload was not parseable as JSON.
    MalformedJson(String),
    /// Channel-native object carried an action we do not know.
    UnknownAction(String),
    /// CONNECT_WIFI was missing one of its required string fields.
    MissingField(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedJson(detail) => write!(f, "malformed JSON payload: {}", detail),
            ProtocolError::UnknownAction(action) => write!(f, "unknown action: {}", action),
            ProtocolError::MissingField(field) => write!(f, "missing required field: {}", field),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors moving bytes through the notification pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No central is connected with notifications enabled.
    NotSubscribed,
    /// The notification queue stayed full past the bounded wait.
    QueueFull,
    /// A chunk exceeded the TX scratch buffer.
    ChunkTooLarge(usize),
    /// The radio stack reported an expected race (already advertising,
    /// link already gone). Informational, not a failure.
    StackAdvisory(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotSubscribed => write!(f, "no subscribed central"),
            TransportError::QueueFull => write!(f, "notification queue full"),
            TransportError::ChunkTooLarge(len) => {
                write!(f, "chunk of {} bytes exceeds the TX scratch buffer", len)
            }
            TransportError::StackAdvisory(code) => {
                write!(f, "radio stack advisory (code {})", code)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Failures acquiring the resources `start()` needs. Fatal only to that
/// call: everything partially created is unwound and the rest of the
/// firmware keeps running without the channel.
#[derive(Debug)]
pub enum ResourceError {
    /// Queue or buffer allocation failed.
    OutOfMemory,
    /// Spawning the worker or drain thread failed.
    TaskCreateFailed(String),
    /// The radio stack refused the GATT service registration.
    ServiceRegistrationFailed(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::OutOfMemory => write!(f, "out of memory"),
            ResourceError::TaskCreateFailed(detail) => {
                write!(f, "task creation failed: {}", detail)
            }
            ResourceError::ServiceRegistrationFailed(detail) => {
                write!(f, "GATT service registration failed: {}", detail)
            }
        }
    }
}

impl std::error::Error for ResourceError {}
