//! Crate-wide error taxonomy.
//!
//! Every layer gets its own error enum (transport, protocol, façade,
//! index, journal) rather than one grab-bag type, so each `Display` impl can
//! stay specific and callers can match on the layer they care about. All of
//! them hand-roll `Display`/`Error` rather than pulling in a derive macro,
//! matching how the rest of this codebase's error types are written.

use std::fmt;

use crate::codec::ResponseCode;

/// Errors surfaced by a [`crate::transport::TransportLink`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Stall,
    NoDevice,
    AccessDenied,
    Busy,
    Io(String),
}

impl TransportError {
    /// Retryable at the transaction layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Busy | Self::Stall)
    }

    /// `no-device` is the only fatal transport error; it closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoDevice)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "transport timeout"),
            Self::Stall => write!(f, "endpoint stall"),
            Self::NoDevice => write!(f, "device not present"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::Busy => write!(f, "device busy"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A non-OK PTP response, carrying the raw code so callers can branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: ResponseCode,
    pub message: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error {:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Top-level error returned by the session executor and device façade.
///
/// Transport-agnostic: no `device_id` baked into every variant. Callers
/// that need to tag an error with a device id do so at the façade boundary,
/// where the device id is already known.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MtpError {
    DeviceNotFound,
    NotConnected,
    ExclusiveAccess { blocking_process: Option<String> },
    Timeout,
    Disconnected,
    Protocol { code: u16, message: String },
    DeviceBusy,
    StorageFull,
    WriteProtected,
    ObjectNotFound { path: String },
    PreconditionFailed { message: String },
    NotSupported { operation: String },
    Cancelled,
    MalformedContainer,
    Other { message: String },
}

impl MtpError {
    /// Returns true if the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::DeviceBusy)
    }

    /// A user-facing, actionable description, never a raw language-level
    /// error string.
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceNotFound => "Device not found. It may have been unplugged.".to_string(),
            Self::NotConnected => "Device is not connected.".to_string(),
            Self::ExclusiveAccess { blocking_process } => match blocking_process {
                Some(proc) => format!("Another process ({proc}) is using this device."),
                None => "Another process is using this device.".to_string(),
            },
            Self::Timeout => "The operation timed out. The device may be slow or unresponsive. Try again.".to_string(),
            Self::Disconnected => "Device was disconnected. Reconnect it to continue.".to_string(),
            Self::Protocol { message, .. } => format!("Device reported an error: {message}."),
            Self::DeviceBusy => "Device is busy. Wait a moment and try again.".to_string(),
            Self::StorageFull => "Storage is full. Free up some space on the device.".to_string(),
            Self::WriteProtected => "This location is read-only on the device.".to_string(),
            Self::ObjectNotFound { path } => format!("File or folder not found: {path}. It may have been deleted."),
            Self::PreconditionFailed { message } => message.clone(),
            Self::NotSupported { operation } => format!("The device does not support {operation}."),
            Self::Cancelled => "Transfer interrupted; retry to resume.".to_string(),
            Self::MalformedContainer => "Device sent a malformed response.".to_string(),
            Self::Other { message } => message.clone(),
        }
    }
}

impl fmt::Display for MtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "device not found"),
            Self::NotConnected => write!(f, "device not connected"),
            Self::ExclusiveAccess { blocking_process } => match blocking_process {
                Some(proc) => write!(f, "device in use by {proc}"),
                None => write!(f, "device in use by another process"),
            },
            Self::Timeout => write!(f, "connection timed out"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Protocol { code, message } => write!(f, "protocol error 0x{code:04x}: {message}"),
            Self::DeviceBusy => write!(f, "device busy"),
            Self::StorageFull => write!(f, "storage full"),
            Self::WriteProtected => write!(f, "storage is write-protected"),
            Self::ObjectNotFound { path } => write!(f, "object not found: {path}"),
            Self::PreconditionFailed { message } => write!(f, "precondition failed: {message}"),
            Self::NotSupported { operation } => write!(f, "not supported: {operation}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::MalformedContainer => write!(f, "malformed container"),
            Self::Other { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for MtpError {}

impl From<TransportError> for MtpError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            TransportError::Stall => Self::Other {
                message: "endpoint stall".to_string(),
            },
            TransportError::NoDevice => Self::Disconnected,
            TransportError::AccessDenied => Self::Other {
                message: "access denied".to_string(),
            },
            TransportError::Busy => Self::DeviceBusy,
            TransportError::Io(msg) => Self::Other {
                message: format!("I/O error: {msg}"),
            },
        }
    }
}

impl From<ProtocolError> for MtpError {
    fn from(e: ProtocolError) -> Self {
        map_protocol_error(e)
    }
}

/// Maps a raw PTP response code to a user-facing `MtpError` variant.
fn map_protocol_error(e: ProtocolError) -> MtpError {
    match e.code {
        ResponseCode::DeviceBusy => MtpError::DeviceBusy,
        ResponseCode::StoreFull => MtpError::StorageFull,
        ResponseCode::StoreReadOnly => MtpError::WriteProtected,
        ResponseCode::InvalidObjectHandle | ResponseCode::InvalidParentObject => MtpError::ObjectNotFound {
            path: e.message.clone(),
        },
        ResponseCode::AccessDenied => MtpError::Other {
            message: "Access denied. The device rejected the operation.".to_string(),
        },
        other => MtpError::Protocol {
            code: other.as_u16(),
            message: e.message,
        },
    }
}

/// Errors from the SQLite-backed live index.
#[derive(Debug)]
pub enum IndexError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    SchemaMismatch { expected: u32, found: u32 },
    WriterGone,
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "index store error: {e}"),
            Self::Io(e) => write!(f, "index I/O error: {e}"),
            Self::SchemaMismatch { expected, found } => {
                write!(f, "index schema mismatch: expected {expected}, found {found}")
            }
            Self::WriterGone => write!(f, "index writer thread has shut down"),
        }
    }
}

impl std::error::Error for IndexError {}

/// Errors from the transfer journal. Shares the index's SQLite store, so it
/// shares its error shape too.
pub type JournalError = IndexError;
