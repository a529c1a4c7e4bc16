//! PTP/MTP container wire format: header, strings, and arrays.
//!
//! A PTP container is a 12-byte little-endian header followed by a
//! type-dependent payload:
//!
//! ```text
//! offset  size  field
//! 0       4     total length in bytes, including this header
//! 4       2     container type (Command/Data/Response/Event)
//! 6       2     operation or response code
//! 8       4     transaction id
//! 12      ..    payload (command params, data bytes, or response params)
//! ```

mod arrays;
mod container;
mod device_info;
mod object_info;
mod strings;

pub use arrays::{read_u16_array, read_u32_array, write_u16_array, write_u32_array};
pub use container::{Container, ContainerType, HEADER_LEN};
pub use device_info::{decode_device_info, decode_storage_info, DeviceInfoDecodeError, StorageInfo, StorageInfoDecodeError};
pub use object_info::{
    decode_object_info, decode_object_prop_list, encode_object_info, encode_object_prop_list, ObjectInfoDataset, ObjectInfoDecodeError,
    ObjectPropListEntry, ROOT_HANDLE,
};
pub use strings::{read_mtp_string, write_mtp_string};

/// Operation codes used by this client. Not exhaustive of the PTP/MTP
/// standard, just the subset the session executor and façade issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIds = 0x1004,
    GetStorageInfo = 0x1005,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100b,
    SendObjectInfo = 0x100c,
    SendObject = 0x100d,
    MoveObject = 0x1019,
    GetPartialObject = 0x101b,
    SetObjectPropValue = 0x9804,
    GetObjectPropList = 0x9805,
    SendPartialObject = 0x95c1,
    GetPartialObject64 = 0x95c4,
}

/// Object-property code for the object's filename, as used by
/// `set-object-prop-value` to rename without a dedicated rename opcode
/// (part of the MTP extension property set; the façade exposes this as a
/// `rename` operation).
pub const OBJECT_PROP_OBJECT_FILENAME: u16 = 0xdc07;

impl OperationCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Response codes the executor understands well enough to branch on.
/// Anything else is carried through as [`ResponseCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    GeneralError,
    SessionNotOpen,
    InvalidTransactionId,
    OperationNotSupported,
    ParameterNotSupported,
    IncompleteTransfer,
    InvalidStorageId,
    InvalidObjectHandle,
    DeviceBusy,
    StoreFull,
    StoreReadOnly,
    AccessDenied,
    InvalidParentObject,
    StoreNotAvailable,
    Other(u16),
}

impl ResponseCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            0x2001 => Self::Ok,
            0x2002 => Self::GeneralError,
            0x2003 => Self::SessionNotOpen,
            0x2004 => Self::InvalidTransactionId,
            0x2005 => Self::OperationNotSupported,
            0x2006 => Self::ParameterNotSupported,
            0x2007 => Self::IncompleteTransfer,
            0x2008 => Self::InvalidStorageId,
            0x2009 => Self::InvalidObjectHandle,
            0x2019 => Self::DeviceBusy,
            0x200c => Self::StoreFull,
            0x200e => Self::StoreReadOnly,
            0x200f => Self::AccessDenied,
            0x2012 => Self::InvalidParentObject,
            0x2013 => Self::StoreNotAvailable,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 0x2001,
            Self::GeneralError => 0x2002,
            Self::SessionNotOpen => 0x2003,
            Self::InvalidTransactionId => 0x2004,
            Self::OperationNotSupported => 0x2005,
            Self::ParameterNotSupported => 0x2006,
            Self::IncompleteTransfer => 0x2007,
            Self::InvalidStorageId => 0x2008,
            Self::InvalidObjectHandle => 0x2009,
            Self::DeviceBusy => 0x2019,
            Self::StoreFull => 0x200c,
            Self::StoreReadOnly => 0x200e,
            Self::AccessDenied => 0x200f,
            Self::InvalidParentObject => 0x2012,
            Self::StoreNotAvailable => 0x2013,
            Self::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_code_round_trips_through_u16() {
        let codes = [
            ResponseCode::Ok,
            ResponseCode::GeneralError,
            ResponseCode::SessionNotOpen,
            ResponseCode::DeviceBusy,
            ResponseCode::StoreFull,
            ResponseCode::StoreReadOnly,
            ResponseCode::AccessDenied,
            ResponseCode::Other(0x3000),
        ];
        for code in codes {
            assert_eq!(ResponseCode::from_u16(code.as_u16()), code);
        }
    }

    #[test]
    fn unknown_response_code_is_preserved() {
        assert_eq!(ResponseCode::from_u16(0xbeef), ResponseCode::Other(0xbeef));
    }
}
