//! Device event translation for the façade's event pump.
//!
//! Event codes below are the PTP standard's base set: this client only
//! distinguishes the events the façade actually reacts to, not the full
//! PIMA15740 event catalogue.

use crate::codec::{Container, ContainerType};

const EVENT_OBJECT_ADDED: u16 = 0x4002;
const EVENT_OBJECT_REMOVED: u16 = 0x4003;
const EVENT_STORE_ADDED: u16 = 0x4004;
const EVENT_STORE_REMOVED: u16 = 0x4005;
const EVENT_DEVICE_INFO_CHANGED: u16 = 0x4006;
const EVENT_STORAGE_INFO_CHANGED: u16 = 0x400a;
const EVENT_DEVICE_RESET: u16 = 0x4009;
/// MTP extension event (not PTP base set): an object's metadata changed
/// without the object itself being replaced, e.g. a rename.
const EVENT_OBJECT_INFO_CHANGED: u16 = 0xc801;

/// A typed device notification, translated from a raw interrupt-in
/// container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ObjectAdded { handle: u32 },
    ObjectRemoved { handle: u32 },
    ObjectInfoChanged { handle: u32 },
    StorageInfoChanged { storage_id: u32 },
    StoreAdded { storage_id: u32 },
    StoreRemoved { storage_id: u32 },
    DeviceInfoChanged,
    DeviceReset,
    Unknown { code: u16, params: Vec<u32> },
}

impl DeviceEvent {
    /// The parent handle a re-crawl should target to pick this event up, if
    /// any. Object events don't carry their parent, so callers resolve it
    /// via `get-object-info` (or, if the object is gone, by diffing the
    /// index).
    pub fn affected_handle(&self) -> Option<u32> {
        match self {
            Self::ObjectAdded { handle } | Self::ObjectRemoved { handle } | Self::ObjectInfoChanged { handle } => Some(*handle),
            _ => None,
        }
    }
}

/// Parses one interrupt-in payload into a [`DeviceEvent`]. Returns `None` if
/// the bytes don't decode as an `Event`-kind container at all (a malformed
/// or truncated read, which the event pump just discards and retries).
pub fn decode_event(bytes: &[u8]) -> Option<DeviceEvent> {
    let container = Container::decode(bytes).ok()?;
    if container.kind != ContainerType::Event {
        return None;
    }
    let params = container.params;
    Some(match container.code {
        EVENT_OBJECT_ADDED => DeviceEvent::ObjectAdded {
            handle: params.first().copied().unwrap_or(0),
        },
        EVENT_OBJECT_REMOVED => DeviceEvent::ObjectRemoved {
            handle: params.first().copied().unwrap_or(0),
        },
        EVENT_OBJECT_INFO_CHANGED => DeviceEvent::ObjectInfoChanged {
            handle: params.first().copied().unwrap_or(0),
        },
        EVENT_STORAGE_INFO_CHANGED => DeviceEvent::StorageInfoChanged {
            storage_id: params.first().copied().unwrap_or(0),
        },
        EVENT_STORE_ADDED => DeviceEvent::StoreAdded {
            storage_id: params.first().copied().unwrap_or(0),
        },
        EVENT_STORE_REMOVED => DeviceEvent::StoreRemoved {
            storage_id: params.first().copied().unwrap_or(0),
        },
        EVENT_DEVICE_INFO_CHANGED => DeviceEvent::DeviceInfoChanged,
        EVENT_DEVICE_RESET => DeviceEvent::DeviceReset,
        other => DeviceEvent::Unknown { code: other, params },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_an_object_added_event() {
        let bytes = Container::event(EVENT_OBJECT_ADDED, 0, vec![42]).encode();
        assert_eq!(decode_event(&bytes), Some(DeviceEvent::ObjectAdded { handle: 42 }));
    }

    #[test]
    fn unrecognized_codes_fall_through_to_unknown() {
        let bytes = Container::event(0xbeef, 0, vec![1, 2]).encode();
        assert_eq!(decode_event(&bytes), Some(DeviceEvent::Unknown { code: 0xbeef, params: vec![1, 2] }));
    }

    #[test]
    fn non_event_containers_are_rejected() {
        let bytes = Container::response(0x2001, 0, vec![]).encode();
        assert_eq!(decode_event(&bytes), None);
    }

    #[test]
    fn object_events_report_their_handle_as_affected() {
        let event = DeviceEvent::ObjectRemoved { handle: 7 };
        assert_eq!(event.affected_handle(), Some(7));
        assert_eq!(DeviceEvent::DeviceReset.affected_handle(), None);
    }
}
