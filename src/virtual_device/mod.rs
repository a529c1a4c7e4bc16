//! In-memory link and device implementation used as ground truth for the
//! session executor, enumeration logic, and high-level façade operations,
//! and as a corpus of preset device profiles for quirk-resolver regression
//! tests.

mod fixtures;

pub use fixtures::{DeviceProfile, VirtualDevice, VirtualObject, VirtualStorage};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::{
    decode_object_info, encode_object_prop_list, read_mtp_string, write_u32_array, Container, ContainerType, ObjectInfoDataset, ObjectPropListEntry,
    OperationCode, ResponseCode, OBJECT_PROP_OBJECT_FILENAME,
};
use crate::error::TransportError;
use crate::transport::TransportLink;

/// Root object well-known value: `0xFFFFFFFF` means "the root" in
/// `get-object-handles`' parent parameter.
pub use crate::codec::ROOT_HANDLE;

/// In-flight data received across multiple `bulk_out` calls for one
/// transaction's data-out phase, since a real streaming write arrives in
/// policy-sized chunks rather than one call.
struct PendingDataOut {
    code: u16,
    declared_len: usize,
    received: Vec<u8>,
}

/// A `send-object-info` command awaiting the paired dataset in its own
/// data-out phase; the response (which carries the new handle) cannot be
/// queued until that dataset is parsed.
struct PendingSendObjectInfo {
    txid: u32,
    storage_id: u32,
    parent_param: u32,
}

/// A fully described, not-yet-populated object: the handle was minted when
/// `send-object-info` completed, the bytes arrive with the following
/// `send-object`.
struct PendingNewObject {
    handle: u32,
    storage_id: u32,
    parent: Option<u32>,
    name: String,
    format: u16,
}

/// A `send-object` command awaiting its data-out phase before a response
/// can be queued.
struct PendingSendObject {
    txid: u32,
}

/// A `set-object-prop-value` command awaiting the new value in its own
/// data-out phase.
struct PendingSetObjectPropValue {
    txid: u32,
    handle: u32,
    prop_code: u16,
}

/// A `send-partial-object` command (resumed upload) awaiting the remaining
/// bytes before a response can be queued.
struct PendingSendPartialObject {
    txid: u32,
    handle: u32,
    offset: u32,
}

pub struct VirtualLink {
    device: Arc<StdMutex<VirtualDevice>>,
    outbound: VecDeque<Vec<u8>>,
    pending_data_out: Option<PendingDataOut>,
    pending_send_object_info: Option<PendingSendObjectInfo>,
    pending_new_object: Option<PendingNewObject>,
    pending_send_object: Option<PendingSendObject>,
    pending_set_object_prop_value: Option<PendingSetObjectPropValue>,
    pending_send_partial_object: Option<PendingSendPartialObject>,
    session_open: bool,
}

impl VirtualLink {
    pub fn new(device: VirtualDevice) -> Self {
        Self::shared(Arc::new(StdMutex::new(device)))
    }

    pub fn shared(device: Arc<StdMutex<VirtualDevice>>) -> Self {
        Self {
            device,
            outbound: VecDeque::new(),
            pending_data_out: None,
            pending_send_object_info: None,
            pending_new_object: None,
            pending_send_object: None,
            pending_set_object_prop_value: None,
            pending_send_partial_object: None,
            session_open: false,
        }
    }

    pub fn device_handle(&self) -> Arc<StdMutex<VirtualDevice>> {
        self.device.clone()
    }

    fn handle_command(&mut self, command: &Container) {
        let code = command.code;
        let txid = command.transaction_id;
        let params = &command.params;
        let mut device = self.device.lock().expect("virtual device lock poisoned");

        if code == OperationCode::OpenSession.as_u16() {
            self.session_open = true;
            self.queue_response(ResponseCode::Ok, txid, vec![]);
        } else if code == OperationCode::CloseSession.as_u16() {
            self.session_open = false;
            self.queue_response(ResponseCode::Ok, txid, vec![]);
        } else if code == OperationCode::GetDeviceInfo.as_u16() {
            let payload = device.encode_device_info();
            self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
        } else if code == OperationCode::GetStorageIds.as_u16() {
            let mut payload = Vec::new();
            let ids: Vec<u32> = device.storages.iter().map(|s| s.id).collect();
            write_u32_array(&mut payload, &ids);
            self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
        } else if code == OperationCode::GetStorageInfo.as_u16() {
            match device.storages.iter().find(|s| s.id == params[0]) {
                Some(storage) => {
                    let payload = storage.encode();
                    self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
                }
                None => self.queue_response(ResponseCode::InvalidStorageId, txid, vec![]),
            }
        } else if code == OperationCode::GetObjectHandles.as_u16() {
            let storage_id = params[0];
            let parent = if params.get(2).copied().unwrap_or(ROOT_HANDLE) == ROOT_HANDLE {
                None
            } else {
                Some(params[2])
            };
            let handles: Vec<u32> = device
                .objects
                .values()
                .filter(|o| o.storage_id == storage_id && o.parent == parent)
                .map(|o| o.handle)
                .collect();
            let mut payload = Vec::new();
            write_u32_array(&mut payload, &handles);
            self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
        } else if code == OperationCode::GetObjectInfo.as_u16() {
            match device.objects.get(&params[0]) {
                Some(obj) => {
                    let payload = obj.encode_info();
                    self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
                }
                None => self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]),
            }
        } else if code == OperationCode::GetObject.as_u16() {
            match device.objects.get(&params[0]) {
                Some(obj) => {
                    let payload = obj.data.clone();
                    self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
                }
                None => self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]),
            }
        } else if code == OperationCode::GetPartialObject.as_u16() {
            // params: [handle, offset (u32), max_length]
            match device.objects.get(&params[0]) {
                Some(obj) => {
                    let offset = params[1] as usize;
                    let len = params.get(2).copied().unwrap_or(obj.data.len() as u32) as usize;
                    let end = (offset + len).min(obj.data.len());
                    let slice = if offset <= obj.data.len() { obj.data[offset..end].to_vec() } else { Vec::new() };
                    let actual_len = slice.len() as u32;
                    self.queue_data_then_response(code, txid, slice, ResponseCode::Ok, vec![actual_len]);
                }
                None => self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]),
            }
        } else if code == OperationCode::GetPartialObject64.as_u16() {
            // params: [handle, offset_lo, offset_hi, max_length]
            match device.objects.get(&params[0]) {
                Some(obj) => {
                    let offset = (params[1] as u64) | ((params.get(2).copied().unwrap_or(0) as u64) << 32);
                    let offset = offset as usize;
                    let len = params.get(3).copied().unwrap_or(obj.data.len() as u32) as usize;
                    let end = (offset + len).min(obj.data.len());
                    let slice = if offset <= obj.data.len() { obj.data[offset..end].to_vec() } else { Vec::new() };
                    let actual_len = slice.len() as u32;
                    self.queue_data_then_response(code, txid, slice, ResponseCode::Ok, vec![actual_len]);
                }
                None => self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]),
            }
        } else if code == OperationCode::SendObjectInfo.as_u16() {
            let storage_id = params.first().copied().unwrap_or_else(|| device.storages.first().map(|s| s.id).unwrap_or(1));
            let parent_param = params.get(1).copied().unwrap_or(ROOT_HANDLE);
            // The response (and the new handle it carries) can't be sent
            // until the dataset arrives in the following data-out phase.
            self.pending_send_object_info = Some(PendingSendObjectInfo {
                txid,
                storage_id,
                parent_param,
            });
        } else if code == OperationCode::SendObject.as_u16() {
            // Likewise deferred until the file's bytes arrive.
            self.pending_send_object = Some(PendingSendObject { txid });
        } else if code == OperationCode::SendPartialObject.as_u16() {
            let handle = params[0];
            let offset = params.get(1).copied().unwrap_or(0);
            if !device.objects.contains_key(&handle) {
                self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]);
            } else {
                self.pending_send_partial_object = Some(PendingSendPartialObject { txid, handle, offset });
            }
        } else if code == OperationCode::DeleteObject.as_u16() {
            if device.delete_recursive(params[0]) {
                self.queue_response(ResponseCode::Ok, txid, vec![]);
            } else {
                self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]);
            }
        } else if code == OperationCode::SetObjectPropValue.as_u16() {
            let handle = params[0];
            let prop_code = params.get(1).copied().unwrap_or(0) as u16;
            if !device.objects.contains_key(&handle) {
                self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]);
            } else {
                // The response (with any rename applied) can't be sent
                // until the new value arrives in the following data-out phase.
                self.pending_set_object_prop_value = Some(PendingSetObjectPropValue { txid, handle, prop_code });
            }
        } else if code == OperationCode::GetObjectPropList.as_u16() {
            // params: [storage_id, format (unused by this reference device),
            // prop_code (0xffffffff = "all"), group_code (unused), parent]
            let storage_id = params.first().copied().unwrap_or(0);
            let parent = if params.get(4).copied().unwrap_or(ROOT_HANDLE) == ROOT_HANDLE {
                None
            } else {
                Some(params[4])
            };
            let entries: Vec<ObjectPropListEntry> = device
                .objects
                .values()
                .filter(|o| o.storage_id == storage_id && o.parent == parent)
                .map(|o| ObjectPropListEntry {
                    handle: o.handle,
                    info: ObjectInfoDataset {
                        storage_id: o.storage_id,
                        format: o.format,
                        parent_handle: o.parent,
                        size: if o.is_folder() { 0 } else { o.data.len() as u64 },
                        name: o.name.clone(),
                        mtime: o.mtime,
                    },
                })
                .collect();
            let payload = encode_object_prop_list(&entries);
            self.queue_data_then_response(code, txid, payload, ResponseCode::Ok, vec![]);
        } else if code == OperationCode::MoveObject.as_u16() {
            let handle = params[0];
            let new_parent = if params.get(2).copied().unwrap_or(ROOT_HANDLE) == ROOT_HANDLE {
                None
            } else {
                Some(params[2])
            };
            if new_parent.is_some() && !device.objects.contains_key(&new_parent.unwrap()) {
                self.queue_response(ResponseCode::InvalidParentObject, txid, vec![]);
            } else if let Some(obj) = device.objects.get_mut(&handle) {
                obj.parent = new_parent;
                self.queue_response(ResponseCode::Ok, txid, vec![]);
            } else {
                self.queue_response(ResponseCode::InvalidObjectHandle, txid, vec![]);
            }
        } else {
            self.queue_response(ResponseCode::OperationNotSupported, txid, vec![]);
        }
    }

    fn queue_response(&mut self, code: ResponseCode, txid: u32, params: Vec<u32>) {
        self.outbound.push_back(Container::response(code.as_u16(), txid, params).encode());
    }

    fn queue_data_then_response(&mut self, code: u16, txid: u32, payload: Vec<u8>, response_code: ResponseCode, params: Vec<u32>) {
        self.outbound.push_back(Container::data(code, txid, payload).encode());
        self.outbound.push_back(Container::response(response_code.as_u16(), txid, params).encode());
    }

    fn ingest_data_out_bytes(&mut self, bytes: &[u8]) {
        match &mut self.pending_data_out {
            None => {
                if let Ok(header) = decode_header_only(bytes) {
                    let declared_len = header.declared_len as usize;
                    let body = &bytes[crate::codec::HEADER_LEN.min(bytes.len())..];
                    self.pending_data_out = Some(PendingDataOut {
                        code: header.code,
                        declared_len,
                        received: body.to_vec(),
                    });
                }
            }
            Some(pending) => pending.received.extend_from_slice(bytes),
        }

        if let Some(pending) = &self.pending_data_out {
            let total_received = crate::codec::HEADER_LEN + pending.received.len();
            if total_received >= pending.declared_len {
                self.complete_data_out();
            }
        }
    }

    fn complete_data_out(&mut self) {
        let Some(pending) = self.pending_data_out.take() else { return };

        if pending.code == OperationCode::SendObjectInfo.as_u16() {
            let Some(cmd) = self.pending_send_object_info.take() else { return };
            let parent = if cmd.parent_param == ROOT_HANDLE { None } else { Some(cmd.parent_param) };

            match decode_object_info(&pending.received) {
                Ok(dataset) => {
                    let handle = {
                        let mut device = self.device.lock().expect("virtual device lock poisoned");
                        device.alloc_handle()
                    };
                    self.pending_new_object = Some(PendingNewObject {
                        handle,
                        storage_id: cmd.storage_id,
                        parent,
                        name: dataset.name,
                        format: dataset.format,
                    });
                    self.queue_response(ResponseCode::Ok, cmd.txid, vec![cmd.storage_id, cmd.parent_param, handle]);
                }
                Err(_) => self.queue_response(ResponseCode::GeneralError, cmd.txid, vec![]),
            }
        } else if pending.code == OperationCode::SendObject.as_u16() {
            let Some(send) = self.pending_send_object.take() else { return };
            if let Some(new_obj) = self.pending_new_object.take() {
                let mut device = self.device.lock().expect("virtual device lock poisoned");
                device.insert_object_with_handle(new_obj.handle, new_obj.storage_id, new_obj.parent, new_obj.name, new_obj.format, pending.received);
            }
            self.queue_response(ResponseCode::Ok, send.txid, vec![]);
        } else if pending.code == OperationCode::SetObjectPropValue.as_u16() {
            let Some(cmd) = self.pending_set_object_prop_value.take() else { return };
            if cmd.prop_code == OBJECT_PROP_OBJECT_FILENAME {
                match read_mtp_string(&pending.received) {
                    Ok((new_name, _)) => {
                        let mut device = self.device.lock().expect("virtual device lock poisoned");
                        match device.objects.get_mut(&cmd.handle) {
                            Some(obj) => {
                                obj.name = new_name;
                                self.queue_response(ResponseCode::Ok, cmd.txid, vec![]);
                            }
                            None => self.queue_response(ResponseCode::InvalidObjectHandle, cmd.txid, vec![]),
                        }
                    }
                    Err(_) => self.queue_response(ResponseCode::GeneralError, cmd.txid, vec![]),
                }
            } else {
                self.queue_response(ResponseCode::ParameterNotSupported, cmd.txid, vec![]);
            }
        } else if pending.code == OperationCode::SendPartialObject.as_u16() {
            let Some(cmd) = self.pending_send_partial_object.take() else { return };
            let mut device = self.device.lock().expect("virtual device lock poisoned");
            match device.objects.get_mut(&cmd.handle) {
                Some(obj) => {
                    let offset = cmd.offset as usize;
                    if obj.data.len() < offset {
                        obj.data.resize(offset, 0);
                    }
                    obj.data.truncate(offset);
                    obj.data.extend_from_slice(&pending.received);
                    self.queue_response(ResponseCode::Ok, cmd.txid, vec![pending.received.len() as u32]);
                }
                None => self.queue_response(ResponseCode::InvalidObjectHandle, cmd.txid, vec![]),
            }
        }
    }
}

#[async_trait]
impl TransportLink for VirtualLink {
    async fn open_usb(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn claim_interface(&mut self, _interface_number: u8) -> Result<(), TransportError> {
        Ok(())
    }

    async fn bulk_out(&mut self, _endpoint: u8, bytes: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        if let Ok(container) = Container::decode(bytes) {
            match container.kind {
                ContainerType::Command => self.handle_command(&container),
                ContainerType::Data => self.ingest_data_out_bytes(bytes),
                _ => {}
            }
        } else {
            // A continuation chunk of an in-progress data-out phase has no
            // header of its own; feed it to the accumulator directly.
            self.ingest_data_out_bytes(bytes);
        }
        Ok(())
    }

    async fn bulk_in(&mut self, _endpoint: u8, _max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.outbound.pop_front().ok_or(TransportError::Timeout)
    }

    async fn interrupt_in(&mut self, _endpoint: u8, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Timeout)
    }

    async fn reset_device(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.session_open = false;
        Ok(())
    }
}

struct HeaderOnly {
    declared_len: u32,
    code: u16,
}

fn decode_header_only(bytes: &[u8]) -> Result<HeaderOnly, ()> {
    if bytes.len() < crate::codec::HEADER_LEN {
        return Err(());
    }
    Ok(HeaderOnly {
        declared_len: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        code: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
    })
}
