use std::fmt;

/// Size of the fixed PTP container header in bytes.
pub const HEADER_LEN: usize = 12;

/// Maximum number of u32 parameters a command/response container carries.
/// PTP caps this at 5; we keep the same ceiling for sanity-checking decode.
const MAX_PARAMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

impl ContainerType {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Command),
            2 => Some(Self::Data),
            3 => Some(Self::Response),
            4 => Some(Self::Event),
            _ => None,
        }
    }
}

/// A decoded or to-be-encoded PTP container.
///
/// `Data` containers carry their payload in `payload` rather than `params`;
/// `Command`/`Response`/`Event` containers carry up to 5 u32 params and leave
/// `payload` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
    pub params: Vec<u32>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort,
    UnknownContainerType(u16),
    LengthMismatch { declared: u32, actual: usize },
    TooManyParams(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "buffer shorter than container header"),
            Self::UnknownContainerType(v) => write!(f, "unknown container type {v}"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared length {declared} does not match actual buffer length {actual}")
            }
            Self::TooManyParams(n) => write!(f, "{n} params exceeds the {MAX_PARAMS} param limit"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Container {
    pub fn command(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerType::Command,
            code,
            transaction_id,
            params,
            payload: Vec::new(),
        }
    }

    pub fn response(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerType::Response,
            code,
            transaction_id,
            params,
            payload: Vec::new(),
        }
    }

    pub fn data(code: u16, transaction_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: ContainerType::Data,
            code,
            transaction_id,
            params: Vec::new(),
            payload,
        }
    }

    pub fn event(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerType::Event,
            code,
            transaction_id,
            params,
            payload: Vec::new(),
        }
    }

    /// Serializes this container to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = match self.kind {
            ContainerType::Data => self.payload.len(),
            _ => self.params.len() * 4,
        };
        let total_len = HEADER_LEN + body_len;

        let mut buf = Vec::with_capacity(total_len);
        buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        buf.extend_from_slice(&(self.kind as u16).to_le_bytes());
        buf.extend_from_slice(&self.code.to_le_bytes());
        buf.extend_from_slice(&self.transaction_id.to_le_bytes());

        match self.kind {
            ContainerType::Data => buf.extend_from_slice(&self.payload),
            _ => {
                for param in &self.params {
                    buf.extend_from_slice(&param.to_le_bytes());
                }
            }
        }

        buf
    }

    /// Parses a container from a complete wire buffer (header + body).
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort);
        }

        let declared_len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let kind_raw = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let code = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let transaction_id = u32::from_le_bytes(buf[8..12].try_into().unwrap());

        if declared_len as usize != buf.len() {
            return Err(DecodeError::LengthMismatch {
                declared: declared_len,
                actual: buf.len(),
            });
        }

        let kind = ContainerType::from_u16(kind_raw).ok_or(DecodeError::UnknownContainerType(kind_raw))?;
        let body = &buf[HEADER_LEN..];

        match kind {
            ContainerType::Data => Ok(Self {
                kind,
                code,
                transaction_id,
                params: Vec::new(),
                payload: body.to_vec(),
            }),
            _ => {
                if body.len() % 4 != 0 {
                    return Err(DecodeError::LengthMismatch {
                        declared: declared_len,
                        actual: buf.len(),
                    });
                }
                let n = body.len() / 4;
                if n > MAX_PARAMS {
                    return Err(DecodeError::TooManyParams(n));
                }
                let params = body
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                Ok(Self {
                    kind,
                    code,
                    transaction_id,
                    params,
                    payload: Vec::new(),
                })
            }
        }
    }

    /// Reads just the 12-byte header to learn the total container length,
    /// so a transport can read exactly that many more bytes for the body.
    pub fn peek_total_len(header: &[u8; HEADER_LEN]) -> u32 {
        u32::from_le_bytes(header[0..4].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_session_command_encodes_to_the_documented_bytes() {
        let container = Container::command(0x1002, 42, vec![1]);
        let bytes = container.encode();
        assert_eq!(
            bytes,
            vec![
                0x10, 0x00, 0x00, 0x00, // total length = 16
                0x01, 0x00, // type = Command
                0x02, 0x10, // code = 0x1002
                0x2A, 0x00, 0x00, 0x00, // txid = 42
                0x01, 0x00, 0x00, 0x00, // param[0] = 1
            ]
        );
    }

    #[test]
    fn command_round_trips() {
        let original = Container::command(0x1007, 7, vec![1, 0xFFFFFFFF, 3]);
        let bytes = original.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn data_round_trips_with_arbitrary_payload() {
        let original = Container::data(0x1009, 3, vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
        let bytes = original.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn response_with_no_params_round_trips() {
        let original = Container::response(0x2001, 5, vec![]);
        let bytes = original.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert_eq!(Container::decode(&[0u8; 4]), Err(DecodeError::TooShort));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut bytes = Container::command(0x1001, 1, vec![]).encode();
        bytes.push(0xff);
        assert!(matches!(Container::decode(&bytes), Err(DecodeError::LengthMismatch { .. })));
    }

    #[test]
    fn decode_rejects_unknown_container_type() {
        let mut bytes = Container::command(0x1001, 1, vec![]).encode();
        bytes[4] = 0x09;
        bytes[5] = 0x00;
        assert_eq!(Container::decode(&bytes), Err(DecodeError::UnknownContainerType(9)));
    }

    #[test]
    fn decode_rejects_too_many_params() {
        let mut bytes = Vec::new();
        let body_len = 6 * 4;
        bytes.extend_from_slice(&((HEADER_LEN + body_len) as u32).to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0x1001u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(body_len));
        assert!(matches!(Container::decode(&bytes), Err(DecodeError::TooManyParams(6))));
    }

    #[test]
    fn peek_total_len_reads_header_only() {
        let bytes = Container::command(0x1001, 1, vec![9, 9]).encode();
        let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
        assert_eq!(Container::peek_total_len(&header), bytes.len() as u32);
    }
}
