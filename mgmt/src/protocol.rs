// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control messages and their framing.

use crate::errors::MgmtError;
use config::ForwardedPort;
use nat::TraceType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Size of the big-endian length preceding each message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest message accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Trace classes, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceKind {
    Drop,
    Translate,
    Kni,
}

impl From<TraceKind> for TraceType {
    fn from(kind: TraceKind) -> Self {
        match kind {
            TraceKind::Drop => TraceType::Drop,
            TraceKind::Translate => TraceType::Translate,
            TraceKind::Kni => TraceType::Kni,
        }
    }
}

/// A control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start or stop dumping one trace class.
    ControlDump { enable: bool, trace_type: TraceKind },
    /// Set the address of an interface, as a CIDR or a bare address.
    ChangeInterfaceAddress { interface_id: u32, subnet: String },
    /// Replace the forwarding of a port, installing `rule` if `enable` is set.
    ChangePortForwarding {
        interface_id: u32,
        rule: ForwardedPort,
        enable: bool,
    },
}

impl Request {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Request::ControlDump { .. } => "control_dump",
            Request::ChangeInterfaceAddress { .. } => "change_interface_address",
            Request::ChangePortForwarding { .. } => "change_port_forwarding",
        }
    }
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    pub message: String,
}

impl Reply {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Serialize `message`, prefixed with its length.
///
/// # Errors
///
/// Fails if serialization fails or the document exceeds [`MAX_MESSAGE_SIZE`].
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>, MgmtError> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_MESSAGE_SIZE)
        .ok_or(MgmtError::TooLarge(body.len()))?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Deserialize a message body, without its length prefix.
///
/// # Errors
///
/// Fails if the body is not a valid document of type `T`.
pub fn decode_message<T: DeserializeOwned>(body: &[u8]) -> Result<T, MgmtError> {
    Ok(serde_json::from_slice(body)?)
}

/// Length announced by a prefix, checked against [`MAX_MESSAGE_SIZE`].
pub(crate) fn message_len(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, MgmtError> {
    let len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
    if len > MAX_MESSAGE_SIZE {
        return Err(MgmtError::TooLarge(len));
    }
    Ok(len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_wire_format() {
        let json = r#"{"type":"change_port_forwarding","interface_id":1,
            "rule":{"port":8080,"destination":"10.0.0.9:80","protocol":"TCP"},"enable":true}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        let Request::ChangePortForwarding {
            interface_id,
            rule,
            enable,
        } = &request
        else {
            unreachable!("decoded {request:?}");
        };
        assert_eq!(*interface_id, 1);
        assert_eq!(rule.to_string(), "TCP:8080 -> 10.0.0.9:80");
        assert!(*enable);
        assert_eq!(request.name(), "change_port_forwarding");

        let dump: Request =
            serde_json::from_str(r#"{"type":"control_dump","enable":false,"trace_type":"KNI"}"#)
                .unwrap();
        assert_eq!(
            dump,
            Request::ControlDump {
                enable: false,
                trace_type: TraceKind::Kni
            }
        );
        assert_eq!(dump.name(), "control_dump");
        assert!(
            serde_json::from_str::<Request>(r#"{"type":"control_dump","trace_type":"ALL"}"#)
                .is_err()
        );
    }

    #[test]
    fn framing() {
        let reply = Reply::success("Success");
        let buf = encode_message(&reply).unwrap();
        let prefix: [u8; LENGTH_PREFIX_SIZE] = buf[..LENGTH_PREFIX_SIZE].try_into().unwrap();
        let len = message_len(prefix).unwrap();
        assert_eq!(len, buf.len() - LENGTH_PREFIX_SIZE);
        let decoded: Reply = decode_message(&buf[LENGTH_PREFIX_SIZE..]).unwrap();
        assert_eq!(decoded, reply);

        assert!(matches!(
            message_len(u32::MAX.to_be_bytes()),
            Err(MgmtError::TooLarge(_))
        ));
    }
}
