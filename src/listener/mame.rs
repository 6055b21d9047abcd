//! MAME output protocol state
//!
//! The emulator announces itself with `Start`, streams `UpdateState(id, value)`
//! messages and answers `GetIDString` requests with `WM_COPYDATA` packets
//! carrying the output's name. This module turns those messages into
//! payloads and follow-up requests; the window plumbing lives in `win32`.

use super::packet::RawPayload;
use serde_json::json;
use std::collections::HashMap;

/// Key carrying the running game's name
pub const GAME_NAME_KEY: &str = "__GAME_NAME__";
/// Published when the emulator starts a game
pub const MAME_START_KEY: &str = "__MAME_START__";
/// Published when the emulator stops
pub const MAME_STOP_KEY: &str = "__MAME_STOP__";

/// `dwData` tag of id+label copy-data packets
const COPYDATA_ID_STRING: usize = 1;

/// Stable key for an output id
pub fn output_key(id: u32) -> String {
    if id == 0 {
        GAME_NAME_KEY.to_string()
    } else {
        format!("id_{}", id)
    }
}

/// A message received from the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MameMessage<'a> {
    Start,
    Stop,
    Register { id: u32 },
    Update { id: u32, value: i32 },
    Unregister { id: u32 },
    CopyData { kind: usize, bytes: &'a [u8] },
}

/// Something to ask the emulator in response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MameRequest {
    /// Register this client for updates
    Register,
    /// Ask for the name of one output, or all of them for id 0
    IdString(u32),
}

/// What handling one message produced
#[derive(Debug, Default, PartialEq)]
pub struct MameReaction {
    pub payloads: Vec<RawPayload>,
    pub requests: Vec<MameRequest>,
}

/// Tracks the emulator session and known output names
#[derive(Debug, Default)]
pub struct MameProtocol {
    labels: HashMap<u32, String>,
    connected: bool,
}

impl MameProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn handle(&mut self, message: MameMessage<'_>) -> MameReaction {
        let mut reaction = MameReaction::default();
        match message {
            MameMessage::Start => {
                self.connected = true;
                self.labels.clear();
                reaction.payloads.push(value(MAME_START_KEY, 1));
                reaction.requests.push(MameRequest::Register);
                reaction.requests.push(MameRequest::IdString(0));
            }
            MameMessage::Stop => {
                self.connected = false;
                reaction.payloads.push(value(MAME_STOP_KEY, 0));
            }
            MameMessage::Register { id } => {
                reaction.requests.push(MameRequest::IdString(id));
            }
            MameMessage::Update { id, value: v } => {
                if id != 0 && self.connected && !self.labels.contains_key(&id) {
                    reaction.requests.push(MameRequest::IdString(id));
                }
                reaction.payloads.push(value(&output_key(id), v));
            }
            MameMessage::Unregister { id } => {
                self.labels.remove(&id);
            }
            MameMessage::CopyData { kind, bytes } => self.copy_data(kind, bytes, &mut reaction),
        }
        reaction
    }

    fn copy_data(&mut self, kind: usize, bytes: &[u8], reaction: &mut MameReaction) {
        if kind == COPYDATA_ID_STRING && bytes.len() > 4 {
            let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let name = until_nul(&bytes[4..]);

            if id == 0 {
                reaction
                    .payloads
                    .push(json!({ "key": GAME_NAME_KEY, "text": name }).into());
                reaction.payloads.push(value(GAME_NAME_KEY, 0));
            } else {
                let key = output_key(id);
                let is_new = self.labels.insert(id, name.clone()).is_none();
                reaction
                    .payloads
                    .push(json!({ "key": key, "label": name }).into());
                if is_new {
                    reaction.payloads.push(value(&key, 0));
                }
            }
            return;
        }

        if bytes.len() > 3 {
            reaction.payloads.push(RawPayload::Text(until_nul(bytes)));
        } else {
            tracing::debug!("Ignoring {}-byte copy-data packet", bytes.len());
        }
    }
}

fn value(key: &str, value: i32) -> RawPayload {
    json!({ "key": key, "value": value }).into()
}

fn until_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::packet::{decode, Packet};
    use crate::types::OutputValue;

    fn id_string(id: u32, name: &str) -> Vec<u8> {
        let mut bytes = id.to_le_bytes().to_vec();
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes
    }

    fn packets(reaction: &MameReaction) -> Vec<Packet> {
        reaction.payloads.iter().map(|p| decode(p).unwrap()).collect()
    }

    #[test]
    fn test_start_requests_registration_and_names() {
        let mut protocol = MameProtocol::new();
        let reaction = protocol.handle(MameMessage::Start);
        assert_eq!(
            packets(&reaction),
            vec![Packet::Value {
                key: MAME_START_KEY.into(),
                value: OutputValue::Integer(1)
            }]
        );
        assert_eq!(
            reaction.requests,
            vec![MameRequest::Register, MameRequest::IdString(0)]
        );
    }

    #[test]
    fn test_update_for_unknown_id_asks_for_name() {
        let mut protocol = MameProtocol::new();
        protocol.handle(MameMessage::Start);

        let reaction = protocol.handle(MameMessage::Update { id: 7, value: 1 });
        assert_eq!(reaction.requests, vec![MameRequest::IdString(7)]);
        assert_eq!(packets(&reaction)[0].key(), "id_7");

        let bytes = id_string(7, "lamp0");
        protocol.handle(MameMessage::CopyData { kind: 1, bytes: &bytes });
        let reaction = protocol.handle(MameMessage::Update { id: 7, value: 0 });
        assert!(reaction.requests.is_empty());
    }

    #[test]
    fn test_id_string_binds_label_and_seeds_once() {
        let mut protocol = MameProtocol::new();
        let bytes = id_string(3, "start_lamp");

        let first = protocol.handle(MameMessage::CopyData { kind: 1, bytes: &bytes });
        assert_eq!(
            packets(&first),
            vec![
                Packet::Label {
                    key: "id_3".into(),
                    label: "start_lamp".into()
                },
                Packet::Value {
                    key: "id_3".into(),
                    value: OutputValue::Integer(0)
                },
            ]
        );

        let again = protocol.handle(MameMessage::CopyData { kind: 1, bytes: &bytes });
        assert_eq!(again.payloads.len(), 1);
        assert_eq!(protocol.label(3), Some("start_lamp"));
    }

    #[test]
    fn test_game_name_packet() {
        let mut protocol = MameProtocol::new();
        let bytes = id_string(0, "outrun");
        let reaction = protocol.handle(MameMessage::CopyData { kind: 1, bytes: &bytes });
        assert_eq!(
            packets(&reaction)[0],
            Packet::Label {
                key: GAME_NAME_KEY.into(),
                label: "outrun".into()
            }
        );
    }

    #[test]
    fn test_plain_copy_data_is_text() {
        let mut protocol = MameProtocol::new();
        let reaction = protocol.handle(MameMessage::CopyData {
            kind: 0,
            bytes: b"lamp2=1\0",
        });
        assert_eq!(reaction.payloads, vec![RawPayload::Text("lamp2=1".into())]);

        let short = protocol.handle(MameMessage::CopyData { kind: 0, bytes: b"a=1" });
        assert!(short.payloads.is_empty());
    }

    #[test]
    fn test_unregister_forgets_label() {
        let mut protocol = MameProtocol::new();
        let bytes = id_string(4, "coin");
        protocol.handle(MameMessage::CopyData { kind: 1, bytes: &bytes });
        protocol.handle(MameMessage::Unregister { id: 4 });
        assert_eq!(protocol.label(4), None);
    }
}
