//! Wire message envelope and command tags.
//!
//! All gateway traffic is UTF-8 JSON over UDP. Inbound envelopes carry a
//! `data` field that is itself a JSON-encoded *string*, so decoding is a
//! two-pass affair; outbound envelopes embed `data` as a plain object and are
//! serialized once.

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use strum_macros::{AsRefStr, EnumString};

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Model string gateways use for themselves in `report`-family messages.
pub const GATEWAY_MODEL: &str = "gateway";

/// Command tags of the gateway protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    /// Multicast discovery probe (outbound, unencrypted).
    Whois,
    /// Discovery reply carrying the gateway's address.
    Iam,
    /// Request for a gateway's sub-device id list (outbound).
    GetIdList,
    /// Reply carrying the sub-device id list.
    GetIdListAck,
    /// Request for a device's current state (outbound).
    Read,
    /// Reply to a `read`.
    ReadAck,
    /// Authorized state change (outbound).
    Write,
    /// Reply to a `write`.
    WriteAck,
    /// Unsolicited state-change report.
    Report,
    /// Periodic keep-alive; gateway heartbeats rotate the token.
    Heartbeat,
    /// Generic gateway reply, e.g. to a command it could not parse.
    ServerAck,
}

/// A decoded inbound envelope.
///
/// Every field except `cmd` is optional on the wire; gateways are not
/// consistent about which ones they include per command. `port` arrives as a
/// decimal string and `short_id` as either a number or a string, hence the
/// `serde_with` conversions.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Raw command tag. See [`Message::command`] for the typed form.
    pub cmd: String,
    /// Device class, e.g. `"gateway"`, `"magnet"`, `"motion"`.
    #[serde(default)]
    pub model: Option<String>,
    /// Identity of the gateway or sub-device the message concerns.
    #[serde(default)]
    pub sid: Option<String>,
    /// Short-form mesh identity of a sub-device.
    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub short_id: Option<u32>,
    /// Rotating write-authorization token (gateway messages only).
    #[serde(default)]
    pub token: Option<String>,
    /// Gateway IP address, announced in `iam` replies.
    #[serde(default)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub ip: Option<Ipv4Addr>,
    /// Gateway command port, announced in `iam` replies.
    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub port: Option<u16>,
    /// Nested payload, already re-parsed from its string encoding.
    #[serde(default)]
    pub data: Option<Value>,
}

impl Message {
    /// Decode a raw datagram.
    ///
    /// The outer envelope is parsed first; if `data` turns out to be a
    /// JSON-encoded string, it is parsed a second time. A failure in either
    /// pass fails the whole decode.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = String::from_utf8(raw.to_vec()).map_err(Error::Utf8Decode)?;
        let mut message: Message = serde_json::from_str(&text).map_err(Error::JsonLoad)?;
        if let Some(Value::String(inner)) = &message.data {
            message.data = Some(serde_json::from_str(inner).map_err(Error::JsonLoad)?);
        }
        Ok(message)
    }

    /// The typed command tag, or `None` for tags this crate does not know.
    pub fn command(&self) -> Option<Command> {
        Command::from_str(&self.cmd).ok()
    }

    /// The sub-device ids of a `get_id_list_ack` payload.
    ///
    /// Non-string entries are skipped; anything other than an array yields an
    /// empty list.
    pub fn device_sids(&self) -> Vec<String> {
        self.data
            .as_ref()
            .and_then(Value::as_array)
            .map(|sids| {
                sids.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}
