//! Protocol dispatch state machine.
//!
//! The engine is a pure message-classification-and-reaction loop: inbound
//! datagrams mutate the gateway/device registries, may trigger follow-up
//! commands (a `get_id_list` after an `iam`, one `read` per device after a
//! `get_id_list_ack`), and are forwarded to message observers. There is no
//! retry, no timeout and no delivery guarantee anywhere; the registries are a
//! best-effort cache of a live, eventually-consistent network view.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::{Map, Value, json};

use crate::cipher;
use crate::config::{GatewayCredentials, ServiceConfig};
use crate::device::{Device, DeviceRegistry, DeviceUpdate};
use crate::device_map::DeviceMap;
use crate::errors::Error;
use crate::gateway::{Gateway, GatewayRegistry, GatewayUpdate};
use crate::message::{Command, GATEWAY_MODEL, Message};
use crate::transport::Transport;

type Result<T> = std::result::Result<T, Error>;

/// Observer invoked when a synchronization round completes (every announced
/// device has been read back).
pub type ReadyCallback = Box<dyn Fn(&Message) + Send + 'static>;

/// Observer invoked for every successfully decoded inbound message,
/// independent of how the engine reacted to it.
pub type MessageCallback = Box<dyn Fn(&Message) + Send + 'static>;

/// Registries and sync-progress tracking, guarded as one unit so merge
/// updates and list replacements are atomic with respect to reads.
#[derive(Default)]
struct EngineState {
    gateways: GatewayRegistry,
    devices: DeviceRegistry,
    device_map: DeviceMap,
    /// Device sids announced in an id list whose `read_ack` is still
    /// outstanding. A set rather than a counter, so duplicate acks cannot
    /// drive the balance negative and cannot re-fire the ready observers.
    pending_reads: HashSet<String>,
}

/// The protocol engine: owns all registries, reacts to inbound traffic and
/// issues commands through the [`Transport`].
///
/// Datagrams are expected to arrive one at a time (the service's listener
/// thread guarantees this); all shared state sits behind a single mutex.
pub struct ProtocolEngine {
    state: Mutex<EngineState>,
    transport: Arc<dyn Transport>,
    config: ServiceConfig,
    on_ready: Mutex<Vec<ReadyCallback>>,
    on_message: Mutex<Vec<MessageCallback>>,
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine").finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    /// Build an engine seeded with the caller's gateway credentials.
    ///
    /// Credentials with an empty sid or password are rejected up front; a
    /// bad secret discovered only at write time would be much harder to
    /// diagnose.
    pub fn new(
        gateways: Vec<GatewayCredentials>,
        config: ServiceConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let mut state = EngineState::default();
        for credentials in gateways {
            if credentials.sid.is_empty() {
                return Err(Error::InvalidCredentials("empty sid".into()));
            }
            if credentials.password.is_empty() {
                return Err(Error::InvalidCredentials(format!(
                    "empty password for gateway {}",
                    credentials.sid
                )));
            }
            state.gateways.add_or_update(
                &credentials.sid,
                &GatewayUpdate {
                    password: Some(credentials.password),
                    iv: Some(credentials.iv.unwrap_or(config.iv)),
                    ..Default::default()
                },
            );
        }
        Ok(ProtocolEngine {
            state: Mutex::new(state),
            transport,
            config,
            on_ready: Mutex::new(Vec::new()),
            on_message: Mutex::new(Vec::new()),
        })
    }

    /// Register an observer for the "fully synchronized" milestone.
    pub fn on_ready<F: Fn(&Message) + Send + 'static>(&self, callback: F) {
        self.on_ready.lock().unwrap().push(Box::new(callback));
    }

    /// Register an observer for every decoded inbound message.
    pub fn on_message<F: Fn(&Message) + Send + 'static>(&self, callback: F) {
        self.on_message.lock().unwrap().push(Box::new(callback));
    }

    /// Classify and apply one inbound datagram.
    ///
    /// Decode failures of either envelope layer are logged and discarded;
    /// nothing mutates and nothing propagates past this boundary.
    pub fn handle_datagram(&self, raw: &[u8], source: SocketAddr) {
        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!("discarding malformed datagram from {source}: {err}");
                return;
            }
        };
        debug!("received {} from {source}", message.cmd);
        self.dispatch(&message);
        for callback in self.on_message.lock().unwrap().iter() {
            callback(&message);
        }
    }

    fn dispatch(&self, message: &Message) {
        let Some(command) = message.command() else {
            debug!("ignoring unknown command tag {:?}", message.cmd);
            return;
        };
        match command {
            Command::Iam => self.handle_iam(message),
            Command::GetIdListAck => self.handle_id_list_ack(message),
            Command::Report | Command::WriteAck | Command::Heartbeat => {
                self.apply_routed_update(message);
            }
            Command::ReadAck => self.handle_read_ack(message),
            // Reserved by the firmware; nothing to do yet.
            Command::ServerAck => {}
            // Tags this side only ever sends.
            Command::Whois | Command::GetIdList | Command::Read | Command::Write => {}
        }
    }

    /// `iam`: learn the gateway's address, then ask for its device list.
    fn handle_iam(&self, message: &Message) {
        let Some(sid) = message.sid.as_deref() else {
            return;
        };
        let address = {
            let mut state = self.state.lock().unwrap();
            state
                .gateways
                .add_or_update(sid, &GatewayUpdate::from_message(message));
            state.gateways.get(sid).and_then(Gateway::address)
        };
        let Some((ip, port)) = address else {
            return;
        };
        if let Err(err) = self.send_command(ip, port, json!({"cmd": Command::GetIdList.as_ref()}))
        {
            warn!("could not request id list from gateway {sid}: {err}");
        }
    }

    /// `get_id_list_ack`: replace the gateway's device list, then read every
    /// announced device once.
    fn handle_id_list_ack(&self, message: &Message) {
        let Some(sid) = message.sid.as_deref() else {
            return;
        };
        let device_sids = message.device_sids();
        let address = {
            let mut state = self.state.lock().unwrap();
            state
                .gateways
                .add_or_update(sid, &GatewayUpdate::from_message(message));
            state
                .device_map
                .set_device_list(sid, device_sids.clone());
            state.pending_reads.extend(device_sids.iter().cloned());
            state.gateways.get(sid).and_then(Gateway::address)
        };
        let Some((ip, port)) = address else {
            return;
        };
        for device_sid in &device_sids {
            let command = json!({"cmd": Command::Read.as_ref(), "sid": device_sid});
            if let Err(err) = self.send_command(ip, port, command) {
                warn!("could not read device {device_sid}: {err}");
            }
        }
    }

    /// `read_ack`: routed update plus sync-progress bookkeeping.
    fn handle_read_ack(&self, message: &Message) {
        let Some(sid) = message.sid.clone() else {
            return;
        };
        let drained = {
            let mut state = self.state.lock().unwrap();
            Self::route_update(&mut state, message);
            // Only an ack we were actually waiting for can complete a round.
            state.pending_reads.remove(&sid) && state.pending_reads.is_empty()
        };
        if drained {
            for callback in self.on_ready.lock().unwrap().iter() {
                callback(message);
            }
        }
    }

    fn apply_routed_update(&self, message: &Message) {
        let mut state = self.state.lock().unwrap();
        Self::route_update(&mut state, message);
    }

    /// Route a `report`-family message to the gateway or device registry by
    /// its `model`. Gateway updates here are update-only: a gateway unknown
    /// to the registry stays unknown until it answers a `whois`.
    fn route_update(state: &mut EngineState, message: &Message) {
        let Some(sid) = message.sid.as_deref() else {
            return;
        };
        if message.model.as_deref() == Some(GATEWAY_MODEL) {
            state.gateways.update(sid, &GatewayUpdate::from_message(message));
        } else {
            state
                .devices
                .add_or_update(sid, &DeviceUpdate::from_message(message));
        }
    }

    /// Multicast a discovery probe. Unencrypted and fire-and-forget: every
    /// reachable gateway answers with an `iam`.
    pub fn send_whois(&self) -> Result<()> {
        self.send_command(
            self.config.multicast_address,
            self.config.multicast_port,
            json!({"cmd": Command::Whois.as_ref()}),
        )
    }

    /// Ask a gateway for its sub-device id list.
    pub fn request_id_list(&self, gateway_sid: &str) -> Result<()> {
        let (ip, port) = self.gateway_address(gateway_sid)?;
        self.send_command(ip, port, json!({"cmd": Command::GetIdList.as_ref()}))
    }

    /// Ask for the current state of a gateway or sub-device.
    ///
    /// For sub-devices the command goes to the owning gateway, as recorded by
    /// the last id list it announced.
    pub fn read_device(&self, sid: &str) -> Result<()> {
        let (ip, port) = {
            let state = self.state.lock().unwrap();
            let gateway_sid = if state.gateways.get(sid).is_some() {
                sid
            } else {
                state
                    .device_map
                    .gateway_for_device(sid)
                    .ok_or_else(|| Error::DeviceNotMapped(sid.to_string()))?
            };
            Self::address_of(&state, gateway_sid)?
        };
        self.send_command(ip, port, json!({"cmd": Command::Read.as_ref(), "sid": sid}))
    }

    /// Authorized write to a gateway itself (light, speaker, ...).
    ///
    /// `data` must be a JSON object; the derived `key` field is appended to
    /// it. Fails if the gateway has no address, password or token yet.
    pub fn write_gateway(&self, gateway_sid: &str, data: Value) -> Result<()> {
        self.write(gateway_sid, gateway_sid, Some(GATEWAY_MODEL.to_string()), None, data)
    }

    /// Authorized write to a sub-device, routed through its owning gateway.
    pub fn write_device(&self, device_sid: &str, data: Value) -> Result<()> {
        let (gateway_sid, model, short_id) = {
            let state = self.state.lock().unwrap();
            let device = state
                .devices
                .get(device_sid)
                .ok_or_else(|| Error::DeviceNotFound(device_sid.to_string()))?;
            let gateway_sid = state
                .device_map
                .gateway_for_device(device_sid)
                .ok_or_else(|| Error::DeviceNotMapped(device_sid.to_string()))?;
            (
                gateway_sid.to_string(),
                device.model().map(String::from),
                device.short_id(),
            )
        };
        self.write(&gateway_sid, device_sid, model, short_id, data)
    }

    /// Play a tone on a gateway's speaker.
    ///
    /// `mid` selects the tone (10000 mutes), `vol` the volume.
    pub fn play_tone(&self, gateway_sid: &str, mid: u16, vol: u8) -> Result<()> {
        self.write_gateway(gateway_sid, json!({"mid": mid, "vol": vol}))
    }

    fn write(
        &self,
        gateway_sid: &str,
        target_sid: &str,
        model: Option<String>,
        short_id: Option<u32>,
        data: Value,
    ) -> Result<()> {
        let Value::Object(mut data) = data else {
            return Err(Error::InvalidWritePayload);
        };
        let (ip, port, key) = {
            let state = self.state.lock().unwrap();
            let gateway = state
                .gateways
                .get(gateway_sid)
                .ok_or_else(|| Error::GatewayNotFound(gateway_sid.to_string()))?;
            let (ip, port) = gateway
                .address()
                .ok_or_else(|| Error::AddressNotLearned(gateway_sid.to_string()))?;
            let token = gateway
                .token()
                .ok_or_else(|| Error::TokenNotLearned(gateway_sid.to_string()))?;
            let password = gateway
                .password()
                .ok_or_else(|| Error::PasswordNotSet(gateway_sid.to_string()))?;
            (ip, port, cipher::write_key(token, password, gateway.iv()))
        };
        data.insert("key".to_string(), Value::String(key));

        let mut envelope = Map::new();
        envelope.insert("cmd".into(), Command::Write.as_ref().into());
        if let Some(model) = model {
            envelope.insert("model".into(), model.into());
        }
        envelope.insert("sid".into(), target_sid.into());
        if let Some(short_id) = short_id {
            envelope.insert("short_id".into(), short_id.into());
        }
        envelope.insert("data".into(), Value::Object(data));
        self.send_command(ip, port, Value::Object(envelope))
    }

    fn send_command(&self, ip: Ipv4Addr, port: u16, command: Value) -> Result<()> {
        let payload = serde_json::to_vec(&command).map_err(Error::JsonDump)?;
        debug!("sending {command} to {ip}:{port}");
        self.transport.send(ip, port, &payload)
    }

    fn gateway_address(&self, gateway_sid: &str) -> Result<(Ipv4Addr, u16)> {
        let state = self.state.lock().unwrap();
        Self::address_of(&state, gateway_sid)
    }

    fn address_of(state: &EngineState, gateway_sid: &str) -> Result<(Ipv4Addr, u16)> {
        state
            .gateways
            .get(gateway_sid)
            .ok_or_else(|| Error::GatewayNotFound(gateway_sid.to_string()))?
            .address()
            .ok_or_else(|| Error::AddressNotLearned(gateway_sid.to_string()))
    }

    // Snapshot accessors. All clone out of the mutex so callers never hold
    // the engine's lock.

    pub fn gateway(&self, sid: &str) -> Option<Gateway> {
        self.state.lock().unwrap().gateways.get(sid).cloned()
    }

    pub fn gateways(&self) -> Vec<Gateway> {
        self.state.lock().unwrap().gateways.list().cloned().collect()
    }

    pub fn device(&self, sid: &str) -> Option<Device> {
        self.state.lock().unwrap().devices.get(sid).cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state.lock().unwrap().devices.list().cloned().collect()
    }

    pub fn devices_by_model(&self, model: &str) -> Vec<Device> {
        self.state
            .lock()
            .unwrap()
            .devices
            .by_model(model)
            .cloned()
            .collect()
    }

    /// The devices claimed by a gateway's last announced id list.
    pub fn devices_for_gateway(&self, gateway_sid: &str) -> Vec<Device> {
        let state = self.state.lock().unwrap();
        state
            .device_map
            .device_sids(gateway_sid)
            .unwrap_or_default()
            .iter()
            .filter_map(|sid| state.devices.get(sid).cloned())
            .collect()
    }

    pub fn devices_for_gateway_and_model(&self, gateway_sid: &str, model: &str) -> Vec<Device> {
        self.devices_for_gateway(gateway_sid)
            .into_iter()
            .filter(|device| device.model() == Some(model))
            .collect()
    }

    pub fn gateway_for_device(&self, device_sid: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .device_map
            .gateway_for_device(device_sid)
            .map(String::from)
    }

    /// Snapshot of the gateway-to-device map.
    pub fn device_map(&self) -> std::collections::HashMap<String, Vec<String>> {
        self.state.lock().unwrap().device_map.all().clone()
    }

    /// Number of device reads still outstanding in the current sync round.
    pub fn pending_reads(&self) -> usize {
        self.state.lock().unwrap().pending_reads.len()
    }

    /// Drop a gateway and its device associations.
    pub fn remove_gateway(&self, gateway_sid: &str) {
        let mut state = self.state.lock().unwrap();
        state.gateways.remove(gateway_sid);
        state.device_map.remove(gateway_sid);
    }

    /// Drop a device record.
    pub fn remove_device(&self, device_sid: &str) {
        self.state.lock().unwrap().devices.remove(device_sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every outbound command instead of touching a socket.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Ipv4Addr, u16, Value)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(Ipv4Addr, u16, Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, ip: Ipv4Addr, port: u16, payload: &[u8]) -> Result<()> {
            let command = serde_json::from_slice(payload).unwrap();
            self.sent.lock().unwrap().push((ip, port, command));
            Ok(())
        }
    }

    const GW: &str = "7811dcb28d61";
    const SOURCE: &str = "192.168.1.80:4321";

    fn engine() -> (Arc<RecordingTransport>, ProtocolEngine) {
        let transport = Arc::new(RecordingTransport::default());
        let engine = ProtocolEngine::new(
            vec![GatewayCredentials::new(GW, "o9el4bdmb1pu0r8q")],
            ServiceConfig::default(),
            transport.clone(),
        )
        .unwrap();
        (transport, engine)
    }

    fn feed(engine: &ProtocolEngine, raw: &str) {
        engine.handle_datagram(raw.as_bytes(), SOURCE.parse().unwrap());
    }

    fn iam(engine: &ProtocolEngine) {
        feed(
            engine,
            &format!(
                r#"{{"cmd":"iam","sid":"{GW}","ip":"192.168.1.80","port":"9898","model":"gateway"}}"#
            ),
        );
    }

    fn id_list(engine: &ProtocolEngine, sids: &[&str]) {
        let inner = sids
            .iter()
            .map(|s| format!("\\\"{s}\\\""))
            .collect::<Vec<_>>()
            .join(",");
        feed(
            engine,
            &format!(
                r#"{{"cmd":"get_id_list_ack","sid":"{GW}","token":"1234567890abcdef","data":"[{inner}]"}}"#
            ),
        );
    }

    fn read_ack(engine: &ProtocolEngine, sid: &str) {
        feed(
            engine,
            &format!(
                r#"{{"cmd":"read_ack","model":"magnet","sid":"{sid}","short_id":4343,"data":"{{\"status\":\"open\"}}"}}"#
            ),
        );
    }

    #[test]
    fn test_rejects_malformed_credentials() {
        let transport = Arc::new(RecordingTransport::default());
        let err = ProtocolEngine::new(
            vec![GatewayCredentials::new("", "pw")],
            ServiceConfig::default(),
            transport,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));
    }

    #[test]
    fn test_iam_learns_address_and_requests_id_list() {
        let (transport, engine) = engine();
        iam(&engine);

        let gateway = engine.gateway(GW).unwrap();
        assert_eq!(
            gateway.address(),
            Some((Ipv4Addr::new(192, 168, 1, 80), 9898))
        );
        // Password from the credentials survived the merge.
        assert_eq!(gateway.password(), Some("o9el4bdmb1pu0r8q"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Ipv4Addr::new(192, 168, 1, 80));
        assert_eq!(sent[0].1, 9898);
        assert_eq!(sent[0].2["cmd"], "get_id_list");
    }

    #[test]
    fn test_iam_creates_unknown_gateway() {
        let (_, engine) = engine();
        feed(
            &engine,
            r#"{"cmd":"iam","sid":"aabbccddeeff","ip":"192.168.1.90","port":"9898"}"#,
        );
        assert!(engine.gateway("aabbccddeeff").is_some());
    }

    #[test]
    fn test_id_list_triggers_one_read_per_device() {
        let (transport, engine) = engine();
        iam(&engine);
        id_list(&engine, &["d1", "d2", "d3"]);

        assert_eq!(engine.pending_reads(), 3);
        assert_eq!(engine.device_map()[GW], vec!["d1", "d2", "d3"]);
        assert_eq!(engine.gateway(GW).unwrap().token(), Some("1234567890abcdef"));

        let sent = transport.sent();
        let reads: Vec<&Value> = sent
            .iter()
            .map(|(_, _, command)| command)
            .filter(|command| command["cmd"] == "read")
            .collect();
        assert_eq!(reads.len(), 3);
        assert_eq!(reads[0]["sid"], "d1");
        assert_eq!(reads[2]["sid"], "d3");
    }

    #[test]
    fn test_ready_fires_exactly_once_per_round() {
        let (_, engine) = engine();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        engine.on_ready(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        iam(&engine);
        id_list(&engine, &["d1", "d2", "d3"]);

        read_ack(&engine, "d1");
        read_ack(&engine, "d2");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        read_ack(&engine, "d3");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pending_reads(), 0);

        // A duplicate ack neither underflows nor re-fires.
        read_ack(&engine, "d3");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pending_reads(), 0);
    }

    #[test]
    fn test_read_ack_populates_device() {
        let (_, engine) = engine();
        iam(&engine);
        id_list(&engine, &["d1"]);
        read_ack(&engine, "d1");

        let device = engine.device("d1").unwrap();
        assert_eq!(device.model(), Some("magnet"));
        assert_eq!(device.short_id(), Some(4343));
        assert_eq!(device.data()["status"], "open");
        assert_eq!(engine.gateway_for_device("d1").as_deref(), Some(GW));
        assert_eq!(engine.devices_for_gateway(GW).len(), 1);
        assert_eq!(engine.devices_for_gateway_and_model(GW, "magnet").len(), 1);
        assert_eq!(engine.devices_by_model("motion").len(), 0);
    }

    #[test]
    fn test_heartbeat_rotates_gateway_token() {
        let (_, engine) = engine();
        iam(&engine);
        id_list(&engine, &[]);
        feed(
            &engine,
            &format!(
                r#"{{"cmd":"heartbeat","model":"gateway","sid":"{GW}","token":"fedcba0987654321","data":"{{\"ip\":\"192.168.1.80\"}}"}}"#
            ),
        );
        assert_eq!(engine.gateway(GW).unwrap().token(), Some("fedcba0987654321"));
    }

    #[test]
    fn test_report_creates_device() {
        let (_, engine) = engine();
        feed(
            &engine,
            r#"{"cmd":"report","model":"motion","sid":"d9","data":"{\"status\":\"motion\"}"}"#,
        );
        assert_eq!(engine.device("d9").unwrap().model(), Some("motion"));
    }

    #[test]
    fn test_gateway_report_for_unknown_sid_is_ignored() {
        let (_, engine) = engine();
        feed(
            &engine,
            r#"{"cmd":"report","model":"gateway","sid":"unknown","data":"{\"rgb\":0}"}"#,
        );
        assert!(engine.gateway("unknown").is_none());
    }

    #[test]
    fn test_malformed_datagram_mutates_nothing() {
        let (transport, engine) = engine();
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        engine.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed(&engine, "{not json");
        feed(&engine, r#"{"cmd":"report","sid":"d1","data":"{broken"}"#);

        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert!(engine.device("d1").is_none());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_unknown_tag_is_observed_but_inert() {
        let (transport, engine) = engine();
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        engine.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed(&engine, r#"{"cmd":"mystery","sid":"d1"}"#);

        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert!(engine.device("d1").is_none());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_write_before_token_fails() {
        let (_, engine) = engine();
        iam(&engine);
        let err = engine.write_gateway(GW, json!({"rgb": 0})).unwrap_err();
        assert!(matches!(err, Error::TokenNotLearned(_)));
    }

    #[test]
    fn test_write_attaches_derived_key() {
        let (transport, engine) = engine();
        iam(&engine);
        id_list(&engine, &[]);

        engine.write_gateway(GW, json!({"rgb": 1690091776u32})).unwrap();

        let (_, _, command) = transport.sent().pop().unwrap();
        assert_eq!(command["cmd"], "write");
        assert_eq!(command["model"], "gateway");
        assert_eq!(command["sid"], GW);
        assert_eq!(command["data"]["rgb"], 1690091776u32);
        let expected =
            cipher::write_key("1234567890abcdef", "o9el4bdmb1pu0r8q", &crate::config::DEFAULT_IV);
        assert_eq!(command["data"]["key"], Value::String(expected.clone()));

        // Same inputs, same key.
        engine.write_gateway(GW, json!({"rgb": 0})).unwrap();
        let (_, _, again) = transport.sent().pop().unwrap();
        assert_eq!(again["data"]["key"], Value::String(expected.clone()));

        // A rotated token changes the key.
        feed(
            &engine,
            &format!(
                r#"{{"cmd":"heartbeat","model":"gateway","sid":"{GW}","token":"fedcba0987654321","data":"{{}}"}}"#
            ),
        );
        engine.write_gateway(GW, json!({"rgb": 0})).unwrap();
        let (_, _, rotated) = transport.sent().pop().unwrap();
        assert_ne!(rotated["data"]["key"], Value::String(expected));
    }

    #[test]
    fn test_write_device_routes_through_owning_gateway() {
        let (transport, engine) = engine();
        iam(&engine);
        id_list(&engine, &["d1"]);
        read_ack(&engine, "d1");

        engine.write_device("d1", json!({"status": "close"})).unwrap();

        let (ip, port, command) = transport.sent().pop().unwrap();
        assert_eq!((ip, port), (Ipv4Addr::new(192, 168, 1, 80), 9898));
        assert_eq!(command["cmd"], "write");
        assert_eq!(command["model"], "magnet");
        assert_eq!(command["sid"], "d1");
        assert_eq!(command["short_id"], 4343);
        assert!(command["data"]["key"].is_string());
    }

    #[test]
    fn test_write_requires_object_payload() {
        let (_, engine) = engine();
        iam(&engine);
        id_list(&engine, &[]);
        let err = engine.write_gateway(GW, json!([1, 2])).unwrap_err();
        assert_eq!(err, Error::InvalidWritePayload);
    }

    #[test]
    fn test_play_tone_is_a_write() {
        let (transport, engine) = engine();
        iam(&engine);
        id_list(&engine, &[]);

        engine.play_tone(GW, 10004, 10).unwrap();

        let (_, _, command) = transport.sent().pop().unwrap();
        assert_eq!(command["cmd"], "write");
        assert_eq!(command["data"]["mid"], 10004);
        assert_eq!(command["data"]["vol"], 10);
    }

    #[test]
    fn test_whois_goes_to_multicast_group() {
        let (transport, engine) = engine();
        engine.send_whois().unwrap();
        let (ip, port, command) = transport.sent().pop().unwrap();
        assert_eq!(ip, Ipv4Addr::new(224, 0, 0, 50));
        assert_eq!(port, 4321);
        assert_eq!(command, json!({"cmd": "whois"}));
    }

    #[test]
    fn test_remove_gateway_drops_map_entry() {
        let (_, engine) = engine();
        iam(&engine);
        id_list(&engine, &["d1"]);
        engine.remove_gateway(GW);
        assert!(engine.gateway(GW).is_none());
        assert!(engine.gateway_for_device("d1").is_none());
    }
}
