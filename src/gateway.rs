//! Gateway entity and registry.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::config::DEFAULT_IV;
use crate::message::Message;

/// One physical gateway.
///
/// Created when a discovery or command reply first introduces an unknown
/// `sid`, or up front from caller credentials. The `sid` is immutable; every
/// other field is learned and re-learned from live traffic via
/// [`Gateway::apply`].
#[derive(Debug, Clone)]
pub struct Gateway {
    sid: String,
    ip: Option<Ipv4Addr>,
    port: Option<u16>,
    token: Option<String>,
    password: Option<String>,
    iv: [u8; 16],
}

impl Gateway {
    pub fn new(sid: &str) -> Self {
        Gateway {
            sid: sid.to_string(),
            ip: None,
            port: None,
            token: None,
            password: None,
            iv: DEFAULT_IV,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Network location, once an `iam` reply has announced it.
    pub fn address(&self) -> Option<(Ipv4Addr, u16)> {
        Some((self.ip?, self.port?))
    }

    /// Current rotating token, once any gateway message has carried one.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Merge a partial update. Only fields present in `update` are applied;
    /// the `sid` is never touched.
    pub fn apply(&mut self, update: &GatewayUpdate) {
        if let Some(ip) = update.ip {
            self.ip = Some(ip);
        }
        if let Some(port) = update.port {
            self.port = Some(port);
        }
        if let Some(token) = &update.token {
            self.token = Some(token.clone());
        }
        if let Some(password) = &update.password {
            self.password = Some(password.clone());
        }
        if let Some(iv) = update.iv {
            self.iv = iv;
        }
    }
}

/// Whitelisted partial update for a [`Gateway`].
///
/// Wire messages can carry arbitrary extra fields; only the ones enumerated
/// here ever reach the entity.
#[derive(Debug, Clone, Default)]
pub struct GatewayUpdate {
    pub ip: Option<Ipv4Addr>,
    pub port: Option<u16>,
    pub token: Option<String>,
    pub password: Option<String>,
    pub iv: Option<[u8; 16]>,
}

impl GatewayUpdate {
    /// The gateway-relevant fields of an inbound envelope.
    pub fn from_message(message: &Message) -> Self {
        GatewayUpdate {
            ip: message.ip,
            port: message.port,
            token: message.token.clone(),
            ..Default::default()
        }
    }
}

/// The set of known gateways, keyed by `sid`. No ordering guarantee.
#[derive(Debug, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Gateway>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert only if the sid is non-empty and not already present.
    pub fn add(&mut self, gateway: Gateway) {
        if gateway.sid().is_empty() || self.gateways.contains_key(gateway.sid()) {
            return;
        }
        self.gateways.insert(gateway.sid.clone(), gateway);
    }

    /// Merge-update an existing gateway, or create one from the update.
    pub fn add_or_update(&mut self, sid: &str, update: &GatewayUpdate) {
        if sid.is_empty() {
            return;
        }
        self.gateways
            .entry(sid.to_string())
            .or_insert_with(|| Gateway::new(sid))
            .apply(update);
    }

    /// Merge-update only if the gateway exists; silent no-op otherwise.
    pub fn update(&mut self, sid: &str, update: &GatewayUpdate) {
        if let Some(gateway) = self.gateways.get_mut(sid) {
            gateway.apply(update);
        }
    }

    pub fn remove(&mut self, sid: &str) {
        self.gateways.remove(sid);
    }

    pub fn get(&self, sid: &str) -> Option<&Gateway> {
        self.gateways.get(sid)
    }

    pub fn list(&self) -> impl Iterator<Item = &Gateway> {
        self.gateways.values()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
