//! Sub-device entity and registry.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::Message;

/// A sub-device or sensor attached to a gateway.
///
/// The `data` payload is opaque to the engine: its keys are
/// capability-specific (power, illumination, voltage, ...) and interpretation
/// belongs to model-aware code on top of this crate.
#[derive(Debug, Clone)]
pub struct Device {
    sid: String,
    model: Option<String>,
    short_id: Option<u32>,
    data: Value,
}

impl Device {
    pub fn new(sid: &str) -> Self {
        Device {
            sid: sid.to_string(),
            model: None,
            short_id: None,
            data: Value::Null,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Device class, e.g. `"magnet"` or `"motion"`.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Short-form mesh identity. Not unique across gateways.
    pub fn short_id(&self) -> Option<u32> {
        self.short_id
    }

    /// Last reported state payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Merge a partial update. Only fields present in `update` are applied.
    pub fn apply(&mut self, update: &DeviceUpdate) {
        if let Some(model) = &update.model {
            self.model = Some(model.clone());
        }
        if let Some(short_id) = update.short_id {
            self.short_id = Some(short_id);
        }
        if let Some(data) = &update.data {
            self.data = data.clone();
        }
    }
}

/// Whitelisted partial update for a [`Device`].
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub model: Option<String>,
    pub short_id: Option<u32>,
    pub data: Option<Value>,
}

impl DeviceUpdate {
    /// The device-relevant fields of an inbound envelope.
    pub fn from_message(message: &Message) -> Self {
        DeviceUpdate {
            model: message.model.clone(),
            short_id: message.short_id,
            data: message.data.clone(),
        }
    }
}

/// The set of known sub-devices, keyed by `sid`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge-update an existing device, or create one from the update.
    pub fn add_or_update(&mut self, sid: &str, update: &DeviceUpdate) {
        if sid.is_empty() {
            return;
        }
        self.devices
            .entry(sid.to_string())
            .or_insert_with(|| Device::new(sid))
            .apply(update);
    }

    pub fn remove(&mut self, sid: &str) {
        self.devices.remove(sid);
    }

    pub fn get(&self, sid: &str) -> Option<&Device> {
        self.devices.get(sid)
    }

    pub fn list(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn by_model<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a Device> {
        self.devices
            .values()
            .filter(move |device| device.model() == Some(model))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
