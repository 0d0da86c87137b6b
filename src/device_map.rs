//! Gateway-to-device ownership map.

use std::collections::HashMap;

/// Associates each gateway `sid` with the ordered list of sub-device sids it
/// last reported.
///
/// A new id list replaces the previous one wholesale; the mesh reassigning a
/// device between gateways is reflected only through that replacement. A
/// device sid appears in at most one gateway's list at a time.
#[derive(Debug, Clone, Default)]
pub struct DeviceMap {
    maps: HashMap<String, Vec<String>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (not merge) the device list for a gateway.
    pub fn set_device_list(&mut self, gateway_sid: &str, device_sids: Vec<String>) {
        self.maps.insert(gateway_sid.to_string(), device_sids);
    }

    /// Drop the association entirely.
    pub fn remove(&mut self, gateway_sid: &str) {
        self.maps.remove(gateway_sid);
    }

    /// The device sids last reported by a gateway.
    pub fn device_sids(&self, gateway_sid: &str) -> Option<&[String]> {
        self.maps.get(gateway_sid).map(Vec::as_slice)
    }

    /// The gateway currently claiming a device. Linear scan over the map.
    pub fn gateway_for_device(&self, device_sid: &str) -> Option<&str> {
        self.maps
            .iter()
            .find(|(_, sids)| sids.iter().any(|sid| sid == device_sid))
            .map(|(gateway_sid, _)| gateway_sid.as_str())
    }

    /// The full forward map, for inspection and snapshotting.
    pub fn all(&self) -> &HashMap<String, Vec<String>> {
        &self.maps
    }
}
