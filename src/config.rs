//! Service configuration and per-gateway credentials.

use std::net::Ipv4Addr;

/// Multicast group the gateways announce themselves on.
pub const MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 50);

/// Port the gateways listen on for multicast commands (`whois`).
pub const MULTICAST_PORT: u16 = 4321;

/// Unicast port gateways send reports to and accept commands on.
pub const SERVER_PORT: u16 = 9898;

/// Initialization vector the gateway firmware ships with.
///
/// Used for the write-key cipher unless a gateway-specific IV is supplied in
/// [`GatewayCredentials`].
pub const DEFAULT_IV: [u8; 16] = [
    0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f, 0x58, 0x56, 0x2e,
];

/// Network configuration for the protocol engine.
///
/// The defaults match the values the gateway firmware uses; most setups only
/// ever need to override [`bind_address`](ServiceConfig::bind_address) on
/// multi-homed hosts.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Multicast group to join and send discovery probes to.
    pub multicast_address: Ipv4Addr,
    /// Port discovery probes are multicast to.
    pub multicast_port: u16,
    /// Local port to bind for inbound traffic.
    pub server_port: u16,
    /// Local interface to join the multicast group on. `None` lets the OS
    /// pick the default interface.
    pub bind_address: Option<Ipv4Addr>,
    /// IV used for gateways that do not carry their own.
    pub iv: [u8; 16],
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            multicast_address: MULTICAST_ADDRESS,
            multicast_port: MULTICAST_PORT,
            server_port: SERVER_PORT,
            bind_address: None,
            iv: DEFAULT_IV,
        }
    }
}

/// Caller-supplied identity and secret for one gateway.
///
/// The password is printed in the Mi Home app when LAN access is enabled on
/// the gateway; it is never sent over the wire, only fed into the write-key
/// cipher.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    /// Stable gateway identity (the `sid` it reports in discovery replies).
    pub sid: String,
    /// Static LAN password for write authorization.
    pub password: String,
    /// Per-gateway IV override. Falls back to [`ServiceConfig::iv`].
    pub iv: Option<[u8; 16]>,
}

impl GatewayCredentials {
    pub fn new(sid: &str, password: &str) -> Self {
        GatewayCredentials {
            sid: sid.to_string(),
            password: password.to_string(),
            iv: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.multicast_address, Ipv4Addr::new(224, 0, 0, 50));
        assert_eq!(config.multicast_port, 4321);
        assert_eq!(config.server_port, 9898);
        assert!(config.bind_address.is_none());
        assert_eq!(config.iv, DEFAULT_IV);
    }

    #[test]
    fn test_credentials_default_iv() {
        let creds = GatewayCredentials::new("7811dcb28d61", "o9el4bdmb1pu0r8q");
        assert!(creds.iv.is_none());
    }
}
