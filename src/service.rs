//! Service lifecycle: socket ownership, listener thread, discovery bootstrap.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::config::{GatewayCredentials, ServiceConfig};
use crate::engine::ProtocolEngine;
use crate::errors::Error;
use crate::transport::{Transport, UdpTransport};

type Result<T> = std::result::Result<T, Error>;

/// Owns the UDP endpoint and the background listener feeding the
/// [`ProtocolEngine`].
///
/// Datagrams are delivered to the engine one at a time from a single thread,
/// which is what keeps the engine's registries consistent without finer
/// locking. There is no timeout and no retry: once started, the service
/// listens until [`stop`](AqaraService::stop) (or drop).
///
/// # Example
///
/// ```no_run
/// use aqara_lan_rs::{AqaraService, GatewayCredentials, ServiceConfig};
///
/// let service = AqaraService::new(
///     vec![GatewayCredentials::new("7811dcb28d61", "o9el4bdmb1pu0r8q")],
///     ServiceConfig::default(),
/// )?;
/// service.engine().on_ready(|_| println!("all devices read"));
/// service.start()?;
/// # Ok::<(), aqara_lan_rs::Error>(())
/// ```
pub struct AqaraService {
    engine: Arc<ProtocolEngine>,
    transport: Arc<UdpTransport>,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AqaraService {
    /// Bind the transport and build the engine. Listening starts only with
    /// [`start`](AqaraService::start).
    pub fn new(gateways: Vec<GatewayCredentials>, config: ServiceConfig) -> Result<Self> {
        let transport = Arc::new(UdpTransport::open(&config)?);
        let engine = Arc::new(ProtocolEngine::new(
            gateways,
            config,
            transport.clone() as Arc<dyn Transport>,
        )?);
        Ok(AqaraService {
            engine,
            transport,
            running: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the listener thread and multicast a `whois` probe.
    ///
    /// The probe is fire-and-forget; if no gateway answers, the service just
    /// keeps listening. Calling `start` on a running service is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = self.transport.listener_socket()?;
        let engine = Arc::clone(&self.engine);
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            let mut buffer = [0u8; 4096];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, source)) => engine.handle_datagram(&buffer[..size], source),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => error!("receive error: {e}"),
                }
            }
        });
        *self.listener.lock().unwrap() = Some(handle);
        info!("listening on {:?}", self.transport.local_addr());

        if let Err(err) = self.engine.send_whois() {
            warn!("discovery probe failed: {err}");
        }
        Ok(())
    }

    /// Stop the listener thread. Queued inbound datagrams are dropped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AqaraService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn service() -> AqaraService {
        // Port 0 keeps parallel tests from fighting over 9898.
        let config = ServiceConfig {
            server_port: 0,
            ..Default::default()
        };
        AqaraService::new(
            vec![GatewayCredentials::new("7811dcb28d61", "o9el4bdmb1pu0r8q")],
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_start_stop_idempotent() {
        let service = service();
        assert!(!service.is_running());
        service.start().unwrap();
        service.start().unwrap();
        assert!(service.is_running());
        service.stop();
        assert!(!service.is_running());
        service.stop();
    }

    #[test]
    fn test_listener_feeds_engine() {
        let service = service();
        let observed = Arc::new(AtomicUsize::new(0));
        let counter = observed.clone();
        service.engine().on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        service.start().unwrap();

        let port = service.transport.local_addr().unwrap().port();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender
            .send_to(
                br#"{"cmd":"heartbeat","model":"gateway","sid":"7811dcb28d61","token":"1234567890abcdef","data":"{}"}"#,
                (Ipv4Addr::LOCALHOST, port),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(
            service.engine().gateway("7811dcb28d61").unwrap().token(),
            Some("1234567890abcdef")
        );
    }
}
