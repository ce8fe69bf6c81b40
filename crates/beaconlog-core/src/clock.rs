//! Time sources for observation timestamps and backup names.
//!
//! [`NetworkClock`] prefers SNTP-corrected time and silently falls back to
//! the local wall clock until (and unless) a sync has succeeded.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClockConfig;
use crate::ui::{UiHandle, NOTICE_NTP_SYNCED};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

/// Standard NTP port.
pub const NTP_PORT: u16 = 123;

const NTP_PACKET_LEN: usize = 48;

/// Errors from a network time sync.
#[derive(Debug, Error)]
pub enum ClockError {
    /// The server name did not resolve.
    #[error("Could not resolve NTP server '{0}'")]
    Resolve(String),

    /// Socket I/O failed.
    #[error("NTP I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply within the configured timeout.
    #[error("NTP server did not answer within {0:?}")]
    Timeout(Duration),

    /// The reply was malformed or unsynchronised.
    #[error("Invalid NTP response: {0}")]
    InvalidResponse(String),
}

/// A source of "now".
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// Local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock frozen at a given instant, for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// Create a clock reading `millis`.
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// SNTP-corrected clock.
#[derive(Debug)]
pub struct NetworkClock {
    server: String,
    timeout: Duration,
    offset_millis: AtomicI64,
    synced: AtomicBool,
}

impl NetworkClock {
    /// Create an unsynced clock for `config.ntp_server`.
    #[must_use]
    pub fn new(config: &ClockConfig) -> Self {
        Self {
            server: config.ntp_server.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            offset_millis: AtomicI64::new(0),
            synced: AtomicBool::new(false),
        }
    }

    /// Whether at least one sync has succeeded.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Current correction applied to local time, if synced.
    #[must_use]
    pub fn offset_millis(&self) -> Option<i64> {
        self.is_synced()
            .then(|| self.offset_millis.load(Ordering::Acquire))
    }

    /// Query the server once and store the measured offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or answers garbage.
    pub async fn sync(&self) -> Result<i64, ClockError> {
        let addr = resolve(&self.server).await?;
        self.sync_with(addr).await
    }

    /// Query the server at `addr` once and store the measured offset.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure, timeout or a malformed reply.
    pub async fn sync_with(&self, addr: SocketAddr) -> Result<i64, ClockError> {
        let socket = UdpSocket::bind(if addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        })
        .await?;
        socket.connect(addr).await?;

        let mut request = [0u8; NTP_PACKET_LEN];
        // LI = 0, VN = 3, Mode = 3 (client)
        request[0] = 0x1B;
        let t0 = SystemClock.now_millis();
        socket.send(&request).await?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut response))
            .await
            .map_err(|_| ClockError::Timeout(self.timeout))??;
        let t3 = SystemClock.now_millis();

        let offset = offset_from_response(&response[..len], t0, t3)?;
        self.offset_millis.store(offset, Ordering::Release);
        self.synced.store(true, Ordering::Release);
        info!(server = %self.server, offset_ms = offset, "Network time synced");
        Ok(offset)
    }

    /// Sync in the background without blocking the caller.
    ///
    /// Posts a notice on success; failures are only logged.
    pub fn spawn_sync(self: &Arc<Self>, ui: UiHandle) -> JoinHandle<()> {
        let clock = Arc::clone(self);
        tokio::spawn(async move {
            match clock.sync().await {
                Ok(_) => ui.notice(NOTICE_NTP_SYNCED),
                Err(e) => warn!(error = %e, server = %clock.server, "Network time sync failed, using local clock"),
            }
        })
    }
}

impl Clock for NetworkClock {
    fn now_millis(&self) -> i64 {
        SystemClock.now_millis() + self.offset_millis().unwrap_or(0)
    }
}

async fn resolve(server: &str) -> Result<SocketAddr, ClockError> {
    debug!(%server, "Resolving NTP server");
    tokio::net::lookup_host((server, NTP_PORT))
        .await?
        .next()
        .ok_or_else(|| ClockError::Resolve(server.to_string()))
}

/// Convert a 64-bit NTP timestamp to Unix milliseconds.
#[must_use]
pub fn ntp_to_unix_millis(bytes: [u8; 8]) -> i64 {
    let secs = i64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    let frac = i64::from(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
    (secs - NTP_UNIX_OFFSET_SECS) * 1000 + ((frac * 1000 + (1 << 31)) >> 32)
}

/// Clock offset from an SNTP reply, given local send (`t0`) and receive (`t3`)
/// times in Unix milliseconds.
///
/// # Errors
///
/// Returns an error for short packets, non-server modes and unsynchronised
/// (stratum 0) replies.
pub fn offset_from_response(packet: &[u8], t0: i64, t3: i64) -> Result<i64, ClockError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(ClockError::InvalidResponse(format!(
            "expected {NTP_PACKET_LEN} bytes, got {}",
            packet.len()
        )));
    }
    let mode = packet[0] & 0x07;
    if mode != 4 {
        return Err(ClockError::InvalidResponse(format!("unexpected mode {mode}")));
    }
    if packet[1] == 0 {
        return Err(ClockError::InvalidResponse("kiss-of-death / stratum 0".into()));
    }

    let stamp = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&packet[at..at + 8]);
        ntp_to_unix_millis(b)
    };
    let t1 = stamp(32);
    let t2 = stamp(40);
    Ok(((t1 - t0) + (t2 - t3)) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntp_bytes(unix_millis: i64) -> [u8; 8] {
        let secs = (unix_millis.div_euclid(1000) + NTP_UNIX_OFFSET_SECS) as u32;
        let frac = ((unix_millis.rem_euclid(1000) << 32) / 1000) as u32;
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&secs.to_be_bytes());
        out[4..].copy_from_slice(&frac.to_be_bytes());
        out
    }

    fn server_reply(t1: i64, t2: i64) -> [u8; NTP_PACKET_LEN] {
        let mut packet = [0u8; NTP_PACKET_LEN];
        packet[0] = 0x1C; // VN 3, mode 4 (server)
        packet[1] = 2;
        packet[32..40].copy_from_slice(&ntp_bytes(t1));
        packet[40..48].copy_from_slice(&ntp_bytes(t2));
        packet
    }

    #[test]
    fn test_ntp_epoch_conversion() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&(NTP_UNIX_OFFSET_SECS as u32).to_be_bytes());
        assert_eq!(ntp_to_unix_millis(bytes), 0);

        assert_eq!(ntp_to_unix_millis(ntp_bytes(1_700_000_000_500)), 1_700_000_000_500);
    }

    #[test]
    fn test_offset_when_local_clock_is_behind() {
        // Server is 2 s ahead, 100 ms round trip.
        let t0 = 1_700_000_000_000;
        let t3 = t0 + 100;
        let packet = server_reply(t0 + 2_050, t0 + 2_050);
        assert_eq!(offset_from_response(&packet, t0, t3).unwrap(), 2_000);
    }

    #[test]
    fn test_rejects_short_and_client_packets() {
        assert!(offset_from_response(&[0u8; 12], 0, 0).is_err());

        let mut packet = server_reply(1_000, 1_000);
        packet[0] = 0x1B;
        assert!(offset_from_response(&packet, 0, 0).is_err());

        let mut packet = server_reply(1_000, 1_000);
        packet[1] = 0;
        assert!(offset_from_response(&packet, 0, 0).is_err());
    }

    #[test]
    fn test_unsynced_network_clock_falls_back_to_local() {
        let clock = NetworkClock::new(&ClockConfig::default());
        assert!(!clock.is_synced());
        assert_eq!(clock.offset_millis(), None);

        let before = SystemClock.now_millis();
        let now = clock.now_millis();
        let after = SystemClock.now_millis();
        assert!(before <= now && now <= after);
    }

    #[tokio::test]
    async fn test_synced_network_clock_applies_offset() {
        // Local SNTP responder running 5 s ahead of this host.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; NTP_PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let ahead = SystemClock.now_millis() + 5_000;
            server.send_to(&server_reply(ahead, ahead), peer).await.unwrap();
        });

        let clock = NetworkClock::new(&ClockConfig::default());
        let offset = clock.sync_with(addr).await.unwrap();
        responder.await.unwrap();

        assert!(clock.is_synced());
        assert_eq!(clock.offset_millis(), Some(offset));
        assert!((4_900..=5_100).contains(&offset), "offset {offset}");

        let before = SystemClock.now_millis();
        let now = clock.now_millis();
        let after = SystemClock.now_millis();
        assert!(before + offset <= now && now <= after + offset);
    }

    #[tokio::test]
    async fn test_sync_times_out_and_stays_unsynced() {
        // Bound but silent.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let clock = NetworkClock::new(&ClockConfig {
            timeout_secs: 1,
            ..ClockConfig::default()
        });

        let err = clock.sync_with(server.local_addr().unwrap()).await.unwrap_err();
        assert!(matches!(err, ClockError::Timeout(_)));
        assert!(!clock.is_synced());
    }

    #[test]
    fn test_fixed_clock_seconds_round_down() {
        let clock = FixedClock::new(1_700_000_000_999);
        assert_eq!(clock.now_secs(), 1_700_000_000);
        clock.advance(1);
        assert_eq!(clock.now_secs(), 1_700_000_001);
    }
}
