//! # Loopback Radio
//!
//! An in-process `Peripheral`/`Central` pair joined by a channel, so the
//! full emitter→receiver pipeline runs without platform BLE. Used by the
//! demo binary and by end-to-end tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Advertisement, Central, Clock, Peripheral, RadioState};
use crate::beacon::FRAME_LEN;
use crate::error::{PhoenixError, Result};

/// Channel depth before advertisements are dropped, like airtime loss
const LOOPBACK_QUEUE_DEPTH: usize = 32;

/// Peer id reported for loopback advertisements
const LOOPBACK_PEER_ID: &str = "loopback-emitter";

/// Create a connected peripheral/central pair
///
/// Every frame handed to the peripheral is delivered to the central as
/// one advertisement stamped with `rssi_dbm` and the shared clock's
/// arrival time.
pub fn loopback_pair(
    clock: Arc<dyn Clock>,
    rssi_dbm: i16,
) -> (LoopbackPeripheral, LoopbackCentral) {
    let (tx, rx) = mpsc::channel(LOOPBACK_QUEUE_DEPTH);
    (
        LoopbackPeripheral {
            tx,
            clock,
            rssi_dbm,
            advertising: false,
        },
        LoopbackCentral { rx: Some(rx) },
    )
}

/// Loopback advertiser: forwards frames into the shared channel
pub struct LoopbackPeripheral {
    tx: mpsc::Sender<Advertisement>,
    clock: Arc<dyn Clock>,
    rssi_dbm: i16,
    advertising: bool,
}

impl LoopbackPeripheral {
    /// Change the simulated signal strength for subsequent frames
    pub fn set_rssi(&mut self, rssi_dbm: i16) {
        self.rssi_dbm = rssi_dbm;
    }
}

#[async_trait]
impl Peripheral for LoopbackPeripheral {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> RadioState {
        RadioState::PoweredOn
    }

    async fn start_advertising(&mut self, frame: [u8; FRAME_LEN]) -> Result<()> {
        self.advertising = true;
        let advertisement = Advertisement {
            peer_id: LOOPBACK_PEER_ID.to_string(),
            local_name: Some("Phoenix".to_string()),
            manufacturer_data: frame.to_vec(),
            rssi_dbm: self.rssi_dbm,
            received_at_ms: self.clock.now_ms(),
        };
        // A full queue models a lost advertisement, not an error
        let _ = self.tx.try_send(advertisement);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        self.advertising = false;
        Ok(())
    }
}

/// Loopback scanner: hands out the receiving end of the shared channel
pub struct LoopbackCentral {
    rx: Option<mpsc::Receiver<Advertisement>>,
}

#[async_trait]
impl Central for LoopbackCentral {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> RadioState {
        RadioState::PoweredOn
    }

    async fn start_scanning(&mut self) -> Result<mpsc::Receiver<Advertisement>> {
        self.rx.take().ok_or_else(|| PhoenixError::ScanFailed {
            cause: "loopback scan already consumed".to_string(),
        })
    }

    async fn stop_scanning(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mocks::FakeClock;

    #[tokio::test]
    async fn test_loopback_delivers_frames() {
        let clock = FakeClock::new();
        clock.set(5000);
        let (mut peripheral, mut central) = loopback_pair(Arc::new(clock), -60);

        let mut rx = central.start_scanning().await.unwrap();
        peripheral.start_advertising([0xAB; FRAME_LEN]).await.unwrap();

        let adv = rx.recv().await.unwrap();
        assert_eq!(adv.manufacturer_data, vec![0xAB; FRAME_LEN]);
        assert_eq!(adv.rssi_dbm, -60);
        assert_eq!(adv.received_at_ms, 5000);
        assert_eq!(adv.local_name.as_deref(), Some("Phoenix"));
    }

    #[tokio::test]
    async fn test_loopback_scan_consumed_once() {
        let (_peripheral, mut central) = loopback_pair(Arc::new(FakeClock::new()), -60);

        assert!(central.start_scanning().await.is_ok());
        assert!(matches!(
            central.start_scanning().await,
            Err(PhoenixError::ScanFailed { .. })
        ));
    }
}
