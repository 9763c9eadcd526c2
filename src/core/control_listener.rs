//! UDP control surface: JSON datagrams carrying trigger arrivals and live
//! exposure updates.

use crate::camera::feature_profile::ReconfigureRequest;
use crate::core::trigger::{TriggerContext, TriggerHub};
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Trigger(TriggerContext),
    Reconfigure(ReconfigureRequest),
}

pub fn parse_control_message(payload: &[u8]) -> Result<ControlMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Routes one message to the trigger hub or the reconfigure channel.
pub fn dispatch_control_message(message: ControlMessage, hub: &TriggerHub, reconfigure: &Sender<ReconfigureRequest>) {
    match message {
        ControlMessage::Trigger(context) => hub.arrive(context),
        ControlMessage::Reconfigure(request) => {
            if reconfigure.send(request).is_err() {
                warn!("⚠️ Reconfigure request dropped, acquisition is not running");
            }
        }
    }
}

/// Listens on `addr` until `keep_running` clears.
pub async fn run_control_listener(
    addr: String,
    hub: TriggerHub,
    reconfigure: Sender<ReconfigureRequest>,
    keep_running: Arc<AtomicBool>,
) -> Result<()> {
    let socket = UdpSocket::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind control listener to '{}'", addr))?;
    info!("📡 Control listener bound to {}", socket.local_addr()?);

    let mut buf = vec![0u8; MAX_DATAGRAM];
    while keep_running.load(Ordering::SeqCst) {
        let (len, peer) = match tokio::time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(received) => received.context("Control socket receive failed")?,
        };
        match parse_control_message(&buf[..len]) {
            Ok(message) => {
                debug!("📨 Control message from {}: {:?}", peer, message);
                dispatch_control_message(message, &hub, &reconfigure);
            }
            Err(e) => warn!("⚠️ Ignoring malformed control message from {}: {}", peer, e),
        }
    }
    debug!("Control listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_message() {
        let msg = parse_control_message(br#"{"type":"trigger","sequence":3,"block_name":"A","lat":1.5}"#).unwrap();
        match msg {
            ControlMessage::Trigger(ctx) => {
                assert_eq!(ctx.sequence, 3);
                assert_eq!(ctx.lat, 1.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_reconfigure_message() {
        let msg = parse_control_message(br#"{"type":"reconfigure","exposure_time":0}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Reconfigure(ReconfigureRequest { target_grey_value: None, exposure_time: Some(0.0) })
        );
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(parse_control_message(br#"{"type":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn datagram_reaches_trigger_slot() {
        let (hub, requests) = TriggerHub::new();
        let (reconfigure_tx, _reconfigure_rx) = crossbeam_channel::unbounded();
        let keep_running = Arc::new(AtomicBool::new(true));

        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let listener = tokio::spawn(run_control_listener(
            addr.to_string(),
            hub.clone(),
            reconfigure_tx,
            keep_running.clone(),
        ));
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut delivered = false;
        for _ in 0..50 {
            sender.send_to(br#"{"type":"trigger","sequence":9}"#, addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            if requests.try_recv().is_ok() {
                delivered = true;
                break;
            }
        }
        keep_running.store(false, Ordering::SeqCst);
        listener.await.unwrap().unwrap();
        assert!(delivered);
        assert_eq!(hub.slot().snapshot().unwrap().sequence, 9);
    }
}
