//! Trigger context delivered by an external trigger source (GPS/heading tag
//! plus a sequence number) and the channel that carries "capture now" events.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerContext {
    #[serde(alias = "image_number")]
    pub sequence: u64,
    #[serde(alias = "block")]
    pub block_name: String,
    pub lat: f64,
    pub lon: f64,
    pub utm_x: f64,
    pub utm_y: f64,
    pub altitude: f64,
    pub heading: f64,
}

/// Single-slot holder for the latest trigger context. A new trigger replaces
/// the previous one; readers always get a whole record.
#[derive(Debug, Default)]
pub struct TriggerSlot {
    inner: RwLock<Option<TriggerContext>>,
}

impl TriggerSlot {
    pub fn store(&self, context: TriggerContext) {
        *self.inner.write() = Some(context);
    }

    pub fn snapshot(&self) -> Option<TriggerContext> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

/// A request for one on-demand capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub sequence: u64,
}

/// Entry point for trigger arrivals. Cheap to clone; every clone shares the
/// same slot and event channel.
#[derive(Debug, Clone)]
pub struct TriggerHub {
    slot: Arc<TriggerSlot>,
    events: Sender<CaptureRequest>,
}

impl TriggerHub {
    /// Creates the hub and the receiving end of its capture requests. The
    /// channel holds one request: arrivals before the loop consumes it collapse
    /// into that single capture.
    pub fn new() -> (Self, Receiver<CaptureRequest>) {
        let (events, requests) = bounded(1);
        (TriggerHub { slot: Arc::new(TriggerSlot::default()), events }, requests)
    }

    pub fn slot(&self) -> Arc<TriggerSlot> {
        self.slot.clone()
    }

    /// Records the context and requests a capture.
    pub fn arrive(&self, context: TriggerContext) {
        let request = CaptureRequest { sequence: context.sequence };
        debug!("🛰️ Trigger {} arrived for block '{}'", context.sequence, context.block_name);
        self.slot.store(context);
        match self.events.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Capture already pending, trigger {} merged into it", request.sequence),
            Err(TrySendError::Disconnected(_)) => debug!("No capture loop listening for trigger {}", request.sequence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_trigger_overwrites_slot() {
        let (hub, _requests) = TriggerHub::new();
        hub.arrive(TriggerContext { sequence: 1, ..Default::default() });
        hub.arrive(TriggerContext { sequence: 2, lat: 48.1, ..Default::default() });
        let snapshot = hub.slot().snapshot().unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.lat, 48.1);
    }

    #[test]
    fn pending_requests_collapse() {
        let (hub, requests) = TriggerHub::new();
        hub.arrive(TriggerContext { sequence: 1, ..Default::default() });
        hub.arrive(TriggerContext { sequence: 2, ..Default::default() });
        assert_eq!(requests.try_recv().unwrap().sequence, 1);
        assert!(requests.try_recv().is_err());
    }

    #[test]
    fn slot_starts_empty() {
        let slot = TriggerSlot::default();
        assert!(!slot.is_set());
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn context_accepts_legacy_field_names() {
        let ctx: TriggerContext = serde_json::from_str(r#"{"image_number": 7, "block": "B12"}"#).unwrap();
        assert_eq!(ctx.sequence, 7);
        assert_eq!(ctx.block_name, "B12");
    }
}
