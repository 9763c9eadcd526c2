//! Run mode selection and the control state handed to a capture loop.

use crate::app_config::{AcquisitionConfig, QueueConfig};
use crate::camera::feature_profile::ReconfigureRequest;
use crate::core::trigger::{CaptureRequest, TriggerHub, TriggerSlot};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How the master camera is fired in synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Software trigger on every loop iteration.
    Software,
    /// Software trigger only when a trigger event arrives.
    OnDemand,
    /// Software trigger only on the interactive `t` command.
    Manual,
    /// A hardware line fires every camera; the loop only grabs.
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    SynchronousTrigger { trigger: TriggerMode },
    MaxRateMultiThreaded { queue: QueueConfig },
}

impl RunMode {
    pub fn from_config(acq: &AcquisitionConfig) -> Self {
        if acq.max_rate_save {
            return RunMode::MaxRateMultiThreaded { queue: acq.queue.clone() };
        }
        let trigger = if acq.manual_trigger {
            TriggerMode::Manual
        } else if acq.external_trigger {
            TriggerMode::External
        } else if acq.on_demand_trigger {
            TriggerMode::OnDemand
        } else {
            TriggerMode::Software
        };
        RunMode::SynchronousTrigger { trigger }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunMode::SynchronousTrigger { .. } => "synchronous trigger",
            RunMode::MaxRateMultiThreaded { .. } => "max-rate multi-threaded",
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Synchronous: collected camera sets. Pipeline: producer cycles.
    pub cycles: u64,
    /// Image or raw files written, across all cameras.
    pub frames_saved: u64,
    /// Pipeline frames dropped for lacking a trigger context.
    pub frames_discarded: u64,
    /// Times a writer found its queue deeper than `queue.warn_depth`.
    pub queue_depth_warnings: u64,
}

/// Interactive commands read from the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    NextCamera,
    PrevCamera,
    Trigger,
    SaveOnce,
    Quit,
}

impl LoopCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "n" => Some(LoopCommand::NextCamera),
            "p" => Some(LoopCommand::PrevCamera),
            "t" => Some(LoopCommand::Trigger),
            "s" => Some(LoopCommand::SaveOnce),
            "q" | "quit" | "exit" => Some(LoopCommand::Quit),
            _ => None,
        }
    }
}

/// Sending ends of every control channel, for whatever embeds the engine.
#[derive(Debug, Clone)]
pub struct ControlHandles {
    pub trigger_hub: TriggerHub,
    pub commands: Sender<LoopCommand>,
    pub reconfigure: Sender<ReconfigureRequest>,
    keep_running: Arc<AtomicBool>,
}

impl ControlHandles {
    pub fn stop(&self) {
        info!("🛑 Stop requested");
        self.keep_running.store(false, Ordering::SeqCst);
    }

    pub fn keep_running_flag(&self) -> Arc<AtomicBool> {
        self.keep_running.clone()
    }
}

/// Everything a capture loop reads besides the cameras.
pub struct RunContext {
    pub mode: RunMode,
    pub capture_requests: Receiver<CaptureRequest>,
    pub commands: Receiver<LoopCommand>,
    pub reconfigure: Receiver<ReconfigureRequest>,
    pub trigger_slot: Arc<TriggerSlot>,
    keep_running: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(mode: RunMode) -> (Self, ControlHandles) {
        debug!("Creating run context for {} mode", mode.name());
        let (trigger_hub, capture_requests) = TriggerHub::new();
        let (commands_tx, commands) = unbounded();
        let (reconfigure_tx, reconfigure) = unbounded();
        let keep_running = Arc::new(AtomicBool::new(true));
        let context = RunContext {
            mode,
            capture_requests,
            commands,
            reconfigure,
            trigger_slot: trigger_hub.slot(),
            keep_running: keep_running.clone(),
        };
        let handles = ControlHandles { trigger_hub, commands: commands_tx, reconfigure: reconfigure_tx, keep_running };
        (context, handles)
    }

    pub fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    pub fn keep_running_flag(&self) -> Arc<AtomicBool> {
        self.keep_running.clone()
    }

    /// Latest pending live update, merging any that queued up.
    pub fn pending_reconfigure(&self) -> Option<ReconfigureRequest> {
        let mut merged: Option<ReconfigureRequest> = None;
        for request in self.reconfigure.try_iter() {
            let current = merged.get_or_insert_with(ReconfigureRequest::default);
            if request.target_grey_value.is_some() {
                current.target_grey_value = request.target_grey_value;
            }
            if request.exposure_time.is_some() {
                current.exposure_time = request.exposure_time;
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_wins_over_other_trigger_flags() {
        let acq = AcquisitionConfig { manual_trigger: true, external_trigger: true, ..Default::default() };
        assert_eq!(RunMode::from_config(&acq), RunMode::SynchronousTrigger { trigger: TriggerMode::Manual });
    }

    #[test]
    fn max_rate_selects_pipeline() {
        let acq = AcquisitionConfig { max_rate_save: true, ..Default::default() };
        assert!(matches!(RunMode::from_config(&acq), RunMode::MaxRateMultiThreaded { .. }));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(LoopCommand::parse(" n\n"), Some(LoopCommand::NextCamera));
        assert_eq!(LoopCommand::parse("q"), Some(LoopCommand::Quit));
        assert_eq!(LoopCommand::parse("x"), None);
    }

    #[test]
    fn reconfigure_requests_merge() {
        let (ctx, handles) = RunContext::new(RunMode::SynchronousTrigger { trigger: TriggerMode::Software });
        handles.reconfigure.send(ReconfigureRequest { target_grey_value: Some(40.0), exposure_time: None }).unwrap();
        handles.reconfigure.send(ReconfigureRequest { target_grey_value: None, exposure_time: Some(5000.0) }).unwrap();
        assert_eq!(
            ctx.pending_reconfigure(),
            Some(ReconfigureRequest { target_grey_value: Some(40.0), exposure_time: Some(5000.0) })
        );
        assert_eq!(ctx.pending_reconfigure(), None);
    }

    #[test]
    fn stop_clears_flag() {
        let (ctx, handles) = RunContext::new(RunMode::SynchronousTrigger { trigger: TriggerMode::Software });
        assert!(ctx.keep_running());
        handles.stop();
        assert!(!ctx.keep_running());
    }
}
