use crate::camera::sim_device::SimulatedSystem;
use crate::config_loader::MasterConfig;
use crate::core::acquisition_engine::AcquisitionEngine;
use crate::core::capture_source::CameraSystem;
use crate::core::control_listener::run_control_listener;
use crate::core::run_context::{LoopCommand, RunMode};
use anyhow::{Context, Result};
use clap::ArgMatches;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::time::Instant;

/// Applies `run` subcommand overrides on top of the loaded configuration.
pub fn apply_run_overrides(master_config: &MasterConfig, args: &ArgMatches) -> MasterConfig {
    let mut config = master_config.clone();
    if let Some(frames) = args.get_one::<u64>("frames") {
        debug!("  --frames override: {}", frames);
        config.acquisition.frames = *frames;
    }
    if args.get_flag("max-rate") {
        debug!("  --max-rate override");
        config.acquisition.max_rate_save = true;
    }
    config
}

fn simulated_system(config: &MasterConfig) -> SimulatedSystem {
    let system = SimulatedSystem::from_config(config);
    if config.acquisition.external_trigger {
        system.start_external_trigger(config.simulation.external_trigger_hz);
    }
    system
}

/// Forwards console lines to the capture loop until stdin closes.
fn spawn_console_reader(commands: Sender<LoopCommand>) {
    let spawned = std::thread::Builder::new().name("console".to_string()).spawn(move || {
        info!("⌨️ Commands: n/p switch camera, t trigger (manual mode), s save once, q quit");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match LoopCommand::parse(&line) {
                Some(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("⚠️ Unknown command '{}'", line.trim()),
            }
        }
        debug!("Console reader finished");
    });
    if let Err(e) = spawned {
        warn!("⚠️ Interactive commands unavailable: {}", e);
    }
}

pub async fn handle_run_cli(master_config: &MasterConfig, args: &ArgMatches) -> Result<()> {
    let op_start_time = Instant::now();
    let config = apply_run_overrides(master_config, args);
    let system = simulated_system(&config);
    let mut engine = AcquisitionEngine::new(config.clone(), Box::new(system));
    let controls = engine.controls();
    info!("🎥 Run mode: {}", engine.mode().name());

    let ctrlc_controls = controls.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, finishing current iteration...");
            ctrlc_controls.stop();
        }
    });

    let listener = config.app_settings.control_listen_addr.clone().map(|addr| {
        tokio::spawn(run_control_listener(
            addr,
            controls.trigger_hub.clone(),
            controls.reconfigure.clone(),
            controls.keep_running_flag(),
        ))
    });

    if matches!(engine.mode(), RunMode::SynchronousTrigger { .. }) {
        spawn_console_reader(controls.commands.clone());
    }

    let run_result = tokio::task::spawn_blocking(move || engine.run())
        .await
        .context("Acquisition thread panicked")?;
    controls.stop();

    if let Some(listener) = listener {
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Control listener failed: {:#}", e),
            Err(e) => error!("💀 Control listener task failed: {}", e),
        }
    }

    let summary = run_result.context("Acquisition failed")?;
    info!(
        "🏁 Run finished in {:?}: {} cycles, {} files saved under {}",
        op_start_time.elapsed(),
        summary.cycles,
        summary.frames_saved,
        config.app_settings.save_path
    );
    Ok(())
}

pub async fn handle_flush_cli(master_config: &MasterConfig) -> Result<()> {
    let op_start_time = Instant::now();
    let system = simulated_system(master_config);
    let mut engine = AcquisitionEngine::new(master_config.clone(), Box::new(system));
    tokio::task::spawn_blocking(move || engine.flush_only())
        .await
        .context("Flush thread panicked")?
        .context("Flush sequence failed")?;
    info!("🚿 Flush completed in {:?}", op_start_time.elapsed());
    Ok(())
}

pub async fn handle_list_cameras_cli(master_config: &MasterConfig) -> Result<()> {
    let mut system = simulated_system(master_config);
    info!("📚 Camera library version: {}", system.library_version());
    let devices = system.enumerate().context("Failed to enumerate cameras")?;
    info!("🔍 {} camera(s) detected", devices.len());
    for device in &devices {
        let configured = master_config.cameras.iter().find(|c| c.id == device.id());
        match configured {
            Some(cam) => info!("  ✅ {} ({}) -> '{}'", device.id(), device.model_name(), cam.display_name()),
            None => info!("  ➖ {} ({}) not in configuration", device.id(), device.model_name()),
        }
    }
    for cam in &master_config.cameras {
        if !devices.iter().any(|d| d.id() == cam.id) {
            warn!("⚠️ Configured camera {} ('{}') not detected", cam.id, cam.display_name());
        }
    }
    Ok(())
}
