pub mod acquisition_engine;
pub mod camera_manager;
pub mod capture_source;
pub mod control_listener;
pub mod run_context;
pub mod system_check;
pub mod trigger;
