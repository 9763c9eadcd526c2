pub mod camera_entity;
pub mod camera_info;
pub mod camera_media;
pub mod feature_profile;
pub mod sim_device;
