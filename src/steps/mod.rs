pub mod boot;
pub mod identity;
pub mod network;
pub mod profile;
pub mod render;
pub mod rootfs;
pub mod swap;
pub mod write;
