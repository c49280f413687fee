pub mod cache;
pub mod cluster_controller;
pub mod database;
pub mod dependency;
pub mod harbor;
pub mod service_manager;
pub mod storage;
