//! Command handlers

pub mod config;
pub mod resource;
pub mod status;
