// src/signals/mod.rs

pub mod browser;
pub mod geo;
pub mod ip_identity;
