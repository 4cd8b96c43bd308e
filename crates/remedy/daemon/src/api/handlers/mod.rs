//! API handlers

pub mod health;
pub mod loop_control;
