//! Core simulation state and the bubble coordinate model

pub mod coordinates;
pub mod entity;
