//! Core object-model logic

pub mod assigned_numbers;
pub mod bluetooth;
pub mod context;
pub mod error;
pub mod handle_cache;
pub mod notification;
pub mod scanner;
pub mod types;
pub mod uuids;
