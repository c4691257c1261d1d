// file: src/logging/mod.rs
// version: 2.0.0
// guid: 0b6d8f21-4e3a-47c9-a512-9c8e3f1d7b04

//! Logging setup for the autoinstall engine

pub mod logger;

pub use logger::{
    init_json_logger, init_logger, init_logger_with_verbosity, with_async_operation_span,
    Verbosity,
};
