#![forbid(unsafe_code)]

pub mod adapter;
pub mod blob;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod error;
pub mod ids;
pub mod library;
pub mod local;
pub mod logging;
pub mod model;
pub mod practice;
pub mod sync;

pub use error::StoreError;
