#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gmail;
pub mod ledger;
pub mod net;
pub mod notes;
pub mod notify;
pub mod retry;
pub mod service;
pub mod template;

pub use cli::Cli;
pub use config::Config;
pub use error::{BridgeError, Result};
