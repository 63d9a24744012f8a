//! Cash gateway - kiosk-side integration core for cash-handling peripherals
//!
//! Talks to the vendor device service (a local REST daemon fronting the
//! serial hardware) and gives the kiosk application one safe surface for a
//! cash payment session:
//! - authenticated client with single-slot bearer token and
//!   retry-once-on-401 replay
//! - device probing over the vendor's port/SSP-address scheme, role
//!   classification, and a per-role session lifecycle
//! - drift-tolerant session amount accounting over the polled inventory feed
//! - denomination admission ("never accept money we cannot change") backed
//!   by an exact-change feasibility solver
//!
//! Entry point for applications is [`services::CashRepository`].

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;

pub use error::{GatewayError, Result};
pub use infra::config::Config;
pub use services::repository::CashRepository;
