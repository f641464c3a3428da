//! maildesk - Mail dispatch coordinator for case baskets and bridge handoffs
//!
//! This crate provides the client-side core of case mail dispatch: grouping
//! flagged items into per-source baskets, optimistic reassignment between
//! sources, handoff preparation from server-rendered templates, and tracking
//! handoffs through pickup by a desktop bridge agent.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod providers;
pub mod services;

pub use app::MailDesk;
pub use config::Settings;
pub use error::{DeskError, DeskResult};
