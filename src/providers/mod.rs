//! External service implementations.
//!
//! - [`api`] - The case-management REST backend
//!
//! The template renderer and the bridge agents sit behind the same backend
//! and are reached through [`api::MailApi`].

pub mod api;
