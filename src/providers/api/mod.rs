//! Case-management backend API.
//!
//! [`MailApi`] is the seam every service talks through. [`HttpMailApi`] is
//! the production implementation over JSON/HTTPS; tests substitute fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use maildesk::domain::CaseId;
//! use maildesk::providers::api::{HttpMailApi, MailApi};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpMailApi::new("https://cases.example/api/")?.with_csrf_token("token");
//! let items = api.list_flagged_items(CaseId(42)).await?;
//! println!("{} items flagged for mail", items.len());
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod traits;

pub use http::{HttpMailApi, DEFAULT_CSRF_HEADER};
pub use traits::{ApiError, ApiResult, MailApi};
