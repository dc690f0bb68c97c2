#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

//! Client side of SimSync: identity, REST access and the dashboard
//! workflows built on top of them.

pub mod api;
pub mod checkout;
pub mod community;
pub mod dashboard;
pub mod display;
pub mod download;
pub mod error;
pub mod form;
pub mod guard;
pub mod identity;
pub mod prompt;
pub mod resource;
pub mod service;
pub mod upload;

#[cfg(test)]
mod testkit;

pub use api::{ApiClient, RetryPolicy};
pub use dashboard::Dashboard;
pub use error::ClientError;
pub use identity::{AuthState, IdentityProvider, PasswordIdentity};
pub use upload::{Rejection, UploadFile};
