#[macro_use]
extern crate log;

pub mod activity_log;
pub mod binding;
pub mod cache;
pub mod checker;
pub mod config;
pub mod decision;
pub mod domain;
#[macro_use]
pub mod error;
pub mod store;
pub mod unknown_user_log;
pub mod util;

#[cfg(feature = "s3")]
pub(crate) mod aws;

pub mod api;

pub use config::CONFIG;
pub use error::Error;
