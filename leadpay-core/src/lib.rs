#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entities;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod pricing;
pub mod processors;
pub mod purchase;
pub mod store;
pub mod vault;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
