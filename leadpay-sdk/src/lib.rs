//! Wire types and request signing shared by the lead monetization server and
//! the marketplace application that calls it.

pub mod objects;
pub mod signature;
