#![allow(async_fn_in_trait)]
pub mod auth;
pub mod download;
mod error;
pub mod export;
pub mod order;
pub mod query;
pub mod reader;
pub mod search;
pub mod table;
pub mod variables;

pub use error::GranuleError;
