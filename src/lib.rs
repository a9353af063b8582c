pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod order;
pub mod promo;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{CommerceError, PromoRejection};
pub use service::Storefront;
