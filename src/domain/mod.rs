pub mod auth;
pub mod unique;
pub mod user;

pub use unique::{unique_email, unique_str};
