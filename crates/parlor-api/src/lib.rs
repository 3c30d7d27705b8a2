pub mod auth;
pub mod error;
pub mod extract;
pub mod handles;
pub mod middleware;
pub mod pages;
