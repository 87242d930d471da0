//! View-model layer of the Relay chat client.

pub mod admin;
pub mod app;
pub mod auth;
pub mod chat;
pub mod clock;
pub mod live;
pub mod locale;
pub mod moderation;
pub mod payment;
pub mod settings;
pub mod status;

#[cfg(test)]
pub mod testing;
