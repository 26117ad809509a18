//! # vbot-cli: command-line probe
//!
//! Connects a [`vbot_core::Client`] to a server, then either performs one
//! call and prints the result, or prints every broadcast of one topic.

pub mod args;
pub mod config;
