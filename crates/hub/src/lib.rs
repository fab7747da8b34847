//! `hl-hub`: the controller side of hostlink.
//!
//! Hosts dial in over WebSocket and register; callers run commands on them
//! through the [`bridge::Bridge`].  When several hosts may exist, the
//! [`hosts::HostRegistry`] discovers them from a shared file and keeps an
//! active selection.

pub mod api;
pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod error;
pub mod hosts;
pub mod server;
pub mod sessions;
pub mod state;
