//! Native bridge for the Runa album viewer: streams album images into a
//! single zip archive and drives the map panel lifecycle in response to
//! UI port messages.

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod dom;
pub mod domain;
pub mod error;
pub mod events;
pub mod fetch;
pub mod headless;
pub mod map;
pub mod messages;
pub mod pipeline;
pub mod tokens;
