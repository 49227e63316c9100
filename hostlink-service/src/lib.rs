//! # hostlink-service: demonstration broker
//!
//! Publishes a unique endpoint, launches the session agent into the
//! configured user session, checks that the connecting process really runs
//! in that session and then drives one desktop session: every frame is
//! acknowledged and shared buffers are mapped as the agent announces them.

pub mod broker;
pub mod config;
pub mod logging;
