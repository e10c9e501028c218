//! Doorman - Verification Gatekeeper Bot
//!
//! A chat bot that mutes new group members until they prove control of a
//! reputable GitHub account through an out-of-band proof flow.
//!
//! Key principles:
//! - Fail closed (no settled proof, no voice)
//! - One session per member, settled exactly once
//! - Terminal transitions are compare-and-set (webhook and sweeper race)
//! - Every prompt the bot sends is tracked and deleted when the session settles

pub mod chat;
pub mod http;
pub mod router;
pub mod session;
pub mod verify;
