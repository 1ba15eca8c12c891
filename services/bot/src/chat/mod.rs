//! services/bot/src/chat/mod.rs
//!
//! The conversation layer: per-user sessions, input guards, the file job pipeline
//! and the background tasks that deliver, fan out, broadcast and sweep.

pub mod admin;
pub mod broadcast_task;
pub mod fanout_task;
pub mod guard;
pub mod handler;
pub mod job_task;
pub mod menus;
pub mod protocol;
pub mod state;
pub mod sweep_task;

#[cfg(test)]
pub mod testing;
