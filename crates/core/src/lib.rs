pub mod chat;
pub mod dialogue;
pub mod evaluation;
pub mod persistence;
pub mod session;
