pub use entity::{delivery_mode, messages, Id};

pub mod error;
pub mod message;
