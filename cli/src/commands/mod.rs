pub mod chat;
pub mod countdown;
pub mod health;
