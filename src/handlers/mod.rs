pub mod chat;
pub mod conversations;
pub mod documents;
pub mod export;
pub mod health;
pub mod messages;
pub mod study;
