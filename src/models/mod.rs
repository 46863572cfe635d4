pub mod conversation;
pub mod document;
pub mod message;
pub mod requests;
pub mod sse;
pub mod study;
