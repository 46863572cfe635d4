pub mod chunks;
pub mod conversations;
pub mod documents;
pub mod messages;
pub mod study;
pub mod vectors;
