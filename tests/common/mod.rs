pub mod scripted;
pub mod test_app;

pub use scripted::ScriptedProvider;
pub use test_app::{TestApp, TestAppOptions};
