pub mod dispatch;
pub mod engine;
