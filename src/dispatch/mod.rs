//! Top-level dispatch router and its builder.

pub mod builder;
pub mod core;

pub use builder::DispatcherBuilder;
pub use core::Dispatcher;
