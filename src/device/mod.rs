pub mod context;

pub use context::DeviceContext;
