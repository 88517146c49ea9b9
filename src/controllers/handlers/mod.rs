pub mod watch_mapper;

pub use watch_mapper::GatewayRefMapper;
