pub mod composite;
pub mod factory;
pub mod node;
pub mod port;
