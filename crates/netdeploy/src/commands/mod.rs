pub mod cluster;
pub mod destroy;
pub mod lock;
pub mod network;
pub mod node;
pub mod status;
