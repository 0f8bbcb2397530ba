pub mod agent;
pub mod clock;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod printing;
pub mod queue;
pub mod shutdown;
pub mod spooler;
pub mod stale;
pub mod tunnel;
pub mod watcher;
