pub mod migrations;
pub mod pool;
pub mod sessions;
