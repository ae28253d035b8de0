pub mod explicit_locks;
pub mod expiry;
pub mod lock_registry;
