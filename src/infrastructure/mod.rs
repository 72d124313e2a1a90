pub mod approval_window;
pub mod encryption;
pub mod event_bus;
pub mod kv_store;
pub mod logging;
pub mod rpc_validator;
