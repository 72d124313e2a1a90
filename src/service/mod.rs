pub mod approval_broker;
pub mod chain_client;
pub mod chain_registry;
pub mod connection_store;
pub mod keystore;
pub mod rpc_dispatcher;
pub mod state_store;
pub mod wallet_broker;
