pub mod batch;
pub mod cancel;
pub mod classifier;
pub mod fees;
pub mod monitor;
pub mod network;
pub mod nonce;
pub mod notify;
pub mod rows;
pub mod sender;
pub mod store;
