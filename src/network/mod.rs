pub mod jupiter;
pub mod rpc;

pub use jupiter::JupiterClient;
pub use rpc::RpcConfirmer;
