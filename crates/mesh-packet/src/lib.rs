pub mod channel;
pub mod notification;
pub mod open;
pub mod peer;
pub mod update;

pub use channel::*;
pub use notification::*;
pub use open::*;
pub use peer::*;
pub use update::*;

pub mod frame;
pub use frame::*;

pub mod rpc;
pub use rpc::*;

pub mod error;
pub use error::*;
