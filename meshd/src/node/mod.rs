pub mod inst;
pub use inst::{Message, Node, NodeError, NodeHandle, Query, QueryReply, serve};

pub mod peer;

pub mod session;
pub use session::{RpcClient, SessionError};

pub mod gateway;
pub use gateway::{GatewayClient, GatewayService};

pub mod timer;

pub mod tracing;
