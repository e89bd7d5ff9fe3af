pub mod api;
pub use api::{Scope, SecretVerifier, TokenVerifier};

pub mod server;
pub use server::{RpcContext, serve};
