//! Transaction submission and redispatch

pub mod backend;
pub mod redispatch;

pub use backend::{Dispatched, SignerBackend, WalletBackend};
pub use redispatch::{DispatchEvent, ManagedSigner, RedispatchPolicy, RedispatchSigner};
