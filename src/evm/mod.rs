//! The EVM: a 256-bit-word stack machine executing over the world state
//! (§4.3).

pub mod gas;
pub mod machine;
pub mod opcodes;
pub mod precompiles;
pub mod types;

pub use machine::{dispatch_call, dispatch_create, run, ExecutionEnvironment, FrameResult, Log, Machine, SubState};
pub use types::{BlockHashLookup, CallKind, Halt, NoBlockHashes};
