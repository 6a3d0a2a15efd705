//! Sandboxed tool catalog the conversation engine exposes to the model.
//!
//! Every operation is confined to one declared root directory. Failures
//! never escape as `Err`: they come back as a [`ToolOutput`] the engine can
//! append to the conversation as a `tool` message, so the model can read
//! the problem and try again.

mod call;
mod catalog;
mod git;
mod paths;
mod sandbox;
mod search;
mod tree;

pub use call::SandboxCall;
pub use catalog::tool_definitions;
pub use sandbox::{
    SandboxError, SandboxFlavor, ToolExecutor, ToolOutput, ToolSandbox, READ_MAX_BYTES,
};
pub use tree::DEFAULT_TREE_DEPTH;
