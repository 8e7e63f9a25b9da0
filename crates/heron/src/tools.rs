pub mod invocation;
pub mod model_tool;
pub mod registry;

pub use invocation::ToolInvocation;
pub use model_tool::ModelTool;
pub use registry::{InvocationFailure, ToolRegistry};
