//! The entities passed around by the orchestration core.
//!
//! Several wire formats overlap here: the OpenAI and Anthropic message and
//! tool shapes sent to providers, the tagged text grammars parsed back out
//! of free-form replies, and the records a hosting application persists.
//! Provider adapters convert to and from these internal structs immediately
//! at the boundary, so the internal models are not an exact match for any
//! single wire format.

pub mod completion;
pub mod content;
pub mod lifecycle;
pub mod message;
pub mod role;
pub mod source;
pub mod tool;
