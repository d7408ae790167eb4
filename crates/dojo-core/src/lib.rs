//! Dojo core: shared types for the AI-mentored IDE gateway.
//!
//! - [`persona`]: the fixed mentor personas as data (instruction text + display metadata)
//! - [`protocol`]: the text-plus-JSON wire format the mentor model emits
//! - [`chat`]: conversational roles and history turns
//! - [`model`]: streaming client for the upstream model (mock or live OpenRouter-compatible API)
//! - [`error`]: the gateway error taxonomy

pub mod chat;
pub mod error;
pub mod model;
pub mod persona;
pub mod protocol;

pub use chat::{ChatTurn, Role};
pub use error::GatewayError;
pub use model::{LlmMode, ModelClient};
pub use persona::{Persona, PersonaProfile};
pub use protocol::{ControlBlock, DecodedReply, CONTROL_DELIMITER};
