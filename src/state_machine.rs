//! Conversational flow controller
//!
//! Implements the Elm Architecture pattern with pure state transitions over
//! the lab-building stage graph.

mod effect;
pub mod event;
mod stage;
pub mod state;
mod stream;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, ExtractionOutput};
pub use stage::Stage;
pub use state::{
    ChatMessage, ChatRole, ConvContext, ConvState, ErrorKind, ExtractionTarget, HistoryPolicy,
    MessageType, RequestMode, ThreadState, ThreadValues, ToolCall, UiMessage,
};
pub use stream::{StreamEvent, ToolStatus};
pub use transition::{transition, TransitionError, TransitionResult, GREETING};
