//! `dispatch` crate: the `WorkDispatcher` trait, the work payload carried by
//! task nodes, and the built-in dispatcher implementations.
//!
//! The engine never runs work itself. Every task node hands its
//! [`WorkPayload`] to a [`WorkDispatcher`] and then polls the returned
//! [`WorkItemId`] until it reaches a terminal [`WorkStatus`].

pub mod error;
pub mod payload;
pub mod traits;
pub mod process;
pub mod mock;

pub use error::{DispatchError, PayloadError};
pub use payload::{Priority, WorkPayload};
pub use traits::{WorkDispatcher, WorkItemId, WorkStatus};
