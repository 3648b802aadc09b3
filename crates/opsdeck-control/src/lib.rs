//! opsdeck-control — operator lifecycle commands.
//!
//! Start, stop, restart, and reboot are sent to the owning project's
//! control plane as fire-and-forget requests. A successful dispatch means
//! the control plane *accepted* the command, nothing more; callers refresh
//! the fleet snapshot a few seconds later to observe the effect.
//!
//! Unlike probe failures, dispatch failures are always returned to the
//! caller, since they answer an explicit operator request.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{CommandDispatcher, DispatchAck};
pub use error::DispatchError;
