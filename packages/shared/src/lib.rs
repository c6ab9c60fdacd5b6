//! Shared kernel for the Tandem watch-party application.
//!
//! Everything both the server and the client need to agree on lives here:
//! the wire protocol, room-code handling, clock access, and logging setup.

pub mod logger;
pub mod protocol;
pub mod room_code;
pub mod time;
