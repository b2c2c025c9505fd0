//! Serial debug protocol for the cardstock handheld runtime.
//!
//! # Crate Structure
//!
//! - [`serial`]: Non-blocking serial port abstraction and host-side ports
//! - [`debug`]: Packet decoder, command dispatcher and session

/// Re-export serial transport types.
pub mod serial {
    pub use cardstock_serial::*;
}

/// Re-export debug protocol types.
pub mod debug {
    pub use cardstock_debug::*;
}
