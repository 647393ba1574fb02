//! Core systems for udpchannel.
//!
//! This crate provides the foundational pieces shared by the transport crate:
//!
//! - **Signal/Slot System**: Type-safe lifecycle notifications
//! - **Cancellation**: Reason-carrying cancellation tokens with child tokens
//! - **Logging**: `tracing` targets and performance spans
//!
//! # Signal/Slot Example
//!
//! ```
//! use udpchannel_core::Signal;
//!
//! let closed = Signal::<()>::new();
//! let conn_id = closed.connect(|_| println!("listener closed"));
//! closed.emit(());
//! closed.disconnect(conn_id);
//! ```
//!
//! # Cancellation Example
//!
//! ```
//! use udpchannel_core::CancellationToken;
//!
//! let channel = CancellationToken::new();
//! let request = channel.child_token();
//!
//! channel.cancel("disconnect");
//! assert!(request.is_cancelled());
//! assert_eq!(request.reason().as_deref(), Some("disconnect"));
//! ```

pub mod cancellation;
pub mod logging;
pub mod signal;

pub use cancellation::CancellationToken;
pub use logging::PerfSpan;
pub use signal::{ConnectionId, Signal};
