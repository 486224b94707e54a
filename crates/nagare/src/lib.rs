//! ┌──────────┐  reload   ┌──────────┐  update   ┌──────────┐
//! │ Manifest ├───────────► Timeline ├───────────►  Window  │ (one per source)
//! └────▲─────┘           └──────────┘           └────┬─────┘
//!      │                                             │ download_next_segment
//!      │                 ┌──────────┐           ┌────▼─────┐
//!      └─────────────────┤Controller◄───────────┤ Download ├──► BaseManager
//!                        └────┬─────┘  outcome  └──────────┘
//!                             │ append / remove
//!                        ┌────▼─────┐
//!                        │BufferSink│
//!                        └──────────┘

pub mod clock;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod net;
pub mod range;
pub mod selector;
pub mod sink;
pub mod timeline;
pub mod window;

pub use controller::{Controller, ControllerHandle, ControllerOptions, PlayerEvent, PlayerState};
pub use error::{NagareError, NagareResult};
pub use range::ByteRange;
