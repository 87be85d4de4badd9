//! Live HLS relay: moves segments of an in-progress HLS broadcast into the
//! resumable upload of a destination video platform.
//!
//! Architecture:
//! - `playlist`    - media playlist parsing and URL resolution
//! - `source`      - HTTP client for the origin (manifest + segments)
//! - `destination` - resumable upload client (create, byte-range append, finalize)
//! - `actor`       - one serialized actor per stream id, owning its session state
//! - `registry`    - stream id -> actor handle, spawn and cold-start resume
//!
//! All operations for a stream id (start, status, stop and the periodic tick)
//! run one at a time inside that stream's actor task.

pub mod actor;
pub mod destination;
pub mod error;
pub mod playlist;
pub mod registry;
pub mod source;

pub use actor::{FinalStats, RelayHandle, StartOutcome, StartRequest, StatusSnapshot, TickReport};
pub use destination::{DestinationClient, DestinationCredentials, UploadSession};
pub use error::{RelayError, RelayResult};
pub use registry::{RelayContext, RelayRegistry};
pub use source::SourceClient;
