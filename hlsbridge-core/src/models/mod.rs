mod ledger;
mod session;

pub use ledger::SegmentLedger;
pub use session::{mask_secret, RelaySessionState, SessionStatus};
