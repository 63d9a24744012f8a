//! Service layer - session lifecycle, accounting, and the repository facade
//!
//! - `classifier` - device role inference from reported model names
//! - `session` - probe/map/open/configure lifecycle per device
//! - `accounting` - baseline-diff session amounts over the inventory feed
//! - `repository` - the single facade the kiosk application talks to

pub mod accounting;
pub mod classifier;
pub mod repository;
pub mod session;

// Re-export commonly used types
pub use accounting::{AmountAccounting, AmountPoller, DeltaRecord};
pub use classifier::{Classified, ModelNameClassifier, RoleClassifier};
pub use repository::CashRepository;
pub use session::{AcceptorDevice, DeviceSession, SessionManager};
