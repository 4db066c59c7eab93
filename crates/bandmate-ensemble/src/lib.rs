//! Concrete bandmates.
//!
//! - `Drummer` - Keeps time and announces fills ahead of playing them
//! - `Bassist` - Follows the key and simplifies under announced fills
//! - `ExpectationBook` - Pending intents with expiry
//! - `Ensemble` - Builds agents from `[[agents]]` configuration

pub mod bass;
pub mod drums;
pub mod ensemble;
pub mod expectations;
pub mod voicing;

pub use bass::Bassist;
pub use drums::{Drummer, FillPlan, PlannedFill};
pub use ensemble::{Ensemble, EnsembleError};
pub use expectations::{Expectation, ExpectationBook};
