//! Player identity resolution for scraped dart-league results
//!
//! Scraped match sheets only give a raw name, a team label and a time for
//! every player appearance. This library decides which canonical identity
//! each appearance belongs to, stores that decision, and ships the repair
//! tools that undo wrong decisions afterwards: overlap detection, identity
//! splitting, duplicate consolidation and reviewed global mappings.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dart_identity::error::AppError;
//! use dart_identity::identity::{ClubContextResolver, IdentityMatcher, NameNormalizer};
//! use dart_identity::store::Database;
//!
//! fn main() -> Result<(), AppError> {
//!     let db = Database::open_in_memory()?;
//!     let matcher =
//!         IdentityMatcher::build(db.conn(), NameNormalizer::new(), ClubContextResolver::new())?;
//!
//!     let decision = matcher.resolve(db.conn(), "mats  ANDERSSON", Some("SSDC 1"))?;
//!     println!("{} ({}%)", decision.target_name, decision.confidence);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod import;
pub mod logging;
pub mod store;
pub mod summary;
pub mod testing_utils;

pub use config::Config;
pub use error::AppError;
pub use identity::{IdentityMatcher, MatchDecision};
pub use import::{ImportJob, ObservationSource, RawObservation};
pub use store::Database;
pub use summary::BatchSummary;
