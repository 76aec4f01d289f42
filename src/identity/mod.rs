//! Identity resolution: name cleanup, club context, matching and repair.
//!
//! [`IdentityMatcher`] decides which Player a raw name denotes. The other
//! components repair the store after the fact: [`OverlapDetector`] and
//! [`IdentitySplitter`] separate different people sharing one name, and
//! [`DuplicateConsolidator`] merges one person spread over several names.

pub mod club;
pub mod consolidate;
pub mod matcher;
pub mod normalizer;
pub mod overlap;
pub mod similarity;
pub mod splitter;

pub use club::ClubContextResolver;
pub use consolidate::{
    CaseGroup, CaseOutcome, DuplicateConsolidator, DuplicateKind, MappingSuggestion, MergeOutcome,
    TypoPair, merge_players,
};
pub use matcher::{Decision, IdentityMatcher, MatchContext, MatchDecision};
pub use normalizer::NameNormalizer;
pub use overlap::{OverlapDetector, OverlapFinding, OverlapSettings, PlayerOverlapReport};
pub use splitter::{IdentitySplitter, SplitOutcome, SplitPlan};
