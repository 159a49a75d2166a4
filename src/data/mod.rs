//! Record decoding, entity assembly and feature engineering

pub mod assembler;
pub mod features;
pub mod feed;
pub mod history;
pub mod parser;
pub mod spec;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use assembler::{EntityAssembler, RaceSnapshot};
pub use features::{feature_names, FeatureEngineering, FeatureVector, SkipReason};
pub use feed::{FeedDirectory, FeedSession, RawRecord, RecordSource};
pub use history::{HorseHistory, HorseHistoryIndex};
pub use parser::{Decoded, RecordDecoder, Rejection, TypedRecord};
pub use spec::{DataSpec, FieldSpec, LoopSpec, RecordSpec};
