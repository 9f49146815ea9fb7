pub mod archive;
pub mod detect;
pub mod dex;
pub mod engine;
pub mod error;
pub mod extract;
pub mod features;
pub mod fuzzy;
pub mod matcher;
pub mod object;
pub mod options;
pub mod sigfile;
pub mod source;
pub mod store;
pub mod strings;
pub mod traits;
pub mod validate;

pub use detect::{sniff, FileKind, SourceLang, ZipFlavor};
pub use engine::{default_store_path, AnalysisResult, Engine, FileHashes};
pub use error::{ErrorInfo, SnifferError};
pub use features::{Feature, FeatureSet};
pub use matcher::{ComponentMatch, Evidence, MatchMethod};
pub use options::AnalysisOptions;
pub use sigfile::{parse_signature, ParsedPattern, ParsedSignature};
pub use store::{ComponentRow, ImportReport, SignatureStore, StoreSnapshot, StoreStatus};
pub use traits::PatternLookup;
