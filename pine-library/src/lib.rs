//! Upload library for Red Pine - decoding, bulk analysis, and caching

mod batch;
mod cache;
mod config;
mod loader;

pub use batch::{
    analyze_with_budget, collect_files, AnalysisMode, BatchConfig, BatchError, BulkAnalyzer,
    BulkItem, BulkProgress, BulkReport, BulkStatus,
};
pub use cache::{AnalysisCache, CacheError, CachedAnalysis, FileStamp};
pub use config::{Config, DEFAULT_EXTENSIONS};
pub use loader::{DecodedTrack, LoadError, TrackLoader, TrackMetadata};
