pub mod config;
pub mod corpus;
pub mod discovery;
pub mod engine;
pub mod fsutil;
pub mod harness;
pub mod report;
pub mod source;
pub mod target;
pub mod toolchain;

pub use config::CampaignConfig;
pub use corpus::{CorpusError, CorpusManager, ImportSummary, MinimizationStrategy};
pub use discovery::{
    ChangeDetector, Declaration, DiscoveryError, DiscoveryOptions, FuzzSignature, PackageLister,
    SourceParser, TargetDiscoverer,
};
pub use engine::{EngineError, FuzzEngine, RunResult};
pub use harness::{GoTestHarness, Harness, HarnessError, HarnessMode, HarnessOutcome};
pub use report::CampaignReport;
pub use source::GoSourceParser;
pub use target::{Target, TargetKey};
pub use toolchain::{GitChangeDetector, GoPackageLister};
