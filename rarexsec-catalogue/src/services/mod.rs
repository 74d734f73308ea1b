//! Service modules for catalogue building
//!
//! Leaf components used by the sample processor: file discovery, event-file reading
//! (with the ROOT key index behind it), identifier extraction, POT accumulation, the
//! merge tool, the stage resolver, and the prescale service.

pub mod event_file;
pub mod file_scanner;
pub mod identifier_extractor;
pub mod merge_tool;
pub mod pot_accumulator;
pub mod prescale_client;
pub mod root_layout;
pub mod stage_resolver;

pub use event_file::{EventFile, EventFileError, EventFileReader, RootFileReader};
pub use file_scanner::{DirectoryListingCache, FileScanner, ScanError};
pub use identifier_extractor::IdentifierExtractor;
pub use merge_tool::{FileMerger, HaddMerger, MergeError, MergeReport};
pub use pot_accumulator::{PotAccumulator, PotCache};
pub use prescale_client::{
    HttpPrescaleService, PrescaleCorrector, PrescaleError, PrescaleService, PrescaledTriggers,
    UnavailablePrescaleService,
};
pub use root_layout::{LayoutError, RootLayout};
pub use stage_resolver::{StageError, StageOutdirs};
