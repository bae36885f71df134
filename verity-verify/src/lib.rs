#![forbid(unsafe_code)]

pub mod config;
pub mod constraints;
pub mod pipeline;
pub mod vc;
pub mod vcgen;

pub use config::{ConfigError, VcGenConfig};
pub use constraints::{ConstraintCollector, ConstraintKind};
pub use pipeline::{Pipeline, PipelineReport};
pub use vc::{Location, ModuleVcs, VcRule, VerificationCondition};
pub use vcgen::VcGenerator;
