//! localstack build agent
//!
//! Everything that runs inside the build container, plus the pure pieces
//! the host needs before a container exists:
//! - [`resolve`]: upstream component versions
//! - [`decision`]: whether a build is required
//! - [`checkpoint`]: recorded versions in the release store
//! - [`keys`]: signing key bundles
//! - [`customize`]: ordered source-tree customization
//! - [`executor`]: the stage list and its toolchain calls
//! - [`publish`]: release artifacts and update pointers
//! - [`run`]: one full build run

pub mod checkpoint;
pub mod customize;
pub mod decision;
pub mod error;
pub mod executor;
pub mod keys;
pub mod logging;
pub mod publish;
pub mod resolve;
pub mod retry;
pub mod run;
pub mod runner;
pub mod store;

pub use checkpoint::{recorded_versions, write_checkpoint};
pub use decision::decide;
pub use error::BuildError;
pub use executor::{stages_for, BuildStage, Executor, StageError, Workspace};
pub use keys::{KeyBundle, KeyManager};
pub use publish::{BuildArtifactSet, Publisher};
pub use resolve::{HttpMetadataSource, MetadataSource, StaticMetadataSource, VersionResolver};
pub use retry::RetryPolicy;
pub use run::{run_build, BuildRunState};
pub use runner::{CommandRunner, CommandSpec, RecordingRunner, SystemRunner};
pub use store::{BlobStore, FsBlobStore};
