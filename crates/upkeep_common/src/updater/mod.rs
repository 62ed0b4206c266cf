//! Self-update engine: check a remote manifest, download and verify a
//! package, apply it over the live tree with backup and rollback.

pub mod extract;
pub mod fetch;
pub mod hooks;
pub mod integrity;
pub mod interrupt;
pub mod lock;
pub mod manifest;
pub mod mirror;
pub mod payload;
pub mod steps;
pub mod version;

pub use hooks::{
    Authorizer, CacheReset, HttpRemote, LocalOperator, NoCacheReset, Remote, ShellCacheReset,
};
pub use interrupt::InterruptFlag;
pub use lock::{LockCoordinator, LockHandle, LockInfo, MaintenanceGuard};
pub use manifest::{CachedManifest, ManifestCache, RemoteManifest};
pub use mirror::{exclude_set, mirror, ExcludeSet, MirrorReport, TreeMirror, TreeOps};
pub use steps::{
    CheckReport, Command, CommandReport, ReportStatus, StatusReport, UpdateExecutor, UpdateResult,
    UpdateStep,
};
pub use version::{compare, Comparison, VersionStore, UNKNOWN_VERSION};
