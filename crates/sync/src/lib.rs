//! Packaging and publishing for depot.
//!
//! This crate provides:
//! - Packaging a build directory into the local chunk store
//! - Typed access to the published remote layout
//! - Upload sessions with pause, resume and cancel
//! - Remote verification and promotion of versions to latest

pub mod error;
pub mod package;
pub mod remote;
pub mod upload;

pub use error::{SyncError, SyncResult};
pub use package::{PackageOptions, PackageReport, SourceFile, collect_files, package};
pub use remote::RemoteRepository;
pub use upload::{PromotionReport, UploadSession, Uploader, VerifyReport, plan_upload};
