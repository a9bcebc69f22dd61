//! Language-server protocol engine for ember.
//!
//! [`serve`] drives one client connection over any async byte stream. The
//! engine owns the protocol lifecycle, document state, diagnostics merging,
//! request cancellation and build scheduling; parsing, compiling, analysis and
//! editor features are supplied through the [`Toolchain`] collaborators.

pub mod codec;
pub mod documents;
pub mod protocol;
pub mod providers;
pub mod syntax;
pub mod toolchain;

mod build;
mod command;
mod debounce;
mod diagnostics;
mod ledger;
mod router;
mod server;
mod session;
mod telemetry;

pub use command::{CommandAnalyzer, CommandBuilder, expand_env_vars};
pub use server::serve;
pub use session::EngineOptions;
pub use toolchain::{
    AnalysisError, AnalysisFut, AnalysisRequest, Analyzer, BuildFut, BuildReport, BuildRequest,
    BuildStatus, Builder, SyntaxChecker, Toolchain,
};
