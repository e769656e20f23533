//! Utility library for the meta planning software
//!
//! Provides the ambient services shared by every executable in the workspace: sessions, logging,
//! parameter loading, archiving and a handful of maths helpers.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod host;
pub mod logger;
pub mod maths;
pub mod module;
pub mod params;
pub mod session;
pub mod time;
