//! Cyclic module interface
//!
//! Modules driven by an executable's main loop (the tracker being the main one) implement
//! [`State`], so that every executable initialises and steps them the same way.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// A module which is initialised once and then processed every cycle.
///
/// A default constructed module is uninitialised, and `proc` is expected to fail until `init`
/// has succeeded.
pub trait State {
    /// Everything the module needs to build itself
    type InitData;
    type InitError;

    /// Per cycle input
    type InputData;
    /// Per cycle output
    type OutputData;
    /// Monitoring information produced alongside the output every cycle
    type StatusReport;
    type ProcError;

    /// Build the module from `init_data`.
    ///
    /// `session` is `None` when running outside an executable, for instance in tests, in which
    /// case the module must not write archives.
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: Option<&Session>,
    ) -> Result<(), Self::InitError>;

    /// Run one cycle, returning the output and a status report.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}
