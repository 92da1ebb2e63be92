//! Config entries: configured integration instances and the flows that
//! create them
//!
//! A config entry records one set-up instance of an integration (one
//! media controller, one bridge) together with its connection data. The
//! [`ConfigEntries`] store persists entries, enforces unique-id dedup,
//! and drives setup/unload through a validated lifecycle state machine.
//! New entries are produced by config flows run by the [`FlowManager`].

pub mod entry;
pub mod flow;
pub mod manager;
pub mod state_machine;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};
pub use flow::{
    ConfigFlow, FlowContext, FlowError, FlowHandlerFactory, FlowInput, FlowManager, FlowResult,
    SsdpInfo,
};
pub use manager::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, SetupError, SetupHandler, SetupResult,
    UnloadHandler,
};
pub use state_machine::{calculate_retry_delay, InvalidTransition};
