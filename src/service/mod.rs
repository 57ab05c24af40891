//! Service layer: command validation and deduplication.
//!
//! [`CommandTranslator`] turns untrusted client JSON into typed
//! [`crate::domain::Command`]s and hands them to the bus through a
//! [`CommandSink`].

pub mod command_translator;
pub mod dedup;

pub use command_translator::{
    CommandReceipt, CommandRejection, CommandSink, CommandTranslator, Translation,
};
pub use dedup::DedupWindow;
