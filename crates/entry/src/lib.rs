//! Inbox entries with file attachments.
//!
//! An [`EntryUploadHandler`] owns one prepared entry and one transfer engine
//! per attachment. Attachments upload concurrently; the entry itself can only
//! be submitted once every attachment made it.
//!
//! ```text
//! Prepared --start_sending--> FilesSent --send_entry--> Sent
//! Prepared | FilesSent --cancel--> Aborted
//! any --failure--> Error
//! ```

pub mod error;
pub mod handler;
pub mod types;

pub use error::EntryError;
pub use handler::EntryUploadHandler;
pub use types::{EntryEvent, EntryOptions, TransferState};
