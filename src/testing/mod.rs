//! Test helpers for asserting on delivered events.
//!
//! Enabled by the `test-harness` feature (on by default):
//!
//! ```toml
//! [dev-dependencies]
//! pulse = { version = "0.1", features = ["test-harness"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mailbox = Mailbox::new("probe").listen_to(["checkout.end"]);
//! dispatcher.add_handler(mailbox.clone())?;
//!
//! run_checkout(&dispatcher);
//!
//! assert!(mailbox.assert_receive("checkout.end", Duration::from_secs(1), |_, mail| {
//!     mail.iter().any(|m| m.metadata["result"] == "ok")
//! }));
//! ```

mod mail_data;
mod mailbox;

pub use mail_data::MailData;
pub use mailbox::Mailbox;

/// A boxed mailbox predicate, for keeping several of them in one collection.
pub type MailPredicate = Box<dyn Fn(&str, &[MailData]) -> bool + Send + Sync>;
