//! Credit accounting and usage archival.
//!
//! Charges are idempotent by key and short-circuit on non-positive
//! amounts. Usage entries are immutable; after three months they move
//! into a gzipped, user-key-encrypted archive object and leave the hot
//! store, with the monthly summary rows flagged as archived.

pub mod archive;
pub mod charge;
pub mod error;
pub mod month;

pub use {
    archive::{ArchiveFilters, DecryptedUsageEntry, UsageArchiver},
    charge::{ChargeLedger, ChargeOutcome, ChargeRequest},
    error::{BillingError, Result},
    month::{cutoff_year_month, month_window, year_month_of},
};
