//! PrimeNet v5 transport: argument encoding and request signing, response
//! decoding, result-code taxonomy, the HTTP client, and the website
//! endpoints used for manual mode and exponent reports.

pub mod args;
pub mod client;
pub mod codes;
pub mod exponent;
pub mod manual;
pub mod metrics;
pub mod options;
pub mod replies;
pub mod response;
pub mod retry;
pub mod session;
pub mod signing;

pub use args::{Transaction, TransactionArgs};
pub use client::{TransportError, V5Client};
pub use codes::PrimeNetCode;
pub use exponent::{ExponentReport, ExponentStatus};
pub use manual::{ManualFetch, ManualSubmission, WebsiteClient};
pub use metrics::TransportMetricsSnapshot;
pub use options::TransportOptions;
pub use replies::{AssignmentGrant, ProgramOptionsReply, RegisteredKey, RegistrationReply};
pub use response::{ResponseMap, V5Response};
pub use session::Session;
pub use signing::SigningMode;
