//! Multi-provider payment processing and refund dispatch.
//!
//! Three payment rails share one [`payments::provider::PaymentProvider`]
//! contract: a card/bank gateway (redirect + signed webhook), an in-chat
//! token currency (invoice + two-phase confirmation), and a blockchain
//! currency (address/comment/confirmation matching). All rails reconcile
//! into a single payment record; refunds go through the dispatcher in
//! [`services::refund`], which guarantees no payment is refunded twice.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
pub mod services;
pub mod workers;
