//! Webhook Dispatcher and its parallel handler set (C14, spec.md §4.3;
//! C15, spec.md §4.12). `dispatcher` owns admission (`Submit`) and the
//! single queue-draining worker; `automation` and `reconciler` are two of
//! the handlers that worker fans an accepted event out to.

pub mod automation;
pub mod dispatcher;
pub mod reconciler;

pub use dispatcher::WebhookDispatcher;
