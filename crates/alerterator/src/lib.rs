//! Reconciles `Alert` custom resources into the shared Alertmanager configuration.
//!
//! Each [`Alert`](crd::Alert) contributes a route, a receiver and inhibition rules to a single
//! configuration document. The [`reconcile`] module computes the new document, the
//! [`reconciler`] loads it from and saves it to a [`ConfigStore`](store::ConfigStore).

pub mod cli;
pub mod crd;
pub mod document;
pub mod duration;
pub mod logging;
pub mod merge;
pub mod reconcile;
pub mod reconciler;
pub mod store;
pub mod validation;
