//! The mergers maintaining the entries one [`Alert`](crate::crd::Alert) contributes to each
//! section of the configuration document.
//!
//! Every merger takes the document by reference and returns the complete new section, leaving
//! it to the caller to put the section back. A failing merger therefore never leaves a document
//! half updated.

pub mod inhibition;
pub mod receiver;
pub mod route;
