#![deny(
    rust_2018_compatibility,
    rust_2018_idioms,
    nonstandard_style,
    unused,
    future_incompatible
)]
#![warn(clippy::doc_markdown)]

//! Datasets and buffers shared by the tests and benches of the workspace.

pub mod counting_access;
pub mod data_sets;
