//! Test suites for the extractor library.

pub(crate) mod support;
