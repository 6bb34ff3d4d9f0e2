//! End-to-end engine scenarios.

mod support;
