//! Property-based tests
//!
//! Invariants that must hold for all inputs, checked with proptest:
//!
//! - `evaluation_props`: scores stay within `[0, 1]`, evaluation is
//!   deterministic, violations always force review
//! - `composition_props`: prompt hashes are deterministic and follow the
//!   layer hashes
//! - `retry_props`: the retry loop terminates within its budget, and the
//!   output split never invents languages
//!
//! Run them with:
//! ```sh
//! cargo test property --release
//! ```

mod composition_props;
mod evaluation_props;
mod retry_props;
