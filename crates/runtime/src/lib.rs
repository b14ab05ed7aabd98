//! Chromium engine for otpgate acquisitions.
//!
//! [`ChromiumLauncher`] starts one headless Chromium process per context,
//! each with a throwaway profile directory, so no cookie or storage state
//! survives between attempts.

mod chromium;

pub use chromium::{ChromiumLauncher, ChromiumOptions};
