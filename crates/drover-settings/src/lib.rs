//! # drover-settings
//!
//! Layered process settings for the drover fleet harness.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`DroverSettings::default()`])
//! 2. **User file**: `~/.drover/settings.json` or `--settings <path>`, deep-merged over defaults
//! 3. **Environment variables**: `DROVER_*` and `OPENAI_BASE_URL` overrides
//!
//! Fleet configuration (host, count, mode, ...) is not a setting; it arrives
//! from operators over the control channel.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
