//! # pagewire-settings
//!
//! Layered configuration for the session gateway and the page runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PagewireSettings::default()`]
//! 2. **Settings file**: `~/.pagewire/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PAGEWIRE_*` overrides (highest priority)
//!
//! There is no process-wide settings singleton; callers load a value and
//! hand it to the gateway or runtime they construct.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_file_layer, load_settings, load_settings_from_path,
    parse_bool, parse_i64_range, parse_list, parse_u16_range, parse_u64_range, settings_path,
};
pub use types::*;
