//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it changes.

mod gateway;
mod runtime;

pub use gateway::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

/// Root settings document.
///
/// ```json
/// {
///   "gateway": { "port": 9000, "authToken": "s3cret" },
///   "runtime": { "sessionId": "checkout-tab" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PagewireSettings {
    /// Server-side broker.
    pub gateway: GatewaySettings,
    /// In-page counterpart.
    pub runtime: RuntimeSettings,
}
