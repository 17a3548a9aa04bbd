use std::collections::BTreeMap;

use crate::AttributeValue;

/// The user associated with the current scope.
#[derive(Clone, Debug, Default)]
pub struct ScopeUser {
    /// A unique identifier of the user.
    pub id: Option<String>,
    /// The username.
    pub name: Option<String>,
    /// The email address of the user.
    pub email: Option<String>,
}

/// A read-only snapshot of the ambient scope at capture time.
///
/// The scope itself is owned by the capture layer; the batcher only consumes
/// this flattened view to enrich items. All fields are optional, and absent
/// fields produce no attributes rather than null values.
#[derive(Clone, Debug, Default)]
pub struct ScopeSnapshot {
    /// The trace id of the current propagation context.
    pub trace_id: Option<String>,
    /// The span id of the active span, if any.
    pub span_id: Option<String>,
    /// The user set on the scope.
    pub user: Option<ScopeUser>,
    /// Operating system name.
    pub os_name: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// Device brand.
    pub device_brand: Option<String>,
    /// Device model.
    pub device_model: Option<String>,
    /// Device family.
    pub device_family: Option<String>,
    /// The id of the session replay recording, if one is running.
    pub replay_id: Option<String>,
    /// Free-form attributes set on the scope.
    ///
    /// Scope attributes never override attributes already present on an
    /// item.
    pub attributes: BTreeMap<String, AttributeValue>,
}
