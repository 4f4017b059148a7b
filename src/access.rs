//! Visibility gate applied before any layer data is touched.

use crate::model::Layer;

/// Returns true when the caller may see this layer's data.
///
/// Draft layers are visible only to privileged callers. Callers of this gate
/// must surface a denial exactly like a missing layer (empty body or not-found,
/// never a distinct forbidden signal), so draft existence does not leak.
pub fn can_see(layer: &Layer, caller_is_privileged: bool) -> bool {
    layer.is_published() || caller_is_privileged
}
