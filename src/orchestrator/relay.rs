//! Mapping of relayed bridge commands to device ids.
//!
//! Commands that go straight through the REST proxy bypass the worker but still have
//! to refresh the debounce window of the running scene.

const DEVICE_RESOURCES: &[&str] = &["light", "grouped_light"];

/// Device id targeted by a relayed command, if it is a `PUT` on a device resource.
///
/// Accepts both bridge paths (`/clip/v2/resource/light/<id>`) and proxied ones
/// (`/api/clip/v2/resource/light/<id>?x=y`).
pub fn device_id_for_command<'a>(method: &str, path: &'a str) -> Option<&'a str> {
    if !method.eq_ignore_ascii_case("PUT") {
        return None;
    }
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "resource")?;
    let kind = segments.next()?;
    let id = segments.next()?;
    DEVICE_RESOURCES.contains(&kind).then_some(id)
}
