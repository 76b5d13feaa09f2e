//! Provider ids linking machines and nodes to their VM.

/// Build the provider id of the VM `name` in `namespace`.
///
/// The id is `kubevirt://<namespace>/<name>`, unique across the
/// infrastructure cluster.
#[must_use]
pub fn format_provider_id(namespace: &str, name: &str) -> String {
    format!("kubevirt://{namespace}/{name}")
}
