//! Recorded versions
//!
//! The checkpoint is the `ComponentVersionSet` of the last build whose
//! artifacts were fully published. It lives as five revision objects in
//! the release store.

use localstack_model::{layout, ComponentVersionSet};

use crate::store::{BlobStore, StoreError};

/// Read the recorded versions for a device.
///
/// Returns None while the stack revision is missing or empty: it is written
/// last, so without it no checkpoint ever completed. Other missing objects
/// read as empty strings.
pub fn recorded_versions(
    store: &dyn BlobStore,
    device: &str,
) -> Result<Option<ComponentVersionSet>, StoreError> {
    let Some(stack) = store.get_string(layout::STACK_REVISION)? else {
        return Ok(None);
    };
    let [platform, browser, client, extension] = [
        store.get_string(&layout::vendor_revision(device))?,
        store.get_string(layout::CHROMIUM_REVISION)?,
        store.get_string(layout::FDROID_REVISION)?,
        store.get_string(layout::FDROID_PRIV_REVISION)?,
    ]
    .map(Option::unwrap_or_default);

    Ok(Some(ComponentVersionSet {
        stack,
        platform_build: platform,
        platform_branch: String::new(),
        browser_engine: browser,
        app_store_client: client,
        privileged_extension: extension,
    }))
}

/// Persist `latest` as the recorded versions.
///
/// The stack revision is written last: it marks a complete checkpoint.
pub fn write_checkpoint(
    store: &dyn BlobStore,
    device: &str,
    latest: &ComponentVersionSet,
) -> Result<(), StoreError> {
    store.put_string(&layout::vendor_revision(device), &latest.platform_build)?;
    store.put_string(layout::CHROMIUM_REVISION, &latest.browser_engine)?;
    store.put_string(layout::FDROID_REVISION, &latest.app_store_client)?;
    store.put_string(layout::FDROID_PRIV_REVISION, &latest.privileged_extension)?;
    store.put_string(layout::STACK_REVISION, &latest.stack)?;
    tracing::info!(
        "Checkpointed stack={} platform={} chromium={} fdroid={} fdroid-priv={}",
        latest.stack,
        latest.platform_build,
        latest.browser_engine,
        latest.app_store_client,
        latest.privileged_extension
    );
    Ok(())
}
