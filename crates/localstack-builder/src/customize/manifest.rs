//! Local manifest overlay
//!
//! Rendered with tera into `.repo/local_manifests/localstack.xml`. Entry
//! order is fixed: built-in remotes and projects, upstream removals, custom
//! remotes, custom projects, then the attestation project. Values are
//! autoescaped because the template name ends in `.xml`.

use serde::Serialize;
use tera::{Context, Tera};

use localstack_model::{BuildConfig, ComponentVersionSet};

use super::CustomizeError;

/// Overlay location relative to the tree root
pub const LOCAL_MANIFEST_PATH: &str = ".repo/local_manifests/localstack.xml";

const TEMPLATE_NAME: &str = "local_manifest.xml";

/// Upstream projects dropped from the manifest
pub const REMOVED_PROJECTS: [&str; 3] = [
    "platform/packages/apps/Browser2",
    "platform/packages/apps/Calendar",
    "platform/packages/apps/QuickSearchBox",
];

const GITHUB_FETCH: &str = "https://github.com/RattlesnakeOS/";
const FDROID_FETCH: &str = "https://gitlab.com/fdroid/";

#[derive(Serialize)]
struct RemoteContext<'a> {
    name: &'a str,
    fetch: &'a str,
    revision: Option<&'a str>,
}

#[derive(Serialize)]
struct ProjectContext<'a> {
    path: &'a str,
    name: &'a str,
    remote: &'a str,
}

#[derive(Serialize)]
struct ManifestContext<'a> {
    github_fetch: &'a str,
    fdroid_fetch: &'a str,
    android_version: &'a str,
    privileged_extension: &'a str,
    removed_projects: &'a [&'a str],
    remotes: Vec<RemoteContext<'a>>,
    projects: Vec<ProjectContext<'a>>,
    attestation: bool,
}

/// Render the overlay for a config and resolved versions
pub fn render_local_manifest(
    config: &BuildConfig,
    latest: &ComponentVersionSet,
) -> Result<String, CustomizeError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![".xml"]);
    tera.add_raw_template(
        TEMPLATE_NAME,
        include_str!("../../templates/local_manifest.xml.tera"),
    )
    .map_err(|e| CustomizeError::Template(format!("failed to load manifest template: {}", e)))?;

    let data = ManifestContext {
        github_fetch: GITHUB_FETCH,
        fdroid_fetch: FDROID_FETCH,
        android_version: &config.android_version,
        privileged_extension: &latest.privileged_extension,
        removed_projects: &REMOVED_PROJECTS,
        remotes: config
            .custom_manifest_remotes
            .iter()
            .map(|r| RemoteContext {
                name: &r.name,
                fetch: &r.fetch,
                revision: r.revision.as_deref(),
            })
            .collect(),
        projects: config
            .custom_manifest_projects
            .iter()
            .map(|p| ProjectContext {
                path: &p.path,
                name: &p.name,
                remote: &p.remote,
            })
            .collect(),
        attestation: config.enable_attestation,
    };

    let context = Context::from_serialize(&data)
        .map_err(|e| CustomizeError::Template(format!("failed to build manifest context: {}", e)))?;
    let mut xml = tera
        .render(TEMPLATE_NAME, &context)
        .map_err(|e| CustomizeError::Template(format!("failed to render manifest: {}", e)))?;
    if !xml.ends_with('\n') {
        xml.push('\n');
    }
    Ok(xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use localstack_model::{ManifestProject, ManifestRemote};
    use std::path::PathBuf;

    fn config() -> BuildConfig {
        BuildConfig {
            schema_version: 1,
            schema_id: "localstack/build_config@1".to_string(),
            name: "localstack".to_string(),
            device: "crosshatch".to_string(),
            stack_version: "v5".to_string(),
            ignore_version_checks: false,
            chromium_version: None,
            hosts_file: None,
            enable_attestation: false,
            custom_manifest_remotes: Vec::new(),
            custom_manifest_projects: Vec::new(),
            custom_patches: Vec::new(),
            custom_scripts: Vec::new(),
            custom_prebuilts: Vec::new(),
            nproc: 4,
            state_dir: PathBuf::from("/tmp"),
            release_channel: "stable".to_string(),
            build_type: "user".to_string(),
            android_version: "10.0".to_string(),
            release_url: "https://ota.example.net".to_string(),
            aosp_build: None,
            aosp_branch: None,
        }
    }

    fn latest() -> ComponentVersionSet {
        ComponentVersionSet {
            privileged_extension: "0.2.10".to_string(),
            ..ComponentVersionSet::default()
        }
    }

    #[test]
    fn test_builtin_entries() {
        let xml = render_local_manifest(&config(), &latest()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<manifest>\n"));
        assert!(xml.contains(
            r#"<remote name="github" fetch="https://github.com/RattlesnakeOS/" revision="10.0" />"#
        ));
        assert!(xml.contains(r#"revision="refs/tags/0.2.10""#));
        assert!(xml.contains(r#"<remove-project name="platform/packages/apps/QuickSearchBox" />"#));
        assert!(!xml.contains("Auditor"));
        assert!(xml.ends_with("</manifest>\n"));
    }

    #[test]
    fn test_custom_entries_in_order() {
        let mut c = config();
        c.enable_attestation = true;
        c.custom_manifest_remotes.push(ManifestRemote {
            name: "mine".to_string(),
            fetch: "https://example.com/?a=1&b=2".to_string(),
            revision: None,
        });
        c.custom_manifest_projects.push(ManifestProject {
            path: "packages/apps/Mine".to_string(),
            name: "mine_app".to_string(),
            remote: "mine".to_string(),
            modules: vec!["MineApp".to_string()],
        });

        let xml = render_local_manifest(&c, &latest()).unwrap();
        let removal = xml.find("<remove-project").unwrap();
        let remote = xml.find(r#"<remote name="mine""#).unwrap();
        let project = xml.find(r#"<project path="packages/apps/Mine""#).unwrap();
        let auditor = xml.find("external/Auditor").unwrap();
        assert!(removal < remote && remote < project && project < auditor);

        // Custom values are escaped; XML readers decode them back
        let line = xml.lines().find(|l| l.contains(r#"<remote name="mine""#)).unwrap();
        assert!(line.contains("&amp;b=2"));
        assert!(!line.contains("&b=2"));
        let decoded = line.replace("&#x2F;", "/").replace("&amp;", "&");
        assert!(decoded.contains(r#"fetch="https://example.com/?a=1&b=2" />"#));
    }

    #[test]
    fn test_custom_values_cannot_break_attributes() {
        let mut c = config();
        c.custom_manifest_projects.push(ManifestProject {
            path: "packages/apps/Mine\" /><evil".to_string(),
            name: "<mine>".to_string(),
            remote: "github".to_string(),
            modules: Vec::new(),
        });

        let xml = render_local_manifest(&c, &latest()).unwrap();
        assert!(!xml.contains("<evil"));
        assert!(!xml.contains("<mine>"));
        assert!(xml.contains("&quot;"));
        assert!(xml.contains("&lt;mine&gt;"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_local_manifest(&config(), &latest()).unwrap();
        let b = render_local_manifest(&config(), &latest()).unwrap();
        assert_eq!(a, b);
    }
}
