//! Staleness decision
//!
//! Pure comparison of `latest` against `recorded`. One reason per
//! mismatched component; force and ignore-version-checks only add reasons
//! when nothing is stale.

use localstack_model::{BuildDecision, Component, ComponentVersionSet};

/// Reason used when nothing has ever been checkpointed
pub const INITIAL_BUILD: &str = "initial build";

/// Reason used when a build is forced from the CLI
pub const FORCED: &str = "no build is required, but a forced build was requested";

/// Reason used when version checks are disabled in the config
pub const VERSION_CHECKS_IGNORED: &str = "no build is required, but version checks are ignored";

/// Decide whether a build is required
pub fn decide(
    latest: &ComponentVersionSet,
    recorded: Option<&ComponentVersionSet>,
    force_build: bool,
    ignore_version_checks: bool,
) -> BuildDecision {
    let Some(recorded) = recorded else {
        return BuildDecision {
            required: true,
            reasons: vec![INITIAL_BUILD.to_string()],
        };
    };

    let mut decision = BuildDecision::not_required();
    for component in recorded.differing(latest) {
        decision.require(mismatch_reason(
            component,
            recorded.get(component),
            latest.get(component),
        ));
    }

    if !decision.required {
        if force_build {
            decision.require(FORCED);
        }
        if ignore_version_checks {
            decision.require(VERSION_CHECKS_IGNORED);
        }
    }
    decision
}

fn mismatch_reason(component: Component, recorded: &str, latest: &str) -> String {
    let recorded = if recorded.is_empty() { "<none>" } else { recorded };
    format!("{} {} != {}", component.label(), recorded, latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions() -> ComponentVersionSet {
        ComponentVersionSet {
            stack: "v5".to_string(),
            platform_build: "RQ3A.211001.001".to_string(),
            platform_branch: "android-11.0.0_r46".to_string(),
            browser_engine: "90.0.4430.1".to_string(),
            app_store_client: "1.9".to_string(),
            privileged_extension: "0.2.10".to_string(),
        }
    }

    fn set(component: Component, value: &str) -> ComponentVersionSet {
        let mut v = versions();
        let field = match component {
            Component::Stack => &mut v.stack,
            Component::Platform => &mut v.platform_build,
            Component::BrowserEngine => &mut v.browser_engine,
            Component::AppStoreClient => &mut v.app_store_client,
            Component::PrivilegedExtension => &mut v.privileged_extension,
        };
        *field = value.to_string();
        v
    }

    #[test]
    fn test_single_field_mismatch_gives_one_reason() {
        for component in Component::ALL {
            let recorded = set(component, "old");
            let decision = decide(&versions(), Some(&recorded), false, false);
            assert!(decision.required, "{:?}", component);
            assert_eq!(decision.reasons.len(), 1, "{:?}", component);
            assert!(decision.reasons[0].starts_with(component.label()));
        }
    }

    #[test]
    fn test_equal_sets_need_no_build() {
        let decision = decide(&versions(), Some(&versions()), false, false);
        assert!(!decision.required);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_branch_is_not_compared() {
        let mut recorded = versions();
        recorded.platform_branch.clear();
        assert!(!decide(&versions(), Some(&recorded), false, false).required);
    }

    #[test]
    fn test_initial_build() {
        let decision = decide(&ComponentVersionSet::default(), None, false, false);
        assert!(decision.required);
        assert_eq!(decision.reasons, vec![INITIAL_BUILD]);

        let decision = decide(&versions(), None, true, true);
        assert_eq!(decision.reasons, vec![INITIAL_BUILD]);
    }

    #[test]
    fn test_force_and_ignore_reasons() {
        let forced = decide(&versions(), Some(&versions()), true, false);
        assert!(forced.required);
        assert_eq!(forced.reasons, vec![FORCED]);

        let both = decide(&versions(), Some(&versions()), true, true);
        assert_eq!(both.reasons, vec![FORCED, VERSION_CHECKS_IGNORED]);
    }

    #[test]
    fn test_force_does_not_add_reason_when_stale() {
        let recorded = set(Component::Platform, "RQ1A.201005.002");
        let decision = decide(&versions(), Some(&recorded), true, false);
        assert_eq!(decision.reasons.len(), 1);
        assert_eq!(
            decision.reasons[0],
            "platform build RQ1A.201005.002 != RQ3A.211001.001"
        );
    }

    #[test]
    fn test_empty_recorded_field_is_reported() {
        let recorded = set(Component::AppStoreClient, "");
        let decision = decide(&versions(), Some(&recorded), false, false);
        assert_eq!(decision.reasons, vec!["F-Droid client version <none> != 1.9"]);
    }
}
