//! Which trim tiers run for each combination of tier results and settings.

use super::fakes::{FakeHelper, FakeOs, Rig};
use reclaim_memory::{HelperLauncher, HelperTier, ReclamationConfig, GB};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum HelperSetup {
    Missing,
    Fails,
    Frees(u64),
}

struct Case {
    in_process_frees: bool,
    use_external_helper: bool,
    helper: HelperSetup,
    disk_low: bool,
    expect_in_process_calls: usize,
    expect_helper_calls: usize,
    expect_tier: HelperTier,
    expect_best_effort: bool,
}

#[test]
fn tier_gating_matrix() {
    use HelperSetup::*;
    let cases = [
        // In-process trim works: nothing further runs.
        Case {
            in_process_frees: true,
            use_external_helper: true,
            helper: Frees(GB),
            disk_low: false,
            expect_in_process_calls: 2,
            expect_helper_calls: 0,
            expect_tier: HelperTier::NotAttempted,
            expect_best_effort: false,
        },
        // Falls through to the helper, which frees memory.
        Case {
            in_process_frees: false,
            use_external_helper: true,
            helper: Frees(GB),
            disk_low: false,
            expect_in_process_calls: 2,
            expect_helper_calls: 1,
            expect_tier: HelperTier::Freed(GB),
            expect_best_effort: false,
        },
        // Helper runs but reports nothing usable.
        Case {
            in_process_frees: false,
            use_external_helper: true,
            helper: Fails,
            disk_low: false,
            expect_in_process_calls: 4,
            expect_helper_calls: 1,
            expect_tier: HelperTier::Unavailable,
            expect_best_effort: true,
        },
        // No helper binary.
        Case {
            in_process_frees: false,
            use_external_helper: true,
            helper: Missing,
            disk_low: false,
            expect_in_process_calls: 4,
            expect_helper_calls: 0,
            expect_tier: HelperTier::Unavailable,
            expect_best_effort: true,
        },
        // Helper turned off.
        Case {
            in_process_frees: false,
            use_external_helper: false,
            helper: Frees(GB),
            disk_low: false,
            expect_in_process_calls: 4,
            expect_helper_calls: 0,
            expect_tier: HelperTier::NotAttempted,
            expect_best_effort: true,
        },
        // Low disk vetoes every tier, best-effort included.
        Case {
            in_process_frees: false,
            use_external_helper: true,
            helper: Frees(GB),
            disk_low: true,
            expect_in_process_calls: 0,
            expect_helper_calls: 0,
            expect_tier: HelperTier::NotAttempted,
            expect_best_effort: false,
        },
        Case {
            in_process_frees: true,
            use_external_helper: false,
            helper: Missing,
            disk_low: true,
            expect_in_process_calls: 0,
            expect_helper_calls: 0,
            expect_tier: HelperTier::NotAttempted,
            expect_best_effort: false,
        },
    ];

    for (index, case) in cases.iter().enumerate() {
        let mut rig = Rig::new();
        let mut os = FakeOs::new(&rig.journal);
        os.shrink_by = if case.in_process_frees { GB / 4 } else { 0 };
        rig.os = Arc::new(os);
        rig.disk_free_bytes = Some(if case.disk_low { 5 * GB } else { 500 * GB });
        rig.helper = match case.helper {
            HelperSetup::Missing => None,
            HelperSetup::Fails => Some(Arc::new(FakeHelper {
                journal: rig.journal.clone(),
                freed_bytes: None,
            }) as Arc<dyn HelperLauncher>),
            HelperSetup::Frees(bytes) => Some(Arc::new(FakeHelper {
                journal: rig.journal.clone(),
                freed_bytes: Some(bytes),
            }) as Arc<dyn HelperLauncher>),
        };
        let config = ReclamationConfig {
            use_external_helper: case.use_external_helper,
            ..ReclamationConfig::default()
        };

        let report = rig.build().cleanup(&config);

        assert_eq!(rig.journal.count("trim:"), case.expect_in_process_calls, "case {index}");
        assert_eq!(rig.journal.count("helper:"), case.expect_helper_calls, "case {index}");
        assert_eq!(report.trim.helper, case.expect_tier, "case {index}");
        assert_eq!(report.trim.best_effort, case.expect_best_effort, "case {index}");
        assert_eq!(report.trim.gate.allows_trim(), !case.disk_low, "case {index}");
        assert_eq!(rig.journal.count("capture"), 2, "case {index}");
    }
}

#[test]
fn successful_call_without_shrink_still_falls_through() {
    let mut rig = Rig::new();
    rig.os = Arc::new(FakeOs::new(&rig.journal));
    rig.helper = Some(Arc::new(FakeHelper {
        journal: rig.journal.clone(),
        freed_bytes: Some(GB),
    }));
    let report = rig.build().cleanup(&ReclamationConfig::default());

    let outcome = report.trim.in_process.as_ref().unwrap();
    assert!(outcome.any_call_succeeded());
    assert_eq!(outcome.freed_bytes, None);
    assert_eq!(report.trim.helper, HelperTier::Freed(GB));
}
