use kanview_core::{EngineConfig, Issue, User, snapshot};
use proptest::prelude::*;

use doubles::*;

use generators::*;

/// Users cannot see issues assigned to `cy` unless they are `cy`.
fn hides_cy(user: &User, issue: &Issue) -> bool {
    issue.assignee.as_deref() != Some("cy") || user.key() == "cy"
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(128))]

    #[test]
    fn build_is_deterministic(issues in arb_issue_list()) {
        let mut reversed = issues.clone();
        reversed.reverse();
        let a = snapshot::build(&board(), issues, None).unwrap();
        let b = snapshot::build(&board(), reversed, None).unwrap();
        prop_assert_eq!(a.digest(), b.digest());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn applying_changes_reproduces_current_view(
        history in arb_history(),
        query in arb_query(),
        viewer in prop::sample::select(vec!["ann", "cy"]),
    ) {
        let user = User::new(viewer);
        let source = StubSource::new(history[0].clone());
        let engine = engine_with(&source, hides_cy, EngineConfig::default());

        let mut views = vec![engine.get_board("KV", &user, &query).unwrap()];
        for fetch in &history[1..] {
            source.set(fetch.clone());
            engine.rebuild("KV").unwrap();
            views.push(engine.get_board("KV", &user, &query).unwrap());
        }

        let current = engine.get_board("KV", &user, &query).unwrap();
        for mut view in views {
            let changes = engine.get_changes("KV", &user, view.version, &query).unwrap();
            view.apply(&changes).unwrap();
            prop_assert_eq!(&view, &current);
        }
    }

    #[test]
    fn changes_from_current_are_always_empty(issues in arb_issue_list(), query in arb_query()) {
        let source = StubSource::new(issues);
        let engine = engine_with(&source, hides_cy, EngineConfig::default());
        let user = User::new("ann");
        let view = engine.get_board("KV", &user, &query).unwrap();
        prop_assert!(engine.get_changes("KV", &user, view.version, &query).unwrap().is_empty());
    }
}
