//! End-to-end rule registry tests: composition, shared ownership,
//! duplicate-id enforcement and phase dispatch through the public API.

use std::sync::Arc;

use wafcore::{
    phase, EvaluationStatus, Rule, RuleAction, RuleMatcher, RuleOperator, RuleTarget, RulesSet,
    RulesSetPhases, SharedRule, Transaction, PHASE_COUNT,
};

fn body_rule_doc(id: i64, phase: usize, needle: &str) -> String {
    format!(
        r#"
rules:
  - id: {id}
    phase: {phase}
    target: request_body
    operator: contains
    value: "{needle}"
    action: deny
"#
    )
}

fn shared_rule(id: i64, phase: usize) -> SharedRule {
    Arc::new(Rule::new(
        id,
        phase,
        RuleMatcher {
            target: RuleTarget::Uri,
            operator: RuleOperator::Contains("never".to_string()),
        },
        RuleAction::Pass,
    ))
}

#[test]
fn insert_places_rule_at_end_of_its_phase_bucket() {
    let mut phases = RulesSetPhases::new();
    for p in 0..PHASE_COUNT {
        assert!(phases.insert(shared_rule(p as i64 + 1, p)));
        assert!(phases.insert(shared_rule(p as i64 + 100, p)));
        let bucket = phases.at(p).unwrap();
        assert_eq!(bucket.last().unwrap().id(), p as i64 + 100);
    }
}

#[test]
fn insert_out_of_range_phase_mutates_nothing() {
    let mut phases = RulesSetPhases::new();
    assert!(!phases.insert(shared_rule(1, PHASE_COUNT)));
    for p in 0..PHASE_COUNT {
        assert!(phases.at(p).unwrap().is_empty());
    }
}

#[test]
fn merge_of_disjoint_sets_shares_each_rule_once() {
    let mut a = RulesSet::new();
    a.load(&body_rule_doc(100, 2, "aaa")).unwrap();
    a.load(&body_rule_doc(101, 4, "bbb")).unwrap();

    let mut b = RulesSet::new();
    b.load(&body_rule_doc(200, 2, "ccc")).unwrap();

    let src_rules: Vec<SharedRule> = (0..PHASE_COUNT)
        .flat_map(|p| b.phases().at(p).unwrap().iter().cloned().collect::<Vec<_>>())
        .collect();

    assert_eq!(a.merge(&b).unwrap(), 1);

    assert_eq!(a.phases().at(2).unwrap().len(), 2);
    assert_eq!(a.phases().at(4).unwrap().len(), 1);
    for rule in &src_rules {
        // b's bucket, a's bucket, and the local handle.
        assert_eq!(Arc::strong_count(rule), 3);
    }
}

#[test]
fn merge_duplicate_id_fails_with_diagnostic_naming_the_id() {
    let mut a = RulesSet::new();
    a.load(&body_rule_doc(100, 2, "aaa")).unwrap();

    let mut b = RulesSet::new();
    b.load(&body_rule_doc(100, 6, "bbb")).unwrap();

    let err = a.merge(&b).unwrap_err();
    assert_eq!(err.to_string(), "Rule id: 100 is duplicated");
}

#[test]
fn marker_with_colliding_id_does_not_block_merge() {
    let mut a = RulesSet::new();
    a.load(&body_rule_doc(100, 2, "aaa")).unwrap();

    let mut b = RulesSet::new();
    b.load("rules:\n  - {id: 100, phase: 2, marker: ANCHOR}\n").unwrap();

    assert_eq!(a.merge(&b).unwrap(), 1);
    assert_eq!(a.phases().at(2).unwrap().len(), 2);
}

#[test]
fn rule_outlives_any_single_holding_set() {
    let mut a = RulesSet::new();
    a.load(&body_rule_doc(100, 2, "aaa")).unwrap();

    let mut b = RulesSet::new();
    b.merge(&a).unwrap();

    let rule = Arc::clone(&b.phases().at(2).unwrap()[0]);
    assert_eq!(Arc::strong_count(&rule), 3);

    drop(a);
    assert_eq!(Arc::strong_count(&rule), 2);

    let mut tx = Transaction::new("POST", "/").with_request_body("xxaaaxx");
    assert_eq!(b.evaluate(2, &mut tx), EvaluationStatus::Disrupted);

    drop(b);
    assert_eq!(Arc::strong_count(&rule), 1);
}

#[test]
fn compose_then_recompose_scenario() {
    let mut a = RulesSet::new();
    a.load(&body_rule_doc(100, 2, "aaa")).unwrap();

    let mut b = RulesSet::new();
    b.load(&body_rule_doc(200, 2, "bbb")).unwrap();

    assert_eq!(a.merge(&b).unwrap(), 1);
    let ids: Vec<i64> = a.phases().at(2).unwrap().iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec![100, 200]);

    // A second set reintroducing id 100 no longer composes with a.
    let mut a_again = RulesSet::new();
    a_again.load(&body_rule_doc(100, 2, "aaa")).unwrap();
    let err = a.merge(&a_again).unwrap_err();
    assert!(err.to_string().contains("100"));
}

#[test]
fn failed_merge_keeps_earlier_phases() {
    let mut dst = RulesSet::new();
    dst.load(&body_rule_doc(100, 5, "dup")).unwrap();

    let mut src = RulesSet::new();
    src.load(&body_rule_doc(10, 1, "early")).unwrap();
    src.load(&body_rule_doc(100, 5, "dup")).unwrap();

    assert!(dst.merge(&src).is_err());
    // Phase 1 was already appended before the phase-5 duplicate aborted.
    assert_eq!(dst.phases().at(1).unwrap().len(), 1);
    assert_eq!(dst.phases().at(5).unwrap().len(), 1);
}

#[test]
fn dump_lists_every_phase_with_counts() {
    let mut set = RulesSet::new();
    set.load(&body_rule_doc(100, 2, "aaa")).unwrap();
    set.load(&body_rule_doc(200, 2, "bbb")).unwrap();

    let mut out = Vec::new();
    set.dump_to(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(
        text.lines().filter(|line| line.starts_with("Phase: ")).count(),
        PHASE_COUNT
    );
    assert!(text.contains("Phase: 2 (2 rules)"));
    assert!(text.contains("Rule ID: 100"));
    assert!(text.contains("Rule ID: 200"));
}

#[test]
fn evaluation_runs_in_insertion_order_and_stops_on_deny() {
    let mut set = RulesSet::new();
    set.load(
        r#"
rules:
  - {id: 1, phase: 3, target: request_body, operator: contains, value: x, action: pass}
  - {id: 2, phase: 3, target: request_body, operator: contains, value: x, action: deny, status: 406}
  - {id: 3, phase: 3, target: request_body, operator: contains, value: x, action: pass}
"#,
    )
    .unwrap();

    let mut tx = Transaction::new("POST", "/upload").with_request_body("x");
    let status = set.evaluate(phase::REQUEST_BODY, &mut tx);

    assert_eq!(status, EvaluationStatus::Disrupted);
    assert_eq!(tx.matched_rules(), &[1, 2]);
    let intervention = tx.intervention().unwrap();
    assert_eq!(intervention.status, 406);
    assert_eq!(intervention.rule_id, 2);
}

#[test]
fn merged_rules_evaluate_after_resident_rules() {
    let mut a = RulesSet::new();
    a.load("rules:\n  - {id: 1, phase: 1, target: uri, operator: contains, value: q, action: pass}\n")
        .unwrap();

    let mut b = RulesSet::new();
    b.load("rules:\n  - {id: 2, phase: 1, target: uri, operator: contains, value: q, action: pass}\n")
        .unwrap();

    a.merge(&b).unwrap();

    let mut tx = Transaction::new("GET", "/search?q=1");
    a.evaluate(phase::URI, &mut tx);
    assert_eq!(tx.matched_rules(), &[1, 2]);
}

#[test]
fn load_from_file_counts_rules() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", body_rule_doc(42, 1, "zzz")).unwrap();

    let mut set = RulesSet::new();
    let count = set
        .load_from_uri(file.path().to_str().unwrap())
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        set.phases().at(1).unwrap()[0].origin(),
        file.path().to_str()
    );
}

#[test]
fn parser_error_is_reported_and_retrievable() {
    let mut set = RulesSet::new();
    assert!(set.load("rules:\n  - {id: 1, phase: 9, marker: M}\n").is_err());
    let diagnostic = set.parser_error().unwrap();
    assert!(diagnostic.contains("phase 9 out of range"));
}
