//! Dispatch loop behavior against a mock backend and a scripted evaluator

mod common;

use std::time::Duration;

use common::{bangs, harness, harness_with_interrupt, rows, MockQuery, Response, Script, ScriptedEvaluator};
use rsql::{DispatchOutcome, EvalValue, Interrupt, LastResult, Session, ShellError};
use serde_json::json;

fn users() -> MockQuery {
    MockQuery::new().respond(
        "select x",
        Response::Result(rows(&["c1", "c2"], &[&["abc", "def"]])),
    )
}

#[tokio::test]
async fn test_exit_stops_the_queue() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), MockQuery::new());

    let outcome = h.dispatcher.run_input("select 1; exit; select 2").await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(h.query.executed(), vec!["select 1"]);
}

#[tokio::test]
async fn test_quit_is_case_insensitive() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), MockQuery::new());

    let outcome = h.dispatcher.run_input("QUIT; select 2").await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Done);
    assert!(h.query.executed().is_empty());
}

#[tokio::test]
async fn test_script_can_produce_exit() {
    let evaluator = ScriptedEvaluator::new().text("bye", "exit");
    let mut h = harness(Session::default(), evaluator, MockQuery::new());

    let outcome = h.dispatcher.run_input(".bye; select 2").await.unwrap();

    assert!(outcome.is_done());
    assert!(h.query.executed().is_empty());
}

#[tokio::test]
async fn test_results_are_displayed_as_columns() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), users());

    let outcome = h.dispatcher.run_input("select x").await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Continue(None));
    let out = h.out.contents();
    assert!(out.contains("c1  c2"));
    assert!(out.contains("abc def"));
    assert!(out.contains("1 row in set"));
    assert!(h.err.contents().is_empty());
}

#[tokio::test]
async fn test_pipe_hands_results_to_the_next_script() {
    let evaluator = ScriptedEvaluator::new().script("show", Script::EchoLast);
    let mut h = harness(Session::default(), evaluator, users());

    h.dispatcher.run_input("select x | show").await.unwrap();

    assert_eq!(h.dispatcher.evaluator().calls, vec![("show".to_string(), true)]);
    let out = h.out.contents();
    assert!(out.contains("echoing"));
    // Only the final statement is shown
    assert_eq!(out.matches("in set").count(), 1);
}

#[tokio::test]
async fn test_unpiped_script_sees_no_last_result() {
    let evaluator = ScriptedEvaluator::new().script("show", Script::EchoLast);
    let mut h = harness(Session::default(), evaluator, users());

    h.dispatcher.run_input("select x; .show").await.unwrap();

    assert_eq!(h.dispatcher.evaluator().calls, vec![("show".to_string(), false)]);
}

#[tokio::test]
async fn test_trailing_pipe_returns_the_result() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), users());

    let outcome = h.dispatcher.run_input("select x |").await.unwrap();

    match outcome {
        DispatchOutcome::Continue(Some(LastResult::Results(results))) => {
            assert_eq!(results.num_rows(), 1);
            assert_eq!(results.sql(), "select x");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(h.out.contents().is_empty());
}

#[tokio::test]
async fn test_nested_expansion_keeps_order() {
    let evaluator = ScriptedEvaluator::new()
        .text("outer", ".inner; select 3")
        .text("inner", "select 1; select 2");
    let mut h = harness(Session::default(), evaluator, MockQuery::new());

    h.dispatcher.run_input(".outer; select 4").await.unwrap();

    assert_eq!(
        h.query.executed(),
        vec!["select 1", "select 2", "select 3", "select 4"]
    );
}

#[tokio::test]
async fn test_expansion_carries_bangs_to_generated_sql() {
    let query = MockQuery::new().respond(
        "select name",
        Response::Result(rows(&["name"], &[&["bob"]])),
    );
    let evaluator = ScriptedEvaluator::new().script(
        "shouty",
        Script::WithBangs(
            EvalValue::Text("select name".to_string()),
            bangs(&[("name", "shout")]),
        ),
    );
    let mut h = harness(Session::default(), evaluator, query);

    h.dispatcher.run_input(".shouty").await.unwrap();

    assert!(h.out.contents().contains("bob!"));
}

#[tokio::test]
async fn test_statement_bangs_override_requested_bangs() {
    let query = MockQuery::new().respond(
        "select name",
        Response::Result(rows(&["name"], &[&["bob"]])),
    );
    let evaluator = ScriptedEvaluator::new().script(
        "shouty",
        Script::WithBangs(
            EvalValue::Text("select name".to_string()),
            bangs(&[("name", "shout")]),
        ),
    );
    let mut h = harness(Session::default(), evaluator, query);

    h.dispatcher.run_input(".shouty ! name => upper").await.unwrap();

    let out = h.out.contents();
    assert!(out.contains("BOB"));
    assert!(!out.contains("bob!"));
}

#[tokio::test]
async fn test_bangs_apply_to_their_statement_only() {
    let query = MockQuery::new()
        .respond("select a", Response::Result(rows(&["name"], &[&["amy"]])))
        .respond("select b", Response::Result(rows(&["name"], &[&["ben"]])));
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), query);

    h.dispatcher
        .run_input("select a ! name => upper; select b")
        .await
        .unwrap();

    let out = h.out.contents();
    assert!(out.contains("AMY"));
    assert!(out.contains("ben"));
}

#[tokio::test]
async fn test_row_limit_is_reported_and_loop_continues() {
    let query = MockQuery::new().respond(
        "select x",
        Response::Result(rows(&["c1"], &[&["a"], &["b"]])),
    );
    let session = Session::default().with_max_rows(1);
    let mut h = harness(session, ScriptedEvaluator::new(), query);

    let outcome = h.dispatcher.run_input("select x; select y").await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Continue(None));
    assert!(h
        .err
        .contents()
        .contains("refusing to process 2 rows (max: 1)"));
    assert_eq!(h.query.executed(), vec!["select x", "select y"]);
    assert!(!h.out.contents().contains("in set"));
}

#[tokio::test]
async fn test_query_failure_is_reported() {
    let query = MockQuery::new().respond("select x", Response::Fail("table missing".to_string()));
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), query);

    let outcome = h.dispatcher.run_input("select x; select 2").await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Continue(None));
    assert!(h.err.contents().contains("table missing"));
    assert_eq!(h.query.executed().len(), 2);
}

#[tokio::test]
async fn test_failed_pipe_leaves_nothing_for_the_next_script() {
    let query = MockQuery::new().respond("select x", Response::Fail("nope".to_string()));
    let evaluator = ScriptedEvaluator::new().script("show", Script::EchoLast);
    let mut h = harness(Session::default(), evaluator, query);

    h.dispatcher.run_input("select x | show").await.unwrap();

    assert_eq!(h.dispatcher.evaluator().calls, vec![("show".to_string(), false)]);
}

#[tokio::test]
async fn test_evaluation_failure_is_reported() {
    let evaluator = ScriptedEvaluator::new().script("broken", Script::Fail("boom".to_string()));
    let mut h = harness(Session::default(), evaluator, MockQuery::new());

    h.dispatcher.run_input(".broken; select 1").await.unwrap();

    assert!(h.err.contents().contains("boom"));
    assert_eq!(h.query.executed(), vec!["select 1"]);
}

#[tokio::test]
async fn test_interrupt_cancels_the_running_query() {
    let query = MockQuery::new().respond("select sleep", Response::Hang);
    let interrupt = Interrupt::new();
    let mut h = harness_with_interrupt(
        Session::default(),
        ScriptedEvaluator::new(),
        query,
        interrupt.clone(),
    );

    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.fire();
    });

    let result = h.dispatcher.run_input("select sleep; select 2").await;

    assert!(matches!(result, Err(ShellError::Cancelled)));
    assert_eq!(h.query.executed(), vec!["select sleep"]);
    assert!(interrupt.is_fired());
}

#[tokio::test]
async fn test_truthy_values_are_echoed() {
    let evaluator = ScriptedEvaluator::new()
        .script("answer", Script::Value(EvalValue::Other(json!(42))))
        .script("nothing", Script::Value(EvalValue::Nil))
        .script("no", Script::Value(EvalValue::Other(json!(false))));
    let mut h = harness(Session::default(), evaluator, MockQuery::new());

    h.dispatcher.run_input(".answer").await.unwrap();
    assert_eq!(h.out.contents(), "=> 42\n");

    h.dispatcher.run_input(".nothing; .no").await.unwrap();
    assert_eq!(h.out.contents(), "=> 42\n");
}

#[tokio::test]
async fn test_piped_script_output_is_captured() {
    let evaluator = ScriptedEvaluator::new().script("show", Script::EchoLast);
    let mut h = harness(Session::default(), evaluator, users());

    let outcome = h.dispatcher.run_input("select x | show |").await.unwrap();

    match outcome {
        DispatchOutcome::Continue(Some(LastResult::Eval(result))) => {
            assert_eq!(result.captured_output.as_deref(), Some("echoing\n"));
            assert!(matches!(result.value, EvalValue::Results(_)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(h.out.contents().is_empty());
}

#[tokio::test]
async fn test_queries_are_recorded_in_history() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), MockQuery::new());

    h.dispatcher.run_input("select 1; select 2; select 3").await.unwrap();

    let session = h.dispatcher.session();
    assert_eq!(session.history(None), vec!["select 1", "select 2", "select 3"]);
    assert_eq!(session.history(Some(1)), vec!["select 3"]);
}

#[tokio::test]
async fn test_use_switches_the_session_database() {
    let session = Session::new(Some("_system".to_string()));
    let mut h = harness(session, ScriptedEvaluator::new(), MockQuery::new());

    h.dispatcher.run_input("use accounts").await.unwrap();

    assert_eq!(h.dispatcher.session().database(), Some("accounts"));
    assert!(h.out.contents().contains("Database changed"));
}

#[tokio::test]
async fn test_affected_rows_summary() {
    let query = MockQuery::new().respond(
        "delete from t",
        Response::Result(rsql::RawResult::affected(3)),
    );
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), query);

    h.dispatcher.run_input("delete from t").await.unwrap();

    assert!(h.out.contents().contains("Query OK, 3 rows affected"));
}

#[tokio::test]
async fn test_line_display() {
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), users());

    h.dispatcher.run_input("select x\\G").await.unwrap();

    let out = h.out.contents();
    assert!(out.contains("****************************** 1. row ******************************"));
    assert!(out.contains("c1: abc"));
    assert!(out.contains("c2: def"));
}

#[tokio::test]
async fn test_nested_expansion_ending_in_a_pipe() {
    let evaluator = ScriptedEvaluator::new()
        .text("outer", ".inner | show")
        .text("inner", "select x")
        .script("show", Script::EchoLast);
    let mut h = harness(Session::default(), evaluator, users());

    h.dispatcher.run_input(".outer; select 9").await.unwrap();

    assert_eq!(
        h.dispatcher.evaluator().calls,
        vec![
            ("outer".to_string(), false),
            ("inner".to_string(), false),
            ("show".to_string(), true),
        ]
    );
    assert_eq!(h.query.executed(), vec!["select x", "select 9"]);
    let out = h.out.contents();
    assert!(out.contains("echoing"));
    assert_eq!(out.matches("in set").count(), 1);
}

#[tokio::test]
async fn test_zero_row_select_reads_as_query_ok() {
    let query = MockQuery::new().respond("select none", Response::Result(rows(&["c1"], &[])));
    let mut h = harness(Session::default(), ScriptedEvaluator::new(), query);

    h.dispatcher.run_input("select none").await.unwrap();

    let out = h.out.contents();
    assert!(out.contains("Query OK, 0 rows affected"), "{}", out);
    assert!(!out.contains("in set"));
}
