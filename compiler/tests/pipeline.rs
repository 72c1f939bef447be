// Integration tests for pass orchestration through the library API.

use t2sc::diag::{codes, DiagLevel};
use t2sc::pass::PassId;
use t2sc::pipeline::{run_pipeline, CompilationState, PipelineOptions, PipelineReport};

fn state_for(source: &str) -> CompilationState {
    let result = t2sc::parser::parse(source);
    assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
    CompilationState::new(result.stmt.expect("statement"))
}

const GATHER: &str = r#"
realize ch.channel<int32>([0, 4]) {
  produce P {
    for (P.s0.gather_iii, 0, 4) {
      for (P.s0.iii, 0, 4) {
        if (P.s0.gather_iii == P.s0.iii) {
          write_channel("ch.channel", P.s0.iii, P.s0.iii)
        }
      }
    }
  }
  produce C {
    for (C.s0.iii, 0, 4) {
      C(C.s0.iii) = read_channel("ch.channel", C.s0.iii)
    }
  }
}
"#;

#[test]
fn callback_sees_passes_in_order() {
    let mut state = state_for(GATHER);
    let mut seen = Vec::new();
    run_pipeline(&mut state, PassId::Combine, &PipelineOptions::default(), |pass, _| {
        seen.push(pass)
    })
    .unwrap();
    assert_eq!(seen, vec![PassId::Promote, PassId::Combine]);
    assert!(!state.has_error);
    assert!(state.artifacts.promoted.is_some());
    assert!(state.artifacts.combined.is_some());
}

#[test]
fn promote_terminal_stops_early() {
    let mut state = state_for(GATHER);
    run_pipeline(&mut state, PassId::Promote, &PipelineOptions::default(), |_, _| {}).unwrap();
    assert!(state.artifacts.promotion_plan.is_some());
    assert!(state.artifacts.combine_plan.is_none());
    assert_eq!(state.output(), state.artifacts.promoted.as_ref().unwrap());
}

#[test]
fn disabled_pass_forwards_its_input() {
    let mut state = state_for(GATHER);
    let options = PipelineOptions {
        promote: false,
        ..PipelineOptions::default()
    };
    let mut seen = Vec::new();
    run_pipeline(&mut state, PassId::Combine, &options, |pass, _| seen.push(pass)).unwrap();
    assert_eq!(seen, vec![PassId::Combine]);
    assert!(state.artifacts.promotion_plan.as_ref().unwrap().is_empty());
    assert_eq!(state.output(), &state.source);
}

#[test]
fn conflicting_loops_stop_the_pipeline() {
    let mut state = state_for(
        r#"
        realize ch.channel<int32>([0, 4]) {
          produce A {
            for (A.s0.i, 0, 4) { write_channel("ch.channel", 0, A.s0.i) }
            for (A.s0.j, 0, 4) { write_channel("ch.channel", 1, A.s0.j) }
          }
        }
        "#,
    );
    let mut calls = 0;
    let err = run_pipeline(&mut state, PassId::Combine, &PipelineOptions::default(), |_, _| {
        calls += 1
    })
    .unwrap_err();
    assert_eq!(err.failing_pass(), PassId::Promote);
    assert!(err.to_string().starts_with("promote failed:"));
    assert_eq!(calls, 1);
    assert!(state.has_error);
    assert!(state.artifacts.combined.is_none());

    let last = state.diagnostics.last().unwrap();
    assert_eq!(last.level, DiagLevel::Error);
    assert_eq!(last.code, Some(codes::E0301));
}

#[test]
fn report_serializes_plans_and_diagnostics() {
    let mut state = state_for(
        r#"
        realize ch.channel<int32>([0, 4]) {
          produce P {
            for (P.s0.iii, 0, 4) {
              if (P.s0.iii < 2) { write_channel("ch.channel", P.s0.iii, P.s0.iii) }
            }
          }
          produce C {
            for (C.s0.iii, 0, 2) { C(C.s0.iii) = read_channel("ch.channel", C.s0.iii) }
          }
        }
        "#,
    );
    run_pipeline(&mut state, PassId::Combine, &PipelineOptions::default(), |_, _| {}).unwrap();
    assert_eq!(state.warnings().count(), 1);

    let json = PipelineReport::new(&state).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["compiler_version"], env!("CARGO_PKG_VERSION"));
    assert!(value["promoted_channels"].as_array().unwrap().is_empty());
    let diag = &value["diagnostics"][0];
    assert_eq!(diag["code"], "W0102");
    assert_eq!(diag["level"], "warning");
    assert_eq!(diag["channels"][0], "ch.channel");
}
