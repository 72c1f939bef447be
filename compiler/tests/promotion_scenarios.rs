// End-to-end promotion scenarios: parse → analyze → rewrite → execute.
//
// Each scenario runs both the original and the rewritten loop nest through
// the reference interpreter and checks that consumers see the same values.

use t2sc::diag::codes;
use t2sc::interp::{execute, Value};
use t2sc::ir::Stmt;
use t2sc::pass::StageCert;
use t2sc::promotion::{analyze_promotion, promote_channels, verify_promotion, Direction};

fn parse_ok(source: &str) -> Stmt {
    let result = t2sc::parser::parse(source);
    assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
    result.stmt.expect("statement")
}

fn gather(extent: usize) -> String {
    format!(
        r#"
        realize ch.channel<int32>([0, {extent}]) {{
          produce P {{
            for (P.s0.gather_iii, 0, {extent}) {{
              for (P.s0.iii, 0, {extent}) {{
                if (P.s0.gather_iii == P.s0.iii) {{
                  write_channel("ch.channel", P.s0.iii, P.s0.iii)
                }}
              }}
            }}
          }}
          produce C {{
            for (C.s0.iii, 0, {extent}) {{
              C(C.s0.iii) = read_channel("ch.channel", C.s0.iii)
            }}
          }}
        }}
        "#
    )
}

// ── Gather ──

#[test]
fn gather_is_promoted_to_one_transfer_per_side() {
    let input = parse_ok(&gather(4));
    let analysis = analyze_promotion(&input).unwrap();
    assert!(analysis.diagnostics.is_empty());

    let write = analysis.plan.get("ch.channel", Direction::Write).unwrap();
    assert_eq!(write.promotion_loop, "P.s0.gather_iii");
    assert!(write.safe_promotion);
    let read = analysis.plan.get("ch.channel", Direction::Read).unwrap();
    assert_eq!(read.promotion_loop, "C.s0.iii");

    let out = promote_channels(&input, &analysis.plan).unwrap();
    insta::assert_snapshot!(out.to_string(), @r#"
    realize ch.channel.array<int32>([0, 4]) {
      produce P {
        for (P.s0.gather_iii, 0, 4) {
          for (P.s0.iii, 0, 4) {
            if (P.s0.gather_iii == P.s0.iii) {
              write_array("ch.channel.array", P.s0.iii, P.s0.iii)
            }
          }
        }
        write_channel<handle>("ch.channel", read_array<handle>("ch.channel.array"))
      }
      produce C {
        write_array<handle>("ch.channel.array", read_channel<handle>("ch.channel"))
        for (C.s0.iii, 0, 4) {
          C(C.s0.iii) = read_array("ch.channel.array", C.s0.iii)
        }
      }
    }
    "#);
    assert!(verify_promotion(&out, &analysis.plan).all_pass());
}

#[test]
fn gather_values_survive_promotion() {
    let input = parse_ok(&gather(4));
    let analysis = analyze_promotion(&input).unwrap();
    let out = promote_channels(&input, &analysis.plan).unwrap();

    let before = execute(&input).unwrap();
    let after = execute(&out).unwrap();

    assert_eq!(before.transactions().len(), 8);
    assert_eq!(after.transactions().len(), 2);
    assert_eq!(before.received("ch.channel"), after.received("ch.channel"));
    assert_eq!(
        before.received("ch.channel"),
        (0..4).map(Value::Int).collect::<Vec<_>>()
    );
    assert_eq!(before.output("C"), after.output("C"));
    assert_eq!(after.pending(), 0);
}

#[test]
fn promotion_is_idempotent() {
    let input = parse_ok(&gather(4));
    let analysis = analyze_promotion(&input).unwrap();
    let once = promote_channels(&input, &analysis.plan).unwrap();

    let again = analyze_promotion(&once).unwrap();
    assert!(again.plan.is_empty());
    assert_eq!(promote_channels(&once, &again.plan).unwrap(), once);
}

// ── Conservative refusals ──

#[test]
fn write_guarded_on_its_own_index_is_left_alone() {
    let input = parse_ok(
        r#"
        realize ch.channel<int32>([0, 4]) {
          produce P {
            for (P.s0.iii, 0, 4) {
              if (P.s0.iii < 2) {
                write_channel("ch.channel", P.s0.iii, P.s0.iii)
              }
            }
          }
          produce C {
            for (C.s0.iii, 0, 2) {
              C(C.s0.iii) = read_channel("ch.channel", C.s0.iii)
            }
          }
        }
        "#,
    );
    let analysis = analyze_promotion(&input).unwrap();
    assert!(analysis.plan.is_empty());
    assert_eq!(analysis.diagnostics.len(), 1);
    assert_eq!(analysis.diagnostics[0].code, Some(codes::W0102));
    assert_eq!(analysis.diagnostics[0].channels, vec!["ch.channel"]);
    assert_eq!(promote_channels(&input, &analysis.plan).unwrap(), input);
}

#[test]
fn write_pinned_to_a_constant_index_is_left_alone() {
    let input = parse_ok(
        r#"
        realize ch.channel<int32>([0, 4]) {
          produce P {
            for (P.s0.iii, 0, 4) {
              if (P.s0.iii == 0) {
                write_channel("ch.channel", 5, P.s0.iii)
              }
            }
          }
          produce C {
            C(0) = read_channel("ch.channel", 0)
          }
        }
        "#,
    );
    let analysis = analyze_promotion(&input).unwrap();
    assert!(analysis.plan.is_empty());
    assert_eq!(analysis.diagnostics[0].code, Some(codes::W0102));
    assert_eq!(promote_channels(&input, &analysis.plan).unwrap(), input);
}

#[test]
fn unsafe_read_revokes_the_write_too() {
    let input = parse_ok(
        r#"
        f() = 1
        realize ch.channel<int32>([0, 4]) {
          produce P {
            for (P.s0.iii, 0, 4) {
              write_channel("ch.channel", P.s0.iii, P.s0.iii)
            }
          }
          produce C {
            for (C.s0.iii, 0, 4) {
              if (f() > 0) {
                C(C.s0.iii) = read_channel("ch.channel", C.s0.iii)
              }
            }
          }
        }
        "#,
    );
    let analysis = analyze_promotion(&input).unwrap();
    assert!(analysis.plan.is_empty());
    assert_eq!(analysis.diagnostics.len(), 1);
    assert_eq!(analysis.diagnostics[0].code, Some(codes::W0103));

    let out = promote_channels(&input, &analysis.plan).unwrap();
    let text = out.to_string();
    assert!(!text.contains("read_array"));
    assert!(!text.contains("write_array"));
    assert_eq!(out, input);
}

// ── Runtime flag ──

#[test]
fn data_dependent_write_is_flagged_and_still_correct() {
    let input = parse_ok(
        r#"
        f() = 1
        realize ch.channel<int32>([0, 4]) {
          produce P {
            for (P.s0.iii, 0, 4) {
              if (f() > 0) {
                write_channel("ch.channel", P.s0.iii * 3, P.s0.iii)
              }
            }
          }
          produce C {
            for (C.s0.iii, 0, 4) {
              C(C.s0.iii) = read_channel("ch.channel", C.s0.iii)
            }
          }
        }
        "#,
    );
    let analysis = analyze_promotion(&input).unwrap();
    let write = analysis.plan.get("ch.channel", Direction::Write).unwrap();
    assert!(!write.safe_promotion);

    let out = promote_channels(&input, &analysis.plan).unwrap();
    let text = out.to_string();
    assert!(text.contains("realize ch.channel.temp<bool>() {"));
    assert!(text.contains("ch.channel.temp() = 0"));
    assert!(text.contains("ch.channel.temp() = 1"));
    assert!(text.contains("if (ch.channel.temp<bool>() == 1) {"));
    assert!(verify_promotion(&out, &analysis.plan).all_pass());

    let before = execute(&input).unwrap();
    let after = execute(&out).unwrap();
    assert_eq!(before.output("C"), after.output("C"));
    assert_eq!(
        after.received("ch.channel"),
        vec![Value::Int(0), Value::Int(3), Value::Int(6), Value::Int(9)]
    );
}

#[test]
fn writes_under_different_guards_keep_every_value() {
    let input = parse_ok(
        r#"
        realize ch.channel<int32>([0, 2]) {
          produce P {
            for (P.s0.k, 0, 4) {
              for (P.s0.i, 0, 2) {
                if (P.s0.k < 2) {
                  write_channel("ch.channel", 1, P.s0.i)
                } else {
                  write_channel("ch.channel", 2, P.s0.i)
                }
              }
            }
          }
          produce C {
            for (C.s0.r, 0, 4) {
              for (C.s0.j, 0, 2) {
                C(C.s0.r, C.s0.j) = read_channel("ch.channel", C.s0.j)
              }
            }
          }
        }
        "#,
    );
    let analysis = analyze_promotion(&input).unwrap();
    assert!(analysis.diagnostics.is_empty());
    let write = analysis.plan.get("ch.channel", Direction::Write).unwrap();
    assert_eq!(write.promotion_loop, "P.s0.i");
    assert!(!write.safe_promotion);

    let out = promote_channels(&input, &analysis.plan).unwrap();
    let text = out.to_string();
    assert!(text.contains("realize ch.channel.temp<bool>() {"));
    assert!(text.contains("if (ch.channel.temp<bool>() == 1) {"));
    assert!(verify_promotion(&out, &analysis.plan).all_pass());

    let before = execute(&input).unwrap();
    let after = execute(&out).unwrap();
    let expected: Vec<Value> = [1, 1, 1, 1, 2, 2, 2, 2].into_iter().map(Value::Int).collect();
    assert_eq!(before.received("ch.channel"), expected);
    assert_eq!(after.received("ch.channel"), expected);
    assert_eq!(before.output("C"), after.output("C"));
    assert_eq!(before.transactions().len(), 16);
    assert_eq!(after.transactions().len(), 8);
    assert_eq!(after.pending(), 0);
}
