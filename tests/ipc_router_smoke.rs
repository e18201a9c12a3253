mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("boletind-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    // Everything but health needs a workspace.
    for (i, method) in [
        "setup.get",
        "reports.boletinDataset",
        "reports.boletines",
        "reports.groupPeriodSummary",
        "analytics.failingBySubject",
        "analytics.scoreHistogram",
        "analytics.activeBySite",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("nw{}", i),
            method,
            json!({ "groupId": 1, "period": 1 }),
        );
        assert_eq!(error_code(&resp), Some("no_workspace"), "{}", method);
    }

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected.get("workspacePath").is_some());
    assert!(workspace.join("boletin.sqlite3").exists());

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert!(health.get("workspacePath").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.boletinDataset",
        json!({ "groupId": 999, "period": 1 }),
    );
    assert_eq!(empty["students"], json!([]));
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.boletines",
        json!({ "groupId": 999, "period": 1 }),
    );
    assert_eq!(empty["boletines"], json!([]));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.groupPeriodSummary",
        json!({ "groupId": 999, "period": 2 }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "8", "analytics.failingBySubject", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "9", "analytics.scoreHistogram", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "10", "analytics.activeBySite", json!({}));

    let unknown = request(&mut stdin, &mut reader, "11", "reports.nope", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let missing_path = request(&mut stdin, &mut reader, "12", "workspace.select", json!({}));
    assert_eq!(error_code(&missing_path), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_lines_get_bad_json_and_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    let _ = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
