use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PENALTY: &str = r#"
issuer: OBI_DE
template_id: 161001DE001
kind: debit
category: penalty_delay
inclusive_keywords: [OBI, Vertragsstrafe]
exclusive_keywords: [Storno]
fields:
  document_number: 'Beleg-Nr\.\s+(\d+)'
  amount: 'Gesamt\s+([\d.,]+)\s+EUR'
options:
  replace:
    - ['(\d)\.(\d{3}),', '\1\2,']
"#;

const REWE: &str = r#"
issuer: REWE
template_id: REWE-GS
kind: credit
inclusive_keywords: [REWE, Gutschrift]
fields:
  branch: 'Markt\s+(\d{1,3})'
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        fs::create_dir_all(templates.join("obi_de")).unwrap();
        fs::write(templates.join("obi_de").join("penalty.yml"), PENALTY).unwrap();
        fs::write(templates.join("rewe.yml"), REWE).unwrap();

        let config = format!(
            r#"{{"catalog": {{"template_dir": {}}}}}"#,
            serde_json::to_string(&templates).unwrap()
        );
        fs::write(dir.path().join("config.json"), config).unwrap();

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, content: &str) -> std::path::PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn tplex(&self) -> Command {
        let mut cmd = Command::cargo_bin("tplex").unwrap();
        cmd.arg("--config").arg(self.path().join("config.json"));
        cmd
    }
}

#[test]
fn extract_matches_and_prints_json() {
    let ws = Workspace::new();
    let input = ws.write(
        "doc.txt",
        "OBI GmbH\nVertragsstrafe\nBeleg-Nr. 4711\nGesamt 1.250,00 EUR\n",
    );

    ws.tplex()
        .arg("extract")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status": "matched""#))
        .stdout(predicate::str::contains(r#""template_id": "161001DE001""#))
        .stdout(predicate::str::contains(r#""value": "1250,00""#));
}

#[test]
fn extract_unmatched_is_not_an_error() {
    let ws = Workspace::new();
    let input = ws.write("doc.txt", "OBI GmbH\nVertragsstrafe\nStorno\n");

    ws.tplex()
        .args(["extract", "--format", "text"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: unmatched"))
        .stderr(predicate::str::contains("No template matched"));
}

#[test]
fn extract_reads_stdin_and_writes_csv() {
    let ws = Workspace::new();

    ws.tplex()
        .args(["extract", "-", "--format", "csv"])
        .write_stdin("REWE Gutschrift\nMarkt 12\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("REWE-GS,matched,branch,found,12"));
}

#[test]
fn extract_missing_input_fails() {
    let ws = Workspace::new();

    ws.tplex()
        .args(["extract", "does-not-exist.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn batch_writes_outputs_and_summary() {
    let ws = Workspace::new();
    let inbox = ws.path().join("inbox");
    fs::create_dir(&inbox).unwrap();
    fs::write(
        inbox.join("a.txt"),
        "OBI\nVertragsstrafe\nBeleg-Nr. 1\nGesamt 1.000,50 EUR\n",
    )
    .unwrap();
    fs::write(inbox.join("b.txt"), "REWE Gutschrift\nMarkt 7\n").unwrap();
    fs::write(inbox.join("c.txt"), "nothing here\n").unwrap();
    let out = ws.path().join("out");

    ws.tplex()
        .arg("batch")
        .arg(format!("{}/*.txt", inbox.display()))
        .arg("--output-dir")
        .arg(&out)
        .args(["--summary", "-j", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 3 files"));

    assert!(out.join("a.json").exists());
    assert!(out.join("c.json").exists());

    let summary = fs::read_to_string(out.join("summary.csv")).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("a.txt,matched,161001DE001,OBI_DE,1,1000.50,"));
    assert!(lines[2].starts_with("b.txt,matched,REWE-GS,REWE,"));
    assert!(lines[3].starts_with("c.txt,unmatched,"));
}

#[test]
fn templates_list_and_show() {
    let ws = Workspace::new();

    ws.tplex()
        .args(["templates", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("161001DE001"))
        .stdout(predicate::str::contains("REWE-GS"))
        .stdout(predicate::str::contains("2 template(s)"));

    ws.tplex()
        .args(["templates", "show", "rewe-gs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Issuer:   REWE"))
        .stdout(predicate::str::contains("branch [unique]"));
}

#[test]
fn templates_validate_reports_rejections() {
    let ws = Workspace::new();

    ws.tplex()
        .args(["templates", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All 2 template(s) are valid"));

    let duplicate = ws.path().join("templates").join("copy.yaml");
    fs::write(&duplicate, REWE).unwrap();

    ws.tplex()
        .args(["templates", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("REWE-GS"));
}

#[test]
fn templates_candidates_shows_ambiguity() {
    let ws = Workspace::new();
    let input = ws.write("doc.txt", "OBI REWE Gutschrift Vertragsstrafe\n");

    ws.tplex()
        .args(["templates", "candidates"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("161001DE001"))
        .stdout(predicate::str::contains("Ambiguous"));
}

#[test]
fn config_set_and_get() {
    let ws = Workspace::new();

    ws.tplex()
        .args(["config", "set", "engine.prefer_specific", "true"])
        .assert()
        .success();

    ws.tplex()
        .args(["config", "get", "engine.prefer_specific"])
        .assert()
        .success()
        .stdout(predicate::str::contains("true"));

    ws.tplex()
        .args(["config", "set", "engine.no_such_key", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration key not found"));
}
