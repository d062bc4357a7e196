//! CLI integration tests

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const CROPS: [&str; 5] = ["Wheat", "Rice", "Corn", "Soybean", "Sugarcane"];
const SOILS: [&str; 6] = ["Clay", "Sandy", "Loamy", "Silty", "Peaty", "Chalky"];

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Run the binary against paths inside the workspace
    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_crop-advisor"))
            .env("HOME", self.dir.path())
            .env_remove("ADVISOR_CONFIG_FILE")
            .env("ADVISOR_TRAINING__FOREST__N_TREES", "10")
            .arg("--model-path")
            .arg(self.path("crop_model.json"))
            .arg("--metrics-path")
            .arg(self.path("metrics.json"))
            .arg("--history-path")
            .arg(self.path("history.csv"))
            .args(args)
            .output()
            .expect("Failed to execute command")
    }

    fn run_json(&self, args: &[&str]) -> Value {
        let mut full = args.to_vec();
        full.extend(["--format", "json"]);
        let output = self.run(&full);
        assert!(
            output.status.success(),
            "command failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn write_dataset(&self, include_fertilize: bool) -> PathBuf {
        let mut csv = String::from(
            "crop_type,soil_type,soil_moisture,temperature,humidity,nutrient_level,soil_pH,action\n",
        );
        for i in 0..90usize {
            let moisture = 10 + (i * 7 % 90);
            let nutrient = i % 5 + 1;
            let action = if moisture < 35 {
                "Irrigate"
            } else if nutrient == 1 {
                "Fertilize"
            } else {
                "None"
            };
            if action == "Fertilize" && !include_fertilize {
                continue;
            }
            csv.push_str(&format!(
                "{},{},{},28,60,{},6.5,{}\n",
                CROPS[i % CROPS.len()],
                SOILS[i % SOILS.len()],
                moisture,
                nutrient,
                action
            ));
        }
        // An unusable row that the loader must skip
        csv.push_str("Wheat,Clay,,28,60,1,6.5,Fertilize\n");

        let path = self.path("crop_data.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    fn train(&self) -> Value {
        let dataset = self.write_dataset(true);
        self.run_json(&["train", "--dataset", dataset.to_str().unwrap(), "--seed", "7"])
    }
}

fn predict_args(ph: &str) -> Vec<&str> {
    vec![
        "predict",
        "--crop-type",
        "Wheat",
        "--soil-type",
        "Clay",
        "--soil-moisture",
        "45",
        "--temperature",
        "28",
        "--humidity",
        "60",
        "--nutrient-level",
        "1",
        "--soil-ph",
        ph,
    ]
}

fn history_rows(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|text| text.lines().count().saturating_sub(1))
        .unwrap_or(0)
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_crop-advisor"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "CLI help should succeed");
    for command in ["train", "predict", "history", "metrics"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_crop-advisor"))
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("crop-advisor"));
}

#[test]
fn test_train_writes_artifact_and_metrics() {
    let ws = Workspace::new();
    let report = ws.train();

    assert!(ws.path("crop_model.json").exists());
    assert!(ws.path("metrics.json").exists());
    assert_eq!(report["dataset"]["rows_skipped"], 1);
    assert_eq!(report["model_version"].as_str().unwrap().len(), 12);
    assert!(report["metrics"]["classification_report"]["Fertilize"].is_object());

    let metrics = ws.run_json(&["metrics"]);
    assert_eq!(metrics, report["metrics"]);
}

#[test]
fn test_training_is_reproducible() {
    let ws = Workspace::new();
    ws.train();
    let first = std::fs::read(ws.path("crop_model.json")).unwrap();
    ws.train();
    let second = std::fs::read(ws.path("crop_model.json")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_missing_required_class_aborts_training() {
    let ws = Workspace::new();
    let dataset = ws.write_dataset(false);
    let output = ws.run(&["train", "--dataset", dataset.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Fertilize"));
    assert!(!ws.path("crop_model.json").exists());
}

#[test]
fn test_predict_records_history() {
    let ws = Workspace::new();
    ws.train();

    let result = ws.run_json(&predict_args("6.2"));
    let classes: Vec<&str> = result["probabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["action"].as_str().unwrap())
        .collect();
    assert!(classes.contains(&result["action"].as_str().unwrap()));
    assert_eq!(result["record"]["predicted_action"], result["action"]);
    assert_eq!(history_rows(&ws.path("history.csv")), 1);

    let mut no_record = predict_args("6.2");
    no_record.push("--no-record");
    ws.run_json(&no_record);
    assert_eq!(history_rows(&ws.path("history.csv")), 1);
}

#[test]
fn test_out_of_domain_reading_is_rejected() {
    let ws = Workspace::new();
    ws.train();

    let output = ws.run(&predict_args("15"));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("soil_pH"));
    assert_eq!(history_rows(&ws.path("history.csv")), 0);
}

#[test]
fn test_predict_without_model_fails() {
    let ws = Workspace::new();
    let output = ws.run(&predict_args("6.2"));

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn test_history_list_summary_and_export() {
    let ws = Workspace::new();
    ws.train();
    ws.run_json(&predict_args("6.2"));
    ws.run_json(&predict_args("7.0"));

    let all = ws.run_json(&["history", "list"]);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let rice = ws.run_json(&["history", "list", "--crop-type", "Rice"]);
    assert!(rice.as_array().unwrap().is_empty());

    let summary = ws.run_json(&["history", "summary", "--date", "all"]);
    assert_eq!(summary["total"], 2);

    let export = ws.path("export.csv");
    let output = ws.run(&["history", "export", "--output", export.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(
        std::fs::read_to_string(&export).unwrap(),
        std::fs::read_to_string(ws.path("history.csv")).unwrap()
    );
}

#[test]
fn test_history_without_timestamp_is_schema_error() {
    let ws = Workspace::new();
    std::fs::write(
        ws.path("history.csv"),
        "crop_type,soil_type,soil_moisture,temperature,humidity,nutrient_level,soil_pH,predicted_action\n",
    )
    .unwrap();

    let output = ws.run(&["history", "list"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timestamp"));
}
