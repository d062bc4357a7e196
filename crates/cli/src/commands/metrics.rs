//! Display of persisted training metrics

use advisor_lib::{training::ClassReport, AdvisorConfig, ModelMetrics};
use anyhow::{Context, Result};
use colored::Colorize;
use tabled::{builder::Builder, settings::Style, Tabled};

use crate::output::{
    format_score, print_heading, print_json, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Support")]
    support: u32,
}

impl ReportRow {
    fn new(class: impl Into<String>, report: &ClassReport) -> Self {
        Self {
            class: class.into(),
            precision: format_score(report.precision),
            recall: format_score(report.recall),
            f1: format_score(report.f1),
            support: report.support,
        }
    }
}

/// Show the metrics written by the last training run
pub fn show_metrics(config: &AdvisorConfig, format: OutputFormat) -> Result<()> {
    let metrics = ModelMetrics::load(&config.metrics_path).with_context(|| {
        format!("Failed to read metrics from {}", config.metrics_path.display())
    })?;

    let Some(metrics) = metrics else {
        print_warning(&format!(
            "No metrics found at {}; run `crop-advisor train` first",
            config.metrics_path.display()
        ));
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&metrics),
        OutputFormat::Table => {
            print_metrics(&metrics);
            Ok(())
        }
    }
}

/// Accuracy, per-class report and confusion matrix
pub fn print_metrics(metrics: &ModelMetrics) {
    print_heading("Model Metrics", 50);
    println!("Accuracy: {}", format_score(metrics.accuracy).cyan());
    println!();

    let mut rows: Vec<ReportRow> = metrics
        .classes
        .iter()
        .filter_map(|class| metrics.class_report(class).map(|r| ReportRow::new(class, r)))
        .collect();
    rows.push(ReportRow::new("macro avg", &metrics.macro_avg));
    rows.push(ReportRow::new("weighted avg", &metrics.weighted_avg));
    print_table(rows, "No classes in report");

    println!();
    println!("{}", "Confusion Matrix (rows: actual, columns: predicted)".bold());
    let mut builder = Builder::default();
    builder.push_record(std::iter::once(String::new()).chain(metrics.classes.iter().cloned()));
    for (class, row) in metrics.classes.iter().zip(&metrics.confusion_matrix) {
        builder.push_record(
            std::iter::once(class.clone()).chain(row.iter().map(|count| count.to_string())),
        );
    }
    println!("{}", builder.build().with(Style::rounded()));
}
