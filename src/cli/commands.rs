use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::cli::args::{
    CheckArgs, ConfigAction, ConfigArgs, InitArgs, InstrumentArgs, OutputFormat, RunArgs, TestArgs,
};
use crate::config::loader::get_config_path;
use crate::config::types::JudgeletConfig;
use crate::error::{JudgeletError, Result};
use crate::instrument::{self, InstrumentOptions};
use crate::judge::JudgeRegistry;
use crate::sandbox::{available_backends, create_backend, ControllerOptions, ExecutionController};
use crate::structural::{self, StructuralTest};
use crate::suite::{self, TestSuite};

// ============================================================================
// Execution Commands
// ============================================================================

/// Run a program once and print its console output
pub async fn run(args: RunArgs, config: JudgeletConfig, format: OutputFormat) -> Result<()> {
    let code = read_source(&args.file)?;
    let controller = build_controller(&config)?;
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(controller.options().run_timeout);

    info!(file = %args.file.display(), timeout_ms = timeout.as_millis() as u64, "Running program");

    let result = controller.execute(&code, timeout, None).await;
    controller.shutdown().await?;
    let result = result?;

    match format {
        OutputFormat::Text => {
            for line in &result.logs {
                println!("{}", line);
            }
            if let Some(error) = &result.error {
                eprintln!("{}", error);
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Run a test suite against a program and judge every case
pub async fn test(args: TestArgs, config: JudgeletConfig, format: OutputFormat) -> Result<()> {
    let code = read_source(&args.file)?;
    let suite: TestSuite = read_json(&args.suite)?;
    if suite.cases.is_empty() {
        return Err(JudgeletError::InvalidContent(format!(
            "{}: suite has no cases",
            args.suite.display()
        )));
    }

    info!(
        function = %suite.signature.name,
        cases = suite.cases.len(),
        "Running test suite"
    );

    let controller = build_controller(&config)?;
    let registry = JudgeRegistry::default();
    let report = suite::run_suite(&controller, &registry, &code, &suite.signature, &suite.cases).await;
    controller.shutdown().await?;
    let report = report?;

    match format {
        OutputFormat::Text => {
            for result in &report.results {
                if result.passed {
                    println!("PASS  case {} ({:.1} ms)", result.case + 1, result.runtime_ms);
                    continue;
                }
                println!("FAIL  case {}", result.case + 1);
                println!("      input:    {}", serde_json::Value::Array(result.input.clone()));
                println!("      expected: {}", result.expected);
                if let Some(actual) = &result.actual {
                    println!("      actual:   {}", actual);
                }
                if let Some(message) = result.message.as_ref().or(result.error.as_ref()) {
                    println!("      {}", message);
                }
            }
            for line in &report.execution.logs {
                eprintln!("{}", line);
            }
            println!();
            println!("{}/{} passed", report.passed_count(), report.results.len());
            if !report.passed() {
                std::process::exit(1);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "passed": report.passed(),
                    "passedCount": report.passed_count(),
                    "total": report.results.len(),
                    "results": report.results,
                    "logs": report.execution.logs,
                    "error": report.execution.error,
                }))?
            );
        }
    }

    Ok(())
}

/// Step files are either a bare list of tests or an object holding one.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepFile {
    Tests(Vec<StructuralTest>),
    Step { tests: Vec<StructuralTest> },
}

/// Evaluate a lesson step's structural tests
pub async fn check(args: CheckArgs, config: JudgeletConfig, format: OutputFormat) -> Result<()> {
    let code = read_source(&args.file)?;
    let tests = match read_json::<StepFile>(&args.step)? {
        StepFile::Tests(tests) | StepFile::Step { tests } => tests,
    };

    let controller = build_controller(&config)?;
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(controller.options().run_timeout);

    info!(file = %args.file.display(), tests = tests.len(), "Checking lesson step");

    let outcome = structural::check_step(&controller, &code, &tests, timeout).await;
    controller.shutdown().await?;
    let (execution, report) = outcome?;

    match format {
        OutputFormat::Text => {
            for outcome in &report.outcomes {
                let status = if outcome.passed { "PASS" } else { "FAIL" };
                match &outcome.message {
                    Some(message) => println!("{}  #{} {}: {}", status, outcome.index + 1, outcome.kind, message),
                    None => println!("{}  #{} {}", status, outcome.index + 1, outcome.kind),
                }
            }
            if let Some(error) = &execution.error {
                eprintln!("{}", error);
            }
            if !report.passed {
                std::process::exit(1);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "passed": report.passed,
                    "outcomes": report.outcomes,
                    "logs": execution.logs,
                    "error": execution.error,
                }))?
            );
        }
    }

    Ok(())
}

/// Print the instrumented program
pub async fn instrument(args: InstrumentArgs, format: OutputFormat) -> Result<()> {
    let code = read_source(&args.file)?;
    let options = InstrumentOptions {
        track_variables: !args.no_variables,
        track_calls: !args.no_calls,
        inject_yields: !args.no_yields,
    };
    let instrumented = instrument::instrument(&code, &options)?;

    match format {
        OutputFormat::Text => {
            print!("{}", instrumented.code);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "code": instrumented.code,
                    "functionNames": instrumented.function_names,
                })
            );
        }
    }

    Ok(())
}

/// List sandbox backends
pub async fn backends(format: OutputFormat) -> Result<()> {
    let backends = available_backends();

    match format {
        OutputFormat::Text => {
            for backend in &backends {
                let status = if backend.available { "available" } else { "unavailable" };
                print!("{:<8} {:<12} {}", backend.name, status, backend.description);
                if let Some(reason) = backend.unavailable_reason {
                    print!(" ({})", reason);
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = backends
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "name": b.name,
                        "available": b.available,
                        "description": b.description,
                        "unavailable_reason": b.unavailable_reason,
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(entries));
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = JudgeletConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| JudgeletError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a program and see its console output");
    println!("  judgelet run solution.js");
    println!();
    println!("  # Judge a function against a suite");
    println!("  judgelet test solution.js --suite two-sum.json");
    println!();
    println!("  # Check a lesson step");
    println!("  judgelet check step.js --step step-3.json");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: JudgeletConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str =
                toml::to_string_pretty(&config).map_err(|e| JudgeletError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn build_controller(config: &JudgeletConfig) -> Result<ExecutionController> {
    let backend = create_backend(&config.sandbox)?;
    Ok(ExecutionController::new(backend, ControllerOptions::from_config(config)))
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        JudgeletError::InvalidContent(format!("cannot read {}: {}", path.display(), e))
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_source(path)?;
    serde_json::from_str(&text)
        .map_err(|e| JudgeletError::InvalidContent(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_file_forms() {
        let bare: StepFile =
            serde_json::from_str(r#"[{"type": "code-contains", "pattern": "let"}]"#).unwrap();
        let wrapped: StepFile = serde_json::from_str(
            r#"{"tests": [{"type": "while-loop", "condition": "i < 3"}]}"#,
        )
        .unwrap();
        assert!(matches!(bare, StepFile::Tests(ref t) if t.len() == 1));
        assert!(matches!(wrapped, StepFile::Step { ref tests } if tests.len() == 1));
    }

    #[test]
    fn test_read_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<TestSuite>(&path).unwrap_err();
        assert!(err.is_content_error());
        assert!(err.to_string().contains("suite.json"));
    }
}
