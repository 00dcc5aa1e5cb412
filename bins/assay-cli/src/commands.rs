// CLI commands for grading submissions
use anyhow::{bail, Context, Result};
use assay_common::config::EngineConfig;
use assay_common::types::{ExecutionRequest, ExecutionResult, Testcase};
use assay_engine::notebook::NotebookService;
use assay_engine::ServiceRegistry;
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// One line of a batch input file
#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub environment: String,
    pub request: ExecutionRequest,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Build a request from either a full request file or a submission plus testcase
pub fn load_request(
    request: Option<&Path>,
    content: Option<&Path>,
    testcase: Option<&Path>,
) -> Result<ExecutionRequest> {
    if let Some(path) = request {
        return read_json(path);
    }

    let Some(content_path) = content else {
        bail!("Either --request or --content is required");
    };
    let content = fs::read_to_string(content_path)
        .with_context(|| format!("Failed to read submission {}", content_path.display()))?;
    let testcase = match testcase {
        Some(path) => read_json(path)?,
        None => Testcase::default(),
    };
    Ok(ExecutionRequest::new(content, testcase))
}

/// Grade through the registry; an unknown tag becomes a failure result
pub async fn grade(registry: &ServiceRegistry, tag: &str, request: &ExecutionRequest) -> ExecutionResult {
    match registry.get_service_by_tag(tag) {
        Ok(service) => service.execute(request).await,
        Err(e) => ExecutionResult::failure(e.to_string()),
    }
}

pub async fn run_one(config: &EngineConfig, tag: &str, request: ExecutionRequest) -> Result<()> {
    let registry = ServiceRegistry::with_defaults(config);
    let result = grade(&registry, tag, &request).await;

    info!(
        environment = tag,
        success = result.success,
        passed = result.passed,
        duration_ms = result.metadata.duration_ms,
        "Submission graded"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Grade every non-blank line; results come back in input order
pub async fn grade_lines(
    registry: &ServiceRegistry,
    input: &str,
    concurrency: usize,
) -> Vec<ExecutionResult> {
    let lines: Vec<(usize, &str)> = input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    stream::iter(lines)
        .map(|(index, line)| async move {
            match serde_json::from_str::<BatchEntry>(line) {
                Ok(entry) => grade(registry, &entry.environment, &entry.request).await,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed batch entry");
                    ExecutionResult::failure(format!("line {}: {}", index + 1, e))
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

pub async fn run_batch(config: &EngineConfig, input: &Path, concurrency: usize) -> Result<()> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read batch input {}", input.display()))?;
    let registry = ServiceRegistry::with_defaults(config);

    let started = Instant::now();
    let results = grade_lines(&registry, &content, concurrency).await;
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }

    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.success).count();
    info!(
        total = results.len(),
        passed,
        failed,
        duration_ms = started.elapsed().as_millis() as u64,
        "Batch complete"
    );
    Ok(())
}

pub fn list_environments(config: &EngineConfig) {
    for environment in ServiceRegistry::with_defaults(config).environments() {
        println!("{}", environment);
    }
}

/// `name  language_id  memory` rows for every configured language
pub fn language_rows(config: &EngineConfig) -> Vec<String> {
    let table = &config.languages;
    table
        .list_languages()
        .iter()
        .filter_map(|name| table.get(name))
        .map(|language| {
            format!(
                "{:<12} {:>4} {:>6}MB",
                language.name, language.language_id, language.memory_limit_mb
            )
        })
        .collect()
}

pub fn list_languages(config: &EngineConfig) {
    for row in language_rows(config) {
        println!("{}", row);
    }
}

pub async fn list_kernels(config: &EngineConfig, interpreter: &str) -> Result<()> {
    let service = NotebookService::new(config);
    let kernels = service
        .installed_kernels()
        .await
        .context("Failed to discover notebook kernels")?;

    println!("Installed kernels:");
    for kernel in &kernels {
        println!(
            "  {:<20} {:<12} {}",
            kernel.name,
            kernel.language.as_deref().unwrap_or("-"),
            kernel.display_name.as_deref().unwrap_or("")
        );
    }

    match service.select_kernel(interpreter).await {
        Ok(kernel) => println!("Selected for '{}': {}", interpreter, kernel),
        Err(e) => warn!(interpreter, error = %e, "No kernel would be selected"),
    }
    Ok(())
}
