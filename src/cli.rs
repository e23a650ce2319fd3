use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::{self, AppConfig, ConfigProvider, TrackerSettings};
use crate::error::GuardError;
use crate::export::encoder::{decode_html_table, StepsEncoder};
use crate::export::{BatchOutcome, Exporter};
use crate::generator::gemini::GeminiBackend;
use crate::generator::Generator;
use crate::model::story::{StoryInput, WorkItemId};
use crate::model::test_case::{GenerationResult, TestCase};
use crate::providers;
use crate::session::guard::PushDecision;
use crate::session::history::{self, PushRecord};
use crate::session::{CaseEdit, SessionStore, StepEdit};

/// Who is running the command and where their settings live.
pub struct Invocation {
    pub identity: String,
    pub config_path: PathBuf,
}

impl Invocation {
    pub fn new(user: Option<String>) -> Self {
        Self {
            identity: config::resolve_identity(user),
            config_path: config::config_path(),
        }
    }

    fn app_config(&self) -> Result<AppConfig> {
        Ok(config::load_config_from(&self.config_path)?)
    }

    fn provider(&self) -> Box<dyn ConfigProvider> {
        config::select_provider(&self.identity, self.config_path.clone())
    }

    fn session(&self) -> Result<SessionStore> {
        SessionStore::open(&self.identity)
    }
}

pub fn handle_config_show(ctx: &Invocation) -> Result<()> {
    let config = ctx.app_config()?;
    let provider = ctx.provider();
    let settings = provider.load()?;

    println!("Identity:     {}", ctx.identity);
    println!("Settings:     {}", provider.name());
    println!("Organization: {}", settings.organization.as_deref().unwrap_or("(not set)"));
    println!("Project:      {}", settings.project.as_deref().unwrap_or("(not set)"));
    println!("PAT:          {}", if settings.pat.is_some() { "set" } else { "(not set)" });
    println!("Tracker URL:  {}", config.tracker.base_url);
    println!("Steps format: {}", config.tracker.steps_format.label());
    println!("Model:        {}", config.model.model);
    println!("Language:     {}", config.model.language);
    println!(
        "API key:      {}",
        if config.model.resolved_api_key().is_some() { "set" } else { "(not set)" }
    );
    println!("Config file:  {}", ctx.config_path.display());
    Ok(())
}

pub fn handle_config_set(
    ctx: &Invocation,
    pat: Option<String>,
    organization: Option<String>,
    project: Option<String>,
) -> Result<()> {
    if pat.is_none() && organization.is_none() && project.is_none() {
        bail!("Nothing to set: pass --pat, --organization or --project");
    }
    let provider = ctx.provider();
    if !provider.is_writable() {
        bail!(
            "Tracker settings come from the {}; unset ADO_PAT, ADO_ORGANIZATION and ADO_PROJECT to use the config file",
            provider.name()
        );
    }
    let current = provider.load()?;
    let updated = TrackerSettings {
        pat: pat.or(current.pat),
        organization: organization.or(current.organization),
        project: project.or(current.project),
    };
    provider.save(&updated)?;
    println!("Saved tracker settings for {}.", ctx.identity);
    Ok(())
}

pub fn handle_story(ctx: &Invocation, title: String, description: String, criteria: String) -> Result<()> {
    let story = StoryInput::new(title.trim(), description.trim(), criteria.trim());
    if let Err(problems) = story.validate_manual() {
        bail!("Invalid story:\n  {}", problems.join("\n  "));
    }
    ctx.session()?.set_story(story, None)?;
    println!("Story saved. Run `storycase generate` to create test cases.");
    Ok(())
}

pub async fn handle_fetch(ctx: &Invocation, id: &str) -> Result<()> {
    let id: WorkItemId = id.parse()?;
    let config = ctx.app_config()?;
    let credentials = ctx.provider().credentials()?;
    let tracker = providers::create_tracker(&config.tracker, credentials);

    let story = tracker.fetch_story(id).await?;
    tracing::info!(%id, title = %story.title, "fetched story");
    print_story(&story);
    ctx.session()?.set_story(story, Some(id))?;
    println!("\nWork item {id} will be the default parent for `storycase push`.");
    Ok(())
}

fn session_story(store: &SessionStore) -> Result<StoryInput> {
    match &store.data().story {
        Some(story) => Ok(story.clone()),
        None => bail!("No story yet. Run `storycase story` or `storycase fetch <ID>` first"),
    }
}

fn generator(config: &AppConfig) -> Result<Generator> {
    let backend = GeminiBackend::new(&config.model)?;
    Ok(Generator::new(Box::new(backend), config.model.language.as_str())?)
}

pub async fn handle_generate(ctx: &Invocation) -> Result<()> {
    let config = ctx.app_config()?;
    let mut store = ctx.session()?;
    let story = session_story(&store)?;

    let result = generator(&config)?
        .generate(&story)
        .await
        .context("Test case generation failed")?;
    if result.is_empty() {
        println!("No test cases were generated. Try refining your input.");
    } else {
        print_cases(&result.test_cases);
    }
    store.set_test_cases(result.test_cases)?;
    Ok(())
}

pub async fn handle_summarize(ctx: &Invocation) -> Result<()> {
    let config = ctx.app_config()?;
    let store = ctx.session()?;
    let story = session_story(&store)?;

    let summary = generator(&config)?
        .summarize_criteria(&story.acceptance_criteria)
        .await
        .context("Summarizing acceptance criteria failed")?;
    match summary {
        Some(summary) => println!("{summary}"),
        None => println!("No summary was generated."),
    }
    Ok(())
}

pub fn handle_show(ctx: &Invocation, json: bool) -> Result<()> {
    let store = ctx.session()?;
    let cases = &store.data().test_cases;
    if json {
        let result = GenerationResult {
            test_cases: cases.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if let Some(story) = &store.data().story {
        print_story(story);
        println!();
    }
    if cases.is_empty() {
        println!("No test cases yet.");
    } else {
        print_cases(cases);
    }
    Ok(())
}

pub struct EditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub steps_from: Option<PathBuf>,
    pub step: Option<usize>,
    pub action: Option<String>,
    pub expected: Option<String>,
}

pub fn handle_edit(ctx: &Invocation, case: usize, args: EditArgs) -> Result<()> {
    let step = match args.step {
        Some(index) => {
            if args.action.is_none() && args.expected.is_none() {
                bail!("--step needs --action and/or --expected");
            }
            Some(StepEdit {
                index,
                action: args.action,
                expected_result: args.expected,
            })
        }
        None if args.action.is_some() || args.expected.is_some() => {
            bail!("--action and --expected need --step");
        }
        None => None,
    };
    let steps = match &args.steps_from {
        Some(path) => {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let steps = decode_html_table(&html);
            if steps.is_empty() {
                bail!("No steps table found in {}", path.display());
            }
            Some(steps)
        }
        None => None,
    };
    let edit = CaseEdit {
        title: args.title,
        description: args.description,
        steps,
        step,
    };

    let mut store = ctx.session()?;
    store.edit_case(case, edit)?;
    print_cases(&store.data().test_cases[case - 1..case]);
    Ok(())
}

pub struct PushArgs {
    pub parent: Option<String>,
    pub yes: bool,
    pub format: Option<StepsEncoder>,
    pub concurrency: Option<usize>,
}

pub async fn handle_push(ctx: &Invocation, args: PushArgs) -> Result<()> {
    let mut store = ctx.session()?;
    let parent_id = match (&args.parent, store.data().source_item) {
        (Some(raw), _) => raw.parse::<WorkItemId>()?,
        (None, Some(source)) => source,
        (None, None) => bail!("No parent work item: pass --parent <ID> or fetch a story first"),
    };
    let cases = store.data().test_cases.clone();
    if cases.is_empty() {
        println!("Nothing to push.");
        return Ok(());
    }

    let confirmed = match store.push_decision(parent_id) {
        PushDecision::Allowed => false,
        PushDecision::InFlight => return Err(GuardError::InFlight.into()),
        PushDecision::NeedsConfirmation => {
            if !(args.yes || confirm(&format!(
                "These test cases were already pushed to work item {parent_id}. Push them again?"
            ))?) {
                println!("Push cancelled.");
                return Ok(());
            }
            true
        }
    };

    let config = ctx.app_config()?;
    let credentials = ctx.provider().credentials()?;
    let tracker = providers::create_tracker(&config.tracker, credentials);
    let encoder = args.format.unwrap_or(config.tracker.steps_format);
    let concurrency = args.concurrency.unwrap_or(config.tracker.concurrency);

    store.begin_push(parent_id, confirmed)?;
    let report = Exporter::new(tracker.as_ref(), encoder)
        .with_concurrency(concurrency)
        .push(&cases, parent_id)
        .await;
    store.finish_push(report.success_count())?;

    if let Err(e) = history::append_record(
        &history::history_path(),
        &PushRecord::from_report(&ctx.identity, &report),
    ) {
        tracing::warn!(error = %e, "failed to record push history");
    }

    println!("{}", report.message());
    for (title, reason) in report.failures() {
        println!("  failed: {title}: {reason}");
    }
    if report.outcome() == BatchOutcome::FullFailure {
        bail!("No test cases were created");
    }
    Ok(())
}

pub fn handle_history(ctx: &Invocation, limit: usize) -> Result<()> {
    let records = history::read_records(&history::history_path(), Some(&ctx.identity), Some(limit));
    if records.is_empty() {
        println!("No pushes recorded.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  parent {}  {} created, {} failed",
            record.timestamp,
            record.parent_id,
            record.created(),
            record.failed()
        );
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(parse_confirmation(&answer))
}

pub fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_story(story: &StoryInput) {
    println!("Title: {}", story.title);
    println!("Description:\n{}", story.description);
    println!("Acceptance criteria:\n{}", story.acceptance_criteria);
}

fn print_cases(cases: &[TestCase]) {
    for (i, case) in cases.iter().enumerate() {
        println!("{}. {}", i + 1, case.title);
        println!("   {}", case.description);
        for (n, step) in case.steps.iter().enumerate() {
            println!("   {}) {}", n + 1, step.action);
            println!("      => {}", step.expected_result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_accepts_yes() {
        assert!(parse_confirmation("y\n"));
        assert!(parse_confirmation("YES"));
        assert!(parse_confirmation("  Yes  "));
    }

    #[test]
    fn confirmation_defaults_to_no() {
        assert!(!parse_confirmation("\n"));
        assert!(!parse_confirmation("n"));
        assert!(!parse_confirmation("sure"));
    }
}
