// Operator command line.
//
// `worker` (the default) runs the queue consumer until Ctrl+C. Every other
// subcommand is a one-shot admin action against the same database and broker.

use crate::core::moderation::{
    JobStatus, Language, ModeratableContent, ModerationAdminService, ModerationJob,
    ModerationLevel, ModerationProducer, TargetRef, TargetType,
};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[command(
    name = "dance-moderation",
    about = "Asynchronous moderation worker and admin tools for reviews",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume the moderation queue until interrupted (default command)
    Worker,
    /// Schedule moderation for a review, e.g. when backfilling
    Enqueue(TargetArgs),
    /// Set a moderation level by hand; takes effect immediately
    SetLevel(SetLevelArgs),
    /// Schedule another automatic pass for a target
    Requeue(TargetArgs),
    /// List ledger rows, newest first
    ListJobs(ListJobsArgs),
    /// Show every ledger row for one target
    History(TargetArgs),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct TargetArgs {
    /// Content type: review or event-review
    #[arg(long = "type", value_name = "TYPE")]
    pub target_type: TargetType,
    /// Content id
    #[arg(long = "id", value_name = "ID")]
    pub target_id: i64,
}

impl TargetArgs {
    pub fn target(&self) -> TargetRef {
        TargetRef::new(self.target_type, self.target_id)
    }
}

#[derive(Args, Debug)]
pub struct SetLevelArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// green, yellow or red
    #[arg(long)]
    pub level: ModerationLevel,
    /// Reason shown in every language unless a translation is given
    #[arg(long)]
    pub reason: Option<String>,
    #[arg(long)]
    pub reason_en: Option<String>,
    #[arg(long)]
    pub reason_ru: Option<String>,
}

impl SetLevelArgs {
    pub fn reason_localized(&self) -> BTreeMap<Language, String> {
        [
            (Language::En, &self.reason_en),
            (Language::Ru, &self.reason_ru),
        ]
        .into_iter()
        .filter_map(|(language, value)| {
            value
                .as_ref()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (language, v.to_string()))
        })
        .collect()
    }
}

#[derive(Args, Debug)]
pub struct ListJobsArgs {
    /// Only rows in this status (pending, processing, done, error)
    #[arg(long)]
    pub status: Option<JobStatus>,
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
}

/// Run a one-shot admin command. `Command::Worker` is handled by `main`.
pub async fn run_admin_command(
    command: Command,
    producer: &ModerationProducer,
    admin: &ModerationAdminService,
) -> anyhow::Result<()> {
    match command {
        Command::Worker => anyhow::bail!("the worker is not an admin command"),
        Command::Enqueue(args) => {
            let job = producer.enqueue(args.target()).await?;
            println!("Enqueued job {} for {}", job.id, job.target);
        }
        Command::SetLevel(args) => {
            let reason_localized = args.reason_localized();
            let updated = admin
                .set_level(
                    args.target.target(),
                    args.level,
                    args.reason.clone(),
                    reason_localized,
                )
                .await?;
            println!("{}", format_content(&updated));
        }
        Command::Requeue(args) => {
            let job = admin.requeue(args.target()).await?;
            println!("Requeued {} as job {}", job.target, job.id);
        }
        Command::ListJobs(args) => {
            let jobs = admin.list_jobs(args.status, args.limit).await?;
            print_jobs(&jobs);
        }
        Command::History(args) => {
            let jobs = admin.jobs_for_target(args.target()).await?;
            print_jobs(&jobs);
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[ModerationJob]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    for job in jobs {
        println!("{}", format_job(job));
    }
}

fn format_job(job: &ModerationJob) -> String {
    let mut line = format!(
        "#{:<6} {:<16} {:<10} attempts={:<3} updated={}",
        job.id,
        job.target.to_string(),
        job.status.as_str(),
        job.attempts,
        job.updated_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Some(error) = &job.last_error {
        line.push_str(&format!(" last_error=\"{}\"", error));
    }
    line
}

fn format_content(content: &ModeratableContent) -> String {
    let state = &content.moderation;
    let mut line = format!(
        "{}: {} ({}) \"{}\"",
        content.target, state.level, state.source, state.reason
    );
    for (language, reason) in &state.reason_localized {
        line.push_str(&format!(" [{}: {}]", language.code(), reason));
    }
    line
}
