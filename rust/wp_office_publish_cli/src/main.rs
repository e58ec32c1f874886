mod config;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wp_office_publish::{
    normalize_file, prepare_source, CleanedHtml, Credentials, Outcome, PagePublisher, PageRef,
    PublishError, RevisionGuard, Session, SofficeExporter, Step, StepError, WpClient,
};

use crate::config::{default_config_path, load_config, remember_site, resolve_credentials, Config};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Config file (defaults to the per-user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Site URL, e.g. https://example.org (or WP_URL).
    #[arg(long, global = true)]
    url: Option<String>,

    /// WordPress username (or WP_USERNAME). The application password is read
    /// from WP_APP_PASSWORD only.
    #[arg(long, global = true)]
    username: Option<String>,

    /// Save --url and --username to the config file after a successful call.
    #[arg(long, global = true)]
    remember: bool,

    /// More logging (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Less logging.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List pages the account can edit.
    Pages,

    /// Convert and clean a document without publishing.
    Clean {
        /// .docx, .xlsx or exported .htm/.html file.
        input: PathBuf,

        /// Write cleaned HTML here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Replace a page's content with a cleaned document, keeping one backup.
    Publish {
        input: PathBuf,

        /// Page id or slug.
        #[arg(long)]
        page: PageRef,

        /// Confirm the overwrite.
        #[arg(long)]
        yes: bool,
    },

    /// Restore the content saved by the last publish.
    Revert {
        #[arg(long)]
        page: PageRef,

        #[arg(long)]
        yes: bool,
    },

    /// Show (or discard) the stored backup.
    Backup {
        #[arg(long)]
        clear: bool,
    },
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,rustls=warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// Names the step that failed and what the page looks like now.
fn report(err: &anyhow::Error) {
    let Some(step_err) = err.downcast_ref::<StepError>() else {
        eprintln!("error: {err:#}");
        return;
    };
    eprintln!("error: {} step failed: {}", step_err.step, step_err.error);
    if let Some(hint) = hint(step_err.step, &step_err.error) {
        eprintln!("  {hint}");
    }
    if step_err.error.is_retryable() {
        eprintln!("  retrying may succeed");
    }
}

/// What the failure left behind on the site.
fn hint(step: Step, error: &PublishError) -> Option<&'static str> {
    let hint = match (step, error) {
        (_, e) if e.outcome_unknown() => {
            "the update may or may not have been applied; check the page before retrying"
        }
        (Step::BackupFetch, _) => "nothing was written to the site",
        (Step::Publish, _) => "the page was not changed; the backup of its previous content is kept",
        (Step::Revert, PublishError::NoBackup | PublishError::BackupPageMismatch { .. }) => {
            "nothing was written to the site"
        }
        (Step::Revert, _) => "the page was not restored; the backup is kept",
        _ => return None,
    };
    Some(hint)
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(p) => Ok(p.clone()),
        None => default_config_path(),
    }
}

fn credentials(cli: &Cli, config: &Config) -> Result<Credentials> {
    resolve_credentials(
        cli.url.as_deref(),
        cli.username.as_deref(),
        |k| std::env::var(k).ok(),
        config,
    )
}

fn maybe_remember(cli: &Cli, path: &Path, creds: &Credentials) -> Result<()> {
    if cli.remember {
        remember_site(path, &creds.site_url, &creds.username)
            .with_context(|| format!("save site to {}", path.display()))?;
        info!(path = %path.display(), "site and username saved");
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let path = config_path(cli)?;
    let config = load_config(&path)?;

    match &cli.command {
        Command::Pages => {
            let creds = credentials(cli, &config)?;
            let client = WpClient::new(config.wp_config())?;
            let pages = client.list_editable_pages(&creds).context("list pages")?;
            if pages.is_empty() {
                warn!("no editable pages for this account");
            }
            for p in &pages {
                println!("{}\t{}", p.id, p.title);
            }
            maybe_remember(cli, &path, &creds)
        }
        Command::Clean { input, out } => {
            let cleaned = convert_and_clean(input, &config)?;
            match out {
                Some(out) => fs::write(out, cleaned.as_str())
                    .with_context(|| format!("write {}", out.display()))?,
                None => println!("{cleaned}"),
            }
            Ok(())
        }
        Command::Publish { input, page, yes } => {
            let creds = credentials(cli, &config)?;
            let cleaned = convert_and_clean(input, &config)?;
            if !cleaned.has_content() {
                bail!("{} step produced an empty document; refusing to publish", Step::Clean);
            }
            let client = WpClient::new(config.wp_config())?;
            let id = client.resolve(&creds, page).context("resolve page")?;
            if !yes {
                bail!("publishing replaces the content of page {id}; pass --yes to confirm");
            }
            let guard = RevisionGuard::with_backup_file(client, &config.backup_file())?;
            let session = Session::new(guard);
            let op = session.start_publish(&creds, id, cleaned.into_string())?;
            finish(op.wait())?;
            println!("published page {id}; previous content saved for revert");
            maybe_remember(cli, &path, &creds)
        }
        Command::Revert { page, yes } => {
            let creds = credentials(cli, &config)?;
            let client = WpClient::new(config.wp_config())?;
            let id = client.resolve(&creds, page).context("resolve page")?;
            if !yes {
                bail!("reverting replaces the content of page {id}; pass --yes to confirm");
            }
            let guard = RevisionGuard::with_backup_file(client, &config.backup_file())?;
            let session = Session::new(guard);
            finish(session.start_revert(&creds, id)?.wait())?;
            println!("page {id} restored");
            maybe_remember(cli, &path, &creds)
        }
        Command::Backup { clear } => {
            let client = WpClient::new(config.wp_config())?;
            let backup_file = config.backup_file();
            let mut guard = RevisionGuard::with_backup_file(client, &backup_file)?;
            match guard.backup() {
                Some(b) => println!(
                    "backup of page {} ({} bytes) in {}",
                    b.page,
                    b.content.len(),
                    backup_file.display()
                ),
                None => println!("no backup"),
            }
            if *clear {
                guard.clear()?;
                println!("backup cleared");
            }
            Ok(())
        }
    }
}

fn finish(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Finished(result) => Ok(result?),
        Outcome::Unknown => Err(anyhow!(
            "the operation did not report back; check the page before retrying"
        )),
    }
}

fn convert_and_clean(input: &Path, config: &Config) -> Result<CleanedHtml> {
    let exporter = SofficeExporter::new(config.soffice());
    let html_path = prepare_source(input, &exporter, &config.export_workdir())
        .with_context(|| format!("{} step failed for {}", Step::Convert, input.display()))?;
    let cleaned = normalize_file(&html_path, &config.normalize_options())
        .with_context(|| format!("{} step failed: read {}", Step::Clean, html_path.display()))?;
    for d in cleaned.diagnostics() {
        warn!("{d}");
    }
    info!(
        encoding = cleaned.encoding().name(),
        bytes = cleaned.as_str().len(),
        "document cleaned"
    );
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wp_office_publish::{PageId, RemoteState};

    fn network(remote: RemoteState) -> PublishError {
        PublishError::Network {
            message: "timed out".to_string(),
            remote,
        }
    }

    #[test]
    fn test_failed_backup_fetch_wrote_nothing() {
        assert_eq!(
            hint(Step::BackupFetch, &network(RemoteState::Unchanged)),
            Some("nothing was written to the site")
        );
    }

    #[test]
    fn test_failed_publish_keeps_backup() {
        let err = PublishError::Conflict {
            status: 400,
            message: "invalid content".to_string(),
        };
        assert_eq!(
            hint(Step::Publish, &err),
            Some("the page was not changed; the backup of its previous content is kept")
        );
    }

    #[test]
    fn test_revert_without_matching_backup_wrote_nothing() {
        assert_eq!(
            hint(Step::Revert, &PublishError::NoBackup),
            Some("nothing was written to the site")
        );
        let mismatch = PublishError::BackupPageMismatch {
            held: PageId(1),
            requested: PageId(2),
        };
        assert_eq!(hint(Step::Revert, &mismatch), Some("nothing was written to the site"));
        assert_eq!(
            hint(Step::Revert, &network(RemoteState::Unchanged)),
            Some("the page was not restored; the backup is kept")
        );
    }

    #[test]
    fn test_unknown_outcome_wins_over_step() {
        for step in [Step::Publish, Step::Revert] {
            let text = hint(step, &network(RemoteState::Unknown)).unwrap();
            assert!(text.contains("may or may not"), "{step}: {text}");
        }
    }

    #[test]
    fn test_local_steps_have_no_hint() {
        assert_eq!(hint(Step::Convert, &PublishError::Protocol("x".to_string())), None);
        assert_eq!(hint(Step::Clean, &PublishError::Busy(PageId(3))), None);
    }
}
