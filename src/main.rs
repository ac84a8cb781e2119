//! CLI entry point for `mailcatch`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

use mailcatch::config::{self, Config};
use mailcatch::model::dto::{DetailDto, MessageListResponse};
use mailcatch::{export, MessageRepository};

#[derive(Parser)]
#[command(
    name = "mailcatch",
    version,
    about = "Store, list and inspect captured email messages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Message directory (overrides the configuration file)
    #[arg(short, long, global = true, value_name = "DIR", env = "MAILCATCH_DIR")]
    dir: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a message read from a file, or stdin with `-`
    Save {
        #[arg(default_value = "-")]
        file: PathBuf,
    },
    /// List stored messages, newest first
    List {
        /// Number of messages to skip
        #[arg(long, default_value_t = 0)]
        start: usize,
        /// Page size (0 uses the configured default)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show headers, addresses and bodies of a message
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Write a body section, by index, to a directory
    Section {
        id: String,
        index: usize,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Write the body section with a Content-ID to a directory
    Content {
        id: String,
        content_id: String,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Write the original message bytes to a directory
    Raw {
        id: String,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Delete a message
    Delete { id: String },
    /// Delete every stored message
    Clear,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    if let Some(dir) = cli.dir {
        config.storage.message_dir = Some(dir);
    }

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Completions { shell } => return cmd_completions(shell),
        Commands::Manpage => return cmd_manpage(),
        _ => {}
    }

    let repo = MessageRepository::open(&config)?;
    match cli.command {
        Commands::Save { file } => cmd_save(&repo, &file),
        Commands::List { start, limit, json } => cmd_list(&repo, start, limit, json),
        Commands::Show { id, json } => cmd_show(&repo, &id, json),
        Commands::Section { id, index, output } => {
            report_export(export::export_section(repo.open_section(&id, index)?, &output)?)
        }
        Commands::Content {
            id,
            content_id,
            output,
        } => report_export(export::export_section(
            repo.open_section_by_content_id(&id, &content_id)?,
            &output,
        )?),
        Commands::Raw { id, output } => {
            report_export(export::export_raw(repo.open_raw(&id)?, &output)?)
        }
        Commands::Delete { id } => cmd_delete(&repo, &id),
        Commands::Clear => {
            let count = repo.delete_all()?;
            println!("  Deleted {count} message(s)");
            Ok(())
        }
        Commands::Completions { .. } | Commands::Manpage => Ok(()),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, config::LOG_FILE_NAME);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailcatch", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

fn cmd_save(repo: &MessageRepository, file: &Path) -> anyhow::Result<()> {
    let mut input: Box<dyn Read> = if file == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(file)?)
    };
    let stored = repo.save(|sink| io::copy(&mut input, sink).map(|_| ()))?;
    println!("{}", stored.id);
    Ok(())
}

fn cmd_list(repo: &MessageRepository, start: usize, limit: usize, json: bool) -> anyhow::Result<()> {
    let page = repo.list(start, limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_list_table(&page, start);
    }
    Ok(())
}

fn cmd_show(repo: &MessageRepository, id: &str, json: bool) -> anyhow::Result<()> {
    let detail = repo.load_detail(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_detail(&detail);
    }
    Ok(())
}

fn cmd_delete(repo: &MessageRepository, id: &str) -> anyhow::Result<()> {
    if !repo.delete(id)? {
        anyhow::bail!("Message not found: {id}");
    }
    println!("  Deleted {id}");
    Ok(())
}

fn report_export(path: PathBuf) -> anyhow::Result<()> {
    println!("  Written {}", path.display());
    Ok(())
}

fn print_list_table(page: &MessageListResponse, start: usize) {
    use humansize::{format_size, BINARY};

    println!();
    for message in &page.messages {
        println!(
            "  {:<28} {:<20} {:>10}  {}",
            message.id,
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_size(message.size, BINARY),
            message.subject.as_deref().unwrap_or("(no subject)")
        );
    }
    let shown_end = start + page.messages.len();
    println!();
    println!(
        "  {} to {} of {} message(s)",
        if page.messages.is_empty() { start } else { start + 1 },
        shown_end,
        page.total_message_count
    );
    println!();
}

fn print_detail(detail: &DetailDto) {
    let join = |list: &[mailcatch::model::address::EmailAddress]| {
        list.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
    };

    println!();
    println!("  {:<10} {}", "Id", detail.id);
    println!("  {:<10} {}", "Created", detail.created_at.to_rfc3339());
    println!("  {:<10} {}", "From", join(&detail.from));
    println!("  {:<10} {}", "To", join(&detail.to));
    if !detail.cc.is_empty() {
        println!("  {:<10} {}", "Cc", join(&detail.cc));
    }
    if !detail.bcc.is_empty() {
        println!("  {:<10} {}", "Bcc", join(&detail.bcc));
    }
    println!(
        "  {:<10} {}",
        "Subject",
        detail.subject.as_deref().unwrap_or("(no subject)")
    );

    if !detail.sections.is_empty() {
        println!();
        println!("  Sections:");
        for (index, section) in detail.sections.iter().enumerate() {
            println!(
                "    {index:>3}  {:<28} {:<30} {}",
                section.media_type,
                section.file_name.as_deref().unwrap_or("-"),
                section.id.as_deref().unwrap_or("")
            );
        }
    }

    if let Some(ref text) = detail.text_body {
        println!();
        println!("{}", text.trim_end());
    } else if detail.html_body.is_some() {
        println!();
        println!("  (HTML body only, see `mailcatch section`)");
    }
    println!();
}
