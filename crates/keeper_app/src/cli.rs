use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use keeper_core::{
    view::{SortDirection, SortKey, SortOrder},
    wish::WishGenerator,
    Category, ExportFormat, RecordDraft, RecordId, TypeFilter,
};

use crate::app::{AppConfig, KeeperController, DELETE_CONFIRM_MESSAGE, DELETE_CONFIRM_TITLE};

#[derive(Debug, Parser)]
#[command(
    name = "keeper",
    version,
    about = "Track birthdays, anniversaries and other yearly dates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show records, most urgent first
    List(ListArgs),
    /// Add a record
    Add(AddArgs),
    /// Change fields of an existing record
    Edit(EditArgs),
    /// Delete a record after confirmation
    Remove {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Write all records to a CSV or TXT file
    Export {
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,
        /// Target directory, defaults to KEEPER_EXPORT_DIR
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Draft a greeting for a record
    Wish { id: String },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum SortArg {
    #[default]
    Days,
    Title,
    Date,
}

#[derive(Debug, Default, Args)]
pub struct ListArgs {
    /// Case-insensitive title filter
    #[arg(short, long, default_value = "")]
    pub search: String,
    /// all|birthday|anniversary|other
    #[arg(short = 't', long = "type", default_value = "all")]
    pub filter: TypeFilter,
    #[arg(long, value_enum, default_value_t = SortArg::Days)]
    pub sort: SortArg,
    #[arg(long)]
    pub desc: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub title: String,
    /// YYYY-MM-DD
    #[arg(long)]
    pub date: String,
    #[arg(short = 't', long = "type", default_value = "birthday")]
    pub category: Category,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub date: Option<String>,
    #[arg(short = 't', long = "type")]
    pub category: Option<Category>,
    /// Pass an empty string to clear
    #[arg(long)]
    pub notes: Option<String>,
}

impl SortArg {
    fn key(self) -> SortKey {
        match self {
            SortArg::Days => SortKey::DaysUntil,
            SortArg::Title => SortKey::Title,
            SortArg::Date => SortKey::Date,
        }
    }
}

/// Entry point used by the binary: opens the configured store and runs one
/// command against it.
pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let generator = config.wish_client();
    let mut controller = KeeperController::new(config);
    controller.initialize()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut confirm = prompt_on_stdin;
    let command = cli.command.unwrap_or(Command::List(ListArgs::default()));
    dispatch(&mut controller, command, &mut out, &mut confirm, &generator).await
}

/// Runs `command`. `confirm` answers the delete confirmation question.
pub async fn dispatch(
    controller: &mut KeeperController,
    command: Command,
    out: &mut dyn Write,
    confirm: &mut dyn FnMut(&str) -> Result<bool>,
    generator: &dyn WishGenerator,
) -> Result<()> {
    match command {
        Command::List(args) => {
            controller.set_search(args.search);
            controller.set_filter(args.filter);
            let direction = if args.desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            controller.set_sort(SortOrder {
                key: args.sort.key(),
                direction,
            });
            write!(out, "{}", controller.render())?;
        }
        Command::Add(args) => {
            controller.open_new_form();
            controller.update_form(|draft| {
                draft.title = args.title;
                draft.date = args.date;
                draft.category = args.category;
                draft.notes = args.notes.unwrap_or_default();
            });
            let id = controller.submit_form()?;
            writeln!(out, "{} ({id})", controller.status())?;
        }
        Command::Edit(args) => {
            let id = RecordId::new(args.id);
            controller.open_edit_form(&id)?;
            controller.update_form(|draft| {
                apply_edits(draft, args.title, args.date, args.category, args.notes)
            });
            if !controller.form().map(|form| form.is_dirty()).unwrap_or(false) {
                controller.cancel_form();
                writeln!(out, "没有修改")?;
                return Ok(());
            }
            controller.submit_form()?;
            writeln!(out, "{}", controller.status())?;
        }
        Command::Remove { id, yes } => {
            let id = RecordId::new(id);
            let title = controller.request_delete(&id)?.title().to_string();
            let question = format!("{DELETE_CONFIRM_TITLE}: 「{title}」 {DELETE_CONFIRM_MESSAGE}");
            if yes || confirm(&question)? {
                controller.confirm_delete()?;
                writeln!(out, "{}", controller.status())?;
            } else {
                controller.cancel_delete();
                writeln!(out, "已取消")?;
            }
        }
        Command::Export { format, out: dir } => {
            let path = match dir {
                Some(dir) => controller.export_to(dir, format)?,
                None => controller.export(format)?,
            };
            writeln!(out, "{}", path.display())?;
        }
        Command::Wish { id } => {
            let outcome = controller.draft_wish(generator, &RecordId::new(id)).await?;
            writeln!(out, "{}", outcome.text())?;
        }
    }
    Ok(())
}

fn apply_edits(
    draft: &mut RecordDraft,
    title: Option<String>,
    date: Option<String>,
    category: Option<Category>,
    notes: Option<String>,
) {
    if let Some(title) = title {
        draft.title = title;
    }
    if let Some(date) = date {
        draft.date = date;
    }
    if let Some(category) = category {
        draft.category = category;
    }
    if let Some(notes) = notes {
        draft.notes = notes;
    }
}

fn prompt_on_stdin(question: &str) -> Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{question} [y/N] ")?;
    stderr.flush()?;
    let mut answer = String::new();
    let read = io::stdin().lock().read_line(&mut answer)?;
    if read == 0 {
        return Err(anyhow!("no confirmation received"));
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
