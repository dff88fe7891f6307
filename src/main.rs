use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use eyre::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tasklist::{
    Backend, Config, FilterMode, Palette, StateView, Storage, TaskId, TaskListStore, Theme, ThemePreference, open_storage,
};
use tracing::{Level, debug};

#[derive(Parser)]
#[command(name = "tasklist")]
#[command(about = "Todo list with filtering, reordering and persistent storage")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the config file (default: <config dir>/tasklist/tasklist.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the store (overrides the config file)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    /// Storage backend: memory, file or sqlite (overrides the config file)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Task(TaskCommand),

    /// Show or change the theme
    Theme {
        #[command(subcommand)]
        action: Option<ThemeAction>,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a task
    Add {
        #[arg(required = true)]
        title: Vec<String>,
    },

    /// Show tasks
    List {
        /// Filter to show (default: the store's current filter)
        #[arg(short, long)]
        filter: Option<FilterMode>,
    },

    /// Flip a task between active and completed
    Toggle { id: TaskId },

    /// Delete a task
    Remove {
        id: TaskId,

        /// Mark the task first and remove it once the removal delay has passed
        #[arg(long)]
        deferred: bool,
    },

    /// Delete all completed tasks
    ClearCompleted,

    /// Move a task within the (filtered) list
    Move {
        from: usize,
        to: usize,

        /// Filter whose positions `from` and `to` refer to
        #[arg(short, long)]
        filter: Option<FilterMode>,
    },

    /// Set the current filter
    Filter { mode: FilterMode },

    /// Print the number of active tasks
    Remaining,
}

#[derive(Subcommand)]
enum ThemeAction {
    /// Print the theme and its palette
    Show,
    /// Switch between light and dark
    Toggle,
    /// Pick a theme
    Set { theme: Theme },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let mut config = match cli.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(path) = cli.store_path.clone() {
        config.store_path = Some(path);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let store_path = config.resolved_store_path();
    debug!(path = ?store_path, backend = %config.backend, "Resolved store");
    let storage = open_storage(config.backend, &store_path)
        .with_context(|| format!("Failed to open {} storage at {}", config.backend, store_path.display()))?;

    match cli.command {
        Commands::Theme { action } => run_theme(storage, &config, action.unwrap_or(ThemeAction::Show)),
        Commands::Task(command) => run_task(storage, &config, command),
    }
}

fn run_task(storage: Box<dyn Storage>, config: &Config, command: TaskCommand) -> Result<()> {
    let mut store = TaskListStore::open(storage, config.store_options())?;
    store.subscribe(|change, view| {
        debug!(?change, remaining = view.items_remaining_count(), "Store changed");
    });

    match command {
        TaskCommand::Add { title } => match store.add(&title.join(" "))? {
            Some(id) => println!("Added task {}", id),
            None => println!("Ignored empty title"),
        },
        TaskCommand::List { filter } => {
            let mode = filter.unwrap_or(store.filter());
            let theme = ThemePreference::load(store.storage(), config.default_theme)?.theme();
            render(&store.view(), mode, theme.palette());
        }
        TaskCommand::Toggle { id } => {
            if store.toggle_completed(id)? {
                let state = match store.get(id) {
                    Some(task) if task.is_completed => "completed",
                    _ => "active",
                };
                println!("Task {} is now {}", id, state);
            } else {
                println!("No task with id {}", id);
            }
        }
        TaskCommand::Remove { id, deferred: false } => {
            if store.remove(id)? {
                println!("Removed task {}", id);
            } else {
                println!("No task with id {}", id);
            }
        }
        TaskCommand::Remove { id, deferred: true } => {
            if store.mark_pending_removal(id).is_none() {
                println!("No task with id {}", id);
                return Ok(());
            }
            println!("Removing task {} in {} ms...", id, config.removal_delay_ms);
            std::thread::sleep(store.options().removal_delay);
            for removed in store.commit_due(Instant::now())? {
                println!("Removed task {}", removed);
            }
        }
        TaskCommand::ClearCompleted => {
            let count = store.clear_completed()?;
            println!("Cleared {} completed task{}", count, if count == 1 { "" } else { "s" });
        }
        TaskCommand::Move { from, to, filter } => {
            if let Some(mode) = filter {
                store.set_filter(mode)?;
            }
            if store.reorder(from, to)? {
                println!("Moved {} -> {} in {} view", from, to, store.filter());
            } else {
                println!("Nothing to move");
            }
        }
        TaskCommand::Filter { mode } => {
            store.set_filter(mode)?;
            if store.options().persist_filter {
                println!("Filter set to {}", mode);
            } else {
                println!("Filter set to {} (not persisted; enable persist_filter in the config)", mode);
            }
        }
        TaskCommand::Remaining => println!("{}", store.items_remaining_count()),
    }

    Ok(())
}

fn run_theme(mut storage: Box<dyn Storage>, config: &Config, action: ThemeAction) -> Result<()> {
    let mut pref = ThemePreference::load(&storage, config.default_theme)?;

    match action {
        ThemeAction::Show => {}
        ThemeAction::Toggle => {
            pref.toggle(&mut storage)?;
        }
        ThemeAction::Set { theme } => pref.set(&mut storage, theme)?,
    }

    let theme = pref.theme();
    println!("Theme: {}", theme);
    print_palette(theme.palette());
    Ok(())
}

fn paint(text: &str, hex: &str) -> ColoredString {
    match tasklist::theme::hex_to_rgb(hex) {
        Some((r, g, b)) => text.truecolor(r, g, b),
        None => text.normal(),
    }
}

fn print_palette(palette: &Palette) {
    let rows = [
        ("background", palette.background),
        ("check circle", palette.check_circle),
        ("item background", palette.item_background),
        ("item text", palette.item_text),
        ("placeholder", palette.placeholder_text),
        ("footer", palette.footer_text),
    ];
    for (name, hex) in rows {
        println!("  {} {:<16} {}", paint("██", hex), name, hex);
    }
    println!("  {:<19} {}", "background image", palette.background_image);
}

/// Draw the list as seen through `mode`, the remaining count and the filter bar
fn render(view: &StateView<'_>, mode: FilterMode, palette: &Palette) {
    let tasks = view.filtered_by(mode);

    if tasks.is_empty() {
        println!("{}", paint("Nothing here. Create a new todo...", palette.placeholder_text).italic());
    }

    for task in tasks {
        let check = if task.is_completed { "[x]" } else { "[ ]" };
        let title = if task.is_completed {
            paint(&task.title, palette.placeholder_text).strikethrough()
        } else {
            paint(&task.title, palette.item_text)
        };
        let pending = if view.is_pending_removal(task.id) { " (removing)" } else { "" };
        println!(
            "{} {} {}{}",
            paint(check, palette.check_circle),
            paint(&format!("{:>3}", task.id.0), palette.footer_text),
            title,
            pending
        );
    }

    let remaining = view.items_remaining_count();
    let filters: Vec<String> = FilterMode::ALL
        .iter()
        .map(|m| {
            if *m == mode {
                m.as_str().bold().underline().to_string()
            } else {
                paint(m.as_str(), palette.footer_text).to_string()
            }
        })
        .collect();

    println!();
    println!(
        "{}   {}",
        paint(
            &format!("{} item{} left", remaining, if remaining == 1 { "" } else { "s" }),
            palette.footer_text
        ),
        filters.join("  ")
    );
}
