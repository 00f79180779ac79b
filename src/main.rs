//! # TaskRelay CLI
//!
//! Submits content to configured webhook workflows and long-polls their
//! task status until a result arrives.
//!
//! Usage:
//!   taskrelay init                           # Write ~/.taskrelay/config.toml
//!   taskrelay flows                          # List configured flows
//!   taskrelay submit title "cats"            # Submit and wait for the result
//!   taskrelay submit content "..." --no-wait # Submit, resume later
//!   taskrelay resume content                 # Re-attach to the cached task
//!   taskrelay status title abc123            # One status check
//!   taskrelay cache clear                    # Drop cached tasks and results

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use taskrelay_client::{
    FlowStart, NotificationCenter, NotifyLevel, SnapshotStore, TaskFlow, TaskHandle, ViewModel,
};
use taskrelay_core::TaskRelayConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "taskrelay",
    version,
    about = "📮 TaskRelay: submit to webhook workflows and poll until done"
)]
struct Cli {
    /// Config file (default: ~/.taskrelay/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with the default flows
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Submit content to a flow and wait for its result
    Submit {
        flow: String,
        content: String,
        /// Return as soon as the task is accepted
        #[arg(long)]
        no_wait: bool,
    },
    /// Resume polling the task cached for a flow
    Resume { flow: String },
    /// Check a task's status once
    Status { flow: String, task_id: String },
    /// List configured flows
    Flows,
    /// Manage the snapshot cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cached keys
    List,
    /// Remove every cached task and result
    Clear,
}

struct App {
    config: TaskRelayConfig,
    store: Option<SnapshotStore>,
    notifications: NotificationCenter,
}

impl App {
    fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let p = expand_path(p);
                TaskRelayConfig::load_from(&p)
                    .with_context(|| format!("loading {}", p.display()))?
            }
            None => TaskRelayConfig::load().context("loading default config")?,
        };
        config.validate()?;
        let store = config
            .store
            .enabled
            .then(|| SnapshotStore::new(&config.store.resolved_dir()));
        tracing::debug!(
            "Loaded {} flow(s), cache {}",
            config.flows.len(),
            store
                .as_ref()
                .map(|s| s.dir().display().to_string())
                .unwrap_or_else(|| "disabled".into())
        );
        Ok(Self {
            config,
            store,
            notifications: NotificationCenter::new(),
        })
    }

    fn flow(&self, name: &str) -> Result<TaskFlow> {
        let Some(flow_cfg) = self.config.flow(name) else {
            let known: Vec<&str> = self.config.flows.iter().map(|f| f.name.as_str()).collect();
            bail!("unknown flow '{name}' (configured: {})", known.join(", "));
        };
        let mut builder = TaskFlow::builder_from_config(flow_cfg, &self.config.poller)
            .notifications(self.notifications.clone());
        if let Some(store) = &self.store {
            builder = builder.store(store.clone());
        }
        Ok(builder.build()?)
    }

    fn result_max_age(&self) -> Duration {
        Duration::from_secs(self.config.store.result_max_age_secs)
    }

    /// Dismiss pending notifications and return the lines to show. A failed
    /// command's error already carries the same message, so nothing is
    /// returned for it.
    fn drain_notifications(&self, command_failed: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for n in self.notifications.active() {
            self.notifications.dismiss(n.id);
            if command_failed {
                continue;
            }
            let icon = match n.level {
                NotifyLevel::Success => "✅",
                NotifyLevel::Info => "ℹ️",
                NotifyLevel::Warning => "⚠️",
                NotifyLevel::Error => "❌",
            };
            lines.push(format!("{icon} {}: {}", n.title, n.message));
        }
        lines
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "taskrelay=debug,taskrelay_client=debug,taskrelay_core=debug"
    } else {
        "taskrelay=info,taskrelay_client=info,taskrelay_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::Init { force } = cli.command {
        return init(cli.config.as_deref(), force);
    }

    let app = App::load(cli.config.as_deref())?;

    let outcome = match cli.command {
        // Handled before the config is loaded.
        Command::Init { .. } => Ok(()),
        Command::Submit {
            flow,
            content,
            no_wait,
        } => submit(&app, &flow, &content, no_wait).await,
        Command::Resume { flow } => resume(&app, &flow).await,
        Command::Status { flow, task_id } => status(&app, &flow, &task_id).await,
        Command::Flows => {
            list_flows(&app);
            Ok(())
        }
        Command::Cache { action } => cache(&app, action),
    };

    for line in app.drain_notifications(outcome.is_err()) {
        eprintln!("{line}");
    }
    outcome
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).as_ref())
}

fn init(path: Option<&str>, force: bool) -> Result<()> {
    let target = path.map(expand_path).unwrap_or_else(TaskRelayConfig::default_path);
    if target.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", target.display());
    }
    let config = TaskRelayConfig::default();
    match path {
        Some(_) => config.save_to(&target)?,
        None => config.save()?,
    }
    println!(
        "📝 Wrote {} default flow(s) to {}",
        config.flows.len(),
        target.display()
    );
    Ok(())
}

async fn submit(app: &App, name: &str, content: &str, no_wait: bool) -> Result<()> {
    let flow = app.flow(name)?;
    match flow.start(content).await? {
        FlowStart::Completed(view) => {
            print_view(&view);
            Ok(())
        }
        FlowStart::Polling(handle) => {
            println!("⏳ Task {} accepted by '{name}'", handle.task_id());
            if no_wait {
                let task = handle.detach();
                if app.store.is_some() {
                    println!("   Resume later with: taskrelay resume {name}");
                } else {
                    println!("   Cache disabled; check later with: taskrelay status {name} {}", task.task_id);
                }
                return Ok(());
            }
            wait_and_print(&flow, handle).await
        }
    }
}

async fn resume(app: &App, name: &str) -> Result<()> {
    let flow = app.flow(name)?;
    if app.store.is_none() {
        bail!("the snapshot cache is disabled in config; nothing to resume");
    }
    match flow.recover()? {
        Some(handle) => {
            println!("🔄 Resuming task {} for '{name}'", handle.task_id());
            wait_and_print(&flow, handle).await
        }
        None => match flow.cached_result(Some(app.result_max_age())) {
            Some(view) => {
                println!("📦 No task in flight; last cached result:");
                print_view(&view);
                Ok(())
            }
            None => bail!("no task in flight for '{name}'"),
        },
    }
}

async fn status(app: &App, name: &str, task_id: &str) -> Result<()> {
    let flow = app.flow(name)?;
    let poll = flow.check_status(task_id).await?;
    println!("Task {task_id}: {}", poll.status);
    if let Some(d) = poll.duration {
        println!("Duration: {d}s");
    }
    if let Some(err) = &poll.error {
        println!("Error: {err}");
    }
    if let Some(result) = &poll.result {
        print_view(&flow.project(result));
    }
    Ok(())
}

fn list_flows(app: &App) {
    println!("📋 {} flow(s)", app.config.flows.len());
    for f in &app.config.flows {
        let timing = taskrelay_client::PollTiming::from_config(&app.config.poller, Some(f));
        println!(
            "  {:<14} POST {}  field='{}'  first check {}s, every {}s, up to {} checks",
            f.name,
            f.webhook_url,
            f.payload_field,
            timing.initial_delay.as_secs(),
            timing.interval.as_secs(),
            timing.max_attempts
        );
    }
}

fn cache(app: &App, action: CacheAction) -> Result<()> {
    let Some(store) = &app.store else {
        bail!("the snapshot cache is disabled in config");
    };
    match action {
        CacheAction::List => {
            for key in store.keys() {
                println!("{key}");
            }
        }
        CacheAction::Clear => {
            let n = store.clear();
            println!("🧹 Removed {n} cached entr{}", if n == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

/// Wait for `handle`, printing progress changes. Ctrl-C cancels.
async fn wait_and_print(flow: &TaskFlow, handle: TaskHandle) -> Result<()> {
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut progress = handle.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            println!("   [{:>3}%] {}", p.percent, p.state);
            if p.state.is_terminal() {
                break;
            }
        }
    });

    let task_id = handle.task_id().to_string();
    let outcome = handle.wait().await;
    printer.abort();

    let result = outcome.with_context(|| format!("task {task_id}"))?;
    print_view(&flow.project(&result));
    Ok(())
}

fn print_view(view: &ViewModel) {
    println!();
    if let Some(title) = &view.title {
        println!("# {title}");
        println!();
    }
    if !view.body.is_empty() {
        println!("{}", view.body);
    }
}
