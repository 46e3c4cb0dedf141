use super::styled_event;
use anyhow::Result;
use console::{Term, style};
use dialoguer::Confirm;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mediaq::Config;
use mediaq::download::format::QualityPreset;
use mediaq::download::probe::run_probe;
use mediaq::download::progress::format_speed;
use mediaq::download::{
    Capabilities, DirectoryStatus, FormatMenu, ManagerError, MediaInfo, TaskId, TaskManager,
    TaskSnapshot, TaskState, YtDlpEngine,
};
use mediaq::logging::LogLevel;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::str::SplitWhitespace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long Ctrl-C or `quit` waits for paused transfers to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Pause(TaskId),
    Resume(TaskId),
    Cancel(TaskId),
    Remove(TaskId),
    Add { url: String, quality: Option<String> },
    List,
    Help,
    Quit,
}

fn parse_task_id(words: &mut SplitWhitespace<'_>, verb: &str) -> Result<TaskId, String> {
    words
        .next()
        .ok_or_else(|| format!("usage: {} N", verb))?
        .trim_start_matches('#')
        .parse()
        .map(TaskId)
        .map_err(|_| format!("usage: {} N (N is a task number)", verb))
}

fn parse_command(line: &str) -> Result<SessionCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };

    match verb.to_ascii_lowercase().as_str() {
        "pause" | "p" => parse_task_id(&mut words, "pause").map(SessionCommand::Pause),
        "resume" | "r" => parse_task_id(&mut words, "resume").map(SessionCommand::Resume),
        "cancel" | "c" => parse_task_id(&mut words, "cancel").map(SessionCommand::Cancel),
        "remove" | "rm" => parse_task_id(&mut words, "remove").map(SessionCommand::Remove),
        "add" | "a" => {
            let url = words
                .next()
                .ok_or_else(|| "usage: add URL [QUALITY]".to_string())?
                .to_string();
            let rest: Vec<&str> = words.collect();
            let quality = (!rest.is_empty()).then(|| rest.join(" "));
            Ok(SessionCommand::Add { url, quality })
        }
        "list" | "ls" => Ok(SessionCommand::List),
        "help" | "?" => Ok(SessionCommand::Help),
        "quit" | "q" | "exit" => Ok(SessionCommand::Quit),
        other => Err(format!("unknown command '{}', type 'help'", other)),
    }
}

/// Pick the preset for a quality name, or the menu default.
fn resolve_quality(menu: &FormatMenu, quality: Option<&str>) -> Result<QualityPreset, String> {
    let Some(name) = quality else {
        return Ok(menu.default_preset());
    };

    menu.find(name).ok_or_else(|| {
        if FormatMenu::is_known(name) {
            format!("'{}' needs FFmpeg to merge streams, which was not found", name)
        } else {
            format!("unknown quality '{}'", name)
        }
    })
}

fn spawn_stdin_reader(tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

fn new_task_bar(multi: &MultiProgress, snapshot: &TaskSnapshot) -> Result<ProgressBar> {
    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {msg}")?
            .progress_chars("#>-"),
    );
    bar.set_prefix(format!("#{} {}", snapshot.id, truncate(&snapshot.title, 32)));
    refresh_bar(&bar, snapshot);
    Ok(bar)
}

fn refresh_bar(bar: &ProgressBar, snapshot: &TaskSnapshot) {
    if bar.is_finished() {
        return;
    }

    bar.set_position(snapshot.progress.round().clamp(0.0, 100.0) as u64);
    let message = match (snapshot.state, &snapshot.error, snapshot.speed) {
        (TaskState::Error, Some(error), _) => {
            format!("{} {}", style(&snapshot.status).red(), error)
        }
        (TaskState::Finished, _, _) => style(&snapshot.status).green().to_string(),
        (_, _, Some(speed)) => format!("{}  {}", snapshot.status, format_speed(speed)),
        _ => snapshot.status.clone(),
    };

    if snapshot.state.is_terminal() {
        bar.abandon_with_message(message);
    } else {
        bar.set_message(message);
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn confirm_create(dir: &Path) -> bool {
    Confirm::new()
        .with_prompt(format!(
            "The download folder {} does not exist. Create it?",
            style(dir.display()).cyan()
        ))
        .default(true)
        .interact()
        .unwrap_or(false)
}

struct Session {
    manager: TaskManager,
    menu: FormatMenu,
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
    verbose: bool,
    /// Whether a folder that vanished mid-session may be recreated.
    create_dir: bool,
    pending_fetches: usize,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
}

type Fetched = (String, QualityPreset, Result<MediaInfo, ManagerError>);

impl Session {
    fn new(
        manager: TaskManager,
        menu: FormatMenu,
        verbose: bool,
        create_dir: bool,
        fetched_tx: mpsc::UnboundedSender<Fetched>,
    ) -> Self {
        Self {
            manager,
            menu,
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            verbose,
            create_dir,
            pending_fetches: 0,
            fetched_tx,
        }
    }

    fn println(&self, line: impl AsRef<str>) -> Result<()> {
        self.multi.println(line)?;
        Ok(())
    }

    fn flush_logs(&self) -> Result<()> {
        for event in self.manager.log_sink().drain_all() {
            if event.level == LogLevel::Debug && !self.verbose {
                continue;
            }
            self.multi.println(styled_event(&event))?;
        }
        Ok(())
    }

    fn refresh(&self) {
        for snapshot in self.manager.snapshots() {
            if let Some(bar) = self.bars.get(&snapshot.id) {
                refresh_bar(bar, &snapshot);
            }
        }
    }

    fn queue(&mut self, url: String, preset: QualityPreset) {
        let fetcher = self.manager.info_fetcher();
        let tx = self.fetched_tx.clone();
        self.pending_fetches += 1;

        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            let _ = tx.send((url, preset, result));
        });
    }

    fn on_fetched(
        &mut self,
        url: String,
        preset: QualityPreset,
        result: Result<MediaInfo, ManagerError>,
    ) -> Result<()> {
        self.pending_fetches = self.pending_fetches.saturating_sub(1);

        // Failures were already logged by the fetcher.
        let Ok(info) = result else { return Ok(()) };

        // Stdin belongs to the command reader, so there is no prompt here.
        let create_dir = self.create_dir;
        match self
            .manager
            .create_task(&url, preset.selector(), info, |_| create_dir)
        {
            Ok(id) => {
                if let Some(snapshot) = self.manager.snapshot(id) {
                    let bar = new_task_bar(&self.multi, &snapshot)?;
                    self.bars.insert(id, bar);
                }
            }
            Err(ManagerError::DirectoryDeclined(dir)) => self.println(format!(
                "{} Download folder {} is missing; not created without --yes",
                style("⚠️").yellow(),
                dir.display()
            ))?,
            Err(e) => self.println(format!("{} {}", style("❌").red(), e))?,
        }
        Ok(())
    }

    /// Returns false when the session should end.
    fn on_command(&mut self, line: &str) -> Result<bool> {
        if line.trim().is_empty() {
            return Ok(true);
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                self.println(format!("{} {}", style("❓").yellow(), e))?;
                return Ok(true);
            }
        };

        let outcome = match command {
            SessionCommand::Pause(id) => self.manager.pause(id),
            SessionCommand::Resume(id) => self.manager.resume(id),
            SessionCommand::Cancel(id) => self.manager.cancel(id),
            SessionCommand::Remove(id) => self.manager.remove(id).map(|_| {
                if let Some(bar) = self.bars.remove(&id) {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
            }),
            SessionCommand::Add { url, quality } => {
                match resolve_quality(&self.menu, quality.as_deref()) {
                    Ok(preset) => self.queue(url, preset),
                    Err(e) => self.println(format!("{} {}", style("❌").red(), e))?,
                }
                Ok(())
            }
            SessionCommand::List => {
                self.print_list()?;
                Ok(())
            }
            SessionCommand::Help => {
                self.println(HELP)?;
                Ok(())
            }
            SessionCommand::Quit => return Ok(false),
        };

        if let Err(e) = outcome {
            self.println(format!("{} {}", style("❌").red(), e))?;
        }
        self.refresh();
        Ok(true)
    }

    fn print_list(&self) -> Result<()> {
        let snapshots = self.manager.snapshots();
        if snapshots.is_empty() {
            return self.println("No downloads");
        }
        for s in snapshots {
            self.println(format!(
                "  #{:<3} {:<12} {:<40} {}",
                s.id,
                s.state,
                truncate(&s.title, 40),
                style(&s.url).dim()
            ))?;
        }
        Ok(())
    }

    /// Nothing left to watch.
    fn is_done(&self, stdin_open: bool) -> bool {
        if self.pending_fetches > 0 {
            return false;
        }
        let snapshots = self.manager.snapshots();
        let all_terminal = snapshots.iter().all(|s| s.state.is_terminal());
        all_terminal || (!stdin_open && !self.manager.has_active())
    }

    /// Pause whatever is running so partial files stay resumable.
    async fn wind_down(&mut self) -> Result<()> {
        let asked = self.manager.pause_all();
        if asked > 0 {
            self.println(format!(
                "{} Pausing {} download(s)...",
                style("⏸").yellow(),
                asked
            ))?;
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.manager.run_until_idle())
            .await
            .is_err()
        {
            self.println(format!(
                "{} Some transfers did not stop in time",
                style("⚠️").yellow()
            ))?;
        }

        self.refresh();
        self.flush_logs()
    }
}

const HELP: &str = "Commands: pause N | resume N | cancel N | remove N | add URL [QUALITY] | list | quit";

pub async fn handle_download(
    config: Config,
    capabilities: &Capabilities,
    urls: Vec<String>,
    quality: Option<String>,
    yes: bool,
    verbose: bool,
) -> Result<()> {
    let term = Term::stdout();
    let engine = Arc::new(YtDlpEngine::from_capabilities(capabilities)?);
    let menu = FormatMenu::new(capabilities);
    let manager = TaskManager::new(engine, config.clone());

    if !capabilities.can_merge() {
        term.write_line(&format!(
            "{} FFmpeg was not found. High quality formats that merge separate video and audio are disabled.",
            style("⚠️").yellow()
        ))?;
    }

    let preset = match resolve_quality(&menu, quality.as_deref()) {
        Ok(preset) => preset,
        Err(e) => {
            let fallback = menu.default_preset();
            term.write_line(&format!(
                "{} {}; using {}",
                style("⚠️").yellow(),
                e,
                fallback.label
            ))?;
            fallback
        }
    };

    match manager.check_output_dir(|dir| yes || confirm_create(dir))? {
        DirectoryStatus::Declined => {
            term.write_line(&format!(
                "{} Download folder was not created, nothing to do",
                style("ℹ️").cyan()
            ))?;
            return Ok(());
        }
        DirectoryStatus::Exists | DirectoryStatus::Created => {}
    }

    term.write_line(&format!(
        "{} Downloading to {} as {}",
        style("⬇️").cyan(),
        style(&config.general.download_dir).cyan(),
        style(preset.label).green()
    ))?;
    term.write_line(&format!("{} {}", style("💡").yellow(), HELP))?;

    if config.general.check_connectivity {
        tokio::spawn(run_probe(
            config.general.connectivity_url.clone(),
            manager.options().proxy(&config),
            Arc::clone(manager.log_sink()),
        ));
    }

    let (fetched_tx, mut fetched_rx) = mpsc::unbounded_channel();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(line_tx);

    let mut session = Session::new(manager, menu, verbose, yes, fetched_tx);

    for url in urls {
        session.queue(url, preset);
    }

    let mut tick = tokio::time::interval(Duration::from_millis(config.general.log_poll_interval_ms));
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                session.manager.process_updates();
                session.flush_logs()?;
                session.refresh();
                if session.is_done(stdin_open) {
                    break;
                }
            }
            Some((url, preset, result)) = fetched_rx.recv() => {
                session.on_fetched(url, preset, result)?;
            }
            line = line_rx.recv(), if stdin_open => match line {
                Some(line) => {
                    if !session.on_command(&line)? {
                        session.wind_down().await?;
                        break;
                    }
                }
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                session.println(format!("{} Interrupted", style("⏹").yellow()))?;
                session.wind_down().await?;
                break;
            }
        }
    }

    session.manager.process_updates();
    session.flush_logs()?;
    session.refresh();

    let snapshots = session.manager.snapshots();
    let finished = snapshots
        .iter()
        .filter(|s| s.state == TaskState::Finished)
        .count();
    term.write_line(&format!(
        "{} {}/{} download(s) completed",
        style("✅").green(),
        finished,
        snapshots.len()
    ))?;

    Ok(())
}
