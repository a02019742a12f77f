mod dedup;
mod detect;
mod display;
mod list;
mod matcher;
mod monitor;
mod normalize;
mod remote;
mod settings;


use std::io::{self, BufRead, IsTerminal};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;

use crate::cli::{Cli, Command, ConfigAction};
use crate::db::Database;
use crate::paths::database_file_path;

use self::display::{format_last_seen_display, split_release_text, truncate};
use self::monitor::{MatchSource, Session, StdoutNotifier};
use self::remote::{HttpRemote, ProfileCheck, check_profile};
use self::settings::{CHECK_INTERVAL_RANGE, SettingKey, Settings, is_valid_username};

pub fn run(cli: Cli) -> Result<()> {
    let mut db = open_db()?;
    let remote = HttpRemote::new();

    match cli.command {
        Some(Command::Check) | None => run_check(&mut db, &remote)?,
        Some(Command::Watch { interval }) => run_watch(&mut db, &remote, interval)?,
        Some(Command::Label { titles, no_search }) => {
            run_label(&mut db, &remote, titles, !no_search)?
        }
        Some(Command::Refresh) => run_refresh(&mut db, &remote)?,
        Some(Command::User { name }) => run_user(&db, &remote, &name)?,
        Some(Command::Config { action }) => run_config(&db, action)?,
        Some(Command::History { clear }) => run_history(&db, clear)?,
    }

    Ok(())
}

fn run_check(db: &mut Database, remote: &HttpRemote) -> Result<()> {
    let mut session = Session::new(db, remote)?;
    if session.settings().username.is_none() {
        println!("No username configured. Run `malwatch user <name>` first.");
        return Ok(());
    }
    if session.settings().active_monitor_url().is_none() {
        println!(
            "Monitoring is off. Set `monitor_url` and `monitor_enabled` with `malwatch config set`."
        );
        return Ok(());
    }

    let report = session.run_cycle(&StdoutNotifier);
    if report.releases.is_empty() {
        println!("No new episodes.");
    }
    Ok(())
}

fn run_watch(db: &mut Database, remote: &HttpRemote, interval: Option<u64>) -> Result<()> {
    if let Some(minutes) = interval
        && !CHECK_INTERVAL_RANGE.contains(&minutes)
    {
        bail!("--interval must be between 15 and 60 minutes, got {minutes}");
    }

    let mut session = Session::new(db, remote)?;
    loop {
        session.reload_settings();
        let minutes = interval.unwrap_or(session.settings().check_interval_minutes);
        let report = session.run_cycle(&StdoutNotifier);
        tracing::info!(
            new_releases = report.releases.len(),
            next_check_minutes = minutes,
            "waiting for next cycle"
        );
        thread::sleep(Duration::from_secs(minutes * 60));
    }
}

fn run_label(
    db: &mut Database,
    remote: &HttpRemote,
    titles: Vec<String>,
    use_search: bool,
) -> Result<()> {
    let titles = if titles.is_empty() {
        read_titles_from_stdin()?
    } else {
        titles
    };
    if titles.is_empty() {
        println!("No titles given.");
        return Ok(());
    }

    let mut session = Session::new(db, remote)?;
    let labels = session.label_titles(&titles, use_search, Utc::now().timestamp_millis())?;

    println!("{:<15} {:<45} {:<40}", "STATUS", "PAGE TITLE", "LIST TITLE");
    for label in labels {
        let (status, list_title) = match &label.entry {
            Some((entry, MatchSource::List)) => (entry.status.label(), entry.title.clone()),
            Some((entry, MatchSource::Search)) => {
                (entry.status.label(), format!("{} (via search)", entry.title))
            }
            None => ("-", String::new()),
        };
        println!(
            "{:<15} {:<45} {:<40}",
            status,
            truncate(&label.query, 45),
            truncate(&list_title, 40)
        );
    }
    Ok(())
}

fn read_titles_from_stdin() -> Result<Vec<String>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(Vec::new());
    }

    let mut titles = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read titles from stdin")?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            titles.push(trimmed.to_string());
        }
    }
    Ok(titles)
}

fn run_refresh(db: &mut Database, remote: &HttpRemote) -> Result<()> {
    let mut session = Session::new(db, remote)?;
    let index = session.refresh_list(Utc::now().timestamp_millis())?;
    if index.is_empty() {
        println!("List refreshed but it holds no usable titles.");
        return Ok(());
    }
    let watching = index.watching().count();
    println!(
        "List refreshed: {} titles ({} watching).",
        index.len(),
        watching
    );
    Ok(())
}

fn run_user(db: &Database, remote: &HttpRemote, name: &str) -> Result<()> {
    let name = name.trim();
    if !is_valid_username(name) {
        bail!("'{name}' is not a valid MyAnimeList username");
    }

    println!("Verifying...");
    let check = check_profile(remote, name);
    if check == ProfileCheck::Ok {
        db.set_setting(SettingKey::Username.as_str(), name)?;
        db.clear_list_cache()?;
    }
    println!("{}", check.message());
    Ok(())
}

fn run_config(db: &Database, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = Settings::load(db)?;
            for (key, value) in settings.display_rows() {
                println!("{:<24} {}", key, value);
            }
        }
        ConfigAction::Set { key, value } => {
            let key = SettingKey::parse(&key)?;
            let value = key.validate(&value)?;
            db.set_setting(key.as_str(), &value)?;
            if key == SettingKey::Username {
                db.clear_list_cache()?;
            }
            println!("Settings saved! {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            let key = SettingKey::parse(&key)?;
            db.clear_setting(key.as_str())?;
            println!("Settings saved! {key} reset to default");
        }
    }
    Ok(())
}

fn run_history(db: &Database, clear: bool) -> Result<()> {
    if clear {
        db.clear_notifications()?;
        println!("History cleared.");
        return Ok(());
    }

    let records = db.notifications()?;
    if records.is_empty() {
        println!("No notifications yet.");
        return Ok(());
    }

    println!("{:<45} {:<14} {:<28}", "TITLE", "EPISODE", "DATE");
    for record in records {
        let (title, episode) = split_release_text(&record.text);
        println!(
            "{:<45} {:<14} {:<28}",
            truncate(title, 45),
            episode.unwrap_or(""),
            format_last_seen_display(&record.created_at)
        );
    }
    Ok(())
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
