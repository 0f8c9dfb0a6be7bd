// src/main.rs - Replays a JSON-lines chat log through an enhanced in-memory widget

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::cell::RefCell;
use std::env;
use std::rc::Rc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use chatplus::observer::AppendHook;
use chatplus::prelude::*;

const HOST_MARKUP: &str = r#"<div id="message-cont"><div class="chat-header">Live chat</div><div id="message-list"></div></div>"#;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting chatplus v{}", chatplus::VERSION);

    let config = EnhancerConfig::from_env().await?;
    let selectors = ChatSelectors::from_config(&config.chat)?;
    let max_messages = config.chat.max_messages;

    let store = JsonFileStore::new(&config.storage.state_dir)?;
    let repository = StateRepository::new(Box::new(store), &config.storage.key);

    let providers = default_providers(&config.emotes);
    let fetch_emotes = config.emotes.enabled;
    let case_sensitive = config.emotes.case_sensitive;
    let startup = config.startup.clone();

    let mut enhancer = ChatEnhancer::new(config, repository);
    if fetch_emotes {
        let catalog = EmoteCatalog::fetch(&providers, case_sensitive).await;
        enhancer.set_catalog(catalog);
    } else {
        info!("Emotes disabled, skipping catalog fetch");
    }
    let enhancer = enhancer.into_shared();

    let dom = Rc::new(RefCell::new(Document::parse(HOST_MARKUP)));
    let mut probe = StartupProbe::new(&startup);
    let list = probe.wait(&*dom, &selectors).await?;

    let observer = MessageObserver::new(dom.clone(), enhancer.clone(), selectors, max_messages).into_shared();
    observer.borrow_mut().attach(list);
    let hook: Rc<dyn AppendHook> = observer.clone();

    let widget = ChatWidget::new(dom.clone(), list);
    let mut sink = install(widget, &enhancer, Some(hook));
    let commands = SettingsCommands::default();

    let mut lines = open_input().await?.lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read chat log")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if commands.is_command(line) {
            let reply = match enhancer.try_borrow_mut() {
                Ok(mut enhancer) => commands.process(&mut enhancer, line),
                Err(e) => {
                    warn!("Skipping command on line {}: {}", line_number, e);
                    continue;
                }
            };
            match reply {
                Some(reply) => {
                    info!("{}", reply.message);
                    if reply.blocked_changed {
                        observer.borrow_mut().sweep_blocked();
                    }
                }
                None => warn!("Unknown command on line {}: {}", line_number, line),
            }
            continue;
        }

        match serde_json::from_str::<MessageRecord>(line) {
            Ok(record) => sink.add_message(record),
            Err(e) => {
                error!("Skipping malformed record on line {}: {}", line_number, e);
                continue;
            }
        }

        // Stand-in for the host's animation frame.
        let mut frame = observer.borrow_mut();
        frame.deliver();
        if frame.frame_requested() {
            let report = frame.run_frame();
            if report.trimmed > 0 || report.faults > 0 {
                info!("Frame: {} trimmed, {} faults", report.trimmed, report.faults);
            }
        }
    }

    let html = dom.borrow().inner_html(list);
    println!("{}", html);

    let stats = enhancer.borrow().stats();
    info!(
        "Done: {} evaluated, {} suppressed, {} rendered, {} passed through, {} skipped",
        stats.evaluated, stats.suppressed, stats.rendered, stats.passed_through, stats.skipped
    );
    Ok(())
}

/// The chat log named on the command line, or stdin.
async fn open_input() -> Result<Box<dyn AsyncBufRead + Unpin>> {
    match env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open chat log {}", path))?;
            info!("Replaying chat log {}", path);
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}
