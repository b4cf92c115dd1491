//! agentherd - orchestrator for fleets of long-running coding agents
//!
//! Headless CLI entry point: wires config, controller, and scheduler, runs
//! one command to completion while streaming events to the log, and tears
//! everything down on ctrl-c.

use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tracing::info;

use agentherd::agent::{AgentCommandConfig, CommandLauncher};
use agentherd::cli::{Cli, Command};
use agentherd::config::Config;
use agentherd::controller::Controller;
use agentherd::coordinators::{RalphPhase, UltraPlanPhase};
use agentherd::events::Event;
use agentherd::scheduler::Scheduler;
use agentherd::worktree::provider_for;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Arc::new(Config::load(cli.config.as_ref())?);
    let launcher = Arc::new(CommandLauncher::new(AgentCommandConfig {
        command: config.agent.command.clone(),
        args: config.agent.args.clone(),
    }));
    let worktrees = provider_for(
        &config.worktree.repo_root,
        &config.worktree.base_dir,
        &config.worktree.branch_prefix,
    );

    let controller = Controller::new(config.clone(), launcher, worktrees);
    let scheduler = Scheduler::new(controller.session(), controller.registry(), config.scheduler.tick());
    let scheduler_cancel = scheduler.cancel_token();
    let scheduler_task = tokio::spawn(scheduler.run());

    let outcome = run_command(&controller, cli.command).await;

    controller.stop_all().await;
    scheduler_cancel.cancel();
    let _ = scheduler_task.await;
    outcome
}

/// Run one CLI command to a terminal state, logging events as they stream
async fn run_command(controller: &Controller, command: Command) -> Result<()> {
    let mut events = controller.bus().subscribe();

    match command {
        Command::Run { task } => {
            let id = controller.add_task(&task);
            info!(id = %id, "running task");
            wait_with_events(&mut events, || {
                controller
                    .session()
                    .instance(&id)
                    .map(|i| i.status().is_terminal())
                    // Setup failure removes the instance; that also ends the run
                    .unwrap_or(true)
            })
            .await;
            println!("{}", controller.output(&id));
        }

        Command::Ralph {
            task,
            promise,
            max_iterations,
        } => {
            let group_id = controller.start_ralph(&task, max_iterations, &promise)?;
            info!(group_id = %group_id, "ralph session started");
            let registry = controller.registry();
            wait_with_events(&mut events, || {
                registry
                    .ralph(&group_id)
                    .map(|c| c.phase_blocking().is_terminal())
                    .unwrap_or(true)
            })
            .await;
            if let Some(coordinator) = registry.ralph(&group_id) {
                let phase = coordinator.phase().await;
                info!(phase = phase.as_str(), "ralph session finished");
                if phase != RalphPhase::Complete {
                    eyre::bail!("ralph session ended {}", phase.as_str());
                }
            }
        }

        Command::Adversarial { task, max_rounds } => {
            let group_id = controller.start_adversarial(&task, max_rounds)?;
            info!(group_id = %group_id, "adversarial session started");
            let registry = controller.registry();
            wait_with_events(&mut events, || {
                registry
                    .adversarial(&group_id)
                    .map(|c| c.phase_blocking().is_terminal())
                    .unwrap_or(true)
            })
            .await;
            if let Some(coordinator) = registry.adversarial(&group_id) {
                if let Some(score) = coordinator.last_score().await {
                    info!(score, "final review score");
                }
                if let Some(err) = coordinator.last_error().await {
                    eyre::bail!("adversarial session failed: {err}");
                }
            }
        }

        Command::Plan { task } => {
            let group_id = controller.start_ultra_plan(&task)?;
            info!(group_id = %group_id, "ultra-plan session started");
            let registry = controller.registry();
            loop {
                let Some(coordinator) = registry.ultraplan() else { break };
                match coordinator.phase().await {
                    UltraPlanPhase::PlanReview => {
                        // Headless mode approves the parsed plan directly
                        match controller.approve_plan().await {
                            Ok(()) => info!("plan approved"),
                            Err(e) => eyre::bail!("plan not executable: {e}"),
                        }
                    }
                    phase if phase.is_terminal() => {
                        info!(phase = phase.as_str(), "ultra-plan session finished");
                        if phase != UltraPlanPhase::Complete {
                            eyre::bail!("plan ended {}", phase.as_str());
                        }
                        break;
                    }
                    _ => {}
                }
                drain_events(&mut events);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }

    Ok(())
}

/// Poll a terminal condition while logging every event that streams past
async fn wait_with_events<F: Fn() -> bool>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    done: F,
) {
    loop {
        if done() {
            drain_events(events);
            return;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            event = events.recv() => {
                if let Ok(event) = event {
                    log_event(&event);
                }
            }
        }
    }
}

fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) {
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }
}

fn log_event(event: &Event) {
    match event {
        // Output is visible through the buffers; logging it would double it
        Event::InstanceOutput { .. } => {}
        other => info!(
            event = other.event_type(),
            subject = other.subject_id().unwrap_or("-"),
            "event"
        ),
    }
}
