//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::TrainArgs;
use crate::demo::{GlyphSampler, SoftmaxFactory};
use crate::store::FileModelStore;
use glyphtrain_core::config::workspace_config_path;
use glyphtrain_core::result_sink::accuracy_label;
use glyphtrain_core::{
    CharacterSet, FontSelection, OutcomeReason, ReportingContext, ReportingView, SupervisorHandle,
    ToggleAction, TrainerConfig, TrainerError,
};
use std::path::Path;
use std::sync::Arc;

/// 128 + SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, workspace).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

async fn handle_train(args: TrainArgs, workspace: &Path) -> anyhow::Result<()> {
    let mut config = glyphtrain_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    if let Some(max) = args.max_iterations {
        config.policy.max_iterations = Some(max);
    }

    // "Add All Fonts" over the fonts named on the command line.
    let mut selection = FontSelection::new(args.fonts.iter().cloned());
    selection.toggle_all();
    let fonts = selection.snapshot();
    let characters = CharacterSet::from_text(&args.characters);

    let sampler = GlyphSampler::new(config.network.inputs, args.seed);
    let save_path = args
        .save
        .clone()
        .unwrap_or_else(|| workspace.join(".glyphtrain").join("model.json"));
    let store = FileModelStore::new(save_path);
    let save_display = store.path().display().to_string();

    let (handle, task) =
        ReportingContext::new(config, Arc::new(SoftmaxFactory::new(args.seed)))
            .with_store(Arc::new(store))
            .spawn();

    if let ToggleAction::Started(job_id) = handle.toggle(fonts.clone(), characters.clone()).await? {
        println!(
            "Training {} character(s) across {} font(s), job {}. Press Ctrl-C to stop.",
            characters.len(),
            fonts.len(),
            job_id
        );
    }

    let interrupt = spawn_interrupt_listener(handle.clone());
    let view = handle.wait_until_settled().await?;
    print_outcome(&view);

    if let Some(per_character) = args.evaluate {
        let held_out = sampler.held_out(&fonts, &characters, per_character);
        handle.evaluate(held_out).await?;
        let view = handle.wait_until_settled().await?;
        match (view.accuracy, view.accuracy_label) {
            (Some(accuracy), _) => println!("{}", accuracy_label(accuracy)),
            (None, Some(label)) => println!("{label}"),
            (None, None) => println!("Evaluation produced no result"),
        }
    }

    if args.save.is_some() {
        let before = handle.view().saves;
        handle.save().await?;
        let view = handle.wait_until_settled().await?;
        if view.saves > before {
            println!("Saved model to {}", save_display);
        } else {
            let reason = view.last_error.unwrap_or_else(|| "unknown error".into());
            anyhow::bail!("Failed to save model: {}", reason);
        }
    }

    handle.shutdown().await?;
    task.await?;
    interrupt.abort();
    Ok(())
}

/// What a Ctrl-C does, given the result of asking the supervisor to cancel.
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// A running job was told to stop; keep listening.
    Stopping,
    /// Nothing to stop cooperatively: exit as an unhandled Ctrl-C would.
    Exit,
}

fn on_interrupt(cancelled: Result<bool, TrainerError>) -> InterruptAction {
    match cancelled {
        Ok(true) => {
            tracing::info!("Interrupt received, stopping training");
            InterruptAction::Stopping
        }
        Ok(false) => {
            tracing::info!("Interrupt received with no training to stop, exiting");
            InterruptAction::Exit
        }
        Err(e) => {
            tracing::debug!(error = %e, "Interrupt received after the reporting context closed");
            InterruptAction::Exit
        }
    }
}

/// Listen for Ctrl-C for the whole session. Installing the listener replaces
/// the default handler, so every phase must be able to end the process.
fn spawn_interrupt_listener(handle: SupervisorHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if on_interrupt(handle.cancel().await) == InterruptAction::Exit {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        }
    })
}

fn print_outcome(view: &ReportingView) {
    let Some(outcome) = &view.last_outcome else {
        return;
    };
    let reason = match &outcome.reason {
        OutcomeReason::UserCancelled => "stopped by user".to_string(),
        OutcomeReason::Diverged => "stopped: error diverged from its best".to_string(),
        OutcomeReason::Completed => "completed".to_string(),
        OutcomeReason::Failed(message) => format!("failed: {message}"),
    };
    println!("Training {} after {} iteration(s)", reason, outcome.iterations);
    if let Some(best) = outcome.best_error {
        println!("  best error: {best:.4}");
    }
    if let Some(last) = outcome.last_error {
        println!("  last error: {last:.4}");
    }
    println!("  [{}]", view.start_button);
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&TrainerConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = glyphtrain_core::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn train_args(save: Option<std::path::PathBuf>) -> TrainArgs {
        TrainArgs {
            fonts: vec!["Helvetica".into(), ".Hidden".into(), "Courier".into()],
            characters: "abca".into(),
            max_iterations: Some(25),
            evaluate: Some(2),
            save,
            seed: 11,
        }
    }

    #[test]
    fn test_interrupt_stops_running_training() {
        assert_eq!(on_interrupt(Ok(true)), InterruptAction::Stopping);
    }

    #[test]
    fn test_interrupt_exits_when_nothing_to_cancel() {
        assert_eq!(on_interrupt(Ok(false)), InterruptAction::Exit);
        assert_eq!(
            on_interrupt(Err(TrainerError::ReportingClosed)),
            InterruptAction::Exit
        );
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".glyphtrain").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: TrainerConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, TrainerConfig::default());
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace.join(".glyphtrain").join("config.toml");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, "[policy]\npatience = 10\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content, "[policy]\npatience = 10\n");
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_train_evaluates_and_saves() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("out").join("model.json");

        let command = Commands::Train(train_args(Some(model_path.clone())));
        handle_command(command, dir.path()).await.unwrap();

        let bytes = std::fs::read(&model_path).unwrap();
        let saved: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(saved["characters"], "abc");
    }

    #[tokio::test]
    async fn test_train_without_usable_fonts_fails() {
        let dir = TempDir::new().unwrap();
        let mut args = train_args(None);
        args.fonts = vec![".LastResort".into()];

        let err = handle_command(Commands::Train(args), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("font"), "unexpected error: {err}");
    }
}
