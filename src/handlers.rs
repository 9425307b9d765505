//! Command dispatch
//!
//! Host authorization is checked here before the engine is called. Failures
//! of explicit actions are reported to the user through the view.

use crate::error::{ClientError, ClientResult, ErrorKind};
use crate::protocol::Command;
use crate::state::GameClient;
use crate::view::Notice;

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($client:expr, $action:expr) => {
        if !$client.is_host() {
            return Err(ClientError::NotHost($action));
        }
    };
}

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Run one command, reporting any failure to the view
pub async fn handle_command(client: &mut GameClient, command: Command) -> Flow {
    let inline = matches!(
        command,
        Command::JoinRoom { .. } | Command::SetNickname { .. } | Command::CreateRoom { .. }
    );

    match dispatch(client, command).await {
        Ok(flow) => flow,
        Err(e) => {
            report(client, &e, inline);
            Flow::Continue
        }
    }
}

fn report(client: &mut GameClient, error: &ClientError, inline: bool) {
    match error.kind() {
        ErrorKind::Validation | ErrorKind::NotFound => {
            tracing::info!("Rejected: {}", error)
        }
        ErrorKind::Conflict | ErrorKind::Transient => tracing::error!("Action failed: {}", error),
    }

    let message = error.to_string();
    client.view.notify(if inline {
        Notice::Inline(message)
    } else {
        Notice::Alert(message)
    });
}

async fn dispatch(client: &mut GameClient, command: Command) -> ClientResult<Flow> {
    match command {
        Command::SetNickname { nickname } => client.set_nickname(&nickname)?,

        Command::CreateRoom { settings } => {
            client.create_room(settings).await?;
        }

        Command::JoinRoom { code } => {
            client.join_by_code(&code).await?;
        }

        Command::DraftAnswer { text } => client.draft_answer(&text),

        Command::SubmitAnswer { text } => {
            client.submit_answer(&text).await?;
        }

        Command::SubmitCustomQuestion { text } => {
            client.submit_custom_question(&text).await?;
        }

        Command::SelectAnswer { answer_id } => client.select_answer(&answer_id)?,

        Command::CastVote => {
            client.cast_vote().await?;
        }

        Command::LoadAnswers => {
            let choices = client.load_answer_choices().await?;
            tracing::debug!("Loaded {} answer choices", choices.len());
            client.refresh().await?;
        }

        Command::SetPresence { active } => client.set_active_status(active).await,

        Command::Refresh => client.refresh().await?,

        Command::LeaveRoom => client.leave_room().await,

        // Host-only commands
        Command::HostSaveSettings { settings } => {
            check_host!(client, "change settings");
            client.save_settings(settings).await?;
        }

        Command::HostStartGame { settings } => {
            check_host!(client, "start the game");
            client.start_game(settings).await?;
        }

        Command::HostStartRound => {
            check_host!(client, "start rounds");
            client.start_round().await?;
        }

        Command::HostStartVoting => {
            check_host!(client, "start voting");
            client.start_voting().await?;
        }

        Command::HostFinalize => {
            check_host!(client, "finalize the round");
            client.finalize().await?;
        }

        Command::HostEndGame => {
            check_host!(client, "end the game");
            client.end_game().await?;
        }

        Command::HostStartNewGame => {
            check_host!(client, "start a new game");
            client.start_new_game().await?;
        }

        Command::Shutdown => {
            client.leave_room().await;
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}
