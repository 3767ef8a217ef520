// ABOUTME: Interactive chat loop over the agent gateway, generic over its input and output.
// ABOUTME: Shows live progress while a turn runs and asks before destroying stored history.

use crate::render::{self, Input};
use anyhow::Result;
use parley_core::{Gateway, GatewayUpdate, SubmitOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;

async fn say<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

async fn show_update<W: AsyncWrite + Unpin>(output: &mut W, update: GatewayUpdate) -> Result<()> {
    match update {
        GatewayUpdate::Progress(progress) => {
            if let Some(line) = render::progress_line(&progress) {
                say(output, &line).await?;
            }
        }
        GatewayUpdate::PersistenceDegraded(warning) => {
            say(output, &format!("warning: history may not be saved ({})", warning)).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Run the chat loop until `/quit` or end of input
pub async fn run<R, W>(gateway: &Gateway, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = gateway.resume_last_session();
    say(
        &mut output,
        &format!(
            "Chatting with {} via {} (session {}). /help for commands.",
            gateway.identity().display_name,
            gateway.backend_name(),
            session.id
        ),
    )
    .await?;
    for message in gateway.messages() {
        say(&mut output, &render::message_line(&message)).await?;
    }

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match render::parse_input(&line) {
            Input::Utterance(text) if text.is_empty() => continue,
            Input::Utterance(text) => turn(gateway, &text, &mut output).await?,
            Input::NewSession => {
                let session = gateway.create_session();
                say(&mut output, &format!("Started session {}", session.id)).await?;
            }
            Input::Reset => {
                say(&mut output, "Delete every stored conversation? [y/N]").await?;
                let answer = lines.next_line().await?.unwrap_or_default();
                if !render::is_confirmed(&answer) {
                    say(&mut output, "Reset cancelled.").await?;
                    continue;
                }
                match gateway.reset_all() {
                    Ok(()) => {
                        let session = gateway.create_session();
                        say(
                            &mut output,
                            &format!("All conversations deleted. Started session {}", session.id),
                        )
                        .await?;
                    }
                    Err(e) => say(&mut output, &format!("Reset failed: {:#}", e)).await?,
                }
            }
            Input::Help => say(&mut output, render::HELP).await?,
            Input::Quit => break,
            Input::Unknown(command) => {
                say(
                    &mut output,
                    &format!("Unknown command /{}. /help lists commands.", command),
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn turn<W: AsyncWrite + Unpin>(gateway: &Gateway, text: &str, output: &mut W) -> Result<()> {
    let mut updates = gateway.subscribe();
    let mut listening = true;
    let submit = gateway.submit(text);
    tokio::pin!(submit);

    let outcome = loop {
        tokio::select! {
            biased;
            update = updates.recv(), if listening => match update {
                Ok(update) => show_update(output, update).await?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Chat loop fell behind gateway updates");
                }
                Err(RecvError::Closed) => listening = false,
            },
            outcome = &mut submit => break outcome,
        }
    };
    while let Ok(update) = updates.try_recv() {
        show_update(output, update).await?;
    }

    match outcome {
        SubmitOutcome::Completed { reply } | SubmitOutcome::Failed { reply, .. } => {
            say(output, &render::message_line(&reply)).await
        }
        SubmitOutcome::Ignored(reason) => {
            tracing::debug!(?reason, "Submit ignored");
            Ok(())
        }
    }
}
