use anyhow::{bail, Context, Result};
use tokio::io::{self, AsyncWriteExt};
use tracing::info;

use crate::board::{BoardState, Cell, Turn};
use crate::cli::ClientArgs;
use crate::message::Message;
use crate::transport::quic::QuicTransport;
use crate::transport::{Link, Transport};

pub async fn run(args: ClientArgs) -> Result<()> {
    let transport = QuicTransport::new().context("failed to create client endpoint")?;
    let link = transport
        .dial(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let request = if args.reset {
        Message::SubmitState {
            state: BoardState::initial(),
        }
    } else {
        Message::RequestState
    };
    let response = link
        .request(&request)
        .await
        .with_context(|| format!("{} request failed", request.kind()));

    link.close();
    transport.wait_idle().await;
    render_response(response?).await
}

async fn render_response(response: Message) -> Result<()> {
    match response {
        Message::SendState { state, version } => {
            write_stdout(&format!("{} (version {version})", describe_turn(state.turn))).await?;
            write_stdout(&format!(
                "white {} / black {}{}",
                state.count(Cell::White),
                state.count(Cell::Black),
                if state.game_started { "" } else { " (not started)" }
            ))
            .await?;
            write_stdout(&state.to_string()).await?;
            Ok(())
        }
        Message::ClientError { message } => {
            write_stderr(&format!("!!! {message}")).await?;
            bail!("server rejected the request: {message}")
        }
        other => bail!("unexpected response: {}", other.kind()),
    }
}

fn describe_turn(turn: Turn) -> &'static str {
    match turn {
        Turn::White => "white to move",
        Turn::Black => "black to move",
        Turn::WhiteWon => "white won",
        Turn::BlackWon => "black won",
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
