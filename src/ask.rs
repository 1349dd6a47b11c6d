//! `kic ask` and `kic chat`.
//!
//! Both run turns through an [`Orchestrator`] built from the config file.
//! `ask` answers a single question; `chat` keeps one session open and reads
//! questions from stdin until EOF or an empty line.
//!
//! With `--stream`, raw answer fragments are printed as they arrive and the
//! resolved citations are listed after the answer.

use anyhow::Result;
use std::io::{BufRead, Write};

use campus_assistant_core::llm::TokenSink;
use campus_assistant_core::models::{Answer, AnswerKind, Scope};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::orchestrator::{ChatRequest, ChatResponse, Orchestrator};

pub async fn run_ask(config: &Config, question: &str, scope: Scope, stream: bool) -> Result<()> {
    scope.validate().map_err(anyhow::Error::msg)?;
    if question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }

    let orchestrator = Orchestrator::from_config(config).await?;
    let cancel = cancel_on_ctrl_c();
    let request = ChatRequest::new(question, scope);
    turn(&orchestrator, request, cancel, stream).await?;
    Ok(())
}

pub async fn run_chat(config: &Config, scope: Scope, stream: bool) -> Result<()> {
    scope.validate().map_err(anyhow::Error::msg)?;

    let orchestrator = Orchestrator::from_config(config).await?;
    let cancel = cancel_on_ctrl_c();
    let stdin = std::io::stdin();
    let mut session_id: Option<String> = None;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }

        let mut request = ChatRequest::new(line.trim(), scope);
        request.session_id = session_id.clone();
        match turn(&orchestrator, request, cancel.clone(), stream).await? {
            Some(response) => session_id = Some(response.session_id),
            None => break,
        }
        println!();
    }

    Ok(())
}

/// Runs one turn and prints it. `None` if the turn was cancelled.
async fn turn(
    orchestrator: &Orchestrator,
    request: ChatRequest,
    cancel: CancellationToken,
    stream: bool,
) -> Result<Option<ChatResponse>> {
    let result = if stream {
        let mut print_fragment = |fragment: &str| {
            print!("{}", fragment);
            let _ = std::io::stdout().flush();
        };
        let sink: TokenSink = &mut print_fragment;
        let result = orchestrator.chat_streaming(request, cancel, sink).await;
        println!();
        result
    } else {
        orchestrator.chat(request, cancel).await
    };

    match result {
        Ok(response) => {
            print_answer(&response.answer, stream);
            Ok(Some(response))
        }
        Err(cancelled) => {
            eprintln!("{}", cancelled);
            Ok(None)
        }
    }
}

fn print_answer(answer: &Answer, streamed: bool) {
    // A streamed grounded answer is already on screen; other kinds were
    // never streamed or were replaced by a fixed reply.
    if !streamed || answer.kind != AnswerKind::Grounded {
        println!("{}", answer.text);
    }

    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &answer.citations {
            println!("  [{}] {}  {}", c.marker_index, c.title, c.url);
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}
