//! Interactive console front-end
//!
//! One generated user id per run. Answers stream to stdout as they arrive;
//! tool activity is shown inline. Ctrl-C abandons the current turn without
//! touching the stored conversation.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use agent_core::{session::is_clear_command, Reply, TurnControl, TurnEvent};

use crate::state::AppState;

const RULE: &str = "---------------------------------------------";

fn banner(user_id: &str) {
    println!("{}", RULE);
    println!("  Tool-calling assistant");
    println!("     (Streaming answers, chained tool calls)");
    println!("     (In-memory per-user context)");
    println!("{}\n", RULE);
    println!("Current User Session: {}", user_id);
    println!("Type 'exit' or 'quit' to end.");
    println!("Try asking things like:");
    println!("  - What's the weather in London?");
    println!("  - Tell me a joke.");
    println!("  - Log that 'User logged in to the application' with severity 'Info'.");
    println!("  - First log 'test chain call' then tell me the weather in New York.");
    println!("  - Set my preferred city to Paris.");
    println!("  - What is my preferred city?");
    println!("  - Clear my context.");
    println!("{}\n", RULE);
}

fn render(event: TurnEvent) {
    match event {
        TurnEvent::TextDelta { text } => print!("{}", text),
        TurnEvent::ToolCallStarted { name, arguments, .. } => {
            println!("\n[TOOL CALL: {}] {}", name, arguments);
        }
        TurnEvent::ToolCallFinished { name, success, output, .. } => {
            let status = if success { "ok" } else { "failed" };
            println!("[TOOL CALL: {}] {}: {}", name, status, output);
        }
        TurnEvent::RoundStarted { .. } => {}
    }
    let _ = std::io::stdout().flush();
}

fn prompt(user_id: &str) {
    print!("[{}] Your query: ", user_id);
    let _ = std::io::stdout().flush();
}

/// Run the read-eval-print loop until `exit`, `quit` or end of input
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let user_id = uuid::Uuid::new_v4().to_string();
    banner(&user_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(&user_id);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                render(event);
            }
        });

        let control = TurnControl::new().with_events(tx);
        if !is_clear_command(input) {
            println!("\n--- User Query ({}): {} ---", user_id, input);
        }

        let result = tokio::select! {
            result = state.driver.handle_with(&user_id, input, &control) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        drop(control);
        let _ = printer.await;

        match result {
            Some(Ok(Reply::ContextCleared)) => {
                println!("Context for user '{}' cleared from memory.", user_id);
            }
            Some(Ok(Reply::Answer(_))) => println!("\n"),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Turn failed");
                eprintln!("\n[error] {}\n", e.user_message());
            }
            None => println!("\n[cancelled]\n"),
        }
    }

    println!("Application ended. Goodbye!");
    Ok(())
}
