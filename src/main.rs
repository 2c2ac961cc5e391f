use std::io::Write;

use clap::Parser;
use console::style;
use tokio::io::{self, AsyncBufReadExt};
use tracing_subscriber::EnvFilter;

use tabletalk::config::Config;
use tabletalk::error::Result;
use tabletalk::index::ProgressCallback;
use tabletalk::TableTalk;

#[derive(Parser, Debug)]
#[command(name = "tabletalk")]
#[command(about = "Chat with your database in natural language")]
struct Cli {
    #[arg(long, default_value = "./tabletalk.json")]
    config: String,

    #[arg(long, env = "TABLETALK_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Rebuild the schema embedding index
    Embed,
    /// Apply a natural-language schema change
    Modify {
        #[arg(long)]
        instruction: String,
    },
    /// Show (or clear) the schema modification history
    History {
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tabletalk=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    if let Some(api_key) = &cli.api_key {
        config.llm.api_key = Some(api_key.clone());
    }

    let client = TableTalk::from_config(config).await?;

    match &cli.command {
        Some(Commands::Embed) => {
            let progress = progress_bar();
            client.rebuild_index(Some(&progress)).await?;
            println!();
            println!("{}", style("Schema has been embedded successfully!").green());
            Ok(())
        }
        Some(Commands::Modify { instruction }) => {
            let result = client.modify(instruction).await;
            if result.success {
                println!("{}", style("Successfully executed SQL").green());
                if let Some(sql) = result.sql {
                    println!("{sql}");
                }
            } else {
                println!(
                    "{} {}",
                    style("Error:").red().bold(),
                    result.error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Some(Commands::History { clear }) => {
            if *clear {
                client.clear_history()?;
                println!("History cleared.");
                return Ok(());
            }
            for entry in client.history()? {
                let role = format!("{:?}", entry.role).to_lowercase();
                match &entry.sql {
                    Some(sql) => println!("[{}] {role}: {}\n{sql}", entry.timestamp, entry.content),
                    None => println!("[{}] {role}: {}", entry.timestamp, entry.content),
                }
            }
            Ok(())
        }
        None => run_repl(&client).await,
    }
}

async fn run_repl(client: &TableTalk) -> Result<()> {
    if client.ensure_index(Some(&progress_bar())).await? {
        println!();
        println!("{}", style("Schema analysis complete!").green());
    }

    println!(
        "{}",
        style("Ask a question about your database (or 'quit' to exit):").dim()
    );
    let stdin = io::BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    loop {
        print!("{} ", style("➜").cyan().bold());
        std::io::stdout()
            .flush()
            .map_err(|e| tabletalk::TableTalkError::Runtime(e.to_string()))?;
        let line = lines
            .next_line()
            .await
            .map_err(|e| tabletalk::TableTalkError::Runtime(e.to_string()))?;
        let Some(line) = line else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("quit") {
            break;
        }

        let result = client.ask(question).await;
        if result.success {
            if let Some(response) = &result.response {
                println!("\n{response}");
            }
            if let Some(sql) = &result.sql {
                println!("\n{}", style(format!("SQL: {sql}")).dim());
            }
        } else {
            println!(
                "\n{} {}",
                style("Error:").red().bold(),
                result.error.unwrap_or_default()
            );
            if let Some(sql) = &result.sql {
                println!("{}", style(format!("Attempted SQL: {sql}")).dim());
            }
        }
        println!();
    }
    Ok(())
}

fn progress_bar() -> ProgressCallback {
    Box::new(|fraction| {
        print!("\rAnalyzing database schema... {:3.0}%", fraction * 100.0);
        let _ = std::io::stdout().flush();
    })
}
