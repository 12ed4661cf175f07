use anyhow::Result;
use console::style;

use crate::config::Settings;
use crate::core::store::TaskStore;
use crate::core::terminal::{GuideSection, print_error, print_success};

fn print_usage() {
    GuideSection::new("funpay-plus token")
        .command("create <user_id> [name]", "Mint an API token for a user")
        .command("list <user_id>", "List a user's API tokens")
        .command("revoke <token_id>", "Revoke an API token")
        .print();
    println!();
}

/// Token management works directly on the local database so the first
/// token can be minted before the API is reachable.
pub async fn run_token_command(args: &[String]) -> Result<()> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let positional = |i: usize| args.get(i).map(|s| s.trim()).filter(|s| !s.is_empty());

    let settings = Settings::from_env()?;
    let store = TaskStore::open(settings.database_path())?;

    match sub_cmd {
        "create" => {
            let Some(user_id) = positional(3) else {
                println!(
                    "{}",
                    style("Usage: funpay-plus token create <user_id> [name]").bold()
                );
                return Ok(());
            };
            let name = positional(4).unwrap_or("default");
            let (token, record) = store.create_api_token(user_id, name).await?;

            println!();
            print_success(&format!(
                "API token '{}' created for user '{}'.",
                record.name, user_id
            ));
            println!(
                "\n  {} {}\n",
                style("Token:").bold(),
                style(&token).green().bold()
            );
            println!(
                "  {} Save this token now. It will not be shown again.",
                style("⚠").yellow()
            );
            println!(
                "  {} Use it with: Authorization: Bearer {}\n",
                style("→").cyan(),
                token
            );
        }
        "list" | "ls" => {
            let Some(user_id) = positional(3) else {
                println!("{}", style("Usage: funpay-plus token list <user_id>").bold());
                return Ok(());
            };
            let tokens = store.list_api_tokens(user_id).await?;
            if tokens.is_empty() {
                println!("  {} No API tokens for user '{}'.", style("●").dim(), user_id);
                return Ok(());
            }
            println!(
                "\n  {} API tokens for user '{}':\n",
                style("●").cyan(),
                style(user_id).bold()
            );
            for tk in &tokens {
                println!(
                    "  {} {} (id: {})  created: {}",
                    style("→").cyan(),
                    style(&tk.name).white().bold(),
                    style(&tk.id).dim(),
                    style(&tk.created_at).dim()
                );
            }
            println!();
        }
        "revoke" | "delete" | "rm" => {
            let Some(token_id) = positional(3) else {
                println!(
                    "{}",
                    style("Usage: funpay-plus token revoke <token_id>").bold()
                );
                return Ok(());
            };
            if store.delete_api_token(token_id).await? {
                print_success("Token revoked.");
            } else {
                print_error(&format!("No token with id '{}'.", token_id));
            }
        }
        _ => print_usage(),
    }

    Ok(())
}
